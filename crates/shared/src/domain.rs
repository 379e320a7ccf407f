use std::fmt;

use serde::{Deserialize, Serialize};

/// Record of a sideloaded app as read from the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledApp {
    pub name: String,
    pub bundle_identifier: String,
    /// URL scheme the app registered for inbound `scheme://` opens.
    pub open_url_scheme: String,
}

impl InstalledApp {
    pub fn new(
        name: impl Into<String>,
        bundle_identifier: impl Into<String>,
        open_url_scheme: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            bundle_identifier: bundle_identifier.into(),
            open_url_scheme: open_url_scheme.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupAction {
    Backup,
    Restore,
}

impl BackupAction {
    /// Host component of the forward URL handed to the external app.
    pub fn as_str(self) -> &'static str {
        match self {
            BackupAction::Backup => "backup",
            BackupAction::Restore => "restore",
        }
    }
}

impl fmt::Display for BackupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
