//! URL handshake between the host app and a cooperating sideloaded app.
//!
//! The host opens `"{target_scheme}://{action}?returnURL=..."` to hand
//! control away; the external app reports back by opening the return URL
//! with its result encoded in the query string.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    domain::{BackupAction, InstalledApp},
    error::OperationError,
};

/// Host component marking inbound URLs as backup-handoff responses.
pub const BACKUP_RESPONSE_HOST: &str = "appBackupResponse";
/// Query parameter carrying the URL-encoded return address.
pub const RETURN_URL_PARAM: &str = "returnURL";

const BUNDLE_IDENTIFIER_PARAM: &str = "bundleIdentifier";
const RESULT_PARAM: &str = "result";
const ERROR_DESCRIPTION_PARAM: &str = "errorDescription";

/// Address the external app opens to hand control back to the host.
pub fn return_url(host_app: &InstalledApp) -> Option<Url> {
    Url::parse(&format!(
        "{}://{}",
        host_app.open_url_scheme, BACKUP_RESPONSE_HOST
    ))
    .ok()
}

/// Forward address handed to the external app, with the return address
/// attached as a query parameter.
pub fn handoff_url(target: &InstalledApp, action: BackupAction, return_url: &Url) -> Option<Url> {
    let mut url = Url::parse(&format!("{}://{}", target.open_url_scheme, action.as_str())).ok()?;
    url.query_pairs_mut()
        .append_pair(RETURN_URL_PARAM, return_url.as_str());
    Some(url)
}

pub fn is_backup_response(url: &Url) -> bool {
    url.host_str() == Some(BACKUP_RESPONSE_HOST)
}

/// Payload published on the backup-response channel once the external app
/// has reported back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupResponse {
    pub bundle_identifier: String,
    /// `None` when the response carried no usable result.
    pub result: Option<Result<(), OperationError>>,
}

/// Decodes an inbound backup-response URL into the payload published on the
/// backup-response channel. Returns `None` for URLs that are not handoff
/// responses or that name no app.
pub fn parse_backup_response(url: &Url) -> Option<BackupResponse> {
    if !is_backup_response(url) {
        return None;
    }

    let mut bundle_identifier = None;
    let mut reported = None;
    let mut error_description = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            BUNDLE_IDENTIFIER_PARAM => bundle_identifier = Some(value.into_owned()),
            RESULT_PARAM => reported = Some(value.into_owned()),
            ERROR_DESCRIPTION_PARAM => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    let result = match reported.as_deref() {
        Some("success") => Some(Ok(())),
        Some("cancelled") => Some(Err(OperationError::Cancelled)),
        Some("failure") => Some(Err(match error_description {
            Some(message) => OperationError::external(message),
            None => OperationError::UnknownResult,
        })),
        _ => None,
    };

    Some(BackupResponse {
        bundle_identifier: bundle_identifier?,
        result,
    })
}
