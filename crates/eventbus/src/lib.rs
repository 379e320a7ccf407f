//! Typed in-process publish/subscribe channels.
//!
//! Each [`Topic`] is one named event with a concrete payload type, so
//! subscribers only ever see the events they asked for. Delivery is
//! at-most-once: a payload published before a subscription exists is never
//! replayed. Dropping a [`Subscription`] retracts it, which keeps teardown
//! correct on early-return and cancellation paths.

use tokio::sync::broadcast;
use tracing::warn;

pub struct Topic<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Delivers `payload` to every current subscriber, returning how many
    /// there were. Publishing with no subscribers is not an error.
    pub fn publish(&self, payload: T) -> usize {
        self.sender.send(payload).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Live registration with a [`Topic`]. Retracted on drop.
pub struct Subscription<T> {
    receiver: Option<broadcast::Receiver<T>>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    /// Next payload, or `None` once the subscription is retracted or the
    /// topic has gone away. Gaps from slow consumption are skipped.
    pub async fn next(&mut self) -> Option<T> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("eventbus: subscription lagged, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Stops delivery. Idempotent: retracting an already-retracted
    /// subscription is a no-op.
    pub fn retract(&mut self) {
        self.receiver = None;
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}

#[cfg(test)]
mod tests;
