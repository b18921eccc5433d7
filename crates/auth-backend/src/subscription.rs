//! Auth state change fan-out.

use crate::AuthEvent;
use tokio::sync::broadcast;
use tracing::warn;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcasts [`AuthEvent`]s to every live [`AuthSubscription`].
#[derive(Debug, Clone)]
pub struct AuthEventBus {
    tx: broadcast::Sender<AuthEvent>,
}

impl Default for AuthEventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl AuthEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `event` to current subscribers. No subscribers is not an error.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.tx.send(event);
    }

    /// Open a subscription whose first event is `initial`.
    pub fn subscribe(&self, initial: AuthEvent) -> AuthSubscription {
        AuthSubscription {
            initial: Some(initial),
            rx: self.tx.subscribe(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Handle to a stream of auth events.
///
/// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct AuthSubscription {
    initial: Option<AuthEvent>,
    rx: broadcast::Receiver<AuthEvent>,
}

impl AuthSubscription {
    /// Next event, or `None` once the backend is gone.
    ///
    /// A subscriber that falls behind skips the dropped events and logs it.
    pub async fn next(&mut self) -> Option<AuthEvent> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Auth subscription lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Explicitly end the subscription.
    pub fn unsubscribe(self) {}
}
