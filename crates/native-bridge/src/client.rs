//! Content side of the bridge: request/response correlation.

use crate::protocol::new_callback_id;
use crate::{BridgeError, BridgeRequest, BridgeResponseEvent, BridgeResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

/// Default bounded wait for one round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transmits serialized requests to the host.
pub trait MessageEmitter: Send + Sync {
    fn emit(&self, message: String) -> BridgeResult<()>;
}

/// Emitter that hands messages to a channel.
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelEmitter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageEmitter for ChannelEmitter {
    fn emit(&self, message: String) -> BridgeResult<()> {
        self.tx
            .send(message)
            .map_err(|_| BridgeError::Transport("host receiver dropped".to_string()))
    }
}

/// Client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// `None` waits forever.
    pub request_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

impl BridgeConfig {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            request_timeout: timeout,
        }
    }
}

struct PendingCallback {
    tx: oneshot::Sender<BridgeResult<Value>>,
    created_at: Instant,
}

type PendingMap = Mutex<HashMap<String, PendingCallback>>;

/// Removes a request's entry when its caller stops waiting.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    callback_id: String,
}

impl PendingGuard<'_> {
    /// Returns false if the entry was already settled.
    fn evict(&self) -> bool {
        self.pending.lock().remove(&self.callback_id).is_some()
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.evict() {
            debug!(callback_id = %self.callback_id, "Bridge request abandoned by caller");
        }
    }
}

/// Sends bridge requests and resolves them from host events.
///
/// Every request gets a callback id that is unique among in-flight
/// requests. Each pending entry is removed exactly once: by the matching
/// response, by the timeout, by [`shutdown`](Self::shutdown), or when the
/// caller drops the request future.
pub struct BridgeClient {
    emitter: Box<dyn MessageEmitter>,
    config: BridgeConfig,
    pending: PendingMap,
    pushes: broadcast::Sender<BridgeResponseEvent>,
    closed: AtomicBool,
}

impl BridgeClient {
    pub fn new(emitter: impl MessageEmitter + 'static, config: BridgeConfig) -> Self {
        let (pushes, _) = broadcast::channel(32);
        Self {
            emitter: Box::new(emitter),
            config,
            pending: Mutex::new(HashMap::new()),
            pushes,
            closed: AtomicBool::new(false),
        }
    }

    /// Send `(feature_type, action)` and wait for the host's answer.
    pub async fn request(
        &self,
        feature_type: &str,
        action: &str,
        payload: Option<Value>,
    ) -> BridgeResult<Value> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::ChannelClosed);
        }

        let (tx, rx) = oneshot::channel();
        let guard = {
            let mut pending = self.pending.lock();
            let mut id = new_callback_id();
            while pending.contains_key(&id) {
                id = new_callback_id();
            }
            pending.insert(
                id.clone(),
                PendingCallback {
                    tx,
                    created_at: Instant::now(),
                },
            );
            PendingGuard {
                pending: &self.pending,
                callback_id: id,
            }
        };
        let callback_id = guard.callback_id.clone();

        let mut request = BridgeRequest::new(feature_type, action).with_callback_id(&callback_id);
        request.payload = payload;

        let sent = request.to_json().and_then(|json| self.emitter.emit(json));
        if let Err(e) = sent {
            guard.evict();
            return Err(e);
        }
        debug!(callback_id = %callback_id, feature_type, action, "Bridge request sent");

        let mut rx = rx;
        let received = match self.config.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, &mut rx).await {
                Ok(received) => received,
                Err(_) => {
                    // A response may have landed between the deadline and the eviction.
                    if !guard.evict() {
                        return rx.try_recv().unwrap_or(Err(BridgeError::ChannelClosed));
                    }
                    warn!(callback_id = %callback_id, feature_type, action, "Bridge request timed out");
                    return Err(BridgeError::Timeout {
                        callback_id,
                        after_ms: timeout.as_millis(),
                    });
                }
            },
            None => rx.await,
        };

        received.unwrap_or(Err(BridgeError::ChannelClosed))
    }

    /// Route one host event. Returns whether it settled a pending request.
    ///
    /// Events without a callback id are host pushes and go to
    /// [`subscribe_pushes`](Self::subscribe_pushes). Unknown or repeated ids
    /// are ignored.
    pub fn handle_event(&self, event: BridgeResponseEvent) -> bool {
        let Some(callback_id) = event.callback_id.clone() else {
            let _ = self.pushes.send(event);
            return false;
        };

        let Some(entry) = self.pending.lock().remove(&callback_id) else {
            debug!(callback_id = %callback_id, "No pending request for bridge response");
            return false;
        };

        debug!(
            callback_id = %callback_id,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            success = event.response.success,
            "Bridge response received"
        );
        let result = event.response.into_result().map_err(BridgeError::Rejected);
        // The waiter may have gone away; the entry is gone either way.
        let _ = entry.tx.send(result);
        true
    }

    /// Parse and route a raw event detail.
    pub fn handle_event_json(&self, detail: &str) -> BridgeResult<bool> {
        Ok(self.handle_event(BridgeResponseEvent::from_json(detail)?))
    }

    /// Receive host pushes (events without a callback id).
    pub fn subscribe_pushes(&self) -> broadcast::Receiver<BridgeResponseEvent> {
        self.pushes.subscribe()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Reject every pending request and refuse new ones.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Rejecting pending bridge requests");
        }
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(BridgeError::ChannelClosed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BridgeOutcome, BridgeRequest};
    use serde_json::json;
    use std::sync::Arc;

    fn client(timeout: Option<Duration>) -> (Arc<BridgeClient>, mpsc::UnboundedReceiver<String>) {
        let (emitter, rx) = ChannelEmitter::new();
        (
            Arc::new(BridgeClient::new(emitter, BridgeConfig::with_timeout(timeout))),
            rx,
        )
    }

    #[tokio::test]
    async fn test_response_resolves_once() {
        let (client, mut outbox) = client(None);

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.request("LOCATION", "GET_CURRENT", None).await })
        };

        let request = BridgeRequest::from_json(&outbox.recv().await.unwrap()).unwrap();
        let callback_id = request.callback_id.clone().unwrap();
        assert!(callback_id.starts_with("cb_"));
        assert_eq!(client.pending_count(), 1);

        let reply = BridgeResponseEvent::reply(&request, BridgeOutcome::ok(json!({"ok": 1})));
        assert!(client.handle_event(reply.clone()));
        assert!(!client.handle_event(reply));

        assert_eq!(task.await.unwrap().unwrap(), json!({"ok": 1}));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_response_rejects() {
        let (client, mut outbox) = client(None);

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.request("CAMERA", "CAPTURE", None).await })
        };

        let request = BridgeRequest::from_json(&outbox.recv().await.unwrap()).unwrap();
        client.handle_event(BridgeResponseEvent::reply(
            &request,
            BridgeOutcome::failure("Camera permission denied"),
        ));

        match task.await.unwrap() {
            Err(BridgeError::Rejected(message)) => assert_eq!(message, "Camera permission denied"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_callback_is_ignored() {
        let (client, _outbox) = client(None);
        let stray = BridgeResponseEvent::reply(
            &BridgeRequest::new("DEVICE", "GET_INFO").with_callback_id("cb_0_nobody"),
            BridgeOutcome::ok(json!({})),
        );
        assert!(!client.handle_event(stray));
    }

    #[tokio::test]
    async fn test_timeout_evicts_entry() {
        let (client, _outbox) = client(Some(Duration::from_millis(50)));

        let err = client
            .request("LOCATION", "GET_CURRENT", None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { after_ms: 50, .. }));
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_request_releases_entry() {
        let (client, mut outbox) = client(None);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            client.request("LOCATION", "GET_CURRENT", None),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(client.pending_count(), 0);

        // A late reply for the abandoned id is ignored.
        let request = BridgeRequest::from_json(&outbox.recv().await.unwrap()).unwrap();
        let reply = BridgeResponseEvent::reply(&request, BridgeOutcome::ok(json!({})));
        assert!(!client.handle_event(reply));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending() {
        let (client, mut outbox) = client(None);

        let task = {
            let client = client.clone();
            tokio::spawn(async move { client.request("DEVICE", "GET_INFO", None).await })
        };
        outbox.recv().await.unwrap();

        client.shutdown();
        assert!(matches!(task.await.unwrap(), Err(BridgeError::ChannelClosed)));
        assert!(matches!(
            client.request("DEVICE", "GET_INFO", None).await,
            Err(BridgeError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_push_goes_to_subscribers() {
        let (client, _outbox) = client(None);
        let mut pushes = client.subscribe_pushes();

        let push = BridgeResponseEvent::push("AUTH", "SESSION_CHANGED", json!({"accessToken": "t"}));
        assert!(!client.handle_event(push.clone()));
        assert_eq!(pushes.recv().await.unwrap(), push);
    }

    #[tokio::test]
    async fn test_emit_failure_leaves_no_entry() {
        let (emitter, outbox) = ChannelEmitter::new();
        drop(outbox);
        let client = BridgeClient::new(emitter, BridgeConfig::default());

        let err = client.request("DEVICE", "GET_INFO", None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert_eq!(client.pending_count(), 0);
    }
}
