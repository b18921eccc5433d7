//! Host side of the bridge: capability registry and dispatch.

use crate::protocol::{render_dispatch_script, salvage_callback_id, salvage_field};
use crate::{BridgeError, BridgeOutcome, BridgeRequest, BridgeResponseEvent, BridgeResult};
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// A `(type, action)` pair the host can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    LocationGetCurrent,
    LocationRequestPermission,
    CameraRequestPermission,
    CameraCapture,
    DeviceGetInfo,
    AuthGetSessionToken,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::LocationGetCurrent,
        Capability::LocationRequestPermission,
        Capability::CameraRequestPermission,
        Capability::CameraCapture,
        Capability::DeviceGetInfo,
        Capability::AuthGetSessionToken,
    ];

    pub fn parse(feature_type: &str, action: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.feature_type() == feature_type && c.action() == action)
    }

    pub fn feature_type(self) -> &'static str {
        match self {
            Capability::LocationGetCurrent | Capability::LocationRequestPermission => "LOCATION",
            Capability::CameraRequestPermission | Capability::CameraCapture => "CAMERA",
            Capability::DeviceGetInfo => "DEVICE",
            Capability::AuthGetSessionToken => "AUTH",
        }
    }

    pub fn action(self) -> &'static str {
        match self {
            Capability::LocationGetCurrent => "GET_CURRENT",
            Capability::LocationRequestPermission | Capability::CameraRequestPermission => {
                "REQUEST_PERMISSION"
            }
            Capability::CameraCapture => "CAPTURE",
            Capability::DeviceGetInfo => "GET_INFO",
            Capability::AuthGetSessionToken => "GET_SESSION_TOKEN",
        }
    }
}

/// Injects a script into the embedded content surface.
pub trait ScriptInjector: Send + Sync {
    fn inject(&self, script: String) -> BridgeResult<()>;
}

/// Injector that hands scripts to a channel.
#[derive(Clone)]
pub struct ChannelInjector {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelInjector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ScriptInjector for ChannelInjector {
    fn inject(&self, script: String) -> BridgeResult<()> {
        self.tx
            .send(script)
            .map_err(|_| BridgeError::Transport("script receiver dropped".to_string()))
    }
}

/// Handler for one capability. Errors become `{success: false, error}`.
pub type HandlerFn = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Routes content requests to capability handlers and injects the replies.
///
/// Handlers are registered before the dispatcher is shared; the registry
/// is read-only afterwards.
pub struct HostDispatcher {
    handlers: HashMap<Capability, HandlerFn>,
    injector: Arc<dyn ScriptInjector>,
}

impl HostDispatcher {
    pub fn new(injector: Arc<dyn ScriptInjector>) -> Self {
        Self {
            handlers: HashMap::new(),
            injector,
        }
    }

    /// Register a handler for a capability, replacing any previous one.
    pub fn register<F, Fut>(&mut self, capability: Capability, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let boxed: HandlerFn = Arc::new(move |payload| Box::pin(handler(payload)));
        self.handlers.insert(capability, boxed);
    }

    pub fn is_registered(&self, capability: Capability) -> bool {
        self.handlers.contains_key(&capability)
    }

    /// Handle one raw content message and inject the reply.
    ///
    /// Returns the reply, or `None` when the message was too malformed to
    /// answer.
    pub async fn handle_message(&self, raw: &str) -> BridgeResult<Option<BridgeResponseEvent>> {
        let request = match BridgeRequest::from_json(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Malformed bridge message");
                let Some(callback_id) = salvage_callback_id(raw) else {
                    return Ok(None);
                };
                let reply = BridgeResponseEvent {
                    feature_type: salvage_field(raw, "type"),
                    action: salvage_field(raw, "action"),
                    response: BridgeOutcome::failure(e.to_string()),
                    callback_id: Some(callback_id),
                };
                self.send(&reply)?;
                return Ok(Some(reply));
            }
        };

        // Without an id the reply would be indistinguishable from a host push.
        if request.callback_id.is_none() {
            let e = BridgeError::Protocol(format!(
                "request {}/{} has no callbackId",
                request.feature_type, request.action
            ));
            warn!(error = %e, "Rejected bridge message");
            return Ok(None);
        }

        let reply = self.dispatch(request).await;
        self.send(&reply)?;
        Ok(Some(reply))
    }

    /// Run the handler for `request` and build its reply.
    pub async fn dispatch(&self, request: BridgeRequest) -> BridgeResponseEvent {
        debug!(
            feature_type = %request.feature_type,
            action = %request.action,
            callback_id = ?request.callback_id,
            "Dispatching bridge request"
        );

        let handler = Capability::parse(&request.feature_type, &request.action)
            .and_then(|capability| self.handlers.get(&capability).cloned());

        let Some(handler) = handler else {
            warn!(
                feature_type = %request.feature_type,
                action = %request.action,
                "Unsupported bridge feature"
            );
            let outcome =
                BridgeOutcome::failure(format!("Unsupported feature type: {}", request.feature_type));
            return BridgeResponseEvent::reply(&request, outcome);
        };

        // The handler call itself runs inside the task so a panic in its
        // synchronous prefix is caught too.
        let payload = request.payload.clone();
        let outcome = match tokio::spawn(async move { handler(payload).await }).await {
            Ok(Ok(data)) => BridgeOutcome::ok(data),
            Ok(Err(message)) => {
                debug!(error = %message, "Bridge handler failed");
                BridgeOutcome::failure(message)
            }
            Err(e) => {
                error!(
                    feature_type = %request.feature_type,
                    action = %request.action,
                    error = %e,
                    "Bridge handler aborted"
                );
                BridgeOutcome::failure(join_error_message(e))
            }
        };

        BridgeResponseEvent::reply(&request, outcome)
    }

    /// Send an unsolicited event to content.
    pub fn push_event(&self, feature_type: &str, action: &str, data: Value) -> BridgeResult<()> {
        self.send(&BridgeResponseEvent::push(feature_type, action, data))
    }

    fn send(&self, event: &BridgeResponseEvent) -> BridgeResult<()> {
        let script = render_dispatch_script(event)?;
        self.injector.inject(script).inspect_err(|e| {
            error!(error = %e, "Failed to inject bridge script");
        })
    }
}

fn join_error_message(e: tokio::task::JoinError) -> String {
    if !e.is_panic() {
        return "Handler cancelled".to_string();
    }
    let panic = e.into_panic();
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Handler panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Handler panicked: {message}")
    } else {
        "Handler panicked".to_string()
    }
}
