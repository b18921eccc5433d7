//! Host state shared by every command.

use async_trait::async_trait;
use auth_backend::{AuthBackend, InMemoryBackend, SupabaseAuthClient};
use native_bridge::{
    register_device_handlers, Devices, FixedLocation, HostDeviceInfo, HostDispatcher,
    LocationProvider, SessionTokenSource,
};
use oauth_shim::{CredentialDeriver, ExchangeChain, ProviderFlow, ShimAuthenticator};
use parking_lot::RwLock;
use session_machine::{BackendProfileSource, SessionController, TokenSink};
use shell_config_and_utils::{Config, Paths};
use shell_storage::{FileStorage, SessionVault};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bridge action used to push token changes to content.
const SESSION_CHANGED: &str = "SESSION_CHANGED";

/// Pushes token changes into the embedded surface once a dispatcher is attached.
#[derive(Default)]
pub struct BridgeTokenSink {
    dispatcher: RwLock<Option<Arc<HostDispatcher>>>,
}

impl BridgeTokenSink {
    pub fn attach(&self, dispatcher: Arc<HostDispatcher>) {
        *self.dispatcher.write() = Some(dispatcher);
    }

    pub fn detach(&self) {
        self.dispatcher.write().take();
    }

    fn push(&self, data: serde_json::Value) {
        let Some(dispatcher) = self.dispatcher.read().clone() else {
            debug!("No bridge attached, token change not pushed");
            return;
        };
        if let Err(e) = dispatcher.push_event("AUTH", SESSION_CHANGED, data) {
            warn!(error = %e, "Failed to push session change to content");
        }
    }
}

impl TokenSink for BridgeTokenSink {
    fn push_token(&self, access_token: &str) {
        self.push(serde_json::json!({ "accessToken": access_token }));
    }

    fn clear_token(&self) {
        self.push(serde_json::json!({ "accessToken": null }));
    }
}

/// Serves `AUTH/GET_SESSION_TOKEN` from the session controller.
struct ControllerTokens(Arc<SessionController>);

#[async_trait]
impl SessionTokenSource for ControllerTokens {
    async fn access_token(&self) -> Option<String> {
        match self.0.valid_access_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                debug!(error = %e, "No session token for content");
                None
            }
        }
    }
}

/// Everything a command needs.
pub struct HostState {
    pub config: Config,
    pub backend: Arc<dyn AuthBackend>,
    /// Set when running against the in-process backend.
    pub offline: Option<InMemoryBackend>,
    pub session: Arc<SessionController>,
    /// Provider code login; `None` until a shim secret is configured.
    pub provider_flow: Option<ProviderFlow>,
    pub token_sink: Arc<BridgeTokenSink>,
}

impl HostState {
    pub fn build(config: Config, paths: &Paths, offline: bool) -> Result<Self, Box<dyn std::error::Error>> {
        paths.ensure_dirs()?;

        let (backend, offline): (Arc<dyn AuthBackend>, Option<InMemoryBackend>) = if offline {
            let memory = InMemoryBackend::new();
            (Arc::new(memory.clone()), Some(memory))
        } else {
            let client =
                SupabaseAuthClient::new(config.backend_url.clone(), config.backend_publishable_key.clone());
            (Arc::new(client), None)
        };

        let vault = SessionVault::new(Arc::new(FileStorage::open(paths.session_file())?));
        let token_sink = Arc::new(BridgeTokenSink::default());
        let mut builder = SessionController::builder(backend.clone(), vault)
            .profile_source(Arc::new(BackendProfileSource::new(backend.clone())))
            .token_sink(token_sink.clone());
        // Provider login stays unavailable until a shim secret is configured.
        let provider_flow = match CredentialDeriver::from_config(&config) {
            Ok(deriver) => {
                let shim = Arc::new(ShimAuthenticator::new(backend.clone(), deriver));
                builder = builder.shim(shim.clone());
                // A desktop host has no native provider SDK, so the chain is REST only.
                let chain = ExchangeChain::standard(&config.provider, None);
                Some(ProviderFlow::new(config.provider.clone(), chain, shim))
            }
            Err(e) => {
                debug!(error = %e, "OAuth shim disabled");
                None
            }
        };
        let session = Arc::new(builder.build());

        Ok(Self {
            config,
            backend,
            offline,
            session,
            provider_flow,
            token_sink,
        })
    }

    /// Register the host's device handlers on `dispatcher`.
    pub fn register_bridge(&self, dispatcher: &mut HostDispatcher, location: Option<(f64, f64)>) {
        let devices = Devices {
            location: location.map(|(lat, lon)| {
                Arc::new(FixedLocation::new(lat, lon)) as Arc<dyn LocationProvider>
            }),
            camera: None,
            device_info: Some(Arc::new(HostDeviceInfo::new(env!("CARGO_PKG_VERSION")))),
            session: Some(Arc::new(ControllerTokens(self.session.clone()))),
        };
        register_device_handlers(dispatcher, devices);
    }
}
