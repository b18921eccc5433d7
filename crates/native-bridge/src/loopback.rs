//! In-process pairing of a [`BridgeClient`] with a [`HostDispatcher`].

use crate::protocol::parse_dispatch_script;
use crate::{BridgeClient, BridgeConfig, ChannelEmitter, ChannelInjector, HostDispatcher};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

/// A client and a host connected through channels.
///
/// Requests travel as JSON strings and responses as injected scripts, the
/// same representations a real embedded surface would see.
pub struct Loopback {
    pub client: Arc<BridgeClient>,
    pub dispatcher: Arc<HostDispatcher>,
    tasks: Vec<JoinHandle<()>>,
}

impl Loopback {
    /// Build the pair. `register` installs host handlers before the
    /// dispatcher is shared.
    pub fn spawn(config: BridgeConfig, register: impl FnOnce(&mut HostDispatcher)) -> Self {
        let (emitter, mut requests) = ChannelEmitter::new();
        let (injector, mut scripts) = ChannelInjector::new();

        let client = Arc::new(BridgeClient::new(emitter, config));
        let mut dispatcher = HostDispatcher::new(Arc::new(injector));
        register(&mut dispatcher);
        let dispatcher = Arc::new(dispatcher);

        let host = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                while let Some(raw) = requests.recv().await {
                    let dispatcher = dispatcher.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.handle_message(&raw).await {
                            warn!(error = %e, "Loopback host failed to answer");
                        }
                    });
                }
            })
        };

        let content = {
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(script) = scripts.recv().await {
                    match parse_dispatch_script(&script) {
                        Ok(event) => {
                            client.handle_event(event);
                        }
                        Err(e) => warn!(error = %e, "Loopback content dropped a script"),
                    }
                }
            })
        };

        Self {
            client,
            dispatcher,
            tasks: vec![host, content],
        }
    }

    /// Reject pending requests and stop both pumps.
    pub fn shutdown(self) {
        self.client.shutdown();
        for task in self.tasks {
            task.abort();
        }
    }
}
