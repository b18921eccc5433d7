//! Bridge commands: serve the host over stdio, or run one loopback call.

use crate::app::HostState;
use native_bridge::{serve_lines, spawn_script_writer, BridgeConfig, ChannelInjector, HostDispatcher, Loopback};
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Serve content requests read from stdin, writing reply scripts to stdout.
pub async fn serve(state: &HostState, location: Option<(f64, f64)>) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = state.session.initialize().await {
        warn!(error = %e, "Session restore failed, serving unauthenticated");
    }
    state.session.start();

    let (injector, scripts) = ChannelInjector::new();
    let mut dispatcher = HostDispatcher::new(Arc::new(injector));
    state.register_bridge(&mut dispatcher, location);
    let dispatcher = Arc::new(dispatcher);
    state.token_sink.attach(dispatcher.clone());

    let writer = spawn_script_writer(scripts, tokio::io::stdout());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping bridge");
            let _ = shutdown_tx.send(());
        }
    });

    let handled = serve_lines(BufReader::new(tokio::io::stdin()), dispatcher.clone(), shutdown_rx).await?;
    info!(handled, "Bridge transport stopped");

    state.session.shutdown();
    drop(dispatcher);
    // The writer ends once every injector clone is gone.
    state.token_sink.detach();
    writer.await??;
    Ok(())
}

/// Send one request through an in-process client/host pair and print the reply.
pub async fn call(
    state: &HostState,
    feature_type: &str,
    action: &str,
    payload: Option<&str>,
    location: Option<(f64, f64)>,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = payload
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()?;

    let _ = state.session.initialize().await;
    let loopback = Loopback::spawn(BridgeConfig::with_timeout(state.config.bridge_timeout()), |dispatcher| {
        state.register_bridge(dispatcher, location)
    });

    let result = loopback.client.request(feature_type, action, payload).await;
    loopback.shutdown();

    let data = result?;
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}
