//! `open-link`: route one deep link against the current session.

use crate::app::HostState;
use deep_link_router::{DeepLinkRouter, LinkClassifier, Navigator, RecordingNavigator, Route};
use std::sync::Arc;

pub async fn open_link(state: &HostState, uri: &str) -> Result<(), Box<dyn std::error::Error>> {
    let _ = state.session.initialize().await;
    state.session.start();

    let navigator = Arc::new(RecordingNavigator::new());
    navigator.reset(if state.session.is_authenticated() {
        Route::AuthenticatedRoot
    } else {
        Route::UnauthenticatedRoot
    });

    let router = DeepLinkRouter::new(
        LinkClassifier::from_config(&state.config),
        state.session.clone(),
        navigator.clone(),
    );
    let route = router.route(uri).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "route": route,
            "history": navigator.history(),
            "authenticated": state.session.is_authenticated(),
        }))?
    );
    Ok(())
}
