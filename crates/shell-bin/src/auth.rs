//! Session commands: status, login, logout and provider login.

use crate::app::HostState;
use session_machine::{Credentials, SessionSnapshot, SessionState};
use std::time::Duration;
use tracing::info;

/// How long to wait for the backend event that follows a sign-in.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

fn snapshot_json(snapshot: &SessionSnapshot) -> serde_json::Value {
    let session = snapshot.session.as_ref();
    serde_json::json!({
        "state": snapshot.state,
        "authenticated": snapshot.state.is_authenticated(),
        "initialized": snapshot.initialized,
        "user_id": session.map(|s| s.user_id.clone()),
        "provider": session.map(|s| s.provider.clone()),
        "expires_at": session.map(|s| s.expires_at),
        "display_name": snapshot.profile.as_ref().and_then(|p| p.display_name.clone()),
        "error": snapshot.error,
        "profile_error": snapshot.profile_error,
    })
}

fn print_json(value: &serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn wait_for_settled(state: &HostState) -> Result<SessionSnapshot, Box<dyn std::error::Error>> {
    state
        .session
        .wait_until(|s| s.state.is_authenticated() && !s.loading, SETTLE_TIMEOUT)
        .await
        .ok_or_else(|| "Timed out waiting for the session to settle".into())
}

/// Print the current session state.
pub async fn status(state: &HostState) -> Result<(), Box<dyn std::error::Error>> {
    // A restore failure is reported through the snapshot.
    let _ = state.session.initialize().await;
    print_json(&snapshot_json(&state.session.snapshot()))
}

/// Sign in with email and password.
pub async fn login(
    state: &HostState,
    email: &str,
    password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(memory) = &state.offline {
        memory.register_user(email, password);
    }

    let _ = state.session.initialize().await;
    state.session.start();
    state
        .session
        .sign_in_with_password(&Credentials::new(email, password))
        .await?;

    let snapshot = wait_for_settled(state).await?;
    info!(state = ?snapshot.state, "Signed in");
    print_json(&snapshot_json(&snapshot))
}

/// Clear the session locally and remotely.
pub async fn logout(state: &HostState) -> Result<(), Box<dyn std::error::Error>> {
    let _ = state.session.initialize().await;
    if state.session.state() == SessionState::Unauthenticated && state.session.current_session().is_none() {
        println!("Not signed in.");
        return Ok(());
    }

    state.session.sign_out_local().await?;
    println!("Signed out.");
    Ok(())
}

/// Print the provider authorization URL, or finish a provider login with `code`.
pub async fn shim_login(state: &HostState, code: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let flow = state
        .provider_flow
        .as_ref()
        .ok_or("Provider login is disabled: set APP_SHELL_SHIM_SECRET")?;

    let Some(code) = code else {
        println!("{}", flow.authorize_url(&uuid::Uuid::new_v4().to_string())?);
        return Ok(());
    };

    let _ = state.session.initialize().await;
    state.session.start();
    let login = state.session.sign_in_with_provider_code(flow, code).await?;
    info!(provider = flow.provider(), strategy = login.strategy, "Provider login completed");
    if login.outcome.session().is_none() {
        println!("Account created. Confirm the email sent by the backend, then sign in again.");
        return Ok(());
    }

    let snapshot = wait_for_settled(state).await?;
    print_json(&serde_json::json!({
        "new_account": login.outcome.is_new_account(),
        "session": snapshot_json(&snapshot),
    }))
}
