//! Hybrid auth session state machine.
//!
//! [`SessionController`] owns the one current session. It restores the
//! persisted session at startup, follows backend auth events, persists every
//! change through [`shell_storage::SessionVault`] and publishes
//! [`SessionSnapshot`]s to observers.
//!
//! Profile enrichment runs beside the auth state and never changes it.

mod controller;
mod error;
mod fsm;
mod profile;

pub use controller::{
    Credentials, SessionController, SessionControllerBuilder, SessionSnapshot, SessionTokens,
    TokenSink,
};
pub use error::{SessionError, SessionResult};
pub use fsm::{
    RefreshConfig, SessionMachine, SessionMachineInput, SessionMachineState, SessionState,
};
pub use profile::{BackendProfileSource, Profile, ProfileSource};
