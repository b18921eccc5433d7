//! Session state machine using rust-fsm.
//!
//! ```text
//!   Uninitialized ── InitStarted ──► Initializing ── InitFailed ──► Error
//!         │                              │                            │
//!         │ SessionEstablished           │ SessionEstablished         │ InitStarted
//!         │ SessionCleared               │ SessionCleared             ▼
//!         ▼                              ▼                       Initializing
//!   Authenticated ◄── SessionEstablished ── Unauthenticated
//!         │  ▲ SessionRefreshed                  ▲
//!         └──┴──────── SessionCleared ───────────┘
//! ```
//!
//! `Error` is only reachable from `Initializing` and is left by initializing
//! again or by any session event.

use rust_fsm::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Uninitialized)

    Uninitialized => {
        InitStarted => Initializing,
        // Stream events can settle the state before initialize() runs
        SessionEstablished => Authenticated,
        SessionCleared => Unauthenticated
    },
    Initializing => {
        SessionEstablished => Authenticated,
        SessionCleared => Unauthenticated,
        InitFailed => Error
    },
    Authenticated => {
        SessionEstablished => Authenticated,
        SessionRefreshed => Authenticated,
        SessionCleared => Unauthenticated
    },
    Unauthenticated => {
        SessionEstablished => Authenticated,
        SessionCleared => Unauthenticated
    },
    Error => {
        InitStarted => Initializing,
        SessionEstablished => Authenticated,
        SessionCleared => Unauthenticated
    }
}

pub use self::session_machine::Input as SessionMachineInput;
pub use self::session_machine::State as SessionMachineState;
pub use self::session_machine::StateMachine as SessionMachine;

/// Public view of the machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Authenticated,
    Unauthenticated,
    Error,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated)
    }

    /// Whether initialization has reached a verdict.
    pub fn is_settled(&self) -> bool {
        !matches!(self, SessionState::Uninitialized | SessionState::Initializing)
    }
}

impl From<&SessionMachineState> for SessionState {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Uninitialized => SessionState::Uninitialized,
            SessionMachineState::Initializing => SessionState::Initializing,
            SessionMachineState::Authenticated => SessionState::Authenticated,
            SessionMachineState::Unauthenticated => SessionState::Unauthenticated,
            SessionMachineState::Error => SessionState::Error,
        }
    }
}

/// Retry behavior for token refresh and profile fetches.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum number of attempts.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RefreshConfig {
    /// Delay before retrying after attempt `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}
