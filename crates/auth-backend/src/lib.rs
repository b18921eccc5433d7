//! Backend auth service client.
//!
//! [`AuthBackend`] is the contract the rest of the workspace codes against.
//! Two implementations ship here:
//!
//! - [`SupabaseAuthClient`]: GoTrue (`/auth/v1`) and PostgREST (`/rest/v1`)
//!   over `reqwest`
//! - [`InMemoryBackend`]: in-process accounts and tokens for offline runs and
//!   tests

mod backend;
mod error;
mod memory;
mod subscription;
mod supabase;
mod types;

pub use backend::AuthBackend;
pub use error::{BackendError, BackendResult};
pub use memory::InMemoryBackend;
pub use subscription::{AuthEventBus, AuthSubscription};
pub use supabase::{decode_jwt_claims, JwtClaims, SupabaseAuthClient};
pub use types::{AuthEvent, RowFilter, Session, SignUpMetadata, User, PASSWORD_PROVIDER};
