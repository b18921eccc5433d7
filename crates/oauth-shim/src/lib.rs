//! OAuth shim authenticator.
//!
//! Signs third-party provider users into a backend that only offers email
//! and password. Each provider identity maps to a deterministic
//! [`ShimCredential`]; [`ShimAuthenticator`] signs in with it and creates the
//! account on first use.
//!
//! [`ProviderFlow`] adds the authorization-code leg: an ordered
//! [`ExchangeChain`] turns the code into provider tokens, and
//! [`IdentityClient`] looks up the user behind them.

mod authenticator;
mod credential;
mod error;
mod exchange;
mod flow;
mod identity;

pub use authenticator::{ShimAuthenticator, ShimOutcome};
pub use credential::{CredentialDeriver, ShimCredential};
pub use error::{ExchangeAttempt, ShimError, ShimResult};
pub use exchange::{
    ExchangeChain, ProviderSdk, ProviderTokens, RestExchange, SdkExchange, TokenExchange,
};
pub use flow::{CodeLogin, ProviderFlow};
pub use identity::{parse_user_info, Identity, IdentityClient};
