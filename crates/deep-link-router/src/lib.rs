//! Deep link routing for the app shell.
//!
//! [`LinkClassifier`] turns an incoming URI into a [`DeepLinkIntent`];
//! [`DeepLinkRouter`] acts on it, installing or clearing the session through
//! [`session_machine::SessionController`] and moving a [`Navigator`].
//!
//! Recognized shapes, highest priority first:
//!
//! | URI | Effect |
//! |-----|--------|
//! | `<scheme>://login-callback?access_token=..` | install session, reset to authenticated root |
//! | `https://<host>/auth/callback?access_token=..` | same |
//! | `<scheme>://reset-password-callback?token=..` | push password reset |
//! | `https://<host>/auth/logout` | clear session, reset to unauthenticated root |
//! | `https://<host>/auth/..` | push auth screen |
//! | `https://<host>/<resource>/<id>` | push content detail |
//! | anything else on a served host | push content |

mod error;
mod intent;
mod navigator;
mod router;

pub use error::{DeepLinkError, DeepLinkResult};
pub use intent::{
    DeepLinkIntent, IntentKind, LinkClassifier, LOGIN_CALLBACK, RESET_PASSWORD_CALLBACK,
    WEB_AUTH_CALLBACK_PATH,
};
pub use navigator::{Navigator, RecordingNavigator, Route};
pub use router::DeepLinkRouter;
