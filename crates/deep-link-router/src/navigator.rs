//! Navigation targets and the navigator seam.

use parking_lot::Mutex;
use serde::Serialize;

/// A screen the router can send the user to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    AuthenticatedRoot,
    UnauthenticatedRoot,
    PasswordReset { token: String },
    AuthScreen { path: String },
    ContentDetail { resource: String, id: String },
    Content { path: String },
}

/// Drives the app's navigation stack.
pub trait Navigator: Send + Sync {
    /// Push `route` on top of the history.
    fn push(&self, route: Route);

    /// Replace the whole history with `route`.
    fn reset(&self, route: Route);
}

/// Navigator that keeps the history in memory.
#[derive(Debug, Default)]
pub struct RecordingNavigator {
    history: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Route> {
        self.history.lock().clone()
    }

    pub fn current(&self) -> Option<Route> {
        self.history.lock().last().cloned()
    }

    /// Index of the current route, `None` before the first navigation.
    pub fn index(&self) -> Option<usize> {
        self.history.lock().len().checked_sub(1)
    }
}

impl Navigator for RecordingNavigator {
    fn push(&self, route: Route) {
        self.history.lock().push(route);
    }

    fn reset(&self, route: Route) {
        let mut history = self.history.lock();
        history.clear();
        history.push(route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_drops_history() {
        let navigator = RecordingNavigator::new();
        assert_eq!(navigator.index(), None);

        navigator.push(Route::UnauthenticatedRoot);
        navigator.push(Route::AuthScreen {
            path: "/auth/login".to_string(),
        });
        assert_eq!(navigator.index(), Some(1));

        navigator.reset(Route::AuthenticatedRoot);
        assert_eq!(navigator.index(), Some(0));
        assert_eq!(navigator.history(), vec![Route::AuthenticatedRoot]);
    }
}
