use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Login status of the app, derived from the stored secrets and the
/// outcome of token refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum SessionState {
    /// No access token stored
    Unauthenticated,
    /// Requests carry the stored access token
    Authenticated,
    /// A token refresh is in flight
    Refreshing,
    /// Refresh failed or the user logged out; all secrets were cleared
    LoggedOut,
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionState::Authenticated | SessionState::Refreshing)
    }
}

/// Tokens issued by login or by the refresh endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TokenPair {
    pub access_token: String,
    /// Present only when the server rotates the refresh token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Observable session state shared by every clone of the client.
pub struct SessionTracker {
    tx: watch::Sender<SessionState>,
}

impl SessionTracker {
    pub fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `next`, notifying subscribers only on an actual change
    pub fn transition(&self, next: SessionState) {
        self.tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            info!(from = ?state, to = ?next, "Session state changed");
            *state = next;
            true
        });
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new(SessionState::Unauthenticated)
    }
}
