//! Coordination Session Lifecycle
//!
//! An explicit handle on session liveness. The application owns the
//! session and injects the client into the cluster primitives; components
//! issue requests against the shared session but never close it.

use std::sync::Arc;

use crate::coordination::{CoordinationClient, SessionState};
use crate::error::{Error, Result};

/// Application-facing view of one coordination session
pub struct Session {
    client: Arc<dyn CoordinationClient>,
    states: tokio::sync::watch::Receiver<SessionState>,
}

impl Session {
    /// Wrap a client in a session handle
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        let states = client.session_events();
        Self { client, states }
    }

    /// The underlying client, for constructing components against
    pub fn client(&self) -> Arc<dyn CoordinationClient> {
        Arc::clone(&self.client)
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.states.borrow()
    }

    /// Whether the session is currently connected
    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Wait until the session is connected
    ///
    /// Fails with `CoordinationUnavailable` when the session reaches a
    /// terminal state without ever connecting.
    pub async fn wait_until_connected(&self) -> Result<()> {
        let mut states = self.states.clone();
        let state = states
            .wait_for(|state| *state == SessionState::Connected || state.is_terminal())
            .await
            .map(|state| *state)
            .unwrap_or(SessionState::Closed);

        if state.is_terminal() {
            return Err(Error::CoordinationUnavailable(format!(
                "session reached {} before connecting",
                state
            )));
        }
        Ok(())
    }

    /// Wait until the session is permanently gone
    ///
    /// Completes exactly once, when the session reaches `Expired` or
    /// `Closed` (a dropped backend counts as closed). Cancellation-safe:
    /// dropping the future abandons the wait without consuming anything.
    pub async fn wait_until_disconnected(&self) -> SessionState {
        let mut states = self.states.clone();
        states
            .wait_for(|state| state.is_terminal())
            .await
            .map(|state| *state)
            .unwrap_or(SessionState::Closed)
    }
}
