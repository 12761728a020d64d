use tokio::sync::watch;

use crate::types::AuthState;

/// Source of the caller's current authentication status.
///
/// The reconciler polls the provider once at the start of every pass and keeps the observed
/// state for the whole pass.
pub trait AuthProvider {
    fn auth_state(&self) -> AuthState;
}

/// A fixed state, useful when the authentication status never changes.
impl AuthProvider for AuthState {
    fn auth_state(&self) -> AuthState {
        *self
    }
}

/// Transmitter side of the authentication status channel.
///
/// [`AuthStateTx`] is held by whatever owns the login flow. Changes become visible to
/// [`WatchAuthProvider`]s at the start of their next reconciliation pass.
#[derive(Debug, Clone)]
pub struct AuthStateTx(watch::Sender<AuthState>);

impl AuthStateTx {
    pub fn new(tx: watch::Sender<AuthState>) -> Self {
        Self(tx)
    }

    pub fn log_in(&self) {
        self.set(AuthState::Authenticated);
    }

    pub fn log_out(&self) {
        self.set(AuthState::Unauthenticated);
    }

    pub fn set(&self, state: AuthState) {
        // Infallible send so the state can change before any provider subscribes.
        self.0.send_replace(state);
    }

    /// Creates a new provider observing this channel.
    pub fn subscribe(&self) -> WatchAuthProvider {
        WatchAuthProvider(self.0.subscribe())
    }
}

/// [`AuthProvider`] reading the latest state published on an [`AuthStateTx`].
#[derive(Debug, Clone)]
pub struct WatchAuthProvider(watch::Receiver<AuthState>);

impl AuthProvider for WatchAuthProvider {
    fn auth_state(&self) -> AuthState {
        *self.0.borrow()
    }
}

/// Creates a new authentication status channel starting at `initial`.
pub fn create_auth_channel(initial: AuthState) -> (AuthStateTx, WatchAuthProvider) {
    let (tx, rx) = watch::channel(initial);
    (AuthStateTx::new(tx), WatchAuthProvider(rx))
}
