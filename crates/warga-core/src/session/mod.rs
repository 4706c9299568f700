//! Session manager.
//!
//! One task owns the session. The startup probe, the provider's identity
//! stream and every caller command are posted to its inbox as
//! `SessionEvent`s and applied in arrival order by a pure reducer:
//!
//! ```text
//! probe ─┐
//! stream ─┼─> inbox ─> update(core, event) ─> effects ─> spawned provider I/O
//! handles ┘     ^                                               │
//!               └──────────── completion events ────────────────┘
//! ```
//!
//! Observers read the published `SessionState` through a watch channel and
//! non-fatal failures through a broadcast channel.
//!
//! Structure:
//! - `state.rs`: `SessionState` and the task-owned `SessionCore`
//! - `events.rs` / `effects.rs`: reducer input and output
//! - `update.rs`: the reducer (stale-response guard lives here)
//! - `runtime.rs`: inbox loop and effect execution
//! - `task.rs`: fetch ids and initial-load bookkeeping

mod effects;
mod events;
mod runtime;
mod state;
mod task;
mod update;

use std::sync::Arc;

pub use events::ProfileChanges;
use events::{Reply, SessionEvent};
use runtime::{SessionEventSender, SessionRuntime};
pub use state::SessionState;
use state::SessionCore;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Config, DEFAULT_MAX_AVATAR_BYTES};
use crate::error::{SessionError, SessionResult};
use crate::identity::Registration;
use crate::provider::IdentityProvider;

/// Buffered errors per subscriber before the slowest one starts lagging.
const ERROR_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Largest avatar accepted by `update_profile`.
    pub max_avatar_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_avatar_bytes: DEFAULT_MAX_AVATAR_BYTES,
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_avatar_bytes: config.assets.max_avatar_bytes,
        }
    }
}

/// Handle to the session task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionManager {
    inbox_tx: SessionEventSender,
    state_rx: watch::Receiver<SessionState>,
    errors_tx: broadcast::Sender<SessionError>,
    cancel: CancellationToken,
}

impl SessionManager {
    /// Subscribes to the provider, issues the startup probe and spawns the
    /// session task. Returns immediately with `loading = true`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn init<P: IdentityProvider>(provider: Arc<P>, options: SessionOptions) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (errors_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let runtime = SessionRuntime::new(
            provider,
            SessionCore::new(options.max_avatar_bytes),
            (inbox_tx.clone(), inbox_rx),
            state_tx,
            errors_tx.clone(),
            cancel.clone(),
        );
        runtime.start();
        tokio::spawn(runtime.run());
        debug!("session manager started");

        Self {
            inbox_tx,
            state_rx,
            errors_tx,
            cancel,
        }
    }

    /// Snapshot of the current session.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Non-fatal failures: probe errors, failed background profile loads,
    /// provider sign-out failures. Errors reported before subscribing are
    /// not replayed.
    pub fn errors(&self) -> broadcast::Receiver<SessionError> {
        self.errors_tx.subscribe()
    }

    pub fn is_admin(&self) -> bool {
        self.state_rx.borrow().is_admin()
    }

    /// Waits until `loading` is false and returns that state.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        if let Ok(state) = rx.wait_for(|state| !state.loading).await {
            return state.clone();
        }
        // Session task gone: the last published state is final.
        rx.borrow().clone()
    }

    /// Authenticates with a password.
    ///
    /// Resolves once the profile fetch for the new identity has finished.
    /// A failed fetch does not fail the sign-in; it is reported on
    /// [`Self::errors`] and the profile stays absent.
    ///
    /// # Errors
    /// Returns the provider's rejection; the session is left unchanged.
    pub async fn sign_in(&self, email: &str, password: &str) -> SessionResult<()> {
        let email = email.to_string();
        let password = password.to_string();
        self.request(|reply| SessionEvent::SignInRequested {
            email,
            password,
            reply,
        })
        .await
    }

    /// Registers, creates a resident profile, then loads it.
    ///
    /// # Errors
    /// - [`SessionError::Provider`]: registration rejected, nothing created
    /// - [`SessionError::ProfileCreate`]: identity exists without a profile
    /// - [`SessionError::ProfileFetch`]: both exist but the load failed
    pub async fn sign_up(&self, registration: Registration) -> SessionResult<()> {
        self.request(|reply| SessionEvent::SignUpRequested {
            registration,
            reply,
        })
        .await
    }

    /// Signs out. The local session is cleared even when the provider call
    /// fails; that failure goes to [`Self::errors`]. Safe to call twice.
    pub async fn sign_out(&self) {
        if let Err(err) = self
            .request(|reply| SessionEvent::SignOutRequested { reply })
            .await
        {
            debug!(%err, "sign out after session closed");
        }
    }

    /// Re-fetches the profile without toggling `loading`. No-op when
    /// signed out.
    ///
    /// # Errors
    /// Returns [`SessionError::ProfileFetch`] when the fetch fails. The
    /// previous profile is kept.
    pub async fn refresh_profile(&self) -> SessionResult<()> {
        self.request(|reply| SessionEvent::RefreshRequested { reply })
            .await
    }

    /// Uploads the avatar, saves phone and email changes, then refreshes.
    ///
    /// # Errors
    /// - [`SessionError::NotSignedIn`] without an identity
    /// - [`SessionError::AssetTooLarge`] before any provider call
    /// - provider failures of the upload or updates
    pub async fn update_profile(&self, changes: ProfileChanges) -> SessionResult<()> {
        self.request(|reply| SessionEvent::ProfileUpdateRequested { changes, reply })
            .await
    }

    /// Stops the session task and the identity subscription. Idempotent.
    /// Pending and later operations fail with [`SessionError::Closed`].
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!("disposing session manager");
        }
        self.cancel.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn request(&self, event: impl FnOnce(Reply) -> SessionEvent) -> SessionResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Closed);
        }
        let (reply, rx) = oneshot::channel();
        self.inbox_tx
            .send(event(reply))
            .map_err(|_closed| SessionError::Closed)?;
        rx.await.map_err(|_dropped| SessionError::Closed)?
    }
}
