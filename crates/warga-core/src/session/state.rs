//! Session state.
//!
//! - `SessionState` - the published `(identity, profile, loading)` triple
//! - `SessionCore` - state owned by the session task (published state plus
//!   fetch bookkeeping)

use crate::identity::{Identity, Profile, Role};

use super::task::{FetchTracker, TaskSeq};

/// What the rest of the application may observe about the session.
///
/// `loading` is the gate: while it is true, `identity` and `profile` are not
/// final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl Default for SessionState {
    /// Startup state: nothing known, probe outstanding.
    fn default() -> Self {
        Self {
            identity: None,
            profile: None,
            loading: true,
        }
    }
}

impl SessionState {
    /// Administrator authorization, derived from the profile role only.
    pub fn is_admin(&self) -> bool {
        self.profile.as_ref().is_some_and(Profile::is_admin)
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }

    fn identity_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }

    /// True if `id` is the identity currently held.
    pub(crate) fn is_current(&self, id: &str) -> bool {
        self.identity_id() == Some(id)
    }
}

/// State owned by the session task.
#[derive(Debug)]
pub(crate) struct SessionCore {
    pub state: SessionState,
    pub task_seq: TaskSeq,
    pub loads: FetchTracker,
    /// Startup probe not yet resolved.
    pub probe_pending: bool,
    /// Sign-ups between `register` and their own delivery.
    pub signups_pending: usize,
    pub max_avatar_bytes: usize,
}

impl SessionCore {
    pub fn new(max_avatar_bytes: usize) -> Self {
        Self {
            state: SessionState::default(),
            task_seq: TaskSeq::default(),
            loads: FetchTracker::default(),
            probe_pending: true,
            signups_pending: 0,
            max_avatar_bytes,
        }
    }

    /// Recomputes `loading` from the outstanding probe and initial loads.
    pub fn settle_loading(&mut self) {
        self.state.loading = self.probe_pending || self.loads.is_running();
    }
}
