//! Session inbox events.
//!
//! Everything that can change the session arrives here: provider deliveries,
//! user commands and completions of work the runtime spawned.

use tokio::sync::oneshot;

use super::task::{FetchKind, TaskId};
use crate::assets::AvatarUpload;
use crate::error::{ProviderError, ProviderResult, SessionError, SessionResult};
use crate::identity::{Identity, Profile, Registration};

/// Reply channel of a caller awaiting a session operation.
pub(crate) type Reply = oneshot::Sender<SessionResult<()>>;

/// Where an identity delivery came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliverySource {
    Probe,
    Stream,
    SignIn,
    SignUp,
}

/// Caller waiting for a profile fetch to resolve.
#[derive(Debug)]
pub(crate) enum Waiter {
    /// Sign-in succeeds once the fetch resolves, whatever its outcome.
    SignIn(Reply),
    /// Sign-up step 3: a failed fetch fails the sign-up.
    SignUp(Reply),
    /// Refresh and profile update: a failed fetch is returned to the caller.
    Refresh(Reply),
}

/// Fields the user changed on the profile page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<AvatarUpload>,
}

#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// "Identity is now X / absent."
    IdentityChanged {
        source: DeliverySource,
        identity: Option<Identity>,
        waiter: Option<Waiter>,
    },
    ProbeFailed(ProviderError),

    SignInRequested {
        email: String,
        password: String,
        reply: Reply,
    },
    SignInFailed {
        error: ProviderError,
        reply: Reply,
    },
    SignUpRequested {
        registration: Registration,
        reply: Reply,
    },
    SignUpFailed {
        error: SessionError,
        reply: Reply,
    },
    SignOutRequested {
        reply: Reply,
    },
    SignOutCompleted {
        result: ProviderResult<()>,
        reply: Reply,
    },
    RefreshRequested {
        reply: Reply,
    },
    ProfileUpdateRequested {
        changes: ProfileChanges,
        reply: Reply,
    },
    /// `Ok(Some(_))` carries the identity after an email change.
    ProfileUpdateCompleted {
        identity_id: String,
        result: SessionResult<Option<Identity>>,
        reply: Reply,
    },

    ProfileFetched {
        task: TaskId,
        kind: FetchKind,
        identity_id: String,
        result: ProviderResult<Profile>,
        waiter: Option<Waiter>,
    },
}
