//! Session effect types.
//!
//! Effects are commands returned by the reducer that the runtime executes.
//! They represent provider I/O and replies only; the reducer never awaits.

use super::events::{ProfileChanges, Reply, Waiter};
use super::task::{FetchKind, TaskId};
use crate::error::{SessionError, SessionResult};
use crate::identity::{Identity, Registration};

#[derive(Debug)]
pub(crate) enum SessionEffect {
    /// Fetch the profile of `identity_id`; the result comes back as
    /// `ProfileFetched` carrying the same task id.
    FetchProfile {
        task: TaskId,
        kind: FetchKind,
        identity_id: String,
        waiter: Option<Waiter>,
    },

    Authenticate {
        email: String,
        password: String,
        reply: Reply,
    },

    /// Sign-up steps 1 and 2: register, then create the resident profile.
    Register {
        registration: Registration,
        reply: Reply,
    },

    Invalidate {
        reply: Reply,
    },

    /// Upload avatar, patch the row, change the email.
    ApplyProfileChanges {
        identity: Identity,
        changes: ProfileChanges,
        reply: Reply,
    },

    /// Answer a caller without further work.
    Reply {
        reply: Reply,
        result: SessionResult<()>,
    },

    /// Publish a non-fatal failure on the error channel.
    ReportError(SessionError),
}
