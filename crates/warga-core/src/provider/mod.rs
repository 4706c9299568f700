//! Identity/storage provider contract.
//!
//! The session manager only talks to the hosted backend through
//! [`IdentityProvider`]. Two implementations ship with the crate:
//! - [`RestProvider`]: the hosted backend over HTTP
//! - [`MemoryProvider`]: in-process accounts, used offline and in tests

mod memory;
mod rest;
mod session_cache;

use std::future::Future;
use std::sync::{Mutex, PoisonError};

pub use memory::MemoryProvider;
pub use rest::RestProvider;
pub use session_cache::{CachedSession, SessionCache};
use tokio::sync::mpsc;

use crate::error::ProviderResult;
use crate::identity::{Identity, NewProfile, Profile, ProfilePatch};

/// Live identity change notifications.
///
/// The first item is the identity current at subscription time; later items
/// follow every sign-in, sign-out and token refresh, in provider order.
pub type IdentityStream = mpsc::UnboundedReceiver<Option<Identity>>;

/// Capabilities consumed from the hosted identity, row and object store.
///
/// Futures must be `Send` because the session runtime spawns them.
pub trait IdentityProvider: Send + Sync + 'static {
    /// One-shot check for an already valid session.
    fn probe_session(&self) -> impl Future<Output = ProviderResult<Option<Identity>>> + Send;

    /// Subscribes to identity changes. Delivers the current identity first.
    fn subscribe(&self) -> IdentityStream;

    fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = ProviderResult<Identity>> + Send;

    fn register(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = ProviderResult<Identity>> + Send;

    /// Best-effort server-side sign-out.
    fn invalidate(&self) -> impl Future<Output = ProviderResult<()>> + Send;

    fn get_profile(&self, id: &str) -> impl Future<Output = ProviderResult<Profile>> + Send;

    fn create_profile(&self, profile: NewProfile)
    -> impl Future<Output = ProviderResult<()>> + Send;

    fn update_profile(
        &self,
        id: &str,
        patch: ProfilePatch,
    ) -> impl Future<Output = ProviderResult<()>> + Send;

    /// Changes the contact address of the signed-in identity and returns
    /// the identity as the provider now reports it. Subscribers see the
    /// same identity on the change stream.
    fn update_email(&self, email: &str) -> impl Future<Output = ProviderResult<Identity>> + Send;

    /// Stores `bytes` at `path` and returns its public URL.
    fn upload_asset(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> impl Future<Output = ProviderResult<String>> + Send;
}

/// Fan-out of identity changes to every subscriber.
///
/// Publishing happens under the lock so all subscribers observe the same
/// order.
#[derive(Debug, Default)]
pub(crate) struct IdentityFeed {
    inner: Mutex<FeedInner>,
}

#[derive(Debug, Default)]
struct FeedInner {
    current: Option<Identity>,
    subscribers: Vec<mpsc::UnboundedSender<Option<Identity>>>,
}

impl IdentityFeed {
    pub(crate) fn with_current(current: Option<Identity>) -> Self {
        Self {
            inner: Mutex::new(FeedInner {
                current,
                subscribers: Vec::new(),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> IdentityStream {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let (tx, rx) = mpsc::unbounded_channel();
        // Receiver is alive, send cannot fail.
        let _ = tx.send(inner.current.clone());
        inner.subscribers.push(tx);
        rx
    }

    /// Records the new identity and notifies subscribers, dropping closed ones.
    pub(crate) fn publish(&self, identity: Option<Identity>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.current.clone_from(&identity);
        inner
            .subscribers
            .retain(|tx| tx.send(identity.clone()).is_ok());
    }

    pub(crate) fn current(&self) -> Option<Identity> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }
}
