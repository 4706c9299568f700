//! Session runtime - owns the core, drains the inbox, executes effects.
//!
//! All provider I/O happens here. Spawned work never touches the core; it
//! posts a completion event back to the inbox and the reducer decides what
//! the result means.
//!
//! Inputs to the inbox:
//! - the startup probe
//! - the provider's identity stream (forwarded by a dedicated task)
//! - commands from `SessionManager` handles
//! - completions of effects spawned below

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::effects::SessionEffect;
use super::events::{DeliverySource, ProfileChanges, Reply, SessionEvent, Waiter};
use super::state::{SessionCore, SessionState};
use super::update::update;
use crate::error::{SessionError, SessionResult};
use crate::identity::{Identity, NewProfile, ProfilePatch, Registration};
use crate::provider::IdentityProvider;

pub(crate) type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub(crate) type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

pub(crate) struct SessionRuntime<P> {
    provider: Arc<P>,
    core: SessionCore,
    inbox_tx: SessionEventSender,
    inbox_rx: SessionEventReceiver,
    state_tx: watch::Sender<SessionState>,
    errors_tx: broadcast::Sender<SessionError>,
    cancel: CancellationToken,
}

impl<P: IdentityProvider> SessionRuntime<P> {
    pub(crate) fn new(
        provider: Arc<P>,
        core: SessionCore,
        inbox: (SessionEventSender, SessionEventReceiver),
        state_tx: watch::Sender<SessionState>,
        errors_tx: broadcast::Sender<SessionError>,
        cancel: CancellationToken,
    ) -> Self {
        let (inbox_tx, inbox_rx) = inbox;
        Self {
            provider,
            core,
            inbox_tx,
            inbox_rx,
            state_tx,
            errors_tx,
            cancel,
        }
    }

    /// Subscribes to the identity stream and issues the startup probe.
    ///
    /// Runs synchronously so that no provider emission after `init` returns
    /// can be missed. Must be called inside a Tokio runtime.
    pub(crate) fn start(&self) {
        let mut stream = self.provider.subscribe();
        let tx = self.inbox_tx.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            loop {
                let identity = tokio::select! {
                    () = cancel.cancelled() => break,
                    identity = stream.recv() => match identity {
                        Some(identity) => identity,
                        None => break,
                    },
                };
                let event = SessionEvent::IdentityChanged {
                    source: DeliverySource::Stream,
                    identity,
                    waiter: None,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            trace!("identity stream forwarder stopped");
        });

        let provider = Arc::clone(&self.provider);
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let event = match provider.probe_session().await {
                Ok(identity) => SessionEvent::IdentityChanged {
                    source: DeliverySource::Probe,
                    identity,
                    waiter: None,
                },
                Err(error) => SessionEvent::ProbeFailed(error),
            };
            let _ = tx.send(event);
        });
    }

    /// Runs until the cancellation token fires.
    pub(crate) async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                event = self.inbox_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let effects = update(&mut self.core, event);
            self.publish_state();
            for effect in effects {
                self.execute_effect(effect);
            }
        }

        // Callers still waiting get `Closed` when their reply sender drops.
        self.inbox_rx.close();
        debug!("session runtime stopped");
    }

    fn publish_state(&self) {
        let current = &self.core.state;
        self.state_tx.send_if_modified(|published| {
            if published == current {
                return false;
            }
            published.clone_from(current);
            true
        });
    }

    fn execute_effect(&self, effect: SessionEffect) {
        match effect {
            SessionEffect::FetchProfile {
                task,
                kind,
                identity_id,
                waiter,
            } => {
                trace!(task = task.0, ?kind, identity = %identity_id, "fetching profile");
                self.spawn(move |provider| async move {
                    let result = provider.get_profile(&identity_id).await;
                    SessionEvent::ProfileFetched {
                        task,
                        kind,
                        identity_id,
                        result,
                        waiter,
                    }
                });
            }
            SessionEffect::Authenticate {
                email,
                password,
                reply,
            } => {
                self.spawn(move |provider| async move {
                    match provider.authenticate(&email, &password).await {
                        Ok(identity) => SessionEvent::IdentityChanged {
                            source: DeliverySource::SignIn,
                            identity: Some(identity),
                            waiter: Some(Waiter::SignIn(reply)),
                        },
                        Err(error) => SessionEvent::SignInFailed { error, reply },
                    }
                });
            }
            SessionEffect::Register {
                registration,
                reply,
            } => {
                self.spawn(move |provider| async move {
                    match register(provider.as_ref(), &registration).await {
                        Ok(identity) => SessionEvent::IdentityChanged {
                            source: DeliverySource::SignUp,
                            identity: Some(identity),
                            waiter: Some(Waiter::SignUp(reply)),
                        },
                        Err(error) => SessionEvent::SignUpFailed { error, reply },
                    }
                });
            }
            SessionEffect::Invalidate { reply } => {
                self.spawn(move |provider| async move {
                    let result = provider.invalidate().await;
                    SessionEvent::SignOutCompleted { result, reply }
                });
            }
            SessionEffect::ApplyProfileChanges {
                identity,
                changes,
                reply,
            } => {
                self.spawn(move |provider| async move {
                    let result = apply_profile_changes(provider.as_ref(), &identity, changes).await;
                    SessionEvent::ProfileUpdateCompleted {
                        identity_id: identity.id,
                        result,
                        reply,
                    }
                });
            }
            SessionEffect::Reply { reply, result } => send_reply(reply, result),
            SessionEffect::ReportError(error) => {
                // No receivers is fine: nobody is listening for errors.
                let _ = self.errors_tx.send(error);
            }
        }
    }

    /// Spawns provider work whose completion is posted back to the inbox.
    fn spawn<F, Fut>(&self, work: F)
    where
        F: FnOnce(Arc<P>) -> Fut,
        Fut: Future<Output = SessionEvent> + Send + 'static,
    {
        let tx = self.inbox_tx.clone();
        let fut = work(Arc::clone(&self.provider));
        tokio::spawn(async move {
            let event = fut.await;
            let _ = tx.send(event);
        });
    }
}

fn send_reply(reply: Reply, result: SessionResult<()>) {
    // Caller gave up waiting.
    let _ = reply.send(result);
}

/// Sign-up steps 1 and 2. The profile fetch (step 3) is the reducer's job.
async fn register<P: IdentityProvider>(
    provider: &P,
    registration: &Registration,
) -> SessionResult<Identity> {
    let identity = provider
        .register(&registration.email, &registration.password)
        .await?;

    let profile = NewProfile::resident(&identity, registration);
    provider
        .create_profile(profile)
        .await
        .map_err(SessionError::ProfileCreate)?;

    debug!(identity = %identity.id, "registered resident");
    Ok(identity)
}

async fn apply_profile_changes<P: IdentityProvider>(
    provider: &P,
    identity: &Identity,
    changes: ProfileChanges,
) -> SessionResult<Option<Identity>> {
    let mut patch = ProfilePatch {
        phone: changes.phone,
        avatar_url: None,
    };

    if let Some(avatar) = changes.avatar {
        let now_millis = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        let path = avatar.storage_path(&identity.id, now_millis);
        let content_type = avatar.content_type();
        let url = provider
            .upload_asset(&path, avatar.bytes, content_type)
            .await?;
        debug!(%path, "avatar uploaded");
        patch.avatar_url = Some(url);
    }

    if !patch.is_empty() {
        provider.update_profile(&identity.id, patch).await?;
    }

    let mut updated = None;
    if let Some(email) = changes.email {
        updated = Some(provider.update_email(&email).await?);
    }

    Ok(updated)
}
