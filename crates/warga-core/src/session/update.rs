//! Session reducer.
//!
//! `update` mutates `SessionCore` and returns effects. It never awaits and
//! never touches the provider, so every interleaving of deliveries and
//! completions can be replayed in tests.

use tracing::{debug, info, warn};

use super::effects::SessionEffect;
use super::events::{DeliverySource, ProfileChanges, Reply, SessionEvent, Waiter};
use super::state::SessionCore;
use super::task::{FetchKind, TaskId};
use crate::error::{ProviderError, SessionError, SessionResult};
use crate::identity::{Identity, Profile};

pub(crate) fn update(core: &mut SessionCore, event: SessionEvent) -> Vec<SessionEffect> {
    match event {
        SessionEvent::IdentityChanged {
            source,
            identity,
            waiter,
        } => deliver(core, source, identity, waiter),
        SessionEvent::ProbeFailed(error) => {
            warn!(%error, "session probe failed");
            core.probe_pending = false;
            core.settle_loading();
            vec![SessionEffect::ReportError(error.into())]
        }

        SessionEvent::SignInRequested {
            email,
            password,
            reply,
        } => vec![SessionEffect::Authenticate {
            email,
            password,
            reply,
        }],
        SessionEvent::SignInFailed { error, reply } => {
            info!(%error, "sign in rejected");
            vec![respond(reply, Err(error.into()))]
        }

        SessionEvent::SignUpRequested {
            registration,
            reply,
        } => {
            core.signups_pending += 1;
            vec![SessionEffect::Register {
                registration,
                reply,
            }]
        }
        SessionEvent::SignUpFailed { error, reply } => {
            warn!(%error, "sign up failed");
            core.signups_pending = core.signups_pending.saturating_sub(1);
            vec![respond(reply, Err(error))]
        }

        SessionEvent::SignOutRequested { reply } => vec![SessionEffect::Invalidate { reply }],
        SessionEvent::SignOutCompleted { result, reply } => sign_out_completed(core, result, reply),

        SessionEvent::RefreshRequested { reply } => refresh(core, Waiter::Refresh(reply)),

        SessionEvent::ProfileUpdateRequested { changes, reply } => {
            profile_update_requested(core, changes, reply)
        }
        SessionEvent::ProfileUpdateCompleted {
            identity_id,
            result,
            reply,
        } => match result {
            Err(error) => {
                warn!(%error, "profile update failed");
                vec![respond(reply, Err(error))]
            }
            Ok(updated) if core.state.is_current(&identity_id) => {
                // The change stream echoes the same identity, possibly
                // after this completion.
                if let Some(identity) = updated.filter(|i| i.id == identity_id) {
                    debug!(identity = %identity.id, "identity email updated");
                    core.state.identity = Some(identity);
                }
                refresh(core, Waiter::Refresh(reply))
            }
            Ok(_) => vec![respond(reply, Ok(()))],
        },

        SessionEvent::ProfileFetched {
            task,
            kind,
            identity_id,
            result,
            waiter,
        } => profile_fetched(core, task, kind, &identity_id, result, waiter),
    }
}

fn respond(reply: Reply, result: SessionResult<()>) -> SessionEffect {
    SessionEffect::Reply { reply, result }
}

/// Applies "identity is now X / absent".
fn deliver(
    core: &mut SessionCore,
    source: DeliverySource,
    identity: Option<Identity>,
    waiter: Option<Waiter>,
) -> Vec<SessionEffect> {
    match source {
        DeliverySource::Probe => core.probe_pending = false,
        DeliverySource::SignUp => core.signups_pending = core.signups_pending.saturating_sub(1),
        DeliverySource::Stream | DeliverySource::SignIn => {}
    }

    let Some(identity) = identity else {
        debug!(?source, "identity cleared");
        core.state.identity = None;
        core.state.profile = None;
        core.loads.clear();
        core.settle_loading();
        return waiter
            .map(|w| respond(w.into_reply(), Ok(())))
            .into_iter()
            .collect();
    };

    debug!(?source, identity = %identity.id, "identity delivered");

    // A different principal: the held profile and its pending loads belong
    // to someone else now.
    if !core.state.is_current(&identity.id) {
        core.state.profile = None;
        core.loads.clear();
    }

    let identity_id = identity.id.clone();
    core.state.identity = Some(identity);

    let task = core.task_seq.next_id();
    core.loads.on_started(task);
    core.state.loading = true;

    vec![SessionEffect::FetchProfile {
        task,
        kind: FetchKind::InitialLoad,
        identity_id,
        waiter,
    }]
}

fn refresh(core: &mut SessionCore, waiter: Waiter) -> Vec<SessionEffect> {
    let Some(identity) = core.state.identity.as_ref() else {
        return vec![respond(waiter.into_reply(), Ok(()))];
    };

    let identity_id = identity.id.clone();
    let task = core.task_seq.next_id();
    vec![SessionEffect::FetchProfile {
        task,
        kind: FetchKind::Background,
        identity_id,
        waiter: Some(waiter),
    }]
}

fn profile_fetched(
    core: &mut SessionCore,
    task: TaskId,
    kind: FetchKind,
    identity_id: &str,
    result: Result<Profile, ProviderError>,
    waiter: Option<Waiter>,
) -> Vec<SessionEffect> {
    let tracked = core.loads.finish_if_active(task);
    let mut effects = Vec::new();

    if core.state.is_current(identity_id) {
        match result {
            Ok(profile) => {
                debug!(task = task.0, identity = identity_id, role = profile.role.display_name(), "profile loaded");
                core.state.profile = Some(profile);
                if let Some(waiter) = waiter {
                    effects.push(respond(waiter.into_reply(), Ok(())));
                }
            }
            Err(error) => {
                warn!(task = task.0, identity = identity_id, %error, "profile fetch failed");
                let error = SessionError::ProfileFetch(error);
                match waiter {
                    Some(Waiter::SignUp(reply) | Waiter::Refresh(reply)) => {
                        effects.push(respond(reply, Err(error)));
                    }
                    Some(Waiter::SignIn(reply)) => {
                        effects.push(SessionEffect::ReportError(error));
                        effects.push(respond(reply, Ok(())));
                    }
                    // The registering identity is announced before its
                    // profile row exists; the sign-up's own fetch reports
                    // the outcome.
                    None if core.signups_pending > 0 => {
                        debug!(identity = identity_id, "profile not created yet");
                    }
                    None => effects.push(SessionEffect::ReportError(error)),
                }
            }
        }
    } else {
        debug!(task = task.0, identity = identity_id, "discarding stale profile response");
        if let Some(waiter) = waiter {
            effects.push(respond(waiter.into_reply(), Ok(())));
        }
    }

    if tracked && kind == FetchKind::InitialLoad {
        core.settle_loading();
    }

    effects
}

fn sign_out_completed(
    core: &mut SessionCore,
    result: Result<(), ProviderError>,
    reply: Reply,
) -> Vec<SessionEffect> {
    let mut effects = Vec::new();
    if let Err(error) = result {
        warn!(%error, "provider sign out failed, clearing local session anyway");
        effects.push(SessionEffect::ReportError(error.into()));
    } else {
        info!("signed out");
    }

    core.state.identity = None;
    core.state.profile = None;
    core.loads.clear();
    core.settle_loading();

    effects.push(respond(reply, Ok(())));
    effects
}

fn profile_update_requested(
    core: &mut SessionCore,
    mut changes: ProfileChanges,
    reply: Reply,
) -> Vec<SessionEffect> {
    let Some(identity) = core.state.identity.clone() else {
        return vec![respond(reply, Err(SessionError::NotSignedIn))];
    };

    if let Some(avatar) = &changes.avatar
        && let Err(error) = avatar.validate(core.max_avatar_bytes)
    {
        return vec![respond(reply, Err(error))];
    }

    if changes.email.as_deref() == Some(identity.email.as_str()) {
        changes.email = None;
    }

    vec![SessionEffect::ApplyProfileChanges {
        identity,
        changes,
        reply,
    }]
}

impl Waiter {
    fn into_reply(self) -> Reply {
        match self {
            Waiter::SignIn(reply) | Waiter::SignUp(reply) | Waiter::Refresh(reply) => reply,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tokio::sync::oneshot;

    use super::*;
    use crate::assets::AvatarUpload;
    use crate::identity::{Registration, Role};

    /// Core whose startup probe already came back empty.
    fn core() -> SessionCore {
        let mut core = SessionCore::new(16);
        core.probe_pending = false;
        core
    }

    fn id(name: &str) -> Identity {
        Identity::new(name, format!("{name}@desa.id"))
    }

    fn profile(name: &str, role: Role) -> Profile {
        Profile {
            id: name.to_string(),
            email: format!("{name}@desa.id"),
            full_name: name.to_string(),
            nik: String::new(),
            address: String::new(),
            phone: None,
            avatar_url: None,
            role,
            created_at: Utc::now(),
        }
    }

    fn reply() -> (Reply, oneshot::Receiver<SessionResult<()>>) {
        oneshot::channel()
    }

    fn delivered(core: &mut SessionCore, identity: Option<Identity>) -> Option<TaskId> {
        let effects = update(
            core,
            SessionEvent::IdentityChanged {
                source: DeliverySource::Stream,
                identity,
                waiter: None,
            },
        );
        match effects.as_slice() {
            [SessionEffect::FetchProfile { task, .. }] => Some(*task),
            [] => None,
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    fn fetched(
        core: &mut SessionCore,
        task: TaskId,
        kind: FetchKind,
        result: Result<Profile, ProviderError>,
        identity_id: &str,
        waiter: Option<Waiter>,
    ) -> Vec<SessionEffect> {
        update(
            core,
            SessionEvent::ProfileFetched {
                task,
                kind,
                identity_id: identity_id.to_string(),
                result,
                waiter,
            },
        )
    }

    fn apply_replies(effects: Vec<SessionEffect>) {
        for effect in effects {
            if let SessionEffect::Reply { reply, result } = effect {
                let _ = reply.send(result);
            }
        }
    }

    #[test]
    fn present_identity_starts_loading_fetch() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();

        assert!(core.state.loading);
        assert_eq!(core.state.identity, Some(id("u1")));

        fetched(&mut core, task, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);
        assert!(!core.state.loading);
        assert_eq!(core.state.profile.unwrap().id, "u1");
    }

    #[test]
    fn absent_identity_clears_immediately_without_fetch() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();
        fetched(&mut core, task, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);

        assert_eq!(delivered(&mut core, None), None);
        assert_eq!(core.state.identity, None);
        assert_eq!(core.state.profile, None);
        assert!(!core.state.loading);
    }

    #[test]
    fn absent_stream_delivery_keeps_loading_while_probe_is_outstanding() {
        let mut core = SessionCore::new(16);
        assert_eq!(delivered(&mut core, None), None);
        assert!(core.state.loading);

        let effects = update(
            &mut core,
            SessionEvent::IdentityChanged {
                source: DeliverySource::Probe,
                identity: None,
                waiter: None,
            },
        );
        assert!(effects.is_empty());
        assert!(!core.state.loading);
    }

    #[test]
    fn probe_and_stream_for_same_identity_settle_once_both_fetches_resolve() {
        let mut core = SessionCore::new(16);
        let from_probe = update(
            &mut core,
            SessionEvent::IdentityChanged {
                source: DeliverySource::Probe,
                identity: Some(id("u1")),
                waiter: None,
            },
        );
        let Ok([SessionEffect::FetchProfile { task: probe_fetch, .. }]) = <[_; 1]>::try_from(from_probe) else {
            panic!("expected a single profile fetch");
        };
        let stream_fetch = delivered(&mut core, Some(id("u1"))).unwrap();
        assert!(core.state.loading);

        fetched(&mut core, stream_fetch, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);
        assert!(core.state.loading);
        fetched(&mut core, probe_fetch, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);
        assert!(!core.state.loading);
        assert_eq!(core.state.profile.as_ref().map(|p| p.id.as_str()), Some("u1"));
    }

    #[test]
    fn probe_failure_is_reported_and_settles() {
        let mut core = SessionCore::new(16);
        let effects = update(
            &mut core,
            SessionEvent::ProbeFailed(ProviderError::transport("session probe", "offline")),
        );
        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::ReportError(SessionError::Provider(_))]
        ));
        assert!(!core.state.loading);
        assert_eq!(core.state.identity, None);
    }

    #[test]
    fn slower_fetch_for_previous_identity_is_discarded() {
        let mut core = core();
        let fetch_x = delivered(&mut core, Some(id("x"))).unwrap();
        let fetch_y = delivered(&mut core, Some(id("y"))).unwrap();

        fetched(&mut core, fetch_y, FetchKind::InitialLoad, Ok(profile("y", Role::Resident)), "y", None);
        assert!(!core.state.loading);

        fetched(&mut core, fetch_x, FetchKind::InitialLoad, Ok(profile("x", Role::Administrator)), "x", None);
        assert_eq!(core.state.profile.as_ref().unwrap().id, "y");
        assert!(!core.state.is_admin());
        assert!(!core.state.loading);
    }

    #[test]
    fn response_arriving_after_sign_out_is_discarded() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();
        delivered(&mut core, None);

        fetched(&mut core, task, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);
        assert_eq!(core.state.profile, None);
        assert!(!core.state.loading);
    }

    #[test]
    fn overlapping_fetches_for_same_identity_keep_loading_until_both_resolve() {
        let mut core = core();
        let first = delivered(&mut core, Some(id("u1"))).unwrap();
        let second = delivered(&mut core, Some(id("u1"))).unwrap();
        assert_ne!(first, second);

        fetched(&mut core, first, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);
        assert!(core.state.loading);

        let mut newer = profile("u1", Role::Resident);
        newer.phone = Some("0812".to_string());
        fetched(&mut core, second, FetchKind::InitialLoad, Ok(newer.clone()), "u1", None);
        assert!(!core.state.loading);
        assert_eq!(core.state.profile, Some(newer));
    }

    #[test]
    fn failed_fetch_is_reported_and_leaves_profile_absent() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();

        let effects = fetched(
            &mut core,
            task,
            FetchKind::InitialLoad,
            Err(ProviderError::rejected("profile fetch", 406, "not found")),
            "u1",
            None,
        );

        assert!(matches!(
            effects.as_slice(),
            [SessionEffect::ReportError(SessionError::ProfileFetch(_))]
        ));
        assert_eq!(core.state.profile, None);
        assert!(core.state.identity.is_some());
        assert!(!core.state.loading);
    }

    #[test]
    fn sign_in_waiter_succeeds_even_when_fetch_fails() {
        let mut core = core();
        let (tx, mut rx) = reply();
        let effects = update(
            &mut core,
            SessionEvent::IdentityChanged {
                source: DeliverySource::SignIn,
                identity: Some(id("u1")),
                waiter: Some(Waiter::SignIn(tx)),
            },
        );
        let Ok([SessionEffect::FetchProfile { task, waiter, .. }]) = <[_; 1]>::try_from(effects) else {
            panic!("expected a single profile fetch");
        };

        let effects = fetched(
            &mut core,
            task,
            FetchKind::InitialLoad,
            Err(ProviderError::transport("profile fetch", "offline")),
            "u1",
            waiter,
        );
        assert!(matches!(effects[0], SessionEffect::ReportError(_)));
        apply_replies(effects);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn refresh_without_identity_is_a_noop() {
        let mut core = core();
        delivered(&mut core, None);
        let (tx, mut rx) = reply();

        let effects = update(&mut core, SessionEvent::RefreshRequested { reply: tx });
        apply_replies(effects);

        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn background_refresh_does_not_toggle_loading() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();
        fetched(&mut core, task, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);

        let (tx, mut rx) = reply();
        let effects = update(&mut core, SessionEvent::RefreshRequested { reply: tx });
        let Ok([SessionEffect::FetchProfile { task, kind, waiter, .. }]) = <[_; 1]>::try_from(effects) else {
            panic!("expected a single profile fetch");
        };
        assert_eq!(kind, FetchKind::Background);
        assert!(!core.state.loading);

        let effects = fetched(&mut core, task, kind, Ok(profile("u1", Role::Administrator)), "u1", waiter);
        apply_replies(effects);
        assert!(!core.state.loading);
        assert!(core.state.is_admin());
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn sign_out_clears_even_when_provider_fails() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();
        fetched(&mut core, task, FetchKind::InitialLoad, Ok(profile("u1", Role::Resident)), "u1", None);

        let (tx, mut rx) = reply();
        let effects = update(
            &mut core,
            SessionEvent::SignOutCompleted {
                result: Err(ProviderError::transport("sign out", "offline")),
                reply: tx,
            },
        );
        assert!(matches!(effects[0], SessionEffect::ReportError(_)));
        apply_replies(effects);

        assert_eq!(core.state.identity, None);
        assert_eq!(core.state.profile, None);
        assert!(!core.state.loading);
        assert_eq!(rx.try_recv().unwrap(), Ok(()));
    }

    #[test]
    fn oversized_avatar_is_rejected_before_any_effect() {
        let mut core = core();
        delivered(&mut core, Some(id("u1")));

        let (tx, mut rx) = reply();
        let changes = ProfileChanges {
            avatar: Some(AvatarUpload::new("a.png", vec![0; 17])),
            ..ProfileChanges::default()
        };
        let effects = update(&mut core, SessionEvent::ProfileUpdateRequested { changes, reply: tx });
        assert_eq!(effects.len(), 1);
        apply_replies(effects);

        assert_eq!(
            rx.try_recv().unwrap(),
            Err(SessionError::AssetTooLarge { size: 17, limit: 16 })
        );
    }

    #[test]
    fn profile_update_requires_identity_and_drops_unchanged_email() {
        let mut core = core();
        delivered(&mut core, None);
        let (tx, mut rx) = reply();
        let effects = update(
            &mut core,
            SessionEvent::ProfileUpdateRequested {
                changes: ProfileChanges::default(),
                reply: tx,
            },
        );
        apply_replies(effects);
        assert_eq!(rx.try_recv().unwrap(), Err(SessionError::NotSignedIn));

        delivered(&mut core, Some(id("u1")));
        let (tx, _rx) = reply();
        let effects = update(
            &mut core,
            SessionEvent::ProfileUpdateRequested {
                changes: ProfileChanges {
                    email: Some("u1@desa.id".to_string()),
                    phone: Some("0812".to_string()),
                    avatar: None,
                },
                reply: tx,
            },
        );
        let Ok([SessionEffect::ApplyProfileChanges { changes, .. }]) = <[_; 1]>::try_from(effects) else {
            panic!("expected profile changes to be applied");
        };
        assert_eq!(changes.email, None);
        assert_eq!(changes.phone.as_deref(), Some("0812"));
    }

    #[test]
    fn announced_registration_does_not_report_missing_profile() {
        let mut core = core();
        let (tx, _rx) = reply();
        let effects = update(
            &mut core,
            SessionEvent::SignUpRequested {
                registration: Registration::default(),
                reply: tx,
            },
        );
        assert!(matches!(effects.as_slice(), [SessionEffect::Register { .. }]));

        // Stream announces the new identity before its profile row exists.
        let early = delivered(&mut core, Some(id("u9"))).unwrap();
        let effects = fetched(
            &mut core,
            early,
            FetchKind::InitialLoad,
            Err(ProviderError::rejected("profile fetch", 406, "profile not found")),
            "u9",
            None,
        );
        assert!(effects.is_empty());

        let effects = update(
            &mut core,
            SessionEvent::IdentityChanged {
                source: DeliverySource::SignUp,
                identity: Some(id("u9")),
                waiter: Some(Waiter::SignUp(reply().0)),
            },
        );
        assert!(matches!(effects.as_slice(), [SessionEffect::FetchProfile { .. }]));
        assert_eq!(core.signups_pending, 0);

        // Outside a sign-up the same failure is reported.
        let later = delivered(&mut core, Some(id("u9"))).unwrap();
        let effects = fetched(
            &mut core,
            later,
            FetchKind::InitialLoad,
            Err(ProviderError::rejected("profile fetch", 406, "profile not found")),
            "u9",
            None,
        );
        assert!(matches!(effects.as_slice(), [SessionEffect::ReportError(_)]));
    }

    #[test]
    fn email_change_updates_held_identity_before_refresh() {
        let mut core = core();
        let task = delivered(&mut core, Some(id("u1"))).unwrap();
        fetched(
            &mut core,
            task,
            FetchKind::InitialLoad,
            Ok(profile("u1", Role::Resident)),
            "u1",
            None,
        );

        let (tx, _rx) = reply();
        let effects = update(
            &mut core,
            SessionEvent::ProfileUpdateCompleted {
                identity_id: "u1".to_string(),
                result: Ok(Some(Identity::new("u1", "baru@desa.id"))),
                reply: tx,
            },
        );
        let Ok([SessionEffect::FetchProfile { kind, identity_id, .. }]) = <[_; 1]>::try_from(effects)
        else {
            panic!("expected a profile refresh");
        };
        assert_eq!(kind, FetchKind::Background);
        assert_eq!(identity_id, "u1");
        assert_eq!(core.state.identity.as_ref().unwrap().email, "baru@desa.id");
        assert!(!core.state.loading);
    }
}
