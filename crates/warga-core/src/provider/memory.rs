//! In-process provider.
//!
//! Keeps accounts, profiles and uploaded assets in memory. Failures and
//! slow calls can be scripted, which is what the session tests rely on to
//! reproduce overlapping fetches.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Semaphore;

use super::{IdentityFeed, IdentityProvider, IdentityStream};
use crate::error::{ProviderError, ProviderResult};
use crate::identity::{Identity, NewProfile, Profile, ProfilePatch, Role};

#[derive(Debug, Clone)]
struct Account {
    password: String,
    identity: Identity,
}

#[derive(Debug, Default)]
struct Store {
    accounts: HashMap<String, Account>,
    profiles: HashMap<String, Profile>,
    assets: HashMap<String, Vec<u8>>,
    fail_next_create_profile: Option<ProviderError>,
    fail_next_invalidate: Option<ProviderError>,
    failing_profile_fetches: HashMap<String, ProviderError>,
    profile_gates: HashMap<String, Arc<Semaphore>>,
    probe_gate: Option<Arc<Semaphore>>,
    profile_fetches: HashMap<String, usize>,
    uploads: usize,
}

/// [`IdentityProvider`] holding everything in memory.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    store: Mutex<Store>,
    feed: IdentityFeed,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an account with a profile of the given role.
    pub fn add_account(&self, email: &str, password: &str, full_name: &str, role: Role) -> Identity {
        let identity = Identity::new(uuid::Uuid::new_v4().to_string(), email);
        let profile = Profile {
            id: identity.id.clone(),
            email: email.to_string(),
            full_name: full_name.to_string(),
            nik: String::new(),
            address: String::new(),
            phone: None,
            avatar_url: None,
            role,
            created_at: Utc::now(),
        };

        let mut store = self.store();
        store.accounts.insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                identity: identity.clone(),
            },
        );
        store.profiles.insert(identity.id.clone(), profile);
        identity
    }

    /// Starts out with `identity` signed in, as if a session was restored
    /// from a previous run.
    pub fn restore_session(&self, identity: Identity) {
        self.feed.publish(Some(identity));
    }

    /// Emits an identity change as if the provider initiated it.
    pub fn emit(&self, identity: Option<Identity>) {
        self.feed.publish(identity);
    }

    /// Holds profile fetches for `id` until [`Self::release_profile`].
    pub fn hold_profile(&self, id: &str) {
        self.store()
            .profile_gates
            .insert(id.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Lets every held and future profile fetch for `id` complete.
    pub fn release_profile(&self, id: &str) {
        if let Some(gate) = self.store().profile_gates.remove(id) {
            gate.close();
        }
    }

    /// Holds the session probe until [`Self::release_probe`].
    pub fn hold_probe(&self) {
        self.store().probe_gate = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_probe(&self) {
        if let Some(gate) = self.store().probe_gate.take() {
            gate.close();
        }
    }

    pub fn fail_profile_fetches(&self, id: &str, error: ProviderError) {
        self.store()
            .failing_profile_fetches
            .insert(id.to_string(), error);
    }

    pub fn fail_next_create_profile(&self, error: ProviderError) {
        self.store().fail_next_create_profile = Some(error);
    }

    pub fn fail_next_invalidate(&self, error: ProviderError) {
        self.store().fail_next_invalidate = Some(error);
    }

    pub fn profile_fetches(&self, id: &str) -> usize {
        self.store().profile_fetches.get(id).copied().unwrap_or(0)
    }

    pub fn uploads(&self) -> usize {
        self.store().uploads
    }

    pub fn profile(&self, id: &str) -> Option<Profile> {
        self.store().profiles.get(id).cloned()
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.store().accounts.contains_key(email)
    }
}

impl IdentityProvider for MemoryProvider {
    async fn probe_session(&self) -> ProviderResult<Option<Identity>> {
        let gate = self.store().probe_gate.clone();
        if let Some(gate) = gate {
            // Closed on release.
            let _ = gate.acquire().await;
        }
        Ok(self.feed.current())
    }

    fn subscribe(&self) -> IdentityStream {
        self.feed.subscribe()
    }

    async fn authenticate(&self, email: &str, password: &str) -> ProviderResult<Identity> {
        let account = self.store().accounts.get(email).cloned();
        match account {
            Some(account) if account.password == password => {
                self.feed.publish(Some(account.identity.clone()));
                Ok(account.identity)
            }
            _ => Err(ProviderError::rejected(
                "sign in",
                400,
                "Invalid login credentials",
            )),
        }
    }

    async fn register(&self, email: &str, password: &str) -> ProviderResult<Identity> {
        let identity = {
            let mut store = self.store();
            if store.accounts.contains_key(email) {
                return Err(ProviderError::rejected(
                    "sign up",
                    422,
                    "User already registered",
                ));
            }
            let identity = Identity::new(uuid::Uuid::new_v4().to_string(), email);
            store.accounts.insert(
                email.to_string(),
                Account {
                    password: password.to_string(),
                    identity: identity.clone(),
                },
            );
            identity
        };

        self.feed.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn invalidate(&self) -> ProviderResult<()> {
        let failure = self.store().fail_next_invalidate.take();
        if let Some(err) = failure {
            return Err(err);
        }
        self.feed.publish(None);
        Ok(())
    }

    async fn get_profile(&self, id: &str) -> ProviderResult<Profile> {
        let gate = {
            let mut store = self.store();
            *store.profile_fetches.entry(id.to_string()).or_default() += 1;
            store.profile_gates.get(id).cloned()
        };
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }

        let store = self.store();
        if let Some(err) = store.failing_profile_fetches.get(id) {
            return Err(err.clone());
        }
        store
            .profiles
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::rejected("profile fetch", 406, "profile not found"))
    }

    async fn create_profile(&self, profile: NewProfile) -> ProviderResult<()> {
        let mut store = self.store();
        if let Some(err) = store.fail_next_create_profile.take() {
            return Err(err);
        }
        store.profiles.insert(
            profile.id.clone(),
            Profile {
                id: profile.id,
                email: profile.email,
                full_name: profile.full_name,
                nik: profile.nik,
                address: profile.address,
                phone: Some(profile.phone).filter(|p| !p.is_empty()),
                avatar_url: None,
                role: profile.role,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn update_profile(&self, id: &str, patch: ProfilePatch) -> ProviderResult<()> {
        let mut store = self.store();
        let Some(profile) = store.profiles.get_mut(id) else {
            return Err(ProviderError::rejected(
                "profile update",
                404,
                "profile not found",
            ));
        };
        if let Some(phone) = patch.phone {
            profile.phone = Some(phone);
        }
        if let Some(url) = patch.avatar_url {
            profile.avatar_url = Some(url);
        }
        Ok(())
    }

    async fn update_email(&self, email: &str) -> ProviderResult<Identity> {
        let Some(current) = self.feed.current() else {
            return Err(ProviderError::NoSession {
                operation: "email update",
            });
        };

        let updated = Identity::new(current.id.clone(), email);
        {
            let mut store = self.store();
            let Some(mut account) = store.accounts.remove(&current.email) else {
                return Err(ProviderError::rejected(
                    "email update",
                    404,
                    "user not found",
                ));
            };
            account.identity = updated.clone();
            store.accounts.insert(email.to_string(), account);
            if let Some(profile) = store.profiles.get_mut(&current.id) {
                profile.email = email.to_string();
            }
        }

        self.feed.publish(Some(updated.clone()));
        Ok(updated)
    }

    async fn upload_asset(
        &self,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> ProviderResult<String> {
        let mut store = self.store();
        store.uploads += 1;
        store.assets.insert(path.to_string(), bytes);
        Ok(format!("memory://assets/{path}"))
    }
}
