//! Hosted backend over HTTP.
//!
//! Auth lives under `/auth/v1`, profile rows under `/rest/v1/<table>` and
//! avatars under `/storage/v1/object/<bucket>`. Every request carries the
//! anon key in `apikey`; the bearer is the session access token when signed
//! in, the anon key otherwise.

use std::sync::{Mutex, PoisonError};

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::session_cache::{CachedSession, SessionCache, now_millis_u64};
use super::{IdentityFeed, IdentityProvider, IdentityStream};
use crate::config::BackendConfig;
use crate::error::{ProviderError, ProviderResult};
use crate::identity::{Identity, NewProfile, Profile, ProfilePatch};

/// Media type asking the row store for a single object instead of an array.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: u64,
    user: UserBody,
}

#[derive(Debug, Deserialize)]
struct UserBody {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl UserBody {
    fn into_identity(self, fallback_email: &str) -> Identity {
        let email = self
            .email
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| fallback_email.to_string());
        Identity::new(self.id, email)
    }
}

impl TokenResponse {
    fn into_session(self, fallback_email: &str) -> CachedSession {
        let expires_at = now_millis_u64().saturating_add(self.expires_in.saturating_mul(1000));
        CachedSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user.into_identity(fallback_email),
        }
    }
}

/// [`IdentityProvider`] backed by the hosted REST endpoints.
#[derive(Debug)]
pub struct RestProvider {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    profile_table: String,
    storage_bucket: String,
    cache: Option<SessionCache>,
    session: Mutex<Option<CachedSession>>,
    feed: IdentityFeed,
}

impl RestProvider {
    /// Creates the provider, restoring a cached session if one exists.
    ///
    /// The restored identity is what subscribers receive first; the session
    /// probe later validates it.
    pub fn new(config: &BackendConfig, cache: Option<SessionCache>) -> Self {
        let restored = cache.as_ref().and_then(|cache| match cache.load() {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable session cache");
                None
            }
        });

        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            profile_table: config.profile_table.clone(),
            storage_bucket: config.storage_bucket.clone(),
            feed: IdentityFeed::with_current(restored.as_ref().map(|s| s.user.clone())),
            session: Mutex::new(restored),
            cache,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.base_url)
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.profile_table)
    }

    /// Public URL of an object in the avatar bucket.
    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{path}",
            self.base_url, self.storage_bucket
        )
    }

    fn current_session(&self) -> Option<CachedSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn bearer(&self) -> String {
        self.current_session()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(self.bearer())
    }

    /// Replaces the held session, mirrors it to the cache and notifies
    /// subscribers.
    fn store_session(&self, session: Option<CachedSession>) {
        let identity = session.as_ref().map(|s| s.user.clone());

        if let Some(cache) = &self.cache {
            let written = match &session {
                Some(session) => cache.save(session),
                None => cache.clear(),
            };
            if let Err(err) = written {
                warn!(error = %format!("{err:#}"), "failed to update session cache");
            }
        }

        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
        self.feed.publish(identity);
    }

    async fn refresh(&self, refresh_token: &str, email: &str) -> ProviderResult<CachedSession> {
        const OP: &str = "token refresh";
        let response = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        let token: TokenResponse = ensure_success(response, OP)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        Ok(token.into_session(email))
    }
}

async fn ensure_success(
    response: reqwest::Response,
    operation: &'static str,
) -> ProviderResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::rejected(operation, status, error_message(&body)))
}

/// Picks the human-readable message out of a backend error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            ["error_description", "msg", "message", "error"]
                .iter()
                .find_map(|key| value.get(key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

impl IdentityProvider for RestProvider {
    async fn probe_session(&self) -> ProviderResult<Option<Identity>> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        if !session.is_expired() {
            return Ok(Some(session.user));
        }

        debug!("cached session expired, refreshing");
        match self
            .refresh(&session.refresh_token, &session.user.email)
            .await
        {
            Ok(refreshed) => {
                let identity = refreshed.user.clone();
                self.store_session(Some(refreshed));
                Ok(Some(identity))
            }
            // Refresh token revoked or expired: the session is gone.
            Err(ProviderError::Rejected { status, .. }) if (400..500).contains(&status) => {
                self.store_session(None);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn subscribe(&self) -> IdentityStream {
        self.feed.subscribe()
    }

    async fn authenticate(&self, email: &str, password: &str) -> ProviderResult<Identity> {
        const OP: &str = "sign in";
        let response = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        let token: TokenResponse = ensure_success(response, OP)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;

        let session = token.into_session(email);
        let identity = session.user.clone();
        self.store_session(Some(session));
        Ok(identity)
    }

    async fn register(&self, email: &str, password: &str) -> ProviderResult<Identity> {
        const OP: &str = "sign up";
        let response = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        let body: Value = ensure_success(response, OP)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;

        // With auto-confirm the backend returns a full session; with email
        // confirmation it returns the bare user.
        if body.get("access_token").is_some() {
            let token: TokenResponse =
                serde_json::from_value(body).map_err(|e| ProviderError::transport(OP, e))?;
            let session = token.into_session(email);
            let identity = session.user.clone();
            self.store_session(Some(session));
            return Ok(identity);
        }

        let user = body.get("user").cloned().unwrap_or(body);
        let user: UserBody =
            serde_json::from_value(user).map_err(|e| ProviderError::transport(OP, e))?;
        Ok(user.into_identity(email))
    }

    async fn invalidate(&self) -> ProviderResult<()> {
        const OP: &str = "sign out";
        if self.current_session().is_none() {
            self.store_session(None);
            return Ok(());
        }

        let result = match self
            .request(reqwest::Method::POST, &self.auth_url("logout"))
            .send()
            .await
        {
            Ok(response) => ensure_success(response, OP).await.map(|_| ()),
            Err(e) => Err(ProviderError::transport(OP, e)),
        };

        // The local session is dropped whatever the server said.
        self.store_session(None);
        result
    }

    async fn get_profile(&self, id: &str) -> ProviderResult<Profile> {
        const OP: &str = "profile fetch";
        let response = self
            .request(reqwest::Method::GET, &self.table_url())
            .query(&[("id", format!("eq.{id}")), ("select", "*".to_string())])
            .header(ACCEPT, SINGLE_OBJECT)
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        ensure_success(response, OP)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(OP, e))
    }

    async fn create_profile(&self, profile: NewProfile) -> ProviderResult<()> {
        const OP: &str = "profile create";
        let response = self
            .request(reqwest::Method::POST, &self.table_url())
            .header("Prefer", "return=minimal")
            .json(&profile)
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        ensure_success(response, OP).await.map(|_| ())
    }

    async fn update_profile(&self, id: &str, patch: ProfilePatch) -> ProviderResult<()> {
        const OP: &str = "profile update";
        let response = self
            .request(reqwest::Method::PATCH, &self.table_url())
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        ensure_success(response, OP).await.map(|_| ())
    }

    async fn update_email(&self, email: &str) -> ProviderResult<Identity> {
        const OP: &str = "email update";
        let Some(mut session) = self.current_session() else {
            return Err(ProviderError::NoSession { operation: OP });
        };

        let response = self
            .request(reqwest::Method::PUT, &self.auth_url("user"))
            .json(&serde_json::json!({ "email": email }))
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        let user: UserBody = ensure_success(response, OP)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;

        // With email confirmation on, the backend keeps reporting the old
        // address until the new one is confirmed.
        session.user = user.into_identity(email);
        let identity = session.user.clone();
        self.store_session(Some(session));
        Ok(identity)
    }

    async fn upload_asset(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> ProviderResult<String> {
        const OP: &str = "upload";
        let url = format!(
            "{}/storage/v1/object/{}/{path}",
            self.base_url, self.storage_bucket
        );
        let response = self
            .request(reqwest::Method::POST, &url)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ProviderError::transport(OP, e))?;
        ensure_success(response, OP).await?;
        Ok(self.public_url(path))
    }
}
