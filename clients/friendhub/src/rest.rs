//! [`Backend`] over a Supabase-style HTTP API: GoTrue auth, PostgREST rows
//! and Storage objects. Change notifications come from [`crate::realtime`].

use async_trait::async_trait;
use backend_api::{
    BackendEvent, MessageRow, NewMessage, NewProfile, Profile, ProfilePatch, ProfileSummary,
    Session,
};
use bytes::Bytes;
use friendhub_core::error::{BackendError, Result};
use friendhub_core::events::EventBus;
use friendhub_core::Backend;
use parking_lot::Mutex;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::realtime;
use crate::session_cache::SessionCache;

const PROFILE_SUMMARY_COLUMNS: &str = "id,username,avatar_url";

#[derive(Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
    user: Option<AuthUser>,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    is_anonymous: bool,
}

pub struct RestBackend {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    session: Arc<Mutex<Option<Session>>>,
    bus: Arc<Mutex<EventBus>>,
    cache: Option<SessionCache>,
    realtime: Mutex<Option<JoinHandle<()>>>,
}

impl RestBackend {
    pub fn new(mut base: Url, anon_key: impl Into<String>) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            http: reqwest::Client::new(),
            base,
            anon_key: anon_key.into(),
            session: Arc::new(Mutex::new(None)),
            bus: Arc::new(Mutex::new(EventBus::new())),
            cache: None,
            realtime: Mutex::new(None),
        }
    }

    /// Persist sessions so the next start can reuse them.
    pub fn with_session_cache(mut self, cache: SessionCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reuse a cached session if the backend still accepts it.
    pub async fn restore(&self) -> Result<Option<Session>> {
        let Some(cached) = self.load_cached().await else {
            return Ok(None);
        };
        let req = self
            .http
            .get(self.url("auth/v1/user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(&cached.access_token);
        match self.send(req, true).await {
            Ok(resp) => {
                let user: AuthUser = read_json(resp).await?;
                let session = Session {
                    user_id: user.id,
                    email: user.email.filter(|e| !e.is_empty()),
                    access_token: cached.access_token,
                    anonymous: user.is_anonymous,
                };
                info!(user_id = %session.user_id, "restored cached session");
                *self.session.lock() = Some(session.clone());
                Ok(Some(session))
            }
            Err(BackendError::Unauthorized(msg)) => {
                debug!(reason = %msg, "cached session rejected");
                self.clear_cache().await;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Start (or restart) the realtime feed feeding [`Backend::subscribe`].
    pub fn start_realtime(&self) -> Result<()> {
        let url = realtime::socket_url(&self.base, &self.anon_key)?;
        let handle = tokio::spawn(realtime::run(url, self.session.clone(), self.bus.clone()));
        if let Some(previous) = self.realtime.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| BackendError::Validation(format!("invalid path {path}: {e}")))
    }

    fn table(&self, table: &str, query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.url(&format!("rest/v1/{table}"))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Request authorized as the signed-in user, or anonymously.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let token = self
            .session
            .lock()
            .as_ref()
            .map(|s| s.access_token.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
    }

    async fn send(&self, req: RequestBuilder, auth: bool) -> Result<Response> {
        let resp = req.send().await.map_err(transport)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(error_from_response(status.as_u16(), &body, auth))
    }

    async fn authenticate(&self, url: Url, body: Value) -> Result<Session> {
        let resp = self
            .send(self.request(Method::POST, url).json(&body), true)
            .await?;
        let session = session_from(read_json(resp).await?)?;
        self.open_session(session.clone()).await;
        Ok(session)
    }

    async fn open_session(&self, session: Session) {
        *self.session.lock() = Some(session.clone());
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&session).await {
                warn!(error = %e, "failed to cache session");
            }
        }
        if self.realtime.lock().is_some() {
            if let Err(e) = self.start_realtime() {
                warn!(error = %e, "failed to restart realtime feed");
            }
        }
        self.bus.lock().publish(BackendEvent::Session {
            session: Some(session),
        });
    }

    async fn load_cached(&self) -> Option<Session> {
        match &self.cache {
            Some(cache) => cache.load().await,
            None => None,
        }
    }

    async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.clear().await {
                warn!(error = %e, "failed to clear session cache");
            }
        }
    }
}

impl Drop for RestBackend {
    fn drop(&mut self) {
        if let Some(handle) = self.realtime.lock().take() {
            handle.abort();
        }
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let bytes = resp.bytes().await.map_err(transport)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn session_from(resp: AuthResponse) -> Result<Session> {
    match (resp.access_token, resp.user) {
        (Some(access_token), Some(user)) => Ok(Session {
            user_id: user.id,
            email: user.email.filter(|e| !e.is_empty()),
            access_token,
            anonymous: user.is_anonymous,
        }),
        _ => Err(BackendError::Validation(
            "Check your email to confirm your account".into(),
        )),
    }
}

/// Map an error response to a [`BackendError`], keeping the backend's own
/// message where it sent one. `auth` marks auth endpoints, where a 400
/// means rejected credentials.
pub fn error_from_response(status: u16, body: &str, auth: bool) -> BackendError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "error_description", "message", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_owned))
        })
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        401 | 403 => BackendError::Unauthorized(message),
        400 | 422 if auth => BackendError::Unauthorized(message),
        404 => BackendError::NotFound(message),
        409 => BackendError::Conflict(message),
        _ => BackendError::Http { status, message },
    }
}

/// PostgREST `in` filter with every id quoted.
pub fn in_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl Backend for RestBackend {
    fn subscribe(&self) -> UnboundedReceiver<BackendEvent> {
        self.bus.lock().subscribe_all()
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.session.lock().clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let mut url = self.url("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", "password");
        self.authenticate(url, json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        let url = self.url("auth/v1/signup")?;
        self.authenticate(url, json!({ "email": email, "password": password }))
            .await
    }

    async fn sign_in_anonymously(&self) -> Result<Session> {
        let url = self.url("auth/v1/signup")?;
        self.authenticate(url, json!({})).await
    }

    async fn sign_out(&self) -> Result<()> {
        let signed_in = self.session.lock().is_some();
        let result = if signed_in {
            let req = self.request(Method::POST, self.url("auth/v1/logout")?);
            self.send(req, true).await.map(|_| ())
        } else {
            Ok(())
        };
        *self.session.lock() = None;
        self.clear_cache().await;
        self.bus.lock().publish(BackendEvent::Session { session: None });
        result
    }

    async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>> {
        let filter = format!("eq.{id}");
        let url = self.table("profiles", &[("select", "*"), ("id", &filter)])?;
        let resp = self.send(self.request(Method::GET, url), false).await?;
        let rows: Vec<Profile> = read_json(resp).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_profiles(&self) -> Result<Vec<Profile>> {
        let url = self.table("profiles", &[("select", "*")])?;
        let resp = self.send(self.request(Method::GET, url), false).await?;
        read_json(resp).await
    }

    async fn fetch_profile_summary(&self, id: &str) -> Result<Option<ProfileSummary>> {
        let filter = format!("eq.{id}");
        let url = self.table(
            "profiles",
            &[("select", PROFILE_SUMMARY_COLUMNS), ("id", &filter)],
        )?;
        let resp = self.send(self.request(Method::GET, url), false).await?;
        let rows: Vec<ProfileSummary> = read_json(resp).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_profile_summaries(&self, ids: &[String]) -> Result<Vec<ProfileSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = in_filter(ids);
        let url = self.table(
            "profiles",
            &[("select", PROFILE_SUMMARY_COLUMNS), ("id", &filter)],
        )?;
        let resp = self.send(self.request(Method::GET, url), false).await?;
        read_json(resp).await
    }

    async fn update_profile(&self, id: &str, patch: &ProfilePatch) -> Result<()> {
        let filter = format!("eq.{id}");
        let url = self.table("profiles", &[("id", &filter)])?;
        let req = self
            .request(Method::PATCH, url)
            .header("Prefer", "return=minimal")
            .json(patch);
        self.send(req, false).await?;
        Ok(())
    }

    async fn upsert_profile(&self, profile: &NewProfile) -> Result<()> {
        let url = self.table("profiles", &[])?;
        let req = self
            .request(Method::POST, url)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(profile);
        self.send(req, false).await?;
        Ok(())
    }

    async fn fetch_messages(&self, limit: usize) -> Result<Vec<MessageRow>> {
        let limit = limit.to_string();
        let url = self.table(
            "messages",
            &[
                ("select", "*"),
                ("order", "created_at.asc"),
                ("limit", &limit),
            ],
        )?;
        let resp = self.send(self.request(Method::GET, url), false).await?;
        read_json(resp).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        let url = self.table("messages", &[])?;
        let req = self
            .request(Method::POST, url)
            .header("Prefer", "return=minimal")
            .json(message);
        self.send(req, false).await?;
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        let url = self.url(&format!("storage/v1/object/{bucket}/{path}"))?;
        let req = self
            .request(Method::POST, url)
            .header("Content-Type", content_type)
            .body(data);
        self.send(req, false).await?;
        Ok(self
            .url(&format!("storage/v1/object/public/{bucket}/{path}"))?
            .to_string())
    }
}
