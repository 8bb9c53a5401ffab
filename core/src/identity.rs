//! Sign-in, sign-up, guest join and profile setup. Each flow reports a
//! single user-facing error string and clears its loading flag when done.

use backend_api::{NewProfile, ProfilePatch, Session, Status};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::backend::Backend;
use crate::error::{BackendError, Result};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Minimum password length accepted on sign-up.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Avatar given to new accounts until they upload one.
pub const PLACEHOLDER_AVATAR: &str = "https://i.pravatar.cc/150";
pub const GUEST_AVATAR: &str = "https://i.pravatar.cc/150?u=guest";
pub const GUEST_NAME: &str = "Guest User";
pub const AVATAR_BUCKET: &str = "avatars";
pub const AVATAR_UPLOAD_FAILED: &str = "Error uploading avatar!";

/// Loading/error state of an auth form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormState {
    pub loading: bool,
    pub error: Option<String>,
}

pub fn validate_email(email: &str) -> Result<()> {
    if email.trim().is_empty() {
        return Err(BackendError::Validation("Email is required".into()));
    }
    if !EMAIL_RE.is_match(email.trim()) {
        return Err(BackendError::Validation(
            "Please enter a valid email address".into(),
        ));
    }
    Ok(())
}

/// Drives the identity flows against a backend. Session changes are not
/// applied here; the backend announces them to the sync engine.
pub struct AuthFlow {
    backend: Arc<dyn Backend>,
    state: FormState,
}

impl AuthFlow {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            state: FormState::default(),
        }
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    fn begin(&mut self) {
        self.state = FormState {
            loading: true,
            error: None,
        };
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.state = FormState {
            loading: false,
            error: Some(message.into()),
        };
    }

    fn done(&mut self) {
        self.state.loading = false;
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Option<Session> {
        self.begin();
        if let Err(e) = validate_email(email) {
            self.fail(e.to_string());
            return None;
        }
        if password.is_empty() {
            self.fail("Password is required");
            return None;
        }
        match self.backend.sign_in_with_password(email.trim(), password).await {
            Ok(session) => {
                info!(user_id = %session.user_id, "signed in");
                self.done();
                Some(session)
            }
            Err(e) => {
                self.fail(e.to_string());
                None
            }
        }
    }

    /// Create an account and its profile row, then hand over to profile
    /// setup. A failing profile write does not fail the sign-up; the user can
    /// fix the profile later.
    pub async fn sign_up(
        &mut self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Option<Session> {
        self.begin();
        if username.trim().is_empty() {
            self.fail("Username is required");
            return None;
        }
        if let Err(e) = validate_email(email) {
            self.fail(e.to_string());
            return None;
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            self.fail(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            ));
            return None;
        }
        let session = match self.backend.sign_up(email.trim(), password).await {
            Ok(session) => session,
            Err(e) => {
                self.fail(e.to_string());
                return None;
            }
        };
        self.create_profile(NewProfile {
            id: session.user_id.clone(),
            username: username.trim().to_string(),
            status: Status::Available,
            avatar_url: PLACEHOLDER_AVATAR.into(),
        })
        .await;
        self.done();
        Some(session)
    }

    /// Anonymous session with a pre-seeded guest profile.
    pub async fn join_as_guest(&mut self) -> Option<Session> {
        self.begin();
        let session = match self.backend.sign_in_anonymously().await {
            Ok(session) => session,
            Err(e) => {
                self.fail(e.to_string());
                return None;
            }
        };
        self.create_profile(NewProfile {
            id: session.user_id.clone(),
            username: GUEST_NAME.into(),
            status: Status::Available,
            avatar_url: GUEST_AVATAR.into(),
        })
        .await;
        self.done();
        Some(session)
    }

    pub async fn sign_out(&mut self) {
        if let Err(e) = self.backend.sign_out().await {
            error!(error = %e, "sign out failed");
        }
        self.state = FormState::default();
    }

    /// Upload an avatar image and point the signed-in user's profile at it.
    /// Returns the public URL.
    pub async fn upload_avatar(&mut self, file_name: &str, data: Bytes) -> Option<String> {
        self.begin();
        match self.try_upload_avatar(file_name, data).await {
            Ok(url) => {
                self.done();
                Some(url)
            }
            Err(e) => {
                error!(error = %e, "avatar upload failed");
                self.fail(AVATAR_UPLOAD_FAILED);
                None
            }
        }
    }

    async fn try_upload_avatar(&self, file_name: &str, data: Bytes) -> Result<String> {
        let path = avatar_path(file_name);
        let content_type = mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .to_string();
        let url = self
            .backend
            .upload_object(AVATAR_BUCKET, &path, data, &content_type)
            .await?;
        if let Some(session) = self.backend.current_session().await? {
            let patch = ProfilePatch {
                avatar_url: Some(Some(url.clone())),
                ..Default::default()
            };
            if let Err(e) = self.backend.update_profile(&session.user_id, &patch).await {
                error!(error = %e, "failed to store avatar url on profile");
            }
        }
        Ok(url)
    }

    async fn create_profile(&self, profile: NewProfile) {
        match self.backend.upsert_profile(&profile).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!(error = %e, "profile row already exists, ignoring");
            }
            Err(e) => error!(error = %e, "profile creation failed"),
        }
    }
}

/// Random object name keeping the upload's extension.
pub fn avatar_path(file_name: &str) -> String {
    let ext = file_name.rsplit('.').next().unwrap_or(file_name);
    format!("{}.{}", rand::random::<u64>(), ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(validate_email("you@example.com").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("you@").is_err());
        assert!(validate_email("no at sign.com").is_err());
    }

    #[test]
    fn avatar_path_keeps_extension() {
        let path = avatar_path("me.face.PNG");
        assert!(path.ends_with(".PNG"));
        let stem = path.trim_end_matches(".PNG");
        assert!(stem.parse::<u64>().is_ok());
    }
}
