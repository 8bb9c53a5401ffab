use async_trait::async_trait;
use backend_api::{
    BackendEvent, MessageRow, NewMessage, NewProfile, Profile, ProfilePatch, ProfileSummary,
    Session,
};
use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;

/// Port to the hosted backend: auth, the `profiles` and `messages`
/// collections, object storage and the change-notification stream.
///
/// Session changes caused by the auth calls are announced on the
/// notification stream rather than applied by the caller, so every client
/// state transition goes through the same consumer loop.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open an independent notification stream carrying session changes and
    /// row changes for both collections, in delivery order.
    fn subscribe(&self) -> UnboundedReceiver<BackendEvent>;

    async fn current_session(&self) -> Result<Option<Session>>;
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session>;
    async fn sign_in_anonymously(&self) -> Result<Session>;
    async fn sign_out(&self) -> Result<()>;

    async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>>;
    /// Every profile, including the caller's own.
    async fn fetch_profiles(&self) -> Result<Vec<Profile>>;
    async fn fetch_profile_summary(&self, id: &str) -> Result<Option<ProfileSummary>>;
    async fn fetch_profile_summaries(&self, ids: &[String]) -> Result<Vec<ProfileSummary>>;
    async fn update_profile(&self, id: &str, patch: &ProfilePatch) -> Result<()>;
    /// Insert or merge a profile row keyed by id.
    async fn upsert_profile(&self, profile: &NewProfile) -> Result<()>;

    /// Up to `limit` messages ordered by creation time, oldest first.
    async fn fetch_messages(&self, limit: usize) -> Result<Vec<MessageRow>>;
    async fn insert_message(&self, message: &NewMessage) -> Result<()>;

    /// Store `data` under `bucket/path` and return its public URL.
    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String>;
}
