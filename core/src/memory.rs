//! In-process backend used for demo mode and tests. Writes are echoed on
//! the notification stream the way the hosted backend's realtime feed does.

use async_trait::async_trait;
use backend_api::{
    BackendEvent, ChangeKind, Coordinates, MessageRow, NewMessage, NewProfile, Profile,
    ProfilePatch, ProfileRecord, ProfileSummary, Session, Status,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::backend::Backend;
use crate::error::{BackendError, Result};
use crate::events::EventBus;

/// Backend operations that can be made to fail or stall in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SignIn,
    FetchProfile,
    FetchProfiles,
    FetchSummaries,
    FetchMessages,
    UpdateProfile,
    UpsertProfile,
    InsertMessage,
    Upload,
}

struct Account {
    user_id: String,
    email: String,
    password: String,
}

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    session: Option<Session>,
    profiles: Vec<Profile>,
    messages: Vec<MessageRow>,
    objects: HashMap<String, Bytes>,
    failing: HashSet<Op>,
    latency: HashMap<Op, Duration>,
    profile_writes: Vec<(String, ProfilePatch)>,
    message_inserts: usize,
    summary_batches: usize,
    mute_message_echo: bool,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
    bus: Mutex<EventBus>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bus: Mutex::new(EventBus::new()),
        }
    }

    /// Backend pre-populated with two friends so the client has something
    /// to show without a hosted backend.
    pub fn demo() -> Self {
        let backend = Self::new();
        backend.seed_profile(Profile {
            id: "demo-sarah".into(),
            username: Some("Sarah".into()),
            status: Some(Status::Available),
            location: Some("Blue Bottle Coffee".into()),
            available_until: Some("17:30".into()),
            avatar_url: Some("https://i.pravatar.cc/150?u=sarah".into()),
            message: Some("Grabbing coffee, come join!".into()),
            coordinates: Some(Coordinates {
                lat: 40.7128,
                lng: -74.0060,
            }),
            ..Default::default()
        });
        backend.seed_profile(Profile {
            id: "demo-mike".into(),
            username: Some("Mike".into()),
            status: Some(Status::Busy),
            location: Some("Work".into()),
            available_until: Some("19:00".into()),
            avatar_url: Some("https://i.pravatar.cc/150?u=mike".into()),
            message: Some("In meetings all day.".into()),
            coordinates: Some(Coordinates {
                lat: 40.7580,
                lng: -73.9855,
            }),
            ..Default::default()
        });
        backend
    }

    /// Store a profile without announcing it.
    pub fn seed_profile(&self, profile: Profile) {
        self.inner.lock().profiles.push(profile);
    }

    /// Store a message without announcing it.
    pub fn seed_message(&self, user_id: &str, text: &str) -> MessageRow {
        let row = new_row(user_id, text);
        self.inner.lock().messages.push(row.clone());
        row
    }

    /// Register an account that can sign in with a password.
    pub fn add_account(&self, email: &str, password: &str) -> String {
        let user_id = Uuid::new_v4().to_string();
        self.inner.lock().accounts.push(Account {
            user_id: user_id.clone(),
            email: email.into(),
            password: password.into(),
        });
        user_id
    }

    /// Simulate another client changing a profile: store it and announce it.
    pub fn push_profile_change(&self, kind: ChangeKind, record: ProfileRecord) {
        {
            let mut inner = self.inner.lock();
            match inner.profiles.iter_mut().find(|p| p.id == record.id) {
                Some(existing) => existing.apply(&record.fields),
                None => inner.profiles.push(Profile::from_record(&record)),
            }
        }
        self.publish(BackendEvent::Profile { kind, record });
    }

    /// Simulate another client posting a message.
    pub fn push_message(&self, user_id: &str, text: &str) -> MessageRow {
        let row = self.seed_message(user_id, text);
        self.publish(BackendEvent::Message {
            kind: ChangeKind::Insert,
            record: row.clone(),
        });
        row
    }

    /// Announce an arbitrary event without touching stored rows.
    pub fn publish(&self, event: BackendEvent) {
        self.bus.lock().publish(event);
    }

    pub fn fail(&self, op: Op) {
        self.inner.lock().failing.insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.inner.lock().failing.remove(&op);
    }

    pub fn set_latency(&self, op: Op, latency: Duration) {
        self.inner.lock().latency.insert(op, latency);
    }

    /// Drop the realtime echo of message inserts.
    pub fn mute_message_echo(&self, mute: bool) {
        self.inner.lock().mute_message_echo = mute;
    }

    /// Every profile update received, in order.
    pub fn profile_writes(&self) -> Vec<(String, ProfilePatch)> {
        self.inner.lock().profile_writes.clone()
    }

    pub fn message_inserts(&self) -> usize {
        self.inner.lock().message_inserts
    }

    pub fn summary_batches(&self) -> usize {
        self.inner.lock().summary_batches
    }

    pub fn profile(&self, id: &str) -> Option<Profile> {
        self.inner.lock().profiles.iter().find(|p| p.id == id).cloned()
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Bytes> {
        self.inner
            .lock()
            .objects
            .get(&format!("{bucket}/{path}"))
            .cloned()
    }

    async fn enter(&self, op: Op) -> Result<()> {
        let latency = self.inner.lock().latency.get(&op).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.lock().failing.contains(&op) {
            return Err(BackendError::Transport(format!("{op:?} failed")));
        }
        Ok(())
    }

    fn open_session(&self, user_id: String, email: Option<String>, anonymous: bool) -> Session {
        let session = Session {
            user_id,
            email,
            access_token: Uuid::new_v4().to_string(),
            anonymous,
        };
        self.inner.lock().session = Some(session.clone());
        self.publish(BackendEvent::Session {
            session: Some(session.clone()),
        });
        session
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn new_row(user_id: &str, text: &str) -> MessageRow {
    MessageRow {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.into(),
        text: text.into(),
        created_at: OffsetDateTime::now_utc(),
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn subscribe(&self) -> UnboundedReceiver<BackendEvent> {
        self.bus.lock().subscribe_all()
    }

    async fn current_session(&self) -> Result<Option<Session>> {
        Ok(self.inner.lock().session.clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        self.enter(Op::SignIn).await?;
        let user_id = {
            let inner = self.inner.lock();
            inner
                .accounts
                .iter()
                .find(|a| a.email.eq_ignore_ascii_case(email) && a.password == password)
                .map(|a| a.user_id.clone())
        };
        let user_id =
            user_id.ok_or_else(|| BackendError::Unauthorized("Invalid login credentials".into()))?;
        Ok(self.open_session(user_id, Some(email.into()), false))
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session> {
        self.enter(Op::SignIn).await?;
        let exists = self
            .inner
            .lock()
            .accounts
            .iter()
            .any(|a| a.email.eq_ignore_ascii_case(email));
        if exists {
            return Err(BackendError::Unauthorized("User already registered".into()));
        }
        let user_id = self.add_account(email, password);
        Ok(self.open_session(user_id, Some(email.into()), false))
    }

    async fn sign_in_anonymously(&self) -> Result<Session> {
        self.enter(Op::SignIn).await?;
        Ok(self.open_session(Uuid::new_v4().to_string(), None, true))
    }

    async fn sign_out(&self) -> Result<()> {
        self.inner.lock().session = None;
        self.publish(BackendEvent::Session { session: None });
        Ok(())
    }

    async fn fetch_profile(&self, id: &str) -> Result<Option<Profile>> {
        self.enter(Op::FetchProfile).await?;
        Ok(self.profile(id))
    }

    async fn fetch_profiles(&self) -> Result<Vec<Profile>> {
        self.enter(Op::FetchProfiles).await?;
        Ok(self.inner.lock().profiles.clone())
    }

    async fn fetch_profile_summary(&self, id: &str) -> Result<Option<ProfileSummary>> {
        self.enter(Op::FetchSummaries).await?;
        Ok(self.profile(id).map(|p| p.summary()))
    }

    async fn fetch_profile_summaries(&self, ids: &[String]) -> Result<Vec<ProfileSummary>> {
        self.enter(Op::FetchSummaries).await?;
        let mut inner = self.inner.lock();
        inner.summary_batches += 1;
        Ok(inner
            .profiles
            .iter()
            .filter(|p| ids.contains(&p.id))
            .map(Profile::summary)
            .collect())
    }

    async fn update_profile(&self, id: &str, patch: &ProfilePatch) -> Result<()> {
        self.enter(Op::UpdateProfile).await?;
        let updated = {
            let mut inner = self.inner.lock();
            inner.profile_writes.push((id.to_string(), patch.clone()));
            inner.profiles.iter_mut().find(|p| p.id == id).map(|p| {
                p.apply(patch);
                ProfileRecord::from(&*p)
            })
        };
        if let Some(record) = updated {
            self.publish(BackendEvent::Profile {
                kind: ChangeKind::Update,
                record,
            });
        }
        Ok(())
    }

    async fn upsert_profile(&self, profile: &NewProfile) -> Result<()> {
        self.enter(Op::UpsertProfile).await?;
        let (kind, record) = {
            let mut inner = self.inner.lock();
            let taken = inner.profiles.iter().any(|p| {
                p.id != profile.id
                    && p.username
                        .as_deref()
                        .is_some_and(|u| u.eq_ignore_ascii_case(&profile.username))
            });
            if taken {
                return Err(BackendError::Conflict(format!(
                    "username {} already taken",
                    profile.username
                )));
            }
            let patch = ProfilePatch {
                username: Some(profile.username.clone()),
                status: Some(profile.status.clone()),
                avatar_url: Some(Some(profile.avatar_url.clone())),
                ..Default::default()
            };
            match inner.profiles.iter_mut().find(|p| p.id == profile.id) {
                Some(existing) => {
                    existing.apply(&patch);
                    (ChangeKind::Update, ProfileRecord::from(&*existing))
                }
                None => {
                    let record = ProfileRecord {
                        id: profile.id.clone(),
                        fields: patch,
                    };
                    inner.profiles.push(Profile::from_record(&record));
                    (ChangeKind::Insert, record)
                }
            }
        };
        self.publish(BackendEvent::Profile { kind, record });
        Ok(())
    }

    async fn fetch_messages(&self, limit: usize) -> Result<Vec<MessageRow>> {
        self.enter(Op::FetchMessages).await?;
        let mut messages = self.inner.lock().messages.clone();
        messages.sort_by_key(|m| m.created_at);
        messages.truncate(limit);
        Ok(messages)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.enter(Op::InsertMessage).await?;
        let (row, muted) = {
            let mut inner = self.inner.lock();
            inner.message_inserts += 1;
            let row = new_row(&message.user_id, &message.text);
            inner.messages.push(row.clone());
            (row, inner.mute_message_echo)
        };
        if !muted {
            self.publish(BackendEvent::Message {
                kind: ChangeKind::Insert,
                record: row,
            });
        }
        Ok(())
    }

    async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        _content_type: &str,
    ) -> Result<String> {
        self.enter(Op::Upload).await?;
        self.inner
            .lock()
            .objects
            .insert(format!("{bucket}/{path}"), data);
        Ok(format!("memory://{bucket}/{path}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_echoed() {
        let backend = MemoryBackend::demo();
        let mut rx = backend.subscribe();
        backend
            .update_profile("demo-mike", &ProfilePatch::status("Available"))
            .await
            .unwrap();
        match rx.recv().await.unwrap() {
            BackendEvent::Profile { kind, record } => {
                assert_eq!(kind, ChangeKind::Update);
                assert_eq!(record.fields.username.as_deref(), Some("Mike"));
                assert_eq!(record.fields.status, Some(Status::Available));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_taken_username() {
        let backend = MemoryBackend::demo();
        let res = backend
            .upsert_profile(&NewProfile {
                id: "new".into(),
                username: "sarah".into(),
                status: Status::Available,
                avatar_url: String::new(),
            })
            .await;
        assert!(res.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn history_is_oldest_first_and_bounded() {
        let backend = MemoryBackend::new();
        for i in 0..5 {
            backend.seed_message("u", &format!("m{i}"));
        }
        let msgs = backend.fetch_messages(3).await.unwrap();
        let texts: Vec<_> = msgs.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["m0", "m1", "m2"]);
    }

    #[tokio::test]
    async fn password_sign_in_checks_credentials() {
        let backend = MemoryBackend::new();
        backend.add_account("a@example.com", "hunter22");
        assert!(matches!(
            backend.sign_in_with_password("a@example.com", "nope").await,
            Err(BackendError::Unauthorized(_))
        ));
        let session = backend
            .sign_in_with_password("a@example.com", "hunter22")
            .await
            .unwrap();
        assert_eq!(
            backend.current_session().await.unwrap().unwrap().user_id,
            session.user_id
        );
    }
}
