use backend_api::{
    BackendEvent, ChangeKind, MessageRow, NewMessage, ProfilePatch, ProfileRecord, Session,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::roster::Roster;
use crate::status;
use crate::store::Store;
use crate::transcript::{distinct_authors, ChatEntry, Transcript, HISTORY_LIMIT};

/// Keeps a [`Store`] in sync with the backend.
///
/// Backend notifications are applied one at a time by [`SyncEngine::consume`];
/// network calls made while handling one notification hold back the next.
/// User actions ([`update_status`](Self::update_status),
/// [`send_message`](Self::send_message), ...) may be called from any task.
///
/// Optimistic status writes are never rolled back: if the write fails the
/// local profile stays ahead of the backend until the next full reload.
#[derive(Clone)]
pub struct SyncEngine {
    backend: Option<Arc<dyn Backend>>,
    store: Store,
    history_limit: usize,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend: Some(backend),
            store: Store::new(),
            history_limit: HISTORY_LIMIT,
        }
    }

    /// Engine with no backend: notifications can still be applied (e.g. from
    /// a replay) but nothing is fetched or written.
    pub fn offline() -> Self {
        Self {
            backend: None,
            store: Store::new(),
            history_limit: HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(&self) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run().await })
    }

    /// Subscribe to the backend, establish the current session and apply
    /// notifications until the stream closes.
    pub async fn run(&self) {
        let Some(backend) = self.backend.clone() else {
            warn!("no backend configured; nothing to synchronize");
            self.store.teardown();
            return;
        };
        let events = backend.subscribe();
        match backend.current_session().await {
            Ok(session) => self.establish_session(session).await,
            Err(e) => {
                error!(error = %e, "failed to read current session");
                self.store.teardown();
            }
        }
        self.consume(events).await;
    }

    /// Apply notifications in arrival order until the channel closes.
    pub async fn consume(&self, mut events: UnboundedReceiver<BackendEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        debug!("notification stream closed");
    }

    pub async fn dispatch(&self, event: BackendEvent) {
        match event {
            BackendEvent::Session { session } => self.establish_session(session).await,
            BackendEvent::Profile { kind, record } => self.on_remote_profile_change(kind, &record),
            BackendEvent::Message {
                kind: ChangeKind::Insert,
                record,
            } => self.on_new_message(record).await,
            BackendEvent::Message {
                kind: ChangeKind::Update,
                record,
            } => debug!(id = %record.id, "ignoring message update"),
        }
    }

    /// React to a session appearing or disappearing. A new session rebuilds
    /// the local profile, roster and transcript from scratch.
    pub async fn establish_session(&self, session: Option<Session>) {
        let Some(session) = session else {
            info!("session cleared");
            self.store.teardown();
            return;
        };
        let user_id = session.user_id.clone();
        info!(user_id = %user_id, "session established");
        let generation = self.store.begin_session(session);
        let Some(backend) = self.backend.clone() else {
            self.store.finish_loading(generation);
            self.store.finish_history(generation, None);
            return;
        };

        match backend.fetch_profile(&user_id).await {
            Ok(Some(profile)) => self.store.set_current_user(generation, profile),
            Ok(None) => warn!(user_id = %user_id, "no profile row for signed-in user"),
            Err(e) => error!(error = %e, "failed to fetch own profile"),
        }
        match backend.fetch_profiles().await {
            Ok(profiles) => self
                .store
                .set_roster(generation, Roster::from_profiles(profiles, &user_id)),
            Err(e) => error!(error = %e, "failed to fetch roster"),
        }
        self.store.finish_loading(generation);
        self.fetch_history(generation).await;
    }

    /// Merge an insert/update of some profile row.
    pub fn on_remote_profile_change(&self, kind: ChangeKind, record: &ProfileRecord) {
        self.store.merge_profile(kind, record);
    }

    /// Fetch the oldest messages and their authors, replacing the transcript.
    pub async fn load_history(&self) {
        let generation = self.store.begin_history();
        self.fetch_history(generation).await;
    }

    async fn fetch_history(&self, generation: u64) {
        let Some(backend) = self.backend.clone() else {
            self.store.finish_history(generation, None);
            return;
        };
        let transcript = match backend.fetch_messages(self.history_limit).await {
            Ok(messages) => {
                let ids = distinct_authors(&messages);
                let authors = if ids.is_empty() {
                    Vec::new()
                } else {
                    backend
                        .fetch_profile_summaries(&ids)
                        .await
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "failed to resolve message authors");
                            Vec::new()
                        })
                };
                Some(Transcript::from_history(messages, &authors))
            }
            Err(e) => {
                error!(error = %e, "failed to fetch chat history");
                None
            }
        };
        self.store.finish_history(generation, transcript);
    }

    /// Resolve the author of a freshly inserted message and append it.
    pub async fn on_new_message(&self, message: MessageRow) {
        let Some(generation) = self.store.active_generation() else {
            debug!(id = %message.id, "message arrived without a session");
            return;
        };
        let author = match &self.backend {
            Some(backend) => backend
                .fetch_profile_summary(&message.user_id)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, user_id = %message.user_id, "failed to resolve author");
                    None
                }),
            None => None,
        };
        self.store
            .append_message(generation, ChatEntry { message, author });
    }

    /// Flip the privacy toggle and, if the local profile is loaded, write the
    /// matching location fields.
    pub async fn set_location_sharing(&self, enabled: bool) {
        if let Some(current) = self.store.set_location_sharing(enabled) {
            self.update_status(status::sharing_patch(enabled, &current))
                .await;
        }
    }

    /// Merge `patch` into the local profile immediately, then persist it.
    /// Failures are logged; the local profile is not rolled back.
    pub async fn update_status(&self, patch: ProfilePatch) {
        let Some(backend) = self.backend.clone() else {
            return;
        };
        let Some((user_id, patch)) = self.store.apply_local_status(patch) else {
            debug!("status update without a local profile");
            return;
        };
        if let Err(e) = backend.update_profile(&user_id, &patch).await {
            error!(error = %e, "failed to persist status update");
        }
    }

    /// Send a chat message. Returns `false` without doing anything for blank
    /// text, no session, or no backend. The message shows up in the
    /// transcript only once the backend echoes the insert.
    pub async fn send_message(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }
        let Some(backend) = self.backend.clone() else {
            return false;
        };
        let Some(user_id) = self.store.read(|s| s.local_id().map(str::to_owned)) else {
            return false;
        };
        self.store.clear_draft();
        let message = NewMessage {
            user_id,
            text: text.to_string(),
        };
        if let Err(e) = backend.insert_message(&message).await {
            error!(error = %e, "failed to send message");
        }
        true
    }

    /// Send whatever is in the composer.
    pub async fn send_draft(&self) -> bool {
        let draft = self.store.read(|s| s.draft.clone());
        self.send_message(&draft).await
    }
}
