use backend_api::{ChangeKind, Profile, ProfilePatch, ProfileRecord, Session};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use crate::roster::{Merge, Roster};
use crate::status;
use crate::transcript::{ChatEntry, Transcript};

/// Client-side view of the session, the local profile, friends and chat.
#[derive(Debug, Clone)]
pub struct AppState {
    pub session: Option<Session>,
    pub current_user: Option<Profile>,
    pub roster: Roster,
    pub transcript: Transcript,
    /// Local privacy toggle; seeded from the profile row on sign-in.
    pub location_sharing: bool,
    /// Session data (profile and roster) still loading.
    pub loading: bool,
    /// Chat history still loading.
    pub chat_loading: bool,
    /// Unsent chat input.
    pub draft: String,
    generation: u64,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            session: None,
            current_user: None,
            roster: Roster::new(),
            transcript: Transcript::new(),
            location_sharing: true,
            loading: true,
            chat_loading: true,
            draft: String::new(),
            generation: 0,
        }
    }
}

impl AppState {
    /// Identity of the signed-in user.
    pub fn local_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user_id.as_str())
    }

    /// Bumped on every session change; async work started under an older
    /// generation must not write its result.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Change notification for presentation consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Session,
    LocalProfile,
    Roster,
    Transcript,
    Message(ChatEntry),
}

/// Shared handle to the client state. Cloning is cheap; all clones see the
/// same state. The lock is never held across an await.
#[derive(Clone)]
pub struct Store {
    state: Arc<Mutex<AppState>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Store {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(AppState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn snapshot(&self) -> AppState {
        self.state.lock().clone()
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        self.state.lock().draft = text.into();
    }

    fn emit(&self, event: StoreEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn begin_session(&self, session: Session) -> u64 {
        let generation = {
            let mut s = self.state.lock();
            if s.local_id() != Some(session.user_id.as_str()) {
                s.current_user = None;
                s.location_sharing = true;
            }
            s.session = Some(session);
            s.generation += 1;
            s.roster.clear();
            s.transcript.clear();
            s.loading = true;
            s.chat_loading = true;
            s.generation
        };
        self.emit(StoreEvent::Session);
        self.emit(StoreEvent::Roster);
        self.emit(StoreEvent::Transcript);
        generation
    }

    pub(crate) fn teardown(&self) {
        {
            let mut s = self.state.lock();
            s.session = None;
            s.current_user = None;
            s.generation += 1;
            s.roster.clear();
            s.transcript.clear();
            s.location_sharing = true;
            s.loading = false;
            s.chat_loading = false;
            s.draft.clear();
        }
        self.emit(StoreEvent::Session);
        self.emit(StoreEvent::LocalProfile);
        self.emit(StoreEvent::Roster);
        self.emit(StoreEvent::Transcript);
    }

    /// Run `f` only if no session change happened since `generation`.
    fn guarded<R>(&self, generation: u64, f: impl FnOnce(&mut AppState) -> R) -> Option<R> {
        let mut s = self.state.lock();
        if s.generation != generation {
            debug!(
                started = generation,
                current = s.generation,
                "discarding result for a previous session"
            );
            return None;
        }
        Some(f(&mut s))
    }

    pub(crate) fn set_current_user(&self, generation: u64, profile: Profile) {
        let applied = self.guarded(generation, |s| {
            s.location_sharing = profile.shares_location();
            s.current_user = Some(profile);
        });
        if applied.is_some() {
            self.emit(StoreEvent::LocalProfile);
        }
    }

    pub(crate) fn set_roster(&self, generation: u64, roster: Roster) {
        if self.guarded(generation, |s| s.roster = roster).is_some() {
            self.emit(StoreEvent::Roster);
        }
    }

    pub(crate) fn finish_loading(&self, generation: u64) {
        self.guarded(generation, |s| s.loading = false);
    }

    pub(crate) fn begin_history(&self) -> u64 {
        let mut s = self.state.lock();
        s.chat_loading = true;
        s.generation
    }

    pub(crate) fn finish_history(&self, generation: u64, transcript: Option<Transcript>) {
        let replaced = self.guarded(generation, |s| {
            s.chat_loading = false;
            match transcript {
                Some(t) => {
                    s.transcript = t;
                    true
                }
                None => false,
            }
        });
        if replaced == Some(true) {
            self.emit(StoreEvent::Transcript);
        }
    }

    /// Generation of the active session, if any.
    pub(crate) fn active_generation(&self) -> Option<u64> {
        let s = self.state.lock();
        s.session.as_ref().map(|_| s.generation)
    }

    pub(crate) fn append_message(&self, generation: u64, entry: ChatEntry) {
        let appended = self.guarded(generation, |s| s.transcript.push(entry.clone()));
        if appended.is_some() {
            self.emit(StoreEvent::Message(entry));
        }
    }

    /// Merge a remote profile change. Changes to the local user overwrite
    /// the local profile; everything else goes to the roster.
    pub(crate) fn merge_profile(&self, kind: ChangeKind, record: &ProfileRecord) {
        let event = {
            let mut s = self.state.lock();
            let Some(local_id) = s.local_id().map(str::to_owned) else {
                debug!(id = %record.id, "profile change without a session");
                return;
            };
            if record.id == local_id {
                let sharing = match s.current_user.as_mut() {
                    Some(me) => {
                        me.apply(&record.fields);
                        me.shares_location()
                    }
                    None => {
                        let me = Profile::from_record(record);
                        let sharing = me.shares_location();
                        s.current_user = Some(me);
                        sharing
                    }
                };
                // Another device may have toggled the privacy flag.
                if record.fields.location_sharing.is_some() {
                    s.location_sharing = sharing;
                }
                Some(StoreEvent::LocalProfile)
            } else {
                match s.roster.apply(kind, record, &local_id) {
                    Merge::Ignored => None,
                    Merge::Inserted | Merge::Updated => Some(StoreEvent::Roster),
                }
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    /// Flip the privacy toggle and return the local profile, if loaded.
    pub(crate) fn set_location_sharing(&self, enabled: bool) -> Option<Profile> {
        let mut s = self.state.lock();
        s.location_sharing = enabled;
        s.current_user.clone()
    }

    /// Apply a status patch optimistically. Returns the user id and the patch
    /// to persist, or `None` when there is no local profile.
    pub(crate) fn apply_local_status(
        &self,
        patch: ProfilePatch,
    ) -> Option<(String, ProfilePatch)> {
        let result = {
            let mut s = self.state.lock();
            let patch = status::guard_location(s.location_sharing, patch);
            let me = s.current_user.as_mut()?;
            me.apply(&patch);
            (me.id.clone(), patch)
        };
        self.emit(StoreEvent::LocalProfile);
        Some(result)
    }

    pub(crate) fn clear_draft(&self) {
        self.state.lock().draft.clear();
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str) -> Session {
        Session {
            user_id: id.into(),
            email: None,
            access_token: "t".into(),
            anonymous: false,
        }
    }

    #[test]
    fn stale_generation_is_discarded() {
        let store = Store::new();
        let first = store.begin_session(session("me"));
        store.teardown();
        store.set_roster(
            first,
            Roster::from_profiles(
                vec![Profile {
                    id: "1".into(),
                    ..Default::default()
                }],
                "me",
            ),
        );
        assert!(store.read(|s| s.roster.is_empty()));
    }

    #[test]
    fn self_change_goes_to_local_profile() {
        let store = Store::new();
        let generation = store.begin_session(session("me"));
        store.set_current_user(
            generation,
            Profile {
                id: "me".into(),
                username: Some("Me".into()),
                ..Default::default()
            },
        );
        store.merge_profile(
            ChangeKind::Update,
            &ProfileRecord {
                id: "me".into(),
                fields: ProfilePatch::status("Busy"),
            },
        );
        let snap = store.snapshot();
        assert!(snap.roster.is_empty());
        let me = snap.current_user.unwrap();
        assert_eq!(me.username.as_deref(), Some("Me"));
        assert_eq!(me.status, Some("Busy".into()));
    }

    #[test]
    fn profile_changes_need_a_session() {
        let store = Store::new();
        store.merge_profile(
            ChangeKind::Insert,
            &ProfileRecord {
                id: "1".into(),
                fields: ProfilePatch::default(),
            },
        );
        assert!(store.read(|s| s.roster.is_empty()));
    }

    #[test]
    fn remote_privacy_toggle_updates_flag() {
        let store = Store::new();
        let generation = store.begin_session(session("me"));
        store.set_current_user(
            generation,
            Profile {
                id: "me".into(),
                ..Default::default()
            },
        );
        store.merge_profile(
            ChangeKind::Update,
            &ProfileRecord {
                id: "me".into(),
                fields: ProfilePatch {
                    location_sharing: Some(false),
                    ..Default::default()
                },
            },
        );
        assert!(!store.read(|s| s.location_sharing));
        store.merge_profile(
            ChangeKind::Update,
            &ProfileRecord {
                id: "me".into(),
                fields: ProfilePatch::status("Busy"),
            },
        );
        assert!(!store.read(|s| s.location_sharing));
    }

    #[test]
    fn sign_in_seeds_privacy_flag_from_profile() {
        let store = Store::new();
        let generation = store.begin_session(session("me"));
        store.set_current_user(
            generation,
            Profile {
                id: "me".into(),
                location_sharing: Some(false),
                ..Default::default()
            },
        );
        assert!(!store.read(|s| s.location_sharing));
    }
}
