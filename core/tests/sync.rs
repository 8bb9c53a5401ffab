use std::sync::Arc;
use std::time::Duration;

use friendhub_core::api::{
    BackendEvent, ChangeKind, Coordinates, Profile, ProfilePatch, ProfileRecord, Status,
};
use friendhub_core::memory::Op;
use friendhub_core::status::GHOST_MODE;
use friendhub_core::{Backend, MemoryBackend, SyncEngine};
use tokio::sync::mpsc::UnboundedReceiver;

/// Apply every notification already queued, like the consumer loop would.
async fn drain(engine: &SyncEngine, rx: &mut UnboundedReceiver<BackendEvent>) {
    while let Ok(event) = rx.try_recv() {
        engine.dispatch(event).await;
    }
}

fn record(id: &str, fields: ProfilePatch) -> ProfileRecord {
    ProfileRecord {
        id: id.into(),
        fields,
    }
}

/// Demo backend with a password account whose profile row exists.
fn signed_up(backend: &MemoryBackend) -> String {
    let me = backend.add_account("me@example.com", "secret1");
    backend.seed_profile(Profile {
        id: me.clone(),
        username: Some("Me".into()),
        status: Some(Status::Available),
        coordinates: Some(Coordinates {
            lat: 51.5,
            lng: -0.12,
        }),
        ..Default::default()
    });
    me
}

async fn sign_in(
    backend: &Arc<MemoryBackend>,
) -> (SyncEngine, UnboundedReceiver<BackendEvent>, String) {
    let me = signed_up(backend);
    let engine = SyncEngine::new(backend.clone());
    let mut rx = backend.subscribe();
    backend
        .sign_in_with_password("me@example.com", "secret1")
        .await
        .unwrap();
    drain(&engine, &mut rx).await;
    (engine, rx, me)
}

#[tokio::test]
async fn sign_in_loads_profile_roster_and_history() {
    let backend = Arc::new(MemoryBackend::demo());
    backend.seed_message("demo-sarah", "hello");
    let (engine, _rx, me) = sign_in(&backend).await;

    let state = engine.store().snapshot();
    assert_eq!(state.local_id(), Some(me.as_str()));
    assert_eq!(state.current_user.unwrap().username.as_deref(), Some("Me"));
    let ids: Vec<_> = state.roster.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, ["demo-sarah", "demo-mike"]);
    assert!(!state.loading);
    assert!(!state.chat_loading);
    assert_eq!(state.transcript.len(), 1);
    assert_eq!(state.transcript.last().unwrap().author_name(), "Sarah");
}

#[tokio::test]
async fn update_then_insert_keeps_arrival_order() {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_profile(Profile {
        id: "1".into(),
        status: Some(Status::Available),
        ..Default::default()
    });
    let (engine, mut rx, _me) = sign_in(&backend).await;

    backend.push_profile_change(ChangeKind::Update, record("1", ProfilePatch::status("Busy")));
    drain(&engine, &mut rx).await;
    let roster = engine.store().read(|s| s.roster.clone());
    assert_eq!(roster.len(), 1);
    assert_eq!(roster.get("1").unwrap().status, Some(Status::Busy));

    backend.push_profile_change(ChangeKind::Insert, record("2", ProfilePatch::default()));
    drain(&engine, &mut rx).await;
    let ids: Vec<_> = engine
        .store()
        .read(|s| s.roster.iter().map(|p| p.id.clone()).collect::<Vec<_>>());
    assert_eq!(ids, ["1", "2"]);
}

#[tokio::test]
async fn update_for_unknown_friend_inserts_once() {
    let backend = Arc::new(MemoryBackend::new());
    let (engine, mut rx, _me) = sign_in(&backend).await;

    for _ in 0..3 {
        backend.push_profile_change(ChangeKind::Update, record("x", ProfilePatch::status("Busy")));
    }
    backend.push_profile_change(ChangeKind::Insert, record("x", ProfilePatch::default()));
    drain(&engine, &mut rx).await;

    let roster = engine.store().read(|s| s.roster.clone());
    assert_eq!(roster.len(), 1);
    assert_eq!(roster.get("x").unwrap().status, Some(Status::Busy));
}

#[tokio::test]
async fn own_status_is_optimistic_and_echo_skips_roster() {
    let backend = Arc::new(MemoryBackend::demo());
    let (engine, mut rx, me) = sign_in(&backend).await;

    engine.update_status(ProfilePatch::status("Busy")).await;
    let local = engine.store().read(|s| s.current_user.clone()).unwrap();
    assert_eq!(local.status, Some(Status::Busy));
    assert_eq!(backend.profile_writes().last().unwrap().0, me);

    drain(&engine, &mut rx).await;
    let state = engine.store().snapshot();
    assert!(state.roster.get(&me).is_none());
    assert_eq!(state.roster.len(), 2);
    assert_eq!(state.current_user.unwrap().status, Some(Status::Busy));
}

#[tokio::test]
async fn failed_write_is_not_rolled_back() {
    let backend = Arc::new(MemoryBackend::new());
    let (engine, _rx, _me) = sign_in(&backend).await;
    backend.fail(Op::UpdateProfile);

    engine.update_status(ProfilePatch::status("Busy")).await;

    let local = engine.store().read(|s| s.current_user.clone()).unwrap();
    assert_eq!(local.status, Some(Status::Busy));
    assert!(backend.profile_writes().is_empty());
}

#[tokio::test]
async fn ghost_mode_never_writes_a_position() {
    let backend = Arc::new(MemoryBackend::new());
    let (engine, mut rx, me) = sign_in(&backend).await;

    engine.set_location_sharing(false).await;
    let (_, toggle) = backend.profile_writes().pop().unwrap();
    assert_eq!(toggle.location_sharing, Some(false));
    assert_eq!(toggle.location, Some(Some(GHOST_MODE.into())));
    assert_eq!(toggle.coordinates, Some(None));
    drain(&engine, &mut rx).await;

    engine
        .update_status(ProfilePatch {
            status: Some(Status::Available),
            location: Some(Some("Home".into())),
            ..ProfilePatch::coordinates(Coordinates { lat: 1.0, lng: 2.0 })
        })
        .await;
    let (id, written) = backend.profile_writes().pop().unwrap();
    assert_eq!(id, me);
    assert_eq!(written.status, Some(Status::Available));
    assert_eq!(written.coordinates, None);
    assert_eq!(written.location, None);

    let local = engine.store().read(|s| s.current_user.clone()).unwrap();
    assert_eq!(local.coordinates, None);
    assert_eq!(local.location.as_deref(), Some(GHOST_MODE));
}

#[tokio::test]
async fn position_only_update_in_ghost_mode_writes_stripped_patch() {
    let backend = Arc::new(MemoryBackend::new());
    let (engine, _rx, _me) = sign_in(&backend).await;
    engine.set_location_sharing(false).await;
    let writes = backend.profile_writes().len();

    engine
        .update_status(ProfilePatch::coordinates(Coordinates { lat: 1.0, lng: 2.0 }))
        .await;
    let all = backend.profile_writes();
    assert_eq!(all.len(), writes + 1);
    let (_, patch) = all.last().unwrap();
    assert_eq!(patch.coordinates, None);
    assert_eq!(patch.location, None);
}

#[tokio::test]
async fn ghost_mode_from_another_device_stops_position_writes() {
    let backend = Arc::new(MemoryBackend::new());
    let (engine, mut rx, me) = sign_in(&backend).await;
    assert!(engine.store().read(|s| s.location_sharing));

    backend.push_profile_change(
        ChangeKind::Update,
        record(
            &me,
            ProfilePatch {
                location_sharing: Some(false),
                location: Some(Some(GHOST_MODE.into())),
                coordinates: Some(None),
                ..Default::default()
            },
        ),
    );
    drain(&engine, &mut rx).await;
    assert!(!engine.store().read(|s| s.location_sharing));

    engine
        .update_status(ProfilePatch::coordinates(Coordinates { lat: 1.0, lng: 2.0 }))
        .await;
    let writes = backend.profile_writes();
    let (id, patch) = writes.last().unwrap();
    assert_eq!(id, &me);
    assert_eq!(patch.coordinates, None);
    let own = engine.store().read(|s| s.current_user.clone()).unwrap();
    assert_eq!(own.coordinates, None);
}

#[tokio::test]
async fn late_roster_after_sign_out_is_discarded() {
    let backend = Arc::new(MemoryBackend::demo());
    let me = signed_up(&backend);
    backend.set_latency(Op::FetchProfiles, Duration::from_millis(150));
    let engine = SyncEngine::new(backend.clone());
    let session = backend
        .sign_in_with_password("me@example.com", "secret1")
        .await
        .unwrap();
    assert_eq!(session.user_id, me);

    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.establish_session(Some(session)).await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.establish_session(None).await;
    pending.await.unwrap();

    let state = engine.store().snapshot();
    assert!(state.session.is_none());
    assert!(state.current_user.is_none());
    assert!(state.roster.is_empty());
    assert!(state.transcript.is_empty());
}

#[tokio::test]
async fn failed_roster_fetch_clears_loading() {
    let backend = Arc::new(MemoryBackend::demo());
    backend.fail(Op::FetchProfiles);
    let (engine, _rx, _me) = sign_in(&backend).await;

    let state = engine.store().snapshot();
    assert!(!state.loading);
    assert!(state.roster.is_empty());
    assert!(state.current_user.is_some());
}

#[tokio::test]
async fn profile_changes_before_sign_in_are_ignored() {
    let backend = Arc::new(MemoryBackend::new());
    let engine = SyncEngine::new(backend.clone());
    let mut rx = backend.subscribe();
    backend.push_profile_change(ChangeKind::Insert, record("1", ProfilePatch::default()));
    drain(&engine, &mut rx).await;
    assert!(engine.store().read(|s| s.roster.is_empty()));
}

#[tokio::test]
async fn run_loop_follows_sign_out() {
    let backend = Arc::new(MemoryBackend::demo());
    signed_up(&backend);
    backend
        .sign_in_with_password("me@example.com", "secret1")
        .await
        .unwrap();
    let engine = SyncEngine::new(backend.clone());
    let mut store_events = engine.store().subscribe();
    let handle = engine.spawn();

    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.store().read(|s| s.loading || s.chat_loading) {
            let _ = store_events.recv().await;
        }
    })
    .await
    .unwrap();
    assert_eq!(engine.store().read(|s| s.roster.len()), 2);

    backend.sign_out().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.store().read(|s| s.session.is_some()) {
            let _ = store_events.recv().await;
        }
    })
    .await
    .unwrap();
    assert!(engine.store().read(|s| s.roster.is_empty()));
    handle.abort();
}
