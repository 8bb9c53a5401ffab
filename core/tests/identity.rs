use std::sync::Arc;

use bytes::Bytes;
use friendhub_core::api::{NewProfile, Status};
use friendhub_core::identity::{
    AuthFlow, FormState, AVATAR_UPLOAD_FAILED, GUEST_NAME, PLACEHOLDER_AVATAR,
};
use friendhub_core::memory::Op;
use friendhub_core::{Backend, MemoryBackend};

fn flow(backend: &Arc<MemoryBackend>) -> AuthFlow {
    AuthFlow::new(backend.clone())
}

#[tokio::test]
async fn login_reports_a_single_error() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_account("pat@example.com", "secret1");
    let mut auth = flow(&backend);

    assert!(auth.login("pat@example.com", "wrong").await.is_none());
    assert!(!auth.state().loading);
    assert_eq!(auth.state().error.as_deref(), Some("Invalid login credentials"));

    assert!(auth.login("not-an-email", "secret1").await.is_none());
    assert_eq!(
        auth.state().error.as_deref(),
        Some("Please enter a valid email address")
    );

    let session = auth.login("pat@example.com", "secret1").await.unwrap();
    assert!(auth.state().error.is_none());
    assert!(!session.anonymous);
}

#[tokio::test]
async fn sign_up_creates_the_profile_row() {
    let backend = Arc::new(MemoryBackend::new());
    let mut auth = flow(&backend);

    let session = auth
        .sign_up(" Pat ", "pat@example.com", "secret1")
        .await
        .unwrap();
    let profile = backend.profile(&session.user_id).unwrap();
    assert_eq!(profile.username.as_deref(), Some("Pat"));
    assert_eq!(profile.status, Some(Status::Available));
    assert_eq!(profile.avatar_url.as_deref(), Some(PLACEHOLDER_AVATAR));
}

#[tokio::test]
async fn sign_up_tolerates_profile_conflicts() {
    let backend = Arc::new(MemoryBackend::new());
    backend
        .upsert_profile(&NewProfile {
            id: "other".into(),
            username: "Pat".into(),
            status: Status::Busy,
            avatar_url: String::new(),
        })
        .await
        .unwrap();
    let mut auth = flow(&backend);

    let session = auth.sign_up("pat", "pat@example.com", "secret1").await;
    assert!(session.is_some());
    assert!(auth.state().error.is_none());
    assert!(backend.profile(&session.unwrap().user_id).is_none());
}

#[tokio::test]
async fn sign_up_validates_before_calling_the_backend() {
    let backend = Arc::new(MemoryBackend::new());
    let mut auth = flow(&backend);

    assert!(auth.sign_up("", "pat@example.com", "secret1").await.is_none());
    assert_eq!(auth.state().error.as_deref(), Some("Username is required"));
    assert!(auth.sign_up("Pat", "pat@example.com", "12345").await.is_none());
    assert_eq!(
        auth.state().error.as_deref(),
        Some("Password must be at least 6 characters")
    );
    assert!(backend.current_session().await.unwrap().is_none());
}

#[tokio::test]
async fn guest_join_seeds_a_guest_profile() {
    let backend = Arc::new(MemoryBackend::new());
    let mut auth = flow(&backend);

    let session = auth.join_as_guest().await.unwrap();
    assert!(session.anonymous);
    let profile = backend.profile(&session.user_id).unwrap();
    assert_eq!(profile.username.as_deref(), Some(GUEST_NAME));
}

#[tokio::test]
async fn guest_join_failure_is_reported() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail(Op::SignIn);
    let mut auth = flow(&backend);

    assert!(auth.join_as_guest().await.is_none());
    assert!(auth.state().error.is_some());
    assert!(!auth.state().loading);
}

#[tokio::test]
async fn avatar_upload_updates_the_profile() {
    let backend = Arc::new(MemoryBackend::new());
    let mut auth = flow(&backend);
    let session = auth.sign_up("Pat", "pat@example.com", "secret1").await.unwrap();

    let url = auth
        .upload_avatar("me.png", Bytes::from_static(b"\x89PNG"))
        .await
        .unwrap();
    assert!(url.starts_with("memory://avatars/"));
    assert!(url.ends_with(".png"));
    let path = url.trim_start_matches("memory://avatars/");
    assert!(backend.object("avatars", path).is_some());
    let profile = backend.profile(&session.user_id).unwrap();
    assert_eq!(profile.avatar_url.as_deref(), Some(url.as_str()));
}

#[tokio::test]
async fn avatar_upload_failure_message() {
    let backend = Arc::new(MemoryBackend::new());
    backend.fail(Op::Upload);
    let mut auth = flow(&backend);

    assert!(auth.upload_avatar("me.png", Bytes::new()).await.is_none());
    assert_eq!(auth.state().error.as_deref(), Some(AVATAR_UPLOAD_FAILED));
}

#[tokio::test]
async fn sign_out_clears_the_session() {
    let backend = Arc::new(MemoryBackend::new());
    let mut auth = flow(&backend);
    auth.join_as_guest().await.unwrap();

    auth.sign_out().await;
    assert!(backend.current_session().await.unwrap().is_none());
    assert_eq!(*auth.state(), FormState::default());
}
