use anyhow::{Context, Result};
use friendhub_core::api::{BackendEvent, Session};
use friendhub_core::ipc::read_event;
use friendhub_core::{AppState, SyncEngine};
use std::path::Path;
use tokio::{fs::File, io::BufReader};
use tracing::info;

/// Apply a recorded notification stream to an offline engine signed in as
/// `user_id` and return the resulting state.
pub async fn replay_file(path: &Path, user_id: &str) -> Result<AppState> {
    let file = File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let engine = SyncEngine::offline();
    engine
        .establish_session(Some(Session {
            user_id: user_id.to_string(),
            email: None,
            access_token: String::new(),
            anonymous: true,
        }))
        .await;
    let mut applied = 0usize;
    while let Some(event) = read_event(&mut reader).await? {
        // The replay identity is fixed; recorded sign-outs would discard
        // everything applied so far.
        if matches!(event, BackendEvent::Session { .. }) {
            continue;
        }
        engine.dispatch(event).await;
        applied += 1;
    }
    info!(applied, "replay finished");
    Ok(engine.store().snapshot())
}
