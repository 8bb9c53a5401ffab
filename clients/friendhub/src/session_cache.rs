use anyhow::Result;
use friendhub_core::api::Session;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

/// Keeps the last session on disk so the next start can skip sign-in.
pub struct SessionCache {
    file: PathBuf,
}

impl SessionCache {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;
        Ok(Self {
            file: data_dir.join("session.json"),
        })
    }

    /// The cached session, if any. An unreadable cache counts as empty.
    pub async fn load(&self) -> Option<Session> {
        let bytes = fs::read(&self.file).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(error = %e, path = %self.file.display(), "ignoring corrupt session cache");
                None
            }
        }
    }

    pub async fn store(&self, session: &Session) -> Result<()> {
        let bytes = serde_json::to_vec(session)?;
        fs::write(&self.file, bytes).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.file).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
