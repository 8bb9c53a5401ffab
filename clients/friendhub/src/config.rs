use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use friendhub_core::call::{DEFAULT_DOMAIN, DEFAULT_ROOM};
use friendhub_core::transcript::HISTORY_LIMIT;
use serde::Deserialize;
use url::Url;

use crate::cli::Cli;

/// Hosted backend endpoint and key.
#[derive(Clone)]
pub struct BackendConfig {
    pub url: Url,
    pub anon_key: String,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url.as_str())
            .field("anon_key", &"<redacted>")
            .finish()
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// `None` runs the client in demo mode.
    pub backend: Option<BackendConfig>,
    pub history_limit: usize,
    pub call_domain: String,
    pub call_room: String,
    /// Whether verbose logging is enabled.
    pub logging_enabled: bool,
    /// Where the session cache lives.
    pub data_dir: PathBuf,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    backend: FileBackend,
    #[serde(default)]
    chat: FileChat,
    #[serde(default)]
    call: FileCall,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FileBackend {
    url: Option<String>,
    anon_key: Option<String>,
}

#[derive(Deserialize)]
struct FileChat {
    #[serde(default = "default_history_limit")]
    history_limit: usize,
}

#[derive(Deserialize)]
struct FileCall {
    #[serde(default = "default_domain")]
    domain: String,
    #[serde(default = "default_room")]
    room: String,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_history_limit() -> usize {
    HISTORY_LIMIT
}

fn default_domain() -> String {
    DEFAULT_DOMAIN.into()
}

fn default_room() -> String {
    DEFAULT_ROOM.into()
}

fn default_logging() -> bool {
    true
}

impl Default for FileChat {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

impl Default for FileCall {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            room: default_room(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut url: Option<String> = None;
        let mut anon_key: Option<String> = None;
        let mut history_limit = default_history_limit();
        let mut call_domain = default_domain();
        let mut call_room = default_room();
        let mut logging = default_logging();

        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("FRIENDHUB_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(default_config_path);

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            url = file_cfg.backend.url;
            anon_key = file_cfg.backend.anon_key;
            history_limit = file_cfg.chat.history_limit;
            call_domain = file_cfg.call.domain;
            call_room = file_cfg.call.room;
            logging = file_cfg.logging.enabled;
        }

        // environment overrides
        if let Ok(u) = std::env::var("FRIENDHUB_URL") {
            url = Some(u);
        }
        if let Ok(k) = std::env::var("FRIENDHUB_ANON_KEY") {
            anon_key = Some(k);
        }
        if let Ok(l) = std::env::var("FRIENDHUB_LOGGING") {
            if let Ok(l) = l.parse::<bool>() {
                logging = l;
            }
        }
        if let Ok(h) = std::env::var("FRIENDHUB_HISTORY_LIMIT") {
            if let Ok(h) = h.parse::<usize>() {
                history_limit = h;
            }
        }

        // CLI overrides
        if let Some(u) = &cli.url {
            url = Some(u.clone());
        }
        if let Some(k) = &cli.anon_key {
            anon_key = Some(k.clone());
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(h) = cli.history_limit {
            history_limit = h;
        }

        if !(1..=1000).contains(&history_limit) {
            anyhow::bail!("invalid_history_limit");
        }

        let backend = match url.filter(|u| !u.trim().is_empty()) {
            Some(u) => {
                let url = Url::parse(u.trim()).context("invalid backend url")?;
                let anon_key = anon_key
                    .filter(|k| !k.trim().is_empty())
                    .context("backend url set without an anon key")?;
                Some(BackendConfig { url, anon_key })
            }
            None => None,
        };

        Ok(Self {
            backend,
            history_limit,
            call_domain,
            call_room,
            logging_enabled: logging,
            data_dir: default_data_dir(),
        })
    }

    pub fn demo_mode(&self) -> bool {
        self.backend.is_none()
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "friendhub", "friendhub")
}

pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().join("friendhub.toml"))
        .unwrap_or_else(|| PathBuf::from("friendhub.toml"))
}

/// Determine the data directory, honouring `FRIENDHUB_DATA_DIR`.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FRIENDHUB_DATA_DIR") {
        PathBuf::from(dir)
    } else if let Some(p) = project_dirs() {
        p.data_dir().to_path_buf()
    } else {
        PathBuf::from("./friendhub_data")
    }
}
