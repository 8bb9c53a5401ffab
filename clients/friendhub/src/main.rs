use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use friendhub::{
    cli::{Cli, Command, RunArgs},
    config::Config,
    console, replay,
    rest::RestBackend,
    session_cache::SessionCache,
};
use friendhub_core::{AuthFlow, Backend, MemoryBackend, SyncEngine};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => run(cfg, args).await,
        Command::Replay { file, user } => {
            let state = replay::replay_file(&file, &user).await?;
            println!("friends:\n{}", console::render_roster(&state, false));
            println!("messages:");
            for entry in state.transcript.iter() {
                println!("{}", console::render_entry(entry, state.local_id()));
            }
            Ok(())
        }
        Command::Logout => {
            SessionCache::new(&cfg.data_dir).await?.clear().await?;
            println!("cached session removed");
            Ok(())
        }
    }
}

async fn connect(cfg: &Config) -> Result<Arc<dyn Backend>> {
    let Some(backend_cfg) = &cfg.backend else {
        warn!("no backend configured - running in demo mode");
        return Ok(Arc::new(MemoryBackend::demo()));
    };
    let cache = SessionCache::new(&cfg.data_dir)
        .await
        .context("failed to open session cache")?;
    let backend = RestBackend::new(backend_cfg.url.clone(), backend_cfg.anon_key.clone())
        .with_session_cache(cache);
    if let Some(session) = backend.restore().await? {
        info!(user_id = %session.user_id, "reusing cached session");
    }
    backend.start_realtime()?;
    Ok(Arc::new(backend))
}

async fn run(cfg: Config, args: RunArgs) -> Result<()> {
    let backend = connect(&cfg).await?;
    let engine = SyncEngine::new(backend.clone()).with_history_limit(cfg.history_limit);
    let engine_task = engine.spawn();
    let mut auth = AuthFlow::new(backend.clone());

    let signed_in = backend.current_session().await?.is_some();
    let session = match (&args.signup, &args.email, &args.password) {
        (Some(username), Some(email), Some(password)) => {
            auth.sign_up(username, email, password).await
        }
        (None, Some(email), Some(password)) => auth.login(email, password).await,
        (_, Some(_), None) => anyhow::bail!("--email needs --password"),
        (Some(_), None, _) => anyhow::bail!("--signup needs --email and --password"),
        _ if args.guest || !signed_in => auth.join_as_guest().await,
        _ => backend.current_session().await?,
    };
    if session.is_none() {
        let reason = auth.state().error.clone().unwrap_or_default();
        engine_task.abort();
        anyhow::bail!("sign-in failed: {reason}");
    }

    console::run(engine, auth, cfg).await?;
    engine_task.abort();
    Ok(())
}
