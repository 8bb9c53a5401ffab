use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Command line interface for the friendhub client.
#[derive(Parser, Debug, Default)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Backend base URL. Without one the client runs in demo mode.
    #[arg(long)]
    pub url: Option<String>,
    /// Public (anon) API key of the backend.
    #[arg(long)]
    pub anon_key: Option<String>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Number of chat messages loaded when the chat opens.
    #[arg(long)]
    pub history_limit: Option<usize>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign in and open the interactive client (default).
    Run(RunArgs),
    /// Apply a recorded notification stream offline and print the result.
    Replay {
        /// File with one JSON notification per line.
        file: PathBuf,
        /// Identity to treat as the local user.
        #[arg(long, default_value = "local")]
        user: String,
    },
    /// Forget the cached session.
    Logout,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Sign in with this email address.
    #[arg(long)]
    pub email: Option<String>,
    /// Password for --email.
    #[arg(long, env = "FRIENDHUB_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
    /// Create a new account with this username (needs --email/--password).
    #[arg(long)]
    pub signup: Option<String>,
    /// Join as an anonymous guest.
    #[arg(long, conflicts_with_all = ["email", "signup"])]
    pub guest: bool,
}
