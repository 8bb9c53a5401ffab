//! Line-oriented front end: prints store changes and turns typed lines into
//! engine calls.

use anyhow::{Context, Result};
use bytes::Bytes;
use friendhub_core::api::{Coordinates, Profile, ProfilePatch, Status};
use friendhub_core::call;
use friendhub_core::transcript::ChatEntry;
use friendhub_core::{AppState, AuthFlow, StoreEvent, SyncEngine};
use time::macros::format_description;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::config::Config;

/// A parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Say(String),
    Status(String),
    Ghost(bool),
    At {
        coordinates: Coordinates,
        label: Option<String>,
    },
    Until(Option<String>),
    Note(Option<String>),
    Roster,
    Map,
    Call,
    History,
    Avatar(String),
    Logout,
    Help,
    Quit,
    Empty,
}

pub const HELP: &str = "\
commands:
  <text>                 send a chat message
  /status <status>       set your status (Available, Busy, ...)
  /ghost on|off          hide or share your position
  /at <lat> <lng> [name] share a position with an optional place name
  /until [HH:MM]         set or clear how long you are available
  /note [text]           set or clear your status message
  /roster                list friends
  /map                   list friends shown on the map
  /call                  print the video call link
  /history               reload chat history
  /avatar <file>         upload a profile picture
  /logout                sign out
  /quit                  exit";

fn optional(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Parse one line of input. Unknown commands yield an error message.
pub fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix('/') else {
        if line.trim().is_empty() {
            return Ok(Input::Empty);
        }
        return Ok(Input::Say(line.to_string()));
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name {
        "status" => optional(rest)
            .map(Input::Status)
            .ok_or_else(|| "usage: /status <status>".to_string()),
        "ghost" => match rest.trim() {
            "on" => Ok(Input::Ghost(true)),
            "off" => Ok(Input::Ghost(false)),
            _ => Err("usage: /ghost on|off".into()),
        },
        "at" => {
            let mut parts = rest.split_whitespace();
            let lat = parts.next().and_then(|v| v.parse::<f64>().ok());
            let lng = parts.next().and_then(|v| v.parse::<f64>().ok());
            match (lat, lng) {
                (Some(lat), Some(lng))
                    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
                {
                    let label = parts.collect::<Vec<_>>().join(" ");
                    Ok(Input::At {
                        coordinates: Coordinates { lat, lng },
                        label: optional(&label),
                    })
                }
                _ => Err("usage: /at <lat> <lng> [place]".into()),
            }
        }
        "until" => Ok(Input::Until(optional(rest))),
        "note" => Ok(Input::Note(optional(rest))),
        "roster" => Ok(Input::Roster),
        "map" => Ok(Input::Map),
        "call" => Ok(Input::Call),
        "history" => Ok(Input::History),
        "avatar" => optional(rest)
            .map(Input::Avatar)
            .ok_or_else(|| "usage: /avatar <file>".to_string()),
        "logout" => Ok(Input::Logout),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command /{other}; try /help")),
    }
}

/// Ghost mode is `/ghost on`, i.e. sharing off.
fn sharing_for_ghost(ghost: bool) -> bool {
    !ghost
}

pub fn render_profile(profile: &Profile) -> String {
    let name = profile.username.as_deref().unwrap_or("(no name)");
    let status = profile
        .status
        .as_ref()
        .map(Status::to_string)
        .unwrap_or_else(|| "-".into());
    let mut line = format!("{name} [{status}]");
    if let Some(location) = &profile.location {
        line.push_str(&format!(" @ {location}"));
    }
    if let Some(until) = &profile.available_until {
        line.push_str(&format!(" until {until}"));
    }
    if let Some(message) = &profile.message {
        line.push_str(&format!(" \"{message}\""));
    }
    line
}

pub fn render_entry(entry: &ChatEntry, local_id: Option<&str>) -> String {
    let clock = format_description!("[hour]:[minute]");
    let at = entry
        .message
        .created_at
        .format(&clock)
        .unwrap_or_default();
    let who = match local_id {
        Some(id) if entry.is_from(id) => "you",
        _ => entry.author_name(),
    };
    format!("[{at}] {who}: {}", entry.message.text)
}

pub fn render_roster(state: &AppState, map_only: bool) -> String {
    let lines: Vec<String> = if map_only {
        state
            .roster
            .on_map()
            .map(|p| {
                let c = p.coordinates.unwrap_or(Coordinates { lat: 0.0, lng: 0.0 });
                format!("  {} ({:.4}, {:.4})", render_profile(p), c.lat, c.lng)
            })
            .collect()
    } else {
        state
            .roster
            .iter()
            .map(|p| format!("  {}", render_profile(p)))
            .collect()
    };
    if lines.is_empty() {
        "  (nobody here yet)".into()
    } else {
        lines.join("\n")
    }
}

/// Print store changes until the store goes away.
async fn print_events(engine: SyncEngine) {
    let mut events = engine.store().subscribe();
    loop {
        match events.recv().await {
            Ok(StoreEvent::Message(entry)) => {
                let local = engine.store().read(|s| s.local_id().map(str::to_owned));
                println!("{}", render_entry(&entry, local.as_deref()));
            }
            Ok(StoreEvent::Transcript) => {
                let (local, lines) = engine.store().read(|s| {
                    let local = s.local_id().map(str::to_owned);
                    let lines: Vec<_> = s
                        .transcript
                        .iter()
                        .map(|e| render_entry(e, local.as_deref()))
                        .collect();
                    (local, lines)
                });
                if local.is_some() && !lines.is_empty() {
                    println!("--- chat ---\n{}", lines.join("\n"));
                }
            }
            Ok(StoreEvent::Session) => {
                match engine.store().read(|s| s.local_id().map(str::to_owned)) {
                    Some(id) => println!("signed in as {id}"),
                    None => println!("signed out"),
                }
            }
            Ok(StoreEvent::LocalProfile) => {
                if let Some(me) = engine.store().read(|s| s.current_user.clone()) {
                    println!("you: {}", render_profile(&me));
                }
            }
            Ok(StoreEvent::Roster) => {}
            Err(RecvError::Lagged(n)) => warn!(skipped = n, "console fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Handle one input. Returns `false` when the user asked to quit.
async fn handle(
    input: Input,
    engine: &SyncEngine,
    auth: &mut AuthFlow,
    config: &Config,
) -> Result<bool> {
    match input {
        Input::Empty => {}
        Input::Say(text) => {
            engine.store().set_draft(text);
            if !engine.send_draft().await {
                println!("(not sent)");
            }
        }
        Input::Status(status) => {
            engine
                .update_status(ProfilePatch::status(status.as_str()))
                .await
        }
        Input::Ghost(ghost) => engine.set_location_sharing(sharing_for_ghost(ghost)).await,
        Input::At { coordinates, label } => {
            let patch = ProfilePatch {
                location: label.map(Some),
                ..ProfilePatch::coordinates(coordinates)
            };
            engine.update_status(patch).await;
        }
        Input::Until(until) => {
            engine
                .update_status(ProfilePatch {
                    available_until: Some(until),
                    ..Default::default()
                })
                .await
        }
        Input::Note(note) => {
            engine
                .update_status(ProfilePatch {
                    message: Some(note),
                    ..Default::default()
                })
                .await
        }
        Input::Roster => println!("{}", engine.store().read(|s| render_roster(s, false))),
        Input::Map => println!("{}", engine.store().read(|s| render_roster(s, true))),
        Input::Call => {
            let me = engine.store().read(|s| s.current_user.clone());
            match call::call_link(&config.call_domain, &config.call_room, me.as_ref()) {
                Ok(link) => println!("join {} as {}: {}", link.room, link.display_name, link.url),
                Err(e) => println!("cannot build call link: {e}"),
            }
        }
        Input::History => engine.load_history().await,
        Input::Avatar(path) => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {path}"))?;
            match auth.upload_avatar(&path, Bytes::from(data)).await {
                Some(url) => println!("avatar uploaded: {url}"),
                None => println!("{}", auth.state().error.as_deref().unwrap_or_default()),
            }
        }
        Input::Logout => {
            auth.sign_out().await;
            return Ok(false);
        }
        Input::Help => println!("{HELP}"),
        Input::Quit => return Ok(false),
    }
    Ok(true)
}

/// Read commands from stdin until EOF or `/quit`.
pub async fn run(engine: SyncEngine, mut auth: AuthFlow, config: Config) -> Result<()> {
    let printer = tokio::spawn(print_events(engine.clone()));
    println!("type /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let input = match parse_input(&line) {
            Ok(input) => input,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        match handle(input, &engine, &mut auth, &config).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e:#}"),
        }
    }
    printer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use friendhub_core::api::MessageRow;
    use friendhub_core::{Backend, MemoryBackend};
    use time::macros::datetime;

    fn demo_config() -> Config {
        Config {
            backend: None,
            history_limit: 50,
            call_domain: "meet.jit.si".into(),
            call_room: "friendhub".into(),
            logging_enabled: false,
            data_dir: std::env::temp_dir(),
        }
    }

    #[tokio::test]
    async fn typed_line_is_sent_as_the_draft() {
        let backend = Arc::new(MemoryBackend::demo());
        let engine = SyncEngine::new(backend.clone());
        let mut rx = backend.subscribe();
        backend.sign_in_anonymously().await.unwrap();
        while let Ok(event) = rx.try_recv() {
            engine.dispatch(event).await;
        }
        let mut auth = AuthFlow::new(backend.clone());
        engine.store().set_draft("half typed");

        let input = Input::Say("on my way".into());
        assert!(handle(input, &engine, &mut auth, &demo_config()).await.unwrap());
        assert_eq!(backend.message_inserts(), 1);
        assert!(engine.store().read(|s| s.draft.is_empty()));

        while let Ok(event) = rx.try_recv() {
            engine.dispatch(event).await;
        }
        let last = engine.store().read(|s| s.transcript.last().cloned()).unwrap();
        assert_eq!(last.message.text, "on my way");
    }

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(parse_input("hi there"), Ok(Input::Say("hi there".into())));
        assert_eq!(parse_input("   "), Ok(Input::Empty));
    }

    #[test]
    fn commands_parse() {
        assert_eq!(parse_input("/ghost on"), Ok(Input::Ghost(true)));
        assert_eq!(parse_input("/status Busy"), Ok(Input::Status("Busy".into())));
        assert_eq!(parse_input("/until"), Ok(Input::Until(None)));
        assert_eq!(
            parse_input("/at 40.7 -74.0 Blue Bottle"),
            Ok(Input::At {
                coordinates: Coordinates {
                    lat: 40.7,
                    lng: -74.0
                },
                label: Some("Blue Bottle".into()),
            })
        );
        assert!(parse_input("/at 100 0").is_err());
        assert!(parse_input("/ghost maybe").is_err());
        assert!(parse_input("/dance").is_err());
    }

    #[test]
    fn ghost_on_means_sharing_off() {
        assert!(!sharing_for_ghost(true));
        assert!(sharing_for_ghost(false));
    }

    #[test]
    fn entries_render_with_author() {
        let entry = ChatEntry {
            message: MessageRow {
                id: "1".into(),
                user_id: "u1".into(),
                text: "hello".into(),
                created_at: datetime!(2024-05-01 09:05 UTC),
            },
            author: None,
        };
        assert_eq!(render_entry(&entry, None), "[09:05] Unknown: hello");
        assert_eq!(render_entry(&entry, Some("u1")), "[09:05] you: hello");
    }

    #[test]
    fn profile_line_lists_known_fields() {
        let p = Profile {
            id: "1".into(),
            username: Some("Sarah".into()),
            status: Some(Status::Available),
            location: Some("Blue Bottle Coffee".into()),
            ..Default::default()
        };
        assert_eq!(render_profile(&p), "Sarah [Available] @ Blue Bottle Coffee");
    }
}
