use backend_api::Profile;
use url::{form_urlencoded::byte_serialize, Url};

use crate::error::{BackendError, Result};

pub const DEFAULT_DOMAIN: &str = "meet.jit.si";
pub const DEFAULT_ROOM: &str = "Friends-Hub-Lounge-Main";
/// Name used in the call when the local profile has none.
pub const FALLBACK_NAME: &str = "Friend";

/// Everything needed to open the shared video room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLink {
    pub room: String,
    pub display_name: String,
    pub url: Url,
}

/// Make a room id safe for a URL path. Runs of anything other than ASCII
/// letters and digits collapse to a single dash; case is preserved.
pub fn sanitize_room(input: &str) -> String {
    let mut room = String::new();
    let mut prev_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            room.push(c);
            prev_dash = false;
        } else if !prev_dash {
            room.push('-');
            prev_dash = true;
        }
    }
    room.trim_matches('-').to_string()
}

pub fn display_name(profile: Option<&Profile>) -> &str {
    profile
        .and_then(|p| p.username.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(FALLBACK_NAME)
}

/// Build the room URL. Options are passed in the fragment the way the
/// conferencing web client reads them: audio muted on join, no prejoin page.
pub fn call_link(domain: &str, room: &str, profile: Option<&Profile>) -> Result<CallLink> {
    let room = sanitize_room(room);
    if room.is_empty() {
        return Err(BackendError::Validation("invalid room name".into()));
    }
    let display_name = display_name(profile).to_string();
    let mut url = Url::parse(&format!("https://{domain}/"))
        .map_err(|e| BackendError::Validation(format!("invalid call domain: {e}")))?;
    url.set_path(&room);
    let quoted: String = byte_serialize(format!("\"{display_name}\"").as_bytes()).collect();
    url.set_fragment(Some(&format!(
        "userInfo.displayName={quoted}\
         &config.startWithAudioMuted=true\
         &config.prejoinPageEnabled=false\
         &config.disableThirdPartyRequests=true"
    )));
    Ok(CallLink {
        room,
        display_name,
        url,
    })
}
