//! Row, patch and change-notification types exchanged with the presence
//! backend. Field names follow the backend's column names so the same types
//! serve the REST adapter, the realtime stream and recorded replays.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use time::OffsetDateTime;

/// Notification channel a backend event belongs to.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Auth,
    Profiles,
    Messages,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Auth => "auth",
            Topic::Profiles => "profiles",
            Topic::Messages => "messages",
        }
    }
}

/// Kind of row change delivered by the realtime stream.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
}

/// Availability shown next to a friend. Anything other than the two
/// well-known values is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Available,
    Busy,
    Other(String),
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Available" => Status::Available,
            "Busy" => Status::Busy,
            _ => Status::Other(value),
        }
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Status::from(value.to_string())
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        match value {
            Status::Available => "Available".into(),
            Status::Busy => "Busy".into(),
            Status::Other(s) => s,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Available => f.write_str("Available"),
            Status::Busy => f.write_str("Busy"),
            Status::Other(s) => f.write_str(s),
        }
    }
}

/// Geographic position; travels as a `[lat, lng]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl From<[f64; 2]> for Coordinates {
    fn from([lat, lng]: [f64; 2]) -> Self {
        Self { lat, lng }
    }
}

impl From<Coordinates> for [f64; 2] {
    fn from(c: Coordinates) -> Self {
        [c.lat, c.lng]
    }
}

/// A row of the `profiles` collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    #[serde(default)]
    pub available_until: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub location_sharing: Option<bool>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Profile {
    /// Build a profile from a possibly partial record.
    pub fn from_record(record: &ProfileRecord) -> Self {
        let mut profile = Profile {
            id: record.id.clone(),
            ..Default::default()
        };
        profile.apply(&record.fields);
        profile
    }

    /// Shallow merge: fields present in the patch replace ours, absent ones
    /// are kept.
    pub fn apply(&mut self, patch: &ProfilePatch) {
        if let Some(v) = &patch.username {
            self.username = Some(v.clone());
        }
        if let Some(v) = &patch.avatar_url {
            self.avatar_url = v.clone();
        }
        if let Some(v) = &patch.status {
            self.status = Some(v.clone());
        }
        if let Some(v) = &patch.location {
            self.location = v.clone();
        }
        if let Some(v) = patch.coordinates {
            self.coordinates = v;
        }
        if let Some(v) = &patch.available_until {
            self.available_until = v.clone();
        }
        if let Some(v) = &patch.message {
            self.message = v.clone();
        }
        if let Some(v) = patch.location_sharing {
            self.location_sharing = Some(v);
        }
        if let Some(v) = &patch.updated_at {
            self.updated_at = v.clone();
        }
    }

    /// Location sharing is on unless the row says otherwise.
    pub fn shares_location(&self) -> bool {
        self.location_sharing.unwrap_or(true)
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Partial profile update. Nullable columns are tri-state: `None` leaves the
/// column alone, `Some(None)` clears it, `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfilePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub avatar_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub coordinates: Option<Option<Coordinates>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub available_until: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_sharing: Option<bool>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<Option<String>>,
}

impl ProfilePatch {
    pub fn status(status: impl Into<Status>) -> Self {
        Self {
            status: Some(status.into()),
            ..Default::default()
        }
    }

    pub fn coordinates(coordinates: Coordinates) -> Self {
        Self {
            coordinates: Some(Some(coordinates)),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == ProfilePatch::default()
    }
}

/// A profile change as delivered by the backend: the id plus whichever
/// columns the notification carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: String,
    #[serde(flatten)]
    pub fields: ProfilePatch,
}

impl From<&Profile> for ProfileRecord {
    fn from(p: &Profile) -> Self {
        ProfileRecord {
            id: p.id.clone(),
            fields: ProfilePatch {
                username: p.username.clone(),
                avatar_url: Some(p.avatar_url.clone()),
                status: p.status.clone(),
                location: Some(p.location.clone()),
                coordinates: Some(p.coordinates),
                available_until: Some(p.available_until.clone()),
                message: Some(p.message.clone()),
                location_sharing: p.location_sharing,
                updated_at: Some(p.updated_at.clone()),
            },
        }
    }
}

/// The subset of a profile shown next to chat messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Row inserted when a new account creates its profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProfile {
    pub id: String,
    pub username: String,
    pub status: Status,
    pub avatar_url: String,
}

/// A row of the `messages` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRow {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub user_id: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Body of a message insert; id and timestamp are assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub user_id: String,
    pub text: String,
}

/// An authenticated backend session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub anonymous: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &"<redacted>")
            .field("anonymous", &self.anonymous)
            .finish()
    }
}

/// Notification pushed by the backend. One JSON object per line in replay
/// files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    Session {
        session: Option<Session>,
    },
    Profile {
        kind: ChangeKind,
        record: ProfileRecord,
    },
    Message {
        kind: ChangeKind,
        record: MessageRow,
    },
}

impl BackendEvent {
    pub fn topic(&self) -> Topic {
        match self {
            BackendEvent::Session { .. } => Topic::Auth,
            BackendEvent::Profile { .. } => Topic::Profiles,
            BackendEvent::Message { .. } => Topic::Messages,
        }
    }
}

fn nullable<'de, D, T>(d: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(d).map(Some)
}

fn string_or_number<'de, D>(d: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
