//! Phoenix-channel client for the backend's realtime feed. Row changes on the
//! watched tables are decoded and published on the backend's event bus.

use backend_api::{BackendEvent, ChangeKind, MessageRow, ProfileRecord, Session, Topic};
use friendhub_core::error::{BackendError, Result};
use friendhub_core::events::EventBus;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const TABLES: [Topic; 2] = [Topic::Profiles, Topic::Messages];

/// One Phoenix channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

#[derive(Deserialize)]
struct Change {
    table: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Value,
}

/// Websocket endpoint for a backend base URL.
pub fn socket_url(base: &Url, anon_key: &str) -> Result<Url> {
    let scheme = match base.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(BackendError::Validation(format!(
                "unsupported backend scheme {other}"
            )))
        }
    };
    let mut url = base
        .join("realtime/v1/websocket")
        .map_err(|e| BackendError::Validation(e.to_string()))?;
    url.set_scheme(scheme)
        .map_err(|_| BackendError::Validation("cannot build realtime url".into()))?;
    url.query_pairs_mut()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", "1.0.0");
    Ok(url)
}

pub fn join_frame(table: Topic, reference: u64, access_token: Option<&str>) -> Frame {
    let mut payload = json!({
        "config": {
            "postgres_changes": [
                { "event": "*", "schema": "public", "table": table.as_str() }
            ]
        }
    });
    if let Some(token) = access_token {
        payload["access_token"] = Value::String(token.to_string());
    }
    Frame {
        topic: format!("realtime:public:{}", table.as_str()),
        event: "phx_join".into(),
        payload,
        reference: Some(reference.to_string()),
    }
}

pub fn heartbeat_frame(reference: u64) -> Frame {
    Frame {
        topic: "phoenix".into(),
        event: "heartbeat".into(),
        payload: json!({}),
        reference: Some(reference.to_string()),
    }
}

/// Decode a text frame. Replies, heartbeats, deletes and unknown tables
/// yield `Ok(None)`.
pub fn decode(text: &str) -> serde_json::Result<Option<BackendEvent>> {
    let frame: Frame = serde_json::from_str(text)?;
    let change = match frame.event.as_str() {
        "postgres_changes" => match frame.payload.get("data") {
            Some(data) => data.clone(),
            None => return Ok(None),
        },
        "INSERT" | "UPDATE" => frame.payload,
        _ => return Ok(None),
    };
    let change: Change = serde_json::from_value(change)?;
    let kind = match change.kind.as_str() {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        _ => return Ok(None),
    };
    let event = match change.table.as_str() {
        "profiles" => BackendEvent::Profile {
            kind,
            record: serde_json::from_value::<ProfileRecord>(change.record)?,
        },
        "messages" => BackendEvent::Message {
            kind,
            record: serde_json::from_value::<MessageRow>(change.record)?,
        },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Connect, join the watched tables and publish changes until the task is
/// aborted. Dropped connections are retried after a short delay.
pub async fn run(url: Url, session: Arc<Mutex<Option<Session>>>, bus: Arc<Mutex<EventBus>>) {
    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!("connected to realtime feed");
                let token = session.lock().as_ref().map(|s| s.access_token.clone());
                match pump(socket, token.as_deref(), &bus).await {
                    Ok(()) => info!("realtime feed closed"),
                    Err(e) => warn!(error = %e, "realtime feed read error"),
                }
            }
            Err(e) => warn!(error = %e, "failed to connect to realtime feed"),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn pump(
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
    access_token: Option<&str>,
    bus: &Mutex<EventBus>,
) -> std::result::Result<(), WsError> {
    let (mut sink, mut stream) = socket.split();
    let mut reference = 0u64;
    for table in TABLES {
        reference += 1;
        sink.send(text(&join_frame(table, reference, access_token)))
            .await?;
    }
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                reference += 1;
                sink.send(text(&heartbeat_frame(reference))).await?;
            }
            next = stream.next() => {
                let body = match next {
                    Some(Ok(Message::Text(body))) => body,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e),
                };
                match decode(&body) {
                    Ok(Some(event)) => bus.lock().publish(event),
                    Ok(None) => {}
                    Err(e) => debug!(error = %e, "skipping undecodable realtime frame"),
                }
            }
        }
    }
}

fn text(frame: &Frame) -> Message {
    Message::Text(serde_json::to_string(frame).unwrap_or_default())
}
