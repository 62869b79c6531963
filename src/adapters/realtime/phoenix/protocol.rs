//! Phoenix-channel wire messages used by the hosted realtime service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use crate::domain::foundation::Timestamp;
use crate::domain::realtime::{ChangeEvent, Operation, Row};
use crate::ports::{TableFilter, TransportError};

pub const TOPIC_PREFIX: &str = "realtime:";
pub const HEARTBEAT_TOPIC: &str = "phoenix";

/// One frame on the socket, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: JsonValue,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Inbound frames, reduced to what the transport acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Reply to a join (or other pushed message).
    Reply { ok: bool, detail: Option<String> },
    Change(ChangeEvent),
    /// Server-side extension status, e.g. "Subscribed to PostgreSQL".
    System { ok: bool, message: Option<String> },
    Error(Option<String>),
    Close,
    Ignored,
}

/// A decoded frame plus the refs needed to tell which join it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub inbound: Inbound,
    pub msg_ref: Option<String>,
    pub join_ref: Option<String>,
}

/// Remembers the ref of the latest `phx_join` on a topic.
///
/// Re-joining sends `phx_leave` for the old join, and the server answers it
/// with a reply and a `phx_close` tagged with the old join ref. Those frames
/// must not be read as the state of the new join.
#[derive(Debug, Clone, Default)]
pub struct JoinTracker {
    current: Option<String>,
}

impl JoinTracker {
    pub fn new(join_ref: u64) -> Self {
        Self {
            current: Some(join_ref.to_string()),
        }
    }

    pub fn joined(&mut self, join_ref: u64) {
        self.current = Some(join_ref.to_string());
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Whether `frame` belongs to the current join.
    ///
    /// Replies count only when they answer the join push itself. Other frames
    /// count unless they name a different join.
    pub fn accepts(&self, frame: &Frame) -> bool {
        let current = self.current.as_deref();
        match frame.inbound {
            Inbound::Reply { .. } => frame.msg_ref.as_deref() == current,
            Inbound::Ignored => true,
            _ => match frame.join_ref.as_deref().or(frame.msg_ref.as_deref()) {
                Some(join_ref) => Some(join_ref) == current,
                None => true,
            },
        }
    }
}

pub fn wire_topic(topic: &str) -> String {
    format!("{}{}", TOPIC_PREFIX, topic)
}

pub fn join(topic: &str, filters: &[TableFilter], access_token: &str, msg_ref: u64) -> PhoenixMessage {
    let postgres_changes: Vec<JsonValue> = filters
        .iter()
        .map(|f| {
            let mut entry = json!({
                "event": f.event_name(),
                "schema": f.schema,
                "table": f.table,
            });
            if let (Some(filter), Some(map)) = (&f.filter, entry.as_object_mut()) {
                map.insert("filter".to_string(), JsonValue::String(filter.clone()));
            }
            entry
        })
        .collect();

    PhoenixMessage {
        topic: wire_topic(topic),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "ack": false, "self": false },
                "presence": { "key": "" },
                "postgres_changes": postgres_changes,
            },
            "access_token": access_token,
        }),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: Some(msg_ref.to_string()),
    }
}

/// Leaves the join identified by `join_ref`.
pub fn leave(topic: &str, join_ref: Option<&str>, msg_ref: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: wire_topic(topic),
        event: "phx_leave".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: join_ref.map(str::to_string),
    }
}

pub fn heartbeat(msg_ref: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: HEARTBEAT_TOPIC.to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: None,
    }
}

pub fn encode(message: &PhoenixMessage) -> Result<String, TransportError> {
    serde_json::to_string(message).map_err(|e| TransportError::Protocol(e.to_string()))
}

/// Parses one text frame. Frames for other topics come back as `Ignored`.
pub fn decode(text: &str, topic: &str) -> Result<Frame, TransportError> {
    let message: PhoenixMessage =
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;

    if message.topic != wire_topic(topic) {
        return Ok(Frame {
            inbound: Inbound::Ignored,
            msg_ref: message.msg_ref,
            join_ref: message.join_ref,
        });
    }

    let inbound = match message.event.as_str() {
        "phx_reply" => {
            let status = message.payload.get("status").and_then(JsonValue::as_str);
            let detail = message
                .payload
                .get("response")
                .and_then(|r| r.get("reason"))
                .and_then(JsonValue::as_str)
                .map(str::to_string);
            Inbound::Reply {
                ok: status == Some("ok"),
                detail,
            }
        }
        "postgres_changes" => Inbound::Change(change_event(&message.payload)?),
        "system" => Inbound::System {
            ok: message.payload.get("status").and_then(JsonValue::as_str) != Some("error"),
            message: message
                .payload
                .get("message")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        },
        "phx_error" => Inbound::Error(
            message
                .payload
                .get("reason")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        ),
        "phx_close" => Inbound::Close,
        _ => Inbound::Ignored,
    };
    Ok(Frame {
        inbound,
        msg_ref: message.msg_ref,
        join_ref: message.join_ref,
    })
}

fn change_event(payload: &JsonValue) -> Result<ChangeEvent, TransportError> {
    let data = payload
        .get("data")
        .ok_or_else(|| TransportError::Protocol("postgres_changes without data".into()))?;

    let table = data
        .get("table")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| TransportError::Protocol("postgres_changes without table".into()))?;
    let operation = data
        .get("type")
        .and_then(JsonValue::as_str)
        .and_then(Operation::parse)
        .ok_or_else(|| TransportError::Protocol("postgres_changes with unknown type".into()))?;

    let record = row_at(data, "record");
    let old_record = row_at(data, "old_record");

    let event = match operation {
        Operation::Insert => ChangeEvent::insert(table, record.unwrap_or_default()),
        Operation::Update => ChangeEvent::update(table, old_record, record.unwrap_or_default()),
        Operation::Delete => ChangeEvent::delete(table, old_record.unwrap_or_default()),
    };

    let event = match data.get("schema").and_then(JsonValue::as_str) {
        Some(schema) => event.with_schema(schema),
        None => event,
    };
    Ok(
        match data.get("commit_timestamp").and_then(Timestamp::from_json) {
            Some(committed_at) => event.with_committed_at(committed_at),
            None => event,
        },
    )
}

fn row_at(data: &JsonValue, key: &str) -> Option<Row> {
    data.get(key)
        .and_then(JsonValue::as_object)
        .filter(|row| !row.is_empty())
        .cloned()
}
