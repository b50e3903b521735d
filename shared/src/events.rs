use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ReconcileError;
use crate::state::{Country, Location, Player, WarPair};

/// Outbound event sent once per connection, carrying the server id.
pub const JOIN_EVENT: &str = "join-server";
/// Inbound event carrying the full country/player/war collections.
pub const STATE_EVENT: &str = "data-update";
/// Inbound event carrying one typed delta.
pub const UPDATE_EVENT: &str = "real-time-update";

/// Named-event frame exchanged over the live channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Inbound live message. Payloads stay as raw JSON so a bad payload is
/// rejected by the reconciler for that message only.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveMessage {
    State(Value),
    Update(Value),
}

impl LiveMessage {
    pub fn decode(text: &str) -> Result<Self, ReconcileError> {
        let envelope: Envelope =
            serde_json::from_str(text).map_err(|e| ReconcileError::malformed("live frame", e))?;
        match envelope.event.as_str() {
            STATE_EVENT => Ok(Self::State(envelope.data)),
            UPDATE_EVENT => Ok(Self::Update(envelope.data)),
            _ => Err(ReconcileError::UnknownEvent(envelope.event)),
        }
    }

    pub fn encode(&self) -> String {
        let (event, data) = match self {
            Self::State(data) => (STATE_EVENT, data),
            Self::Update(data) => (UPDATE_EVENT, data),
        };
        json!({ "event": event, "data": data }).to_string()
    }
}

pub fn join_frame(server_id: &str) -> String {
    json!({ "event": JOIN_EVENT, "data": server_id }).to_string()
}

/// Server id from a `join-server` frame, if `text` is one.
pub fn decode_join(text: &str) -> Option<String> {
    let envelope: Envelope = serde_json::from_str(text).ok()?;
    if envelope.event != JOIN_EVENT {
        return None;
    }
    envelope.data.as_str().map(str::to_string)
}

/// Payload of a `data-update` event. Server info is not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub countries: Vec<Country>,
    pub players: Vec<Player>,
    pub wars: Vec<WarPair>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub timestamp: Value,
}

/// One incremental change. Wire form: `{"type": "<tag>", "data": {...}, "timestamp": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Delta {
    PlayerMove { player: String, location: Location },
    PlayerJoin { player: Player },
    PlayerLeave { player: String },
    CountryCreated { country: Country },
    CountryUpdated { country: Country },
    WarStarted { war: WarPair },
    WarEnded { country1: String, country2: String },
}

impl Delta {
    pub const TAGS: [&'static str; 7] = [
        "player_move",
        "player_join",
        "player_leave",
        "country_created",
        "country_updated",
        "war_started",
        "war_ended",
    ];

    /// Decode a `real-time-update` payload, telling unknown tags apart from
    /// known tags with a broken body.
    pub fn decode(update: &Value) -> Result<Self, ReconcileError> {
        let Some(tag) = update.get("type").and_then(Value::as_str) else {
            return Err(ReconcileError::malformed("update", "missing `type`"));
        };
        if !Self::TAGS.contains(&tag) {
            return Err(ReconcileError::UnknownDelta(tag.to_string()));
        }
        Self::deserialize(update).map_err(|e| ReconcileError::malformed(tag, e))
    }
}

/// Timestamp attached to a live payload: RFC 3339 text or epoch milliseconds.
pub fn payload_timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    parse_timestamp(payload.get("timestamp")?)
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|ms| ms as i64))
            .and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
