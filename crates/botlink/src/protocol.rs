//! Wire format of the bot server protocol.
//!
//! Outbound frames are JSON objects carrying `request` and `id` next to the
//! request-specific fields. Inbound frames are either responses (`id` plus
//! `status`) or events (`event.source`, `event.type` and `data`).

use serde_json::{Map, Value};

use crate::{
    error::{BotError, BotResult},
    subscription::EventSubscriptions,
    types::RequestId,
};

/// Request names understood by the host.
pub mod requests {
    pub const GET_BROADCASTER: &str = "GetBroadcaster";
    pub const GET_ACTIONS: &str = "GetActions";
    pub const GET_COMMANDS: &str = "GetCommands";
    pub const GET_EVENTS: &str = "GetEvents";
    pub const DO_ACTION: &str = "DoAction";
    pub const SUBSCRIBE: &str = "Subscribe";
    pub const UNSUBSCRIBE: &str = "UnSubscribe";
    /// Unsolicited greeting sent by the host right after the handshake.
    pub const HELLO: &str = "Hello";
}

/// Serialize an outbound request frame.
///
/// `payload` must be a JSON object (its fields are merged into the frame) or
/// `null`. The `request` and `id` fields always win over payload fields of
/// the same name.
pub fn encode_request(name: &str, id: &RequestId, payload: Value) -> BotResult<String> {
    let mut frame = match payload {
        Value::Object(fields) => fields,
        Value::Null => Map::new(),
        other => {
            return Err(BotError::invalid_request(format!(
                "payload for {name} must be a JSON object, got {other}"
            )));
        }
    };
    frame.insert("request".to_string(), Value::String(name.to_string()));
    frame.insert("id".to_string(), Value::String(id.to_string()));
    Ok(serde_json::to_string(&frame)?)
}

/// Payload of a `Subscribe`/`UnSubscribe` request.
pub fn subscription_payload(events: &EventSubscriptions) -> Value {
    serde_json::json!({ "events": events })
}

/// Parse an inbound text frame.
pub fn parse_frame(raw: &str) -> BotResult<Value> {
    Ok(serde_json::from_str(raw)?)
}

/// Correlation id of an inbound frame, if any.
///
/// The host echoes ids as strings; numeric ids are accepted as well.
pub fn frame_id(frame: &Value) -> Option<RequestId> {
    match frame.get("id")? {
        Value::String(id) => Some(RequestId::from(id.as_str())),
        Value::Number(id) => Some(RequestId::from_string(id.to_string())),
        _ => None,
    }
}

/// Turn a response frame into the caller's result.
pub fn response_outcome(frame: Value) -> BotResult<Value> {
    if frame.get("status").and_then(Value::as_str) != Some("error") {
        return Ok(frame);
    }
    let message = frame
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Err(BotError::remote(message))
}

/// `event` header of an inbound event frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventHeader {
    pub source: Option<String>,
    pub kind: String,
}

impl EventHeader {
    /// Extract the header from a frame, if it carries one.
    ///
    /// Only a string `type` is required; a `source` that is not a string is
    /// treated as absent.
    pub fn from_frame(frame: &Value) -> Option<Self> {
        let header = frame.get("event")?;
        let kind = header.get("type")?.as_str()?;
        Some(Self {
            source: header
                .get("source")
                .and_then(Value::as_str)
                .map(str::to_string),
            kind: kind.to_string(),
        })
    }
}

/// Check whether a frame is the host's greeting.
pub fn is_hello(frame: &Value) -> bool {
    frame.get("request").and_then(Value::as_str) == Some(requests::HELLO)
}
