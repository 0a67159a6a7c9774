//! Events published to application consumers.
//!
//! Every inbound event frame becomes a [`RawEvent`]. Chat messages,
//! cheers/tips and follows are additionally translated into cross-platform
//! [`BotEvent`] variants. Translation is best-effort: a frame missing the
//! fields a variant needs is published raw only.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;

use crate::config::Endpoint;

/// Key of normalized chat messages.
pub const CHAT_NEW: &str = "chat:new";
/// Key of normalized cheers, tips and donations.
pub const GIFT_RECEIVED: &str = "gift:received";
/// Key of normalized follows.
pub const FOLLOW_NEW: &str = "follow:new";

/// An event frame as received from the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RawEvent {
    /// Originating integration, e.g. `Twitch`. Empty when the host sent none.
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
}

impl RawEvent {
    /// Lowercase platform name derived from the source.
    pub fn platform(&self) -> String {
        self.source.to_lowercase()
    }

    /// `source:type`, the namespaced key of this event.
    pub fn namespaced_key(&self) -> Option<String> {
        (!self.source.is_empty()).then(|| format!("{}:{}", self.source, self.kind))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatEvent {
    pub platform: String,
    pub user: String,
    pub text: String,
    pub raw: RawEvent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GiftEvent {
    pub platform: String,
    pub user: String,
    pub amount: f64,
    pub message: Option<String>,
    pub raw: RawEvent,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FollowEvent {
    pub platform: String,
    pub user: String,
    pub raw: RawEvent,
}

/// Closed set of events the dispatcher produces.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BotEvent {
    Chat(ChatEvent),
    Gift(GiftEvent),
    Follow(FollowEvent),
    Raw(RawEvent),
}

impl BotEvent {
    /// Translate a raw event into a normalized variant, if its shape is known.
    pub fn normalize(raw: &RawEvent) -> Option<Self> {
        match raw.kind.as_str() {
            "ChatMessage" | "Message" => chat(raw).map(Self::Chat),
            "Cheer" | "Tip" | "Donation" | "SuperChat" | "SuperSticker" => {
                gift(raw).map(Self::Gift)
            }
            "Follow" => follow(raw).map(Self::Follow),
            _ => None,
        }
    }

    /// Key this event is published under.
    pub fn key(&self) -> &str {
        match self {
            Self::Chat(_) => CHAT_NEW,
            Self::Gift(_) => GIFT_RECEIVED,
            Self::Follow(_) => FOLLOW_NEW,
            Self::Raw(raw) => &raw.kind,
        }
    }

    /// The frame this event came from.
    pub fn raw(&self) -> &RawEvent {
        match self {
            Self::Chat(event) => &event.raw,
            Self::Gift(event) => &event.raw,
            Self::Follow(event) => &event.raw,
            Self::Raw(raw) => raw,
        }
    }
}

/// Notifications published by a [`BotClient`](crate::BotClient).
#[derive(Clone, Debug)]
pub enum ClientEvent {
    /// A dial to `endpoint` started.
    Connecting { endpoint: Endpoint },
    /// The transport to `endpoint` is open.
    Connected { endpoint: Endpoint },
    /// The transport closed or a dial failed.
    Disconnected { reason: String },
    /// Another connection attempt will start after `delay`.
    ReconnectScheduled { delay: Duration },
    /// The bootstrap requests of the current connection completed.
    SessionReady,
    /// A host event, published under `key`.
    Event { key: String, event: Arc<BotEvent> },
}

fn chat(raw: &RawEvent) -> Option<ChatEvent> {
    let data = &raw.data;
    let text = first_str(
        data,
        &[
            &["message", "message"],
            &["message", "text"],
            &["message"],
            &["text"],
        ],
    )?;
    let user = user_name(data)?;
    Some(ChatEvent {
        platform: raw.platform(),
        user,
        text,
        raw: raw.clone(),
    })
}

fn gift(raw: &RawEvent) -> Option<GiftEvent> {
    let data = &raw.data;
    let amount = first_amount(
        data,
        &[
            &["bits"],
            &["message", "bits"],
            &["amount"],
            &["message", "amount"],
        ],
    )?;
    let user = user_name(data)?;
    let message = first_str(data, &[&["message", "message"], &["message"], &["text"]]);
    Some(GiftEvent {
        platform: raw.platform(),
        user,
        amount,
        message,
        raw: raw.clone(),
    })
}

fn follow(raw: &RawEvent) -> Option<FollowEvent> {
    let user = user_name(&raw.data)?;
    Some(FollowEvent {
        platform: raw.platform(),
        user,
        raw: raw.clone(),
    })
}

fn user_name(data: &Value) -> Option<String> {
    first_str(
        data,
        &[
            &["user", "name"],
            &["user", "display_name"],
            &["user", "displayName"],
            &["user", "login"],
            &["message", "displayName"],
            &["message", "username"],
            &["displayName"],
            &["user_name"],
            &["userName"],
            &["username"],
            &["user"],
        ],
    )
}

fn lookup<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, key| value.get(key))
}

fn first_str(data: &Value, paths: &[&[&str]]) -> Option<String> {
    paths
        .iter()
        .filter_map(|path| lookup(data, path)?.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Amounts arrive as numbers or as display strings like `"$5.00"`.
fn first_amount(data: &Value, paths: &[&[&str]]) -> Option<f64> {
    paths.iter().find_map(|path| match lookup(data, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let digits: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.parse().ok()
        }
        _ => None,
    })
}
