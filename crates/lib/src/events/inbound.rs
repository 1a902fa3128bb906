//! Canonical inbound event: one shape for every payload the platform can send.

use crate::error::MalformedEventError;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Event type. Unknown types are carried through verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    AppMention,
    ReactionAdded,
    ReactionRemoved,
    Other(String),
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "message" => Self::Message,
            "app_mention" => Self::AppMention,
            "reaction_added" => Self::ReactionAdded,
            "reaction_removed" => Self::ReactionRemoved,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::AppMention => "app_mention",
            Self::ReactionAdded => "reaction_added",
            Self::ReactionRemoved => "reaction_removed",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Normalized event. Never mutated after [`normalize`] produces it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InboundEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Empty when the payload carries no channel.
    pub channel_id: String,
    /// User id, or the bot id for bot-authored messages; empty when absent.
    pub actor_id: String,
    /// Empty when absent (reactions, unknown types).
    pub text: String,
    pub event_ts: Option<String>,
    pub thread_ts: Option<String>,
    /// The event object exactly as received.
    pub raw: Value,
}

impl InboundEvent {
    /// True when this message is a reply inside a thread rather than the thread root.
    pub fn is_thread_reply(&self) -> bool {
        match (self.thread_ts.as_deref(), self.event_ts.as_deref()) {
            (Some(thread), Some(ts)) => !thread.is_empty() && thread != ts,
            (Some(thread), None) => !thread.is_empty(),
            _ => false,
        }
    }

    /// True for messages posted by a bot, including this bridge's own relayed replies.
    pub fn is_bot_authored(&self) -> bool {
        self.kind == EventKind::Message
            && (str_field(&self.raw, "bot_id").is_some()
                || self.raw.get("subtype").and_then(Value::as_str) == Some("bot_message"))
    }
}

/// Result of normalizing a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// URL-verification handshake: echo the challenge and stop.
    Challenge(String),
    Event(InboundEvent),
}

/// Map a raw payload (an `event_callback` wrapper, a bare event object, or a
/// `url_verification` request) to a [`Normalized`] value.
pub fn normalize(payload: &Value) -> Result<Normalized, MalformedEventError> {
    let obj = payload.as_object().ok_or(MalformedEventError::NotAnObject)?;
    let outer_type = obj.get("type").and_then(Value::as_str);

    if outer_type == Some("url_verification") {
        let challenge = str_field(payload, "challenge").unwrap_or_default();
        return Ok(Normalized::Challenge(challenge));
    }

    let event = if outer_type == Some("event_callback") {
        obj.get("event").ok_or(MalformedEventError::MissingType)?
    } else {
        payload
    };
    if !event.is_object() {
        return Err(MalformedEventError::NotAnObject);
    }

    let kind = event
        .get("type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(EventKind::parse)
        .ok_or(MalformedEventError::MissingType)?;

    // Reactions carry the channel on the reacted-to item; some events carry a channel object.
    let channel_id = str_field(event, "channel")
        .or_else(|| event.get("channel").and_then(|c| str_field(c, "id")))
        .or_else(|| event.get("item").and_then(|i| str_field(i, "channel")))
        .unwrap_or_default();

    let actor_id = str_field(event, "user")
        .or_else(|| str_field(event, "bot_id"))
        .unwrap_or_default();

    Ok(Normalized::Event(InboundEvent {
        kind,
        channel_id,
        actor_id,
        text: str_field(event, "text").unwrap_or_default(),
        event_ts: str_field(event, "ts").or_else(|| str_field(event, "event_ts")),
        thread_ts: str_field(event, "thread_ts"),
        raw: event.clone(),
    }))
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_of(payload: Value) -> InboundEvent {
        match normalize(&payload).expect("normalizes") {
            Normalized::Event(e) => e,
            Normalized::Challenge(c) => panic!("unexpected challenge {c}"),
        }
    }

    #[test]
    fn app_mention_in_event_callback() {
        let event = event_of(json!({
            "type": "event_callback",
            "event_id": "Ev1",
            "event": {
                "type": "app_mention",
                "user": "U1",
                "text": "<@UBOT> hi",
                "channel": "C1",
                "ts": "100.2",
                "thread_ts": "100.1"
            }
        }));
        assert_eq!(event.kind, EventKind::AppMention);
        assert_eq!(event.channel_id, "C1");
        assert_eq!(event.actor_id, "U1");
        assert_eq!(event.text, "<@UBOT> hi");
        assert_eq!(event.event_ts.as_deref(), Some("100.2"));
        assert_eq!(event.thread_ts.as_deref(), Some("100.1"));
        assert_eq!(event.raw["type"], "app_mention");
        assert!(event.is_thread_reply());
    }

    #[test]
    fn bare_message_event() {
        let event = event_of(json!({
            "type": "message",
            "channel": "D1",
            "user": "U2",
            "text": "hello",
            "ts": "5.0"
        }));
        assert_eq!(event.kind, EventKind::Message);
        assert!(event.thread_ts.is_none());
        assert!(!event.is_thread_reply());
    }

    #[test]
    fn bot_message_uses_bot_id_as_actor() {
        let event = event_of(json!({
            "type": "message",
            "subtype": "bot_message",
            "bot_id": "B9",
            "channel": "C1",
            "text": "beep",
            "ts": "6.0"
        }));
        assert_eq!(event.actor_id, "B9");
        assert!(event.is_bot_authored());
    }

    #[test]
    fn bot_authorship_needs_message_with_bot_marker() {
        let human = event_of(json!({ "type": "message", "user": "U1", "channel": "C1", "ts": "1.0" }));
        assert!(!human.is_bot_authored());

        let blank_bot_id = event_of(json!({
            "type": "message", "user": "U1", "bot_id": "", "channel": "C1", "ts": "1.0"
        }));
        assert!(!blank_bot_id.is_bot_authored());

        let subtype_only = event_of(json!({
            "type": "message", "subtype": "bot_message", "channel": "C1", "ts": "1.0"
        }));
        assert!(subtype_only.is_bot_authored());

        let mention = event_of(json!({
            "type": "app_mention", "bot_id": "B1", "channel": "C1", "ts": "1.0"
        }));
        assert!(!mention.is_bot_authored());
    }

    #[test]
    fn reaction_takes_channel_from_item() {
        for kind in ["reaction_added", "reaction_removed"] {
            let event = event_of(json!({
                "type": kind,
                "user": "U3",
                "reaction": "thumbsup",
                "item": { "type": "message", "channel": "C7", "ts": "7.0" },
                "event_ts": "7.5"
            }));
            assert_eq!(event.kind, EventKind::parse(kind));
            assert_eq!(event.channel_id, "C7");
            assert_eq!(event.text, "");
            assert_eq!(event.event_ts.as_deref(), Some("7.5"));
            assert_eq!(event.raw["reaction"], "thumbsup");
        }
    }

    #[test]
    fn unknown_type_is_preserved_not_dropped() {
        let event = event_of(json!({
            "type": "event_callback",
            "event": { "type": "pin_added", "channel_id": "C1", "event_ts": "8.0" }
        }));
        assert_eq!(event.kind, EventKind::Other("pin_added".to_string()));
        assert_eq!(event.kind.as_str(), "pin_added");
        assert_eq!(event.text, "");
        assert_eq!(event.raw["channel_id"], "C1");
    }

    #[test]
    fn url_verification_yields_challenge() {
        let normalized = normalize(&json!({
            "type": "url_verification",
            "token": "t",
            "challenge": "abc123"
        }))
        .expect("normalizes");
        assert_eq!(normalized, Normalized::Challenge("abc123".to_string()));
    }

    #[test]
    fn non_object_and_typeless_payloads_are_malformed() {
        assert_eq!(normalize(&json!([1, 2])), Err(MalformedEventError::NotAnObject));
        assert_eq!(
            normalize(&json!({ "channel": "C1" })),
            Err(MalformedEventError::MissingType)
        );
    }

    #[test]
    fn serializes_kind_as_type_string() {
        let event = event_of(json!({ "type": "app_mention", "channel": "C1", "ts": "1.0" }));
        let value = serde_json::to_value(&event).expect("serializes");
        assert_eq!(value["type"], "app_mention");
        assert_eq!(value["channel_id"], "C1");
    }
}
