//! Error taxonomy for the bridge.
//!
//! Only [`ConfigurationError`] is fatal, and only to the identity it names. Everything
//! else is contained by the owning worker and logged with identity and event context.

use thiserror::Error;

/// Missing or invalid settings for one identity. That identity does not start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("bot #{index}: name is empty")]
    MissingName { index: usize },

    #[error("bot {name}: duplicate identity name")]
    DuplicateName { name: String },

    #[error("bot {name}: missing {field}")]
    MissingValue { name: String, field: &'static str },

    #[error("bot {name}: invalid sink url {url:?}: {reason}")]
    InvalidSinkUrl {
        name: String,
        url: String,
        reason: String,
    },
}

/// Transport-level failure of the duplex session. Handled by reconnecting.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("opening socket connection failed: {0}")]
    Open(String),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("acknowledging envelope {envelope_id} failed: {reason}")]
    Ack { envelope_id: String, reason: String },
}

/// The event lacks fields needed for session-key resolution or is not an event at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    #[error("event has neither thread_ts nor event_ts (channel {channel_id:?})")]
    MissingTimestamps { channel_id: String },

    #[error("event has no channel id")]
    MissingChannel,

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("payload has no event type")]
    MissingType,
}

/// Thread-history fetch failed. Context degrades to empty.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("history request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("history query rejected by platform: {0}")]
    Platform(String),

    #[error("history response malformed: {0}")]
    Malformed(String),
}

/// Non-2xx response or transport failure on forward. The event is dropped.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("sink returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("sink request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("envelope could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_for_log(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_for_log_keeps_short_text() {
        assert_eq!(truncate_for_log("ok", 10), "ok");
    }

    #[test]
    fn truncate_for_log_cuts_on_char_boundary() {
        assert_eq!(truncate_for_log("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn configuration_error_names_identity() {
        let err = ConfigurationError::MissingValue {
            name: "DummyBot".to_string(),
            field: "app token",
        };
        assert_eq!(err.to_string(), "bot DummyBot: missing app token");
    }
}
