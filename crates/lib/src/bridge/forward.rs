//! Sink delivery: one bounded-timeout POST per forwarded event, never retried.

use super::enrich::ThreadContext;
use crate::config::ForwardMode;
use crate::error::{truncate_for_log, DeliveryError};
use crate::events::{InboundEvent, SessionKey};
use crate::identity::BotIdentity;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Header carrying the identity's shared secret.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Sink response bodies are cut to this many characters in logs.
const LOG_BODY_LIMIT: usize = 500;

/// Request body sent to the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundEnvelope {
    pub input_value: String,
    pub input_type: &'static str,
    pub output_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl OutboundEnvelope {
    /// Build the envelope for one event. In event mode `input_value` is the event as JSON
    /// (with `thread_history` when context is present); in text mode it is the message text,
    /// prefixed with the rendered history.
    pub fn build(
        event: &InboundEvent,
        session_key: Option<&SessionKey>,
        context: &ThreadContext,
        mode: ForwardMode,
    ) -> Result<Self, serde_json::Error> {
        let input_value = match mode {
            ForwardMode::Event => {
                let mut value = serde_json::to_value(event)?;
                if !context.is_empty() {
                    if let Value::Object(ref mut map) = value {
                        map.insert("thread_history".to_string(), serde_json::to_value(context)?);
                    }
                }
                serde_json::to_string(&value)?
            }
            ForwardMode::Text if context.is_empty() => event.text.clone(),
            ForwardMode::Text => {
                format!("Thread history:\n{}\n\n{}", context.render(), event.text)
            }
        };
        Ok(Self {
            input_value,
            input_type: "text",
            output_type: "text",
            session_id: session_key.map(|k| k.as_str().to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Success,
    HttpError,
    TransportError,
}

/// Outcome of one delivery attempt. Logged, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResult {
    pub status_class: DeliveryStatus,
    pub code: Option<u16>,
    pub message: Option<String>,
    /// `response` string from a 2xx JSON body, if any.
    pub reply: Option<String>,
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        self.status_class == DeliveryStatus::Success
    }

    fn success(code: u16, reply: Option<String>) -> Self {
        Self {
            status_class: DeliveryStatus::Success,
            code: Some(code),
            message: None,
            reply,
        }
    }

    fn failed(err: &DeliveryError) -> Self {
        let (status_class, code) = match err {
            DeliveryError::Http { status, .. } => (DeliveryStatus::HttpError, Some(*status)),
            DeliveryError::Transport(_) | DeliveryError::Serialize(_) => {
                (DeliveryStatus::TransportError, None)
            }
        };
        Self {
            status_class,
            code,
            message: Some(err.to_string()),
            reply: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SinkReply {
    response: Option<String>,
}

/// Posts envelopes to identity sinks over a shared client.
#[derive(Clone)]
pub struct ForwardDispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl ForwardDispatcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Build the envelope and make exactly one delivery attempt. Failures are logged here.
    pub async fn forward(
        &self,
        identity: &BotIdentity,
        event: &InboundEvent,
        session_key: Option<&SessionKey>,
        context: &ThreadContext,
    ) -> DeliveryResult {
        let outcome = match OutboundEnvelope::build(event, session_key, context, identity.forward_mode)
        {
            Ok(envelope) => self.deliver(identity, &envelope).await,
            Err(e) => Err(DeliveryError::from(e)),
        };
        match outcome {
            Ok(result) => {
                log::info!(
                    "bot {}: forwarded {} event (session {}) -> {}",
                    identity.name,
                    event.kind,
                    session_key.map(SessionKey::as_str).unwrap_or("-"),
                    result.code.unwrap_or_default()
                );
                result
            }
            Err(e) => {
                log::error!(
                    "bot {}: dropped {} event in {} (session {}): {}",
                    identity.name,
                    event.kind,
                    event.channel_id,
                    session_key.map(SessionKey::as_str).unwrap_or("-"),
                    e
                );
                DeliveryResult::failed(&e)
            }
        }
    }

    async fn deliver(
        &self,
        identity: &BotIdentity,
        envelope: &OutboundEnvelope,
    ) -> Result<DeliveryResult, DeliveryError> {
        let mut req = self
            .client
            .post(identity.sink_url.clone())
            .timeout(self.timeout)
            .json(envelope);
        if let Some(ref secret) = identity.shared_secret {
            req = req.header(API_KEY_HEADER, secret);
        }
        let res = req.send().await?;
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                body: truncate_for_log(&body, LOG_BODY_LIMIT),
            });
        }
        let reply = serde_json::from_str::<SinkReply>(&body)
            .ok()
            .and_then(|r| r.response)
            .filter(|r| !r.trim().is_empty());
        Ok(DeliveryResult::success(status.as_u16(), reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::enrich::HistoryMessage;
    use crate::config::Transport;
    use crate::events::{resolve, EventKind};
    use crate::identity::InboundCredentials;
    use httpmock::prelude::*;
    use serde_json::json;

    fn identity(sink: &str, secret: Option<&str>, mode: ForwardMode) -> BotIdentity {
        BotIdentity {
            name: "DummyBot".to_string(),
            transport: Transport::Socket,
            credentials: InboundCredentials {
                bot_token: "xoxb".to_string(),
                app_token: Some("xapp".to_string()),
            },
            sink_url: reqwest::Url::parse(sink).expect("url"),
            shared_secret: secret.map(str::to_string),
            forward_mode: mode,
            relay_replies: false,
            ignore_events: Vec::new(),
        }
    }

    fn mention() -> InboundEvent {
        InboundEvent {
            kind: EventKind::AppMention,
            channel_id: "C1".to_string(),
            actor_id: "U1".to_string(),
            text: "<@UBOT> status?".to_string(),
            event_ts: Some("100.2".to_string()),
            thread_ts: Some("100.1".to_string()),
            raw: json!({ "type": "app_mention" }),
        }
    }

    fn context() -> ThreadContext {
        ThreadContext::from_history(&[HistoryMessage {
            user: Some("U1".to_string()),
            text: Some("earlier".to_string()),
            ts: Some("100.1".to_string()),
            ..HistoryMessage::default()
        }])
    }

    fn dispatcher() -> ForwardDispatcher {
        ForwardDispatcher::new(reqwest::Client::new(), Duration::from_secs(5))
    }

    #[test]
    fn session_id_omitted_when_absent() {
        let envelope =
            OutboundEnvelope::build(&mention(), None, &ThreadContext::default(), ForwardMode::Text)
                .expect("build");
        let value = serde_json::to_value(&envelope).expect("json");
        assert_eq!(
            value,
            json!({ "input_value": "<@UBOT> status?", "input_type": "text", "output_type": "text" })
        );
    }

    #[test]
    fn event_mode_serializes_event_with_history() {
        let key = resolve("C1", Some("100.1"), Some("100.2")).expect("key");
        let envelope =
            OutboundEnvelope::build(&mention(), Some(&key), &context(), ForwardMode::Event)
                .expect("build");
        assert_eq!(envelope.session_id.as_deref(), Some("C1-100.1"));
        let inner: Value = serde_json::from_str(&envelope.input_value).expect("inner json");
        assert_eq!(inner["type"], "app_mention");
        assert_eq!(inner["thread_ts"], "100.1");
        assert_eq!(inner["thread_history"][0]["author_marker"], "<@U1>");
        assert_eq!(inner["thread_history"][0]["text"], "earlier");
    }

    #[test]
    fn text_mode_prefixes_history() {
        let envelope =
            OutboundEnvelope::build(&mention(), None, &context(), ForwardMode::Text).expect("build");
        assert_eq!(
            envelope.input_value,
            "Thread history:\n<@U1>: earlier\n\n<@UBOT> status?"
        );
    }

    #[tokio::test]
    async fn posts_json_with_api_key_and_reads_reply() {
        let server = MockServer::start();
        let sink = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v1/run/flow")
                .header("content-type", "application/json")
                .header("x-api-key", "sk-1")
                .json_body(json!({
                    "input_value": "<@UBOT> status?",
                    "input_type": "text",
                    "output_type": "text",
                    "session_id": "C1-100.1"
                }));
            then.status(200).json_body(json!({ "response": "all green" }));
        });
        let id = identity(&server.url("/api/v1/run/flow"), Some("sk-1"), ForwardMode::Text);
        let key = resolve("C1", Some("100.1"), Some("100.2")).expect("key");
        let result = dispatcher()
            .forward(&id, &mention(), Some(&key), &ThreadContext::default())
            .await;
        sink.assert_calls(1);
        assert!(result.is_success());
        assert_eq!(result.code, Some(200));
        assert_eq!(result.reply.as_deref(), Some("all green"));
    }

    #[tokio::test]
    async fn no_api_key_header_without_secret() {
        let server = MockServer::start();
        let with_key = server.mock(|when, then| {
            when.method(POST).path("/sink").header_exists("x-api-key");
            then.status(200);
        });
        let plain = server.mock(|when, then| {
            when.method(POST).path("/sink");
            then.status(204);
        });
        let id = identity(&server.url("/sink"), None, ForwardMode::Event);
        let result = dispatcher()
            .forward(&id, &mention(), None, &ThreadContext::default())
            .await;
        with_key.assert_calls(0);
        plain.assert_calls(1);
        assert!(result.is_success());
        assert_eq!(result.reply, None);
    }

    #[tokio::test]
    async fn http_500_is_http_error() {
        let server = MockServer::start();
        let sink = server.mock(|when, then| {
            when.method(POST).path("/sink");
            then.status(500).body("x".repeat(2_000));
        });
        let id = identity(&server.url("/sink"), None, ForwardMode::Text);
        let result = dispatcher()
            .forward(&id, &mention(), None, &ThreadContext::default())
            .await;
        sink.assert_calls(1);
        assert_eq!(result.status_class, DeliveryStatus::HttpError);
        assert_eq!(result.code, Some(500));
        let message = result.message.expect("message");
        assert!(message.len() < 600);
    }

    #[tokio::test]
    async fn unreachable_sink_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let id = identity(&format!("http://127.0.0.1:{port}/sink"), None, ForwardMode::Text);
        let result = dispatcher()
            .forward(&id, &mention(), None, &ThreadContext::default())
            .await;
        assert_eq!(result.status_class, DeliveryStatus::TransportError);
        assert_eq!(result.code, None);
    }
}
