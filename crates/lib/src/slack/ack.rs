//! Envelope acknowledgment on the socket-mode write half.

use crate::error::ConnectionError;
use futures_util::{Sink, SinkExt};
use serde_json::json;
use std::fmt::Display;
use std::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

/// Sends `{"envelope_id": ...}` for each received envelope and tracks ack latency.
pub struct AckController<S> {
    sink: S,
    identity: String,
    deadline: Duration,
}

impl<S> AckController<S>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    pub fn new(sink: S, identity: impl Into<String>, deadline: Duration) -> Self {
        Self {
            sink,
            identity: identity.into(),
            deadline,
        }
    }

    /// Acknowledge one envelope. Returns the latency measured from `received_at`.
    /// Acks that miss the deadline are logged as warnings; failures are returned, the caller
    /// keeps the session open.
    pub async fn ack(
        &mut self,
        envelope_id: &str,
        received_at: Instant,
    ) -> Result<Duration, ConnectionError> {
        let frame = json!({ "envelope_id": envelope_id }).to_string();
        self.sink
            .send(Message::Text(frame))
            .await
            .map_err(|e| ConnectionError::Ack {
                envelope_id: envelope_id.to_string(),
                reason: e.to_string(),
            })?;
        let latency = received_at.elapsed();
        if latency > self.deadline {
            log::warn!(
                "bot {}: envelope {} acknowledged after {:?} (deadline {:?})",
                self.identity,
                envelope_id,
                latency,
                self.deadline
            );
        } else {
            log::debug!(
                "bot {}: envelope {} acknowledged in {:?}",
                self.identity,
                envelope_id,
                latency
            );
        }
        Ok(latency)
    }

    /// Send a close frame. Errors are ignored; the session is ending anyway.
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            log::debug!("bot {}: close frame not sent: {}", self.identity, e);
        }
    }

    #[cfg(test)]
    fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_sends_envelope_id_frame() {
        let mut acks = AckController::new(Vec::<Message>::new(), "A", Duration::from_secs(3));
        let latency = acks.ack("env-1", Instant::now()).await.expect("acked");
        assert!(latency < Duration::from_secs(3));
        assert_eq!(
            acks.sink(),
            &vec![Message::Text(r#"{"envelope_id":"env-1"}"#.to_string())]
        );
    }

    #[tokio::test]
    async fn late_ack_is_still_sent() {
        let mut acks = AckController::new(Vec::<Message>::new(), "A", Duration::from_millis(1));
        let received_at = Instant::now() - Duration::from_millis(50);
        let latency = acks.ack("env-2", received_at).await.expect("acked");
        assert!(latency >= Duration::from_millis(50));
        assert_eq!(acks.sink().len(), 1);
    }

    #[tokio::test]
    async fn close_sends_close_frame() {
        let mut acks = AckController::new(Vec::<Message>::new(), "A", Duration::from_secs(3));
        acks.close().await;
        assert_eq!(acks.sink(), &vec![Message::Close(None)]);
    }
}
