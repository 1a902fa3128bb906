//! Socket-mode connection manager: one supervised duplex session per identity.

use super::ack::AckController;
use super::api::SlackApiClient;
use crate::config::SocketConfig;
use crate::error::ConnectionError;
use crate::identity::BotIdentity;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

/// Socket-mode frame: `{envelope_id?, type, payload?}`.
#[derive(Debug, Deserialize)]
struct SocketEnvelope {
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

/// Why a session ended without a transport error.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    Stopped,
    /// Slack asked us to reconnect (`disconnect` envelope).
    Refresh(String),
    Closed,
    WorkerGone,
}

/// Owns the socket-mode session for one identity and reconnects it until stopped.
pub struct ConnectionManager {
    identity: Arc<BotIdentity>,
    api: SlackApiClient,
    settings: SocketConfig,
    stop_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(identity: Arc<BotIdentity>, api: SlackApiClient, settings: SocketConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            identity,
            api,
            settings,
            stop_tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    fn stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Stop reading frames and close the session. The connection task then exits.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Start the session loop. Each envelope is acknowledged before its payload is queued
    /// on `worker_tx`. Returns a handle to await on shutdown.
    pub fn start(self: Arc<Self>, worker_tx: mpsc::Sender<Value>) -> JoinHandle<()> {
        log::info!("bot {}: starting socket-mode connection", self.identity.name);
        tokio::spawn(async move {
            run_connection_loop(self, worker_tx).await;
        })
    }

    async fn run_session(
        &self,
        worker_tx: &mpsc::Sender<Value>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, ConnectionError> {
        let name = &self.identity.name;
        let connect = async {
            let url = self.api.open_socket_connection().await?;
            let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            Ok::<_, ConnectionError>(ws)
        };
        let ws = tokio::select! {
            _ = stop_rx.changed() => return Ok(SessionEnd::Stopped),
            ws = connect => ws?,
        };
        let (sink, mut stream) = ws.split();
        let mut acks = AckController::new(sink, name.clone(), self.settings.ack_deadline());
        log::info!("bot {}: socket session open", name);

        loop {
            let frame = tokio::select! {
                _ = stop_rx.changed() => {
                    acks.close().await;
                    return Ok(SessionEnd::Stopped);
                }
                frame = stream.next() => frame,
            };
            let received_at = Instant::now();
            let text = match frame {
                None => return Ok(SessionEnd::Closed),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        log::warn!("bot {}: ignoring non-utf8 binary frame", name);
                        continue;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    log::info!("bot {}: socket closed by peer: {:?}", name, frame);
                    return Ok(SessionEnd::Closed);
                }
                Some(Ok(_)) => continue,
            };
            let envelope: SocketEnvelope = match serde_json::from_str(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    log::warn!("bot {}: ignoring unparseable frame: {}", name, e);
                    continue;
                }
            };

            if let Some(id) = envelope.envelope_id.as_deref().filter(|id| !id.is_empty()) {
                if let Err(e) = acks.ack(id, received_at).await {
                    log::error!("bot {}: {}", name, e);
                }
            }

            match envelope.kind.as_str() {
                "hello" => log::info!("bot {}: socket-mode hello received", name),
                "disconnect" => {
                    return Ok(SessionEnd::Refresh(
                        envelope.reason.unwrap_or_else(|| "unspecified".to_string()),
                    ));
                }
                "events_api" => {
                    let Some(payload) = envelope.payload else {
                        log::warn!("bot {}: events_api envelope without payload", name);
                        continue;
                    };
                    tokio::select! {
                        _ = stop_rx.changed() => {
                            acks.close().await;
                            return Ok(SessionEnd::Stopped);
                        }
                        sent = worker_tx.send(payload) => {
                            if sent.is_err() {
                                return Ok(SessionEnd::WorkerGone);
                            }
                        }
                    }
                }
                other => log::debug!("bot {}: ignoring {} envelope", name, other),
            }
        }
    }
}

async fn run_connection_loop(manager: Arc<ConnectionManager>, worker_tx: mpsc::Sender<Value>) {
    let name = manager.identity.name.clone();
    let mut stop_rx = manager.stop_tx.subscribe();
    while !manager.stopped() {
        let retry = match manager.run_session(&worker_tx, &mut stop_rx).await {
            Ok(SessionEnd::Stopped) => break,
            Ok(SessionEnd::WorkerGone) => {
                log::warn!("bot {}: worker queue closed, stopping connection", name);
                break;
            }
            Ok(SessionEnd::Refresh(reason)) => {
                log::info!("bot {}: disconnect requested ({}), reconnecting", name, reason);
                false
            }
            Ok(SessionEnd::Closed) => {
                log::warn!("bot {}: socket session closed, reconnecting", name);
                true
            }
            Err(e) => {
                log::warn!("bot {}: {}", name, e);
                true
            }
        };
        if retry {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = tokio::time::sleep(manager.settings.reconnect_delay()) => {}
            }
        }
    }
    log::info!("bot {}: socket-mode connection stopped", name);
}
