//! Gateway HTTP server: liveness probe and inbound webhooks, plus the bridge it supervises.

use crate::bridge::{spawn_worker, ForwardDispatcher, Pipeline};
use crate::config::{self, Config, Transport};
use crate::identity::IdentityRegistry;
use crate::slack::{ConnectionManager, SlackApiClient};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Time workers get to drain their queues after the listener stops.
const WORKER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for the HTTP routes.
#[derive(Clone)]
struct GatewayState {
    registry: Arc<IdentityRegistry>,
    /// Queue of each identity's worker, by identity name.
    workers: Arc<HashMap<String, mpsc::Sender<Value>>>,
}

/// Workers and socket connections for every registered identity.
struct Bridge {
    workers: HashMap<String, mpsc::Sender<Value>>,
    worker_tasks: Vec<JoinHandle<()>>,
    connections: Vec<Arc<ConnectionManager>>,
    connection_tasks: Vec<JoinHandle<()>>,
}

impl Bridge {
    /// Spawn one worker per identity and one connection per socket-mode identity.
    fn start(config: &Config, registry: &IdentityRegistry) -> Self {
        let http = reqwest::Client::new();
        let dispatcher = ForwardDispatcher::new(http.clone(), config.forward.timeout());
        let mut bridge = Bridge {
            workers: HashMap::new(),
            worker_tasks: Vec::new(),
            connections: Vec::new(),
            connection_tasks: Vec::new(),
        };

        for identity in registry.iter() {
            let api = SlackApiClient::new(
                http.clone(),
                &config.socket.api_base,
                identity.credentials.bot_token.clone(),
                identity.credentials.app_token.clone(),
            );
            let mut pipeline =
                Pipeline::new(identity.clone(), Arc::new(api.clone()), dispatcher.clone());
            if identity.relay_replies {
                pipeline = pipeline.with_relay(api.clone());
            }
            let (tx, task) = spawn_worker(Arc::new(pipeline));
            bridge.worker_tasks.push(task);

            if identity.transport == Transport::Socket {
                let manager = Arc::new(ConnectionManager::new(
                    identity.clone(),
                    api,
                    config.socket.clone(),
                ));
                bridge
                    .connection_tasks
                    .push(manager.clone().start(tx.clone()));
                bridge.connections.push(manager);
            } else {
                log::info!(
                    "bot {}: webhook mode, events accepted at /slack/events/{}",
                    identity.name,
                    identity.name
                );
            }
            bridge.workers.insert(identity.name.clone(), tx);
        }
        bridge
    }

    /// Wait for connections to close, then give workers the grace period before abandoning them.
    async fn drain(self, grace: Duration) {
        for task in self.connection_tasks {
            let _ = task.await;
        }
        drop(self.workers);

        let aborts: Vec<_> = self.worker_tasks.iter().map(|t| t.abort_handle()).collect();
        let all = futures_util::future::join_all(self.worker_tasks);
        if tokio::time::timeout(grace, all).await.is_err() {
            log::warn!(
                "workers still busy after {:?}, abandoning in-flight deliveries",
                grace
            );
            for abort in aborts {
                abort.abort();
            }
        }
        log::info!("bridge workers finished");
    }
}

/// Build the registry from config and the process environment, then serve on
/// `gateway.bind:gateway.port` until SIGINT/SIGTERM. Fails when no identity passes validation.
pub async fn run_gateway(config: Config, config_path: PathBuf) -> Result<()> {
    log::debug!("using config {}", config_path.display());
    let registry = build_registry(&config)?;

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    serve(listener, &config, registry, shutdown_signal()).await
}

/// Validate identities; rejected ones are logged and skipped.
pub fn build_registry(config: &Config) -> Result<IdentityRegistry> {
    let (registry, errors) = IdentityRegistry::build(config, &config::env_lookup);
    for e in &errors {
        log::error!("configuration error, identity not started: {}", e);
    }
    if registry.is_empty() {
        anyhow::bail!(
            "no valid bot identity configured ({} rejected); set bots in the config file or BOT_NAME/BOT_TOKEN/APP_TOKEN/PING_URL",
            errors.len()
        );
    }
    log::info!("{} bot identit(ies): {}", registry.len(), registry.names().join(", "));
    Ok(registry)
}

/// Run the bridge and HTTP routes on `listener` until `shutdown` completes, then stop
/// connections and drain workers.
pub async fn serve<F>(
    listener: TcpListener,
    config: &Config,
    registry: IdentityRegistry,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bridge = Bridge::start(config, &registry);
    let state = GatewayState {
        registry: Arc::new(registry),
        workers: Arc::new(bridge.workers.clone()),
    };
    let app = router(state);

    let connections = bridge.connections.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            log::info!("shutdown requested, closing connections");
            for connection in connections {
                connection.stop();
            }
        })
        .await
        .context("gateway server exited")?;

    bridge.drain(WORKER_SHUTDOWN_GRACE).await;
    log::info!("gateway stopped");
    Ok(())
}

fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/slack/events/:identity", post(slack_events))
        .with_state(state)
}

/// Future that completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received");
}

/// GET / for orchestration probes.
async fn health_http() -> &'static str {
    "OK"
}

/// POST /slack/events/{identity}: echoes URL verification, queues everything else.
async fn slack_events(
    State(state): State<GatewayState>,
    Path(identity): Path<String>,
    body: Bytes,
) -> Response {
    let Some(tx) = state
        .registry
        .get(&identity)
        .and_then(|bot| state.workers.get(&bot.name))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    if payload.get("type").and_then(Value::as_str) == Some("url_verification") {
        let challenge = payload
            .get("challenge")
            .cloned()
            .unwrap_or(Value::String(String::new()));
        return Json(json!({ "challenge": challenge })).into_response();
    }
    match tx.try_send(payload) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(TrySendError::Full(_)) => {
            log::warn!("bot {}: worker queue full, rejecting webhook event", identity);
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
        Err(TrySendError::Closed(_)) => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
