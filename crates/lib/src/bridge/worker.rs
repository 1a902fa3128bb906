//! Per-identity worker: drains one FIFO queue, one payload at a time.

use super::pipeline::{Pipeline, PipelineOutcome};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Payloads waiting for one identity before the reader (or webhook handler) is pushed back.
pub const WORKER_QUEUE_CAPACITY: usize = 256;

/// Spawn the worker. It runs until every sender is dropped and the queue is drained.
pub fn spawn_worker(pipeline: Arc<Pipeline>) -> (mpsc::Sender<Value>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Value>(WORKER_QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        let name = pipeline.identity().name.clone();
        log::debug!("bot {}: worker started", name);
        while let Some(payload) = rx.recv().await {
            match pipeline.handle(&payload).await {
                PipelineOutcome::Challenge(_) => {
                    log::debug!("bot {}: url verification reached worker, nothing to forward", name);
                }
                PipelineOutcome::Delivered(result) if !result.is_success() => {
                    log::debug!("bot {}: delivery outcome {:?}", name, result.status_class);
                }
                _ => {}
            }
        }
        log::info!("bot {}: worker stopped", name);
    });
    (tx, handle)
}
