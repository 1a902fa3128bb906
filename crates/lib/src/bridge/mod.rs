//! The event bridge: enrichment, sink delivery, and the per-identity pipeline and worker.

mod enrich;
mod forward;
mod pipeline;
mod worker;

pub use enrich::{
    HistoryMessage, HistorySource, ThreadContext, ThreadEnricher, ThreadMessage,
    THREAD_CONTEXT_LIMIT,
};
pub use forward::{
    DeliveryResult, DeliveryStatus, ForwardDispatcher, OutboundEnvelope, API_KEY_HEADER,
};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use worker::{spawn_worker, WORKER_QUEUE_CAPACITY};
