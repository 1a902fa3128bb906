//! Gateway: HTTP liveness probe and webhook intake, and the lifecycle of the bridge behind it.
//!
//! One port serves `GET /` and `POST /slack/events/{identity}`. Socket-mode identities are
//! driven by their own connection tasks; every identity has one worker.

mod server;

pub use server::{build_registry, run_gateway, serve};
