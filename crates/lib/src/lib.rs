//! Flowbridge core library: bridges Slack bot events to HTTP workflow sinks.
//!
//! Each configured bot identity gets its own socket-mode connection (or webhook route)
//! and one worker that normalizes, enriches and forwards events in arrival order.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod identity;
pub mod slack;
