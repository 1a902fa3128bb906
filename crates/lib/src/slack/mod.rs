//! Slack platform plumbing: Web API calls and socket-mode sessions.

mod ack;
mod api;
mod socket;

pub use ack::AckController;
pub use api::SlackApiClient;
pub use socket::ConnectionManager;
