//! Inbound event model: normalization of raw platform payloads, session keys, and the
//! per-identity event-type routing table.

mod dispatch_table;
mod inbound;
mod session_key;

pub use dispatch_table::{DispatchTable, Route};
pub use inbound::{normalize, EventKind, InboundEvent, Normalized};
pub use session_key::{resolve, SessionKey};
