//! Session key derivation: every message in one reply thread maps to one key.

use crate::error::MalformedEventError;
use serde::Serialize;
use std::fmt;

/// Opaque grouping key `channel_id-(thread_ts | event_ts)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        key.0
    }
}

/// Derive the session key. A non-empty `thread_ts` takes precedence over `event_ts`.
pub fn resolve(
    channel_id: &str,
    thread_ts: Option<&str>,
    event_ts: Option<&str>,
) -> Result<SessionKey, MalformedEventError> {
    if channel_id.is_empty() {
        return Err(MalformedEventError::MissingChannel);
    }
    let anchor = thread_ts
        .filter(|ts| !ts.is_empty())
        .or(event_ts.filter(|ts| !ts.is_empty()))
        .ok_or_else(|| MalformedEventError::MissingTimestamps {
            channel_id: channel_id.to_string(),
        })?;
    Ok(SessionKey(format!("{channel_id}-{anchor}")))
}
