//! Best-effort thread history for reply events.

use crate::error::EnrichmentError;
use crate::events::InboundEvent;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Entries kept from the end of a thread.
pub const THREAD_CONTEXT_LIMIT: usize = 5;

/// Marker used for messages posted by a bot.
pub const BOT_AUTHOR_MARKER: &str = "Bot";

/// One message as returned by the platform's history query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

impl HistoryMessage {
    fn is_from_bot(&self) -> bool {
        self.bot_id.as_deref().is_some_and(|b| !b.is_empty())
            || self.subtype.as_deref() == Some("bot_message")
    }

    /// `"Bot"` for bot-origin messages, otherwise a `<@user>` mention.
    pub fn author_marker(&self) -> String {
        if self.is_from_bot() {
            return BOT_AUTHOR_MARKER.to_string();
        }
        match self.user.as_deref().filter(|u| !u.is_empty()) {
            Some(user) => format!("<@{user}>"),
            None => "<@unknown>".to_string(),
        }
    }
}

/// Where thread history comes from. Implemented by the Slack Web API client.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// All messages of the thread rooted at `thread_ts`, oldest first.
    async fn thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<HistoryMessage>, EnrichmentError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadMessage {
    pub author_marker: String,
    pub text: String,
    pub ts: String,
}

impl From<&HistoryMessage> for ThreadMessage {
    fn from(msg: &HistoryMessage) -> Self {
        Self {
            author_marker: msg.author_marker(),
            text: msg.text.clone().unwrap_or_default(),
            ts: msg.ts.clone().unwrap_or_default(),
        }
    }
}

/// Most-recent-last window of a thread, at most [`THREAD_CONTEXT_LIMIT`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ThreadContext(Vec<ThreadMessage>);

impl ThreadContext {
    /// Keep the last [`THREAD_CONTEXT_LIMIT`] messages in their original order.
    pub fn from_history(history: &[HistoryMessage]) -> Self {
        let start = history.len().saturating_sub(THREAD_CONTEXT_LIMIT);
        Self(history[start..].iter().map(ThreadMessage::from).collect())
    }

    pub fn messages(&self) -> &[ThreadMessage] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One `<marker>: <text>` line per message.
    pub fn render(&self) -> String {
        self.0
            .iter()
            .map(|m| format!("{}: {}", m.author_marker, m.text))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Attaches recent thread history to reply events. Never fails the pipeline.
#[derive(Clone)]
pub struct ThreadEnricher {
    identity: String,
    source: Arc<dyn HistorySource>,
}

impl ThreadEnricher {
    pub fn new(identity: impl Into<String>, source: Arc<dyn HistorySource>) -> Self {
        Self {
            identity: identity.into(),
            source,
        }
    }

    /// Empty unless the event is a reply (`thread_ts` set and different from `event_ts`).
    /// Query failures are logged and yield an empty context.
    pub async fn enrich(&self, event: &InboundEvent) -> ThreadContext {
        if !event.is_thread_reply() || event.channel_id.is_empty() {
            return ThreadContext::default();
        }
        let Some(thread_ts) = event.thread_ts.as_deref() else {
            return ThreadContext::default();
        };
        match self.source.thread_replies(&event.channel_id, thread_ts).await {
            Ok(history) => {
                let context = ThreadContext::from_history(&history);
                log::debug!(
                    "bot {}: thread {} {}: {} of {} message(s) attached",
                    self.identity,
                    event.channel_id,
                    thread_ts,
                    context.len(),
                    history.len()
                );
                context
            }
            Err(e) => {
                log::warn!(
                    "bot {}: thread history for {} {} unavailable: {}",
                    self.identity,
                    event.channel_id,
                    thread_ts,
                    e
                );
                ThreadContext::default()
            }
        }
    }
}
