//! One identity's event path: normalize, route, resolve key, enrich, dispatch, relay.

use super::enrich::{HistorySource, ThreadEnricher};
use super::forward::{DeliveryResult, ForwardDispatcher};
use crate::error::MalformedEventError;
use crate::events::{self, DispatchTable, EventKind, InboundEvent, Normalized, Route};
use crate::identity::BotIdentity;
use crate::slack::SlackApiClient;
use serde_json::Value;
use std::sync::Arc;

/// What happened to one payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    /// URL-verification handshake; the caller echoes the challenge.
    Challenge(String),
    Ignored(EventKind),
    /// Not an event at all; nothing was forwarded.
    Malformed(MalformedEventError),
    Delivered(DeliveryResult),
}

pub struct Pipeline {
    identity: Arc<BotIdentity>,
    table: DispatchTable,
    enricher: ThreadEnricher,
    dispatcher: ForwardDispatcher,
    relay: Option<SlackApiClient>,
}

impl Pipeline {
    pub fn new(
        identity: Arc<BotIdentity>,
        history: Arc<dyn HistorySource>,
        dispatcher: ForwardDispatcher,
    ) -> Self {
        Self {
            table: DispatchTable::with_ignored(&identity.ignore_events),
            enricher: ThreadEnricher::new(identity.name.clone(), history),
            identity,
            dispatcher,
            relay: None,
        }
    }

    /// Post 2xx `response` bodies back into the originating thread.
    pub fn with_relay(mut self, client: SlackApiClient) -> Self {
        self.relay = Some(client);
        self
    }

    pub fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    pub async fn handle(&self, payload: &Value) -> PipelineOutcome {
        let name = &self.identity.name;
        let event = match events::normalize(payload) {
            Ok(Normalized::Challenge(challenge)) => return PipelineOutcome::Challenge(challenge),
            Ok(Normalized::Event(event)) => event,
            Err(e) => {
                log::warn!("bot {}: discarding payload: {}", name, e);
                return PipelineOutcome::Malformed(e);
            }
        };

        if event.is_bot_authored() {
            log::debug!(
                "bot {}: skipping bot-authored message in {}",
                name,
                event.channel_id
            );
            return PipelineOutcome::Ignored(event.kind);
        }

        if self.table.route(&event.kind) == Route::Ignore {
            log::debug!("bot {}: {} event ignored", name, event.kind);
            return PipelineOutcome::Ignored(event.kind);
        }

        let session_key = match events::resolve(
            &event.channel_id,
            event.thread_ts.as_deref(),
            event.event_ts.as_deref(),
        ) {
            Ok(key) => Some(key),
            Err(e) => {
                log::warn!(
                    "bot {}: {} event forwarded without session key: {}",
                    name,
                    event.kind,
                    e
                );
                None
            }
        };

        let context = self.enricher.enrich(&event).await;
        let result = self
            .dispatcher
            .forward(&self.identity, &event, session_key.as_ref(), &context)
            .await;

        if let Some(reply) = result.reply.as_deref() {
            self.relay_reply(&event, reply).await;
        }
        PipelineOutcome::Delivered(result)
    }

    async fn relay_reply(&self, event: &InboundEvent, reply: &str) {
        let Some(ref client) = self.relay else {
            return;
        };
        if event.channel_id.is_empty() {
            return;
        }
        let thread = event
            .thread_ts
            .as_deref()
            .filter(|ts| !ts.is_empty())
            .or(event.event_ts.as_deref());
        if let Err(e) = client.post_message(&event.channel_id, reply, thread).await {
            log::warn!(
                "bot {}: relaying reply to {} failed: {}",
                self.identity.name,
                event.channel_id,
                e
            );
        }
    }
}
