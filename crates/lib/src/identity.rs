//! Bot identities and the registry built from configuration at startup.

use crate::config::{self, BotConfig, Config, ForwardMode, Transport};
use crate::error::ConfigurationError;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Credential pair used to reach the platform.
#[derive(Clone)]
pub struct InboundCredentials {
    /// Long-lived bot token (`xoxb-`), used for Web API queries and replies.
    pub bot_token: String,
    /// App-level token (`xapp-`) used to open socket-mode sessions. None for webhook identities.
    pub app_token: Option<String>,
}

impl fmt::Debug for InboundCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundCredentials")
            .field("bot_token", &"<redacted>")
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One configured bot persona. Immutable for the process lifetime.
#[derive(Clone)]
pub struct BotIdentity {
    pub name: String,
    pub transport: Transport,
    pub credentials: InboundCredentials,
    pub sink_url: reqwest::Url,
    pub shared_secret: Option<String>,
    pub forward_mode: ForwardMode,
    pub relay_replies: bool,
    pub ignore_events: Vec<String>,
}

impl fmt::Debug for BotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotIdentity")
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("credentials", &self.credentials)
            .field("sink_url", &self.sink_url.as_str())
            .field(
                "shared_secret",
                &self.shared_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("forward_mode", &self.forward_mode)
            .field("relay_replies", &self.relay_replies)
            .field("ignore_events", &self.ignore_events)
            .finish()
    }
}

impl BotIdentity {
    /// Validate one bot entry and resolve its secrets.
    pub fn from_config(
        index: usize,
        bot: &BotConfig,
        default_mode: ForwardMode,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let name = bot.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigurationError::MissingName { index });
        }
        let missing = |field: &'static str| ConfigurationError::MissingValue {
            name: name.clone(),
            field,
        };

        let bot_token = config::resolve_value(
            bot.bot_token_env.as_deref(),
            bot.bot_token.as_deref(),
            lookup,
        )
        .ok_or_else(|| missing("bot token"))?;
        let app_token = config::resolve_value(
            bot.app_token_env.as_deref(),
            bot.app_token.as_deref(),
            lookup,
        );
        if bot.transport == Transport::Socket && app_token.is_none() {
            return Err(missing("app token"));
        }

        let raw_url = config::resolve_value(
            bot.sink_url_env.as_deref(),
            bot.sink_url.as_deref(),
            lookup,
        )
        .ok_or_else(|| missing("sink url"))?;
        let sink_url = parse_sink_url(&name, &raw_url)?;

        let shared_secret = config::resolve_value(
            bot.api_key_env.as_deref(),
            bot.api_key.as_deref(),
            lookup,
        );

        Ok(Self {
            name,
            transport: bot.transport,
            credentials: InboundCredentials {
                bot_token,
                app_token,
            },
            sink_url,
            shared_secret,
            forward_mode: bot.forward_mode.unwrap_or(default_mode),
            relay_replies: bot.relay_replies,
            ignore_events: bot
                .ignore_events
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
        })
    }
}

fn parse_sink_url(name: &str, raw: &str) -> Result<reqwest::Url, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidSinkUrl {
        name: name.to_string(),
        url: raw.to_string(),
        reason,
    };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("unsupported scheme {other}"))),
    }
}

/// The set of identities that passed validation. Built once, read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct IdentityRegistry {
    identities: Vec<Arc<BotIdentity>>,
}

impl IdentityRegistry {
    /// Build from config; returns the registry plus one error per rejected identity.
    pub fn build(
        config: &Config,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> (Self, Vec<ConfigurationError>) {
        let mut identities = Vec::new();
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for (index, bot) in config::effective_bots(config, lookup).iter().enumerate() {
            match BotIdentity::from_config(index, bot, config.forward.mode, lookup) {
                Ok(identity) => {
                    if !seen.insert(identity.name.clone()) {
                        errors.push(ConfigurationError::DuplicateName {
                            name: identity.name,
                        });
                        continue;
                    }
                    identities.push(Arc::new(identity));
                }
                Err(e) => errors.push(e),
            }
        }
        (Self { identities }, errors)
    }

    pub fn get(&self, name: &str) -> Option<Arc<BotIdentity>> {
        self.identities.iter().find(|i| i.name == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BotIdentity>> {
        self.identities.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.identities.iter().map(|i| i.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}
