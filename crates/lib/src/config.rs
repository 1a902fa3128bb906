//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.flowbridge/config.json`) and environment.
//! Credentials are normally referenced by environment variable name so the file itself
//! can be committed; environment values win over literal values in the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Slack Web API base used when `socket.apiBase` is not set.
pub const SLACK_API_BASE: &str = "https://slack.com/api";

const MIN_FORWARD_TIMEOUT_MS: u64 = 5_000;
const MAX_FORWARD_TIMEOUT_MS: u64 = 10_000;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Health probe and webhook listener.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Sink delivery defaults shared by all identities.
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Socket-mode connection settings shared by all identities.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Configured bot identities. When empty, one identity is read from the legacy
    /// `BOT_NAME` / `BOT_TOKEN` / `APP_TOKEN` / `PING_URL` / `FLOW_API_KEY` variables.
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

/// Listener for `GET /` and inbound webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port (default 8080). Overridden by the PORT env var.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0", probes come from the orchestrator).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    8080
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// What goes into the envelope's `input_value`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMode {
    /// The normalized event serialized as JSON (plus thread history when present).
    #[default]
    Event,
    /// Only the message text, prefixed with rendered thread history when present.
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardConfig {
    /// Per-request timeout for sink delivery; clamped to 5..=10 seconds.
    #[serde(default = "default_forward_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub mode: ForwardMode,
}

fn default_forward_timeout_ms() -> u64 {
    MIN_FORWARD_TIMEOUT_MS
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_forward_timeout_ms(),
            mode: ForwardMode::default(),
        }
    }
}

impl ForwardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(
            self.timeout_ms
                .clamp(MIN_FORWARD_TIMEOUT_MS, MAX_FORWARD_TIMEOUT_MS),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketConfig {
    /// Slack Web API base (tests point this at a local server).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Pause between a dropped session and the next `apps.connections.open`.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Acks slower than this are logged as warnings. Slack's window is 3 seconds.
    #[serde(default = "default_ack_deadline_ms")]
    pub ack_deadline_ms: u64,
}

fn default_api_base() -> String {
    SLACK_API_BASE.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_ack_deadline_ms() -> u64 {
    3_000
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            ack_deadline_ms: default_ack_deadline_ms(),
        }
    }
}

impl SocketConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_millis(self.ack_deadline_ms.max(1))
    }
}

/// How an identity receives events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Persistent socket-mode connection (needs bot + app token).
    #[default]
    Socket,
    /// Slack POSTs events to `/slack/events/{name}` on the gateway (bot token only).
    Webhook,
}

/// One bot identity as written in the config file.
///
/// Each secret can be given literally or as the name of an env var; the env var wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub transport: Transport,

    pub bot_token: Option<String>,
    pub bot_token_env: Option<String>,

    pub app_token: Option<String>,
    pub app_token_env: Option<String>,

    pub sink_url: Option<String>,
    pub sink_url_env: Option<String>,

    /// Shared secret sent to the sink as `x-api-key`.
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,

    /// Overrides `forward.mode` for this identity.
    #[serde(default)]
    pub forward_mode: Option<ForwardMode>,

    /// Post a 2xx sink body's `response` string back into the thread.
    #[serde(default)]
    pub relay_replies: bool,

    /// Event types (e.g. "message") that this identity acknowledges but never forwards.
    #[serde(default)]
    pub ignore_events: Vec<String>,
}

/// Trim and drop empty strings.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve a value: the named env var (when set and non-blank) overrides the literal value.
pub fn resolve_value(
    env_name: Option<&str>,
    literal: Option<&str>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Option<String> {
    env_name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .and_then(|name| non_blank(lookup(name)))
        .or_else(|| non_blank(literal.map(str::to_string)))
}

/// Read a variable from the process environment.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolve the listener port: env PORT overrides config.
pub fn resolve_gateway_port(config: &Config, lookup: &dyn Fn(&str) -> Option<String>) -> u16 {
    non_blank(lookup("PORT"))
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(config.gateway.port)
}

/// Single identity described by the legacy env variables, if any of them is set.
pub fn legacy_bot_from_env(lookup: &dyn Fn(&str) -> Option<String>) -> Option<BotConfig> {
    let any_set = ["BOT_NAME", "BOT_TOKEN", "APP_TOKEN", "PING_URL"]
        .iter()
        .any(|key| non_blank(lookup(key)).is_some());
    if !any_set {
        return None;
    }
    Some(BotConfig {
        name: non_blank(lookup("BOT_NAME")).unwrap_or_default(),
        transport: Transport::Socket,
        bot_token_env: Some("BOT_TOKEN".to_string()),
        app_token_env: Some("APP_TOKEN".to_string()),
        sink_url_env: Some("PING_URL".to_string()),
        api_key_env: Some("FLOW_API_KEY".to_string()),
        ..BotConfig::default()
    })
}

/// The identities to start: configured bots, or the legacy env identity when none are configured.
pub fn effective_bots(config: &Config, lookup: &dyn Fn(&str) -> Option<String>) -> Vec<BotConfig> {
    if !config.bots.is_empty() {
        return config.bots.clone();
    }
    legacy_bot_from_env(lookup).into_iter().collect()
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FLOWBRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".flowbridge").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, FLOWBRIDGE_CONFIG_PATH, or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 8080);
        assert_eq!(g.bind, "0.0.0.0");
    }

    #[test]
    fn port_env_overrides_config() {
        let config = Config::default();
        assert_eq!(resolve_gateway_port(&config, &lookup_from(&[("PORT", "9001")])), 9001);
        assert_eq!(resolve_gateway_port(&config, &lookup_from(&[("PORT", "nope")])), 8080);
        assert_eq!(resolve_gateway_port(&config, &lookup_from(&[])), 8080);
    }

    #[test]
    fn forward_timeout_is_clamped() {
        let mut forward = ForwardConfig::default();
        assert_eq!(forward.timeout(), Duration::from_secs(5));
        forward.timeout_ms = 60_000;
        assert_eq!(forward.timeout(), Duration::from_secs(10));
        forward.timeout_ms = 10;
        assert_eq!(forward.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn env_value_wins_over_literal() {
        let lookup = lookup_from(&[("TOKEN_A", " from-env ")]);
        assert_eq!(
            resolve_value(Some("TOKEN_A"), Some("literal"), &lookup),
            Some("from-env".to_string())
        );
        assert_eq!(
            resolve_value(Some("TOKEN_B"), Some("literal"), &lookup),
            Some("literal".to_string())
        );
        assert_eq!(resolve_value(None, Some("   "), &lookup), None);
    }

    #[test]
    fn parse_bots_config() {
        let json = r#"{
            "forward": { "mode": "text", "timeoutMs": 8000 },
            "bots": [
                {
                    "name": "DummyBot",
                    "botTokenEnv": "DUMMY_BOT_TOKEN",
                    "appTokenEnv": "DUMMY_APP_TOKEN",
                    "sinkUrl": "http://127.0.0.1:7860/api/v1/run/flow?stream=false",
                    "ignoreEvents": ["message"]
                },
                {
                    "name": "HookBot",
                    "transport": "webhook",
                    "botToken": "xoxb-literal",
                    "sinkUrlEnv": "HOOK_SINK",
                    "forwardMode": "event",
                    "relayReplies": true
                }
            ]
        }"#;
        let config: Config = serde_json::from_str(json).expect("should parse");
        assert_eq!(config.forward.mode, ForwardMode::Text);
        assert_eq!(config.forward.timeout(), Duration::from_secs(8));
        assert_eq!(config.bots.len(), 2);
        assert_eq!(config.bots[0].transport, Transport::Socket);
        assert_eq!(config.bots[0].ignore_events, vec!["message".to_string()]);
        assert_eq!(config.bots[1].transport, Transport::Webhook);
        assert_eq!(config.bots[1].forward_mode, Some(ForwardMode::Event));
        assert!(config.bots[1].relay_replies);
        assert_eq!(config.socket.api_base, SLACK_API_BASE);
    }

    #[test]
    fn legacy_env_identity_used_when_no_bots_configured() {
        let lookup = lookup_from(&[("BOT_NAME", "DummyBot"), ("BOT_TOKEN", "xoxb-1")]);
        let bots = effective_bots(&Config::default(), &lookup);
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].name, "DummyBot");
        assert_eq!(bots[0].sink_url_env.as_deref(), Some("PING_URL"));
        assert_eq!(bots[0].api_key_env.as_deref(), Some("FLOW_API_KEY"));
    }

    #[test]
    fn no_identities_without_config_or_env() {
        assert!(effective_bots(&Config::default(), &lookup_from(&[])).is_empty());
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!(
            "flowbridge-missing-{}.json",
            uuid::Uuid::new_v4()
        ));
        let (config, used) = load_config(Some(path.clone())).expect("defaults");
        assert_eq!(used, path);
        assert!(config.bots.is_empty());
        assert_eq!(config.gateway.port, 8080);
    }
}
