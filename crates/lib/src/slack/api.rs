//! Slack Web API calls the bridge needs: open a socket-mode session, read thread
//! replies, and post a reply.

use crate::bridge::{HistoryMessage, HistorySource};
use crate::error::{ConnectionError, EnrichmentError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// conversations.replies pages followed before giving up on the rest of a thread.
const MAX_REPLY_PAGES: usize = 10;
const REPLIES_PAGE_LIMIT: &str = "200";

#[derive(Debug, Deserialize)]
struct OpenSocketResponse {
    ok: bool,
    url: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    ok: bool,
    #[serde(default)]
    messages: Vec<HistoryMessage>,
    error: Option<String>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

/// Per-identity Web API client over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    app_token: Option<String>,
}

impl SlackApiClient {
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        bot_token: impl Into<String>,
        app_token: Option<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
            app_token,
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Call `apps.connections.open` with the app token. Returns the websocket URL for one session.
    pub async fn open_socket_connection(&self) -> Result<String, ConnectionError> {
        let app_token = self
            .app_token
            .as_deref()
            .ok_or_else(|| ConnectionError::Open("app token not configured".to_string()))?;
        let res = self
            .http
            .post(self.url("apps.connections.open"))
            .bearer_auth(app_token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ConnectionError::Open(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(ConnectionError::Open(format!(
                "apps.connections.open failed: {} {}",
                status,
                crate::error::truncate_for_log(&body, 200)
            )));
        }
        let data: OpenSocketResponse = res
            .json()
            .await
            .map_err(|e| ConnectionError::Open(e.to_string()))?;
        if !data.ok {
            return Err(ConnectionError::Open(format!(
                "apps.connections.open returned ok: false ({})",
                data.error.unwrap_or_else(|| "unknown error".to_string())
            )));
        }
        data.url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ConnectionError::Open("apps.connections.open returned no url".to_string()))
    }

    /// Fetch every message of the thread rooted at `thread_ts`, oldest first.
    pub async fn conversations_replies(
        &self,
        channel: &str,
        thread_ts: &str,
    ) -> Result<Vec<HistoryMessage>, EnrichmentError> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_REPLY_PAGES {
            let mut query = vec![
                ("channel", channel.to_string()),
                ("ts", thread_ts.to_string()),
                ("limit", REPLIES_PAGE_LIMIT.to_string()),
            ];
            if let Some(ref c) = cursor {
                query.push(("cursor", c.clone()));
            }
            let res = self
                .http
                .get(self.url("conversations.replies"))
                .bearer_auth(&self.bot_token)
                .query(&query)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;
            if !res.status().is_success() {
                return Err(EnrichmentError::Platform(format!(
                    "conversations.replies failed: {}",
                    res.status()
                )));
            }
            let page: RepliesResponse = res
                .json()
                .await
                .map_err(|e| EnrichmentError::Malformed(e.to_string()))?;
            if !page.ok {
                return Err(EnrichmentError::Platform(
                    page.error.unwrap_or_else(|| "unknown error".to_string()),
                ));
            }
            messages.extend(page.messages);
            cursor = page
                .response_metadata
                .and_then(|m| m.next_cursor)
                .filter(|c| !c.is_empty());
            if cursor.is_none() {
                return Ok(messages);
            }
        }
        log::debug!(
            "conversations.replies for {} {}: stopped after {} pages",
            channel,
            thread_ts,
            MAX_REPLY_PAGES
        );
        Ok(messages)
    }

    /// Post `text` to a channel, optionally inside a thread.
    pub async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> Result<(), String> {
        let mut body = json!({ "channel": channel, "text": text });
        if let Some(ts) = thread_ts {
            body["thread_ts"] = Value::String(ts.to_string());
        }
        let res = self
            .http
            .post(self.url("chat.postMessage"))
            .bearer_auth(&self.bot_token)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("chat.postMessage failed: {} {}", status, body));
        }
        let data: PostMessageResponse = res.json().await.map_err(|e| e.to_string())?;
        if !data.ok {
            return Err(format!(
                "chat.postMessage returned ok: false ({})",
                data.error.unwrap_or_else(|| "unknown error".to_string())
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl HistorySource for SlackApiClient {
    async fn thread_replies(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<HistoryMessage>, EnrichmentError> {
        self.conversations_replies(channel_id, thread_ts).await
    }
}
