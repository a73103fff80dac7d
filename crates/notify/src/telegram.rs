//! Telegram Bot API notifier with MarkdownV2 formatting.
//!
//! Delivers alerts via the `sendMessage` endpoint and facility pins via
//! `sendLocation`. During quiet hours messages are still delivered, just
//! with `disable_notification` set.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use vaccibot_core::GeoPoint;

use crate::quiet_hours::QuietHours;
use crate::traits::{Notifier, NotifyError};

const API_BASE: &str = "https://api.telegram.org";

/// Escapes special characters for Telegram MarkdownV2 parse mode.
///
/// Telegram requires these characters to be escaped with a preceding backslash
/// when using MarkdownV2: `_`, `*`, `[`, `]`, `(`, `)`, `~`, `` ` ``, `>`,
/// `#`, `+`, `-`, `=`, `|`, `{`, `}`, `.`, `!`
pub fn escape_markdown_v2(text: &str) -> String {
    let special = ['_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\'];
    let mut result = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        if special.contains(&ch) {
            result.push('\\');
        }
        result.push(ch);
    }
    result
}

/// Escapes the target of an inline link, where only `)` and `\` are special.
pub fn escape_markdown_v2_url(url: &str) -> String {
    let mut result = String::with_capacity(url.len() + 8);
    for ch in url.chars() {
        if ch == ')' || ch == '\\' {
            result.push('\\');
        }
        result.push(ch);
    }
    result
}

/// Body of a `sendMessage` call.
pub fn message_payload(chat_id: &str, text: &str, silent: bool) -> Value {
    json!({
        "chat_id": chat_id,
        "text": text,
        "parse_mode": "MarkdownV2",
        "disable_web_page_preview": true,
        "disable_notification": silent,
    })
}

/// Body of a `sendLocation` call.
pub fn location_payload(chat_id: &str, point: GeoPoint, silent: bool) -> Value {
    json!({
        "chat_id": chat_id,
        "latitude": point.latitude,
        "longitude": point.longitude,
        "disable_notification": silent,
    })
}

/// Map a Bot API reply onto success or a [`NotifyError`].
pub fn check_response(status: reqwest::StatusCode, body: &Value) -> Result<(), NotifyError> {
    if body.get("ok") == Some(&Value::Bool(true)) {
        return Ok(());
    }

    // Handle rate limiting (HTTP 429).
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = body
            .get("parameters")
            .and_then(|p| p.get("retry_after"))
            .and_then(|v| v.as_u64())
            .unwrap_or(30);
        return Err(NotifyError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    let description = body
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown Telegram API error");
    Err(NotifyError::Api(format!("{status}: {description}")))
}

/// Sends alerts via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    quiet_hours: Option<QuietHours>,
    api_base: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Creates a new `TelegramNotifier` from configuration values.
    ///
    /// If `bot_token` starts with `${`, the value between `${` and `}` is
    /// resolved as an environment variable name. Returns
    /// [`NotifyError::Config`] if the token is empty or the env var is missing.
    /// Every Bot API call is bounded by `timeout`.
    pub fn from_config(
        bot_token: String,
        chat_id: String,
        quiet_hours: Option<QuietHours>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let resolved_token = if bot_token.starts_with("${") {
            let var_name = bot_token
                .strip_prefix("${")
                .and_then(|s| s.strip_suffix('}'))
                .ok_or_else(|| {
                    NotifyError::Config(format!("Malformed env var reference: {bot_token}"))
                })?;
            std::env::var(var_name).map_err(|_| {
                NotifyError::Config(format!("Environment variable '{var_name}' is not set"))
            })?
        } else {
            bot_token
        };

        if resolved_token.is_empty() {
            return Err(NotifyError::Config(
                "Telegram bot token must not be empty".to_string(),
            ));
        }
        if chat_id.is_empty() {
            return Err(NotifyError::Config(
                "Telegram chat id must not be empty".to_string(),
            ));
        }

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            bot_token: resolved_token,
            chat_id,
            quiet_hours,
            api_base: API_BASE.to_string(),
            timeout,
            client,
        })
    }

    fn silent_now(&self) -> bool {
        self.quiet_hours
            .map(|quiet| quiet.contains(Utc::now()))
            .unwrap_or(false)
    }

    async fn call(&self, method: &str, body: &Value) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/{method}", self.api_base, self.bot_token);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let resp_body: Value = response.json().await.map_err(|e| self.transport_error(e))?;
        check_response(status, &resp_body)
    }

    fn transport_error(&self, err: reqwest::Error) -> NotifyError {
        if err.is_timeout() {
            NotifyError::Timeout(self.timeout)
        } else {
            NotifyError::Http(err)
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        let silent = self.silent_now();
        tracing::debug!(chat_id = %self.chat_id, silent, "Sending Telegram message");
        self.call("sendMessage", &message_payload(&self.chat_id, text, silent))
            .await?;
        tracing::debug!(chat_id = %self.chat_id, "Telegram message sent");
        Ok(())
    }

    async fn send_location(&self, point: GeoPoint) -> Result<(), NotifyError> {
        let silent = self.silent_now();
        self.call("sendLocation", &location_payload(&self.chat_id, point, silent))
            .await
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
