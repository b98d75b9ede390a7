//! Operator alert sinks.
//!
//! Alerts fire on DLQ admission and circuit-breaker transitions. A failing
//! alert is logged and swallowed; alerting must never take the dispatcher
//! down with it.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Telegram message length limit, minus headroom.
const MAX_MESSAGE_CHARS: usize = 4000;

/// External notification collaborator.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver a message. Infallible by contract: implementations log their
    /// own delivery failures.
    async fn send(&self, message: &str);
}

/// Fallback sink used when no messaging bot is configured.
pub struct LogAlerter;

#[async_trait]
impl AlertSink for LogAlerter {
    async fn send(&self, message: &str) {
        warn!("ALERT: {}", message);
    }
}

/// Telegram bot alert sink.
pub struct TelegramAlerter {
    client: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramAlerter {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("failed to build HTTP client"),
            token: token.into(),
            chat_id: chat_id.into(),
        }
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`, if both are set.
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        Some(Self::new(token, chat_id))
    }
}

#[async_trait]
impl AlertSink for TelegramAlerter {
    async fn send(&self, message: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let text: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "HTML",
        });

        match self.client.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                info!("Alert sent");
            }
            Ok(response) => {
                warn!("Alert send failed: HTTP {}", response.status());
            }
            Err(e) => {
                warn!("Alert send failed: {}", e);
            }
        }
    }
}

/// The configured sink: Telegram when credentials are present, otherwise
/// the log fallback.
pub fn alerter_from_env() -> Arc<dyn AlertSink> {
    match TelegramAlerter::from_env() {
        Some(telegram) => Arc::new(telegram),
        None => Arc::new(LogAlerter),
    }
}
