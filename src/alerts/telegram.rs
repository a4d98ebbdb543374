//! Telegram Bot API notifier.
//!
//! API docs: https://core.telegram.org/bots/api#sendmessage
//! Messages are POSTed as a form to `/bot{token}/sendMessage`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, warn};

use super::Notifier;

const API_URL: &str = "https://api.telegram.org";

/// Sends plain-text messages to a single Telegram chat.
pub struct TelegramNotifier {
    http: Client,
    bot_token: SecretString,
    chat_id: String,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(bot_token: &str, chat_id: &str) -> Result<Self> {
        Self::with_base_url(bot_token, chat_id, API_URL)
    }

    /// Create a notifier against a custom API host (for testing).
    pub fn with_base_url(bot_token: &str, chat_id: &str, base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .user_agent("ODDSBAND/0.1.0 (sp-band-bettor)")
            .build()
            .context("Failed to build HTTP client for Telegram")?;

        Ok(Self {
            http,
            bot_token: SecretString::new(bot_token.to_string()),
            chat_id: chat_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.base_url,
            self.bot_token.expose_secret()
        )
    }

    async fn try_send(&self, text: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.endpoint())
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .context("Telegram sendMessage request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Telegram sendMessage error {status}: {body}");
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        match self.try_send(text).await {
            Ok(()) => debug!(chat_id = %self.chat_id, "Sent Telegram message"),
            Err(e) => warn!(error = %e, "Error sending Telegram message"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_format() {
        let n = TelegramNotifier::new("123:ABC", "42").unwrap();
        assert_eq!(n.endpoint(), "https://api.telegram.org/bot123:ABC/sendMessage");
    }

    #[test]
    fn test_custom_base_url_trailing_slash() {
        let n = TelegramNotifier::with_base_url("t", "1", "http://localhost:9/").unwrap();
        assert_eq!(n.endpoint(), "http://localhost:9/bott/sendMessage");
    }

    #[tokio::test]
    async fn test_send_failure_is_swallowed() {
        // Nothing listens on port 9 (discard); the error must be logged, not raised.
        let n = TelegramNotifier::with_base_url("t", "1", "http://127.0.0.1:9").unwrap();
        n.send("hello").await;
    }
}
