//! Outbound notifications.
//!
//! Defines the `Notifier` trait, a silent `NullNotifier` used when no
//! credentials are configured, and the message templates sent for
//! market set-up, placed bets, session completion and fatal errors.

pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::types::BetRecord;
use telegram::TelegramNotifier;

/// Best-effort message sink. Delivery failures are logged by the
/// implementation and never surfaced to callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Notifier that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _text: &str) {}
}

/// Build the notifier for this run: Telegram when both the bot token
/// and chat id are configured, otherwise a silent no-op.
pub fn from_config(cfg: &AppConfig) -> Arc<dyn Notifier> {
    match (cfg.telegram_bot_token(), cfg.telegram_chat_id()) {
        (Some(token), Some(chat_id)) => match TelegramNotifier::new(token, chat_id) {
            Ok(notifier) => Arc::new(notifier),
            Err(e) => {
                info!(error = %e, "Telegram client unavailable, notifications disabled");
                Arc::new(NullNotifier)
            }
        },
        _ => {
            info!("Missing bot token or chat ID, Telegram notifications disabled");
            Arc::new(NullNotifier)
        }
    }
}

// ---------------------------------------------------------------------------
// Message templates
// ---------------------------------------------------------------------------

const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Sent once per track when its races have been handed to monitors.
pub fn market_setup_message(track: &str, races: usize, now: DateTime<Local>) -> String {
    format!(
        "🎯 *New Market Set Up!*\n\n\
         📍 *Track:* {track}\n\
         🏇 *Races Set Up:* {races}\n\
         ⏰ *Time:* {}",
        now.format(TIMESTAMP_FORMAT)
    )
}

/// Sent for every bet once its market has settled.
pub fn bet_placed_message(bet: &BetRecord) -> String {
    format!(
        "📢 *New Bet Placed!*\n\n\
         🏇 *Selection:* {}\n\
         📍 *Track:* {}\n\
         🎯 *Odds Band:* {}\n\
         💰 *SP Price:* {}\n\
         🕒 *Time:* {}\n\
         📄 *Bet Reference:* {}",
        bet.selection_name,
        bet.track,
        bet.odds_band,
        bet.bet_price,
        bet.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        bet.bet_reference,
    )
}

/// Sent once every monitor has finished.
pub fn completion_message(
    markets: usize,
    bets_placed: usize,
    failed: usize,
    now: DateTime<Local>,
) -> String {
    format!(
        "✅ *All Markets Processed!*\n\n\
         🏁 *Markets:* {markets}\n\
         💷 *Bets Placed:* {bets_placed}\n\
         ⚠️ *Failed Monitors:* {failed}\n\
         🕒 *Completed At:* {}",
        now.format(TIMESTAMP_FORMAT)
    )
}

/// Sent when an error escapes the session.
pub fn failure_message(error: &anyhow::Error, now: DateTime<Local>) -> String {
    let mut message = format!(
        "❌ *Error Occurred in ODDSBAND!*\n\n\
         💥 *Error Message:* {error}\n\
         🕒 *Time:* {}\n",
        now.format(TIMESTAMP_FORMAT)
    );

    let trace: Vec<String> = error.chain().skip(1).map(|cause| cause.to_string()).collect();
    if !trace.is_empty() {
        message.push_str(&format!("📄 *Stack Trace:*\n`{}`", trace.join("\n")));
    }

    message
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 16, 14, 5, 9).unwrap()
    }

    #[test]
    fn test_market_setup_message() {
        let msg = market_setup_message("Ascot", 7, fixed_now());
        assert!(msg.contains("*Track:* Ascot"));
        assert!(msg.contains("*Races Set Up:* 7"));
        assert!(msg.contains("16-10-2026 14:05:09"));
    }

    #[test]
    fn test_bet_placed_message() {
        let bet = BetRecord {
            track: "Ascot (GB)".into(),
            odds_band: "2.0-4.0".into(),
            selection_name: "Frankel".into(),
            bet_price: dec!(3.5),
            timestamp: Utc::now(),
            bet_reference: "1234".into(),
        };
        let msg = bet_placed_message(&bet);
        assert!(msg.starts_with("📢 *New Bet Placed!*"));
        assert!(msg.contains("*Selection:* Frankel"));
        assert!(msg.contains("*Odds Band:* 2.0-4.0"));
        assert!(msg.contains("*SP Price:* 3.5"));
        assert!(msg.contains("*Bet Reference:* 1234"));
    }

    #[test]
    fn test_completion_message() {
        let msg = completion_message(12, 3, 1, fixed_now());
        assert!(msg.contains("*Markets:* 12"));
        assert!(msg.contains("*Bets Placed:* 3"));
        assert!(msg.contains("*Failed Monitors:* 1"));
    }

    #[test]
    fn test_failure_message_includes_cause_chain() {
        let err = Err::<(), _>(anyhow::anyhow!("connection refused"))
            .context("Market discovery failed")
            .unwrap_err();
        let msg = failure_message(&err, fixed_now());
        assert!(msg.contains("*Error Message:* Market discovery failed"));
        assert!(msg.contains("*Stack Trace:*"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_failure_message_without_causes_has_no_trace() {
        let err = anyhow::anyhow!("boom");
        let msg = failure_message(&err, fixed_now());
        assert!(!msg.contains("Stack Trace"));
    }

    #[test]
    fn test_missing_credentials_fall_back_to_null() {
        let cfg = AppConfig::default();
        // Must not panic or error; NullNotifier silently drops.
        let notifier = from_config(&cfg);
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(notifier.send("hello"));
    }
}
