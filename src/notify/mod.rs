//! Notification sink
//!
//! Formats per-strategy signal batches into HTML messages and delivers
//! them over the Telegram Bot API, chunked under the 4000-character
//! per-send budget with a short pause between chunks. Routing (strategy →
//! channel → bot token, recipient → chat id) lives in `NotifyConfig`.

pub mod format;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::detectors::Strategy;
use crate::scanner::SignalRow;

const MAX_MESSAGE_SIZE: usize = 4000;
const CHUNK_PAUSE: Duration = Duration::from_millis(300);

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(
        &self,
        strategy: Strategy,
        rows: &[SignalRow],
        recipients: &[String],
    ) -> Result<()>;
}

pub struct TelegramNotifier {
    config: NotifyConfig,
    client: reqwest::Client,
}

impl TelegramNotifier {
    pub fn new(config: NotifyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("failed to build HTTP client");
        Self { config, client }
    }

    async fn send_message(&self, token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{token}/sendMessage");
        let response = self
            .client
            .post(&url)
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .context("telegram send failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("telegram API error {status}: {body}");
        }
        Ok(())
    }

    /// Split signal blocks into header-prefixed chunks under the size
    /// budget.
    fn chunk_messages(header: &str, blocks: &[String]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = header.to_string();
        for block in blocks {
            if current.len() + block.len() > MAX_MESSAGE_SIZE {
                chunks.push(std::mem::replace(&mut current, format!("{header}{block}")));
            } else {
                current.push_str(block);
            }
        }
        if current.len() > header.len() {
            chunks.push(current);
        }
        chunks
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    async fn notify(
        &self,
        strategy: Strategy,
        rows: &[SignalRow],
        recipients: &[String],
    ) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let Some(channel) = self.config.channel_for(strategy) else {
            debug!(strategy = %strategy, "no channel routed, skipping notification");
            return Ok(());
        };
        let Some(token) = self.config.token_for_channel(&channel) else {
            debug!(strategy = %strategy, channel, "no bot token configured");
            return Ok(());
        };
        let chat_ids = self.config.chat_ids(recipients);
        if chat_ids.is_empty() {
            debug!(strategy = %strategy, "no recipients resolved");
            return Ok(());
        }

        // All rows in a batch come from one venue/timeframe loop.
        let venue = rows[0].exchange;
        let timeframe = rows[0].timeframe;
        let header = format!(
            "🚨 {} - {} {}\n\n",
            strategy.title(),
            venue.display_name(),
            timeframe.as_str().to_uppercase()
        );
        let blocks: Vec<String> = rows.iter().map(|r| format::signal_block(strategy, r)).collect();
        let chunks = Self::chunk_messages(&header, &blocks);

        for chat_id in &chat_ids {
            for chunk in &chunks {
                if let Err(e) = self.send_message(token, chat_id, chunk).await {
                    warn!(strategy = %strategy, chat_id, error = %e, "telegram chunk failed");
                }
                sleep(CHUNK_PAUSE).await;
            }
        }

        info!(
            strategy = %strategy,
            venue = venue.id(),
            signals = rows.len(),
            recipients = chat_ids.len(),
            "notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_respects_the_budget_and_reapplies_header() {
        let header = "HEADER\n\n".to_string();
        let blocks: Vec<String> = (0..10).map(|i| format!("{}{}\n", "x".repeat(950), i)).collect();
        let chunks = TelegramNotifier::chunk_messages(&header, &blocks);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= MAX_MESSAGE_SIZE + 1000);
            assert!(chunk.starts_with("HEADER"));
        }
        // All blocks accounted for.
        let total: usize = chunks.iter().map(|c| c.matches("\n").count()).sum();
        assert!(total >= 10);
    }

    #[test]
    fn empty_blocks_produce_nothing() {
        assert!(TelegramNotifier::chunk_messages("H", &[]).is_empty());
    }
}
