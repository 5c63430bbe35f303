//! Runtime configuration
//!
//! Orchestrator knobs come from the environment with sane defaults;
//! notification routing (bot tokens, chat ids, strategy → channel) is
//! loaded from a TOML file so credentials stay out of the binary.

use std::collections::HashMap;
use std::env;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::detectors::Strategy;

fn env_usize(var: &str, default: usize) -> usize {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&v| v > 0)
        .unwrap_or(default)
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Phase-level concurrency and stagger settings.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub fast_max_exchanges: usize,
    pub slow_max_exchanges: usize,
    pub stagger_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            fast_max_exchanges: 4,
            slow_max_exchanges: 2,
            stagger_ms: 250,
        }
    }
}

impl OrchestratorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        OrchestratorConfig {
            fast_max_exchanges: env_usize("FAST_MAX_EXCHANGES", defaults.fast_max_exchanges),
            slow_max_exchanges: env_usize("SLOW_MAX_EXCHANGES", defaults.slow_max_exchanges),
            stagger_ms: env_u64("EXCHANGE_STAGGER_MS", defaults.stagger_ms),
        }
    }
}

/// Notification routing: each strategy posts into a named channel, each
/// channel has a bot token, each recipient a chat id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default)]
    pub recipients: HashMap<String, String>,
    #[serde(default)]
    pub strategy_channels: HashMap<String, String>,
    #[serde(default)]
    pub database_path: Option<String>,
}

impl NotifyConfig {
    pub fn load(path: &str) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read notify config at {path}"))?;
        toml::from_str(&raw).with_context(|| format!("invalid notify config at {path}"))
    }

    /// Load from `NOTIFY_CONFIG` if set, otherwise run with routing
    /// disabled (scans still work, nothing is sent).
    pub fn from_env() -> Self {
        match env::var("NOTIFY_CONFIG") {
            Ok(path) => match Self::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "notify config unavailable, notifications disabled");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Channel the strategy routes to, if configured. Falls back to the
    /// built-in routing table.
    pub fn channel_for(&self, strategy: Strategy) -> Option<String> {
        if let Some(channel) = self.strategy_channels.get(strategy.as_str()) {
            return Some(channel.clone());
        }
        default_channel(strategy).map(str::to_string)
    }

    pub fn token_for_channel(&self, channel: &str) -> Option<&str> {
        self.tokens.get(channel).map(String::as_str)
    }

    pub fn chat_ids(&self, recipients: &[String]) -> Vec<String> {
        recipients
            .iter()
            .filter_map(|r| self.recipients.get(r).cloned())
            .collect()
    }
}

/// Built-in strategy → channel routing.
fn default_channel(strategy: Strategy) -> Option<&'static str> {
    match strategy {
        Strategy::BreakoutBar
        | Strategy::StopBar
        | Strategy::StartBar
        | Strategy::Consolidation
        | Strategy::ConsolidationBreakout
        | Strategy::Channel
        | Strategy::ChannelBreakout
        | Strategy::WedgeBreakout
        | Strategy::Sma50Breakout
        | Strategy::TrendBreakout => Some("start_trend"),
        Strategy::ReversalBar
        | Strategy::TestBar
        | Strategy::PinDown => Some("weakening_trend"),
        Strategy::VolumeSurge | Strategy::LoadedBar => Some("volume_surge"),
        Strategy::Confluence
        | Strategy::HbsBreakout
        | Strategy::VsWakeup
        | Strategy::PinUp
        | Strategy::BullishEngulfing => Some("confluence"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.fast_max_exchanges, 4);
        assert_eq!(config.slow_max_exchanges, 2);
        assert_eq!(config.stagger_ms, 250);
    }

    #[test]
    fn notify_config_parses() {
        let raw = r#"
            database_path = "./events.db"

            [tokens]
            confluence = "123:abc"

            [recipients]
            default = "1111"
            ops = "2222"

            [strategy_channels]
            volume_surge = "confluence"
        "#;
        let config: NotifyConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.token_for_channel("confluence"), Some("123:abc"));
        assert_eq!(
            config.chat_ids(&["default".to_string(), "missing".to_string()]),
            vec!["1111".to_string()]
        );
        // Explicit mapping overrides the built-in routing.
        assert_eq!(
            config.channel_for(Strategy::VolumeSurge),
            Some("confluence".to_string())
        );
        // Built-in routing still applies elsewhere.
        assert_eq!(
            config.channel_for(Strategy::HbsBreakout),
            Some("confluence".to_string())
        );
    }
}
