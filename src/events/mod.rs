//! Market event records
//!
//! A strict subset of strategies is persisted. Detections for the same
//! (symbol, exchange, timeframe, bar_ts) collapse into one record with
//! per-strategy flags plus their typed companions; the store deduplicates
//! on that composite key with insert-or-ignore semantics.

pub mod store;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detectors::{Payload, Strategy};
use crate::scanner::SignalRow;

pub use store::SqliteEventStore;

/// Strategies forwarded to the event store.
pub const STORED_STRATEGIES: [Strategy; 8] = [
    Strategy::Confluence,
    Strategy::ConsolidationBreakout,
    Strategy::ChannelBreakout,
    Strategy::Sma50Breakout,
    Strategy::PinUp,
    Strategy::TrendBreakout,
    Strategy::LoadedBar,
    Strategy::BullishEngulfing,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEvent {
    pub id: Uuid,
    /// Base symbol with the quote suffix stripped (BTC, not BTC_USDT).
    pub symbol: String,
    pub exchange: String,
    pub timeframe: String,
    pub bar_ts: NaiveDateTime,
    pub tradingview_link: String,
    pub close: f64,
    pub volume_usd: f64,
    pub close_off_low: f64,

    pub pin_down: bool,
    pub confluence: bool,
    pub is_engulfing: bool,
    pub consolidation_bo: bool,
    pub consolidation_bo_direction: i32,
    pub consolidation_bo_box_age: i64,
    pub consolidation_bo_box_height: f64,
    pub consolidation_bo_strength: String,
    pub channel_bo: bool,
    pub channel_bo_direction: i32,
    pub channel_bo_age: i64,
    pub channel_bo_slope: f64,
    pub channel_bo_height: f64,
    pub wedge_bo: bool,
    pub wedge_bo_direction: i32,
    pub wedge_bo_age: i64,
    pub wedge_bo_slope: f64,
    pub wedge_bo_height: f64,
    pub sma50_bo: bool,
    pub sma50_bo_type: String,
    pub sma50_bo_strength: String,
    pub pin_up: bool,
    pub trend_bo: bool,
    pub loaded_bar: bool,
    pub bullish_engulfing: bool,
}

impl MarketEvent {
    fn base_from(row: &SignalRow) -> Self {
        MarketEvent {
            id: Uuid::new_v4(),
            symbol: clean_symbol(&row.symbol),
            exchange: row.exchange.display_name().to_uppercase().replace(' ', "_"),
            timeframe: row.timeframe.as_str().to_string(),
            bar_ts: row.bar_ts,
            tradingview_link: row.tradingview_link(),
            close: row.close,
            volume_usd: row.volume_usd,
            close_off_low: row.close_off_low,
            pin_down: false,
            confluence: false,
            is_engulfing: false,
            consolidation_bo: false,
            consolidation_bo_direction: 0,
            consolidation_bo_box_age: 0,
            consolidation_bo_box_height: 0.0,
            consolidation_bo_strength: String::new(),
            channel_bo: false,
            channel_bo_direction: 0,
            channel_bo_age: 0,
            channel_bo_slope: 0.0,
            channel_bo_height: 0.0,
            wedge_bo: false,
            wedge_bo_direction: 0,
            wedge_bo_age: 0,
            wedge_bo_slope: 0.0,
            wedge_bo_height: 0.0,
            sma50_bo: false,
            sma50_bo_type: String::new(),
            sma50_bo_strength: String::new(),
            pin_up: false,
            trend_bo: false,
            loaded_bar: false,
            bullish_engulfing: false,
        }
    }

    /// Set the flag (and its companions) for one detected strategy.
    fn apply(&mut self, row: &SignalRow) {
        match &row.payload {
            Payload::Confluence(p) => {
                self.confluence = true;
                self.is_engulfing = p.is_engulfing_reversal;
            }
            Payload::ConsolidationBreakout(p) => {
                self.consolidation_bo = true;
                self.consolidation_bo_direction = p.direction.signum();
                self.consolidation_bo_box_age = p.box_age;
                self.consolidation_bo_box_height = if p.height_pct.is_finite() {
                    p.height_pct
                } else {
                    0.0
                };
                self.consolidation_bo_strength = p.strength_label.as_str().to_string();
            }
            Payload::ChannelBreakout(p) => {
                self.channel_bo = true;
                self.channel_bo_direction = p.direction.signum();
                self.channel_bo_age = p.channel_age;
                self.channel_bo_slope = p.channel_slope;
                self.channel_bo_height = p.height_pct;
            }
            Payload::WedgeBreakout(p) => {
                self.wedge_bo = true;
                self.wedge_bo_direction = p.direction.signum();
                self.wedge_bo_age = p.channel_age;
                self.wedge_bo_slope = p.channel_slope;
                self.wedge_bo_height = p.height_pct;
            }
            Payload::Sma50Breakout(p) => {
                self.sma50_bo = true;
                self.sma50_bo_type = p.breakout_type.as_str().to_string();
                self.sma50_bo_strength = p
                    .strength
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default();
            }
            Payload::PinUp(_) => self.pin_up = true,
            Payload::PinDown(_) => self.pin_down = true,
            Payload::TrendBreakout(_) => self.trend_bo = true,
            Payload::Vsa(_) => self.loaded_bar = true,
            Payload::BullishEngulfing(_) => self.bullish_engulfing = true,
            _ => {}
        }
    }
}

fn clean_symbol(symbol: &str) -> String {
    symbol
        .replace("USDT", "")
        .trim_end_matches(['_', '-'])
        .to_string()
}

/// Collapse per-strategy scan results into deduplicated event records.
/// Only the stored-strategy subset contributes.
pub fn map_results(results: &HashMap<Strategy, Vec<SignalRow>>) -> Vec<MarketEvent> {
    let mut by_key: HashMap<(String, String, String, NaiveDateTime), MarketEvent> = HashMap::new();

    for &strategy in STORED_STRATEGIES.iter() {
        let Some(rows) = results.get(&strategy) else {
            continue;
        };
        for row in rows {
            let key = (
                clean_symbol(&row.symbol),
                row.exchange.id().to_string(),
                row.timeframe.as_str().to_string(),
                row.bar_ts,
            );
            by_key
                .entry(key)
                .or_insert_with(|| MarketEvent::base_from(row))
                .apply(row);
        }
    }

    by_key.into_values().collect()
}

/// External event store boundary. The crate ships a SQLite adapter; the
/// orchestrator only sees this trait.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Persist the stored-strategy subset of `results`. Returns how many
    /// records were newly inserted (duplicates are silently ignored).
    async fn publish(&self, results: &HashMap<Strategy, Vec<SignalRow>>) -> anyhow::Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::consolidation::ConsolidationBreakoutPayload;
    use crate::detectors::sma50::{BreakoutType, Sma50Payload};
    use crate::exchanges::Venue;
    use crate::models::{Direction, StrengthLabel, Timeframe};
    use chrono::NaiveDate;

    fn row(payload: Payload) -> SignalRow {
        SignalRow {
            symbol: "BTC_USDT".to_string(),
            exchange: Venue::GateioSpot,
            timeframe: Timeframe::D1,
            bar_ts: NaiveDate::from_ymd_opt(2025, 3, 20)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            current_bar: false,
            close: 84_000.0,
            volume_usd: 1_000_000.0,
            volume_ratio: 2.0,
            close_off_low: 80.0,
            close_position_indicator: "○○●".to_string(),
            close_position_pct: 80.0,
            payload,
        }
    }

    #[test]
    fn same_key_collapses_to_one_record_with_both_flags() {
        let mut results: HashMap<Strategy, Vec<SignalRow>> = HashMap::new();
        results.insert(
            Strategy::ConsolidationBreakout,
            vec![row(Payload::ConsolidationBreakout(ConsolidationBreakoutPayload {
                direction: Direction::Up,
                strong: true,
                strength_label: StrengthLabel::Strong,
                breakout_kind: "strong_box_only".to_string(),
                channel_ratio: 1.0,
                box_age: 9,
                box_height: 2.0,
                height_pct: 2.0,
                bars_inside: 7.0,
            }))],
        );
        results.insert(
            Strategy::Sma50Breakout,
            vec![row(Payload::Sma50Breakout(Sma50Payload {
                breakout_type: BreakoutType::Regular,
                strength: Some(StrengthLabel::Strong),
                sma50: 83_000.0,
                atr: 900.0,
                price_vs_sma_pct: 1.2,
                low_vs_sma_pct: -0.5,
                is_clean: true,
            }))],
        );

        let events = map_results(&results);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.symbol, "BTC");
        assert!(event.consolidation_bo);
        assert_eq!(event.consolidation_bo_direction, 1);
        assert_eq!(event.consolidation_bo_strength, "Strong");
        assert!(event.sma50_bo);
        assert_eq!(event.sma50_bo_type, "regular");
        assert_eq!(event.sma50_bo_strength, "Strong");
        assert!(!event.channel_bo);
    }

    #[test]
    fn unsupported_strategies_are_skipped() {
        let mut results: HashMap<Strategy, Vec<SignalRow>> = HashMap::new();
        results.insert(
            Strategy::VolumeSurge,
            vec![row(Payload::VolumeSurge(
                crate::detectors::volume_surge::VolumeSurgePayload {
                    score: 1.0,
                    price_extreme: "White candle".to_string(),
                    volume_ratio: 5.0,
                },
            ))],
        );
        assert!(map_results(&results).is_empty());
    }

    #[test]
    fn symbol_cleaning() {
        assert_eq!(clean_symbol("BTC_USDT"), "BTC");
        assert_eq!(clean_symbol("BTC-USDT"), "BTC");
        assert_eq!(clean_symbol("BTCUSDT"), "BTC");
    }
}
