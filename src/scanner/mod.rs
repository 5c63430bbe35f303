//! Scan pipeline: per-symbol detector battery, per-venue scan loop and the
//! phased multi-venue orchestrator.

pub mod exchange_loop;
pub mod orchestrator;
pub mod schedule;
pub mod symbol;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::detectors::{Payload, Strategy};
use crate::exchanges::Venue;
use crate::models::{CheckBarPolicy, Timeframe};

/// One detection for one symbol, carrying the frame-derived fields every
/// downstream consumer wants next to the strategy payload.
#[derive(Debug, Clone, Serialize)]
pub struct SignalRow {
    pub symbol: String,
    #[serde(serialize_with = "serialize_venue")]
    pub exchange: Venue,
    pub timeframe: Timeframe,
    pub bar_ts: NaiveDateTime,
    pub current_bar: bool,
    pub close: f64,
    pub volume_usd: f64,
    pub volume_ratio: f64,
    pub close_off_low: f64,
    pub close_position_indicator: String,
    pub close_position_pct: f64,
    pub payload: Payload,
}

fn serialize_venue<S: serde::Serializer>(venue: &Venue, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(venue.id())
}

impl SignalRow {
    /// Chart link for notification and event payloads.
    pub fn tradingview_link(&self) -> String {
        let tv_symbol: String = self
            .symbol
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect();
        let interval = match self.timeframe {
            Timeframe::H4 => "240".to_string(),
            tf => tf.as_str().to_uppercase(),
        };
        let suffix = if self.exchange.is_futures() { ".P" } else { "" };
        format!(
            "https://www.tradingview.com/chart/?symbol={}:{}{}&interval={}",
            self.exchange.tradingview_exchange(),
            tv_symbol,
            suffix,
            interval
        )
    }
}

/// Everything one orchestrator invocation needs to know.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub timeframes: Vec<Timeframe>,
    pub strategies: Vec<Strategy>,
    pub venues: Vec<Venue>,
    pub recipients: Vec<String>,
    pub send_notifications: bool,
    pub min_volume_usd: Option<f64>,
    pub check_bar: CheckBarPolicy,
}

impl ScanRequest {
    pub fn min_volume_for(&self, timeframe: Timeframe) -> f64 {
        self.min_volume_usd.unwrap_or_else(|| timeframe.min_volume_usd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::vsa::VsaPayload;
    use chrono::NaiveDate;

    fn row(venue: Venue, timeframe: Timeframe, symbol: &str) -> SignalRow {
        SignalRow {
            symbol: symbol.to_string(),
            exchange: venue,
            timeframe,
            bar_ts: NaiveDate::from_ymd_opt(2025, 3, 20)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            current_bar: false,
            close: 1.0,
            volume_usd: 100_000.0,
            volume_ratio: 1.0,
            close_off_low: 50.0,
            close_position_indicator: "○●○".to_string(),
            close_position_pct: 50.0,
            payload: Payload::Vsa(VsaPayload { arctan_ratio: 0.0 }),
        }
    }

    #[test]
    fn tradingview_links() {
        let spot = row(Venue::KucoinSpot, Timeframe::D1, "BTC-USDT");
        assert_eq!(
            spot.tradingview_link(),
            "https://www.tradingview.com/chart/?symbol=KUCOIN:BTCUSDT&interval=1D"
        );

        let futures = row(Venue::BinanceFutures, Timeframe::H4, "BTCUSDT");
        assert_eq!(
            futures.tradingview_link(),
            "https://www.tradingview.com/chart/?symbol=BINANCE:BTCUSDT.P&interval=240"
        );
    }

    #[test]
    fn volume_override_wins() {
        let mut request = ScanRequest {
            timeframes: vec![Timeframe::D1],
            strategies: vec![Strategy::Confluence],
            venues: vec![Venue::BinanceSpot],
            recipients: vec![],
            send_notifications: false,
            min_volume_usd: None,
            check_bar: CheckBarPolicy::LastClosed,
        };
        assert_eq!(request.min_volume_for(Timeframe::D1), 75_000.0);
        request.min_volume_usd = Some(10_000.0);
        assert_eq!(request.min_volume_for(Timeframe::W1), 10_000.0);
    }
}
