//! Exchange API clients
//!
//! One client per venue, all speaking the same trait: list active USDT
//! pairs, fetch klines normalized into a canonical `Frame`. Derived
//! timeframes are always built from 1d source bars here, never from a
//! venue's native multi-day kline, so period boundaries match across
//! venues.

pub mod binance;
pub mod bybit;
pub mod gateio;
pub mod http;
pub mod kucoin;
pub mod mexc;
pub mod sevenfigures;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::candles::{aggregate, Frame};
use crate::models::Timeframe;

/// Venue identifiers. String ids match the scan configuration vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Venue {
    BinanceSpot,
    BinanceFutures,
    BybitSpot,
    BybitFutures,
    GateioSpot,
    GateioFutures,
    KucoinSpot,
    MexcSpot,
    MexcFutures,
    SfKucoin1w,
    SfMexc1w,
}

/// Expected API speed, used by the orchestrator to pick phase caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedClass {
    Fast,
    Slow,
}

impl Venue {
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "binance_spot" => Some(Venue::BinanceSpot),
            "binance_futures" => Some(Venue::BinanceFutures),
            "bybit_spot" => Some(Venue::BybitSpot),
            "bybit_futures" => Some(Venue::BybitFutures),
            "gateio_spot" => Some(Venue::GateioSpot),
            "gateio_futures" => Some(Venue::GateioFutures),
            "kucoin_spot" => Some(Venue::KucoinSpot),
            "mexc_spot" => Some(Venue::MexcSpot),
            "mexc_futures" => Some(Venue::MexcFutures),
            "sf_kucoin_1w" => Some(Venue::SfKucoin1w),
            "sf_mexc_1w" => Some(Venue::SfMexc1w),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Venue::BinanceSpot => "binance_spot",
            Venue::BinanceFutures => "binance_futures",
            Venue::BybitSpot => "bybit_spot",
            Venue::BybitFutures => "bybit_futures",
            Venue::GateioSpot => "gateio_spot",
            Venue::GateioFutures => "gateio_futures",
            Venue::KucoinSpot => "kucoin_spot",
            Venue::MexcSpot => "mexc_spot",
            Venue::MexcFutures => "mexc_futures",
            Venue::SfKucoin1w => "sf_kucoin_1w",
            Venue::SfMexc1w => "sf_mexc_1w",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Venue::BinanceSpot => "Binance Spot",
            Venue::BinanceFutures => "Binance Futures",
            Venue::BybitSpot => "Bybit Spot",
            Venue::BybitFutures => "Bybit Futures",
            Venue::GateioSpot => "Gateio Spot",
            Venue::GateioFutures => "Gateio Futures",
            Venue::KucoinSpot => "KuCoin Spot",
            Venue::MexcSpot => "MEXC Spot",
            Venue::MexcFutures => "MEXC Futures",
            Venue::SfKucoin1w => "KuCoin Spot",
            Venue::SfMexc1w => "MEXC Spot",
        }
    }

    pub fn is_futures(&self) -> bool {
        matches!(
            self,
            Venue::BinanceFutures | Venue::BybitFutures | Venue::GateioFutures | Venue::MexcFutures
        )
    }

    /// Binance/Bybit/Gate answer kline bursts quickly; KuCoin, MEXC and the
    /// SF proxy need the smaller slow-phase cap.
    pub fn speed_class(&self) -> SpeedClass {
        match self {
            Venue::BinanceSpot
            | Venue::BinanceFutures
            | Venue::BybitSpot
            | Venue::BybitFutures
            | Venue::GateioSpot
            | Venue::GateioFutures => SpeedClass::Fast,
            _ => SpeedClass::Slow,
        }
    }

    /// SF-proxied venues only serve weekly data.
    pub fn is_sf_proxy(&self) -> bool {
        matches!(self, Venue::SfKucoin1w | Venue::SfMexc1w)
    }

    /// Exchange tag used in TradingView chart links.
    pub fn tradingview_exchange(&self) -> &'static str {
        match self {
            Venue::BinanceSpot | Venue::BinanceFutures => "BINANCE",
            Venue::BybitSpot | Venue::BybitFutures => "BYBIT",
            Venue::GateioSpot | Venue::GateioFutures => "GATEIO",
            Venue::KucoinSpot | Venue::SfKucoin1w => "KUCOIN",
            Venue::MexcSpot | Venue::MexcFutures | Venue::SfMexc1w => "MEXC",
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Active USDT pairs, leveraged tokens excluded where the venue lists
    /// them. Errors abort the venue for this scan, not the phase.
    async fn list_symbols(&self) -> anyhow::Result<Vec<String>>;

    /// Fetch and normalize klines for one symbol. Transient failures are
    /// logged and yield an empty frame so a single symbol never takes the
    /// venue loop down.
    async fn fetch_klines(&self, symbol: &str, timeframe: Timeframe) -> Frame;
}

/// Build the client for a venue.
pub fn client_for(venue: Venue) -> Arc<dyn ExchangeClient> {
    match venue {
        Venue::BinanceSpot => Arc::new(binance::BinanceClient::spot()),
        Venue::BinanceFutures => Arc::new(binance::BinanceClient::futures()),
        Venue::BybitSpot => Arc::new(bybit::BybitClient::spot()),
        Venue::BybitFutures => Arc::new(bybit::BybitClient::futures()),
        Venue::GateioSpot => Arc::new(gateio::GateioClient::spot()),
        Venue::GateioFutures => Arc::new(gateio::GateioClient::futures()),
        Venue::KucoinSpot => Arc::new(kucoin::KucoinClient::new()),
        Venue::MexcSpot => Arc::new(mexc::MexcSpotClient::new()),
        Venue::MexcFutures => Arc::new(mexc::MexcFuturesClient::new()),
        Venue::SfKucoin1w => Arc::new(sevenfigures::SfClient::kucoin()),
        Venue::SfMexc1w => Arc::new(sevenfigures::SfClient::mexc()),
    }
}

/// Bars to request from the venue for a timeframe. Derived frames need the
/// full 1d source depth for SMA-50 warmup after aggregation.
pub fn fetch_target(timeframe: Timeframe) -> usize {
    match timeframe {
        Timeframe::H4 => 200,
        _ => timeframe.required_source_count(),
    }
}

/// Aggregate a freshly fetched 1d frame when the requested timeframe is
/// derived; pass native frames through. Aggregation failures log and empty
/// the frame (the scanner skips short frames anyway).
pub fn finalize_frame(venue: Venue, symbol: &str, timeframe: Timeframe, frame: Frame) -> Frame {
    if !timeframe.is_derived() || frame.is_empty() {
        return frame;
    }
    match aggregate(&frame, timeframe) {
        Ok(agg) => agg,
        Err(e) => {
            warn!(venue = venue.id(), symbol, timeframe = %timeframe, error = %e, "aggregation failed");
            Frame::default()
        }
    }
}

/// Leveraged-token suffixes excluded from symbol listings.
pub const LEVERAGED_SUFFIXES: [&str; 6] = ["2L", "2S", "3L", "3S", "5L", "5S"];

pub fn is_leveraged_base(base: &str) -> bool {
    LEVERAGED_SUFFIXES.iter().any(|s| base.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_ids_roundtrip() {
        for venue in [
            Venue::BinanceSpot,
            Venue::BinanceFutures,
            Venue::BybitSpot,
            Venue::BybitFutures,
            Venue::GateioSpot,
            Venue::GateioFutures,
            Venue::KucoinSpot,
            Venue::MexcSpot,
            Venue::MexcFutures,
            Venue::SfKucoin1w,
            Venue::SfMexc1w,
        ] {
            assert_eq!(Venue::parse(venue.id()), Some(venue));
        }
        assert_eq!(Venue::parse("okx_spot"), None);
    }

    #[test]
    fn speed_classes_split_as_configured() {
        assert_eq!(Venue::BinanceSpot.speed_class(), SpeedClass::Fast);
        assert_eq!(Venue::GateioFutures.speed_class(), SpeedClass::Fast);
        assert_eq!(Venue::KucoinSpot.speed_class(), SpeedClass::Slow);
        assert_eq!(Venue::MexcFutures.speed_class(), SpeedClass::Slow);
        assert_eq!(Venue::SfKucoin1w.speed_class(), SpeedClass::Slow);
    }

    #[test]
    fn leveraged_bases_detected() {
        assert!(is_leveraged_base("BTC3L"));
        assert!(is_leveraged_base("ETH5S"));
        assert!(!is_leveraged_base("BTC"));
    }
}
