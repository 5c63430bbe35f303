//! Per-venue scan loop
//!
//! Lists the venue's symbols, walks them in fixed-size batches with full
//! parallel fan-out inside each batch and a short breather between
//! batches, and accumulates detections per strategy. A symbol failure
//! never takes the venue down; a listing failure empties the venue for
//! this scan only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::sleep;
use tracing::{error, info};

use crate::candles::FrameCache;
use crate::detectors::Strategy;
use crate::exchanges::ExchangeClient;
use crate::models::{CheckBarPolicy, Timeframe};
use crate::scanner::{symbol::scan_symbol, SignalRow};

const BATCH_SIZE: usize = 25;
const BATCH_PAUSE: Duration = Duration::from_millis(500);

pub async fn scan_exchange(
    client: Arc<dyn ExchangeClient>,
    cache: Arc<FrameCache>,
    timeframe: Timeframe,
    strategies: &[Strategy],
    policy: CheckBarPolicy,
    min_volume_usd: f64,
) -> HashMap<Strategy, Vec<SignalRow>> {
    let venue = client.venue();

    let symbols = match client.list_symbols().await {
        Ok(symbols) => symbols,
        Err(e) => {
            error!(venue = venue.id(), error = %e, "failed to list symbols");
            return HashMap::new();
        }
    };
    info!(
        venue = venue.id(),
        timeframe = %timeframe,
        markets = symbols.len(),
        "scanning venue"
    );

    let mut results: HashMap<Strategy, Vec<SignalRow>> =
        strategies.iter().map(|&s| (s, Vec::new())).collect();

    for batch in symbols.chunks(BATCH_SIZE) {
        let tasks = batch.iter().map(|symbol| {
            scan_symbol(
                &client,
                &cache,
                timeframe,
                symbol,
                strategies,
                policy,
                min_volume_usd,
            )
        });

        for symbol_results in join_all(tasks).await {
            for (strategy, row) in symbol_results {
                results.entry(strategy).or_default().push(row);
            }
        }

        sleep(BATCH_PAUSE).await;
    }

    let detections: usize = results.values().map(Vec::len).sum();
    info!(venue = venue.id(), timeframe = %timeframe, detections, "venue scan complete");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::Frame;
    use crate::exchanges::Venue;
    use crate::models::Bar;
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct ManySymbols;

    #[async_trait]
    impl ExchangeClient for ManySymbols {
        fn venue(&self) -> Venue {
            Venue::BinanceSpot
        }

        async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
            Ok((0..30).map(|i| format!("SYM{i}USDT")).collect())
        }

        async fn fetch_klines(&self, _symbol: &str, _timeframe: Timeframe) -> Frame {
            let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
            let mut bars: Vec<Bar> = (0..70)
                .map(|i| Bar {
                    ts: (start + chrono::Duration::days(i as i64))
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0,
                    volume: 5_000.0,
                })
                .collect();
            // Every symbol surges on the closed bar.
            let idx = bars.len() - 2;
            bars[idx].volume = 80_000.0;
            Frame::from_bars(bars)
        }
    }

    struct BrokenListing;

    #[async_trait]
    impl ExchangeClient for BrokenListing {
        fn venue(&self) -> Venue {
            Venue::KucoinSpot
        }

        async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("listing endpoint down")
        }

        async fn fetch_klines(&self, _symbol: &str, _timeframe: Timeframe) -> Frame {
            Frame::default()
        }
    }

    #[tokio::test]
    async fn accumulates_across_batches() {
        let results = scan_exchange(
            Arc::new(ManySymbols),
            Arc::new(FrameCache::new()),
            Timeframe::D1,
            &[Strategy::VolumeSurge],
            CheckBarPolicy::LastClosed,
            0.0,
        )
        .await;
        assert_eq!(results[&Strategy::VolumeSurge].len(), 30);
    }

    #[tokio::test]
    async fn listing_failure_is_contained() {
        let results = scan_exchange(
            Arc::new(BrokenListing),
            Arc::new(FrameCache::new()),
            Timeframe::D1,
            &[Strategy::VolumeSurge],
            CheckBarPolicy::LastClosed,
            0.0,
        )
        .await;
        assert!(results.is_empty());
    }
}
