//! Symbol scanner
//!
//! For one (venue, timeframe, symbol): resolve the frame through the cache,
//! apply the closed-bar USD volume gate, then run the requested strategy
//! battery. Detectors are pure CPU work, so the whole battery runs on the
//! blocking pool with rayon fanning out across strategies; the async side
//! only ever does I/O.

use std::collections::HashMap;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::candles::{Frame, FrameCache};
use crate::detectors::{self, Strategy};
use crate::exchanges::ExchangeClient;
use crate::models::{close_position_indicator, CheckBarPolicy, Timeframe};
use crate::scanner::SignalRow;

/// Frames shorter than this are not worth scanning at all.
const MIN_FRAME_LEN: usize = 10;

pub async fn scan_symbol(
    client: &Arc<dyn ExchangeClient>,
    cache: &Arc<FrameCache>,
    timeframe: Timeframe,
    symbol: &str,
    strategies: &[Strategy],
    policy: CheckBarPolicy,
    min_volume_usd: f64,
) -> HashMap<Strategy, SignalRow> {
    let venue = client.venue();

    let frame = match cache.get(venue.id(), timeframe, symbol) {
        Some(frame) => frame,
        None => {
            let fetched = client.fetch_klines(symbol, timeframe).await;
            cache.insert(venue.id(), timeframe, symbol, fetched)
        }
    };

    if frame.len() < MIN_FRAME_LEN {
        return HashMap::new();
    }

    // Volume gate on the last closed bar.
    let closed = frame.len() - 2;
    if frame.volume_usd(closed) < min_volume_usd {
        return HashMap::new();
    }

    let strategies = strategies.to_vec();
    let symbol = symbol.to_string();
    let frame_for_battery = frame.clone();

    let results = tokio::task::spawn_blocking(move || {
        run_battery(&frame_for_battery, &strategies, policy)
    })
    .await
    .unwrap_or_default();

    let mut out = HashMap::with_capacity(results.len());
    for (strategy, check_bar, is_current, payload) in results {
        let Some(i) = frame.resolve_index(check_bar) else {
            continue;
        };
        let bar = frame.bars()[i];
        let (indicator, pct) = close_position_indicator(bar.high, bar.low, bar.close);

        // 7-bar mean for the displayed volume ratio.
        let base_start = i.saturating_sub(7);
        let baseline: f64 = frame.bars()[base_start..i]
            .iter()
            .map(|b| b.volume)
            .sum::<f64>()
            / (i - base_start).max(1) as f64;

        debug!(venue = venue.id(), symbol = %symbol, strategy = %strategy, "detected");
        out.insert(
            strategy,
            SignalRow {
                symbol: symbol.clone(),
                exchange: venue,
                timeframe,
                bar_ts: bar.ts,
                current_bar: is_current,
                close: bar.close,
                volume_usd: frame.volume_usd(i),
                volume_ratio: if baseline > 0.0 { bar.volume / baseline } else { 0.0 },
                close_off_low: frame.close_off_low_pct(i),
                close_position_indicator: indicator.to_string(),
                close_position_pct: pct,
                payload,
            },
        );
    }
    out
}

/// Run every requested strategy over the configured check bars. With the
/// `Both` policy the closed bar is evaluated first, so a current-bar hit
/// replaces it: most recent detection wins.
fn run_battery(
    frame: &Frame,
    strategies: &[Strategy],
    policy: CheckBarPolicy,
) -> Vec<(Strategy, i64, bool, detectors::Payload)> {
    strategies
        .par_iter()
        .filter_map(|&strategy| {
            let mut hit = None;
            for &(check_bar, is_current) in policy.bars_to_check() {
                if let Some(payload) = detectors::run(strategy, frame, check_bar) {
                    hit = Some((strategy, check_bar, is_current, payload));
                }
            }
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::Venue;
    use crate::models::Bar;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        frame: Frame,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeClient for StubClient {
        fn venue(&self) -> Venue {
            Venue::BinanceSpot
        }

        async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["BTCUSDT".to_string()])
        }

        async fn fetch_klines(&self, _symbol: &str, _timeframe: Timeframe) -> Frame {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.frame.clone()
        }
    }

    fn frame(volume: f64) -> Frame {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Frame::from_bars(
            (0..70)
                .map(|i| Bar {
                    ts: (start + chrono::Duration::days(i as i64))
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.0,
                    volume,
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn volume_gate_blocks_thin_symbols() {
        // close 100 × volume 10 = 1000 USD, far below the 1d default.
        let client: Arc<dyn ExchangeClient> = Arc::new(StubClient {
            frame: frame(10.0),
            fetches: AtomicUsize::new(0),
        });
        let cache = Arc::new(FrameCache::new());
        let results = scan_symbol(
            &client,
            &cache,
            Timeframe::D1,
            "BTCUSDT",
            &[Strategy::VolumeSurge, Strategy::Confluence],
            CheckBarPolicy::LastClosed,
            Timeframe::D1.min_volume_usd(),
        )
        .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn cache_hit_skips_the_fetch() {
        let stub = Arc::new(StubClient {
            frame: frame(10_000.0),
            fetches: AtomicUsize::new(0),
        });
        let client: Arc<dyn ExchangeClient> = stub.clone();
        let cache = Arc::new(FrameCache::new());

        for _ in 0..3 {
            let _ = scan_symbol(
                &client,
                &cache,
                Timeframe::D1,
                "BTCUSDT",
                &[Strategy::VolumeSurge],
                CheckBarPolicy::LastClosed,
                0.0,
            )
            .await;
        }
        assert_eq!(stub.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn short_frame_yields_nothing() {
        let mut bars = frame(10_000.0).bars().to_vec();
        bars.truncate(5);
        let client: Arc<dyn ExchangeClient> = Arc::new(StubClient {
            frame: Frame::from_bars(bars),
            fetches: AtomicUsize::new(0),
        });
        let cache = Arc::new(FrameCache::new());
        let results = scan_symbol(
            &client,
            &cache,
            Timeframe::D1,
            "BTCUSDT",
            &[Strategy::VolumeSurge],
            CheckBarPolicy::LastClosed,
            0.0,
        )
        .await;
        assert!(results.is_empty());
    }
}
