//! End-to-end scan scenarios against stubbed venues: aggregation
//! anchoring, consolidation/breakout sequencing, the volume gate, HBS
//! composition, SMA50 strength labels and the phase concurrency cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use marketscan_backend::candles::{aggregate, Frame};
use marketscan_backend::config::OrchestratorConfig;
use marketscan_backend::detectors::{self, Payload, Strategy};
use marketscan_backend::exchanges::{ExchangeClient, Venue};
use marketscan_backend::models::{Bar, CheckBarPolicy, Direction, StrengthLabel, Timeframe};
use marketscan_backend::scanner::orchestrator::{ClientFactory, Orchestrator};
use marketscan_backend::scanner::ScanRequest;

fn daily_bar(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
    Bar {
        ts: date.and_hms_opt(0, 0, 0).unwrap(),
        open,
        high,
        low,
        close,
        volume,
    }
}

fn frame_from(rows: &[(f64, f64, f64, f64, f64)]) -> Frame {
    let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
    Frame::from_bars(
        rows.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close, volume))| {
                daily_bar(start + chrono::Duration::days(i as i64), open, high, low, close, volume)
            })
            .collect(),
    )
}

// ── Scenario A: aggregation anchoring ────────────────────────────────────

#[test]
fn scenario_a_two_day_aggregation_anchors_on_reference_date() {
    let start = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
    let daily = Frame::from_bars(
        (0..8)
            .map(|i| {
                let date = start + chrono::Duration::days(i as i64);
                daily_bar(date, 100.0, 101.0, 99.0, 100.5, 10.0)
            })
            .collect(),
    );

    let agg = aggregate(&daily, Timeframe::D2).unwrap();
    assert_eq!(agg.len(), 4);
    let expected_days = [20, 22, 24, 26];
    for (bar, day) in agg.bars().iter().zip(expected_days) {
        assert_eq!(bar.ts.date(), NaiveDate::from_ymd_opt(2025, 3, day).unwrap());
        assert_eq!(bar.volume, 20.0);
    }
}

// ── Scenario B: consolidation then breakout ──────────────────────────────

/// Noisy history so ATR has context, then a tight 10-bar shelf at
/// high=101/low=99, then a breakout close at 103.
fn shelf(breakout: bool) -> Frame {
    let mut rows: Vec<(f64, f64, f64, f64, f64)> = (0..30)
        .map(|i| {
            let w = 3.0 + (i % 5) as f64;
            (100.0, 100.0 + w, 100.0 - w, 100.0 + (i % 3) as f64 - 1.0, 50.0)
        })
        .collect();
    for i in 0..10 {
        let c = 100.0 + 0.2 * (i % 2) as f64;
        rows.push((c, 101.0, 99.0, c, 45.0));
    }
    if breakout {
        rows.push((100.2, 103.4, 100.0, 103.0, 120.0));
    }
    frame_from(&rows)
}

#[test]
fn scenario_b_consolidation_then_breakout() {
    // Before the 11th bar: the shelf is an active consolidation.
    let inside = shelf(false);
    let payload = detectors::run(Strategy::Consolidation, &inside, -1);
    assert!(payload.is_some(), "shelf should report a consolidation");

    // After the 103 close: the shelf resolves into an upward breakout.
    let broken = shelf(true);
    assert!(detectors::run(Strategy::Consolidation, &broken, -1).is_none());
    match detectors::run(Strategy::ConsolidationBreakout, &broken, -1) {
        Some(Payload::ConsolidationBreakout(p)) => assert_eq!(p.direction, Direction::Up),
        other => panic!("expected a consolidation breakout, got {other:?}"),
    }
}

// ── Scenario C: volume gate ──────────────────────────────────────────────

struct FixedFrameClient {
    venue: Venue,
    frame: Frame,
}

#[async_trait]
impl ExchangeClient for FixedFrameClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec!["AAAUSDT".to_string()])
    }

    async fn fetch_klines(&self, _symbol: &str, _timeframe: Timeframe) -> Frame {
        self.frame.clone()
    }
}

#[tokio::test]
async fn scenario_c_thin_volume_yields_no_signals() {
    // A frame that would absolutely fire volume_surge, but whose closed bar
    // is worth ~5400 USD against the 75k 1d default.
    let mut rows: Vec<(f64, f64, f64, f64, f64)> =
        (0..70).map(|_| (1.0, 1.02, 0.98, 1.0, 500.0)).collect();
    let idx = rows.len() - 2;
    rows[idx] = (1.0, 1.1, 0.99, 1.08, 5_000.0);
    let frame = frame_from(&rows);

    let factory: ClientFactory = Arc::new(move |venue| {
        Arc::new(FixedFrameClient {
            venue,
            frame: frame.clone(),
        }) as Arc<dyn ExchangeClient>
    });

    let orchestrator = Orchestrator::new(OrchestratorConfig {
        stagger_ms: 0,
        ..OrchestratorConfig::default()
    })
    .with_clients(factory);

    let request = ScanRequest {
        timeframes: vec![Timeframe::D1],
        strategies: vec![Strategy::VolumeSurge],
        venues: vec![Venue::BinanceSpot],
        recipients: vec![],
        send_notifications: false,
        min_volume_usd: None,
        check_bar: CheckBarPolicy::LastClosed,
    };

    let results = orchestrator.run(&request).await.unwrap();
    let total: usize = results.values().map(Vec::len).sum();
    assert_eq!(total, 0, "volume gate must suppress all detections");
}

// ── Scenario D: HBS composition over a channel breakout ──────────────────

/// A steady 7%-per-bar advance (far too tall for a box at any price, but a
/// perfect log-space channel) broken by a high-volume thrust: confluence +
/// channel breakout without a consolidation breakout.
fn steep_channel_with_thrust() -> Frame {
    let mut rows: Vec<(f64, f64, f64, f64, f64)> = (0..42)
        .map(|i| {
            let c = 100.0 * 1.07f64.powi(i);
            (c / 1.07, c * 1.01, c * 0.97, c, 50.0)
        })
        .collect();
    let prev = rows.last().unwrap().3;
    let close = prev * 1.30;
    rows.push((prev, close * 1.01, prev * 0.99, close, 260.0));
    frame_from(&rows)
}

#[test]
fn scenario_d_hbs_breakout_via_channel_only() {
    let frame = steep_channel_with_thrust();

    assert!(
        detectors::run(Strategy::Confluence, &frame, -1).is_some(),
        "thrust bar should be a bullish confluence"
    );
    assert!(
        detectors::run(Strategy::ConsolidationBreakout, &frame, -1).is_none(),
        "no box should exist on this tape"
    );
    let channel = detectors::run(Strategy::ChannelBreakout, &frame, -1);
    assert!(channel.is_some(), "channel breakout should fire");

    match detectors::run(Strategy::HbsBreakout, &frame, -1) {
        Some(Payload::HbsBreakout(p)) => {
            assert_eq!(p.breakout_type.as_str(), "channel_breakout");
            assert_eq!(p.direction, Direction::Up);
        }
        other => panic!("expected hbs_breakout, got {other:?}"),
    }
}

#[test]
fn composed_implies_primitives_on_any_frame() {
    // Property 7: wherever hbs fires, confluence and a structural breakout
    // fire too.
    for frame in [steep_channel_with_thrust(), shelf(true), shelf(false)] {
        for check_bar in [-2i64, -1] {
            if let Some(Payload::HbsBreakout(_)) =
                detectors::run(Strategy::HbsBreakout, &frame, check_bar)
            {
                assert!(detectors::run(Strategy::Confluence, &frame, check_bar).is_some());
                assert!(
                    detectors::run(Strategy::ConsolidationBreakout, &frame, check_bar).is_some()
                        || detectors::run(Strategy::ChannelBreakout, &frame, check_bar).is_some()
                );
            }
        }
    }
}

// ── Scenario E: SMA50 strength ───────────────────────────────────────────

#[test]
fn scenario_e_sma50_strength_labels() {
    fn sma_frame(high: f64, low: f64, close: f64) -> Frame {
        let mut rows: Vec<(f64, f64, f64, f64, f64)> =
            (0..60).map(|_| (100.0, 100.6, 99.4, 100.0, 10.0)).collect();
        rows.push((close, high, low, close, 10.0));
        frame_from(&rows)
    }

    let expect = |high: f64, low: f64, close: f64, label: StrengthLabel| {
        match detectors::run(Strategy::Sma50Breakout, &sma_frame(high, low, close), -1) {
            Some(Payload::Sma50Breakout(p)) => assert_eq!(p.strength, Some(label)),
            other => panic!("expected sma50 breakout, got {other:?}"),
        }
    };

    expect(100.5, 98.0, 100.2, StrengthLabel::Regular);
    expect(105.0, 95.0, 104.0, StrengthLabel::Regular);
    expect(105.0, 99.5, 104.0, StrengthLabel::Strong);
}

// ── Scenario F: phase concurrency cap ────────────────────────────────────

struct GaugedClient {
    venue: Venue,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl ExchangeClient for GaugedClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![])
    }

    async fn fetch_klines(&self, _symbol: &str, _timeframe: Timeframe) -> Frame {
        Frame::default()
    }
}

#[tokio::test]
async fn scenario_f_phase_concurrency_stays_under_the_cap() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (active_c, peak_c) = (active.clone(), peak.clone());

    let factory: ClientFactory = Arc::new(move |venue| {
        Arc::new(GaugedClient {
            venue,
            active: active_c.clone(),
            peak: peak_c.clone(),
        }) as Arc<dyn ExchangeClient>
    });

    let orchestrator = Orchestrator::new(OrchestratorConfig {
        fast_max_exchanges: 4,
        slow_max_exchanges: 2,
        stagger_ms: 0,
    })
    .with_clients(factory);

    // Every fast venue at once; the fast phase cap is 4.
    let request = ScanRequest {
        timeframes: vec![Timeframe::D1],
        strategies: vec![Strategy::VolumeSurge],
        venues: vec![
            Venue::BinanceSpot,
            Venue::BinanceFutures,
            Venue::BybitSpot,
            Venue::BybitFutures,
            Venue::GateioSpot,
            Venue::GateioFutures,
        ],
        recipients: vec![],
        send_notifications: false,
        min_volume_usd: None,
        check_bar: CheckBarPolicy::LastClosed,
    };

    orchestrator.run(&request).await.unwrap();
    let peak = peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 4, "peak concurrency was {peak}");
}

// ── Event dedup across repeated scans ────────────────────────────────────

#[tokio::test]
async fn repeated_publishes_store_one_record_per_key() {
    use marketscan_backend::events::{EventSink, SqliteEventStore};
    use marketscan_backend::scanner::SignalRow;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.db");
    let store = SqliteEventStore::new(path.to_str().unwrap()).unwrap();

    let frame = shelf(true);
    let Some(payload) = detectors::run(Strategy::ConsolidationBreakout, &frame, -1) else {
        panic!("expected a breakout payload");
    };
    let row = SignalRow {
        symbol: "AAAUSDT".to_string(),
        exchange: Venue::BinanceSpot,
        timeframe: Timeframe::D1,
        bar_ts: frame.last().unwrap().ts,
        current_bar: false,
        close: frame.last().unwrap().close,
        volume_usd: 200_000.0,
        volume_ratio: 2.5,
        close_off_low: 88.0,
        close_position_indicator: "○○●".to_string(),
        close_position_pct: 88.0,
        payload,
    };

    let mut results: HashMap<Strategy, Vec<SignalRow>> = HashMap::new();
    results.insert(Strategy::ConsolidationBreakout, vec![row]);

    let first = store.publish(&results).await.unwrap();
    let second = store.publish(&results).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 0);
    assert_eq!(store.count().unwrap(), 1);
}
