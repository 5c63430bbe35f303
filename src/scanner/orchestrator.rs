//! Phased scan orchestrator
//!
//! Splits the requested venues into fast and slow speed classes and runs
//! each class as its own phase with its own concurrency cap and a
//! randomized start stagger. The frame cache is cleared at every
//! timeframe boundary and again after phases that touched derived
//! timeframes, so every tick sees fresh candles while venues within a
//! phase share the 1d fetches behind the aggregated frames.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures_util::future::join_all;
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::candles::FrameCache;
use crate::config::OrchestratorConfig;
use crate::detectors::Strategy;
use crate::events::EventSink;
use crate::exchanges::{self, ExchangeClient, SpeedClass, Venue};
use crate::models::Timeframe;
use crate::notify::NotificationSink;
use crate::scanner::{exchange_loop::scan_exchange, ScanRequest, SignalRow};

pub type ClientFactory = Arc<dyn Fn(Venue) -> Arc<dyn ExchangeClient> + Send + Sync>;

pub struct Orchestrator {
    config: OrchestratorConfig,
    cache: Arc<FrameCache>,
    clients: ClientFactory,
    notifier: Option<Arc<dyn NotificationSink>>,
    events: Option<Arc<dyn EventSink>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Orchestrator {
            config,
            cache: Arc::new(FrameCache::new()),
            clients: Arc::new(exchanges::client_for),
            notifier: None,
            events: None,
        }
    }

    pub fn with_clients(mut self, clients: ClientFactory) -> Self {
        self.clients = clients;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cache(&self) -> &Arc<FrameCache> {
        &self.cache
    }

    /// Fail fast on impossible combinations before any fetch goes out.
    pub fn validate(request: &ScanRequest) -> Result<()> {
        if request.timeframes.is_empty() {
            bail!("no timeframes requested");
        }
        if request.strategies.is_empty() {
            bail!("no strategies requested");
        }
        if request.venues.is_empty() {
            bail!("no venues requested");
        }
        for &venue in &request.venues {
            if venue.is_sf_proxy() {
                for &tf in &request.timeframes {
                    if tf != Timeframe::W1 {
                        bail!("venue {venue} only supports 1w, got {tf}");
                    }
                }
            }
        }
        Ok(())
    }

    /// Run the full session: every requested timeframe, fast phase then
    /// slow phase, sinks invoked per venue as its loop completes. Returns
    /// the merged per-strategy results across venues and timeframes.
    pub async fn run(&self, request: &ScanRequest) -> Result<HashMap<Strategy, Vec<SignalRow>>> {
        Self::validate(request)?;

        let mut merged: HashMap<Strategy, Vec<SignalRow>> = HashMap::new();

        for &timeframe in &request.timeframes {
            self.cache.clear();
            info!(timeframe = %timeframe, "timeframe scan starting");

            let (fast, slow): (Vec<Venue>, Vec<Venue>) = request
                .venues
                .iter()
                .copied()
                .partition(|v| v.speed_class() == SpeedClass::Fast);

            let mut phase_results = self
                .run_phase(&fast, self.config.fast_max_exchanges, timeframe, request)
                .await;
            phase_results.extend(
                self.run_phase(&slow, self.config.slow_max_exchanges, timeframe, request)
                    .await,
            );

            for (_, venue_results) in phase_results {
                for (strategy, mut rows) in venue_results {
                    merged.entry(strategy).or_default().append(&mut rows);
                }
            }

            // Derived frames are rebuilt from 1d next tick regardless; keep
            // nothing stale around.
            if timeframe.is_derived() {
                let cleared = self.cache.clear();
                info!(timeframe = %timeframe, cleared, "cache cleared after derived timeframe");
            }
        }

        Ok(merged)
    }

    async fn run_phase(
        &self,
        venues: &[Venue],
        cap: usize,
        timeframe: Timeframe,
        request: &ScanRequest,
    ) -> Vec<(Venue, HashMap<Strategy, Vec<SignalRow>>)> {
        if venues.is_empty() {
            return Vec::new();
        }

        let semaphore = Arc::new(Semaphore::new(cap.max(1)));
        let min_volume = request.min_volume_for(timeframe);

        let tasks = venues.iter().map(|&venue| {
            let semaphore = semaphore.clone();
            let cache = self.cache.clone();
            let client = (self.clients)(venue);
            let strategies = request.strategies.clone();
            let policy = request.check_bar;
            let stagger_ms = self.config.stagger_ms;
            let notifier = if request.send_notifications {
                self.notifier.clone()
            } else {
                None
            };
            let events = self.events.clone();
            let recipients = request.recipients.clone();

            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return (venue, HashMap::new()),
                };

                if stagger_ms > 0 {
                    let jitter = rand::thread_rng().gen_range(0..=stagger_ms);
                    sleep(Duration::from_millis(jitter)).await;
                }

                let results =
                    scan_exchange(client, cache, timeframe, &strategies, policy, min_volume).await;

                if let Some(notifier) = &notifier {
                    for (&strategy, rows) in &results {
                        if rows.is_empty() {
                            continue;
                        }
                        if let Err(e) = notifier.notify(strategy, rows, &recipients).await {
                            warn!(venue = venue.id(), strategy = %strategy, error = %e, "notification failed");
                        }
                    }
                }
                if let Some(events) = &events {
                    if let Err(e) = events.publish(&results).await {
                        error!(venue = venue.id(), error = %e, "event sink failed");
                    }
                }

                (venue, results)
            }
        });

        join_all(tasks).await
    }
}

/// One priority group of a scheduled tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickGroup {
    pub label: &'static str,
    pub venues: Vec<Venue>,
    pub strategies: Vec<Strategy>,
}

/// Strategies the futures venues scan on their own priority slot.
const FUTURES_PRIMARY: [Strategy; 3] = [
    Strategy::ReversalBar,
    Strategy::PinDown,
    Strategy::VolumeSurge,
];

/// Order the scheduled work so the fast venues' primary strategies land
/// first and the slow venues close the tick. Groups run sequentially with
/// a breather between them; venues inside a group still fan out in
/// parallel under the phase caps.
pub fn plan_tick(venues: &[Venue], strategies: &[Strategy]) -> Vec<TickGroup> {
    let fast_spot: Vec<Venue> = venues
        .iter()
        .copied()
        .filter(|v| v.speed_class() == SpeedClass::Fast && !v.is_futures())
        .collect();
    let fast_futures: Vec<Venue> = venues
        .iter()
        .copied()
        .filter(|v| v.speed_class() == SpeedClass::Fast && v.is_futures())
        .collect();
    let slow: Vec<Venue> = venues
        .iter()
        .copied()
        .filter(|v| v.speed_class() == SpeedClass::Slow)
        .collect();

    let primary: Vec<Strategy> = strategies.iter().copied().filter(|s| !s.is_composed()).collect();
    let composed: Vec<Strategy> = strategies.iter().copied().filter(|s| s.is_composed()).collect();
    let futures_primary: Vec<Strategy> = strategies
        .iter()
        .copied()
        .filter(|s| FUTURES_PRIMARY.contains(s))
        .collect();

    let candidates = [
        TickGroup {
            label: "fast primary",
            venues: fast_spot.clone(),
            strategies: primary.clone(),
        },
        TickGroup {
            label: "fast composed",
            venues: fast_spot,
            strategies: composed.clone(),
        },
        TickGroup {
            label: "fast futures",
            venues: fast_futures,
            strategies: futures_primary,
        },
        TickGroup {
            label: "slow primary",
            venues: slow.clone(),
            strategies: primary,
        },
        TickGroup {
            label: "slow composed",
            venues: slow,
            strategies: composed,
        },
    ];

    candidates
        .into_iter()
        .filter(|g| !g.venues.is_empty() && !g.strategies.is_empty())
        .collect()
}

/// Pause between priority groups so venue rate-limit windows refresh.
pub fn group_breather() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(5..=15))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::Frame;
    use crate::models::{Bar, CheckBarPolicy};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub venue that records peak concurrent `list_symbols` calls.
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
            sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn fetch_klines(&self, _symbol: &str, _timeframe: Timeframe) -> Frame {
            Frame::default()
        }
    }

    fn request(venues: Vec<Venue>, timeframes: Vec<Timeframe>) -> ScanRequest {
        ScanRequest {
            timeframes,
            strategies: vec![Strategy::VolumeSurge],
            venues,
            recipients: vec![],
            send_notifications: false,
            min_volume_usd: None,
            check_bar: CheckBarPolicy::LastClosed,
        }
    }

    #[tokio::test]
    async fn phase_cap_bounds_concurrency() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let fast_venues = vec![
            Venue::BinanceSpot,
            Venue::BinanceFutures,
            Venue::BybitSpot,
            Venue::BybitFutures,
            Venue::GateioSpot,
            Venue::GateioFutures,
        ];

        let (active_c, peak_c) = (active.clone(), peak.clone());
        let factory: ClientFactory = Arc::new(move |venue| {
            Arc::new(GaugedClient {
                venue,
                active: active_c.clone(),
                peak: peak_c.clone(),
            }) as Arc<dyn ExchangeClient>
        });

        let config = OrchestratorConfig {
            fast_max_exchanges: 4,
            slow_max_exchanges: 2,
            stagger_ms: 0,
        };
        let orchestrator = Orchestrator::new(config).with_clients(factory);
        orchestrator
            .run(&request(fast_venues, vec![Timeframe::D1]))
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 4);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    struct OneSymbolClient(Venue);

    #[async_trait]
    impl ExchangeClient for OneSymbolClient {
        fn venue(&self) -> Venue {
            self.0
        }

        async fn list_symbols(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec!["AAAUSDT".to_string()])
        }

        async fn fetch_klines(&self, _s: &str, _t: Timeframe) -> Frame {
            let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
            Frame::from_bars(
                (0..30)
                    .map(|i| Bar {
                        ts: (start + chrono::Duration::days(i as i64))
                            .and_hms_opt(0, 0, 0)
                            .unwrap(),
                        open: 1.0,
                        high: 1.1,
                        low: 0.9,
                        close: 1.0,
                        volume: 1.0,
                    })
                    .collect(),
            )
        }
    }

    #[tokio::test]
    async fn derived_timeframe_clears_cache() {
        let factory: ClientFactory =
            Arc::new(|venue| Arc::new(OneSymbolClient(venue)) as Arc<dyn ExchangeClient>);

        let orchestrator = Orchestrator::new(OrchestratorConfig {
            stagger_ms: 0,
            ..OrchestratorConfig::default()
        })
        .with_clients(factory);

        orchestrator
            .run(&request(vec![Venue::BinanceSpot], vec![Timeframe::D2]))
            .await
            .unwrap();
        assert!(orchestrator.cache().is_empty());
    }

    #[tokio::test]
    async fn sf_venue_rejects_non_weekly() {
        let orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let result = orchestrator
            .run(&request(vec![Venue::SfKucoin1w], vec![Timeframe::D1]))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn tick_plan_orders_priority_groups() {
        let venues = vec![
            Venue::BinanceSpot,
            Venue::BinanceFutures,
            Venue::KucoinSpot,
        ];
        let strategies = vec![
            Strategy::Confluence,
            Strategy::HbsBreakout,
            Strategy::ReversalBar,
        ];
        let plan = plan_tick(&venues, &strategies);
        let labels: Vec<&str> = plan.iter().map(|g| g.label).collect();
        assert_eq!(
            labels,
            vec![
                "fast primary",
                "fast composed",
                "fast futures",
                "slow primary",
                "slow composed"
            ]
        );
        assert_eq!(plan[2].strategies, vec![Strategy::ReversalBar]);
        assert_eq!(plan[2].venues, vec![Venue::BinanceFutures]);
    }
}
