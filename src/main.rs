//! marketscan service
//!
//! Long-running scheduler: waits for candle closes, then fans scans out
//! across the configured venues in priority groups — fast venues first,
//! composed strategies after the primaries, slow venues last. Signals go
//! to Telegram and the market-event store as each venue loop completes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketscan_backend::config::{NotifyConfig, OrchestratorConfig};
use marketscan_backend::detectors::Strategy;
use marketscan_backend::events::SqliteEventStore;
use marketscan_backend::exchanges::Venue;
use marketscan_backend::models::{CheckBarPolicy, Timeframe};
use marketscan_backend::notify::TelegramNotifier;
use marketscan_backend::scanner::orchestrator::{group_breather, plan_tick, Orchestrator};
use marketscan_backend::scanner::schedule;
use marketscan_backend::scanner::ScanRequest;

#[derive(Parser, Debug)]
#[command(name = "marketscan", about = "Multi-exchange market scanner service")]
struct Args {
    /// Comma-separated timeframes to schedule (4h,1d,2d,3d,4d,1w)
    #[arg(long, default_value = "4h,1d,2d,3d,4d,1w")]
    timeframes: String,

    /// Comma-separated strategies to run each tick
    #[arg(
        long,
        default_value = "volume_surge,breakout_bar,loaded_bar,start_bar,reversal_bar,pin_down,confluence,hbs_breakout"
    )]
    strategies: String,

    /// Comma-separated venues (defaults to every direct venue)
    #[arg(long)]
    venues: Option<String>,

    /// Recipient names resolved through the notify config
    #[arg(long, default_value = "default")]
    recipients: String,

    /// Disable outbound notifications (events are still stored)
    #[arg(long)]
    no_send: bool,

    /// Override the per-timeframe USD volume gate
    #[arg(long)]
    min_volume_usd: Option<f64>,

    /// Bar selection policy: current, last_closed or both
    #[arg(long, default_value = "last_closed")]
    check_bar: String,

    /// SQLite path for the market-event store
    #[arg(long, env = "EVENTS_DB", default_value = "./market_events.db")]
    events_db: String,
}

fn default_venues() -> Vec<Venue> {
    vec![
        Venue::BinanceFutures,
        Venue::BybitFutures,
        Venue::GateioFutures,
        Venue::MexcFutures,
        Venue::BinanceSpot,
        Venue::BybitSpot,
        Venue::GateioSpot,
        Venue::MexcSpot,
        Venue::KucoinSpot,
    ]
}

fn parse_list<T>(raw: &str, parse: impl Fn(&str) -> Option<T>, what: &str) -> Result<Vec<T>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse(s).ok_or_else(|| anyhow::anyhow!("unknown {what}: {s}")))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info,marketscan_backend=info")
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let timeframes = parse_list(&args.timeframes, Timeframe::parse, "timeframe")?;
    let strategies = parse_list(&args.strategies, Strategy::parse, "strategy")?;
    let venues = match &args.venues {
        Some(raw) => parse_list(raw, Venue::parse, "venue")?,
        None => default_venues(),
    };
    let check_bar = CheckBarPolicy::parse(&args.check_bar)
        .ok_or_else(|| anyhow::anyhow!("unknown check_bar policy: {}", args.check_bar))?;
    let recipients: Vec<String> = args
        .recipients
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let notify_config = NotifyConfig::from_env();
    let events = Arc::new(SqliteEventStore::new(&args.events_db)?);
    let notifier = Arc::new(TelegramNotifier::new(notify_config));

    let orchestrator = Arc::new(
        Orchestrator::new(OrchestratorConfig::from_env())
            .with_notifier(notifier)
            .with_events(events),
    );

    let base_request = ScanRequest {
        timeframes: timeframes.clone(),
        strategies,
        venues,
        recipients,
        send_notifications: !args.no_send,
        min_volume_usd: args.min_volume_usd,
        check_bar,
    };
    // Surface configuration errors before the first tick.
    Orchestrator::validate(&base_request)?;

    info!(
        timeframes = %args.timeframes,
        venues = base_request.venues.len(),
        "scanner service starting"
    );

    tokio::select! {
        result = scheduler_loop(orchestrator.clone(), base_request, timeframes) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, clearing caches");
            orchestrator.cache().clear();
            Ok(())
        }
    }
}

/// Idle → Scanning → CoolingDown, forever. Scheduler-level failures sleep
/// two minutes and re-enter Idle; per-phase failures are contained inside
/// the orchestrator.
async fn scheduler_loop(
    orchestrator: Arc<Orchestrator>,
    base_request: ScanRequest,
    timeframes: Vec<Timeframe>,
) -> Result<()> {
    use schedule::ServiceState;

    let mut state = ServiceState::Idle;
    loop {
        match state {
            ServiceState::Idle => {
                let now = chrono::Utc::now().naive_utc();
                let due = schedule::due_timeframes(&timeframes, now);
                if due.is_empty() {
                    let next = schedule::next_tick(&timeframes, now)
                        .expect("at least one timeframe configured");
                    let pause = schedule::cooldown_until(next, now);
                    info!(next = %next, sleep_s = pause.as_secs(), "idle until next candle close");
                    tokio::time::sleep(pause).await;
                } else {
                    state = ServiceState::Scanning;
                }
            }
            ServiceState::Scanning => {
                let now = chrono::Utc::now().naive_utc();
                let due = schedule::tick_order(schedule::due_timeframes(&timeframes, now));
                info!(?due, "tick starting");

                if let Err(e) = run_tick(&orchestrator, &base_request, &due).await {
                    error!(error = %e, "scheduler tick failed, backing off");
                    tokio::time::sleep(Duration::from_secs(120)).await;
                }
                state = ServiceState::CoolingDown;
            }
            ServiceState::CoolingDown => {
                // A tick never fires twice for the same close: the cooldown
                // outlasts the one-minute trigger window.
                tokio::time::sleep(Duration::from_secs(90)).await;
                state = ServiceState::Idle;
            }
        }
    }
}

async fn run_tick(
    orchestrator: &Orchestrator,
    base_request: &ScanRequest,
    due: &[Timeframe],
) -> Result<()> {
    for &timeframe in due {
        let groups = plan_tick(&base_request.venues, &base_request.strategies);
        for group in groups {
            info!(timeframe = %timeframe, group = group.label, "priority group starting");
            let request = ScanRequest {
                timeframes: vec![timeframe],
                strategies: group.strategies,
                venues: group.venues,
                ..base_request.clone()
            };
            match orchestrator.run(&request).await {
                Ok(results) => {
                    let signals: usize = results.values().map(Vec::len).sum();
                    info!(timeframe = %timeframe, group = group.label, signals, "priority group complete");
                }
                Err(e) => {
                    // Keep going: a failed group must not starve the rest
                    // of the tick.
                    warn!(timeframe = %timeframe, group = group.label, error = %e, "priority group failed");
                }
            }
            tokio::time::sleep(group_breather()).await;
        }
    }
    Ok(())
}
