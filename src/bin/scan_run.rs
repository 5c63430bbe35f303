//! One-shot scan runner
//!
//! Runs a single- or multi-timeframe scan across the requested venues and
//! prints per-strategy signal counts. Exit codes: 0 on success, 1 on a
//! configuration error, 2 on a fatal runtime error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketscan_backend::config::{NotifyConfig, OrchestratorConfig};
use marketscan_backend::detectors::Strategy;
use marketscan_backend::events::SqliteEventStore;
use marketscan_backend::exchanges::Venue;
use marketscan_backend::models::{CheckBarPolicy, Timeframe};
use marketscan_backend::notify::TelegramNotifier;
use marketscan_backend::scanner::orchestrator::Orchestrator;
use marketscan_backend::scanner::ScanRequest;

#[derive(Parser, Debug)]
#[command(name = "scan_run", about = "Run one market scan and exit")]
struct Args {
    /// Comma-separated timeframes (one for a single-timeframe run)
    #[arg(long, default_value = "1d")]
    timeframes: String,

    /// Comma-separated strategies
    #[arg(long, default_value = "volume_surge")]
    strategies: String,

    /// Comma-separated venues
    #[arg(
        long,
        default_value = "binance_spot,bybit_spot,gateio_spot,mexc_spot,kucoin_spot"
    )]
    venues: String,

    /// Recipient names resolved through the notify config
    #[arg(long, default_value = "default")]
    recipients: String,

    /// Send notifications for detections
    #[arg(long)]
    send: bool,

    /// Persist events to this SQLite database
    #[arg(long, env = "EVENTS_DB")]
    events_db: Option<String>,

    /// Override the per-timeframe USD volume gate
    #[arg(long)]
    min_volume_usd: Option<f64>,

    /// Bar selection policy: current, last_closed or both
    #[arg(long, default_value = "last_closed")]
    check_bar: String,

    /// Print every signal as JSON
    #[arg(long)]
    json: bool,
}

fn parse_request(args: &Args) -> Result<ScanRequest, String> {
    fn parse_csv(raw: &str) -> Vec<&str> {
        raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
    }

    let mut timeframes = Vec::new();
    for tf in parse_csv(&args.timeframes) {
        timeframes.push(Timeframe::parse(tf).ok_or_else(|| format!("unknown timeframe: {tf}"))?);
    }
    let mut strategies = Vec::new();
    for s in parse_csv(&args.strategies) {
        strategies.push(Strategy::parse(s).ok_or_else(|| format!("unknown strategy: {s}"))?);
    }
    let mut venues = Vec::new();
    for v in parse_csv(&args.venues) {
        venues.push(Venue::parse(v).ok_or_else(|| format!("unknown venue: {v}"))?);
    }
    let check_bar = CheckBarPolicy::parse(&args.check_bar)
        .ok_or_else(|| format!("unknown check_bar policy: {}", args.check_bar))?;

    let request = ScanRequest {
        timeframes,
        strategies,
        venues,
        recipients: parse_csv(&args.recipients).iter().map(|s| s.to_string()).collect(),
        send_notifications: args.send,
        min_volume_usd: args.min_volume_usd,
        check_bar,
    };
    Orchestrator::validate(&request).map_err(|e| e.to_string())?;
    Ok(request)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let request = match parse_request(&args) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let mut orchestrator = Orchestrator::new(OrchestratorConfig::from_env());
    if args.send {
        orchestrator = orchestrator.with_notifier(Arc::new(TelegramNotifier::new(
            NotifyConfig::from_env(),
        )));
    }
    if let Some(db) = &args.events_db {
        match SqliteEventStore::new(db) {
            Ok(store) => orchestrator = orchestrator.with_events(Arc::new(store)),
            Err(e) => {
                eprintln!("configuration error: {e}");
                return ExitCode::from(1);
            }
        }
    }

    let started = std::time::Instant::now();
    match orchestrator.run(&request).await {
        Ok(results) => {
            let total: usize = results.values().map(Vec::len).sum();
            info!(
                signals = total,
                elapsed_s = started.elapsed().as_secs(),
                "scan complete"
            );
            let mut strategies: Vec<_> = results.iter().collect();
            strategies.sort_by_key(|(s, _)| s.as_str());
            for (strategy, rows) in strategies {
                println!("{}: {} signals", strategy.as_str(), rows.len());
                if args.json {
                    for row in rows {
                        match serde_json::to_string(row) {
                            Ok(line) => println!("{line}"),
                            Err(e) => eprintln!("serialization error: {e}"),
                        }
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("fatal: {e}");
            ExitCode::from(2)
        }
    }
}
