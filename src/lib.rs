//! marketscan backend library
//!
//! Exposes the scan pipeline for the binaries and integration tests:
//! candle acquisition and aggregation, the detector battery, the phased
//! orchestrator, and the notification/event sinks.

pub mod candles;
pub mod config;
pub mod detectors;
pub mod events;
pub mod exchanges;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod scanner;

pub use candles::{Frame, FrameCache};
pub use detectors::Strategy;
pub use exchanges::Venue;
pub use models::{CheckBarPolicy, Timeframe};
pub use scanner::{orchestrator::Orchestrator, ScanRequest, SignalRow};
