//! Candle data layer: canonical frames, derived-timeframe aggregation and
//! the process-wide frame cache.

pub mod aggregate;
pub mod cache;
pub mod frame;

pub use aggregate::{aggregate, AggregateError};
pub use cache::{FrameCache, FrameKey};
pub use frame::Frame;
