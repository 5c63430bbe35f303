//! Process-wide kline frame cache
//!
//! Keyed by (venue, timeframe, symbol). No TTL and no size bound: the
//! orchestrator is the sole invalidator, clearing at timeframe boundaries
//! and after phases that touched derived timeframes. A cold-miss race may
//! fetch twice; either frame is acceptable since fetches are idempotent
//! within a phase.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::candles::Frame;
use crate::models::Timeframe;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameKey {
    pub venue: String,
    pub timeframe: Timeframe,
    pub symbol: String,
}

#[derive(Debug, Default)]
pub struct FrameCache {
    inner: RwLock<HashMap<FrameKey, Arc<Frame>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, venue: &str, timeframe: Timeframe, symbol: &str) -> Option<Arc<Frame>> {
        let key = FrameKey {
            venue: venue.to_string(),
            timeframe,
            symbol: symbol.to_string(),
        };
        self.inner.read().get(&key).cloned()
    }

    pub fn insert(&self, venue: &str, timeframe: Timeframe, symbol: &str, frame: Frame) -> Arc<Frame> {
        let key = FrameKey {
            venue: venue.to_string(),
            timeframe,
            symbol: symbol.to_string(),
        };
        let frame = Arc::new(frame);
        self.inner.write().insert(key, frame.clone());
        frame
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) -> usize {
        let mut map = self.inner.write();
        let n = map.len();
        map.clear();
        n
    }

    pub fn clear_timeframe(&self, timeframe: Timeframe) -> usize {
        let mut map = self.inner.write();
        let before = map.len();
        map.retain(|k, _| k.timeframe != timeframe);
        before - map.len()
    }

    pub fn contains_timeframe(&self, timeframe: Timeframe) -> bool {
        self.inner.read().keys().any(|k| k.timeframe == timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::NaiveDate;

    fn frame() -> Frame {
        let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Frame::from_bars(vec![Bar {
            ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
        }])
    }

    #[test]
    fn insert_get_clear() {
        let cache = FrameCache::new();
        assert!(cache.get("binance_spot", Timeframe::D1, "BTCUSDT").is_none());

        cache.insert("binance_spot", Timeframe::D1, "BTCUSDT", frame());
        cache.insert("binance_spot", Timeframe::D2, "BTCUSDT", frame());
        assert!(cache.get("binance_spot", Timeframe::D1, "BTCUSDT").is_some());
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.clear_timeframe(Timeframe::D2), 1);
        assert!(!cache.contains_timeframe(Timeframe::D2));
        assert!(cache.contains_timeframe(Timeframe::D1));

        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }
}
