//! Canonical OHLCV frame
//!
//! Every venue client normalizes its kline payload into a `Frame` before
//! anything downstream touches it: ascending timestamps, no duplicates,
//! no NaN rows, tz-naive index.

use chrono::NaiveDateTime;

use crate::models::Bar;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    bars: Vec<Bar>,
}

impl Frame {
    /// Build a frame from raw bars: drops non-finite rows, sorts ascending
    /// and collapses duplicate timestamps (paginated fetches overlap at
    /// window edges).
    pub fn from_bars(mut bars: Vec<Bar>) -> Self {
        bars.retain(|b| {
            b.open.is_finite()
                && b.high.is_finite()
                && b.low.is_finite()
                && b.close.is_finite()
                && b.volume.is_finite()
        });
        bars.sort_by_key(|b| b.ts);
        bars.dedup_by_key(|b| b.ts);
        Frame { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn get(&self, i: usize) -> Option<&Bar> {
        self.bars.get(i)
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    /// Resolve a negative (or positive) check-bar index to a concrete
    /// position, Python-style: -1 is the last bar.
    pub fn resolve_index(&self, check_bar: i64) -> Option<usize> {
        let n = self.bars.len() as i64;
        let idx = if check_bar < 0 { n + check_bar } else { check_bar };
        if idx >= 0 && idx < n {
            Some(idx as usize)
        } else {
            None
        }
    }

    pub fn ts(&self, i: usize) -> NaiveDateTime {
        self.bars[i].ts
    }

    /// Truncate to the first `n` bars (used by the aggregation prefix tests
    /// and the current-period handling).
    pub fn prefix(&self, n: usize) -> Frame {
        Frame {
            bars: self.bars[..n.min(self.bars.len())].to_vec(),
        }
    }

    // Column accessors. Detectors index these heavily; collecting once per
    // scan is cheaper than chasing struct fields in every rolling loop.

    pub fn opens(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.open).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// USD volume of the bar at `i` (base volume priced at the bar close).
    pub fn volume_usd(&self, i: usize) -> f64 {
        self.bars[i].volume_usd()
    }

    /// Close position inside the bar range as a percentage, 0 when the bar
    /// is degenerate.
    pub fn close_off_low_pct(&self, i: usize) -> f64 {
        let b = &self.bars[i];
        let range = b.range();
        if range > 0.0 {
            (b.close - b.low) / range * 100.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64) -> Bar {
        let ts = NaiveDate::from_ymd_opt(2025, 3, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Bar {
            ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn from_bars_sorts_and_dedups() {
        let frame = Frame::from_bars(vec![bar(3, 3.0), bar(1, 1.0), bar(3, 4.0), bar(2, 2.0)]);
        assert_eq!(frame.len(), 3);
        assert!(frame.bars().windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[test]
    fn from_bars_drops_nan_rows() {
        let mut bad = bar(4, 4.0);
        bad.close = f64::NAN;
        let frame = Frame::from_bars(vec![bar(1, 1.0), bad]);
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn resolve_negative_indices() {
        let frame = Frame::from_bars(vec![bar(1, 1.0), bar(2, 2.0), bar(3, 3.0)]);
        assert_eq!(frame.resolve_index(-1), Some(2));
        assert_eq!(frame.resolve_index(-2), Some(1));
        assert_eq!(frame.resolve_index(-4), None);
        assert_eq!(frame.resolve_index(2), Some(2));
        assert_eq!(frame.resolve_index(3), None);
    }
}
