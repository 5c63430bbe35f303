//! Sudden volume surge
//!
//! Fires when the checked bar's volume exceeds the 65-bar mean by four
//! standard deviations. The payload carries a shape score comparing the
//! surge bar to its predecessor and a qualitative price-extreme label.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{rolling_mean, rolling_std};

const LOOKBACK: usize = 65;
const STD_DEV: f64 = 4.0;
const SCORE_ALPHA: f64 = 1.5;
const EXTREME_LOOKBACK: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct VolumeSurgePayload {
    pub score: f64,
    /// e.g. "White candle - new high", "Black candle".
    pub price_extreme: String,
    pub volume_ratio: f64,
}

pub fn detect(frame: &Frame, check_bar: i64) -> Option<VolumeSurgePayload> {
    let i = frame.resolve_index(check_bar)?;
    if frame.len() < LOOKBACK || i < 2 {
        return None;
    }

    let volume = frame.volumes();
    let mean = rolling_mean(&volume, LOOKBACK);
    let std = rolling_std(&volume, LOOKBACK);
    let upper_band = mean[i] + STD_DEV * std[i];
    if !(volume[i] > upper_band) {
        return None;
    }

    // 8-bar baseline for the displayed ratio.
    let base_start = i.saturating_sub(8);
    let baseline: f64 =
        volume[base_start..i].iter().sum::<f64>() / (i - base_start).max(1) as f64;
    let volume_ratio = if baseline > 0.0 {
        volume[i] / baseline
    } else {
        0.0
    };

    Some(VolumeSurgePayload {
        score: score_at(frame, i),
        price_extreme: price_extreme_at(frame, i),
        volume_ratio,
    })
}

/// Shape score of the surge bar: range expansion times close location,
/// plus the close's reach relative to the previous bar's range.
fn score_at(frame: &Frame, i: usize) -> f64 {
    let bars = frame.bars();
    let prev = &bars[i - 1];
    let cur = &bars[i];

    let range_prev = prev.range();
    let range_cur = cur.range();
    if range_prev == 0.0 || range_cur == 0.0 {
        return 0.0;
    }

    let close_rel = if cur.close < prev.low {
        -1.0 + SCORE_ALPHA * (cur.close - prev.low) / range_prev
    } else if cur.close > prev.high {
        1.0 + SCORE_ALPHA * (cur.close - prev.high) / range_prev
    } else {
        (cur.close - prev.close) / range_prev
    };

    (range_cur / range_prev) * (2.0 * (cur.close - cur.low) / range_cur - 1.0) + close_rel
}

fn price_extreme_at(frame: &Frame, i: usize) -> String {
    let bars = frame.bars();
    let cur = &bars[i];
    let color = if cur.close > bars[i - 1].close {
        "White candle"
    } else {
        "Black candle"
    };

    let start = i.saturating_sub(EXTREME_LOOKBACK);
    let prior = &bars[start..i];
    let prior_high = prior.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
    let prior_low = prior.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    if cur.high > prior_high {
        format!("{color} - new high")
    } else if cur.low < prior_low {
        format!("{color} - new low")
    } else {
        color.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::NaiveDate;

    fn frame_with_final_volume(spike: f64) -> Frame {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let mut bars: Vec<Bar> = (0..70)
            .map(|i| Bar {
                ts: (start + chrono::Duration::days(i as i64))
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.2,
                volume: 50.0 + (i % 4) as f64,
            })
            .collect();
        let last = bars.last_mut().unwrap();
        last.volume = spike;
        last.close = 100.9;
        last.high = 101.5;
        Frame::from_bars(bars)
    }

    #[test]
    fn surge_fires_above_four_sigma() {
        let frame = frame_with_final_volume(500.0);
        let payload = detect(&frame, -1).unwrap();
        assert!(payload.volume_ratio > 5.0);
        assert!(payload.price_extreme.contains("White candle"));
    }

    #[test]
    fn ordinary_volume_does_not_fire() {
        let frame = frame_with_final_volume(55.0);
        assert!(detect(&frame, -1).is_none());
    }

    #[test]
    fn new_high_label() {
        let frame = frame_with_final_volume(500.0);
        let payload = detect(&frame, -1).unwrap();
        assert_eq!(payload.price_extreme, "White candle - new high");
    }
}
