//! Pin down / pin up reversal detectors
//!
//! Pin down anchors to a recent bearish-top candle (upper-wick dominant,
//! printing over the 50-bar closing high with a tight range) and fires on
//! the first close below that candle's low within four bars. Pin up is the
//! bullish mirror anchored to a bullish-bottom at the 50-bar low, with an
//! additional spread-favorable condition.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{
    atr_sma, bars_since, percentile_rank, rolling_max, rolling_max_partial, rolling_min, wma,
};

const WICK_THRESHOLD: f64 = 0.85;
const MAX_BARS_FROM_ANCHOR: i64 = 4;

#[derive(Debug, Clone, Serialize)]
pub struct PinDownPayload {
    pub bearish_top_dist: i64,
    pub high_wick_ratio: f64,
    pub volume_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinUpPayload {
    pub bars_since_bullish_bottom: i64,
    pub bullish_bottom_high: f64,
    pub close_above_prev_high: bool,
    pub in_top_percentile: bool,
    pub spread_favorable: bool,
    pub volume_ratio: f64,
}

pub fn detect_pin_down(frame: &Frame, check_bar: i64) -> Option<PinDownPayload> {
    let i = frame.resolve_index(check_bar)?;
    if frame.len() < 5 || i < 1 {
        return None;
    }

    let n = frame.len();
    let open = frame.opens();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let volume = frame.volumes();

    // 3-bar reach, not true range: rolling max high minus rolling min low.
    let atr3: Vec<f64> = {
        let hh = rolling_max(&high, 3);
        let ll = rolling_min(&low, 3);
        hh.iter().zip(&ll).map(|(h, l)| h - l).collect()
    };

    let highest_close_50 = rolling_max_partial(&close, 50);
    let highest_high_50 = rolling_max_partial(&high, 50);

    let mut bearish_top = vec![false; n];
    for j in 0..n {
        let high_wick = high[j] - open[j].max(close[j]);
        let low_wick = open[j].min(close[j]) - low[j];
        let body = (open[j] - close[j]).abs();
        let inside = j > 0 && high[j] < high[j - 1] && low[j] > low[j - 1];

        let high_upper_wick = high_wick >= WICK_THRESHOLD * body && high_wick > low_wick;
        let bearish_candle = high_upper_wick || high_wick > (open[j].max(close[j]) - low[j]);

        bearish_top[j] = bearish_candle
            && high[j] > highest_close_50[j]
            && (high[j] - close[j]) < atr3[j]
            && (high[j] - highest_high_50[j]).abs() < atr3[j]
            && !inside
            && (high[j] - close[j]) > (close[j] - low[j]);
    }

    // Low of the most recent bearish top, carried forward.
    let mut bearish_top_low = vec![f64::NAN; n];
    let mut carried = f64::NAN;
    for j in 0..n {
        if bearish_top[j] {
            carried = low[j];
        }
        bearish_top_low[j] = carried;
    }

    let since = bars_since(&bearish_top);
    let mut pin_down = vec![false; n];
    for j in 1..n {
        let outside = high[j] > high[j - 1] && low[j] < low[j - 1];
        pin_down[j] = !bearish_top_low[j].is_nan()
            && close[j] < bearish_top_low[j]
            && since[j] < MAX_BARS_FROM_ANCHOR
            && !outside;
    }

    // New occurrences only.
    let fires = pin_down[i] && (i == 0 || !pin_down[i - 1]);
    if !fires {
        return None;
    }

    let body = (open[i] - close[i]).abs();
    let high_wick = high[i] - open[i].max(close[i]);
    let base_start = i.saturating_sub(8);
    let baseline = volume[base_start..i].iter().sum::<f64>() / (i - base_start).max(1) as f64;

    Some(PinDownPayload {
        bearish_top_dist: since[i],
        high_wick_ratio: if body > 0.0 { high_wick / body } else { 0.0 },
        volume_ratio: if baseline > 0.0 { volume[i] / baseline } else { 0.0 },
    })
}

pub fn detect_pin_up(frame: &Frame, check_bar: i64) -> Option<PinUpPayload> {
    let i = frame.resolve_index(check_bar)?;
    if frame.len() < 55 || i < 1 {
        return None;
    }

    let n = frame.len();
    let open = frame.opens();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let volume = frame.volumes();

    let atr7 = atr_sma(&high, &low, &close, 7);
    let lowest_low_50 = rolling_min(&low, 50);

    let mut bullish_bottom = vec![false; n];
    for j in 0..n {
        let high_wick = high[j] - open[j].max(close[j]);
        let low_wick = open[j].min(close[j]) - low[j];
        let body = (open[j] - close[j]).abs();

        let high_lower_wick = low_wick >= WICK_THRESHOLD * body && high_wick < low_wick;
        let bullish_candle = high_lower_wick || low_wick > (high[j] - open[j].min(close[j]));

        bullish_bottom[j] = bullish_candle
            && !lowest_low_50[j].is_nan()
            && low[j] == lowest_low_50[j]
            && (high[j] - low[j]) < atr7[j];
    }

    // High of the most recent bullish bottom, carried forward.
    let mut bottom_high = vec![f64::NAN; n];
    let mut carried = f64::NAN;
    for j in 0..n {
        if bullish_bottom[j] {
            carried = high[j];
        }
        bottom_high[j] = carried;
    }

    let since = bars_since(&bullish_bottom);
    let mut pin_up = vec![false; n];
    for j in 1..n {
        let outside = high[j] > high[j - 1] && low[j] < low[j - 1];
        pin_up[j] = !bottom_high[j].is_nan()
            && close[j] > bottom_high[j]
            && !bottom_high[j - 1].is_nan()
            && close[j] > bottom_high[j - 1]
            && since[j] < MAX_BARS_FROM_ANCHOR
            && !outside;
    }

    let pin_up_edge = pin_up[i] && (i == 0 || !pin_up[i - 1]);
    if !pin_up_edge {
        return None;
    }

    // Spread must not be compressed under all of its WMAs (7/13/21).
    let spread: Vec<f64> = high.iter().zip(&low).map(|(h, l)| h - l).collect();
    let below_all_wmas = {
        const TOL: f64 = 0.95;
        let mut below = true;
        for period in [7usize, 13, 21] {
            let w = wma(&spread, period);
            if !w[i].is_nan() && !(spread[i] <= TOL * w[i]) {
                below = false;
            }
        }
        below
    };

    let close_rank = percentile_rank(&close, 5);
    let in_top_percentile = close_rank[i] >= 80.0;
    let close_above_prev_high = close[i] > high[i - 1];
    let spread_favorable = !below_all_wmas;

    if !(in_top_percentile && close_above_prev_high && spread_favorable) {
        return None;
    }

    let base_start = i.saturating_sub(7);
    let baseline = volume[base_start..i].iter().sum::<f64>() / (i - base_start).max(1) as f64;

    Some(PinUpPayload {
        bars_since_bullish_bottom: since[i],
        bullish_bottom_high: bottom_high[i],
        close_above_prev_high,
        in_top_percentile,
        spread_favorable,
        volume_ratio: if baseline > 0.0 { volume[i] / baseline } else { 0.0 },
    })
}
