//! Consolidation boxes and box breakouts
//!
//! A box opens when, over a 7-bar window, at least 4 bars sit inside the
//! window's high/low range, the range height stays under the tightness
//! ladder and ATR(14) runs below 0.9 × its own 7-bar average. Boxes then
//! live until a close escapes them, tightening to a stricter ladder level
//! when the latest window admits one. The breakout detector additionally
//! fits a Theil–Sen channel through the box interior and classifies the
//! escape as strong or weak depending on whether the channel broke with
//! (or just before) the box.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{atr_wilder, rolling_max, rolling_mean, rolling_min, theil_sen};
use crate::models::{Direction, StrengthLabel};

const WINDOW: usize = 7;
const MIN_BARS_INSIDE: f64 = 4.0;
const ATR_LEN: usize = 14;
const ATR_SMA: usize = 7;
const BOX_ATR_K: f64 = 0.9;
const DEDUPE_EPS: f64 = 0.01;

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationPayload {
    pub box_age: i64,
    pub box_hi: f64,
    pub box_lo: f64,
    pub box_mid: f64,
    pub bars_inside: f64,
    pub height_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationBreakoutPayload {
    pub direction: Direction,
    pub strong: bool,
    pub strength_label: StrengthLabel,
    /// strong_box_only / strong_box_channel / strong_box_prev_channel /
    /// weak_box_failed_channel / weak_channel_only
    pub breakout_kind: String,
    pub channel_ratio: f64,
    pub box_age: i64,
    pub box_height: f64,
    pub height_pct: f64,
    pub bars_inside: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakoutOptions {
    pub use_log: bool,
    pub channel_multiplier: f64,
    pub use_midrange: bool,
    pub channel_max_pct: f64,
    pub max_height_pct: f64,
}

impl Default for BreakoutOptions {
    fn default() -> Self {
        BreakoutOptions {
            use_log: true,
            channel_multiplier: 0.6,
            use_midrange: true,
            channel_max_pct: 100.0,
            max_height_pct: 35.0,
        }
    }
}

struct WindowStats {
    range_high: Vec<f64>,
    range_low: Vec<f64>,
    height_pct: Vec<f64>,
    bars_inside: Vec<f64>,
    atr_ok: Vec<bool>,
}

fn window_stats(frame: &Frame) -> WindowStats {
    let n = frame.len();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();

    let range_high = rolling_max(&high, WINDOW);
    let range_low = rolling_min(&low, WINDOW);

    let mut height_pct = vec![f64::NAN; n];
    for i in 0..n {
        let denom = range_high[i] + range_low[i];
        if !range_high[i].is_nan() && denom != 0.0 {
            height_pct[i] = 200.0 * (range_high[i] - range_low[i]) / denom;
        }
    }

    let mut inside = vec![0.0; n];
    for i in 0..n {
        if !range_high[i].is_nan() && high[i] <= range_high[i] && low[i] >= range_low[i] {
            inside[i] = 1.0;
        }
    }
    let mut bars_inside = vec![f64::NAN; n];
    for i in (WINDOW - 1)..n {
        bars_inside[i] = inside[i + 1 - WINDOW..=i].iter().sum();
    }

    let atr = atr_wilder(&high, &low, &close, ATR_LEN);
    let atr_slow = rolling_mean(&atr, ATR_SMA);
    let mut atr_ok = vec![false; n];
    for i in 0..n {
        atr_ok[i] = !atr[i].is_nan() && !atr_slow[i].is_nan() && atr[i] < BOX_ATR_K * atr_slow[i];
    }

    WindowStats {
        range_high,
        range_low,
        height_pct,
        bars_inside,
        atr_ok,
    }
}

fn similar_bounds(hi1: f64, lo1: f64, hi2: f64, lo2: f64) -> bool {
    let mid = (hi1 + lo1) / 2.0;
    if mid == 0.0 {
        return false;
    }
    (hi1 - hi2).abs() / mid <= DEDUPE_EPS && (lo1 - lo2).abs() / mid <= DEDUPE_EPS
}

fn min_frame_len() -> usize {
    WINDOW.max(ATR_LEN + ATR_SMA) + 2
}

/// Report the active (non-broken) box containing the checked bar, if any.
pub fn detect_consolidation(frame: &Frame, check_bar: i64) -> Option<ConsolidationPayload> {
    if frame.len() < min_frame_len() {
        return None;
    }
    let i_check = frame.resolve_index(check_bar)?;
    let n = frame.len();
    let close = frame.closes();
    let stats = window_stats(frame);

    struct SimpleBox {
        start_idx: usize,
        left_idx: usize,
        hi: f64,
        lo: f64,
        age: i64,
    }

    let mut cond_prev = false;
    let mut active: Vec<SimpleBox> = Vec::new();
    let mut newest_at_check: Option<(f64, f64, i64)> = None;

    for i in 0..n {
        let cond_now = !stats.bars_inside[i].is_nan()
            && stats.bars_inside[i] >= MIN_BARS_INSIDE
            && !stats.height_pct[i].is_nan()
            && stats.height_pct[i] <= 35.0
            && stats.atr_ok[i];
        let is_entry = cond_now && !cond_prev;
        cond_prev = cond_now;

        if is_entry {
            let hi = stats.range_high[i];
            let lo = stats.range_low[i];
            if !hi.is_nan()
                && !lo.is_nan()
                && !active.iter().any(|b| similar_bounds(hi, lo, b.hi, b.lo))
            {
                let left_idx = i.saturating_sub(WINDOW - 1);
                active.push(SimpleBox {
                    start_idx: i,
                    left_idx,
                    hi,
                    lo,
                    age: WINDOW.min(i - left_idx + 1) as i64,
                });
            }
        }

        active.retain_mut(|b| {
            if close[i] > b.hi || close[i] < b.lo {
                false
            } else {
                if i > b.start_idx {
                    b.age = (i - b.left_idx + 1) as i64;
                }
                true
            }
        });

        if i == i_check {
            newest_at_check = active.last().map(|b| (b.hi, b.lo, b.age));
        }
    }

    let (hi, lo, age) = newest_at_check?;
    Some(ConsolidationPayload {
        box_age: age,
        box_hi: hi,
        box_lo: lo,
        box_mid: (hi + lo) / 2.0,
        bars_inside: stats.bars_inside[i_check],
        height_pct: stats.height_pct[i_check],
    })
}

/// Channel fit through a box interior. Returns (width ratio vs box height,
/// valid, upper bound, lower bound) with bounds projected at
/// `pos_for_bound` steps from the first interior bar.
fn channel_params(
    data_points: &[f64],
    highs: &[f64],
    lows: &[f64],
    box_hi: f64,
    box_lo: f64,
    pos_for_bound: f64,
    options: &BreakoutOptions,
) -> (f64, bool, f64, f64) {
    let n = data_points.len();
    if n < 2 {
        return (1.0, false, box_hi, box_lo);
    }

    let transform = |v: f64| {
        if options.use_log {
            v.max(1e-8).ln()
        } else {
            v
        }
    };
    let back = |v: f64| if options.use_log { v.exp() } else { v };

    let data_log: Vec<f64> = data_points.iter().map(|&v| transform(v)).collect();
    let (slope, intercept) = theil_sen(&data_log);
    if slope.is_nan() {
        return (1.0, false, box_hi, box_lo);
    }

    // Widest deviation of highs/lows from the fit line.
    let mut max_dev: f64 = 0.0;
    for k in 0..n {
        let p_fit = back(intercept + slope * k as f64);
        max_dev = max_dev.max(highs[k] - p_fit).max(p_fit - lows[k]);
    }
    let channel_req = max_dev * options.channel_multiplier;

    let mid_x = (n as f64 - 1.0) / 2.0;
    let center_price = back(intercept + slope * mid_x);
    let offset = if options.use_log {
        if center_price > 0.0 {
            channel_req / center_price
        } else {
            0.0
        }
    } else {
        channel_req
    };

    // Average channel width sampled at the left edge, the middle and the
    // right edge of the fit.
    let mut widths = Vec::with_capacity(3);
    for px in [0.0, mid_x, n as f64 - 1.0] {
        let c_price = back(intercept + slope * px);
        let w = if options.use_log {
            c_price * (offset.exp() - (-offset).exp())
        } else {
            2.0 * channel_req
        };
        widths.push(w);
    }
    let avg_width = widths.iter().sum::<f64>() / widths.len() as f64;

    let box_height = box_hi - box_lo;
    let ratio = if box_height > 0.0 {
        avg_width / box_height
    } else {
        1.0
    };
    let valid = 100.0 * ratio <= options.channel_max_pct;

    let upper = back(intercept + offset + slope * pos_for_bound);
    let lower = back(intercept - offset + slope * pos_for_bound);
    (ratio, valid, upper, lower)
}

struct TrackedBox {
    start_idx: usize,
    left_idx: usize,
    hi: f64,
    lo: f64,
    age: i64,
    level: i64,
    data_points: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
    channel_alerted: bool,
    last_channel_break_bar: Option<usize>,
}

/// Detect a consolidation breakout at the checked bar.
pub fn detect_breakout(
    frame: &Frame,
    check_bar: i64,
    options: &BreakoutOptions,
) -> Option<ConsolidationBreakoutPayload> {
    const CHANNEL_MIN_LENGTH: usize = 6;
    const CHANNEL_BREAK_BUFFER: f64 = 0.05;

    if frame.len() < min_frame_len() {
        return None;
    }
    let i_check = frame.resolve_index(check_bar)?;

    let n = frame.len();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let midrange: Vec<f64> = high.iter().zip(&low).map(|(h, l)| (h + l) / 2.0).collect();
    let stats = window_stats(frame);
    let atr = atr_wilder(&high, &low, &close, ATR_LEN);

    let pct_levels = [options.max_height_pct, 25.0, 15.0];
    let potential_level = |i: usize| -> i64 {
        if stats.bars_inside[i].is_nan()
            || stats.bars_inside[i] < MIN_BARS_INSIDE
            || !stats.atr_ok[i]
            || stats.height_pct[i].is_nan()
        {
            return -1;
        }
        for lvl in (0..pct_levels.len()).rev() {
            if stats.height_pct[i] <= pct_levels[lvl] {
                return lvl as i64;
            }
        }
        -1
    };

    let mut cond_prev = false;
    let mut active: Vec<TrackedBox> = Vec::new();

    // Breakout record at the checked bar, if any.
    let mut hit: Option<ConsolidationBreakoutPayload> = None;

    for i in 0..n {
        let lvl_i = potential_level(i);
        let cond_now = lvl_i >= 0;
        let is_entry = cond_now && !cond_prev;
        cond_prev = cond_now;

        if is_entry {
            let hi = stats.range_high[i];
            let lo = stats.range_low[i];
            if !hi.is_nan()
                && !lo.is_nan()
                && !active.iter().any(|b| similar_bounds(hi, lo, b.hi, b.lo))
            {
                let left_idx = i.saturating_sub(WINDOW - 1);
                let pick = |j: usize| if options.use_midrange { midrange[j] } else { close[j] };
                let data_points: Vec<f64> = (left_idx..i).map(pick).collect();
                active.push(TrackedBox {
                    start_idx: i,
                    left_idx,
                    hi,
                    lo,
                    age: data_points.len() as i64,
                    level: lvl_i,
                    highs: (left_idx..i).map(|j| high[j]).collect(),
                    lows: (left_idx..i).map(|j| low[j]).collect(),
                    data_points,
                    channel_alerted: false,
                    last_channel_break_bar: None,
                });
            }
        }

        let buffer = if atr[i].is_nan() {
            0.0
        } else {
            CHANNEL_BREAK_BUFFER * atr[i]
        };

        let mut keep: Vec<TrackedBox> = Vec::with_capacity(active.len());
        for mut bx in active.drain(..) {
            // Auto-tighten to a stricter ladder level over the recent window.
            let tighter = potential_level(i);
            if tighter > bx.level {
                let left = i.saturating_sub(WINDOW - 1);
                bx.hi = stats.range_high[i];
                bx.lo = stats.range_low[i];
                bx.left_idx = left;
                bx.age = (WINDOW - 1) as i64;
                bx.level = tighter;
                bx.channel_alerted = false;
                bx.last_channel_break_bar = None;
                let pick = |j: usize| if options.use_midrange { midrange[j] } else { close[j] };
                bx.data_points = (left..i).map(pick).collect();
                bx.highs = (left..i).map(|j| high[j]).collect();
                bx.lows = (left..i).map(|j| low[j]).collect();
            }

            let box_break = close[i] > bx.hi || close[i] < bx.lo;
            if box_break {
                // Project the internal channel one step past the interior.
                let n_data = bx.data_points.len();
                let (ratio, valid, upper_proj, lower_proj) = channel_params(
                    &bx.data_points,
                    &bx.highs,
                    &bx.lows,
                    bx.hi,
                    bx.lo,
                    n_data as f64,
                    options,
                );

                let simultaneous = valid
                    && n_data >= CHANNEL_MIN_LENGTH
                    && (close[i] > upper_proj + buffer || close[i] < lower_proj - buffer);
                if simultaneous {
                    bx.channel_alerted = true;
                }

                let has_channel = valid && ratio < 1.0 && n_data >= CHANNEL_MIN_LENGTH;
                let direction = if close[i] > bx.hi {
                    Direction::Up
                } else {
                    Direction::Down
                };
                let prev_bar_channel_break = bx.last_channel_break_bar == Some(i.wrapping_sub(1));

                let (detect, strong, kind) = if !has_channel {
                    (true, true, "strong_box_only")
                } else if simultaneous {
                    (true, true, "strong_box_channel")
                } else if prev_bar_channel_break {
                    (true, true, "strong_box_prev_channel")
                } else if bx.channel_alerted {
                    (true, false, "weak_box_failed_channel")
                } else {
                    (false, false, "no_breakout")
                };

                if detect && i == i_check {
                    hit = Some(ConsolidationBreakoutPayload {
                        direction,
                        strong,
                        strength_label: StrengthLabel::from_is_strong(strong),
                        breakout_kind: kind.to_string(),
                        channel_ratio: ratio,
                        box_age: bx.age,
                        box_height: bx.hi - bx.lo,
                        height_pct: stats.height_pct[i.saturating_sub(1)],
                        bars_inside: stats.bars_inside[i.saturating_sub(1)],
                    });
                }
                // Box closed either way.
            } else {
                // Extend the box and watch the channel inside it.
                let pick = if options.use_midrange { midrange[i] } else { close[i] };
                bx.data_points.push(pick);
                bx.highs.push(high[i]);
                bx.lows.push(low[i]);
                bx.age += 1;

                let n_data = bx.data_points.len();
                let (ratio, valid, upper_curr, lower_curr) = channel_params(
                    &bx.data_points,
                    &bx.highs,
                    &bx.lows,
                    bx.hi,
                    bx.lo,
                    n_data as f64 - 1.0,
                    options,
                );

                if valid && n_data >= CHANNEL_MIN_LENGTH && ratio < 1.0 {
                    let ch_up = close[i] > upper_curr + buffer;
                    let ch_down = close[i] < lower_curr - buffer;
                    if ch_up || ch_down {
                        bx.channel_alerted = true;
                        bx.last_channel_break_bar = Some(i);
                        if i == i_check {
                            hit = Some(ConsolidationBreakoutPayload {
                                direction: if ch_up { Direction::Up } else { Direction::Down },
                                strong: false,
                                strength_label: StrengthLabel::Regular,
                                breakout_kind: "weak_channel_only".to_string(),
                                channel_ratio: ratio,
                                box_age: bx.age,
                                box_height: bx.hi - bx.lo,
                                height_pct: stats.height_pct[i.saturating_sub(1)],
                                bars_inside: stats.bars_inside[i.saturating_sub(1)],
                            });
                        }
                    }
                }
                keep.push(bx);
            }
        }
        active = keep;
    }

    hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::NaiveDate;

    fn build(rows: &[(f64, f64, f64, f64)]) -> Frame {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Frame::from_bars(
            rows.iter()
                .enumerate()
                .map(|(i, &(open, high, low, close))| Bar {
                    ts: (start + chrono::Duration::days(i as i64))
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    open,
                    high,
                    low,
                    close,
                    volume: 100.0,
                })
                .collect(),
        )
    }

    /// Wide noisy tape, then a tight 10-bar shelf.
    fn shelf_rows() -> Vec<(f64, f64, f64, f64)> {
        let mut rows: Vec<(f64, f64, f64, f64)> = (0..30)
            .map(|i| {
                let w = 3.0 + (i % 5) as f64;
                (100.0, 100.0 + w, 100.0 - w, 100.0 + (i % 3) as f64 - 1.0)
            })
            .collect();
        for i in 0..10 {
            let c = 100.0 + 0.2 * (i % 2) as f64;
            rows.push((c, 101.0, 99.0, c));
        }
        rows
    }

    #[test]
    fn tight_shelf_reports_consolidation() {
        let frame = build(&shelf_rows());
        let payload = detect_consolidation(&frame, -1).expect("inside a box");
        assert!(payload.box_hi >= 101.0 - 1e-9);
        assert!(payload.box_lo <= 99.0 + 1e-9);
        assert!(payload.bars_inside >= MIN_BARS_INSIDE);
        assert!(payload.box_age >= WINDOW as i64);
    }

    #[test]
    fn close_above_box_is_a_breakout_up() {
        let mut rows = shelf_rows();
        rows.push((100.0, 103.5, 99.9, 103.0));
        let frame = build(&rows);

        // The breakout bar is no longer "inside" a box...
        assert!(detect_consolidation(&frame, -1).is_none());
        // ...it is a breakout, direction Up.
        let payload =
            detect_breakout(&frame, -1, &BreakoutOptions::default()).expect("breakout fires");
        assert_eq!(payload.direction, Direction::Up);
    }

    #[test]
    fn breakdown_direction_is_down() {
        let mut rows = shelf_rows();
        rows.push((100.0, 100.1, 96.5, 97.0));
        let frame = build(&rows);
        let payload =
            detect_breakout(&frame, -1, &BreakoutOptions::default()).expect("breakout fires");
        assert_eq!(payload.direction, Direction::Down);
    }

    #[test]
    fn no_breakout_without_a_box() {
        let rows: Vec<(f64, f64, f64, f64)> = (0..40)
            .map(|i| {
                let w = 3.0 + (i % 5) as f64;
                (100.0, 100.0 + w, 100.0 - w, 100.0 + (i % 7) as f64 - 3.0)
            })
            .collect();
        let frame = build(&rows);
        assert!(detect_breakout(&frame, -1, &BreakoutOptions::default()).is_none());
    }

    #[test]
    fn checked_bar_inside_box_is_not_a_breakout() {
        let frame = build(&shelf_rows());
        assert!(detect_breakout(&frame, -1, &BreakoutOptions::default()).is_none());
    }
}
