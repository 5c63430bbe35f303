//! Diagonal channel and wedge detectors
//!
//! The channel fit is a Theil–Sen regression over closes (log-price by
//! default) wide enough to contain every bar's high and low in the window;
//! a channel is live under the same inside-count and ATR conditions as
//! boxes, with its own tightness ladder. Breakout means the close crosses
//! the band projected one step forward. The wedge variant fits highs and
//! lows separately and requires all initial closes inside the envelope.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{atr_wilder, rolling_mean, theil_sen};
use crate::models::Direction;

const ATR_LEN: usize = 14;
const ATR_SMA: usize = 7;

#[derive(Debug, Clone, Serialize)]
pub struct ChannelPayload {
    pub channel_age: i64,
    pub channel_slope: f64,
    pub channel_direction: String,
    pub height_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelBreakoutPayload {
    pub direction: Direction,
    pub channel_age: i64,
    pub channel_slope: f64,
    pub channel_direction: String,
    pub height_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WedgeBreakoutPayload {
    pub direction: Direction,
    pub channel_age: i64,
    pub channel_slope: f64,
    pub channel_direction: String,
    pub percent_growth_per_bar: f64,
    pub height_pct: f64,
}

fn slope_direction(slope: f64) -> String {
    if slope > 0.0 {
        "Upwards".to_string()
    } else if slope < 0.0 {
        "Downwards".to_string()
    } else {
        "Horizontal".to_string()
    }
}

fn transform(v: f64, use_log: bool) -> f64 {
    if use_log {
        v.max(1e-8).ln()
    } else {
        v
    }
}

fn back(v: f64, use_log: bool) -> f64 {
    if use_log {
        v.exp()
    } else {
        v
    }
}

fn atr_gate(frame: &Frame, atr_k: f64) -> Vec<bool> {
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let atr = atr_wilder(&high, &low, &close, ATR_LEN);
    let atr_slow = rolling_mean(&atr, ATR_SMA);
    (0..frame.len())
        .map(|i| !atr[i].is_nan() && !atr_slow[i].is_nan() && atr[i] < atr_k * atr_slow[i])
        .collect()
}

fn window_median_close(close: &[f64], lo: usize, hi_inclusive: usize) -> f64 {
    let mut w: Vec<f64> = close[lo..=hi_inclusive].to_vec();
    crate::indicators::median(&mut w)
}

struct ActiveChannel {
    start_idx: usize,
    left_idx: usize,
    base_offset: f64,
    age: i64,
    level: i64,
    closes: Vec<f64>,
}

struct ChannelScan {
    /// (direction, slope_at_break, age, height_pct) per bar, when breaking.
    breakout: Vec<Option<(Direction, f64, i64, f64)>>,
    /// (age, slope, height_pct) of the newest live channel per bar.
    live: Vec<Option<(i64, f64, f64)>>,
}

fn scan_channels(frame: &Frame, use_log: bool) -> ChannelScan {
    const N: usize = 7;
    const MIN_BARS_INSIDE: f64 = 4.0;
    const PCT_LEVELS: [f64; 4] = [40.0, 35.0, 25.0, 15.0];
    const ATR_K: f64 = 1.5;

    let n = frame.len();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let atr_ok = atr_gate(frame, ATR_K);

    // Tightness: band height required to contain the window, relative to
    // the window's median close.
    let mut height_pct = vec![f64::NAN; n];
    for i in (N - 1)..n {
        let lo_i = i + 1 - N;
        let w: Vec<f64> = close[lo_i..=i].iter().map(|&c| transform(c, use_log)).collect();
        let (slope, intercept) = theil_sen(&w);
        if slope.is_nan() {
            continue;
        }
        let mut req: f64 = 0.0;
        for j in 0..N {
            let p_fit = back(intercept + slope * j as f64, use_log);
            req = req.max(high[lo_i + j] - p_fit).max(p_fit - low[lo_i + j]);
        }
        let med = window_median_close(&close, lo_i, i);
        if med != 0.0 {
            height_pct[i] = 100.0 * 2.0 * req / med;
        }
    }

    // Every window trivially contains its own bars, so the inside-count
    // gate reduces to the ATR filter plus the ladder.
    let potential_level = |i: usize| -> i64 {
        if (N as f64) < MIN_BARS_INSIDE || !atr_ok[i] || height_pct[i].is_nan() {
            return -1;
        }
        for lvl in (0..PCT_LEVELS.len()).rev() {
            if height_pct[i] <= PCT_LEVELS[lvl] {
                return lvl as i64;
            }
        }
        -1
    };

    let mut breakout: Vec<Option<(Direction, f64, i64, f64)>> = vec![None; n];
    let mut live: Vec<Option<(i64, f64, f64)>> = vec![None; n];
    let mut active: Vec<ActiveChannel> = Vec::new();
    let mut cond_prev = false;

    for i in 0..n {
        let lvl = potential_level(i);
        let cond_now = lvl >= 0;
        let is_entry = cond_now && !cond_prev;
        cond_prev = cond_now;

        if is_entry && i >= N - 1 {
            let lo_i = i + 1 - N;
            let w: Vec<f64> = close[lo_i..=i].iter().map(|&c| transform(c, use_log)).collect();
            let (slope, intercept) = theil_sen(&w);
            if !slope.is_nan() {
                let mut req: f64 = 0.0;
                for j in 0..N {
                    let p_fit = back(intercept + slope * j as f64, use_log);
                    req = req.max(high[lo_i + j] - p_fit).max(p_fit - low[lo_i + j]);
                }
                active.push(ActiveChannel {
                    start_idx: i,
                    left_idx: lo_i,
                    base_offset: req,
                    age: (i - lo_i + 1) as i64,
                    level: lvl,
                    closes: close[lo_i..=i].to_vec(),
                });
            }
        }

        let mut keep: Vec<ActiveChannel> = Vec::with_capacity(active.len());
        for mut ch in active.drain(..) {
            // Tighten to the recent window when a stricter level shows up.
            let tighter = potential_level(i);
            if tighter > ch.level && i - ch.left_idx + 1 > N && i >= N - 1 {
                let lo_i = i + 1 - N;
                let w: Vec<f64> =
                    close[lo_i..=i].iter().map(|&c| transform(c, use_log)).collect();
                let (slope, intercept) = theil_sen(&w);
                if !slope.is_nan() {
                    let mut req: f64 = 0.0;
                    for j in 0..N {
                        let p_fit = back(intercept + slope * j as f64, use_log);
                        req = req.max(high[lo_i + j] - p_fit).max(p_fit - low[lo_i + j]);
                    }
                    ch.base_offset = req;
                    ch.left_idx = lo_i;
                    ch.age = N as i64;
                    ch.level = tighter;
                    // Exclude the current bar; it re-enters via the
                    // tentative fit below.
                    ch.closes = close[lo_i..i].to_vec();
                }
            }

            // Tentative fit including today's close, band projected at the
            // right edge.
            let mut temp: Vec<f64> = ch.closes.iter().map(|&c| transform(c, use_log)).collect();
            temp.push(transform(close[i], use_log));
            let temp_len = temp.len();
            let (slope, intercept) = theil_sen(&temp);

            let mut broke = false;
            let mut direction = Direction::Up;
            if !slope.is_nan() {
                let mid_x = (temp_len as f64 - 1.0) / 2.0;
                let center_price = back(intercept + slope * mid_x, use_log);
                let offset = if use_log {
                    if center_price > 0.0 {
                        ch.base_offset / center_price
                    } else {
                        0.0
                    }
                } else {
                    ch.base_offset
                };
                let upper = back(intercept + offset + slope * (temp_len as f64 - 1.0), use_log);
                let lower = back(intercept - offset + slope * (temp_len as f64 - 1.0), use_log);
                if close[i] > upper {
                    broke = true;
                    direction = Direction::Up;
                } else if close[i] < lower {
                    broke = true;
                    direction = Direction::Down;
                }
            }

            if broke {
                // Slope of the channel as it stood before today's bar.
                let prev: Vec<f64> = ch.closes.iter().map(|&c| transform(c, use_log)).collect();
                let (prev_slope, _) = theil_sen(&prev);
                let h = height_pct[i.saturating_sub(1)];
                breakout[i] = Some((direction, prev_slope, ch.age, h));
            } else {
                ch.closes.push(close[i]);
                if i > ch.start_idx {
                    ch.age = (i - ch.left_idx + 1) as i64;
                }
                keep.push(ch);
            }
        }
        active = keep;

        if let Some(newest) = active.last() {
            let w: Vec<f64> = newest.closes.iter().map(|&c| transform(c, use_log)).collect();
            let (slope, _) = theil_sen(&w);
            live[i] = Some((newest.age, slope, height_pct[i]));
        }
    }

    ChannelScan { breakout, live }
}

fn min_frame_len(window: usize) -> usize {
    window.max(ATR_LEN + ATR_SMA) + 2
}

pub fn detect_channel_breakout(
    frame: &Frame,
    check_bar: i64,
    use_log: bool,
) -> Option<ChannelBreakoutPayload> {
    if frame.len() < min_frame_len(7) {
        return None;
    }
    let i = frame.resolve_index(check_bar)?;
    let scan = scan_channels(frame, use_log);
    let (direction, slope, age, height_pct) = scan.breakout[i]?;
    Some(ChannelBreakoutPayload {
        direction,
        channel_age: age,
        channel_slope: slope,
        channel_direction: slope_direction(slope),
        height_pct: if height_pct.is_nan() { 0.0 } else { height_pct },
    })
}

/// Report the live channel the checked bar sits inside, if any.
pub fn detect_channel(frame: &Frame, check_bar: i64) -> Option<ChannelPayload> {
    if frame.len() < min_frame_len(7) {
        return None;
    }
    let i = frame.resolve_index(check_bar)?;
    let scan = scan_channels(frame, true);
    if scan.breakout[i].is_some() {
        return None;
    }
    let (age, slope, height_pct) = scan.live[i]?;
    Some(ChannelPayload {
        channel_age: age,
        channel_slope: slope,
        channel_direction: slope_direction(slope),
        height_pct: if height_pct.is_nan() { 0.0 } else { height_pct },
    })
}

struct ActiveWedge {
    start_idx: usize,
    left_idx: usize,
    age: i64,
    level: i64,
    closes: Vec<f64>,
    highs: Vec<f64>,
    lows: Vec<f64>,
}

pub fn detect_wedge_breakout(
    frame: &Frame,
    check_bar: i64,
    use_log: bool,
) -> Option<WedgeBreakoutPayload> {
    const N: usize = 14;
    const PCT_LEVELS: [f64; 4] = [40.0, 35.0, 25.0, 15.0];
    const ATR_K: f64 = 1.0;

    if frame.len() < min_frame_len(N) {
        return None;
    }
    let i_check = frame.resolve_index(check_bar)?;

    let n = frame.len();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let atr_ok = atr_gate(frame, ATR_K);

    // Envelope height from the two fits, relative to the median close.
    let mut height_pct = vec![f64::NAN; n];
    for i in (N - 1)..n {
        let lo_i = i + 1 - N;
        let wh: Vec<f64> = high[lo_i..=i].iter().map(|&v| transform(v, use_log)).collect();
        let wl: Vec<f64> = low[lo_i..=i].iter().map(|&v| transform(v, use_log)).collect();
        let (uslope, uinter) = theil_sen(&wh);
        let (lslope, linter) = theil_sen(&wl);
        if uslope.is_nan() || lslope.is_nan() {
            continue;
        }
        let mut max_dev: f64 = 0.0;
        for j in 0..N {
            let u = back(uinter + uslope * j as f64, use_log);
            let l = back(linter + lslope * j as f64, use_log);
            max_dev = max_dev.max((high[lo_i + j] - u).abs()).max((low[lo_i + j] - l).abs());
        }
        let med = window_median_close(&close, lo_i, i);
        if med != 0.0 {
            height_pct[i] = 100.0 * 2.0 * max_dev / med;
        }
    }

    let potential_level = |i: usize| -> i64 {
        if !atr_ok[i] || height_pct[i].is_nan() {
            return -1;
        }
        for lvl in (0..PCT_LEVELS.len()).rev() {
            if height_pct[i] <= PCT_LEVELS[lvl] {
                return lvl as i64;
            }
        }
        -1
    };

    let mut cond_prev = false;
    let mut active: Vec<ActiveWedge> = Vec::new();
    let mut hit: Option<(Direction, f64, i64, f64)> = None;

    for i in 0..n {
        let lvl = potential_level(i);
        let cond_now = lvl >= 0;
        let is_entry = cond_now && !cond_prev;
        cond_prev = cond_now;

        if is_entry && i >= N - 1 {
            let lo_i = i + 1 - N;
            let wh: Vec<f64> = high[lo_i..=i].iter().map(|&v| transform(v, use_log)).collect();
            let wl: Vec<f64> = low[lo_i..=i].iter().map(|&v| transform(v, use_log)).collect();
            let (uslope, uinter) = theil_sen(&wh);
            let (lslope, linter) = theil_sen(&wl);

            // All initial closes must sit inside the envelope.
            let mut initial_outside = uslope.is_nan() || lslope.is_nan();
            if !initial_outside {
                for j in 0..N {
                    let upper_j = back(uinter + uslope * j as f64, use_log);
                    let lower_j = back(linter + lslope * j as f64, use_log);
                    let c_j = close[lo_i + j];
                    if c_j > upper_j || c_j < lower_j {
                        initial_outside = true;
                        break;
                    }
                }
            }
            if !initial_outside {
                active.push(ActiveWedge {
                    start_idx: i,
                    left_idx: lo_i,
                    age: (i - lo_i + 1) as i64,
                    level: lvl,
                    closes: close[lo_i..=i].to_vec(),
                    highs: high[lo_i..=i].to_vec(),
                    lows: low[lo_i..=i].to_vec(),
                });
            }
        }

        let mut keep: Vec<ActiveWedge> = Vec::with_capacity(active.len());
        for mut ch in active.drain(..) {
            let tighter = potential_level(i);
            if tighter > ch.level && i - ch.left_idx + 1 > N && i >= N - 1 {
                let lo_i = i + 1 - N;
                ch.left_idx = lo_i;
                ch.age = N as i64;
                ch.level = tighter;
                ch.closes = close[lo_i..i].to_vec();
                ch.highs = high[lo_i..i].to_vec();
                ch.lows = low[lo_i..i].to_vec();
            }

            let prev_len = ch.closes.len();
            let wh: Vec<f64> = ch.highs.iter().map(|&v| transform(v, use_log)).collect();
            let wl: Vec<f64> = ch.lows.iter().map(|&v| transform(v, use_log)).collect();
            let (uslope, uinter) = theil_sen(&wh);
            let (lslope, linter) = theil_sen(&wl);

            let mut broke = false;
            let mut direction = Direction::Up;
            if !uslope.is_nan() && !lslope.is_nan() {
                let projected_upper = back(uinter + uslope * prev_len as f64, use_log);
                let projected_lower = back(linter + lslope * prev_len as f64, use_log);
                if close[i] > projected_upper {
                    broke = true;
                    direction = Direction::Up;
                } else if close[i] < projected_lower {
                    broke = true;
                    direction = Direction::Down;
                }
            }

            if broke {
                let wc: Vec<f64> = ch.closes.iter().map(|&v| transform(v, use_log)).collect();
                let (mslope, _) = theil_sen(&wc);
                if i == i_check {
                    hit = Some((direction, mslope, ch.age, height_pct[i.saturating_sub(1)]));
                }
            } else {
                ch.closes.push(close[i]);
                ch.highs.push(high[i]);
                ch.lows.push(low[i]);
                if i > ch.start_idx {
                    ch.age = (i - ch.left_idx + 1) as i64;
                }
                keep.push(ch);
            }
        }
        active = keep;
    }

    let (direction, slope, age, height) = hit?;
    let growth = if use_log && slope.is_finite() {
        (slope.exp() - 1.0) * 100.0
    } else {
        0.0
    };
    Some(WedgeBreakoutPayload {
        direction,
        channel_age: age,
        channel_slope: if slope.is_finite() { slope } else { 0.0 },
        channel_direction: slope_direction(slope),
        percent_growth_per_bar: growth,
        height_pct: if height.is_nan() { 0.0 } else { height },
    })
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

    /// Violent tape (too tall for the ladder), then a gentle tight
    /// up-channel.
    fn channel_rows() -> Vec<(f64, f64, f64, f64)> {
        let mut rows: Vec<(f64, f64, f64, f64)> = (0..30)
            .map(|i| {
                let w = 20.0 + 5.0 * (i % 3) as f64;
                (100.0, 100.0 + w, 100.0 - w, 100.0 + 3.0 * ((i % 3) as f64 - 1.0))
            })
            .collect();
        for i in 0..12 {
            let c = 100.0 + 0.3 * i as f64;
            rows.push((c, c + 0.8, c - 0.8, c + 0.1 * (i % 2) as f64));
        }
        rows
    }

    #[test]
    fn ongoing_channel_is_reported() {
        let frame = build(&channel_rows());
        let payload = detect_channel(&frame, -1).expect("inside a channel");
        assert_eq!(payload.channel_direction, "Upwards");
        assert!(payload.channel_age >= 7);
    }

    #[test]
    fn close_above_projected_band_breaks_out() {
        let mut rows = channel_rows();
        let last_close = rows.last().unwrap().3;
        rows.push((last_close, last_close + 6.0, last_close - 0.2, last_close + 5.5));
        let frame = build(&rows);
        let payload = detect_channel_breakout(&frame, -1, true).expect("breakout fires");
        assert_eq!(payload.direction, Direction::Up);
        assert_eq!(payload.channel_direction, "Upwards");
        assert!(payload.channel_slope > 0.0);
    }

    #[test]
    fn quiet_bar_inside_channel_is_not_a_breakout() {
        let frame = build(&channel_rows());
        assert!(detect_channel_breakout(&frame, -1, true).is_none());
    }

    #[test]
    fn short_frame_is_none() {
        let rows: Vec<(f64, f64, f64, f64)> =
            (0..10).map(|_| (100.0, 101.0, 99.0, 100.0)).collect();
        let frame = build(&rows);
        assert!(detect_channel_breakout(&frame, -1, true).is_none());
        assert!(detect_wedge_breakout(&frame, -1, true).is_none());
    }
}
