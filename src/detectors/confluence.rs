//! Confluence detector
//!
//! Three pillars evaluated at the checked bar: high volume (a union of four
//! relative-volume reads over VSA bar direction), a spread breakout over
//! the 7/13/21 WMA stack, and a momentum-score breakout over the same WMA
//! stack. All three must hold. The bearish mirror swaps the close-location
//! terms; an engulfing reversal is a bearish confluence immediately
//! followed by a bullish one (or vice versa). The wakeup variant trades
//! the momentum pillar for an SMA volume breakout plus a 7-bar range
//! breakout edge.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{rolling_max, rolling_mean, rolling_std, wma};

const DOJI_THRESHOLD: f64 = 5.0;
const CTX_LEN: usize = 7;
const RANGE_FLOOR: f64 = 0.10;
const LEN_FAST: usize = 7;
const LEN_MID: usize = 13;
const LEN_SLOW: usize = 21;
const WMA_TOL: f64 = 0.95;

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub bullish: bool,
    pub only_wakeup: bool,
}

impl Options {
    pub fn bullish() -> Self {
        Options {
            bullish: true,
            only_wakeup: false,
        }
    }

    pub fn wakeup() -> Self {
        Options {
            bullish: true,
            only_wakeup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfluencePayload {
    /// "Up", "Down", "Up Reversal", "Down Reversal" or "Up Wakeup".
    pub direction: String,
    pub momentum_score: f64,
    pub high_volume: bool,
    pub volume_breakout: bool,
    pub spread_breakout: bool,
    pub momentum_breakout: bool,
    pub extreme_volume: bool,
    pub extreme_spread: bool,
    pub is_confluence_wakeup: bool,
    pub is_engulfing_reversal: bool,
    pub volume_ratio: f64,
    pub close_off_low: f64,
}

struct Series {
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    rng: Vec<f64>,
    high_volume: Vec<bool>,
    extreme_volume: Vec<bool>,
    extreme_spread: Vec<bool>,
    volume_breakout_wma: Vec<bool>,
    volume_breakout_sma: Vec<bool>,
    bull_spread_breakout: Vec<bool>,
    bear_spread_breakout: Vec<bool>,
    range_breakout: Vec<bool>,
    score: Vec<f64>,
    bear_score: Vec<f64>,
    momentum_breakout: Vec<bool>,
    bear_momentum_breakout: Vec<bool>,
    bull_confluence: Vec<bool>,
    bear_confluence: Vec<bool>,
    wakeup: Vec<bool>,
}

fn nan_gt(a: f64, b: f64) -> bool {
    !a.is_nan() && !b.is_nan() && a > b
}

/// Missing WMA counts as a pass, matching chart warmup semantics.
fn above_wma_or_warmup(value: f64, w: f64, tol: f64) -> bool {
    w.is_nan() || value > tol * w
}

fn compute(frame: &Frame) -> Series {
    let n = frame.len();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let volume = frame.volumes();
    let rng: Vec<f64> = high.iter().zip(&low).map(|(h, l)| h - l).collect();

    // VSA bar direction: intention plus how much of the potential move the
    // close actually captured; doji-like bars fall back to shadow balance.
    let mut up_vsa = vec![false; n];
    let mut down_vsa = vec![false; n];
    for i in 1..n {
        let pc = close[i - 1];
        let change_pct = (close[i] - pc).abs() / close[i].max(pc) * 100.0;
        let doji_like = change_pct <= DOJI_THRESHOLD;

        let upper_shadow = high[i] - close[i];
        let lower_shadow = close[i] - low[i];
        let doji_up = lower_shadow > upper_shadow;
        let doji_down = upper_shadow > lower_shadow;

        let up_intention = close[i] > pc;
        let down_intention = close[i] < pc;
        let normal_up = up_intention && (close[i] - pc) >= 0.5 * (high[i] - pc);
        let normal_down = down_intention && (pc - close[i]) >= 0.5 * (pc - low[i]);

        up_vsa[i] = if doji_like { doji_up } else { normal_up };
        down_vsa[i] = if doji_like {
            doji_down
        } else if up_intention {
            !normal_up
        } else if down_intention {
            normal_down
        } else {
            false
        };
    }

    let vol_sma7 = rolling_mean(&volume, 7);
    let vol_sma13 = rolling_mean(&volume, 13);
    let vol_sma21 = rolling_mean(&volume, 21);
    let vol_std7 = rolling_std(&volume, 7);

    let vol_wma7 = wma(&volume, 7);
    let vol_wma13 = wma(&volume, 13);
    let vol_wma21 = wma(&volume, 21);
    let vol_max7 = rolling_max(&volume, 7);

    let mut extreme_volume = vec![false; n];
    let mut volume_breakout_wma = vec![false; n];
    let mut volume_breakout_sma = vec![false; n];
    for i in 0..n {
        extreme_volume[i] = nan_gt(volume[i], vol_sma7[i] + 3.0 * vol_std7[i]);
        let highest7 = !vol_max7[i].is_nan() && volume[i] == vol_max7[i];
        volume_breakout_wma[i] = nan_gt(volume[i], vol_wma7[i])
            && nan_gt(volume[i], vol_wma13[i])
            && nan_gt(volume[i], vol_wma21[i])
            && highest7;
        let exceed_all = nan_gt(volume[i], vol_sma7[i])
            && nan_gt(volume[i], vol_sma13[i])
            && nan_gt(volume[i], vol_sma21[i]);
        volume_breakout_sma[i] = highest7 && exceed_all && !extreme_volume[i];
    }

    // Relative-volume union
    let mut local_rel = vec![false; n];
    let mut broad_rel = vec![false; n];
    let mut serious = vec![false; n];
    for i in 1..n {
        if up_vsa[i] {
            let prev_up = if up_vsa[i - 1] { volume[i - 1] } else { 0.0 };
            local_rel[i] = volume[i] > prev_up;
        } else if down_vsa[i] {
            let prev_down = if down_vsa[i - 1] { volume[i - 1] } else { 0.0 };
            local_rel[i] = volume[i] > prev_down;
        }

        if i >= 3 {
            let same_dir: Vec<f64> = (i.saturating_sub(3)..i)
                .filter(|&j| if up_vsa[i] { up_vsa[j] } else { down_vsa[j] })
                .map(|j| volume[j])
                .collect();
            if (up_vsa[i] || down_vsa[i]) && !same_dir.is_empty() {
                let avg = same_dir.iter().sum::<f64>() / same_dir.len() as f64;
                broad_rel[i] = volume[i] > avg;
            }

            // Serious volume: beat the last opposite-direction bar.
            if broad_rel[i] {
                if up_vsa[i] {
                    for j in (0..i).rev() {
                        if down_vsa[j] {
                            serious[i] = volume[i] > volume[j];
                            break;
                        }
                    }
                } else if down_vsa[i] {
                    for j in (0..i).rev() {
                        if up_vsa[j] {
                            serious[i] = volume[i] > volume[j];
                            break;
                        }
                    }
                }
            }
        }
    }

    let mut high_volume = vec![false; n];
    for i in 0..n {
        let absolute = nan_gt(volume[i], vol_sma7[i])
            && nan_gt(volume[i], vol_sma13[i])
            && nan_gt(volume[i], vol_sma21[i]);
        high_volume[i] = serious[i] || absolute || broad_rel[i] || local_rel[i];
    }

    // Spread pillar
    let wma7_spread = wma(&rng, 7);
    let wma13_spread = wma(&rng, 13);
    let wma21_spread = wma(&rng, 21);
    let rng_max3 = rolling_max(&rng, 3);
    let rng_max7 = rolling_max(&rng, 7);
    let spread_sma13 = rolling_mean(&rng, 13);
    let spread_std13 = rolling_std(&rng, 13);

    let mut bull_spread_breakout = vec![false; n];
    let mut bear_spread_breakout = vec![false; n];
    let mut extreme_spread = vec![false; n];
    let mut range_breakout = vec![false; n];
    for i in 0..n {
        let above_all = above_wma_or_warmup(rng[i], wma7_spread[i], WMA_TOL)
            && above_wma_or_warmup(rng[i], wma13_spread[i], WMA_TOL)
            && above_wma_or_warmup(rng[i], wma21_spread[i], WMA_TOL);

        let pos_bull = if rng[i] > 0.0 {
            (close[i] - low[i]) / rng[i]
        } else {
            0.0
        };
        let pos_bear = if rng[i] > 0.0 {
            (high[i] - close[i]) / rng[i]
        } else {
            0.0
        };
        let is_max3 = !rng_max3[i].is_nan() && rng[i] == rng_max3[i];

        bull_spread_breakout[i] = pos_bull > 0.7 && above_all && is_max3;
        bear_spread_breakout[i] = pos_bear > 0.7 && above_all && is_max3;
        extreme_spread[i] = nan_gt(rng[i], spread_sma13[i] + 3.0 * spread_std13[i]);

        let is_max7 = !rng_max7[i].is_nan() && rng[i] == rng_max7[i];
        range_breakout[i] = is_max7 && above_all && !extreme_spread[i] && pos_bull > 0.3;
    }

    // Momentum pillar: context range anchored from the highest-range bar
    // within the last CTX_LEN bars.
    let mut score = vec![f64::NAN; n];
    let mut bear_score = vec![f64::NAN; n];
    for i in CTX_LEN..n {
        let mut highest_range = 0.0;
        let mut highest_idx = 0usize;
        for back in 1..=CTX_LEN {
            let r = rng[i - back];
            if r > highest_range {
                highest_range = r;
                highest_idx = back;
            }
        }

        let (mut ctx_hi, mut ctx_lo) = {
            let window = (i - CTX_LEN)..i;
            let hi = window
                .clone()
                .map(|j| high[j])
                .fold(f64::NEG_INFINITY, f64::max);
            let lo = window.map(|j| low[j]).fold(f64::INFINITY, f64::min);
            (hi, lo)
        };
        if highest_idx > 0 {
            // Re-anchor the context to start at the highest-range bar.
            let start = (i + highest_idx).saturating_sub(CTX_LEN + 1);
            ctx_hi = (start..=i).map(|j| high[j]).fold(f64::NEG_INFINITY, f64::max);
            ctx_lo = (start..=i).map(|j| low[j]).fold(f64::INFINITY, f64::min);
        }
        let ctx_rng = ctx_hi - ctx_lo;

        let range_factor = if ctx_rng > 0.0 {
            (rng[i] / ctx_rng).max(RANGE_FLOOR)
        } else {
            RANGE_FLOOR
        };
        let pos_global = if ctx_rng > 0.0 {
            (2.0 * (close[i] - (ctx_hi + ctx_lo) / 2.0) / ctx_rng).powi(2)
        } else {
            0.0
        };
        let pos_local = if rng[i] > 0.0 {
            ((close[i] - low[i]) / rng[i]).powi(2)
        } else {
            0.0
        };
        let bear_pos_local = if rng[i] > 0.0 {
            ((high[i] - close[i]) / rng[i]).powi(2)
        } else {
            0.0
        };

        let prev_rng = if i >= 1 { high[i - 1] - low[i - 1] } else { 0.0 };
        let centered_prev = if prev_rng > 0.0 {
            (close[i] - (high[i - 1] + low[i - 1]) / 2.0) / prev_rng
        } else {
            0.0
        };
        let pos_prev = 1.0 + 0.5 * centered_prev.abs().sqrt() * centered_prev.signum();
        let bear_pos_prev = 1.0 - 0.5 * centered_prev.abs().sqrt() * centered_prev.signum();

        score[i] = range_factor * pos_global * pos_local * pos_prev;
        bear_score[i] = range_factor * pos_global * bear_pos_local * bear_pos_prev;
    }

    let momentum_breakout = momentum_over_wmas(&score, &close, true);
    let bear_momentum_breakout = momentum_over_wmas(&bear_score, &close, false);

    let mut bull_confluence = vec![false; n];
    let mut bear_confluence = vec![false; n];
    for i in 0..n {
        bull_confluence[i] = high_volume[i] && bull_spread_breakout[i] && momentum_breakout[i];
        bear_confluence[i] = high_volume[i] && bear_spread_breakout[i] && bear_momentum_breakout[i];
    }

    // Wakeup: up close, SMA volume breakout, fresh 7-bar range breakout.
    let mut wakeup = vec![false; n];
    for i in 1..n {
        wakeup[i] = close[i] > close[i - 1]
            && volume_breakout_sma[i]
            && range_breakout[i]
            && !range_breakout[i - 1];
    }

    Series {
        high,
        low,
        close,
        rng,
        high_volume,
        extreme_volume,
        extreme_spread,
        volume_breakout_wma,
        volume_breakout_sma,
        bull_spread_breakout,
        bear_spread_breakout,
        range_breakout,
        score,
        bear_score,
        momentum_breakout,
        bear_momentum_breakout,
        bull_confluence,
        bear_confluence,
        wakeup,
    }
}

fn momentum_over_wmas(score: &[f64], close: &[f64], bullish: bool) -> Vec<bool> {
    let n = score.len();
    let fast = wma(score, LEN_FAST);
    let mid = wma(score, LEN_MID);
    let slow = wma(score, LEN_SLOW);
    let mut out = vec![false; n];
    for i in 1..n {
        if score[i].is_nan() {
            continue;
        }
        let above = (fast[i].is_nan() || score[i] > fast[i])
            && (mid[i].is_nan() || score[i] > mid[i])
            && (slow[i].is_nan() || score[i] > slow[i]);
        let direction_ok = if bullish {
            close[i] > close[i - 1]
        } else {
            close[i] < close[i - 1]
        };
        out[i] = direction_ok && above;
    }
    out
}

pub fn detect(frame: &Frame, check_bar: i64, options: &Options) -> Option<ConfluencePayload> {
    let min_bars = LEN_SLOW.max(CTX_LEN).max(21) + 2;
    if frame.len() < min_bars {
        return None;
    }
    let i = frame.resolve_index(check_bar)?;
    let s = compute(frame);

    let (detected, direction, is_engulfing_reversal) = if options.only_wakeup {
        if !options.bullish {
            return None;
        }
        (s.wakeup[i], "Up Wakeup".to_string(), false)
    } else {
        let confluence = if options.bullish {
            &s.bull_confluence
        } else {
            &s.bear_confluence
        };
        let detected = confluence[i];
        let engulfing = i > 0
            && if options.bullish {
                s.bear_confluence[i - 1] && s.bull_confluence[i]
            } else {
                s.bull_confluence[i - 1] && s.bear_confluence[i]
            };
        let base = if options.bullish { "Up" } else { "Down" };
        let direction = if engulfing {
            format!("{base} Reversal")
        } else {
            base.to_string()
        };
        (detected, direction, engulfing)
    };

    if !detected {
        return None;
    }

    let vol_mean7 = rolling_mean(&frame.volumes(), 7);
    let volume_ratio = if !vol_mean7[i].is_nan() && vol_mean7[i] > 0.0 {
        frame.volumes()[i] / vol_mean7[i]
    } else {
        0.0
    };
    let close_off_low = if options.bullish {
        if s.rng[i] > 0.0 {
            (s.close[i] - s.low[i]) / s.rng[i] * 100.0
        } else {
            0.0
        }
    } else if s.rng[i] > 0.0 {
        (s.high[i] - s.close[i]) / s.rng[i] * 100.0
    } else {
        0.0
    };

    let score_sel = if options.bullish { s.score[i] } else { s.bear_score[i] };
    let (spread_sel, momentum_sel) = if options.bullish {
        (s.bull_spread_breakout[i], s.momentum_breakout[i])
    } else {
        (s.bear_spread_breakout[i], s.bear_momentum_breakout[i])
    };

    Some(ConfluencePayload {
        direction,
        momentum_score: if score_sel.is_finite() { score_sel } else { 0.0 },
        high_volume: s.high_volume[i],
        volume_breakout: s.volume_breakout_wma[i],
        spread_breakout: spread_sel,
        momentum_breakout: momentum_sel,
        extreme_volume: s.extreme_volume[i],
        extreme_spread: s.extreme_spread[i],
        is_confluence_wakeup: s.wakeup[i] && s.volume_breakout_sma[i] && s.range_breakout[i],
        is_engulfing_reversal,
        volume_ratio,
        close_off_low,
    })
}
