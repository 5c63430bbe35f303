//! Bullish engulfing reversal
//!
//! A range-expansion bar that dips into the lows of both prior bars, takes
//! out their highs, and closes above the two-bar highest high — gated by a
//! 21-bar spread percentile, depressed low/hl2 percentile ranks, and a
//! buying-power check on the last three lower wicks against ATR(3).

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{atr_sma, percentile_rank};

const MIN_BARS: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct EngulfingPayload {
    pub close_position: f64,
    pub is_buying_power: bool,
    pub pr_low_21: f64,
    pub pr_hl2_13: f64,
    pub pr_spread_21: f64,
    pub volume_ratio: f64,
}

pub fn detect(frame: &Frame, check_bar: i64) -> Option<EngulfingPayload> {
    if frame.len() < MIN_BARS {
        return None;
    }
    let i = frame.resolve_index(check_bar)?;
    if i < 2 {
        return None;
    }

    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();
    let volume = frame.volumes();

    let spread: Vec<f64> = high.iter().zip(&low).map(|(h, l)| h - l).collect();
    let low_wick: Vec<f64> = close.iter().zip(&low).map(|(c, l)| c - l).collect();
    let hl2: Vec<f64> = high.iter().zip(&low).map(|(h, l)| (h + l) / 2.0).collect();
    let atr3 = atr_sma(&high, &low, &close, 3);

    let pr_spread_21 = percentile_rank(&spread, 21);
    let pr_low_21 = percentile_rank(&low, 21);
    let pr_hl2_13 = percentile_rank(&hl2, 13);

    // Engulfing shape
    let range_expanded = spread[i] > spread[i - 1] && spread[i] > spread[i - 2];
    let dips_into_lows = low[i] < low[i - 1] + 0.25 * spread[i - 1]
        && low[i] < low[i - 2] + 0.25 * spread[i - 2];
    let takes_out_highs = high[i] > high[i - 1] && high[i] > close[i - 2];
    let highest_high_prev_2 = high[i - 1].max(high[i - 2]);
    let closes_above = close[i] > highest_high_prev_2;
    let spread_rank_ok = !pr_spread_21[i].is_nan() && pr_spread_21[i] > 20.0;

    let is_engulfing =
        range_expanded && dips_into_lows && takes_out_highs && closes_above && spread_rank_ok;
    if !is_engulfing {
        return None;
    }

    // Reversal context
    let close_position = if spread[i] != 0.0 {
        (close[i] - low[i]) / spread[i]
    } else {
        return None;
    };
    let is_buying_power =
        !atr3[i].is_nan() && (low_wick[i - 2] + low_wick[i - 1] + low_wick[i]) > atr3[i];

    let fires = close_position > 0.5
        && !pr_low_21[i].is_nan()
        && pr_low_21[i] < 25.0
        && !pr_hl2_13[i].is_nan()
        && pr_hl2_13[i] < 35.0
        && is_buying_power;
    if !fires {
        return None;
    }

    let base_start = i.saturating_sub(8);
    let baseline = volume[base_start..i].iter().sum::<f64>() / (i - base_start).max(1) as f64;

    Some(EngulfingPayload {
        close_position,
        is_buying_power,
        pr_low_21: pr_low_21[i],
        pr_hl2_13: pr_hl2_13[i],
        pr_spread_21: pr_spread_21[i],
        volume_ratio: if baseline > 0.0 { volume[i] / baseline } else { 1.0 },
    })
}
