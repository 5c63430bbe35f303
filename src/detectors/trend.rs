//! Trend breakout on smoothed Heikin-Ashi
//!
//! Builds a shadow-weighted candle close, runs it through an adaptive MA
//! to get the HA close, derives the recursive HA open, then smooths the
//! HA high/low with a Jurik-style filter and an EMA/WMA mix. The signal is
//! the crossover edge of close over `s_habhigh + 0.1·ATR7`, backed by five
//! supporting conditions: rising ATR, an active pivot breakout (UpWeGo),
//! MA1 over MA2, HA momentum up, and a bullish candle shape.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{
    ama, atr_rma, ema, ffill, jurik_smooth, pivots, rolling_max_partial, wma_partial,
};

const HA_MA_LENGTH: usize = 13;
const JS_SMOOTH: usize = 13;
const JS_POWER: u32 = 5;
const PIVOT_LBL: usize = 2;
const PIVOT_LBR: usize = 2;
const ATR_TREND_THRESHOLD: f64 = 0.01;

#[derive(Debug, Clone, Serialize)]
pub struct TrendPayload {
    pub conditions_met: u32,
    pub ma1: f64,
    pub ma2: f64,
    pub upwego: bool,
    pub atr_trend: bool,
    pub ha_momentum: bool,
    pub flagup_candles: bool,
    pub breakout_level: f64,
}

pub fn detect(frame: &Frame, check_bar: i64) -> Option<TrendPayload> {
    let n = frame.len();
    if n < 60 {
        return None;
    }
    let i = frame.resolve_index(check_bar)?;
    if i < 2 {
        return None;
    }

    let open = frame.opens();
    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();

    let atr7 = atr_rma(&high, &low, &close, 7);

    // Shadow-weighted candle close feeding the adaptive MA.
    let lac: Vec<f64> = (0..n)
        .map(|j| {
            let range = high[j] - low[j] + 1e-6;
            (open[j] + close[j]) / 2.0
                + ((close[j] - open[j]) / range) * ((close[j] - open[j]).abs() / 2.0)
        })
        .collect();
    let habclose = ama(&lac, 2, 1, 15);

    let mut habopen = vec![0.0; n];
    habopen[0] = (open[0] + close[0]) / 2.0;
    for j in 1..n {
        habopen[j] = (habopen[j - 1] + habclose[j - 1]) / 2.0;
    }

    let habhigh: Vec<f64> = (0..n)
        .map(|j| high[j].max(habopen[j]).max(habclose[j]))
        .collect();
    let hablow: Vec<f64> = (0..n)
        .map(|j| low[j].min(habopen[j]).min(habclose[j]))
        .collect();

    let js_high = jurik_smooth(&habhigh, JS_SMOOTH, JS_POWER);
    let js_low = jurik_smooth(&hablow, JS_SMOOTH, JS_POWER);

    let ema_high = ema(&js_high, HA_MA_LENGTH);
    let wma_high = wma_partial(&js_high, HA_MA_LENGTH);
    let s_habhigh: Vec<f64> = ema_high
        .iter()
        .zip(&wma_high)
        .map(|(e, w)| (e + w) / 2.0)
        .collect();
    let s_hablow = ema(&js_low, HA_MA_LENGTH);

    let ma1 = ema(&habclose, 5);
    let ma2 = ema(&habopen, 10);

    // Confirmed swing pivot highs, carried forward.
    let ph = ffill(&pivots(&high, PIVOT_LBL, PIVOT_LBR, true));

    // UpWeGo: close holding above the pivot-high level, fresh within two
    // bars or refreshed by a pivot update.
    let mut breakup = vec![false; n];
    for j in 0..n {
        if !ph[j].is_nan() && !atr7[j].is_nan() {
            breakup[j] = close[j] >= ph[j] + 0.3 * atr7[j];
        }
    }
    let mut upwego = vec![false; n];
    for j in 0..n {
        let bu1 = j >= 1 && breakup[j - 1];
        let bu2 = j >= 2 && breakup[j - 2];
        let pivot_updated = j >= 1 && !ph[j].is_nan() && ph[j] != ph[j - 1];
        let fresh_cross_1 = breakup[j] && !bu1;
        let fresh_cross_2 = bu1 && !bu2;
        upwego[j] = breakup[j] && (fresh_cross_1 || fresh_cross_2 || pivot_updated);
    }

    // Crossover edge over the smoothed HA high band.
    let level = |j: usize| s_habhigh[j] + 0.1 * atr7[j];
    let breakout_now = close[i] > level(i);
    let breakout_prev = close[i - 1] > level(i - 1);
    let is_crossover = breakout_now && !breakout_prev;
    if !is_crossover {
        return None;
    }

    // Supporting conditions
    let atr_trend =
        (atr7[i] - atr7[i - 1]) >= ATR_TREND_THRESHOLD * atr7[i - 1].max(1e-12);
    let ma_bull = ma1[i] > ma2[i];
    let ha_momentum = habclose[i] > habopen[i];

    let higher_high = high[i] > high[i - 1];
    let close_upper_half = (high[i] - close[i]) < (close[i] - low[i]);
    let bearish_top = {
        let high_wick = high[i] - open[i].max(close[i]);
        let low_wick = open[i].min(close[i]) - low[i];
        let body = (open[i] - close[i]).abs();
        let highest_close_50 = rolling_max_partial(&close, 50)[i];
        let high_upper_wick = high_wick >= 0.85 * body && high_wick > low_wick;
        let bearish_candle = high_upper_wick || high_wick > (open[i].max(close[i]) - low[i]);
        bearish_candle
            && high[i] > highest_close_50
            && (high[i] - low[i]) < atr7[i]
            && (high[i] - highest_close_50).abs() < atr7[i]
    };
    let flagup_candles = higher_high && close_upper_half && !bearish_top;

    let supporting = [atr_trend, upwego[i], ma_bull, ha_momentum, flagup_candles];
    let conditions_met = supporting.iter().filter(|&&c| c).count() as u32;
    if conditions_met < 5 {
        return None;
    }

    Some(TrendPayload {
        conditions_met,
        ma1: ma1[i],
        ma2: ma2[i],
        upwego: upwego[i],
        atr_trend,
        ha_momentum,
        flagup_candles,
        breakout_level: level(i),
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

    #[test]
    fn flat_tape_has_no_trend_breakout() {
        let rows: Vec<(f64, f64, f64, f64)> =
            (0..80).map(|_| (100.0, 100.5, 99.5, 100.0)).collect();
        let frame = build(&rows);
        assert!(detect(&frame, -1).is_none());
    }

    #[test]
    fn breakout_after_base_fires_with_all_conditions() {
        // Long sideways base with a modest pivot high, then an expanding
        // thrust through the smoothed band.
        let mut rows: Vec<(f64, f64, f64, f64)> = (0..70)
            .map(|i| {
                let wiggle = 0.4 * ((i % 5) as f64 - 2.0);
                (100.0 + wiggle, 100.9 + wiggle, 99.1 + wiggle, 100.2 + wiggle)
            })
            .collect();
        for k in 0..3 {
            let base = 101.0 + k as f64 * 2.2;
            rows.push((base, base + 2.6, base - 0.3, base + 2.4));
        }
        let frame = build(&rows);
        // Scan the thrust bars; the crossover edge lands on one of them.
        let fired = (0..3).any(|back| detect(&frame, -1 - back).is_some());
        assert!(fired);
    }

    #[test]
    fn purity() {
        let rows: Vec<(f64, f64, f64, f64)> = (0..80)
            .map(|i| {
                let b = 100.0 + (i as f64) * 0.2;
                (b, b + 1.0, b - 1.0, b + 0.5)
            })
            .collect();
        let frame = build(&rows);
        let a = detect(&frame, -2).map(|p| format!("{p:?}"));
        let b = detect(&frame, -2).map(|p| format!("{p:?}"));
        assert_eq!(a, b);
    }
}
