//! Volume-spread-analysis bar detectors
//!
//! One detector, many parameter bundles: each named strategy selects a
//! subset of conditions over per-bar spread, volume, momentum, close
//! location, bar type and macro position, plus the optional breakout-close,
//! arctangent-ratio and high-breakout filters. Start bar and test bar carry
//! bespoke rule sets that don't fit the shared vocabulary.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{percentile_rank, rolling_max, rolling_mean, rolling_min, rolling_std};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionOpt {
    Up,
    Down,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandOpt {
    Narrow,
    Wide,
    Abnormal,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentumOpt {
    Narrow,
    Wide,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOpt {
    Low,
    High,
    Abnormal,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOpt {
    InHighs,
    OffHighs,
    InLows,
    OffLows,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarTypeOpt {
    NewHigh,
    NewLow,
    OutsideBar,
    NotOutsideBar,
    InsideBar,
    NewHighOrOutside,
    NewLowOrOutside,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroOpt {
    MacroLow,
    MacroHigh,
    Any,
}

/// Price-based (V1), count-based (V2), or the AND of both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroMethod {
    PriceV1,
    CountV2,
    Strict,
}

#[derive(Debug, Clone)]
pub struct VsaParams {
    pub lookback: usize,
    pub direction: DirectionOpt,
    pub bar_type: BarTypeOpt,
    pub spread: BandOpt,
    pub spread_std: f64,
    pub spread_abnormal_std: f64,
    pub momentum: MomentumOpt,
    pub momentum_std: f64,
    pub volume: VolumeOpt,
    pub volume_std: f64,
    pub volume_abnormal_std: f64,
    pub close: CloseOpt,
    pub macro_opt: MacroOpt,
    pub macro_method: MacroMethod,
    pub v1_short: usize,
    pub v1_medium: usize,
    pub v1_long: usize,
    pub v1_percentile: f64,
    pub v2_short: usize,
    pub v2_medium: usize,
    pub v2_long: usize,
    pub v2_percentile: f64,
    pub use_breakout_close: bool,
    pub breakout_close_percent: f64,
    pub use_arctangent_ratio: bool,
    pub arctangent_ratio_threshold: f64,
    pub use_high_breakout: bool,
    pub high_breakout_lookback: usize,
    pub high_breakout_count_percent: f64,
}

/// A wide up-bar on high volume closing off the lows near a macro low,
/// with breakout close and high-breakout confirmation.
pub fn breakout_bar_params() -> VsaParams {
    VsaParams {
        lookback: 7,
        direction: DirectionOpt::Up,
        bar_type: BarTypeOpt::Any,
        spread: BandOpt::Wide,
        spread_std: 0.5,
        spread_abnormal_std: 4.0,
        momentum: MomentumOpt::Wide,
        momentum_std: 0.75,
        volume: VolumeOpt::High,
        volume_std: 0.5,
        volume_abnormal_std: 3.0,
        close: CloseOpt::OffLows,
        macro_opt: MacroOpt::MacroLow,
        macro_method: MacroMethod::PriceV1,
        v1_short: 7,
        v1_medium: 23,
        v1_long: 50,
        v1_percentile: 10.0,
        v2_short: 8,
        v2_medium: 28,
        v2_long: 48,
        v2_percentile: 25.0,
        use_breakout_close: true,
        breakout_close_percent: 30.0,
        use_arctangent_ratio: false,
        arctangent_ratio_threshold: 1.0,
        use_high_breakout: true,
        high_breakout_lookback: 10,
        high_breakout_count_percent: 10.0,
    }
}

/// An up-bar printing a new low or outside bar on high volume that still
/// closes in the highs near a macro low — supply absorbed.
pub fn stop_bar_params() -> VsaParams {
    VsaParams {
        lookback: 50,
        direction: DirectionOpt::Up,
        bar_type: BarTypeOpt::NewLowOrOutside,
        spread: BandOpt::Any,
        spread_std: 1.0,
        spread_abnormal_std: 4.0,
        momentum: MomentumOpt::Any,
        momentum_std: 0.5,
        volume: VolumeOpt::High,
        volume_std: 1.5,
        volume_abnormal_std: 6.0,
        close: CloseOpt::InHighs,
        macro_opt: MacroOpt::MacroLow,
        macro_method: MacroMethod::CountV2,
        v1_short: 5,
        v1_medium: 21,
        v1_long: 21,
        v1_percentile: 10.0,
        v2_short: 20,
        v2_medium: 20,
        v2_long: 20,
        v2_percentile: 4.0,
        use_breakout_close: false,
        breakout_close_percent: 80.0,
        use_arctangent_ratio: false,
        arctangent_ratio_threshold: 1.0,
        use_high_breakout: false,
        high_breakout_lookback: 20,
        high_breakout_count_percent: 80.0,
    }
}

/// A new high on wide spread and high volume that closes in the lows at a
/// macro high.
pub fn reversal_bar_params() -> VsaParams {
    VsaParams {
        lookback: 14,
        direction: DirectionOpt::Any,
        bar_type: BarTypeOpt::NewHighOrOutside,
        spread: BandOpt::Wide,
        spread_std: 0.5,
        spread_abnormal_std: 4.0,
        momentum: MomentumOpt::Any,
        momentum_std: 0.5,
        volume: VolumeOpt::High,
        volume_std: 0.5,
        volume_abnormal_std: 3.0,
        close: CloseOpt::InLows,
        macro_opt: MacroOpt::MacroHigh,
        macro_method: MacroMethod::CountV2,
        v1_short: 14,
        v1_medium: 34,
        v1_long: 50,
        v1_percentile: 5.0,
        v2_short: 8,
        v2_medium: 28,
        v2_long: 48,
        v2_percentile: 20.0,
        use_breakout_close: false,
        breakout_close_percent: 30.0,
        use_arctangent_ratio: false,
        arctangent_ratio_threshold: 1.0,
        use_high_breakout: false,
        high_breakout_lookback: 20,
        high_breakout_count_percent: 80.0,
    }
}

/// Abnormal volume on a narrow bar closing off the lows — effort with no
/// result, somebody is loading up.
pub fn loaded_bar_params() -> VsaParams {
    VsaParams {
        lookback: 50,
        direction: DirectionOpt::Any,
        bar_type: BarTypeOpt::Any,
        spread: BandOpt::Narrow,
        spread_std: 0.5,
        spread_abnormal_std: 2.0,
        momentum: MomentumOpt::Any,
        momentum_std: 0.5,
        volume: VolumeOpt::Abnormal,
        volume_std: 2.0,
        volume_abnormal_std: 3.0,
        close: CloseOpt::OffLows,
        macro_opt: MacroOpt::Any,
        macro_method: MacroMethod::CountV2,
        v1_short: 7,
        v1_medium: 23,
        v1_long: 50,
        v1_percentile: 10.0,
        v2_short: 8,
        v2_medium: 28,
        v2_long: 48,
        v2_percentile: 25.0,
        use_breakout_close: false,
        breakout_close_percent: 30.0,
        use_arctangent_ratio: false,
        arctangent_ratio_threshold: 1.0,
        use_high_breakout: false,
        high_breakout_lookback: 10,
        high_breakout_count_percent: 10.0,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VsaPayload {
    /// atan(high step) / atan(high-to-low reach) in degrees; 0 when the
    /// ratio is undefined at the checked bar.
    pub arctan_ratio: f64,
}

struct Columns {
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
    spread: Vec<f64>,
}

fn columns(frame: &Frame) -> Columns {
    let high = frame.highs();
    let low = frame.lows();
    let spread = high.iter().zip(&low).map(|(h, l)| h - l).collect();
    Columns {
        open: frame.opens(),
        high,
        low,
        close: frame.closes(),
        volume: frame.volumes(),
        spread,
    }
}

fn arctan_ratio_at(c: &Columns, i: usize) -> f64 {
    if i == 0 {
        return 0.0;
    }
    let num = (c.high[i] - c.high[i - 1]).atan().to_degrees();
    let den = (c.high[i - 1] - c.low[i]).atan().to_degrees();
    if den != 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Count of the previous `lookback` bars whose low is below the current
/// bar's low, as a share of the lookback. Zero inside the warmup window.
fn lower_lows_pct(low: &[f64], i: usize, lookback: usize) -> f64 {
    if i < lookback {
        return 0.0;
    }
    let current = low[i];
    let count = (1..=lookback).filter(|j| current > low[i - j]).count();
    count as f64 / lookback as f64 * 100.0
}

fn higher_highs_pct(high: &[f64], i: usize, lookback: usize) -> f64 {
    if i < lookback {
        return 0.0;
    }
    let current = high[i];
    let count = (1..=lookback).filter(|j| current < high[i - j]).count();
    count as f64 / lookback as f64 * 100.0
}

/// Price-based macro proximity: bar low within `pct`% above the rolling
/// minimum (symmetrically for highs). A 100% threshold always passes.
fn v1_is_low(low: &[f64], rolling_low: &[f64], i: usize, pct: f64) -> bool {
    pct == 100.0 || (!rolling_low[i].is_nan() && low[i] <= rolling_low[i] * (1.0 + pct / 100.0))
}

fn v1_is_high(high: &[f64], rolling_high: &[f64], i: usize, pct: f64) -> bool {
    pct == 100.0 || (!rolling_high[i].is_nan() && high[i] >= rolling_high[i] * (1.0 - pct / 100.0))
}

fn high_breakout_at(c: &Columns, i: usize, lookback: usize, count_percent: f64) -> bool {
    if i < lookback + 2 {
        return false;
    }
    if !(c.close[i] > c.high[i - 1] && c.close[i] > c.high[i - 2]) {
        return false;
    }
    // Count highs below the current close, skipping the last two bars.
    let count = (3..lookback + 3)
        .filter(|j| i >= *j && c.close[i] > c.high[i - j])
        .count();
    let pct = count as f64 / lookback as f64 * 100.0;
    pct >= count_percent
}

/// The shared VSA detector. All selected conditions must hold at the
/// checked bar.
pub fn detect(frame: &Frame, check_bar: i64, params: &VsaParams) -> Option<VsaPayload> {
    let i = frame.resolve_index(check_bar)?;
    if i == 0 || frame.len() < params.lookback + 2 {
        return None;
    }
    let c = columns(frame);

    let mean_spread = rolling_mean(&c.spread, params.lookback);
    let std_spread = rolling_std(&c.spread, params.lookback);
    let mean_volume = rolling_mean(&c.volume, params.lookback);
    let std_volume = rolling_std(&c.volume, params.lookback);

    // Spread band
    let spread_ok = {
        let (m, s) = (mean_spread[i], std_spread[i]);
        match params.spread {
            BandOpt::Any => true,
            BandOpt::Narrow => c.spread[i] < m - params.spread_std * s,
            BandOpt::Wide => {
                c.spread[i] > m + params.spread_std * s
                    && c.spread[i] <= m + params.spread_abnormal_std * s
            }
            BandOpt::Abnormal => c.spread[i] > m + params.spread_abnormal_std * s,
        }
    };
    if !spread_ok {
        return None;
    }

    // Momentum band over |close - prev_close|
    let momentum_ok = if params.momentum == MomentumOpt::Any {
        true
    } else {
        let abs_momentum: Vec<f64> = (0..frame.len())
            .map(|j| {
                if j == 0 {
                    f64::NAN
                } else {
                    (c.close[j] - c.close[j - 1]).abs()
                }
            })
            .collect();
        let mean_m = rolling_mean(&abs_momentum, params.lookback);
        let std_m = rolling_std(&abs_momentum, params.lookback);
        match params.momentum {
            MomentumOpt::Narrow => abs_momentum[i] < mean_m[i] - params.momentum_std * std_m[i],
            MomentumOpt::Wide => abs_momentum[i] > mean_m[i] + params.momentum_std * std_m[i],
            MomentumOpt::Any => true,
        }
    };
    if !momentum_ok {
        return None;
    }

    // Volume band
    let volume_ok = {
        let (m, s) = (mean_volume[i], std_volume[i]);
        match params.volume {
            VolumeOpt::Any => true,
            VolumeOpt::Low => c.volume[i] < m - params.volume_std * s,
            VolumeOpt::High => {
                c.volume[i] >= m - params.volume_std * s
                    && c.volume[i] <= m + params.volume_abnormal_std * s
            }
            VolumeOpt::Abnormal => c.volume[i] > m + params.volume_abnormal_std * s,
        }
    };
    if !volume_ok {
        return None;
    }

    // Close location within the bar
    let close_ok = {
        let range = c.spread[i];
        let pos = if range != 0.0 {
            (c.close[i] - c.low[i]) / range
        } else {
            0.0
        };
        match params.close {
            CloseOpt::Any => true,
            CloseOpt::InHighs => pos > 0.75,
            CloseOpt::OffHighs => pos <= 0.5,
            CloseOpt::InLows => pos < 0.25,
            CloseOpt::OffLows => pos >= 0.5,
        }
    };
    if !close_ok {
        return None;
    }

    // Bar direction
    let direction_ok = match params.direction {
        DirectionOpt::Any => true,
        DirectionOpt::Up => c.close[i] > c.close[i - 1],
        DirectionOpt::Down => c.close[i] < c.close[i - 1],
    };
    if !direction_ok {
        return None;
    }

    // Bar type
    let new_high = c.high[i] > c.high[i - 1] && c.low[i] >= c.low[i - 1];
    let new_low = c.low[i] < c.low[i - 1] && c.high[i] <= c.high[i - 1];
    let outside = c.high[i] > c.high[i - 1] && c.low[i] < c.low[i - 1];
    let inside = c.high[i] < c.high[i - 1] && c.low[i] > c.low[i - 1];
    let bar_type_ok = match params.bar_type {
        BarTypeOpt::Any => true,
        BarTypeOpt::NewHigh => new_high,
        BarTypeOpt::NewLow => new_low,
        BarTypeOpt::OutsideBar => outside,
        BarTypeOpt::NotOutsideBar => !outside,
        BarTypeOpt::InsideBar => inside,
        BarTypeOpt::NewHighOrOutside => new_high || outside,
        BarTypeOpt::NewLowOrOutside => new_low || outside,
    };
    if !bar_type_ok {
        return None;
    }

    // Macro position
    if params.macro_opt != MacroOpt::Any {
        let v1_low_short = rolling_min(&c.low, params.v1_short);
        let v1 = |want_low: bool| -> bool {
            let low_m = rolling_min(&c.low, params.v1_medium);
            let low_l = rolling_min(&c.low, params.v1_long);
            let high_s = rolling_max(&c.high, params.v1_short);
            let high_m = rolling_max(&c.high, params.v1_medium);
            let high_l = rolling_max(&c.high, params.v1_long);
            if want_low {
                v1_is_low(&c.low, &v1_low_short, i, params.v1_percentile)
                    && v1_is_low(&c.low, &low_m, i, params.v1_percentile)
                    && v1_is_low(&c.low, &low_l, i, params.v1_percentile)
            } else {
                v1_is_high(&c.high, &high_s, i, params.v1_percentile)
                    && v1_is_high(&c.high, &high_m, i, params.v1_percentile)
                    && v1_is_high(&c.high, &high_l, i, params.v1_percentile)
            }
        };
        let v2 = |want_low: bool| -> bool {
            let p = params.v2_percentile;
            if want_low {
                lower_lows_pct(&c.low, i, params.v2_short) <= p
                    && lower_lows_pct(&c.low, i, params.v2_medium) <= p
                    && lower_lows_pct(&c.low, i, params.v2_long) <= p
            } else {
                higher_highs_pct(&c.high, i, params.v2_short) <= p
                    && higher_highs_pct(&c.high, i, params.v2_medium) <= p
                    && higher_highs_pct(&c.high, i, params.v2_long) <= p
            }
        };
        let macro_ok = match params.macro_opt {
            MacroOpt::MacroLow => match params.macro_method {
                MacroMethod::PriceV1 => v1(true),
                MacroMethod::CountV2 => v2(true),
                MacroMethod::Strict => v1(true) && v2(true),
            },
            MacroOpt::MacroHigh => {
                let base = match params.macro_method {
                    MacroMethod::PriceV1 => v1(false),
                    MacroMethod::CountV2 => v2(false),
                    MacroMethod::Strict => v1(false) && v2(false),
                };
                // A macro high that is simultaneously hugging the short-term
                // low is a falling market, not a top.
                base && !v1_is_low(&c.low, &v1_low_short, i, params.v1_percentile)
            }
            MacroOpt::Any => true,
        };
        if !macro_ok {
            return None;
        }
    }

    // Breakout close: close inside the top `pct`% of the short close range.
    if params.use_breakout_close {
        let highest_close = rolling_max(&c.close, params.v1_short);
        let lowest_close = rolling_min(&c.close, params.v1_short);
        let range = highest_close[i] - lowest_close[i];
        let threshold = highest_close[i] - range * (params.breakout_close_percent / 100.0);
        if !(c.close[i] >= threshold) {
            return None;
        }
    }

    let arctan = arctan_ratio_at(&c, i);
    if params.use_arctangent_ratio && !(arctan >= params.arctangent_ratio_threshold) {
        return None;
    }

    if params.use_high_breakout
        && !high_breakout_at(&c, i, params.high_breakout_lookback, params.high_breakout_count_percent)
    {
        return None;
    }

    Some(VsaPayload {
        arctan_ratio: if arctan.is_finite() { arctan } else { 0.0 },
    })
}

/// Start bar: high-volume higher-high with a decent range closing well off
/// the lows near the macro lows, without excess range/volume, and new as an
/// occurrence (the previous bar must not already qualify).
pub fn detect_start_bar(frame: &Frame, check_bar: i64) -> Option<VsaPayload> {
    const LOOKBACK: usize = 5;
    const VOLUME_LOOKBACK: usize = 30;
    const LOW_PERCENTILE: f64 = 75.0;
    const RANGE_PERCENTILE: f64 = 75.0;
    const CLOSE_OFF_LOWS: f64 = 50.0;
    const PREV_CLOSE_RANGE: f64 = 75.0;

    let i = frame.resolve_index(check_bar)?;
    if frame.len() < VOLUME_LOOKBACK + 2 || i == 0 {
        return None;
    }
    let c = columns(frame);

    let qualifies = |i: usize| -> bool {
        if i == 0 {
            return false;
        }
        let vol_sma = rolling_mean(&c.volume, VOLUME_LOOKBACK);
        let vol_std = rolling_std(&c.volume, VOLUME_LOOKBACK);
        let range_sma = rolling_mean(&c.spread, VOLUME_LOOKBACK);
        let range_std = rolling_std(&c.spread, VOLUME_LOOKBACK);
        let macro_low = rolling_min(&c.low, VOLUME_LOOKBACK);
        let highest_high = rolling_max(&c.high, LOOKBACK);
        let low_rank = percentile_rank(&c.low, VOLUME_LOOKBACK);
        let range_rank = percentile_rank(&c.spread, LOOKBACK);

        let excess_volume = c.volume[i] > vol_sma[i] + 3.0 * vol_std[i];
        let excess_range = c.spread[i] > range_sma[i] + 3.0 * range_std[i];
        let is_high_volume = c.volume[i] > 0.75 * vol_sma[i] && c.volume[i] > c.volume[i - 1];
        let has_higher_high = c.high[i] > c.high[i - 1];
        let no_narrow_range = range_rank[i] >= RANGE_PERCENTILE;
        let is_in_the_lows = (c.low[i] - macro_low[i]).abs() < c.spread[i]
            || low_rank[i] <= LOW_PERCENTILE;
        let close_in_the_highs = c.spread[i] > 0.0
            && (c.close[i] - c.low[i]) / c.spread[i] >= CLOSE_OFF_LOWS / 100.0;
        let far_prev_close =
            (c.close[i] - c.close[i - 1]).abs() >= c.spread[i - 1] * (PREV_CLOSE_RANGE / 100.0);
        let new_highs = c.high[i] >= 0.75 * highest_high[i];

        is_high_volume
            && has_higher_high
            && no_narrow_range
            && close_in_the_highs
            && far_prev_close
            && !excess_range
            && !excess_volume
            && new_highs
            && is_in_the_lows
    };

    if qualifies(i) && !qualifies(i - 1) {
        Some(VsaPayload { arctan_ratio: 0.0 })
    } else {
        None
    }
}

/// Test bar: a quiet inside-style down bar after a strong up bar — low
/// volume and narrow spread probing for supply.
pub fn detect_test_bar(frame: &Frame, check_bar: i64) -> Option<VsaPayload> {
    const VOLUME_RATIO: f64 = 0.8;
    const SPREAD_RATIO: f64 = 0.5;
    const CLOSE_POSITION: f64 = 0.65;
    const BREAKOUT_LOOKBACK: usize = 5;

    let i = frame.resolve_index(check_bar)?;
    if i < 2 || frame.len() < 16 {
        return None;
    }
    let c = columns(frame);

    // Down bar on close-to-close
    if !(c.close[i] < c.close[i - 1]) {
        return None;
    }
    // Yesterday was an up candle
    if c.close[i - 1] <= c.open[i - 1] {
        return None;
    }
    // Today's volume dried up
    if c.volume[i] >= c.volume[i - 1] * VOLUME_RATIO {
        return None;
    }
    // Today's spread contracted
    let today_spread = c.spread[i];
    let prev_spread = c.spread[i - 1];
    if prev_spread <= 0.0 || today_spread >= prev_spread * SPREAD_RATIO {
        return None;
    }
    // Yesterday closed near its high
    let prev_pos = (c.close[i - 1] - c.low[i - 1]) / prev_spread;
    if prev_pos < CLOSE_POSITION {
        return None;
    }
    // Yesterday broke the recent highs
    let start = (i - 1).saturating_sub(BREAKOUT_LOOKBACK);
    let window_max = c.high[start..i - 1]
        .iter()
        .cloned()
        .fold(f64::NEG_INFINITY, f64::max);
    if !(c.close[i - 1] > window_max) {
        return None;
    }

    Some(VsaPayload {
        arctan_ratio: arctan_ratio_at(&c, i),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Bar;
    use chrono::NaiveDate;

    fn frame_from_ohlcv(rows: &[(f64, f64, f64, f64, f64)]) -> Frame {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        Frame::from_bars(
            rows.iter()
                .enumerate()
                .map(|(i, &(open, high, low, close, volume))| Bar {
                    ts: (start + chrono::Duration::days(i as i64))
                        .and_hms_opt(0, 0, 0)
                        .unwrap(),
                    open,
                    high,
                    low,
                    close,
                    volume,
                })
                .collect(),
        )
    }

    #[test]
    fn test_bar_fires_on_quiet_pullback_after_breakout() {
        // Flat bars, then a breakout up bar, then a narrow low-volume
        // inside-down bar closing lower.
        let mut rows = vec![(100.0, 101.0, 99.0, 100.0, 50.0); 20];
        rows.push((100.0, 106.0, 99.5, 105.5, 90.0)); // strong up close near high
        rows.push((105.0, 105.5, 104.3, 104.5, 20.0)); // quiet test
        let frame = frame_from_ohlcv(&rows);
        assert!(detect_test_bar(&frame, -1).is_some());
    }

    #[test]
    fn test_bar_rejects_high_volume_pullback() {
        let mut rows = vec![(100.0, 101.0, 99.0, 100.0, 50.0); 20];
        rows.push((100.0, 106.0, 99.5, 105.5, 90.0));
        rows.push((105.0, 105.5, 104.3, 104.5, 89.0)); // volume did not dry up
        let frame = frame_from_ohlcv(&rows);
        assert!(detect_test_bar(&frame, -1).is_none());
    }

    #[test]
    fn loaded_bar_needs_abnormal_volume_on_narrow_spread() {
        // 60 flat bars with mild noise, then a narrow bar with huge volume
        // closing mid-range.
        let mut rows: Vec<(f64, f64, f64, f64, f64)> = (0..60)
            .map(|i| {
                let w = if i % 2 == 0 { 1.0 } else { 1.4 };
                (100.0, 100.0 + w, 100.0 - w, 100.0 + 0.1 * (i % 3) as f64, 50.0 + (i % 5) as f64)
            })
            .collect();
        rows.push((100.0, 100.3, 99.9, 100.2, 500.0));
        let frame = frame_from_ohlcv(&rows);
        assert!(detect(&frame, -1, &loaded_bar_params()).is_some());

        // Same bar with ordinary volume does not qualify.
        let mut rows2 = rows.clone();
        rows2.last_mut().unwrap().4 = 52.0;
        let frame2 = frame_from_ohlcv(&rows2);
        assert!(detect(&frame2, -1, &loaded_bar_params()).is_none());
    }

    #[test]
    fn high_breakout_counts_prior_highs() {
        let mut rows = vec![(100.0, 101.0, 99.0, 100.0, 50.0); 15];
        rows.push((100.0, 104.0, 100.0, 103.5, 60.0));
        let frame = frame_from_ohlcv(&rows);
        let c = columns(&frame);
        let i = frame.len() - 1;
        assert!(high_breakout_at(&c, i, 10, 10.0));
        assert!(high_breakout_at(&c, i, 10, 100.0));
    }

    #[test]
    fn short_frame_returns_none() {
        let rows = vec![(100.0, 101.0, 99.0, 100.0, 50.0); 5];
        let frame = frame_from_ohlcv(&rows);
        assert!(detect(&frame, -1, &breakout_bar_params()).is_none());
        assert!(detect_start_bar(&frame, -1).is_none());
        assert!(detect_test_bar(&frame, -1).is_none());
    }
}
