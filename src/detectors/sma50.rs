//! 50-SMA breakout
//!
//! Two mutually exclusive signal types with regular taking priority:
//! regular (close above the SMA while the low dipped below it) and
//! pre-breakout (close within 0.2·ATR under the SMA, low below). Both
//! require the clean filter: no close above `sma + 0.2·atr` in the seven
//! bars before the checked one. Strength applies to regular only, from
//! where the SMA cuts the bar: in the lower third means the bar cleared
//! it decisively.

use serde::Serialize;

use crate::candles::Frame;
use crate::indicators::{atr_sma, sma};
use crate::models::StrengthLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutType {
    Regular,
    PreBreakout,
}

impl BreakoutType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakoutType::Regular => "regular",
            BreakoutType::PreBreakout => "pre_breakout",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub sma_period: usize,
    pub atr_period: usize,
    pub atr_multiplier: f64,
    pub use_pre_breakout: bool,
    pub clean_lookback: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            sma_period: 50,
            atr_period: 7,
            atr_multiplier: 0.2,
            use_pre_breakout: true,
            clean_lookback: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Sma50Payload {
    pub breakout_type: BreakoutType,
    /// Regular breakouts only; pre-breakouts carry no strength.
    pub strength: Option<StrengthLabel>,
    pub sma50: f64,
    pub atr: f64,
    pub price_vs_sma_pct: f64,
    pub low_vs_sma_pct: f64,
    pub is_clean: bool,
}

pub fn detect(frame: &Frame, check_bar: i64, options: &Options) -> Option<Sma50Payload> {
    let min_len = options
        .sma_period
        .max(options.atr_period)
        .max(options.clean_lookback)
        + 2;
    if frame.len() < min_len {
        return None;
    }
    let i = frame.resolve_index(check_bar)?;

    let high = frame.highs();
    let low = frame.lows();
    let close = frame.closes();

    let sma50 = sma(&close, options.sma_period);
    let atr = atr_sma(&high, &low, &close, options.atr_period);
    if sma50[i].is_nan() || atr[i].is_nan() {
        return None;
    }

    let upper_threshold = |j: usize| sma50[j] + options.atr_multiplier * atr[j];
    let pre_threshold = sma50[i] - options.atr_multiplier * atr[i];

    // Clean filter: none of the preceding `clean_lookback` bars closed
    // above the upper threshold.
    let mut is_clean = true;
    for back in 1..=options.clean_lookback {
        if back > i {
            break;
        }
        let j = i - back;
        if !sma50[j].is_nan() && !atr[j].is_nan() && close[j] > upper_threshold(j) {
            is_clean = false;
            break;
        }
    }
    if !is_clean {
        return None;
    }

    let regular = close[i] > sma50[i] && low[i] < sma50[i];
    let pre = !regular
        && options.use_pre_breakout
        && close[i] > pre_threshold
        && low[i] < sma50[i];

    let breakout_type = if regular {
        BreakoutType::Regular
    } else if pre {
        BreakoutType::PreBreakout
    } else {
        return None;
    };

    let bar_range = (high[i] - low[i]).max(0.0);
    let strength = if breakout_type == BreakoutType::Regular {
        if bar_range > 0.0 {
            let sma_loc = (sma50[i] - low[i]) / bar_range;
            Some(StrengthLabel::from_is_strong(sma_loc < 0.35))
        } else {
            Some(StrengthLabel::Regular)
        }
    } else {
        None
    };

    Some(Sma50Payload {
        breakout_type,
        strength,
        sma50: sma50[i],
        atr: atr[i],
        price_vs_sma_pct: (close[i] - sma50[i]) / sma50[i] * 100.0,
        low_vs_sma_pct: (low[i] - sma50[i]) / sma50[i] * 100.0,
        is_clean,
    })
}
