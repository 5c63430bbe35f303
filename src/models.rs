use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One OHLCV candle. `ts` is the opening instant of the bar's interval,
/// always tz-naive UTC to avoid mixed-zone arithmetic downstream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn volume_usd(&self) -> f64 {
        self.volume * self.close
    }
}

/// Scan timeframes. Derived timeframes (2d/3d/4d/1w) are always built by
/// aggregating 1d source bars so period boundaries line up across venues,
/// even where a venue offers a native weekly kline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    H4,
    D1,
    D2,
    D3,
    D4,
    W1,
}

impl Timeframe {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            "2d" => Some(Timeframe::D2),
            "3d" => Some(Timeframe::D3),
            "4d" | "4w" => Some(Timeframe::D4),
            "1w" => Some(Timeframe::W1),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::D2 => "2d",
            Timeframe::D3 => "3d",
            Timeframe::D4 => "4d",
            Timeframe::W1 => "1w",
        }
    }

    /// True for timeframes built by aggregating daily bars.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            Timeframe::D2 | Timeframe::D3 | Timeframe::D4 | Timeframe::W1
        )
    }

    /// Daily bars folded into one bar of this timeframe.
    pub fn daily_multiplier(&self) -> usize {
        match self {
            Timeframe::H4 => 1,
            Timeframe::D1 => 1,
            Timeframe::D2 => 2,
            Timeframe::D3 => 3,
            Timeframe::D4 => 4,
            Timeframe::W1 => 7,
        }
    }

    /// Fixed reference date anchoring period boundaries. Weekly frames are
    /// Monday-anchored and carry no reference date.
    pub fn anchor_date(&self) -> Option<NaiveDate> {
        match self {
            Timeframe::D2 | Timeframe::D3 => NaiveDate::from_ymd_opt(2025, 3, 20),
            Timeframe::D4 => NaiveDate::from_ymd_opt(2025, 3, 22),
            _ => None,
        }
    }

    /// Minimum closed-bar USD volume for a symbol to be scanned.
    pub fn min_volume_usd(&self) -> f64 {
        match self {
            Timeframe::W1 => 500_000.0,
            Timeframe::D4 => 300_000.0,
            Timeframe::D3 => 200_000.0,
            Timeframe::D2 => 150_000.0,
            Timeframe::D1 => 75_000.0,
            Timeframe::H4 => 40_000.0,
        }
    }

    /// Minimum 1d source bars needed so SMA(50) has warmup on the
    /// aggregated frame.
    pub fn required_source_count(&self) -> usize {
        const SMA_LEN: usize = 50;
        const WARMUP: usize = 10;
        if self.is_derived() {
            (SMA_LEN + WARMUP) * self.daily_multiplier()
        } else {
            SMA_LEN + WARMUP
        }
    }

    pub fn interval_secs(&self) -> i64 {
        match self {
            Timeframe::H4 => 4 * 3600,
            Timeframe::D1 => 86_400,
            Timeframe::D2 => 2 * 86_400,
            Timeframe::D3 => 3 * 86_400,
            Timeframe::D4 => 4 * 86_400,
            Timeframe::W1 => 7 * 86_400,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which bar a detector evaluates: -1 is the currently forming bar,
/// -2 the last closed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckBarPolicy {
    Current,
    LastClosed,
    Both,
}

impl Default for CheckBarPolicy {
    fn default() -> Self {
        CheckBarPolicy::LastClosed
    }
}

impl CheckBarPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "current" => Some(CheckBarPolicy::Current),
            "last_closed" => Some(CheckBarPolicy::LastClosed),
            "both" => Some(CheckBarPolicy::Both),
            _ => None,
        }
    }

    /// (check_bar, is_current) pairs in evaluation order. With `Both` the
    /// closed bar runs first so a current-bar hit wins as the most recent.
    pub fn bars_to_check(&self) -> &'static [(i64, bool)] {
        match self {
            CheckBarPolicy::Current => &[(-1, true)],
            CheckBarPolicy::LastClosed => &[(-2, false)],
            CheckBarPolicy::Both => &[(-2, false), (-1, true)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "Up",
            Direction::Down => "Down",
        }
    }

    pub fn signum(&self) -> i32 {
        match self {
            Direction::Up => 1,
            Direction::Down => -1,
        }
    }
}

/// Normalized strength wording. Display never uses "Weak": anything that is
/// not strong is reported as Regular.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrengthLabel {
    Strong,
    Regular,
}

impl StrengthLabel {
    pub fn from_is_strong(strong: bool) -> Self {
        if strong {
            StrengthLabel::Strong
        } else {
            StrengthLabel::Regular
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrengthLabel::Strong => "Strong",
            StrengthLabel::Regular => "Regular",
        }
    }
}

/// 3-dot close position indicator used in notification payloads.
pub fn close_position_indicator(high: f64, low: f64, close: f64) -> (&'static str, f64) {
    let bar_range = high - low;
    if bar_range <= 0.0 {
        return ("○●○", 50.0);
    }
    let pct = (close - low) / bar_range * 100.0;
    let indicator = if pct <= 30.0 {
        "●○○"
    } else if pct <= 70.0 {
        "○●○"
    } else {
        "○○●"
    };
    (indicator, pct)
}
