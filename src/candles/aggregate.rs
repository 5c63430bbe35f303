//! Daily-bar aggregation into derived timeframes
//!
//! 2d/3d/4d periods are anchored to fixed reference dates so every venue's
//! derived bars start on the same calendar day; weeks are Monday-anchored.
//! Aggregation is deterministic and commutes with prefix truncation: a
//! re-scan over the same dailies reproduces the same derived frame.

use chrono::{Datelike, NaiveDate};
use thiserror::Error;

use crate::candles::Frame;
use crate::models::{Bar, Timeframe};

/// Fewer surviving source bars than this and the symbol is not worth
/// aggregating at all.
const MIN_SOURCE_BARS: usize = 10;

#[derive(Debug, Error, PartialEq)]
pub enum AggregateError {
    #[error("insufficient source data: {got} bars, need at least {need}")]
    InsufficientData { got: usize, need: usize },
    #[error("{0} is not a derived timeframe")]
    NotDerived(Timeframe),
}

/// Fold a 1d frame into the requested derived timeframe.
/// `open = first, high = max, low = min, close = last, volume = sum` per
/// period; the derived bar is indexed by the first daily timestamp that
/// fell into its period. The last bar may cover a partial (open) period.
pub fn aggregate(daily: &Frame, tf: Timeframe) -> Result<Frame, AggregateError> {
    if !tf.is_derived() {
        return Err(AggregateError::NotDerived(tf));
    }
    if daily.len() < MIN_SOURCE_BARS {
        return Err(AggregateError::InsufficientData {
            got: daily.len(),
            need: MIN_SOURCE_BARS,
        });
    }

    let mut out: Vec<Bar> = Vec::with_capacity(daily.len() / tf.daily_multiplier() + 1);
    let mut current_period: Option<i64> = None;

    for bar in daily.bars() {
        let period = period_index(tf, bar.ts.date());
        if current_period == Some(period) {
            let agg = out.last_mut().expect("period open implies a bar");
            agg.high = agg.high.max(bar.high);
            agg.low = agg.low.min(bar.low);
            agg.close = bar.close;
            agg.volume += bar.volume;
        } else {
            current_period = Some(period);
            out.push(*bar);
        }
    }

    Ok(Frame::from_bars(out))
}

/// Period index of a calendar date for a derived timeframe. Dates before
/// the anchor land in negative periods, which group just as well.
fn period_index(tf: Timeframe, date: NaiveDate) -> i64 {
    match tf {
        Timeframe::W1 => {
            // Monday-of-week ordinal
            let monday = date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64);
            monday.num_days_from_ce() as i64
        }
        _ => {
            let anchor = tf.anchor_date().expect("derived tf has an anchor");
            let days = (date - anchor).num_days();
            days.div_euclid(tf.daily_multiplier() as i64)
        }
    }
}

/// First calendar day of the period containing `date`.
pub fn period_start(tf: Timeframe, date: NaiveDate) -> NaiveDate {
    match tf {
        Timeframe::W1 => date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64),
        _ => {
            let anchor = tf.anchor_date().expect("derived tf has an anchor");
            let span = tf.daily_multiplier() as i64;
            let days = (date - anchor).num_days();
            anchor + chrono::Duration::days(days.div_euclid(span) * span)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily_frame(start: NaiveDate, days: usize) -> Frame {
        let bars = (0..days)
            .map(|i| {
                let ts = (start + chrono::Duration::days(i as i64))
                    .and_hms_opt(0, 0, 0)
                    .unwrap();
                Bar {
                    ts,
                    open: 100.0 + i as f64,
                    high: 101.0 + i as f64,
                    low: 99.0 + i as f64,
                    close: 100.5 + i as f64,
                    volume: 10.0,
                }
            })
            .collect();
        Frame::from_bars(bars)
    }

    #[test]
    fn two_day_periods_anchor_on_reference_date() {
        // Scenario: 8 dailies starting exactly on the 2d reference date.
        let start = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        let daily = daily_frame(start, 8);
        let agg = aggregate(&daily, Timeframe::D2).unwrap();

        assert_eq!(agg.len(), 4);
        let expected = [20, 22, 24, 26];
        for (bar, day) in agg.bars().iter().zip(expected) {
            assert_eq!(bar.ts.date(), NaiveDate::from_ymd_opt(2025, 3, day).unwrap());
        }
    }

    #[test]
    fn ohlcv_identities_hold_per_period() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        let daily = daily_frame(start, 6);
        let agg = aggregate(&daily, Timeframe::D3).unwrap();

        assert_eq!(agg.len(), 2);
        let first = agg.get(0).unwrap();
        assert_eq!(first.open, 100.0);
        assert_eq!(first.close, 102.5);
        assert_eq!(first.high, 103.0);
        assert_eq!(first.low, 99.0);
        assert_eq!(first.volume, 30.0);
    }

    #[test]
    fn offset_start_lands_in_running_period() {
        // Starting one day after the anchor: first 2d bar covers only the
        // tail of its period and is indexed by its own first daily ts.
        let start = NaiveDate::from_ymd_opt(2025, 3, 21).unwrap();
        let daily = daily_frame(start, 11);
        let agg = aggregate(&daily, Timeframe::D2).unwrap();

        assert_eq!(agg.get(0).unwrap().ts.date(), start);
        assert_eq!(agg.get(0).unwrap().volume, 10.0);
        // Next boundary is 03-22 per the anchor.
        assert_eq!(
            agg.get(1).unwrap().ts.date(),
            NaiveDate::from_ymd_opt(2025, 3, 22).unwrap()
        );
    }

    #[test]
    fn weekly_bars_start_monday() {
        // 2025-03-20 is a Thursday.
        let start = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        let daily = daily_frame(start, 15);
        let weekly = aggregate(&daily, Timeframe::W1).unwrap();

        assert_eq!(weekly.get(0).unwrap().ts.date(), start);
        for bar in weekly.bars().iter().skip(1) {
            assert_eq!(bar.ts.date().weekday(), chrono::Weekday::Mon);
        }
    }

    #[test]
    fn aggregation_commutes_with_prefix_truncation() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        let daily = daily_frame(start, 20);
        let full = aggregate(&daily, Timeframe::D4).unwrap();

        // Truncating the dailies at a period boundary must reproduce the
        // prefix of the full aggregation.
        let truncated = aggregate(&daily.prefix(12), Timeframe::D4).unwrap();
        assert_eq!(truncated.bars(), &full.bars()[..truncated.len()]);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let daily = daily_frame(start, 30);
        assert_eq!(
            aggregate(&daily, Timeframe::D3).unwrap(),
            aggregate(&daily, Timeframe::D3).unwrap()
        );
    }

    #[test]
    fn too_few_source_bars_fail() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        let daily = daily_frame(start, 5);
        assert!(matches!(
            aggregate(&daily, Timeframe::D2),
            Err(AggregateError::InsufficientData { .. })
        ));
    }
}
