//! Candle-close calendar and the long-running scheduler states
//!
//! Scans fire one minute after a candle closes. Derived timeframes close
//! on their anchored period boundaries, weekly candles on Monday
//! midnight, so the calendar math reuses the aggregation anchors.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::candles::aggregate::period_start;
use crate::models::Timeframe;

/// Scan trigger offset after the candle close.
const CLOSE_GRACE_MINUTES: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Idle,
    Scanning,
    CoolingDown,
}

/// Whether a timeframe has a candle closing today.
pub fn is_active_on(timeframe: Timeframe, today: NaiveDate) -> bool {
    match timeframe {
        Timeframe::H4 | Timeframe::D1 => true,
        Timeframe::W1 => today.weekday() == chrono::Weekday::Mon,
        tf => {
            let anchor = tf.anchor_date().expect("derived tf has an anchor");
            (today - anchor).num_days().rem_euclid(tf.daily_multiplier() as i64) == 0
        }
    }
}

/// Next scan instant (candle close + grace minute) strictly after `now`.
pub fn next_scan_time(timeframe: Timeframe, now: NaiveDateTime) -> NaiveDateTime {
    let grace = Duration::minutes(CLOSE_GRACE_MINUTES);
    match timeframe {
        Timeframe::H4 => {
            let boundary_hour = (now.hour() / 4) * 4;
            let mut next = now
                .date()
                .and_time(NaiveTime::from_hms_opt(boundary_hour, 0, 0).unwrap())
                + grace;
            while next <= now {
                next += Duration::hours(4);
            }
            next
        }
        Timeframe::D1 => {
            let mut next = now.date().and_time(NaiveTime::MIN) + grace;
            while next <= now {
                next += Duration::days(1);
            }
            next
        }
        Timeframe::W1 => {
            let monday = now.date()
                - Duration::days(now.date().weekday().num_days_from_monday() as i64);
            let mut next = monday.and_time(NaiveTime::MIN) + grace;
            while next <= now {
                next += Duration::weeks(1);
            }
            next
        }
        tf => {
            let span = Duration::days(tf.daily_multiplier() as i64);
            let start = period_start(tf, now.date());
            let mut next = start.and_time(NaiveTime::MIN) + grace;
            while next <= now {
                next += span;
            }
            next
        }
    }
}

/// Earliest upcoming scan instant across a set of timeframes.
pub fn next_tick(timeframes: &[Timeframe], now: NaiveDateTime) -> Option<NaiveDateTime> {
    timeframes
        .iter()
        .map(|&tf| next_scan_time(tf, now))
        .min()
}

/// Timeframes due at `instant` (within the one-minute trigger window).
pub fn due_timeframes(timeframes: &[Timeframe], now: NaiveDateTime) -> Vec<Timeframe> {
    timeframes
        .iter()
        .copied()
        .filter(|&tf| {
            let next = next_scan_time(tf, now - Duration::minutes(2));
            (next - now).num_seconds().abs() <= 60 && is_active_on(tf, next.date())
        })
        .collect()
}

/// Cooldown before the next calendar check: longer when the next boundary
/// is far away, never less than a minute, capped at 30 minutes.
pub fn cooldown_until(next: NaiveDateTime, now: NaiveDateTime) -> std::time::Duration {
    let seconds = (next - now).num_seconds() - 30;
    std::time::Duration::from_secs(seconds.clamp(60, 1800) as u64)
}

/// Scan priority when several timeframes land on the same tick.
pub fn tick_order(mut due: Vec<Timeframe>) -> Vec<Timeframe> {
    const ORDER: [Timeframe; 6] = [
        Timeframe::H4,
        Timeframe::D1,
        Timeframe::D2,
        Timeframe::D3,
        Timeframe::D4,
        Timeframe::W1,
    ];
    due.sort_by_key(|tf| ORDER.iter().position(|o| o == tf).unwrap_or(usize::MAX));
    due
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn daily_and_4h_are_always_active() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 21).unwrap();
        assert!(is_active_on(Timeframe::D1, day));
        assert!(is_active_on(Timeframe::H4, day));
    }

    #[test]
    fn weekly_only_on_monday() {
        // 2025-03-24 is a Monday.
        assert!(is_active_on(
            Timeframe::W1,
            NaiveDate::from_ymd_opt(2025, 3, 24).unwrap()
        ));
        assert!(!is_active_on(
            Timeframe::W1,
            NaiveDate::from_ymd_opt(2025, 3, 25).unwrap()
        ));
    }

    #[test]
    fn anchored_timeframes_follow_their_period() {
        // 2d anchored at 2025-03-20: active on the 20th, 22nd, 24th...
        assert!(is_active_on(Timeframe::D2, NaiveDate::from_ymd_opt(2025, 3, 20).unwrap()));
        assert!(!is_active_on(Timeframe::D2, NaiveDate::from_ymd_opt(2025, 3, 21).unwrap()));
        assert!(is_active_on(Timeframe::D2, NaiveDate::from_ymd_opt(2025, 3, 22).unwrap()));
        // 4d anchored at 2025-03-22.
        assert!(is_active_on(Timeframe::D4, NaiveDate::from_ymd_opt(2025, 3, 26).unwrap()));
        assert!(!is_active_on(Timeframe::D4, NaiveDate::from_ymd_opt(2025, 3, 25).unwrap()));
    }

    #[test]
    fn next_scan_time_lands_one_minute_after_close() {
        assert_eq!(
            next_scan_time(Timeframe::H4, dt(2025, 3, 20, 10, 30)),
            dt(2025, 3, 20, 12, 1)
        );
        assert_eq!(
            next_scan_time(Timeframe::D1, dt(2025, 3, 20, 10, 30)),
            dt(2025, 3, 21, 0, 1)
        );
        // Next 2d boundary after the 20th (anchor day) is the 22nd.
        assert_eq!(
            next_scan_time(Timeframe::D2, dt(2025, 3, 20, 10, 30)),
            dt(2025, 3, 22, 0, 1)
        );
        // Weekly: next Monday 00:01. 2025-03-20 is a Thursday.
        assert_eq!(
            next_scan_time(Timeframe::W1, dt(2025, 3, 20, 10, 30)),
            dt(2025, 3, 24, 0, 1)
        );
    }

    #[test]
    fn next_scan_time_is_strictly_future() {
        // Exactly at the trigger instant: schedule the following period.
        assert_eq!(
            next_scan_time(Timeframe::D1, dt(2025, 3, 21, 0, 1)),
            dt(2025, 3, 22, 0, 1)
        );
    }

    #[test]
    fn cooldown_bounds() {
        let now = dt(2025, 3, 20, 0, 0);
        // Far boundary: capped at 30 minutes.
        assert_eq!(
            cooldown_until(dt(2025, 3, 21, 0, 1), now),
            std::time::Duration::from_secs(1800)
        );
        // Imminent boundary: at least a minute.
        assert_eq!(
            cooldown_until(dt(2025, 3, 20, 0, 1), now),
            std::time::Duration::from_secs(60)
        );
    }

    #[test]
    fn tick_order_is_stable() {
        let due = vec![Timeframe::W1, Timeframe::D1, Timeframe::D3];
        assert_eq!(
            tick_order(due),
            vec![Timeframe::D1, Timeframe::D3, Timeframe::W1]
        );
    }
}
