//! Session Filter: a stateless pure function deciding whether a candle period-start
//! falls inside the configured trading window. No internal state, no I/O: kept as a free
//! function rather than a struct because it has nothing to hold.

use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

/// Trading-window configuration: hour-of-day bounds in UTC plus the weekday set the market is
/// open. `start_hour == end_hour` means the window spans the full day.
#[derive(Debug, Clone, Copy)]
pub struct TradingWindow {
    pub start_hour_utc: u32,
    pub end_hour_utc: u32,
}

impl TradingWindow {
    /// True when `timestamp_ms` (UTC epoch millis) falls on a trading weekday and inside the
    /// configured hour window. Gold trades Sunday evening through Friday evening in practice;
    /// this system treats Saturday as the only excluded weekday and leaves the hour window to
    /// configuration so deployments can additionally trim the Friday-evening/Sunday-evening
    /// rollover hours.
    pub fn is_in_session(&self, timestamp_ms: i64) -> bool {
        let dt = match Utc.timestamp_millis_opt(timestamp_ms) {
            chrono::LocalResult::Single(dt) => dt,
            _ => return false,
        };

        if dt.weekday() == Weekday::Sat {
            return false;
        }

        let hour = dt.hour();
        if self.start_hour_utc == self.end_hour_utc {
            return true;
        }
        if self.start_hour_utc < self.end_hour_utc {
            hour >= self.start_hour_utc && hour < self.end_hour_utc
        } else {
            // window wraps midnight, e.g. 22:00 -> 06:00
            hour >= self.start_hour_utc || hour < self.end_hour_utc
        }
    }
}

/// Partitions `candles` into (in-session, out-of-session) without mutating either list's
/// relative order.
pub fn partition_by_session<T: Clone>(
    candles: &[T],
    timestamp_of: impl Fn(&T) -> i64,
    window: &TradingWindow,
) -> (Vec<T>, Vec<T>) {
    candles
        .iter()
        .cloned()
        .partition(|c| window.is_in_session(timestamp_of(c)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturday_is_always_out_of_session() {
        let window = TradingWindow {
            start_hour_utc: 0,
            end_hour_utc: 0,
        };
        // 2024-01-06 is a Saturday.
        let ts = Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap().timestamp_millis();
        assert!(!window.is_in_session(ts));
    }

    #[test]
    fn simple_window_bounds_are_inclusive_exclusive() {
        let window = TradingWindow {
            start_hour_utc: 8,
            end_hour_utc: 20,
        };
        let in_hours = Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap().timestamp_millis();
        let at_end = Utc.with_ymd_and_hms(2024, 1, 2, 20, 0, 0).unwrap().timestamp_millis();
        let before = Utc.with_ymd_and_hms(2024, 1, 2, 7, 59, 0).unwrap().timestamp_millis();
        assert!(window.is_in_session(in_hours));
        assert!(!window.is_in_session(at_end));
        assert!(!window.is_in_session(before));
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let window = TradingWindow {
            start_hour_utc: 22,
            end_hour_utc: 6,
        };
        let late = Utc.with_ymd_and_hms(2024, 1, 2, 23, 0, 0).unwrap().timestamp_millis();
        let early = Utc.with_ymd_and_hms(2024, 1, 3, 5, 0, 0).unwrap().timestamp_millis();
        let midday = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap().timestamp_millis();
        assert!(window.is_in_session(late));
        assert!(window.is_in_session(early));
        assert!(!window.is_in_session(midday));
    }
}
