//! Business-day date math shared by every evaluator.
//!
//! Weekend-only calendar: Saturdays and Sundays are skipped, there is no
//! holiday table. Everything here is a pure function; "now" always arrives
//! as a parameter so evaluations stay reproducible.

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// True for Monday through Friday.
pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Count business days from `start` to `end`.
///
/// Counts the weekdays strictly after `start` up to and including `end`, so
/// `business_days_between(d, d) == 0` and Friday → Monday is 1. Signed:
/// negative when `end` is before `start` (used for overdue commitments).
pub fn business_days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    if end < start {
        return -business_days_between(end, start);
    }

    let mut days = 0;
    let mut cursor = start;
    while cursor < end {
        cursor += Duration::days(1);
        if is_business_day(cursor) {
            days += 1;
        }
    }
    days
}

/// Step `n` business days forward from `start`.
///
/// The start date itself is not counted: adding 5 business days to a Monday
/// lands on the following Monday.
pub fn add_business_days(start: NaiveDate, n: u32) -> NaiveDate {
    let mut cursor = start;
    let mut remaining = n;
    while remaining > 0 {
        cursor += Duration::days(1);
        if is_business_day(cursor) {
            remaining -= 1;
        }
    }
    cursor
}

/// First and last day of a calendar quarter (Q1 = Jan–Mar).
///
/// The quarter number must be 1–4; anything else is a programmer error and
/// panics rather than returning a recoverable error.
pub fn quarter_bounds(year: i32, quarter: u32) -> (NaiveDate, NaiveDate) {
    assert!(
        (1..=4).contains(&quarter),
        "quarter must be 1-4, got {quarter}"
    );

    let start_month = (quarter - 1) * 3 + 1;
    let start = NaiveDate::from_ymd_opt(year, start_month, 1).expect("quarter start is valid");
    let next_quarter_start = if quarter == 4 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, start_month + 3, 1)
    }
    .expect("quarter end is valid");

    (start, next_quarter_start - Duration::days(1))
}

/// Bounds of the quarter containing `date`.
pub fn current_quarter_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let quarter = (date.month() - 1) / 3 + 1;
    quarter_bounds(date.year(), quarter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_same_day_is_zero() {
        assert_eq!(business_days_between(d(2026, 8, 5), d(2026, 8, 5)), 0);
    }

    #[test]
    fn test_weekdays_count() {
        // Mon 2026-08-03 → Fri 2026-08-07
        assert_eq!(business_days_between(d(2026, 8, 3), d(2026, 8, 7)), 4);
    }

    #[test]
    fn test_weekend_skipped() {
        // Fri 2026-08-07 → Mon 2026-08-10
        assert_eq!(business_days_between(d(2026, 8, 7), d(2026, 8, 10)), 1);
    }

    #[test]
    fn test_full_week_is_five() {
        // Mon → next Mon
        assert_eq!(business_days_between(d(2026, 8, 3), d(2026, 8, 10)), 5);
    }

    #[test]
    fn test_signed_when_reversed() {
        assert_eq!(business_days_between(d(2026, 8, 10), d(2026, 8, 7)), -1);
    }

    #[test]
    fn test_non_negative_forward() {
        // Sat → Sun spans no business days
        assert_eq!(business_days_between(d(2026, 8, 8), d(2026, 8, 9)), 0);
    }

    #[test]
    fn test_add_business_days_over_weekend() {
        // Thu + 2 business days = Mon
        assert_eq!(add_business_days(d(2026, 8, 6), 2), d(2026, 8, 10));
    }

    #[test]
    fn test_add_business_days_full_week() {
        // Mon + 5 business days = next Mon
        assert_eq!(add_business_days(d(2026, 8, 3), 5), d(2026, 8, 10));
    }

    #[test]
    fn test_add_zero_is_identity() {
        assert_eq!(add_business_days(d(2026, 8, 8), 0), d(2026, 8, 8));
    }

    #[test]
    fn test_quarter_bounds() {
        assert_eq!(quarter_bounds(2026, 1), (d(2026, 1, 1), d(2026, 3, 31)));
        assert_eq!(quarter_bounds(2026, 2), (d(2026, 4, 1), d(2026, 6, 30)));
        assert_eq!(quarter_bounds(2026, 3), (d(2026, 7, 1), d(2026, 9, 30)));
        assert_eq!(quarter_bounds(2026, 4), (d(2026, 10, 1), d(2026, 12, 31)));
    }

    #[test]
    #[should_panic(expected = "quarter must be 1-4")]
    fn test_quarter_bounds_rejects_invalid() {
        quarter_bounds(2026, 5);
    }

    #[test]
    fn test_current_quarter_bounds() {
        assert_eq!(
            current_quarter_bounds(d(2026, 8, 7)),
            (d(2026, 7, 1), d(2026, 9, 30))
        );
        assert_eq!(
            current_quarter_bounds(d(2026, 12, 31)),
            (d(2026, 10, 1), d(2026, 12, 31))
        );
    }
}
