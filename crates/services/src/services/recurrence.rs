//! Calendar arithmetic for schedule occurrences.
//!
//! Occurrences are always computed from the schedule's start date, never by
//! stepping from the previous occurrence, so a Jan 31 monthly schedule runs
//! Jan 31, Feb 29, Mar 31 rather than drifting to the 29th.

use chrono::{Datelike, Duration, Months, NaiveDate};
use db::models::toolbox_talk_schedule::ScheduleFrequency;

/// The `n`th occurrence (0-based) of a schedule anchored at `start`.
/// Month arithmetic clamps to the last day of the target month.
pub fn nth_occurrence(frequency: ScheduleFrequency, start: NaiveDate, n: u32) -> Option<NaiveDate> {
    match frequency {
        ScheduleFrequency::Once => (n == 0).then_some(start),
        ScheduleFrequency::Weekly => start.checked_add_signed(Duration::weeks(i64::from(n))),
        ScheduleFrequency::Monthly => start.checked_add_months(Months::new(n)),
        ScheduleFrequency::Annually => n
            .checked_mul(12)
            .and_then(|months| start.checked_add_months(Months::new(months))),
    }
}

/// First occurrence strictly after `after`, ignoring any end date.
pub fn next_after(frequency: ScheduleFrequency, start: NaiveDate, after: NaiveDate) -> Option<NaiveDate> {
    if after < start {
        return Some(start);
    }

    // Lower bound on the index, then walk forward past clamped months.
    let mut n = match frequency {
        ScheduleFrequency::Once => return None,
        ScheduleFrequency::Weekly => ((after - start).num_days() / 7) as u32,
        ScheduleFrequency::Monthly => months_between(start, after),
        ScheduleFrequency::Annually => (after.year() - start.year()).max(0) as u32,
    };

    loop {
        let candidate = nth_occurrence(frequency, start, n)?;
        if candidate > after {
            return Some(candidate);
        }
        n = n.checked_add(1)?;
    }
}

/// Occurrence following `current`, or `None` once the schedule is exhausted
/// by its frequency or its end date.
pub fn following(
    frequency: ScheduleFrequency,
    start: NaiveDate,
    end_date: Option<NaiveDate>,
    current: NaiveDate,
) -> Option<NaiveDate> {
    next_after(frequency, start, current).filter(|next| end_date.is_none_or(|end| *next <= end))
}

/// Every occurrence from `next_run` through `as_of` inclusive, bounded by
/// `end_date`. Used for catch-up after missed runs.
pub fn due_occurrences(
    frequency: ScheduleFrequency,
    start: NaiveDate,
    end_date: Option<NaiveDate>,
    next_run: NaiveDate,
    as_of: NaiveDate,
) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let mut current = Some(next_run);
    while let Some(date) = current {
        if date > as_of || end_date.is_some_and(|end| date > end) {
            break;
        }
        dates.push(date);
        current = following(frequency, start, end_date, date);
    }
    dates
}

fn months_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    months.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn weekly_steps_seven_days() {
        let start = date(2024, 1, 1);
        let dates = due_occurrences(ScheduleFrequency::Weekly, start, None, start, date(2024, 1, 20));
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 1, 8), date(2024, 1, 15)]);
        assert_eq!(
            following(ScheduleFrequency::Weekly, start, None, date(2024, 1, 15)),
            Some(date(2024, 1, 22))
        );
    }

    #[test]
    fn once_fires_exactly_once() {
        let start = date(2024, 5, 10);
        let dates = due_occurrences(ScheduleFrequency::Once, start, None, start, date(2030, 1, 1));
        assert_eq!(dates, vec![start]);
        assert_eq!(following(ScheduleFrequency::Once, start, None, start), None);
    }

    #[test]
    fn monthly_catch_up_stops_at_as_of() {
        let start = date(2024, 1, 1);
        let dates = due_occurrences(ScheduleFrequency::Monthly, start, None, start, date(2024, 3, 15));
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 2, 1), date(2024, 3, 1)]);
        assert_eq!(
            following(ScheduleFrequency::Monthly, start, None, date(2024, 3, 1)),
            Some(date(2024, 4, 1))
        );
    }

    #[test]
    fn month_end_clamps_without_drifting() {
        let start = date(2024, 1, 31);
        let dates = due_occurrences(ScheduleFrequency::Monthly, start, None, start, date(2024, 4, 30));
        assert_eq!(
            dates,
            vec![date(2024, 1, 31), date(2024, 2, 29), date(2024, 3, 31), date(2024, 4, 30)]
        );
    }

    #[test]
    fn annual_leap_day_clamps() {
        let start = date(2024, 2, 29);
        assert_eq!(
            following(ScheduleFrequency::Annually, start, None, start),
            Some(date(2025, 2, 28))
        );
        assert_eq!(
            nth_occurrence(ScheduleFrequency::Annually, start, 4),
            Some(date(2028, 2, 29))
        );
    }

    #[test]
    fn end_date_exhausts_the_schedule() {
        let start = date(2024, 1, 1);
        let end = Some(date(2024, 1, 10));
        assert_eq!(
            following(ScheduleFrequency::Weekly, start, end, date(2024, 1, 8)),
            None
        );
        let dates = due_occurrences(ScheduleFrequency::Weekly, start, end, start, date(2024, 2, 1));
        assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 1, 8)]);
    }
}
