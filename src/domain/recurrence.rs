use chrono::{DateTime, Duration, Months, Utc};
use serde::Serialize;

use crate::domain::calendar::Recurrence;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Lazy, finite expansion of one stored event into the occurrences that
/// overlap `[window_start, window_end]`.
///
/// Each occurrence is computed from the original start, so monthly events
/// on the 31st land on the last day of shorter months without drifting.
/// Iteration stops at the first occurrence starting after the window or
/// after `recurrence_end`. The iterator holds no shared state, so calling
/// [`occurrences`] again always starts over.
#[derive(Debug, Clone)]
pub struct Occurrences {
    start: DateTime<Utc>,
    duration: Duration,
    recurrence: Recurrence,
    until: Option<DateTime<Utc>>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    index: u32,
    done: bool,
}

pub fn occurrences(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    recurrence: Recurrence,
    recurrence_end: Option<DateTime<Utc>>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Occurrences {
    Occurrences {
        start,
        duration: end - start,
        recurrence,
        until: recurrence_end,
        window_start,
        window_end,
        index: 0,
        done: window_end < window_start,
    }
}

impl Occurrences {
    fn nth_start(&self, n: u32) -> Option<DateTime<Utc>> {
        match self.recurrence {
            Recurrence::Never => (n == 0).then_some(self.start),
            Recurrence::Daily => self.start.checked_add_signed(Duration::days(n as i64)),
            Recurrence::Weekly => self.start.checked_add_signed(Duration::weeks(n as i64)),
            Recurrence::Monthly => self.start.checked_add_months(Months::new(n)),
            Recurrence::Yearly => n
                .checked_mul(12)
                .and_then(|months| self.start.checked_add_months(Months::new(months))),
        }
    }
}

impl Iterator for Occurrences {
    type Item = Occurrence;

    fn next(&mut self) -> Option<Occurrence> {
        while !self.done {
            let Some(start) = self.nth_start(self.index) else {
                self.done = true;
                break;
            };
            self.index += 1;

            let past_until = self.until.is_some_and(|until| start > until);
            if start > self.window_end || past_until {
                self.done = true;
                break;
            }

            let end = start + self.duration;
            if end >= self.window_start {
                return Some(Occurrence { start, end });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn single_event_inside_window() {
        let all: Vec<_> = occurrences(
            at(2024, 3, 4, 9),
            at(2024, 3, 4, 10),
            Recurrence::Never,
            None,
            at(2024, 3, 1, 0),
            at(2024, 3, 31, 0),
        )
        .collect();
        assert_eq!(all, vec![Occurrence { start: at(2024, 3, 4, 9), end: at(2024, 3, 4, 10) }]);
    }

    #[test]
    fn single_event_outside_window_yields_nothing() {
        let count = occurrences(
            at(2024, 5, 4, 9),
            at(2024, 5, 4, 10),
            Recurrence::Never,
            None,
            at(2024, 3, 1, 0),
            at(2024, 3, 31, 0),
        )
        .count();
        assert_eq!(count, 0);
    }

    #[test]
    fn weekly_is_bounded_by_recurrence_end() {
        let starts: Vec<_> = occurrences(
            at(2024, 9, 2, 8),
            at(2024, 9, 2, 9),
            Recurrence::Weekly,
            Some(at(2024, 9, 23, 8)),
            at(2024, 1, 1, 0),
            at(2025, 1, 1, 0),
        )
        .map(|o| o.start)
        .collect();
        assert_eq!(
            starts,
            vec![at(2024, 9, 2, 8), at(2024, 9, 9, 8), at(2024, 9, 16, 8), at(2024, 9, 23, 8)]
        );
    }

    #[test]
    fn daily_is_bounded_by_window() {
        let starts: Vec<_> = occurrences(
            at(2024, 9, 1, 8),
            at(2024, 9, 1, 9),
            Recurrence::Daily,
            None,
            at(2024, 9, 10, 0),
            at(2024, 9, 12, 23),
        )
        .map(|o| o.start)
        .collect();
        assert_eq!(starts, vec![at(2024, 9, 10, 8), at(2024, 9, 11, 8), at(2024, 9, 12, 8)]);
    }

    #[test]
    fn occurrence_overlapping_window_start_is_included() {
        let first = occurrences(
            at(2024, 9, 1, 22),
            at(2024, 9, 2, 2),
            Recurrence::Never,
            None,
            at(2024, 9, 2, 0),
            at(2024, 9, 3, 0),
        )
        .next();
        assert!(first.is_some());
    }

    #[test]
    fn monthly_clamps_to_month_end_without_drift() {
        let starts: Vec<_> = occurrences(
            at(2024, 1, 31, 12),
            at(2024, 1, 31, 13),
            Recurrence::Monthly,
            None,
            at(2024, 1, 1, 0),
            at(2024, 4, 30, 23),
        )
        .map(|o| o.start)
        .collect();
        assert_eq!(
            starts,
            vec![at(2024, 1, 31, 12), at(2024, 2, 29, 12), at(2024, 3, 31, 12), at(2024, 4, 30, 12)]
        );
    }

    #[test]
    fn yearly_keeps_duration() {
        let all: Vec<_> = occurrences(
            at(2022, 12, 24, 0),
            at(2022, 12, 26, 0),
            Recurrence::Yearly,
            Some(at(2030, 1, 1, 0)),
            at(2023, 1, 1, 0),
            at(2024, 12, 31, 0),
        )
        .collect();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].start, at(2024, 12, 24, 0));
        assert_eq!(all[1].end - all[1].start, Duration::days(2));
    }

    #[test]
    fn expansion_is_restartable() {
        let iter = occurrences(
            at(2024, 9, 1, 8),
            at(2024, 9, 1, 9),
            Recurrence::Daily,
            None,
            at(2024, 9, 1, 0),
            at(2024, 9, 5, 0),
        );
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn inverted_window_is_empty() {
        let count = occurrences(
            at(2024, 9, 1, 8),
            at(2024, 9, 1, 9),
            Recurrence::Daily,
            None,
            at(2024, 9, 5, 0),
            at(2024, 9, 1, 0),
        )
        .count();
        assert_eq!(count, 0);
    }
}
