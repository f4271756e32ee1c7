//! Weekly pattern → dated one-hour windows.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Weekday};

use crate::limits::SLOT_LENGTH_MS;
use crate::model::{Ms, Span};

/// Hour and minute of `at`; seconds and below are dropped.
pub fn time_of_day(at: &DateTime<FixedOffset>) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(at.hour(), at.minute(), 0)
}

/// `date` at `time` on the wall clock of `offset`, as Unix ms.
fn wall_clock_ms(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> Ms {
    let local_as_utc = date.and_time(time).and_utc().timestamp_millis();
    local_as_utc - i64::from(offset.local_minus_utc()) * 1000
}

/// Expand a weekly window into one-hour spans.
///
/// Walks every calendar day from `start`'s date through `end`'s date
/// (inclusive). On days that fall on `weekday`, emits back-to-back one-hour
/// spans from `start`'s time-of-day, stopping before any span would run past
/// `end`'s time-of-day. A trailing partial hour is dropped.
///
/// Calendar days and times-of-day are read in `start`'s UTC offset.
pub fn expand_weekly(
    weekday: Weekday,
    start: &DateTime<FixedOffset>,
    end: &DateTime<FixedOffset>,
) -> Vec<Span> {
    let offset = *start.offset();
    let end = end.with_timezone(&offset);
    let (Some(open), Some(close)) = (time_of_day(start), time_of_day(&end)) else {
        return Vec::new();
    };

    let mut spans = Vec::new();
    let last_day = end.date_naive();
    let mut day = start.date_naive();
    while day <= last_day {
        if day.weekday() == weekday {
            let day_end = wall_clock_ms(day, close, offset);
            let mut slot_start = wall_clock_ms(day, open, offset);
            while slot_start + SLOT_LENGTH_MS <= day_end {
                spans.push(Span::new(slot_start, slot_start + SLOT_LENGTH_MS));
                slot_start += SLOT_LENGTH_MS;
            }
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(s).unwrap()
    }

    fn hhmm(ms: Ms, offset: &DateTime<FixedOffset>) -> String {
        DateTime::from_timestamp_millis(ms)
            .unwrap()
            .with_timezone(offset.offset())
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    #[test]
    fn two_tuesdays_two_hours_each() {
        // 2025-06-01 is a Sunday; the window holds Tuesdays 06-03 and 06-10.
        let start = at("2025-06-01T09:00:00Z");
        let end = at("2025-06-14T11:00:00Z");
        let spans = expand_weekly(Weekday::Tue, &start, &end);

        let labels: Vec<String> = spans.iter().map(|s| hhmm(s.start, &start)).collect();
        assert_eq!(
            labels,
            vec![
                "2025-06-03 09:00",
                "2025-06-03 10:00",
                "2025-06-10 09:00",
                "2025-06-10 10:00",
            ]
        );
        assert!(spans.iter().all(|s| s.duration_ms() == SLOT_LENGTH_MS));
    }

    #[test]
    fn partial_hour_window_yields_nothing() {
        let start = at("2025-06-03T09:00:00Z");
        let end = at("2025-06-10T09:45:00Z");
        assert!(expand_weekly(Weekday::Tue, &start, &end).is_empty());
    }

    #[test]
    fn trailing_partial_hour_is_dropped() {
        let start = at("2025-06-03T09:00:00Z");
        let end = at("2025-06-03T11:30:00Z");
        let spans = expand_weekly(Weekday::Tue, &start, &end);
        assert_eq!(spans.len(), 2);
        assert_eq!(hhmm(spans[1].end, &start), "2025-06-03 11:00");
    }

    #[test]
    fn end_date_is_inclusive() {
        // Range ends on a Tuesday at the close of the window.
        let start = at("2025-06-04T09:00:00Z");
        let end = at("2025-06-10T10:00:00Z");
        let spans = expand_weekly(Weekday::Tue, &start, &end);
        assert_eq!(spans.len(), 1);
        assert_eq!(hhmm(spans[0].start, &start), "2025-06-10 09:00");
    }

    #[test]
    fn no_matching_weekday_in_range() {
        let start = at("2025-06-04T09:00:00Z"); // Wednesday
        let end = at("2025-06-08T17:00:00Z"); // Sunday
        assert!(expand_weekly(Weekday::Mon, &start, &end).is_empty());
    }

    #[test]
    fn offset_controls_calendar_day() {
        // 09:00-11:00 at -05:00 on Tuesdays is 14:00-16:00 UTC.
        let start = at("2025-06-01T09:00:00-05:00");
        let end = at("2025-06-07T11:00:00-05:00");
        let spans = expand_weekly(Weekday::Tue, &start, &end);
        assert_eq!(spans.len(), 2);
        let utc = at("2025-06-03T14:00:00Z");
        assert_eq!(spans[0].start, utc.timestamp_millis());
        assert_eq!(hhmm(spans[1].end, &start), "2025-06-03 11:00");
    }

    #[test]
    fn seconds_are_ignored() {
        let start = at("2025-06-03T09:00:59Z");
        let end = at("2025-06-03T10:00:00Z");
        let spans = expand_weekly(Weekday::Tue, &start, &end);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].start, at("2025-06-03T09:00:00Z").timestamp_millis());
    }
}
