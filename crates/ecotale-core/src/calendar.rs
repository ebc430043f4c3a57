//! Calendar-day arithmetic.
//!
//! A "day" is a local calendar date under a fixed UTC offset. Daily tasks
//! expire at the next local midnight, streaks compare local dates, and the
//! daily-record milestone sums entries that share a local date.

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Calendar {
    /// Calendar whose days start at midnight UTC.
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Calendar at a fixed offset from UTC, in minutes east.
    ///
    /// Offsets outside +/-24h fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        match FixedOffset::east_opt(minutes.saturating_mul(60)) {
            Some(offset) => Self { offset },
            None => Self::utc(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local date the instant falls on.
    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// Instant of local midnight at the start of `day`.
    ///
    /// Saturates at the representable range at the ends of the calendar.
    pub fn start_of_day(&self, day: NaiveDate) -> DateTime<Utc> {
        let local_midnight = day.and_time(NaiveTime::MIN);
        let shift = Duration::seconds(i64::from(self.offset.local_minus_utc()));
        match local_midnight.checked_sub_signed(shift) {
            Some(instant) => Utc.from_utc_datetime(&instant),
            None if shift > Duration::zero() => DateTime::<Utc>::MIN_UTC,
            None => DateTime::<Utc>::MAX_UTC,
        }
    }

    /// First local midnight strictly after `at`.
    pub fn next_midnight(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        self.midnight_after_days(at, 1)
    }

    /// Local midnight `days` calendar days after the day of `at`.
    ///
    /// Spans past the end of the calendar stop at its last day.
    pub fn midnight_after_days(&self, at: DateTime<Utc>, days: i64) -> DateTime<Utc> {
        let day = self.day_of(at);
        let step = Days::new(days.unsigned_abs());
        let shifted = if days >= 0 {
            day.checked_add_days(step).unwrap_or(NaiveDate::MAX)
        } else {
            day.checked_sub_days(step).unwrap_or(NaiveDate::MIN)
        };
        self.start_of_day(shifted)
    }

    /// The day before `day`.
    pub fn previous_day(day: NaiveDate) -> NaiveDate {
        day.pred_opt().unwrap_or(day)
    }

    /// Day a deadline at local midnight belongs to, i.e. the day before the
    /// instant itself for an exact midnight.
    pub fn day_ending_at(&self, deadline: DateTime<Utc>) -> NaiveDate {
        let just_before = deadline
            .checked_sub_signed(Duration::nanoseconds(1))
            .unwrap_or(deadline);
        self.day_of(just_before)
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn next_midnight_in_utc() {
        let cal = Calendar::utc();
        assert_eq!(cal.next_midnight(utc(2024, 1, 2, 15, 30)), utc(2024, 1, 3, 0, 0));
        // Exactly midnight rolls to the following one.
        assert_eq!(cal.next_midnight(utc(2024, 1, 2, 0, 0)), utc(2024, 1, 3, 0, 0));
    }

    #[test]
    fn offset_shifts_the_day_boundary() {
        // UTC+9: 2024-01-02 20:00 UTC is already Jan 3 locally.
        let cal = Calendar::with_offset_minutes(9 * 60);
        let at = utc(2024, 1, 2, 20, 0);
        assert_eq!(cal.day_of(at), NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        // Next local midnight is Jan 4 00:00 +09:00 == Jan 3 15:00 UTC.
        assert_eq!(cal.next_midnight(at), utc(2024, 1, 3, 15, 0));
    }

    #[test]
    fn day_ending_at_midnight_is_previous_day() {
        let cal = Calendar::utc();
        assert_eq!(
            cal.day_ending_at(utc(2024, 1, 3, 0, 0)),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[test]
    fn weekly_deadline_is_normalized_to_midnight() {
        let cal = Calendar::utc();
        assert_eq!(cal.midnight_after_days(utc(2024, 1, 2, 9, 45), 7), utc(2024, 1, 9, 0, 0));
    }

    #[test]
    fn huge_spans_saturate_instead_of_overflowing() {
        let cal = Calendar::with_offset_minutes(-5 * 60);
        let at = utc(2024, 1, 2, 9, 45);
        let far = cal.midnight_after_days(at, i64::from(u32::MAX));
        assert!(far > at);
        assert_eq!(cal.day_of(far), NaiveDate::MAX);
        assert_eq!(cal.day_of(cal.midnight_after_days(at, i64::MIN)), NaiveDate::MIN);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        assert_eq!(Calendar::with_offset_minutes(100 * 60), Calendar::utc());
    }
}
