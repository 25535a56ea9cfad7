//! Timezone and day-boundary calculus.
//!
//! Day boundaries are 00:00–23:59 in the user's local time. Each meal
//! stores a `local_date` computed once at save time from the user's
//! timezone at that moment; existing entries are never re-bucketed.

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::error::AppError;

/// Timezone mode string stored on the user row (IANA name).
pub const TZ_MODE_CITY: &str = "city";
/// Timezone mode string stored on the user row (fixed UTC offset).
pub const TZ_MODE_OFFSET: &str = "offset";

/// A user's timezone preference: a named IANA zone or a fixed UTC
/// offset in minutes. Exactly one mode is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TzPref {
    Named(Tz),
    Offset(FixedOffset),
}

impl TzPref {
    /// Build from the three user columns. An absent or malformed
    /// descriptor is a configuration error surfaced to the caller —
    /// never silently defaulted to UTC.
    pub fn from_user(
        mode: Option<&str>,
        name: Option<&str>,
        offset_minutes: Option<i32>,
    ) -> Result<Self, AppError> {
        match (mode, name, offset_minutes) {
            (Some(TZ_MODE_CITY), Some(name), _) => name
                .parse::<Tz>()
                .map(TzPref::Named)
                .map_err(|_| AppError::Validation(format!("unknown timezone name: {name}"))),
            (Some(TZ_MODE_OFFSET), _, Some(minutes)) => {
                if minutes.abs() >= 24 * 60 {
                    return Err(AppError::Validation(format!(
                        "timezone offset out of range: {minutes} minutes"
                    )));
                }
                FixedOffset::east_opt(minutes * 60)
                    .map(TzPref::Offset)
                    .ok_or_else(|| {
                        AppError::Validation(format!(
                            "timezone offset out of range: {minutes} minutes"
                        ))
                    })
            }
            _ => Err(AppError::Validation("timezone is not configured".into())),
        }
    }

    /// Calendar date of `instant` in this timezone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            TzPref::Named(tz) => instant.with_timezone(tz).date_naive(),
            TzPref::Offset(off) => instant.with_timezone(off).date_naive(),
        }
    }

    /// Today's date in this timezone.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.local_date(now)
    }
}

/// Monday–Sunday range containing `d` (ISO weeks, Monday first).
pub fn week_bounds(d: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = d - Days::new(u64::from(d.weekday().num_days_from_monday()));
    (monday, monday + Days::new(6))
}

/// The last `n` dates ending with `today`, newest first.
pub fn last_n_days(today: NaiveDate, n: u64) -> Vec<NaiveDate> {
    (0..n).map(|i| today - Days::new(i)).collect()
}

/// The 28 days ending on `today` as exactly 4 Mon–Sun blocks, newest
/// first: the week containing `today` plus the 3 preceding weeks.
///
/// Deliberately not a sliding `today - 27 ..= today` slice — grouping
/// that by weekday yields 4 or 5 partial blocks depending on the
/// weekday of `today`.
pub fn last_4_week_ranges(today: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let (current_monday, _) = week_bounds(today);
    (0..4)
        .map(|i| {
            let monday = current_monday - Days::new(7 * i);
            (monday, monday + Days::new(6))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Weekday};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn from_user_requires_a_descriptor() {
        assert!(matches!(
            TzPref::from_user(None, None, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            TzPref::from_user(Some("city"), None, None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            TzPref::from_user(Some("city"), Some("Atlantis/Nowhere"), None),
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            TzPref::from_user(Some("offset"), None, Some(48 * 60)),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn named_zone_resolves_local_date() {
        let pref = TzPref::from_user(Some("city"), Some("Asia/Tokyo"), None).unwrap();
        // 2024-06-01 16:30 UTC is 2024-06-02 01:30 in Tokyo (UTC+9).
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 16, 30, 0).unwrap();
        assert_eq!(pref.local_date(instant), date(2024, 6, 2));
    }

    #[test]
    fn offset_zone_resolves_local_date() {
        let pref = TzPref::from_user(Some("offset"), None, Some(-300)).unwrap();
        // 2024-06-02 02:00 UTC is 2024-06-01 21:00 at UTC-5.
        let instant = Utc.with_ymd_and_hms(2024, 6, 2, 2, 0, 0).unwrap();
        assert_eq!(pref.local_date(instant), date(2024, 6, 1));
    }

    #[test]
    fn midnight_transition_is_exact() {
        let pref = TzPref::from_user(Some("offset"), None, Some(120)).unwrap();
        // Local midnight at UTC+2 is 22:00 UTC.
        let before = Utc.with_ymd_and_hms(2024, 3, 10, 21, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 10, 22, 1, 0).unwrap();
        let d1 = pref.local_date(before);
        let d2 = pref.local_date(after);
        assert_eq!(d1, date(2024, 3, 10));
        assert_eq!(d2, date(2024, 3, 11));
        assert_eq!(d2, d1 + Days::new(1));
    }

    #[test]
    fn local_date_is_monotonic() {
        let pref = TzPref::from_user(Some("city"), Some("Europe/Berlin"), None).unwrap();
        let mut instant = Utc.with_ymd_and_hms(2024, 3, 30, 0, 0, 0).unwrap();
        let mut prev = pref.local_date(instant);
        // Step across a DST change in hourly increments.
        for _ in 0..72 {
            instant += chrono::Duration::hours(1);
            let next = pref.local_date(instant);
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn week_bounds_monday_first() {
        // 2024-06-19 is a Wednesday.
        let (mon, sun) = week_bounds(date(2024, 6, 19));
        assert_eq!(mon, date(2024, 6, 17));
        assert_eq!(sun, date(2024, 6, 23));
        assert_eq!(mon.weekday(), Weekday::Mon);
        assert_eq!(sun.weekday(), Weekday::Sun);

        // A Monday and a Sunday map to the same week as themselves.
        assert_eq!(week_bounds(date(2024, 6, 17)).0, date(2024, 6, 17));
        assert_eq!(week_bounds(date(2024, 6, 23)).1, date(2024, 6, 23));
    }

    #[test]
    fn last_n_days_descending() {
        let days = last_n_days(date(2024, 6, 19), 7);
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], date(2024, 6, 19));
        assert_eq!(days[6], date(2024, 6, 13));
        for pair in days.windows(2) {
            assert_eq!(pair[1] + Days::new(1), pair[0]);
        }
    }

    #[test]
    fn four_week_ranges_for_every_weekday() {
        // One date per weekday in June 2024: Mon 17 .. Sun 23.
        for day in 17..=23 {
            let today = date(2024, 6, day);
            let ranges = last_4_week_ranges(today);
            assert_eq!(ranges.len(), 4, "weekday {:?}", today.weekday());
            for (mon, sun) in &ranges {
                assert_eq!(mon.weekday(), Weekday::Mon);
                assert_eq!(sun.weekday(), Weekday::Sun);
                assert_eq!(*sun, *mon + Days::new(6));
            }
            // Newest week contains today; blocks are contiguous.
            assert!(ranges[0].0 <= today && today <= ranges[0].1);
            for pair in ranges.windows(2) {
                assert_eq!(pair[1].1 + Days::new(1), pair[0].0);
            }
        }
    }
}
