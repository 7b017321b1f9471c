use chrono::{Datelike, Days, Local, NaiveDate};
use serde::Serialize;

/// Length of a month block in days.
const BLOCK_DAYS: u32 = 7;

/// `end_date - start_date`; the reporting week covers six calendar days.
const WINDOW_SPAN_DAYS: u64 = 5;

/// A reporting week: a 6-day block aligned to the 1st of the month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WeekWindow {
    /// e.g. `2025_september_week_2nd`
    pub label: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl WeekWindow {
    /// Inclusive on both bounds.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    /// Epoch seconds at local midnight of `start_date`.
    pub fn start_timestamp(&self) -> Option<i64> {
        local_midnight_timestamp(self.start_date)
    }

    /// Epoch seconds at local midnight of `end_date`.
    pub fn end_timestamp(&self) -> Option<i64> {
        local_midnight_timestamp(self.end_date)
    }
}

/// Resolve the reporting week `weeks_back` weeks before `today`.
///
/// The month is cut into consecutive 7-day blocks starting on day 1; the
/// anchor's block decides the window. These are not ISO weeks, and the window
/// runs six days from the block start.
pub fn resolve_week(weeks_back: u32, today: NaiveDate) -> WeekWindow {
    let anchor = today
        .checked_sub_days(Days::new(u64::from(weeks_back) * u64::from(BLOCK_DAYS)))
        .unwrap_or(NaiveDate::MIN);

    let block = anchor.day0() / BLOCK_DAYS + 1;
    let start_date = anchor - Days::new(u64::from(anchor.day0() % BLOCK_DAYS));
    let end_date = start_date
        .checked_add_days(Days::new(WINDOW_SPAN_DAYS))
        .unwrap_or(start_date);

    let label = format!(
        "{}_{}_week_{}{}",
        anchor.year(),
        anchor.format("%B").to_string().to_lowercase(),
        block,
        ordinal_suffix(block),
    );

    WeekWindow {
        label,
        start_date,
        end_date,
    }
}

/// [`resolve_week`] against the local wall clock.
pub fn resolve_current_week(weeks_back: u32) -> WeekWindow {
    resolve_week(weeks_back, Local::now().date_naive())
}

pub fn ordinal_suffix(n: u32) -> &'static str {
    if (11..=13).contains(&(n % 100)) {
        return "th";
    }
    match n % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

fn local_midnight_timestamp(date: NaiveDate) -> Option<i64> {
    date.and_hms_opt(0, 0, 0)?
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn second_block_of_september() {
        let week = resolve_week(0, date(2025, 9, 10));
        assert_eq!(week.label, "2025_september_week_2nd");
        assert_eq!(week.start_date, date(2025, 9, 8));
        assert_eq!(week.end_date, date(2025, 9, 13));
    }

    #[test]
    fn block_boundaries() {
        assert_eq!(resolve_week(0, date(2025, 9, 7)).label, "2025_september_week_1st");
        assert_eq!(resolve_week(0, date(2025, 9, 8)).label, "2025_september_week_2nd");
        assert_eq!(resolve_week(0, date(2025, 9, 15)).label, "2025_september_week_3rd");
        assert_eq!(resolve_week(0, date(2025, 9, 22)).label, "2025_september_week_4th");
        let fifth = resolve_week(0, date(2025, 9, 30));
        assert_eq!(fifth.label, "2025_september_week_5th");
        assert_eq!(fifth.start_date, date(2025, 9, 29));
        // The window may spill into the next month.
        assert_eq!(fifth.end_date, date(2025, 10, 4));
    }

    #[test]
    fn weeks_back_crosses_month_and_year() {
        let week = resolve_week(1, date(2025, 9, 3));
        assert_eq!(week.label, "2025_august_week_4th");
        assert_eq!(week.start_date, date(2025, 8, 22));
        assert_eq!(week.end_date, date(2025, 8, 27));

        let week = resolve_week(2, date(2026, 1, 5));
        assert_eq!(week.label, "2025_december_week_4th");
        assert_eq!(week.start_date, date(2025, 12, 22));
    }

    #[test]
    fn window_is_inclusive() {
        let week = resolve_week(0, date(2025, 9, 10));
        assert!(week.contains(date(2025, 9, 8)));
        assert!(week.contains(date(2025, 9, 13)));
        assert!(!week.contains(date(2025, 9, 7)));
        assert!(!week.contains(date(2025, 9, 14)));
    }

    #[test]
    fn timestamps_are_one_day_apart_per_day() {
        let week = resolve_week(0, date(2025, 9, 10));
        let start = week.start_timestamp().unwrap();
        let end = week.end_timestamp().unwrap();
        // DST can shift the gap by an hour either way.
        let gap = end - start;
        assert!((5 * 86_400 - 3_600..=5 * 86_400 + 3_600).contains(&gap));
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal_suffix(1), "st");
        assert_eq!(ordinal_suffix(2), "nd");
        assert_eq!(ordinal_suffix(3), "rd");
        assert_eq!(ordinal_suffix(4), "th");
        assert_eq!(ordinal_suffix(11), "th");
        assert_eq!(ordinal_suffix(12), "th");
        assert_eq!(ordinal_suffix(13), "th");
        assert_eq!(ordinal_suffix(21), "st");
        assert_eq!(ordinal_suffix(112), "th");
    }

    #[test]
    fn serializes_dates_as_iso_strings() {
        let week = resolve_week(0, date(2025, 9, 10));
        let json = serde_json::to_value(&week).unwrap();
        assert_eq!(json["start_date"], "2025-09-08");
        assert_eq!(json["end_date"], "2025-09-13");
    }
}
