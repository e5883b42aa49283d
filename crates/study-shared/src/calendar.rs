//! Month grid and day membership for the calendar view.
//! Weeks start on Sunday.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::{TopicSchedule, TopicWithSchedules};
use crate::ParseError;

/// Get month name
pub fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "Unknown",
    }
}

/// A calendar month, always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    first: NaiveDate,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|first| Self { first })
    }

    /// The month a date falls in.
    pub fn containing(date: NaiveDate) -> Self {
        Self {
            first: date - Days::new(u64::from(date.day0())),
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .first
            .pred_opt()
            .filter(|d| *d >= self.first)
            .unwrap_or(self.first)
    }

    pub fn next(&self) -> Self {
        self.first
            .checked_add_months(Months::new(1))
            .map(|first| Self { first })
            .unwrap_or(*self)
    }

    pub fn prev(&self) -> Self {
        self.first
            .checked_sub_months(Months::new(1))
            .map(|first| Self { first })
            .unwrap_or(*self)
    }

    /// e.g. "March 2024"
    pub fn name(&self) -> String {
        format!("{} {}", month_name(self.month()), self.year())
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Month(s.to_string());
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

impl TopicSchedule {
    /// Whether `day`, in time zone `tz`, falls inside this schedule.
    /// Both endpoints are inclusive and compared at day granularity; a
    /// reversed range is read as if its endpoints were swapped.
    pub fn covers<Tz: TimeZone>(&self, day: NaiveDate, tz: &Tz) -> bool {
        let start = self.start_date.with_timezone(tz).date_naive();
        let end = self.end_date.with_timezone(tz).date_naive();
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        lo <= day && day <= hi
    }
}

impl TopicWithSchedules {
    pub fn is_on<Tz: TimeZone>(&self, day: NaiveDate, tz: &Tz) -> bool {
        self.topic_schedules.iter().any(|s| s.covers(day, tz))
    }
}

/// Days shown for a month: whole weeks from the Sunday on or before the 1st
/// to the Saturday on or after the last day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonthGrid {
    month: YearMonth,
    start: NaiveDate,
    len: usize,
}

impl MonthGrid {
    pub fn new(month: YearMonth) -> Self {
        let first = month.first_day();
        let last = month.last_day();
        let lead = u64::from(first.weekday().num_days_from_sunday());
        let trail = 6 - u64::from(last.weekday().num_days_from_sunday());

        let start = first.checked_sub_days(Days::new(lead)).unwrap_or(first);
        let end = last.checked_add_days(Days::new(trail)).unwrap_or(last);
        let len = (end - start).num_days() as usize + 1;

        Self { month, start, len }
    }

    pub fn month(&self) -> YearMonth {
        self.month
    }

    pub fn days(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.len).collect()
    }

    /// Rows of seven days, Sunday first.
    pub fn weeks(&self) -> Vec<Vec<NaiveDate>> {
        self.days().chunks(7).map(|w| w.to_vec()).collect()
    }

    pub fn contains_in_month(&self, day: NaiveDate) -> bool {
        day.year() == self.month.year() && day.month() == self.month.month()
    }
}

#[derive(Debug, Clone)]
pub struct CalendarDay<'a> {
    pub date: NaiveDate,
    pub in_month: bool,
    pub topics: Vec<&'a TopicWithSchedules>,
}

/// The topics active on each grid day. Topic order within a day follows
/// the order of `topics`.
pub fn assign_topics<'a, Tz: TimeZone>(
    grid: &MonthGrid,
    topics: &[&'a TopicWithSchedules],
    tz: &Tz,
) -> Vec<CalendarDay<'a>> {
    grid.days()
        .into_iter()
        .map(|date| CalendarDay {
            date,
            in_month: grid.contains_in_month(date),
            topics: topics.iter().copied().filter(|t| t.is_on(date, tz)).collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone, Utc, Weekday};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule(start: &str, end: &str) -> TopicSchedule {
        TopicSchedule {
            id: "s".into(),
            topic_id: "t".into(),
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
        }
    }

    #[test]
    fn grid_spans_whole_weeks() {
        // March 2024 starts on a Friday and ends on a Sunday.
        let grid = MonthGrid::new(YearMonth::new(2024, 3).unwrap());
        let days = grid.days();
        assert_eq!(days.first().copied(), Some(date(2024, 2, 25)));
        assert_eq!(days.last().copied(), Some(date(2024, 4, 6)));
        assert_eq!(grid.weeks().len(), 6);
        assert!(grid.weeks().iter().all(|w| w.len() == 7));
        assert_eq!(days[0].weekday(), Weekday::Sun);
    }

    #[test]
    fn february_starting_on_sunday_fits_four_weeks() {
        let grid = MonthGrid::new(YearMonth::new(2015, 2).unwrap());
        assert_eq!(grid.weeks().len(), 4);
        assert!(grid.days().iter().all(|d| grid.contains_in_month(*d)));
    }

    #[test]
    fn month_navigation_wraps_years() {
        let dec = YearMonth::new(2023, 12).unwrap();
        assert_eq!(dec.next(), YearMonth::new(2024, 1).unwrap());
        assert_eq!(dec.next().prev(), dec);
        assert_eq!(dec.last_day(), date(2023, 12, 31));
        assert_eq!(YearMonth::new(2024, 2).unwrap().last_day(), date(2024, 2, 29));
        assert_eq!(YearMonth::containing(date(2024, 7, 19)).to_string(), "2024-07");
        assert_eq!(dec.name(), "December 2023");
    }

    #[test]
    fn parses_year_month() {
        assert_eq!("2024-03".parse::<YearMonth>().unwrap(), YearMonth::new(2024, 3).unwrap());
        assert!("2024-13".parse::<YearMonth>().is_err());
        assert!("March".parse::<YearMonth>().is_err());
    }

    #[test]
    fn same_instant_schedule_covers_its_day() {
        let s = schedule("2024-03-10T00:00:00Z", "2024-03-10T00:00:00Z");
        assert!(s.covers(date(2024, 3, 10), &Utc));
        assert!(!s.covers(date(2024, 3, 11), &Utc));
    }

    #[test]
    fn time_of_day_does_not_exclude_end_day() {
        let s = schedule("2024-03-10T18:30:00Z", "2024-03-12T06:00:00Z");
        assert!(s.covers(date(2024, 3, 10), &Utc));
        assert!(s.covers(date(2024, 3, 12), &Utc));
        assert!(!s.covers(date(2024, 3, 9), &Utc));
    }

    #[test]
    fn reversed_range_is_normalized() {
        let s = schedule("2024-03-12T00:00:00Z", "2024-03-10T00:00:00Z");
        assert!(s.covers(date(2024, 3, 11), &Utc));
    }

    #[test]
    fn days_are_taken_in_the_given_zone() {
        let s = schedule("2024-03-10T23:00:00Z", "2024-03-10T23:30:00Z");
        let seoul = FixedOffset::east_opt(9 * 3600).unwrap();
        assert!(s.covers(date(2024, 3, 11), &seoul));
        assert!(!s.covers(date(2024, 3, 10), &seoul));
        assert!(s.covers(date(2024, 3, 10), &Utc));
    }

    #[test]
    fn assigns_topics_per_day() {
        use crate::models::{Category, Topic, TopicStatus};

        let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let topic = TopicWithSchedules {
            topic: Topic {
                id: "t".into(),
                title: "Shaders".into(),
                description: None,
                category: Category::GameEngine,
                tags: vec![],
                status: TopicStatus::InProgress,
                created_by: "u".into(),
                created_at: at,
                updated_at: at,
            },
            topic_schedules: vec![schedule("2024-03-30T00:00:00Z", "2024-04-02T00:00:00Z")],
        };

        let grid = MonthGrid::new(YearMonth::new(2024, 3).unwrap());
        let days = assign_topics(&grid, &[&topic], &Utc);
        let active: Vec<(NaiveDate, bool)> = days
            .iter()
            .filter(|d| !d.topics.is_empty())
            .map(|d| (d.date, d.in_month))
            .collect();

        assert_eq!(
            active,
            vec![
                (date(2024, 3, 30), true),
                (date(2024, 3, 31), true),
                (date(2024, 4, 1), false),
                (date(2024, 4, 2), false),
            ]
        );
    }
}
