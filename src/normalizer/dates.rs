//! Date parsing and date-pattern scanning for model output.
//!
//! Relative forms (weekdays, "tomorrow", month/day without a year) need a
//! reference instant and resolve to nothing without one. Date-only values
//! resolve to 23:59:59 UTC of that day.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc, Weekday};
use regex::{Captures, Regex};

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})(?:[T ](\d{2}):(\d{2})(?::(\d{2}))?)?").unwrap()
});

static US_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").unwrap());

static MONTH_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s+(\d{4})\b)?",
    )
    .unwrap()
});

static DAY_MONTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2})(?:st|nd|rd|th)?\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?(?:,?\s+(\d{4})\b)?",
    )
    .unwrap()
});

static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:(next)\s+|this\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .unwrap()
});

static RELATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|tonight|tomorrow|eod|end of (?:the )?day)\b").unwrap()
});

const NULL_WORDS: &[&str] = &["", "null", "none", "n/a", "na", "no deadline", "unknown", "tbd"];

/// A date found inside free text.
#[derive(Debug, Clone, PartialEq)]
pub struct DateMatch {
    pub at: DateTime<Utc>,
    /// Byte range of the matched phrase.
    pub span: Range<usize>,
}

/// Resolves date strings against an optional reference instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateResolver {
    reference: Option<DateTime<Utc>>,
}

impl DateResolver {
    pub fn new(reference: Option<DateTime<Utc>>) -> Self {
        Self { reference }
    }

    /// Parse a whole value (e.g. a JSON `due` field).
    pub fn parse(&self, value: &str) -> Option<DateTime<Utc>> {
        let value = value.trim();
        if NULL_WORDS.contains(&value.to_ascii_lowercase().as_str()) {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }
        for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
                return Some(naive.and_utc());
            }
        }
        for fmt in ["%Y-%m-%d", "%m/%d/%Y", "%B %d, %Y", "%B %d %Y", "%d %B %Y", "%b %d, %Y", "%b %d %Y", "%d %b %Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
                return end_of_day(date);
            }
        }

        self.scan(value).map(|m| m.at)
    }

    /// Find the earliest resolvable date phrase in `text`.
    pub fn scan(&self, text: &str) -> Option<DateMatch> {
        let mut best: Option<DateMatch> = None;
        let mut consider = |found: Option<DateMatch>| {
            if let Some(found) = found
                && best.as_ref().is_none_or(|b| found.span.start < b.span.start)
            {
                best = Some(found);
            }
        };

        consider(first_resolved(&ISO_DATE, text, |c| resolve_iso(c)));
        consider(first_resolved(&US_DATE, text, |c| {
            let month = c[1].parse().ok()?;
            let day = c[2].parse().ok()?;
            let year = c[3].parse().ok()?;
            end_of_day(NaiveDate::from_ymd_opt(year, month, day)?)
        }));
        consider(first_resolved(&MONTH_DAY, text, |c| {
            self.resolve_month_day(month_number(&c[1])?, c[2].parse().ok()?, c.get(3).map(|m| m.as_str()))
        }));
        consider(first_resolved(&DAY_MONTH, text, |c| {
            self.resolve_month_day(month_number(&c[2])?, c[1].parse().ok()?, c.get(3).map(|m| m.as_str()))
        }));
        consider(first_resolved(&WEEKDAY, text, |c| {
            self.resolve_weekday(parse_weekday(&c[2])?, c.get(1).is_some())
        }));
        consider(first_resolved(&RELATIVE, text, |c| {
            let reference = self.reference?;
            let offset = if c[1].eq_ignore_ascii_case("tomorrow") { 1 } else { 0 };
            end_of_day(reference.date_naive() + Duration::days(offset))
        }));

        best
    }

    fn resolve_month_day(&self, month: u32, day: u32, year: Option<&str>) -> Option<DateTime<Utc>> {
        if let Some(year) = year {
            return end_of_day(NaiveDate::from_ymd_opt(year.parse().ok()?, month, day)?);
        }
        let reference = self.reference?;
        let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
        if this_year >= reference.date_naive() {
            end_of_day(this_year)
        } else {
            end_of_day(NaiveDate::from_ymd_opt(reference.year() + 1, month, day)?)
        }
    }

    /// Next occurrence on or after the reference date; strictly after with "next".
    fn resolve_weekday(&self, target: Weekday, next: bool) -> Option<DateTime<Utc>> {
        let today = self.reference?.date_naive();
        let from = today.weekday().num_days_from_monday() as i64;
        let to = target.num_days_from_monday() as i64;
        let mut ahead = (to - from).rem_euclid(7);
        if next && ahead == 0 {
            ahead = 7;
        }
        end_of_day(today + Duration::days(ahead))
    }
}

fn first_resolved(
    re: &Regex,
    text: &str,
    resolve: impl Fn(&Captures<'_>) -> Option<DateTime<Utc>>,
) -> Option<DateMatch> {
    re.captures_iter(text).find_map(|caps| {
        let whole = caps.get(0)?;
        resolve(&caps).map(|at| DateMatch {
            at,
            span: whole.range(),
        })
    })
}

fn resolve_iso(c: &Captures<'_>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?)?;
    match (c.get(4), c.get(5)) {
        (Some(h), Some(m)) => {
            let s = c.get(6).map_or(Some(0), |s| s.as_str().parse().ok())?;
            Some(date.and_hms_opt(h.as_str().parse().ok()?, m.as_str().parse().ok()?, s)?.and_utc())
        }
        _ => end_of_day(date),
    }
}

fn end_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc())
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_ascii_lowercase().get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    name.parse::<Weekday>().ok()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    /// Wednesday, 2025-03-05 10:00 UTC.
    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap()
    }

    fn eod(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 23, 59, 59).unwrap()
    }

    #[test]
    fn parses_absolute_formats() {
        let r = DateResolver::default();
        assert_eq!(
            r.parse("2025-03-07T17:00:00Z"),
            Some(Utc.with_ymd_and_hms(2025, 3, 7, 17, 0, 0).unwrap())
        );
        assert_eq!(
            r.parse("2025-03-07 09:30"),
            Some(Utc.with_ymd_and_hms(2025, 3, 7, 9, 30, 0).unwrap())
        );
        assert_eq!(r.parse("2025-03-07"), Some(eod(2025, 3, 7)));
        assert_eq!(r.parse("03/07/2025"), Some(eod(2025, 3, 7)));
        assert_eq!(r.parse("March 7, 2025"), Some(eod(2025, 3, 7)));
        assert_eq!(r.parse("7 Mar 2025"), Some(eod(2025, 3, 7)));
    }

    #[test]
    fn null_words_are_absent() {
        let r = DateResolver::new(Some(wednesday()));
        assert_eq!(r.parse("null"), None);
        assert_eq!(r.parse("N/A"), None);
        assert_eq!(r.parse(""), None);
        assert_eq!(r.parse("sometime soon"), None);
    }

    #[test]
    fn weekdays_resolve_against_reference() {
        let r = DateResolver::new(Some(wednesday()));
        assert_eq!(r.parse("Friday"), Some(eod(2025, 3, 7)));
        assert_eq!(r.parse("Friday EOD"), Some(eod(2025, 3, 7)));
        assert_eq!(r.parse("Wednesday"), Some(eod(2025, 3, 5)));
        assert_eq!(r.parse("next Wednesday"), Some(eod(2025, 3, 12)));
        assert_eq!(r.parse("Monday"), Some(eod(2025, 3, 10)));
    }

    #[test]
    fn relative_words() {
        let r = DateResolver::new(Some(wednesday()));
        assert_eq!(r.parse("tomorrow"), Some(eod(2025, 3, 6)));
        assert_eq!(r.parse("EOD"), Some(eod(2025, 3, 5)));
    }

    #[test]
    fn relative_forms_need_reference() {
        let r = DateResolver::default();
        assert_eq!(r.parse("Friday"), None);
        assert_eq!(r.parse("March 7"), None);
    }

    #[test]
    fn month_day_without_year_rolls_forward() {
        let r = DateResolver::new(Some(wednesday()));
        assert_eq!(r.parse("March 7"), Some(eod(2025, 3, 7)));
        assert_eq!(r.parse("Jan 2"), Some(eod(2026, 1, 2)));
    }

    #[test]
    fn scan_finds_earliest_phrase() {
        let r = DateResolver::new(Some(wednesday()));
        let text = "Please send the report by Friday EOD, then review on 2025-03-20.";
        let found = r.scan(text).unwrap();
        assert_eq!(found.at, eod(2025, 3, 7));
        assert_eq!(&text[found.span.clone()], "Friday");
    }

    #[test]
    fn scan_without_dates() {
        let r = DateResolver::new(Some(wednesday()));
        assert!(r.scan("No deadline mentioned here.").is_none());
        assert!(r.scan("We may 2x the budget").is_none());
    }

    #[test]
    fn invalid_calendar_dates_are_skipped() {
        let r = DateResolver::default();
        assert_eq!(r.parse("2025-02-30"), None);
    }
}
