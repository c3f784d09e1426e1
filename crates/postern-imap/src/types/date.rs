//! IMAP `date` and `date-time` forms.

use chrono::{DateTime, FixedOffset, NaiveDate};

const DATE_TIME_FORMAT: &str = "%d-%b-%Y %H:%M:%S %z";
const DATE_FORMAT: &str = "%d-%b-%Y";

/// Formats an internal date, e.g. `17-Jul-1996 02:44:25 -0700`.
#[must_use]
pub fn format_date_time(date: &DateTime<FixedOffset>) -> String {
    date.format(DATE_TIME_FORMAT).to_string()
}

/// Parses a `date-time`, accepting a space-padded day.
#[must_use]
pub fn parse_date_time(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(s.trim_start(), DATE_TIME_FORMAT).ok()
}

/// Parses a SEARCH `date`, e.g. `1-Feb-1994`.
#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).ok()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn date_time_round_trip() {
        let date = parse_date_time("17-Jul-1996 02:44:25 -0700").unwrap();
        assert_eq!(format_date_time(&date), "17-Jul-1996 02:44:25 -0700");
    }

    #[test]
    fn space_padded_day() {
        let date = parse_date_time(" 7-Feb-1994 21:52:25 +0000").unwrap();
        assert_eq!(format_date_time(&date), "07-Feb-1994 21:52:25 +0000");
    }

    #[test]
    fn search_dates() {
        assert_eq!(parse_date("1-Feb-1994"), NaiveDate::from_ymd_opt(1994, 2, 1));
        assert!(parse_date("Feb 1 1994").is_none());
        assert!(parse_date_time("yesterday").is_none());
    }
}
