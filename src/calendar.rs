use chrono::{Duration, NaiveDate};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Parse a `YYYY-MM-DD` string. Malformed input yields `None`.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Days since 1970-01-01 (negative before the epoch).
pub fn day_index(date: NaiveDate) -> i64 {
    (date - epoch()).num_days()
}

pub fn from_day_index(index: i64) -> Option<NaiveDate> {
    epoch().checked_add_signed(Duration::try_days(index)?)
}

/// Move `date` by `days` whole days, saturating at chrono's supported range.
pub fn shift_by(date: NaiveDate, days: i64) -> NaiveDate {
    day_index(date)
        .checked_add(days)
        .and_then(from_day_index)
        .unwrap_or(if days < 0 { NaiveDate::MIN } else { NaiveDate::MAX })
}

pub fn days_diff(from: NaiveDate, to: NaiveDate) -> i64 {
    day_index(to) - day_index(from)
}

/// String-level shift; an invalid key stays invalid.
pub fn shift_key(value: &str, days: i64) -> Option<String> {
    parse_date(value).map(|d| format_date(shift_by(d, days)))
}

pub fn days_diff_keys(from: &str, to: &str) -> Option<i64> {
    Some(days_diff(parse_date(from)?, parse_date(to)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parses_and_formats() {
        assert_eq!(format_date(d("2024-02-29")), "2024-02-29");
        assert_eq!(format_date(d(" 2024-03-01 ")), "2024-03-01");
    }

    #[test]
    fn malformed_dates_are_none() {
        assert!(parse_date("").is_none());
        assert!(parse_date("2024-13-01").is_none());
        assert!(parse_date("2023-02-29").is_none());
        assert!(parse_date("not a date").is_none());
        assert_eq!(shift_key("garbage", 3), None);
        assert_eq!(days_diff_keys("2024-01-01", "nope"), None);
    }

    #[test]
    fn shift_crosses_month_and_year() {
        assert_eq!(shift_by(d("2023-12-30"), 3), d("2024-01-02"));
        assert_eq!(shift_by(d("2024-03-01"), -1), d("2024-02-29"));
        assert_eq!(shift_key("2024-01-01", 28).as_deref(), Some("2024-01-29"));
    }

    #[test]
    fn diff_is_signed() {
        assert_eq!(days_diff(d("2024-01-29"), d("2024-02-01")), 3);
        assert_eq!(days_diff(d("2024-02-01"), d("2024-01-29")), -3);
        assert_eq!(days_diff_keys("2024-01-01", "2025-01-01"), Some(366));
    }

    #[test]
    fn day_index_round_trips() {
        assert_eq!(day_index(d("1970-01-01")), 0);
        assert_eq!(day_index(d("1969-12-31")), -1);
        assert_eq!(from_day_index(19_723), Some(d("2024-01-01")));
    }

    #[test]
    fn shift_saturates_at_range_edges() {
        assert_eq!(shift_by(NaiveDate::MAX, 1), NaiveDate::MAX);
        assert_eq!(shift_by(NaiveDate::MIN, -1), NaiveDate::MIN);
        assert_eq!(shift_by(d("2024-01-01"), i64::MAX), NaiveDate::MAX);
        assert_eq!(shift_by(d("2024-01-01"), i64::MIN), NaiveDate::MIN);
        assert_eq!(shift_by(NaiveDate::MAX, -1), NaiveDate::MAX.pred_opt().unwrap());
    }

    #[test]
    fn shift_then_diff_recovers_offset() {
        let base = d("2024-02-28");
        for n in -800..=800 {
            assert_eq!(days_diff(base, shift_by(base, n)), n);
        }
    }
}
