use chrono::NaiveDate;

use crate::calendar::{days_diff, shift_by};

/// How long "remind me later" silences the delay notice.
pub const REMIND_LATER_DAYS: i64 = 2;

/// True when the period is more than `threshold` days late and any snooze has
/// strictly passed.
pub fn is_delayed(
    today: NaiveDate,
    predicted_next_period: NaiveDate,
    threshold: u32,
    remind_later_until: Option<NaiveDate>,
) -> bool {
    let late_by = days_diff(predicted_next_period, today);
    let snooze_passed = remind_later_until
        .map(|until| days_diff(until, today) > 0)
        .unwrap_or(true);
    late_by > threshold as i64 && snooze_passed
}

pub fn snooze_until(today: NaiveDate) -> NaiveDate {
    shift_by(today, REMIND_LATER_DAYS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        let predicted = date("2024-01-29");
        assert!(!is_delayed(date("2024-02-01"), predicted, 3, None));
        assert!(is_delayed(date("2024-02-02"), predicted, 3, None));
    }

    #[test]
    fn not_delayed_before_prediction() {
        assert!(!is_delayed(date("2024-01-20"), date("2024-01-29"), 3, None));
    }

    #[test]
    fn snooze_suppresses_until_strictly_passed() {
        let predicted = date("2024-01-29");
        let today = date("2024-02-05");
        let until = snooze_until(today);
        assert_eq!(until, date("2024-02-07"));
        assert!(!is_delayed(today, predicted, 3, Some(until)));
        assert!(!is_delayed(date("2024-02-07"), predicted, 3, Some(until)));
        assert!(is_delayed(date("2024-02-08"), predicted, 3, Some(until)));
    }
}
