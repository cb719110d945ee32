use chrono::NaiveDate;

use crate::calendar::{days_diff, shift_by};
use crate::models::*;

pub const RECENT_CYCLE_SAMPLES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OvulationWindow {
    pub ovulation_date: NaiveDate,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl OvulationWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Grid anchored at the most recent recorded start, projected both ways.
#[derive(Debug, Clone)]
pub struct CyclePredictor<'a> {
    cycles: Vec<&'a CycleRecord>,
    rules: &'a CycleRules,
}

impl<'a> CyclePredictor<'a> {
    pub fn new(data: &'a AppData) -> Self {
        Self::from_parts(&data.cycles, &data.settings.rules)
    }

    pub fn from_parts(cycles: &'a [CycleRecord], rules: &'a CycleRules) -> Self {
        let mut sorted: Vec<&CycleRecord> = cycles.iter().collect();
        sorted.sort_by_key(|c| c.start_date);
        Self {
            cycles: sorted,
            rules,
        }
    }

    pub fn has_history(&self) -> bool {
        !self.cycles.is_empty()
    }

    pub fn last_start(&self) -> Option<NaiveDate> {
        self.cycles.last().map(|c| c.start_date)
    }

    /// Observed bleeding length, falling back to the configured average.
    pub fn period_length(&self) -> u32 {
        let observed: Vec<f64> = self
            .cycles
            .iter()
            .filter_map(|c| c.end_date.map(|end| days_diff(c.start_date, end) + 1))
            .filter(|len| *len > 0)
            .map(|len| clamp_period(len as f64))
            .collect();

        if observed.is_empty() {
            return clamp_period(self.rules.avg_period_length as f64) as u32;
        }
        clamp_period(mean(&observed).round()) as u32
    }

    /// Recorded lengths win over start-to-start deltas: a record may carry a
    /// manually corrected value.
    pub fn cycle_length(&self) -> u32 {
        let recorded: Vec<f64> = self
            .cycles
            .iter()
            .filter_map(|c| c.length)
            .filter(|len| *len > 0)
            .map(|len| clamp_cycle(len as f64))
            .collect();

        let inferred: Vec<f64> = self
            .cycles
            .windows(2)
            .map(|w| days_diff(w[0].start_date, w[1].start_date))
            .filter(|len| *len > 0)
            .map(|len| clamp_cycle(len as f64))
            .collect();

        let source = if recorded.is_empty() { inferred } else { recorded };
        if source.is_empty() {
            return DEFAULT_CYCLE_LENGTH;
        }
        let recent = &source[source.len().saturating_sub(RECENT_CYCLE_SAMPLES)..];
        clamp_cycle(mean(recent).round()) as u32
    }

    /// Start expected right after the last recorded one. Unlike the grid
    /// projection this does not move forward with the calendar, so it is
    /// what a late period is measured against.
    pub fn expected_next_start(&self) -> Option<NaiveDate> {
        let last_start = self.last_start()?;
        Some(shift_by(last_start, self.cycle_length() as i64))
    }

    /// Grid line at or before `date`. Uses floor division so dates before the
    /// anchor land on the preceding grid line.
    pub fn cycle_start_for_date(&self, date: NaiveDate) -> Option<NaiveDate> {
        let last_start = self.last_start()?;
        let length = self.cycle_length() as i64;
        let offset = days_diff(last_start, date).div_euclid(length);
        Some(shift_by(last_start, offset * length))
    }

    pub fn ovulation_window(&self, date: NaiveDate) -> Option<OvulationWindow> {
        let cycle_start = self.cycle_start_for_date(date)?;
        let ovulation_date = shift_by(
            cycle_start,
            self.cycle_length() as i64 - OVULATION_OFFSET as i64,
        );
        Some(OvulationWindow {
            ovulation_date,
            start: shift_by(ovulation_date, -2),
            end: shift_by(ovulation_date, 2),
        })
    }

    pub fn is_fertile(&self, date: NaiveDate) -> bool {
        self.ovulation_window(date)
            .map(|w| w.contains(date))
            .unwrap_or(false)
    }

    /// Full prediction for `date`; `None` without any recorded cycle.
    pub fn predict(&self, date: NaiveDate) -> Option<Prediction> {
        let cycle_start = self.cycle_start_for_date(date)?;
        let window = self.ovulation_window(date)?;
        let cycle_length = self.cycle_length();

        Some(Prediction {
            cycle_length,
            cycle_day: days_diff(cycle_start, date) + 1,
            predicted_next_period: shift_by(cycle_start, cycle_length as i64),
            ovulation_date: window.ovulation_date,
            ovulation_start: window.start,
            ovulation_end: window.end,
        })
    }
}

pub fn cycle_stats(cycles: &[CycleRecord]) -> CycleStats {
    let mut sorted: Vec<&CycleRecord> = cycles.iter().collect();
    sorted.sort_by_key(|c| c.start_date);

    let Some(last) = sorted.last() else {
        return CycleStats {
            total_cycles: 0,
            avg_cycle_length: None,
            avg_period_length: None,
            shortest_cycle: None,
            longest_cycle: None,
            last_period_start: None,
            last_period_end: None,
        };
    };

    let period_lengths: Vec<f64> = sorted
        .iter()
        .filter_map(|c| c.end_date.map(|end| days_diff(c.start_date, end) as f64 + 1.0))
        .collect();

    let cycle_lengths: Vec<i64> = sorted
        .windows(2)
        .map(|w| days_diff(w[0].start_date, w[1].start_date))
        .filter(|len| *len > 0)
        .collect();

    CycleStats {
        total_cycles: sorted.len(),
        avg_cycle_length: if cycle_lengths.is_empty() {
            None
        } else {
            Some(cycle_lengths.iter().sum::<i64>() as f32 / cycle_lengths.len() as f32)
        },
        avg_period_length: if period_lengths.is_empty() {
            None
        } else {
            Some(mean(&period_lengths) as f32)
        },
        shortest_cycle: cycle_lengths.iter().copied().min(),
        longest_cycle: cycle_lengths.iter().copied().max(),
        last_period_start: Some(last.start_date),
        last_period_end: last.end_date,
    }
}

fn clamp_cycle(value: f64) -> f64 {
    crate::normalize::clamp(
        value,
        MIN_CYCLE_LENGTH as f64,
        MAX_CYCLE_LENGTH as f64,
        DEFAULT_CYCLE_LENGTH as f64,
    )
}

fn clamp_period(value: f64) -> f64 {
    crate::normalize::clamp(
        value,
        MIN_PERIOD_LENGTH as f64,
        MAX_PERIOD_LENGTH as f64,
        DEFAULT_PERIOD_LENGTH as f64,
    )
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;
    use uuid::Uuid;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn make_cycle(start: &str, end: Option<&str>, length: Option<u32>) -> CycleRecord {
        CycleRecord {
            id: Uuid::new_v4(),
            start_date: date(start),
            end_date: end.map(date),
            length,
            confirmed: true,
        }
    }

    #[test]
    fn no_prediction_without_history() {
        let rules = CycleRules::default();
        let predictor = CyclePredictor::from_parts(&[], &rules);
        assert!(predictor.predict(date("2024-01-01")).is_none());
        assert_eq!(predictor.cycle_length(), 28);
        assert_eq!(predictor.period_length(), 5);
    }

    #[test]
    fn single_cycle_scenario() {
        let rules = CycleRules::default();
        let cycles = vec![make_cycle("2024-01-01", Some("2024-01-05"), Some(28))];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);

        assert_eq!(predictor.period_length(), 5);
        assert_eq!(predictor.cycle_length(), 28);

        let pred = predictor.predict(date("2024-01-01")).unwrap();
        assert_eq!(pred.cycle_day, 1);
        assert_eq!(pred.predicted_next_period, date("2024-01-29"));
        assert_eq!(pred.ovulation_date, date("2024-01-15"));
        assert_eq!(pred.ovulation_start, date("2024-01-13"));
        assert_eq!(pred.ovulation_end, date("2024-01-17"));
        assert_eq!(predictor.expected_next_start(), Some(date("2024-01-29")));
    }

    #[test]
    fn period_length_falls_back_to_rules() {
        let rules = CycleRules {
            avg_period_length: 7,
            ..CycleRules::default()
        };
        let cycles = vec![make_cycle("2024-01-01", None, None)];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);
        assert_eq!(predictor.period_length(), 7);
    }

    #[test]
    fn period_samples_are_clamped_before_averaging() {
        let rules = CycleRules::default();
        let cycles = vec![
            make_cycle("2024-01-01", Some("2024-01-01"), None), // 1 -> 3
            make_cycle("2024-01-29", Some("2024-02-12"), None), // 15 -> 8
        ];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);
        assert_eq!(predictor.period_length(), 6);
    }

    #[test]
    fn recorded_lengths_beat_inferred_deltas() {
        let rules = CycleRules::default();
        let cycles = vec![
            make_cycle("2024-01-01", None, Some(30)),
            make_cycle("2024-01-26", None, Some(30)),
        ];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);
        assert_eq!(predictor.cycle_length(), 30);
    }

    #[test]
    fn inferred_lengths_use_recent_deltas() {
        let rules = CycleRules::default();
        // Deltas: 35 (clamped from 40), 26, 27, 28 -> last three average 27.
        let cycles = vec![
            make_cycle("2024-01-01", None, None),
            make_cycle("2024-02-10", None, None),
            make_cycle("2024-03-07", None, None),
            make_cycle("2024-04-03", None, None),
            make_cycle("2024-05-01", None, None),
        ];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);
        assert_eq!(predictor.cycle_length(), 27);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let rules = CycleRules::default();
        let cycles = vec![
            make_cycle("2024-02-01", None, None),
            make_cycle("2024-01-04", None, None),
        ];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);
        assert_eq!(predictor.last_start(), Some(date("2024-02-01")));
        assert_eq!(predictor.cycle_length(), 28);
    }

    #[test]
    fn grid_extends_backwards_with_floor_division() {
        let rules = CycleRules::default();
        let cycles = vec![make_cycle("2024-01-29", None, Some(28))];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);

        assert_eq!(
            predictor.cycle_start_for_date(date("2024-01-28")),
            Some(date("2024-01-01"))
        );
        assert_eq!(
            predictor.cycle_start_for_date(date("2024-01-01")),
            Some(date("2024-01-01"))
        );
        assert_eq!(
            predictor.cycle_start_for_date(date("2023-12-31")),
            Some(date("2023-12-04"))
        );
        let pred = predictor.predict(date("2024-03-10")).unwrap();
        assert_eq!(pred.cycle_day, 14);
        assert_eq!(pred.predicted_next_period, date("2024-03-25"));
    }

    #[test]
    fn fertile_window_is_inclusive() {
        let rules = CycleRules::default();
        let cycles = vec![make_cycle("2024-01-01", Some("2024-01-05"), Some(28))];
        let predictor = CyclePredictor::from_parts(&cycles, &rules);
        assert!(!predictor.is_fertile(date("2024-01-12")));
        assert!(predictor.is_fertile(date("2024-01-13")));
        assert!(predictor.is_fertile(date("2024-01-17")));
        assert!(!predictor.is_fertile(date("2024-01-18")));
    }

    #[test]
    fn cycle_stats_computed() {
        let cycles = vec![
            make_cycle("2026-01-01", Some("2026-01-05"), None),
            make_cycle("2026-01-29", Some("2026-02-02"), None),
        ];
        let stats = cycle_stats(&cycles);
        assert_eq!(stats.total_cycles, 2);
        assert_eq!(stats.avg_cycle_length, Some(28.0));
        assert_eq!(stats.avg_period_length, Some(5.0));
        assert_eq!(stats.last_period_start, Some(date("2026-01-29")));
    }

    #[test]
    fn cycle_stats_empty() {
        let stats = cycle_stats(&[]);
        assert_eq!(stats.total_cycles, 0);
        assert!(stats.last_period_start.is_none());
    }
}
