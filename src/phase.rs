use chrono::NaiveDate;

use crate::calendar::days_diff;
use crate::models::Phase;
use crate::prediction::CyclePredictor;

/// Zero-based day offsets that bound each phase for one cycle.
///
/// The ovulation band `[L-16, L-12]` always keeps its full width so it agrees
/// with the fertile window; the menstrual band is cut at `L-16` when the
/// period is too long, leaving the follicular band empty rather than inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseBands {
    pub cycle_length: i64,
    pub menstrual_end: i64,
    pub follicular_end: i64,
    pub ovulation_last: i64,
}

impl PhaseBands {
    pub fn new(cycle_length: u32, period_length: u32) -> Self {
        let cycle_length = cycle_length.max(1) as i64;
        let follicular_end = cycle_length - 16;
        let menstrual_end = (period_length as i64).min(follicular_end);
        if menstrual_end < period_length as i64 {
            tracing::debug!(
                cycle_length,
                period_length,
                "period band truncated to keep phase bands ordered"
            );
        }
        Self {
            cycle_length,
            menstrual_end,
            follicular_end,
            ovulation_last: cycle_length - 12,
        }
    }

    pub fn classify(&self, cycle_day_zero_based: i64) -> Phase {
        let day = cycle_day_zero_based.rem_euclid(self.cycle_length);
        if day < self.menstrual_end {
            Phase::Menstrual
        } else if day < self.follicular_end {
            Phase::Follicular
        } else if day <= self.ovulation_last {
            Phase::Ovulation
        } else {
            Phase::Luteal
        }
    }
}

/// Phase of `date` under the current cycle model. Without history every date
/// is follicular.
pub fn phase_for_date(predictor: &CyclePredictor<'_>, date: NaiveDate) -> Phase {
    let Some(last_start) = predictor.last_start() else {
        return Phase::Follicular;
    };
    let bands = PhaseBands::new(predictor.cycle_length(), predictor.period_length());
    bands.classify(days_diff(last_start, date))
}
