use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MIN_CYCLE_LENGTH: u32 = 21;
pub const MAX_CYCLE_LENGTH: u32 = 35;
pub const DEFAULT_CYCLE_LENGTH: u32 = 28;
pub const MIN_PERIOD_LENGTH: u32 = 3;
pub const MAX_PERIOD_LENGTH: u32 = 8;
pub const DEFAULT_PERIOD_LENGTH: u32 = 5;
/// Ovulation is estimated this many days before the next period.
pub const OVULATION_OFFSET: u32 = 14;
pub const DEFAULT_DELAY_THRESHOLD: u32 = 3;
pub const MAX_DELAY_THRESHOLD: u32 = 30;
pub const MAX_INTENSITY: u8 = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Menstrual,
    #[default]
    Follicular,
    Ovulation,
    Luteal,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Menstrual => "menstrual",
            Phase::Follicular => "follicular",
            Phase::Ovulation => "ovulation",
            Phase::Luteal => "luteal",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    pub id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    /// Recorded cycle length; `None` when it was never recorded.
    pub length: Option<u32>,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DayEntry {
    /// Derived from the cycle model on every fetch; never authoritative.
    pub phase: Phase,
    pub intensity: Option<u8>,
    pub symptoms: Vec<String>,
    pub mood: String,
    pub note: String,
    pub intimacy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_recommendation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_recommendation_signature: Option<String>,
}

impl DayEntry {
    /// True when the user wrote anything worth keeping for this day.
    pub fn has_journal_data(&self) -> bool {
        self.intimacy
            || self.intensity.is_some()
            || !self.mood.trim().is_empty()
            || self.symptoms.iter().any(|s| !s.trim().is_empty())
            || !self.note.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleRules {
    pub avg_cycle_length: u32,
    pub avg_period_length: u32,
    pub allowed_cycle_range: [u32; 2],
}

impl Default for CycleRules {
    fn default() -> Self {
        Self {
            avg_cycle_length: DEFAULT_CYCLE_LENGTH,
            avg_period_length: DEFAULT_PERIOD_LENGTH,
            allowed_cycle_range: [MIN_CYCLE_LENGTH, MAX_CYCLE_LENGTH],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub theme: String,
    pub notifications: bool,
    pub delay_threshold: u32,
    pub rules: CycleRules,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            theme: "auto".into(),
            notifications: false,
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            rules: CycleRules::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub email: String,
    pub flow_type: String,
    pub goal: String,
    pub onboarding_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub logged_in: bool,
    pub auth_token: String,
    pub user_id: String,
}

impl SessionState {
    pub fn has_token(&self) -> bool {
        self.logged_in && !self.auth_token.is_empty()
    }
}

/// The canonical persisted model. Only `normalize::normalize` builds one from
/// untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    pub cycles: Vec<CycleRecord>,
    pub days: BTreeMap<NaiveDate, DayEntry>,
    pub settings: Settings,
    pub profile: Profile,
    pub session: SessionState,
    pub remind_later_until: Option<NaiveDate>,
}

impl AppData {
    pub fn sorted_cycles(&self) -> Vec<&CycleRecord> {
        let mut cycles: Vec<&CycleRecord> = self.cycles.iter().collect();
        cycles.sort_by_key(|c| c.start_date);
        cycles
    }
}

/// Derived model for one target date. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub cycle_length: u32,
    pub cycle_day: i64,
    pub predicted_next_period: NaiveDate,
    pub ovulation_date: NaiveDate,
    pub ovulation_start: NaiveDate,
    pub ovulation_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CycleStats {
    pub total_cycles: usize,
    pub avg_cycle_length: Option<f32>,
    pub avg_period_length: Option<f32>,
    pub shortest_cycle: Option<i64>,
    pub longest_cycle: Option<i64>,
    pub last_period_start: Option<NaiveDate>,
    pub last_period_end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FertilityLevel {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DayView {
    pub date: NaiveDate,
    pub entry: DayEntry,
    pub prediction: Option<Prediction>,
    pub fertile: bool,
    pub fertility: Option<FertilityLevel>,
    pub days_until_period: Option<i64>,
    pub days_until_ovulation: Option<i64>,
}
