use std::collections::BTreeMap;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::calendar::parse_date;
use crate::models::*;

/// Clamp `value` into `[min, max]`, or return `fallback` when it is not a
/// finite number.
pub fn clamp(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if !value.is_finite() {
        return fallback;
    }
    value.max(min).min(max)
}

/// Numeric view of a JSON value. Numeric strings count; everything else is
/// not a number.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// [`clamp`] over a JSON value, rounded to the nearest whole number.
pub fn clamp_value(value: &Value, min: u32, max: u32, fallback: u32) -> u32 {
    let n = as_number(value).unwrap_or(f64::NAN);
    clamp(n, min as f64, max as f64, fallback as f64).round() as u32
}

pub fn clamp_cycle_length(value: &Value) -> u32 {
    clamp_value(value, MIN_CYCLE_LENGTH, MAX_CYCLE_LENGTH, DEFAULT_CYCLE_LENGTH)
}

pub fn clamp_period_length(value: &Value) -> u32 {
    clamp_value(value, MIN_PERIOD_LENGTH, MAX_PERIOD_LENGTH, DEFAULT_PERIOD_LENGTH)
}

/// Intensity is optional: blank or non-numeric input means "unset".
pub fn clamp_intensity(value: &Value) -> Option<u8> {
    as_number(value)
        .filter(|n| n.is_finite())
        .map(|n| clamp(n, 0.0, MAX_INTENSITY as f64, 0.0).round() as u8)
}

pub fn normalize_email(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Threshold of `0` or garbage means "use the default", matching the stored
/// format's historical behaviour.
pub fn normalize_delay_threshold(value: &Value) -> u32 {
    match as_number(value) {
        Some(n) if n.is_finite() && n != 0.0 => {
            clamp(n, 1.0, MAX_DELAY_THRESHOLD as f64, DEFAULT_DELAY_THRESHOLD as f64).round() as u32
        }
        _ => DEFAULT_DELAY_THRESHOLD,
    }
}

pub fn parse_symptoms(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn string_field(obj: &Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn section<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Map<String, Value>> {
    obj.get(key).and_then(Value::as_object)
}

/// Convert any value claiming to be stored data into the canonical shape.
pub fn normalize(raw: &Value) -> AppData {
    let empty = Map::new();
    let root = raw.as_object().unwrap_or(&empty);

    let cycles = match root.get("cycles") {
        Some(Value::Array(items)) => items.iter().filter_map(normalize_cycle).collect(),
        _ => Vec::new(),
    };
    let days = match root.get("days") {
        Some(Value::Object(map)) => normalize_days(map),
        _ => BTreeMap::new(),
    };

    let data = AppData {
        cycles,
        days,
        settings: section(root, "settings").map(normalize_settings).unwrap_or_default(),
        profile: normalize_profile(section(root, "profile"), section(root, "auth")),
        session: section(root, "session").map(normalize_session).unwrap_or_default(),
        remind_later_until: root
            .get("remindLaterUntil")
            .and_then(Value::as_str)
            .and_then(parse_date),
    };

    tracing::trace!(
        cycles = data.cycles.len(),
        days = data.days.len(),
        "normalized stored data"
    );
    data
}

pub fn normalize_cycle(value: &Value) -> Option<CycleRecord> {
    let obj = value.as_object()?;
    let start_date = obj.get("startDate").and_then(Value::as_str).and_then(parse_date)?;
    let end_date = obj
        .get("endDate")
        .and_then(Value::as_str)
        .and_then(parse_date)
        .filter(|end| *end >= start_date);
    let length = obj
        .get("length")
        .and_then(as_number)
        .filter(|n| n.is_finite() && *n > 0.0)
        .map(|n| clamp(n, MIN_CYCLE_LENGTH as f64, MAX_CYCLE_LENGTH as f64, DEFAULT_CYCLE_LENGTH as f64).round() as u32);
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let confirmed = obj.get("confirmed").map(|v| truthy(Some(v))).unwrap_or(true);

    Some(CycleRecord {
        id,
        start_date,
        end_date,
        length,
        confirmed,
    })
}

fn normalize_days(map: &Map<String, Value>) -> BTreeMap<chrono::NaiveDate, DayEntry> {
    map.iter()
        .filter_map(|(key, value)| Some((parse_date(key)?, normalize_day(value)?)))
        .collect()
}

pub fn normalize_day(value: &Value) -> Option<DayEntry> {
    let obj = value.as_object()?;
    let phase = obj
        .get("phase")
        .cloned()
        .and_then(|v| serde_json::from_value::<Phase>(v).ok())
        .unwrap_or_default();
    let symptoms = match obj.get("symptoms") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => parse_symptoms(s),
        _ => Vec::new(),
    };
    let optional_text = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    Some(DayEntry {
        phase,
        intensity: obj.get("intensity").and_then(clamp_intensity),
        symptoms,
        mood: string_field(obj, "mood"),
        note: string_field(obj, "note"),
        intimacy: truthy(obj.get("intimacy")),
        ai_recommendation: optional_text("aiRecommendation"),
        ai_recommendation_signature: optional_text("aiRecommendationSignature"),
    })
}

fn normalize_settings(obj: &Map<String, Value>) -> Settings {
    let defaults = Settings::default();
    let theme = obj
        .get("theme")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or(defaults.theme);
    let rules = section(obj, "rules").map(normalize_rules).unwrap_or_default();

    Settings {
        theme,
        notifications: truthy(obj.get("notifications")),
        delay_threshold: obj
            .get("delayThreshold")
            .map(normalize_delay_threshold)
            .unwrap_or(defaults.delay_threshold),
        rules,
    }
}

pub fn normalize_rules(obj: &Map<String, Value>) -> CycleRules {
    CycleRules {
        avg_cycle_length: obj
            .get("avgCycleLength")
            .map(clamp_cycle_length)
            .unwrap_or(DEFAULT_CYCLE_LENGTH),
        avg_period_length: obj
            .get("avgPeriodLength")
            .map(clamp_period_length)
            .unwrap_or(DEFAULT_PERIOD_LENGTH),
        allowed_cycle_range: [MIN_CYCLE_LENGTH, MAX_CYCLE_LENGTH],
    }
}

fn normalize_profile(
    profile: Option<&Map<String, Value>>,
    legacy_auth: Option<&Map<String, Value>>,
) -> Profile {
    let Some(obj) = profile else {
        let email = legacy_auth.map(|a| string_field(a, "email")).unwrap_or_default();
        return Profile {
            email: normalize_email(&email),
            ..Profile::default()
        };
    };
    let mut email = normalize_email(&string_field(obj, "email"));
    if email.is_empty() {
        if let Some(auth) = legacy_auth {
            email = normalize_email(&string_field(auth, "email"));
        }
    }

    Profile {
        name: string_field(obj, "name"),
        email,
        flow_type: string_field(obj, "flowType"),
        goal: string_field(obj, "goal"),
        onboarding_completed: truthy(obj.get("onboardingCompleted")),
    }
}

fn normalize_session(obj: &Map<String, Value>) -> SessionState {
    SessionState {
        logged_in: truthy(obj.get("loggedIn")),
        auth_token: string_field(obj, "authToken"),
        user_id: string_field(obj, "userId"),
    }
}
