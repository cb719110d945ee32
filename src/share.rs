use std::borrow::Cow;
use std::collections::BTreeMap;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::calendar::{days_diff, format_date, parse_date, shift_by};
use crate::config::ShareConfig;
use crate::models::*;
use crate::normalize::{
    as_number, clamp, clamp_cycle_length, clamp_period_length, normalize, normalize_delay_threshold,
};
use crate::prediction::CyclePredictor;

pub const SHARE_VERSION: u64 = 2;
pub const SHARE_PARAM: &str = "p";
pub const LEGACY_SHARE_PARAM: &str = "partner";
pub const SYMPTOM_DELIMITER: &str = "|";
pub const DEFAULT_OWNER_NAME: &str = "Partner";

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

#[derive(Debug, Clone, Copy)]
pub struct ShareWindow {
    pub days: i64,
    pub max_cycles: usize,
}

impl Default for ShareWindow {
    fn default() -> Self {
        Self {
            days: 120,
            max_cycles: 12,
        }
    }
}

impl From<&ShareConfig> for ShareWindow {
    fn from(config: &ShareConfig) -> Self {
        Self {
            days: config.window_days,
            max_cycles: config.max_cycles,
        }
    }
}

/// Decoded token: who shared, when, and their data in canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedSnapshot {
    pub version: u64,
    pub shared_at: Option<NaiveDate>,
    pub owner_name: String,
    pub data: AppData,
}

type CompactCycle = (String, String, u32);
type CompactDay = (Value, String, String, String, u8);

#[derive(Serialize)]
struct CompactPayload {
    v: u64,
    a: String,
    n: String,
    t: u32,
    r: [u32; 2],
    c: Vec<CompactCycle>,
    d: BTreeMap<String, CompactDay>,
}

pub fn encode(data: &AppData, today: NaiveDate, window: ShareWindow) -> Result<String, serde_json::Error> {
    let predictor = CyclePredictor::new(data);
    let current_length = predictor.cycle_length();
    let min_date = shift_by(today, -window.days);
    let max_date = shift_by(today, window.days);

    let sorted = data.sorted_cycles();
    let recent = &sorted[sorted.len().saturating_sub(window.max_cycles)..];
    // Rows always carry a number: the reader rebuilds a missing length from the
    // span, so an unrecorded length is sent as the current model length.
    let cycles = recent
        .iter()
        .map(|c| {
            (
                format_date(c.start_date),
                c.end_date.map(format_date).unwrap_or_default(),
                c.length.unwrap_or(current_length),
            )
        })
        .collect();

    let days = data
        .days
        .iter()
        .filter(|(date, entry)| **date >= min_date && **date <= max_date && entry.has_journal_data())
        .map(|(date, entry)| (format_date(*date), compact_day(entry)))
        .collect();

    let name = data.profile.name.trim();
    let payload = CompactPayload {
        v: SHARE_VERSION,
        a: format_date(today),
        n: if name.is_empty() { DEFAULT_OWNER_NAME.to_string() } else { name.to_string() },
        t: data.settings.delay_threshold,
        r: [
            data.settings.rules.avg_cycle_length,
            data.settings.rules.avg_period_length,
        ],
        c: cycles,
        d: days,
    };

    let json = serde_json::to_vec(&payload)?;
    let token = URL_SAFE_NO_PAD.encode(json);
    tracing::debug!(
        cycles = payload.c.len(),
        days = payload.d.len(),
        bytes = token.len(),
        "encoded share token"
    );
    Ok(token)
}

fn compact_day(entry: &DayEntry) -> CompactDay {
    let symptoms: Vec<&str> = entry
        .symptoms
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    (
        entry.intensity.map(Value::from).unwrap_or_else(|| Value::from("")),
        entry.mood.clone(),
        symptoms.join(SYMPTOM_DELIMITER),
        entry.note.trim().to_string(),
        u8::from(entry.intimacy),
    )
}

/// Decode a token, trying the compact format first and the legacy expanded
/// format second.
pub fn decode(token: &str) -> Option<SharedSnapshot> {
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    if let Some(snapshot) = URL_SAFE_LENIENT
        .decode(token)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|raw| from_raw(&raw))
    {
        return Some(snapshot);
    }

    // Legacy tokens are standard base64; query decoding may have turned '+' into ' '.
    let legacy = token.replace(' ', "+");
    let snapshot = STANDARD_LENIENT
        .decode(legacy)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|raw| from_raw(&raw));
    if snapshot.is_none() {
        tracing::debug!(len = token.len(), "share token rejected");
    }
    snapshot
}

fn from_raw(raw: &Value) -> Option<SharedSnapshot> {
    let obj = raw.as_object()?;
    if obj.get("v").and_then(Value::as_u64) == Some(SHARE_VERSION) {
        return Some(from_compact(obj));
    }
    let expanded = ["version", "settings", "cycles", "days"]
        .iter()
        .all(|key| obj.get(*key).map(|v| !v.is_null()).unwrap_or(false));
    if expanded {
        return Some(from_expanded(obj));
    }
    None
}

fn from_compact(obj: &Map<String, Value>) -> SharedSnapshot {
    let cycles: Vec<Value> = obj
        .get("c")
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(expand_cycle_row).collect())
        .unwrap_or_default();

    let days: Map<String, Value> = obj
        .get("d")
        .and_then(Value::as_object)
        .map(|rows| {
            rows.iter()
                .filter_map(|(date, row)| Some((date.clone(), expand_day_row(row)?)))
                .collect()
        })
        .unwrap_or_default();

    let rules = obj.get("r").and_then(Value::as_array);
    let rule = |idx: usize| rules.and_then(|r| r.get(idx)).cloned().unwrap_or(Value::Null);
    let settings = json!({
        "delayThreshold": obj.get("t").map(normalize_delay_threshold).unwrap_or(DEFAULT_DELAY_THRESHOLD),
        "rules": {
            "avgCycleLength": clamp_cycle_length(&rule(0)),
            "avgPeriodLength": clamp_period_length(&rule(1)),
        }
    });

    snapshot(
        SHARE_VERSION,
        obj.get("a").and_then(Value::as_str).and_then(parse_date),
        obj.get("n").and_then(Value::as_str),
        json!({ "cycles": cycles, "days": days, "settings": settings }),
    )
}

/// `[start, end, length]`; a missing or non-numeric length is rebuilt from
/// the period span.
fn expand_cycle_row(row: &Value) -> Option<Value> {
    let row = row.as_array()?;
    let start = row.first().and_then(Value::as_str).and_then(parse_date)?;
    let end = row.get(1).and_then(Value::as_str).and_then(parse_date);
    let length = row
        .get(2)
        .and_then(as_number)
        .filter(|n| n.is_finite())
        .unwrap_or_else(|| {
            let span = end.map(|e| days_diff(start, e) + 1).unwrap_or(1).max(1);
            span as f64
        });
    let length = clamp(
        length,
        MIN_CYCLE_LENGTH as f64,
        MAX_CYCLE_LENGTH as f64,
        DEFAULT_CYCLE_LENGTH as f64,
    )
    .round() as u32;

    Some(json!({
        "startDate": format_date(start),
        "endDate": end.map(format_date),
        "length": length,
        "confirmed": true,
    }))
}

fn expand_day_row(row: &Value) -> Option<Value> {
    let row = row.as_array()?;
    let text = |idx: usize| row.get(idx).and_then(Value::as_str).unwrap_or_default();
    let symptoms: Vec<&str> = text(2)
        .split(SYMPTOM_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    Some(json!({
        "intensity": row.first().cloned().unwrap_or(Value::Null),
        "mood": text(1),
        "symptoms": symptoms,
        "note": text(3),
        "intimacy": row.get(4).cloned().unwrap_or(Value::Bool(false)),
    }))
}

fn from_expanded(obj: &Map<String, Value>) -> SharedSnapshot {
    let owner = obj
        .get("profile")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str);
    let version = obj.get("version").and_then(Value::as_u64).unwrap_or(1);
    let shared_at = obj.get("sharedAt").and_then(Value::as_str).and_then(parse_date);
    let raw = json!({
        "cycles": obj.get("cycles").cloned().unwrap_or(Value::Null),
        "days": obj.get("days").cloned().unwrap_or(Value::Null),
        "settings": obj.get("settings").cloned().unwrap_or(Value::Null),
    });
    snapshot(version, shared_at, owner, raw)
}

/// Normalize and strip everything the reader must not act on.
fn snapshot(
    version: u64,
    shared_at: Option<NaiveDate>,
    owner: Option<&str>,
    raw: Value,
) -> SharedSnapshot {
    let owner_name = owner
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_OWNER_NAME)
        .to_string();

    let mut data = normalize(&raw);
    data.settings.notifications = false;
    data.profile = Profile {
        name: owner_name.clone(),
        onboarding_completed: true,
        ..Profile::default()
    };
    data.session = SessionState::default();
    data.remind_later_until = None;

    SharedSnapshot {
        version,
        shared_at,
        owner_name,
        data,
    }
}

pub fn share_link(base_url: &str, token: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base_url)?;
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut().append_pair(SHARE_PARAM, token);
    Ok(url.to_string())
}

/// Pull a token out of whatever the user pasted: a full link (query or
/// fragment), a percent-encoded token, or a bare token.
pub fn extract_share_token(raw: &str) -> Option<String> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    let lower = value.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        let url = Url::parse(value).ok()?;
        return token_from_pairs(url.query_pairs())
            .or_else(|| {
                let fragment = url.fragment().unwrap_or_default();
                token_from_pairs(url::form_urlencoded::parse(fragment.as_bytes()))
            });
    }
    match urlencoding::decode(value) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(_) => Some(value.to_string()),
    }
}

fn token_from_pairs<'a>(pairs: impl Iterator<Item = (Cow<'a, str>, Cow<'a, str>)>) -> Option<String> {
    let pairs: Vec<_> = pairs.collect();
    [SHARE_PARAM, LEGACY_SHARE_PARAM].iter().find_map(|key| {
        pairs
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.to_string())
    })
}

/// Remove the share parameters from a link once consumed.
pub fn strip_share_params(url: &Url) -> Url {
    let is_share = |k: &str| k == SHARE_PARAM || k == LEGACY_SHARE_PARAM;
    let mut clean = url.clone();

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_share(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        clean.set_query(None);
    } else {
        clean.query_pairs_mut().clear().extend_pairs(kept);
    }

    if let Some(fragment) = url.fragment() {
        let kept: Vec<(String, String)> = url::form_urlencoded::parse(fragment.as_bytes())
            .filter(|(k, _)| !is_share(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            clean.set_fragment(None);
        } else {
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(kept)
                .finish();
            clean.set_fragment(Some(&encoded));
        }
    }
    clean
}
