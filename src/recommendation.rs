use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde_json::{json, Value};

use crate::calendar::format_date;
use crate::config::RecommendationConfig;
use crate::models::{DayEntry, Phase, Prediction};
use crate::prediction::CyclePredictor;
use crate::session::{Session, SessionError};

const NONE: &str = "none";
const NOTE_CONTEXT_CHARS: usize = 120;

/// Fingerprint of everything the text depends on.
pub fn signature(
    date: NaiveDate,
    entry: &DayEntry,
    prediction: Option<&Prediction>,
    fertile: bool,
) -> String {
    let cycle_day = prediction
        .map(|p| p.cycle_day.to_string())
        .unwrap_or_else(|| NONE.to_string());
    let intensity = entry
        .intensity
        .map(|i| i.to_string())
        .unwrap_or_else(|| NONE.to_string());
    let mood = if entry.mood.is_empty() { NONE } else { entry.mood.as_str() };
    format!(
        "{}|{}|{}|{}|{}|{}",
        format_date(date),
        entry.phase,
        cycle_day,
        if fertile { "fertile" } else { "regular" },
        intensity,
        mood
    )
}

pub fn cached_text<'a>(entry: &'a DayEntry, signature: &str) -> Option<&'a str> {
    match (&entry.ai_recommendation, &entry.ai_recommendation_signature) {
        (Some(text), Some(stored)) if stored == signature && !text.is_empty() => Some(text),
        _ => None,
    }
}

/// Who reads the text: the owner of the data or a partner viewing a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Owner,
    Partner,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationContext {
    pub date: NaiveDate,
    pub phase: Phase,
    pub cycle_day: Option<i64>,
    pub fertile: bool,
    pub intensity: Option<u8>,
    pub mood: String,
    pub symptoms: Vec<String>,
    pub note: String,
    pub audience: Audience,
}

impl RecommendationContext {
    fn describe(&self) -> String {
        let or_unset = |s: &str| if s.is_empty() { "not set".to_string() } else { s.to_string() };
        let note: String = self.note.chars().take(NOTE_CONTEXT_CHARS).collect();
        format!(
            "Context: date {}; phase {}; cycle day {}; fertile window today: {}; mood: {}; intensity: {}; symptoms: {}; note: {}.",
            format_date(self.date),
            self.phase,
            self.cycle_day.map(|d| d.to_string()).unwrap_or_else(|| "unknown".into()),
            if self.fertile { "yes" } else { "no" },
            or_unset(&self.mood),
            self.intensity.map(|i| i.to_string()).unwrap_or_else(|| "not set".into()),
            or_unset(&self.symptoms.join(", ")),
            if note.is_empty() { "none".to_string() } else { note },
        )
    }

    fn prompts(&self) -> (String, String) {
        let audience = match self.audience {
            Audience::Owner => "Address the user gently and with care.",
            Audience::Partner => "Address the user's partner warmly, focused on how to support her.",
        };
        let system = format!(
            "You are the assistant of a cycle calendar. {audience} Do not diagnose, do not prescribe \
             medication and do not frighten. Answer in 1-2 short sentences, no lists."
        );
        let ask = match (self.audience, self.fertile, self.phase) {
            (Audience::Partner, true, _) => {
                "Write a short recommendation for the partner on a fertile day: gentle support without pressure, plus 1-2 ideas of food or drinks for her comfort."
            }
            (Audience::Partner, false, _) => {
                "Write a short recommendation for the partner on how to support her today given the phase and wellbeing, plus 1-2 ideas of food or drinks."
            }
            (Audience::Owner, _, Phase::Menstrual) => {
                "Write a short recommendation of the day focused on a helpful ritual during the period: warmth, rest, water, calm breathing or a light walk."
            }
            (Audience::Owner, _, _) => "Write a short, practical and caring hint for what to do today.",
        };
        (system, format!("{} {}", self.describe(), ask))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("recommendation generator is not configured")]
    Disabled,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("generator returned status {0}")]
    Status(u16),
    #[error("generator returned no text")]
    Empty,
}

#[async_trait]
pub trait RecommendationGenerator: Send + Sync {
    async fn generate(&self, context: &RecommendationContext) -> Result<String, GeneratorError>;
}

/// OpenAI-compatible chat completions client.
pub struct HttpRecommendationGenerator {
    client: Client,
    config: RecommendationConfig,
}

impl HttpRecommendationGenerator {
    pub fn new(config: RecommendationConfig, timeout: Duration) -> Result<Self, GeneratorError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, config })
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

#[async_trait]
impl RecommendationGenerator for HttpRecommendationGenerator {
    async fn generate(&self, context: &RecommendationContext) -> Result<String, GeneratorError> {
        let key = self.api_key().ok_or(GeneratorError::Disabled)?;
        let (system, user) = context.prompts();
        let body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ]
        });

        let res = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(GeneratorError::Status(res.status().as_u16()));
        }
        let payload: Value = res.json().await?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .and_then(clean_text)
            .ok_or(GeneratorError::Empty)
    }
}

pub fn clean_text(text: &str) -> Option<String> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!cleaned.is_empty()).then_some(cleaned)
}

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<Mutex<HashSet<String>>>,
}

/// Releases its key when dropped, whether the request succeeded or not.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl InFlight {
    /// `None` when a request with the same key is already outstanding.
    pub fn try_acquire(&self, key: &str) -> Option<InFlightGuard> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if !keys.insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            keys: self.keys.clone(),
            key: key.to_string(),
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(&self.key);
    }
}

const MENSTRUAL_TIPS: &[&str] = &[
    "Keep warmth on your lower belly and allow yourself a slower pace today.",
    "Sip warm water or herbal tea through the day and rest when you can.",
    "A short, easy walk and a few slow breaths can ease cramps.",
    "Choose iron-rich food today: lentils, greens or a little red meat.",
    "Go to bed a bit earlier tonight; your body is doing a lot of work.",
];
const FOLLICULAR_TIPS: &[&str] = &[
    "Energy is rising: a good day to start something new.",
    "Try a more active workout today if you feel like it.",
    "Plan the week ahead while your focus is sharp.",
];
const OVULATION_TIPS: &[&str] = &[
    "You may feel more social today; make room for people you like.",
    "Stay hydrated and keep meals light and fresh.",
    "Good day for conversations that need confidence.",
];
const LUTEAL_TIPS: &[&str] = &[
    "Slow down a little and keep evenings calm.",
    "Magnesium-rich snacks like nuts or dark chocolate can help with cravings.",
    "Be gentle with yourself if your mood dips; it passes.",
    "Gentle stretching before sleep helps you unwind.",
];
const PARTNER_FERTILE_TIP: &str =
    "Fertile window today: keep the atmosphere calm, without pressure or rush, and make unhurried time for closeness. Water, a light dinner and a warm drink are good support.";
const PARTNER_DEFAULT_TIP: &str =
    "Be close gently and respectfully: take some load off, offer rest and warm care. A calm tone and help around the house mean a lot today.";

/// `h = h * 31 + byte` over UTF-16 code units, wrapping at 32 bits.
pub fn string_hash(value: &str) -> u32 {
    value
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)))
}

fn stable_index(date: NaiveDate, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    string_hash(&format_date(date)) as usize % len
}

/// Static tip used whenever no generated text is available. The same inputs
/// always give the same tip.
pub fn fallback_tip(date: NaiveDate, phase: Phase, fertile: bool, audience: Audience) -> &'static str {
    if audience == Audience::Partner {
        return if fertile { PARTNER_FERTILE_TIP } else { PARTNER_DEFAULT_TIP };
    }
    let pool = match phase {
        Phase::Menstrual => MENSTRUAL_TIPS,
        Phase::Follicular => FOLLICULAR_TIPS,
        Phase::Ovulation => OVULATION_TIPS,
        Phase::Luteal => LUTEAL_TIPS,
    };
    pool[stable_index(date, pool.len())]
}

#[derive(Debug, Clone)]
pub struct RecommendationRequest {
    pub signature: String,
    pub cached: Option<String>,
    pub fallback: &'static str,
    pub context: RecommendationContext,
}

impl RecommendationRequest {
    /// `entry.phase` must already be fresh for `date`.
    pub fn build(
        date: NaiveDate,
        entry: &DayEntry,
        predictor: &CyclePredictor<'_>,
        audience: Audience,
    ) -> Self {
        let prediction = predictor.predict(date);
        let fertile = predictor.is_fertile(date);
        let signature = signature(date, entry, prediction.as_ref(), fertile);
        Self {
            cached: cached_text(entry, &signature).map(String::from),
            fallback: fallback_tip(date, entry.phase, fertile, audience),
            context: RecommendationContext {
                date,
                phase: entry.phase,
                cycle_day: prediction.map(|p| p.cycle_day),
                fertile,
                intensity: entry.intensity,
                mood: entry.mood.clone(),
                symptoms: entry.symptoms.clone(),
                note: entry.note.clone(),
                audience,
            },
            signature,
        }
    }

    pub fn key(&self) -> String {
        format!("{}|{}", format_date(self.context.date), self.signature)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecommendationOutcome {
    Cached(String),
    /// Fresh text, written to the day. `visible` is false when the viewed
    /// date changed while the request was outstanding.
    Generated { text: String, visible: bool },
    InFlight { fallback: String },
    Fallback(String),
}

impl RecommendationOutcome {
    pub fn text(&self) -> &str {
        match self {
            RecommendationOutcome::Cached(text)
            | RecommendationOutcome::Generated { text, .. }
            | RecommendationOutcome::Fallback(text) => text,
            RecommendationOutcome::InFlight { fallback } => fallback,
        }
    }
}

#[derive(Clone)]
pub struct Recommender {
    generator: Arc<dyn RecommendationGenerator>,
    in_flight: InFlight,
}

impl Recommender {
    pub fn new(generator: Arc<dyn RecommendationGenerator>) -> Self {
        Self {
            generator,
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Serve the recommendation for `date`. The session lock is not held
    /// while the generator runs.
    pub async fn recommend(
        &self,
        session: &tokio::sync::Mutex<Session>,
        date: NaiveDate,
    ) -> Result<RecommendationOutcome, SessionError> {
        let request = session.lock().await.recommendation_request(date);
        if let Some(text) = request.cached {
            return Ok(RecommendationOutcome::Cached(text));
        }

        let key = request.key();
        let Some(_guard) = self.in_flight.try_acquire(&key) else {
            tracing::debug!(%key, "recommendation already requested");
            return Ok(RecommendationOutcome::InFlight {
                fallback: request.fallback.to_string(),
            });
        };

        match self.generator.generate(&request.context).await {
            Ok(text) => {
                let visible = session
                    .lock()
                    .await
                    .store_recommendation(date, &request.signature, &text)?;
                tracing::debug!(%key, visible, "recommendation generated");
                Ok(RecommendationOutcome::Generated { text, visible })
            }
            Err(GeneratorError::Disabled) => Ok(RecommendationOutcome::Fallback(request.fallback.to_string())),
            Err(e) => {
                tracing::warn!(%key, error = %e, "recommendation generator failed, using static tip");
                Ok(RecommendationOutcome::Fallback(request.fallback.to_string()))
            }
        }
    }
}
