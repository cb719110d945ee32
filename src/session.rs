use chrono::NaiveDate;
use serde_json::Value;
use uuid::Uuid;

use crate::calendar::{days_diff, parse_date, shift_by, today};
use crate::delay;
use crate::models::*;
use crate::normalize::{normalize, normalize_email};
use crate::notify::{self, Notifier};
use crate::phase::phase_for_date;
use crate::prediction::{cycle_stats, CyclePredictor};
use crate::recommendation::{Audience, RecommendationRequest};
use crate::remote::{AuthResponse, RemoteError, RemoteStore};
use crate::share::{self, ShareWindow, SharedSnapshot};
use crate::storage::{LocalStore, StorageError};
use crate::sync::RemoteSync;

pub const MIN_PASSWORD_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("partner view is read-only")]
    ReadOnly,
    #[error("invalid date: {0}")]
    InvalidDate(String),
    #[error("period end {end} is before its start {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("complete onboarding before sharing")]
    OnboardingIncomplete,
    #[error("link is invalid or expired")]
    InvalidShareLink,
    #[error("password must be at least 4 characters")]
    PasswordTooShort,
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid share url: {0}")]
    ShareUrl(#[from] url::ParseError),
}

pub fn parse_day(value: &str) -> Result<NaiveDate, SessionError> {
    parse_date(value).ok_or_else(|| SessionError::InvalidDate(value.to_string()))
}

/// Fields to change on a day; `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct DayUpdate {
    pub intensity: Option<u8>,
    pub mood: Option<String>,
    pub symptoms: Option<Vec<String>>,
    pub note: Option<String>,
    pub intimacy: Option<bool>,
    /// Records a full period alongside the day.
    pub period: Option<(NaiveDate, NaiveDate)>,
}

#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub theme: Option<String>,
    pub delay_threshold: Option<u32>,
    pub avg_cycle_length: Option<u32>,
    pub avg_period_length: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Onboarding {
    pub name: String,
    pub email: String,
    pub flow_type: String,
    pub goal: String,
    pub cycle_length: u32,
    pub period_length: u32,
    pub last_start: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Skipped,
    Restored,
    LoggedOut,
    KeptLocal,
}

pub struct Session {
    own: AppData,
    partner: Option<SharedSnapshot>,
    selected_date: NaiveDate,
    store: Option<LocalStore>,
    sync: Option<RemoteSync>,
    share_window: ShareWindow,
}

impl Session {
    pub fn open(store: LocalStore) -> Result<Self, SessionError> {
        let data = store.load()?;
        tracing::debug!(
            path = %store.path().display(),
            cycles = data.cycles.len(),
            days = data.days.len(),
            "session loaded"
        );
        let mut session = Self::in_memory(data);
        session.store = Some(store);
        Ok(session)
    }

    pub fn in_memory(data: AppData) -> Self {
        Self {
            own: data,
            partner: None,
            selected_date: today(),
            store: None,
            sync: None,
            share_window: ShareWindow::default(),
        }
    }

    pub fn with_sync(mut self, sync: RemoteSync) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_share_window(mut self, window: ShareWindow) -> Self {
        self.share_window = window;
        self
    }

    /// The active data: the partner snapshot while one is open.
    pub fn data(&self) -> &AppData {
        match &self.partner {
            Some(snapshot) => &snapshot.data,
            None => &self.own,
        }
    }

    fn data_mut(&mut self) -> &mut AppData {
        match &mut self.partner {
            Some(snapshot) => &mut snapshot.data,
            None => &mut self.own,
        }
    }

    fn own_mut(&mut self) -> Result<&mut AppData, SessionError> {
        if self.partner.is_some() {
            return Err(SessionError::ReadOnly);
        }
        Ok(&mut self.own)
    }

    pub fn is_read_only(&self) -> bool {
        self.partner.is_some()
    }

    pub fn partner_owner(&self) -> Option<&str> {
        self.partner.as_ref().map(|p| p.owner_name.as_str())
    }

    pub fn selected_date(&self) -> NaiveDate {
        self.selected_date
    }

    pub fn select_date(&mut self, date: NaiveDate) {
        self.selected_date = date;
    }

    pub fn predictor(&self) -> CyclePredictor<'_> {
        CyclePredictor::new(self.data())
    }

    pub fn prediction(&self, date: NaiveDate) -> Option<Prediction> {
        self.predictor().predict(date)
    }

    pub fn phase_for_date(&self, date: NaiveDate) -> Phase {
        phase_for_date(&self.predictor(), date)
    }

    pub fn is_fertile(&self, date: NaiveDate) -> bool {
        self.predictor().is_fertile(date)
    }

    pub fn fertility_level(&self, date: NaiveDate) -> Option<FertilityLevel> {
        let predictor = self.predictor();
        if !predictor.has_history() {
            return None;
        }
        Some(if predictor.is_fertile(date) {
            FertilityLevel::High
        } else if phase_for_date(&predictor, date) == Phase::Follicular {
            FertilityLevel::Medium
        } else {
            FertilityLevel::Low
        })
    }

    pub fn stats(&self) -> CycleStats {
        cycle_stats(&self.data().cycles)
    }

    /// The day entry for `date`, created on first touch. Its phase is
    /// recomputed from the current cycle model on every call.
    pub fn ensure_day(&mut self, date: NaiveDate) -> &mut DayEntry {
        let phase = self.phase_for_date(date);
        let entry = self.data_mut().days.entry(date).or_default();
        entry.phase = phase;
        entry
    }

    pub fn day_view(&mut self, date: NaiveDate) -> DayView {
        let entry = self.ensure_day(date).clone();
        let prediction = self.prediction(date);
        DayView {
            date,
            fertile: self.is_fertile(date),
            fertility: self.fertility_level(date),
            days_until_period: prediction
                .as_ref()
                .map(|p| days_diff(date, p.predicted_next_period)),
            days_until_ovulation: prediction.as_ref().map(|p| days_diff(date, p.ovulation_date)),
            prediction,
            entry,
        }
    }

    /// Late-period notice for `today`. Never raised without history.
    pub fn is_delayed(&self, today: NaiveDate) -> bool {
        let data = self.data();
        let Some(expected) = self.predictor().expected_next_start() else {
            return false;
        };
        delay::is_delayed(
            today,
            expected,
            data.settings.delay_threshold,
            data.remind_later_until,
        )
    }

    pub fn remind_later(&mut self, today: NaiveDate) -> Result<NaiveDate, SessionError> {
        let until = delay::snooze_until(today);
        self.own_mut()?.remind_later_until = Some(until);
        self.persist()?;
        Ok(until)
    }

    /// Length for a cycle starting at `start`: the gap to the latest earlier
    /// start, or `fallback` for the first record.
    fn length_for_new_cycle(&self, start: NaiveDate, fallback: u32) -> u32 {
        let raw = self
            .own
            .sorted_cycles()
            .iter()
            .rev()
            .find(|c| c.start_date < start)
            .map(|prev| days_diff(prev.start_date, start))
            .unwrap_or(fallback as i64);
        raw.clamp(MIN_CYCLE_LENGTH as i64, MAX_CYCLE_LENGTH as i64) as u32
    }

    fn existing_start(&self, start: NaiveDate) -> Option<CycleRecord> {
        self.own.cycles.iter().find(|c| c.start_date == start).cloned()
    }

    /// A start that is already recorded is returned as is. A new start clears
    /// any snooze.
    fn push_cycle(&mut self, start: NaiveDate, end: NaiveDate, length: u32) -> Result<CycleRecord, SessionError> {
        if let Some(existing) = self.existing_start(start) {
            tracing::debug!(start = %start, "cycle start already recorded");
            return Ok(existing);
        }
        let record = CycleRecord {
            id: Uuid::new_v4(),
            start_date: start,
            end_date: Some(end),
            length: Some(length),
            confirmed: true,
        };
        let data = self.own_mut()?;
        data.cycles.push(record.clone());
        data.remind_later_until = None;
        tracing::info!(start = %start, end = %end, length, "cycle recorded");
        Ok(record)
    }

    pub fn mark_period_start(&mut self, today: NaiveDate) -> Result<CycleRecord, SessionError> {
        self.own_mut()?;
        if let Some(existing) = self.existing_start(today) {
            return Ok(existing);
        }
        let predictor = CyclePredictor::new(&self.own);
        let end = shift_by(today, predictor.period_length() as i64 - 1);
        let fallback = predictor.cycle_length();
        let length = self.length_for_new_cycle(today, fallback);

        let record = self.push_cycle(today, end, length)?;
        self.persist()?;
        Ok(record)
    }

    pub fn add_cycle(&mut self, start: NaiveDate, end: NaiveDate) -> Result<CycleRecord, SessionError> {
        self.own_mut()?;
        let record = self.insert_period(start, end)?;
        self.persist()?;
        Ok(record)
    }

    fn insert_period(&mut self, start: NaiveDate, end: NaiveDate) -> Result<CycleRecord, SessionError> {
        if end < start {
            return Err(SessionError::InvalidRange { start, end });
        }
        let length = self.length_for_new_cycle(start, self.own.settings.rules.avg_cycle_length);
        self.push_cycle(start, end, length)
    }

    pub fn save_day(&mut self, date: NaiveDate, update: DayUpdate) -> Result<(), SessionError> {
        self.own_mut()?;
        if let Some((start, end)) = update.period {
            self.insert_period(start, end)?;
        }
        let entry = self.ensure_day(date);
        if let Some(intensity) = update.intensity {
            entry.intensity = Some(intensity.min(MAX_INTENSITY));
        }
        if let Some(mood) = update.mood {
            entry.mood = mood;
        }
        if let Some(symptoms) = update.symptoms {
            entry.symptoms = symptoms
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(note) = update.note {
            entry.note = note;
        }
        if let Some(intimacy) = update.intimacy {
            entry.intimacy = intimacy;
        }
        self.persist()
    }

    pub fn toggle_intimacy(&mut self, date: NaiveDate) -> Result<bool, SessionError> {
        self.own_mut()?;
        let entry = self.ensure_day(date);
        entry.intimacy = !entry.intimacy;
        let now = entry.intimacy;
        self.persist()?;
        Ok(now)
    }

    pub fn update_settings(&mut self, update: SettingsUpdate) -> Result<(), SessionError> {
        let settings = &mut self.own_mut()?.settings;
        if let Some(theme) = update.theme.filter(|t| !t.trim().is_empty()) {
            settings.theme = theme;
        }
        if let Some(threshold) = update.delay_threshold {
            settings.delay_threshold = threshold.clamp(1, MAX_DELAY_THRESHOLD);
        }
        if let Some(length) = update.avg_cycle_length {
            settings.rules.avg_cycle_length = length.clamp(MIN_CYCLE_LENGTH, MAX_CYCLE_LENGTH);
        }
        if let Some(length) = update.avg_period_length {
            settings.rules.avg_period_length = length.clamp(MIN_PERIOD_LENGTH, MAX_PERIOD_LENGTH);
        }
        self.persist()
    }

    /// Store the onboarding answers and seed the first cycle. Replaces any
    /// existing history.
    pub fn complete_onboarding(&mut self, answers: Onboarding, today: NaiveDate) -> Result<(), SessionError> {
        let data = self.own_mut()?;
        let cycle_length = answers.cycle_length.clamp(MIN_CYCLE_LENGTH, MAX_CYCLE_LENGTH);
        let period_length = answers.period_length.clamp(MIN_PERIOD_LENGTH, MAX_PERIOD_LENGTH);
        let start = answers.last_start.unwrap_or(today);

        data.profile = Profile {
            name: answers.name.trim().to_string(),
            email: normalize_email(&answers.email),
            flow_type: answers.flow_type,
            goal: answers.goal,
            onboarding_completed: true,
        };
        data.settings.rules = CycleRules {
            avg_cycle_length: cycle_length,
            avg_period_length: period_length,
            ..CycleRules::default()
        };
        data.cycles = vec![CycleRecord {
            id: Uuid::new_v4(),
            start_date: start,
            end_date: Some(shift_by(start, period_length as i64 - 1)),
            length: Some(cycle_length),
            confirmed: true,
        }];
        tracing::info!(start = %start, cycle_length, period_length, "onboarding completed");
        self.persist()
    }

    pub fn enable_notifications(&mut self, notifier: &dyn Notifier) -> Result<(), SessionError> {
        self.own_mut()?.settings.notifications = true;
        if let Some(prediction) = self.prediction(self.selected_date) {
            notify::schedule(notifier, &prediction);
        }
        self.persist()
    }

    pub fn create_share_token(&self, today: NaiveDate) -> Result<String, SessionError> {
        if self.is_read_only() {
            return Err(SessionError::ReadOnly);
        }
        if !self.own.profile.onboarding_completed {
            return Err(SessionError::OnboardingIncomplete);
        }
        Ok(share::encode(&self.own, today, self.share_window)?)
    }

    pub fn create_share_link(&self, base_url: &str, today: NaiveDate) -> Result<String, SessionError> {
        let token = self.create_share_token(today)?;
        Ok(share::share_link(base_url, &token)?)
    }

    /// Open a pasted link or token as the active, read-only context.
    pub fn enter_partner_mode(&mut self, raw: &str) -> Result<&SharedSnapshot, SessionError> {
        let snapshot = share::extract_share_token(raw)
            .and_then(|token| share::decode(&token))
            .ok_or(SessionError::InvalidShareLink)?;
        tracing::info!(
            owner = %snapshot.owner_name,
            cycles = snapshot.data.cycles.len(),
            days = snapshot.data.days.len(),
            "partner view opened"
        );
        self.selected_date = today();
        Ok(self.partner.insert(snapshot))
    }

    pub fn exit_partner_mode(&mut self) {
        if self.partner.take().is_some() {
            tracing::info!("partner view closed");
            self.selected_date = today();
        }
    }

    pub fn export_json(&self) -> Result<String, SessionError> {
        if self.is_read_only() {
            return Err(SessionError::ReadOnly);
        }
        Ok(serde_json::to_string_pretty(&self.own)?)
    }

    pub fn wipe_all_data(&mut self) -> Result<(), SessionError> {
        if let Some(store) = &self.store {
            store.wipe()?;
        }
        self.own = AppData::default();
        self.partner = None;
        tracing::info!("all local data wiped");
        Ok(())
    }

    /// What the server stores: the own data without the session section.
    pub fn remote_snapshot(&self) -> Result<Value, serde_json::Error> {
        let mut snapshot = self.own.clone();
        snapshot.session = SessionState::default();
        serde_json::to_value(snapshot)
    }

    pub async fn register(
        &mut self,
        remote: &dyn RemoteStore,
        email: &str,
        password: &str,
        name: &str,
    ) -> Result<(), SessionError> {
        self.own_mut()?;
        let password = password.trim();
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::PasswordTooShort);
        }
        let snapshot = self.remote_snapshot()?;
        let auth = remote
            .register(&normalize_email(email), password, name.trim(), &snapshot)
            .await?;
        self.apply_auth(auth)
    }

    pub async fn login(
        &mut self,
        remote: &dyn RemoteStore,
        email: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        self.own_mut()?;
        let auth = remote.login(&normalize_email(email), password.trim()).await?;
        self.apply_auth(auth)
    }

    /// Adopt the account returned by register/login. The server copy wins
    /// when it carries data; otherwise the local copy is kept.
    pub fn apply_auth(&mut self, auth: AuthResponse) -> Result<(), SessionError> {
        self.own_mut()?;
        let mut data = if auth.data.is_object() {
            normalize(&auth.data)
        } else {
            self.own.clone()
        };
        if !auth.user.name.trim().is_empty() {
            data.profile.name = auth.user.name.trim().to_string();
        }
        data.profile.email = normalize_email(&auth.user.email);
        data.profile.onboarding_completed = true;
        data.session = SessionState {
            logged_in: true,
            auth_token: auth.token,
            user_id: auth.user.id,
        };
        self.own = data;
        tracing::info!(email = %self.own.profile.email, "logged in");
        self.persist()
    }

    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.own_mut()?.session = SessionState::default();
        tracing::info!("logged out");
        self.persist()
    }

    pub async fn restore_remote(&mut self, remote: &dyn RemoteStore) -> Result<RestoreOutcome, SessionError> {
        if !self.own.session.has_token() {
            return Ok(RestoreOutcome::Skipped);
        }
        let token = self.own.session.auth_token.clone();
        match remote.get_user_data(&token).await {
            Ok(raw) => {
                let cached = &self.own;
                let mut merged = if raw.is_object() { normalize(&raw) } else { cached.clone() };
                if merged.profile.name.is_empty() {
                    merged.profile.name = cached.profile.name.clone();
                }
                if merged.profile.email.is_empty() {
                    merged.profile.email = cached.profile.email.clone();
                }
                merged.profile.onboarding_completed = true;
                merged.session = SessionState {
                    logged_in: true,
                    auth_token: token,
                    user_id: if merged.session.user_id.is_empty() {
                        cached.session.user_id.clone()
                    } else {
                        merged.session.user_id.clone()
                    },
                };
                self.own = merged;
                self.save_local()?;
                tracing::debug!("restored remote copy");
                Ok(RestoreOutcome::Restored)
            }
            Err(e) if e.is_auth_failure() => {
                tracing::warn!(error = %e, "stored session rejected, logging out");
                self.own.session = SessionState::default();
                self.save_local()?;
                Ok(RestoreOutcome::LoggedOut)
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote unavailable, using cached copy");
                Ok(RestoreOutcome::KeptLocal)
            }
        }
    }

    pub fn recommendation_request(&mut self, date: NaiveDate) -> RecommendationRequest {
        let entry = self.ensure_day(date).clone();
        let audience = if self.is_read_only() {
            Audience::Partner
        } else {
            Audience::Owner
        };
        let request = RecommendationRequest::build(date, &entry, &self.predictor(), audience);
        tracing::debug!(
            date = %date,
            hit = request.cached.is_some(),
            "recommendation cache lookup"
        );
        request
    }

    /// Write generated text to the day it was requested for. Returns whether
    /// that day is still the one being viewed.
    pub fn store_recommendation(
        &mut self,
        date: NaiveDate,
        signature: &str,
        text: &str,
    ) -> Result<bool, SessionError> {
        let entry = self.ensure_day(date);
        entry.ai_recommendation = Some(text.to_string());
        entry.ai_recommendation_signature = Some(signature.to_string());
        self.persist()?;
        Ok(self.selected_date == date)
    }

    fn save_local(&self) -> Result<(), SessionError> {
        if let Some(store) = &self.store {
            store.save(&self.own)?;
        }
        Ok(())
    }

    /// Write the own data locally, then schedule the upload. Nothing is
    /// written while a partner snapshot is active.
    fn persist(&mut self) -> Result<(), SessionError> {
        if self.partner.is_some() {
            return Ok(());
        }
        if self.sync.as_ref().map(RemoteSync::take_revoked).unwrap_or(false) {
            tracing::warn!("server revoked the session, logging out");
            self.own.session = SessionState::default();
        }
        self.save_local()?;

        let Some(sync) = &self.sync else {
            return Ok(());
        };
        if !self.own.session.has_token() || self.own.profile.email.is_empty() {
            return Ok(());
        }
        match self.remote_snapshot() {
            Ok(snapshot) => sync.schedule(&self.own.session.auth_token, snapshot),
            Err(e) => tracing::warn!(error = %e, "could not build remote snapshot"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteUser;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn onboarded() -> Session {
        let mut session = Session::in_memory(AppData::default());
        session
            .complete_onboarding(
                Onboarding {
                    name: "Anna".into(),
                    email: " Anna@Example.com ".into(),
                    cycle_length: 28,
                    period_length: 5,
                    last_start: Some(date("2024-01-01")),
                    ..Onboarding::default()
                },
                date("2024-01-10"),
            )
            .unwrap();
        session
    }

    #[test]
    fn onboarding_seeds_first_cycle() {
        let session = onboarded();
        let data = session.data();
        assert_eq!(data.profile.email, "anna@example.com");
        assert!(data.profile.onboarding_completed);
        assert_eq!(data.cycles.len(), 1);
        assert_eq!(data.cycles[0].end_date, Some(date("2024-01-05")));
        assert_eq!(session.phase_for_date(date("2024-01-13")), Phase::Ovulation);
    }

    #[test]
    fn mark_start_uses_gap_and_clears_snooze() {
        let mut session = onboarded();
        session.remind_later(date("2024-02-01")).unwrap();
        assert_eq!(session.data().remind_later_until, Some(date("2024-02-03")));

        let record = session.mark_period_start(date("2024-01-31")).unwrap();
        assert_eq!(record.length, Some(30));
        assert_eq!(record.end_date, Some(date("2024-02-04")));
        assert_eq!(session.data().remind_later_until, None);

        // Marking the same day twice does not add a record.
        session.mark_period_start(date("2024-01-31")).unwrap();
        assert_eq!(session.data().cycles.len(), 2);
    }

    #[test]
    fn every_recorded_start_clears_snooze() {
        let mut session = onboarded();
        session.remind_later(date("2024-02-01")).unwrap();
        session.add_cycle(date("2024-01-31"), date("2024-02-04")).unwrap();
        assert_eq!(session.data().remind_later_until, None);

        session.remind_later(date("2024-03-01")).unwrap();
        session
            .save_day(date("2024-03-01"), DayUpdate {
                mood: Some("calm".into()),
                period: Some((date("2024-02-29"), date("2024-03-03"))),
                ..DayUpdate::default()
            })
            .unwrap();
        assert_eq!(session.data().remind_later_until, None);
        assert_eq!(session.data().cycles.len(), 3);
    }

    #[test]
    fn add_cycle_keeps_one_record_per_start() {
        let mut session = onboarded();
        let first = session.add_cycle(date("2024-01-31"), date("2024-02-04")).unwrap();
        let again = session.add_cycle(date("2024-01-31"), date("2024-02-02")).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.end_date, Some(date("2024-02-04")));
        assert_eq!(session.data().cycles.len(), 2);
        assert_eq!(session.stats().total_cycles, 2);

        // A duplicate start leaves an active snooze alone.
        session.remind_later(date("2024-02-05")).unwrap();
        session.add_cycle(date("2024-01-31"), date("2024-02-04")).unwrap();
        assert_eq!(session.data().remind_later_until, Some(date("2024-02-07")));
    }

    #[test]
    fn add_cycle_rejects_inverted_range() {
        let mut session = onboarded();
        let err = session
            .add_cycle(date("2024-02-05"), date("2024-02-01"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidRange { .. }));
        assert_eq!(session.data().cycles.len(), 1);
    }

    #[test]
    fn phase_is_recomputed_on_every_fetch() {
        let mut session = onboarded();
        assert_eq!(session.ensure_day(date("2024-01-30")).phase, Phase::Menstrual);
        session.add_cycle(date("2024-01-25"), date("2024-01-27")).unwrap();
        assert_ne!(session.ensure_day(date("2024-01-30")).phase, Phase::Menstrual);
    }

    #[test]
    fn save_day_clamps_and_trims() {
        let mut session = onboarded();
        let d = date("2024-01-03");
        session
            .save_day(d, DayUpdate {
                intensity: Some(42),
                mood: Some("tired".into()),
                symptoms: Some(vec![" cramps ".into(), "".into()]),
                ..DayUpdate::default()
            })
            .unwrap();
        let view = session.day_view(d);
        assert_eq!(view.entry.intensity, Some(MAX_INTENSITY));
        assert_eq!(view.entry.symptoms, vec!["cramps"]);
        assert_eq!(view.entry.phase, Phase::Menstrual);
        assert_eq!(view.days_until_period, Some(26));
        assert!(session.toggle_intimacy(d).unwrap());
        assert!(!session.toggle_intimacy(d).unwrap());
    }

    #[test]
    fn fertility_levels() {
        let session = onboarded();
        assert_eq!(session.fertility_level(date("2024-01-14")), Some(FertilityLevel::High));
        assert_eq!(session.fertility_level(date("2024-01-08")), Some(FertilityLevel::Medium));
        assert_eq!(session.fertility_level(date("2024-01-22")), Some(FertilityLevel::Low));
        let empty = Session::in_memory(AppData::default());
        assert_eq!(empty.fertility_level(date("2024-01-14")), None);
    }

    #[test]
    fn delay_measured_against_last_recorded_start() {
        let mut session = onboarded();
        assert!(!session.is_delayed(date("2024-02-01")));
        assert!(session.is_delayed(date("2024-02-02")));
        session.remind_later(date("2024-02-02")).unwrap();
        assert!(!session.is_delayed(date("2024-02-04")));
        assert!(session.is_delayed(date("2024-02-05")));
        assert!(!Session::in_memory(AppData::default()).is_delayed(date("2024-02-05")));
    }

    #[test]
    fn sharing_requires_onboarding() {
        let session = Session::in_memory(AppData::default());
        assert!(matches!(
            session.create_share_token(date("2024-01-10")),
            Err(SessionError::OnboardingIncomplete)
        ));
    }

    #[test]
    fn partner_mode_is_read_only_and_separate() {
        let mut owner = onboarded();
        owner
            .save_day(date("2024-01-02"), DayUpdate {
                note: Some("hello".into()),
                ..DayUpdate::default()
            })
            .unwrap();
        let link = owner
            .create_share_link("https://cycle.example/", date("2024-01-10"))
            .unwrap();

        let mut reader = Session::in_memory(AppData::default());
        let snapshot = reader.enter_partner_mode(&link).unwrap();
        assert_eq!(snapshot.owner_name, "Anna");
        assert!(reader.is_read_only());
        assert_eq!(reader.data().cycles.len(), 1);
        assert_eq!(reader.phase_for_date(date("2024-01-13")), Phase::Ovulation);

        assert!(matches!(
            reader.mark_period_start(date("2024-02-01")),
            Err(SessionError::ReadOnly)
        ));
        assert!(matches!(
            reader.save_day(date("2024-01-02"), DayUpdate::default()),
            Err(SessionError::ReadOnly)
        ));
        assert!(matches!(reader.export_json(), Err(SessionError::ReadOnly)));

        reader.exit_partner_mode();
        assert!(!reader.is_read_only());
        assert!(reader.data().cycles.is_empty());
    }

    #[test]
    fn bad_link_enters_nothing() {
        let mut session = onboarded();
        assert!(matches!(
            session.enter_partner_mode("https://cycle.example/?p=garbage"),
            Err(SessionError::InvalidShareLink)
        ));
        assert!(!session.is_read_only());
    }

    #[test]
    fn edits_are_written_to_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("data.json"), None);
        let mut session = Session::open(store.clone()).unwrap();
        session.add_cycle(date("2024-01-01"), date("2024-01-05")).unwrap();
        assert_eq!(store.load().unwrap().cycles.len(), 1);

        session.wipe_all_data().unwrap();
        assert!(!store.exists());
        assert!(session.data().cycles.is_empty());
    }

    #[test]
    fn remote_snapshot_has_no_session() {
        let mut session = onboarded();
        session
            .apply_auth(AuthResponse {
                user: RemoteUser {
                    id: "u1".into(),
                    email: "anna@example.com".into(),
                    name: "Anna".into(),
                },
                token: "tok".into(),
                data: Value::Null,
            })
            .unwrap();
        assert!(session.data().session.has_token());
        assert_eq!(session.data().cycles.len(), 1);

        let snapshot = session.remote_snapshot().unwrap();
        assert_eq!(snapshot["session"]["authToken"], json!(""));
        assert_eq!(snapshot["session"]["loggedIn"], json!(false));
    }

    struct FakeRemote {
        data: Result<Value, (u16, &'static str)>,
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl RemoteStore for FakeRemote {
        async fn register(&self, _: &str, _: &str, _: &str, _: &Value) -> Result<AuthResponse, RemoteError> {
            Err(RemoteError::InvalidResponse)
        }

        async fn login(&self, email: &str, _: &str) -> Result<AuthResponse, RemoteError> {
            Ok(AuthResponse {
                user: RemoteUser {
                    id: "u1".into(),
                    email: email.into(),
                    name: "Server Anna".into(),
                },
                token: "fresh".into(),
                data: self.data.clone().unwrap_or(Value::Null),
            })
        }

        async fn get_user_data(&self, _: &str) -> Result<Value, RemoteError> {
            *self.calls.lock().unwrap() += 1;
            self.data.clone().map_err(|(status, code)| RemoteError::Api {
                status,
                code: code.into(),
                message: String::new(),
            })
        }

        async fn put_user_data(&self, _: &str, _: &Value) -> Result<String, RemoteError> {
            Ok(String::new())
        }
    }

    fn logged_in() -> Session {
        let mut data = onboarded().data().clone();
        data.session = SessionState {
            logged_in: true,
            auth_token: "tok".into(),
            user_id: "u1".into(),
        };
        Session::in_memory(data)
    }

    #[tokio::test]
    async fn restore_replaces_local_copy() {
        let remote = FakeRemote {
            data: Ok(json!({
                "cycles": [{ "startDate": "2024-02-01", "endDate": "2024-02-04", "length": 31 }],
                "profile": { "name": "Anna" }
            })),
            calls: Mutex::new(0),
        };
        let mut session = logged_in();
        let outcome = session.restore_remote(&remote).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::Restored);
        assert_eq!(session.data().cycles[0].start_date, date("2024-02-01"));
        assert_eq!(session.data().profile.email, "anna@example.com");
        assert_eq!(session.data().session.auth_token, "tok");
        assert_eq!(session.data().session.user_id, "u1");
    }

    #[tokio::test]
    async fn rejected_token_logs_out_and_keeps_data() {
        let remote = FakeRemote {
            data: Err((401, "INVALID_TOKEN")),
            calls: Mutex::new(0),
        };
        let mut session = logged_in();
        let outcome = session.restore_remote(&remote).await.unwrap();
        assert_eq!(outcome, RestoreOutcome::LoggedOut);
        assert!(!session.data().session.logged_in);
        assert_eq!(session.data().cycles.len(), 1);
    }

    #[tokio::test]
    async fn server_failure_keeps_cache() {
        let remote = FakeRemote {
            data: Err((500, "INTERNAL")),
            calls: Mutex::new(0),
        };
        let mut session = logged_in();
        assert_eq!(session.restore_remote(&remote).await.unwrap(), RestoreOutcome::KeptLocal);
        assert!(session.data().session.logged_in);

        let mut anonymous = onboarded();
        assert_eq!(anonymous.restore_remote(&remote).await.unwrap(), RestoreOutcome::Skipped);
        assert_eq!(*remote.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn login_adopts_server_account() {
        let remote = FakeRemote {
            data: Err((500, "")),
            calls: Mutex::new(0),
        };
        let mut session = onboarded();
        session.login(&remote, " ANNA@example.com", "secret").await.unwrap();
        assert_eq!(session.data().profile.name, "Server Anna");
        assert_eq!(session.data().session.auth_token, "fresh");
        assert_eq!(session.data().cycles.len(), 1);

        assert!(matches!(
            session.register(&remote, "a@b.c", " 12 ", "A").await,
            Err(SessionError::PasswordTooShort)
        ));
    }
}
