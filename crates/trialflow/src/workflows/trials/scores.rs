use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::domain::{TutorId, TutorScore};

/// Which ranking component an admin or outcome event is adjusting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreComponent {
    Success,
    Reliability,
    Availability,
}

/// Serializable snapshot of one tutor's ranking inputs and derived composite.
#[derive(Debug, Clone, Serialize)]
pub struct TutorScoreView {
    pub tutor_id: TutorId,
    pub score_success: f64,
    pub score_reliability: f64,
    pub score_availability: f64,
    pub composite_score: f64,
}

/// Holds per-tutor ranking inputs. Tutors without a record read back the
/// default 5.0 per component so a missing history never zero-floors the
/// multiplicative composite.
///
/// The composite is derived on every read, never stored, so it can never
/// drift from its inputs.
#[derive(Debug, Default)]
pub struct TutorScoreStore {
    scores: Mutex<HashMap<TutorId, TutorScore>>,
}

impl TutorScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tutor_id: &TutorId) -> TutorScore {
        let guard = self.scores.lock().expect("score mutex poisoned");
        guard.get(tutor_id).copied().unwrap_or_default()
    }

    pub fn composite(&self, tutor_id: &TutorId) -> f64 {
        self.get(tutor_id).composite()
    }

    /// Set one component, clamped to [0, 10].
    pub fn set_component(&self, tutor_id: &TutorId, component: ScoreComponent, value: f64) {
        let mut guard = self.scores.lock().expect("score mutex poisoned");
        let score = guard.entry(tutor_id.clone()).or_default();
        match component {
            ScoreComponent::Success => score.set_success(value),
            ScoreComponent::Reliability => score.set_reliability(value),
            ScoreComponent::Availability => score.set_availability(value),
        }
    }

    /// Shift one component by `delta`, clamped to [0, 10]. Used by outcome
    /// events (acceptances, declines, continuations).
    pub fn adjust(&self, tutor_id: &TutorId, component: ScoreComponent, delta: f64) {
        let mut guard = self.scores.lock().expect("score mutex poisoned");
        let score = guard.entry(tutor_id.clone()).or_default();
        match component {
            ScoreComponent::Success => score.set_success(score.success() + delta),
            ScoreComponent::Reliability => score.adjust_reliability(delta),
            ScoreComponent::Availability => score.set_availability(score.availability() + delta),
        }
    }

    /// Shift reliability by `delta` (negative for penalties), clamped to [0, 10].
    pub fn adjust_reliability(&self, tutor_id: &TutorId, delta: f64) -> f64 {
        let mut guard = self.scores.lock().expect("score mutex poisoned");
        let score = guard.entry(tutor_id.clone()).or_default();
        score.adjust_reliability(delta);
        score.reliability()
    }

    pub fn view(&self, tutor_id: &TutorId) -> TutorScoreView {
        let score = self.get(tutor_id);
        TutorScoreView {
            tutor_id: tutor_id.clone(),
            score_success: score.success(),
            score_reliability: score.reliability(),
            score_availability: score.availability(),
            composite_score: score.composite(),
        }
    }
}
