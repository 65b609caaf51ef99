use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::clock::Clock;

use super::domain::{
    AnalysisId, CancellationAnalysis, TrialSession, TutorId, ValidationError,
};
use super::repository::TrialStore;
use super::scores::TutorScoreStore;
use super::service::EngineError;

static ANALYSIS_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_analysis_id() -> AnalysisId {
    let id = ANALYSIS_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AnalysisId(format!("ca-{id:06}"))
}

const SCORER_ATTEMPTS: u32 = 3;
const SCORER_BACKOFF: Duration = Duration::from_millis(50);

/// Sentiment score used when the external scorer stays unavailable.
pub const NEUTRAL_SENTIMENT: f64 = 0.5;

/// Opaque external scorer for cancellation reasons, returning a score in [0, 1].
pub trait SentimentScorer: Send + Sync {
    fn score(&self, reason_text: &str) -> Result<f64, ScorerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("sentiment scorer unavailable: {0}")]
    Unavailable(String),
}

/// Policy parameters for the penalty curve.
#[derive(Debug, Clone, Copy)]
pub struct PenaltyPolicy {
    pub max_penalty: f64,
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        Self { max_penalty: 5.0 }
    }
}

/// Weight for the notice period: cancelling at or after the lesson start
/// carries full weight, and weight decays as notice grows.
fn notice_factor(notice_hours: f64) -> f64 {
    if notice_hours < 0.0 {
        1.0
    } else if notice_hours < 6.0 {
        0.9
    } else if notice_hours < 24.0 {
        0.7
    } else if notice_hours < 72.0 {
        0.4
    } else {
        0.2
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Deterministic penalty curve: monotonically non-increasing in notice and in
/// sentiment. Low notice plus low sentiment yields the largest magnitude.
pub fn calculated_penalty(policy: &PenaltyPolicy, notice_hours: f64, sentiment: f64) -> f64 {
    let sentiment = sentiment.clamp(0.0, 1.0);
    round2(policy.max_penalty * notice_factor(notice_hours) * (1.0 - sentiment))
}

/// Computes provisional cancellation penalties, applies them to the score
/// store, and accepts audited admin overrides.
pub struct CancellationPenaltyEngine<S> {
    store: Arc<S>,
    scores: Arc<TutorScoreStore>,
    scorer: Arc<dyn SentimentScorer>,
    clock: Arc<dyn Clock>,
    policy: PenaltyPolicy,
}

impl<S> CancellationPenaltyEngine<S>
where
    S: TrialStore,
{
    pub fn new(
        store: Arc<S>,
        scores: Arc<TutorScoreStore>,
        scorer: Arc<dyn SentimentScorer>,
        clock: Arc<dyn Clock>,
        policy: PenaltyPolicy,
    ) -> Self {
        Self {
            store,
            scores,
            scorer,
            clock,
            policy,
        }
    }

    /// Analyze one cancellation event: compute the signed notice period, score
    /// the reason, derive the penalty, and apply it to the tutor's
    /// reliability. Scorer outages degrade to a flagged neutral score so the
    /// workflow never blocks on the external service.
    pub fn analyze(
        &self,
        session: &TrialSession,
        tutor_id: &TutorId,
        reason_text: String,
    ) -> Result<CancellationAnalysis, EngineError> {
        let now = self.clock.now();
        let scheduled_at = session
            .first_lesson()
            .ok_or(ValidationError::NoLessons)?
            .scheduled_at;
        let notice_hours = (scheduled_at - now).num_minutes() as f64 / 60.0;

        let (ai_sentiment_score, scorer_degraded) = self.score_with_retry(&reason_text);
        let penalty = calculated_penalty(&self.policy, notice_hours, ai_sentiment_score);
        self.scores.adjust_reliability(tutor_id, -penalty);

        let analysis = CancellationAnalysis {
            id: next_analysis_id(),
            session_id: session.id.clone(),
            tutor_id: tutor_id.clone(),
            reason_text,
            notice_hours,
            ai_sentiment_score,
            scorer_degraded,
            calculated_penalty: penalty,
            final_penalty: None,
            admin_override: false,
            override_reason: None,
            overridden_by: None,
            overridden_at: None,
            created_at: now,
        };
        self.store.insert_analysis(analysis.clone())?;
        Ok(analysis)
    }

    /// Replace the effective penalty with an admin decision. Requires a
    /// non-empty reason and records who acted and when; the delta between the
    /// prior effective penalty and the new one flows into the tutor's
    /// reliability, clamped to [0, 10].
    pub fn override_penalty(
        &self,
        analysis_id: &AnalysisId,
        override_penalty: f64,
        reason: &str,
        admin_id: &str,
    ) -> Result<CancellationAnalysis, EngineError> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingReason.into());
        }

        let mut analysis = self
            .store
            .fetch_analysis(analysis_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "cancellation analysis",
                id: analysis_id.0.clone(),
            })?;

        let prior = analysis.effective_penalty();
        self.scores
            .adjust_reliability(&analysis.tutor_id, prior - override_penalty);

        analysis.final_penalty = Some(override_penalty);
        analysis.admin_override = true;
        analysis.override_reason = Some(reason.trim().to_string());
        analysis.overridden_by = Some(admin_id.to_string());
        analysis.overridden_at = Some(self.clock.now());
        self.store.update_analysis(analysis.clone())?;
        Ok(analysis)
    }

    fn score_with_retry(&self, reason_text: &str) -> (f64, bool) {
        for attempt in 1..=SCORER_ATTEMPTS {
            match self.scorer.score(reason_text) {
                Ok(score) => return (score.clamp(0.0, 1.0), false),
                Err(error) => {
                    warn!(%error, attempt, "sentiment scorer call failed");
                    if attempt < SCORER_ATTEMPTS {
                        // Blocking backoff, worst case 150ms in total before
                        // the neutral fallback.
                        std::thread::sleep(SCORER_BACKOFF * attempt);
                    }
                }
            }
        }
        warn!("sentiment scorer unavailable, proceeding with neutral score");
        (NEUTRAL_SENTIMENT, true)
    }
}
