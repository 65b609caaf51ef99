use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use tracing::warn;

use super::domain::{LessonLocation, LocationKind, TutorId, TutorProfile};
use super::repository::{RepositoryError, TutorDirectory};
use super::scores::TutorScoreStore;

/// In-person trials shorter than this require the tutor's opt-in flag.
const SHORT_TRIAL_MINUTES: u32 = 60;

/// External travel-time lookup (Places/Maps provider). Failures degrade the
/// candidate to an unknown travel time rather than failing the match.
pub trait TravelTimeProvider: Send + Sync {
    fn travel_minutes(&self, from_suburb: &str, destination: &str) -> Result<u32, TravelTimeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TravelTimeError {
    #[error("travel time provider unavailable: {0}")]
    Unavailable(String),
    #[error("no route between {from} and {to}")]
    NoRoute { from: String, to: String },
}

/// What a session needs from a tutor, extracted from its first lesson.
#[derive(Debug, Clone)]
pub struct MatchRequirements {
    pub subject: String,
    pub location: LessonLocation,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: u32,
}

/// One ranked candidate in a match result.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub tutor_id: TutorId,
    pub full_name: String,
    pub suburb: String,
    pub composite_score: f64,
    pub travel_minutes: Option<u32>,
    pub travel_time_text: String,
    /// True when the travel provider failed and a neutral unknown was substituted.
    pub travel_time_degraded: bool,
    pub from_waitlist: bool,
}

/// Orders candidate tutors for a session: composite score descending, travel
/// time ascending, tutor id as the final deterministic tie-break.
pub struct MatchRanker<D> {
    directory: Arc<D>,
    scores: Arc<TutorScoreStore>,
    travel: Arc<dyn TravelTimeProvider>,
}

impl<D> MatchRanker<D>
where
    D: TutorDirectory,
{
    pub fn new(
        directory: Arc<D>,
        scores: Arc<TutorScoreStore>,
        travel: Arc<dyn TravelTimeProvider>,
    ) -> Self {
        Self {
            directory,
            scores,
            travel,
        }
    }

    /// Rank eligible tutors for the given requirements. `waitlisted` is the
    /// fallback pool consulted only when the primary subject pool filters to
    /// nothing; entries there registered interest explicitly, so the
    /// eligibility filter does not re-apply to them. An empty result is not
    /// an error; the caller decides whether it constitutes a failed session.
    pub fn rank(
        &self,
        requirements: &MatchRequirements,
        waitlisted: &[TutorId],
    ) -> Result<Vec<RankedCandidate>, RepositoryError> {
        let primary: Vec<TutorProfile> = self
            .directory
            .profiles_for_subject(&requirements.subject)?
            .into_iter()
            .filter(|profile| self.eligible(profile, requirements))
            .collect();

        let from_waitlist = primary.is_empty();
        let pool = if from_waitlist {
            let mut fallback = Vec::new();
            for tutor_id in waitlisted {
                if let Some(profile) = self.directory.fetch_profile(tutor_id)? {
                    fallback.push(profile);
                }
            }
            fallback
        } else {
            primary
        };

        let mut candidates: Vec<RankedCandidate> = pool
            .into_iter()
            .map(|profile| self.candidate(profile, requirements, from_waitlist))
            .collect();

        candidates.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| {
                    a.travel_minutes
                        .unwrap_or(u32::MAX)
                        .cmp(&b.travel_minutes.unwrap_or(u32::MAX))
                })
                .then_with(|| a.tutor_id.cmp(&b.tutor_id))
        });

        Ok(candidates)
    }

    fn eligible(&self, profile: &TutorProfile, requirements: &MatchRequirements) -> bool {
        if !profile.covers_subject(&requirements.subject) {
            return false;
        }
        if !profile.available_at(requirements.scheduled_at.hour() as u8) {
            return false;
        }
        let short_in_person = requirements.location.kind != LocationKind::Online
            && requirements.duration_minutes < SHORT_TRIAL_MINUTES;
        if short_in_person && !profile.accepts_short_face_to_face_trials {
            return false;
        }
        true
    }

    fn candidate(
        &self,
        profile: TutorProfile,
        requirements: &MatchRequirements,
        from_waitlist: bool,
    ) -> RankedCandidate {
        let (travel_minutes, travel_time_text, travel_time_degraded) =
            if requirements.location.kind == LocationKind::Online {
                (Some(0), "online".to_string(), false)
            } else {
                match self
                    .travel
                    .travel_minutes(&profile.suburb, &requirements.location.raw)
                {
                    Ok(minutes) => (Some(minutes), format!("{minutes} min"), false),
                    Err(error) => {
                        warn!(tutor = %profile.id.0, %error, "travel time lookup failed, ranking with unknown");
                        (None, "unknown".to_string(), true)
                    }
                }
            };

        RankedCandidate {
            composite_score: self.scores.composite(&profile.id),
            tutor_id: profile.id,
            full_name: profile.full_name,
            suburb: profile.suburb,
            travel_minutes,
            travel_time_text,
            travel_time_degraded,
            from_waitlist,
        }
    }
}
