use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use metrics_exporter_prometheus::PrometheusHandle;
use trialflow::workflows::trials::{
    AnalysisId, AttemptId, CancellationAnalysis, OutreachAttempt, RepositoryError, RescheduleId,
    RescheduleRequest, RescheduleStatus, ScorerError, SentimentScorer, SessionId, TravelTimeError,
    TravelTimeProvider, TrialSession, TrialStore, TutorDirectory, TutorId, TutorProfile,
    WaitlistEntry,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryTrialStore {
    sessions: Arc<Mutex<HashMap<SessionId, TrialSession>>>,
    attempts: Arc<Mutex<HashMap<AttemptId, OutreachAttempt>>>,
    reschedules: Arc<Mutex<HashMap<RescheduleId, RescheduleRequest>>>,
    waitlist: Arc<Mutex<Vec<WaitlistEntry>>>,
    analyses: Arc<Mutex<HashMap<AnalysisId, CancellationAnalysis>>>,
}

impl TrialStore for InMemoryTrialStore {
    fn insert_session(&self, session: TrialSession) -> Result<TrialSession, RepositoryError> {
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        if guard.contains_key(&session.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn update_session(&self, session: TrialSession) -> Result<(), RepositoryError> {
        let mut guard = self.sessions.lock().expect("session mutex poisoned");
        if guard.contains_key(&session.id) {
            guard.insert(session.id.clone(), session);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_session(&self, id: &SessionId) -> Result<Option<TrialSession>, RepositoryError> {
        let guard = self.sessions.lock().expect("session mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn insert_attempts(&self, attempts: Vec<OutreachAttempt>) -> Result<(), RepositoryError> {
        let mut guard = self.attempts.lock().expect("attempt mutex poisoned");
        for attempt in attempts {
            guard.insert(attempt.id.clone(), attempt);
        }
        Ok(())
    }

    fn update_attempt(&self, attempt: OutreachAttempt) -> Result<(), RepositoryError> {
        let mut guard = self.attempts.lock().expect("attempt mutex poisoned");
        if guard.contains_key(&attempt.id) {
            guard.insert(attempt.id.clone(), attempt);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_attempt(&self, id: &AttemptId) -> Result<Option<OutreachAttempt>, RepositoryError> {
        let guard = self.attempts.lock().expect("attempt mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn attempts_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<OutreachAttempt>, RepositoryError> {
        let guard = self.attempts.lock().expect("attempt mutex poisoned");
        let mut attempts: Vec<OutreachAttempt> = guard
            .values()
            .filter(|attempt| &attempt.session_id == session_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| a.id.0.cmp(&b.id.0));
        Ok(attempts)
    }

    fn clear_attempts(&self, session_id: &SessionId) -> Result<(), RepositoryError> {
        let mut guard = self.attempts.lock().expect("attempt mutex poisoned");
        guard.retain(|_, attempt| &attempt.session_id != session_id);
        Ok(())
    }

    fn insert_reschedule(&self, request: RescheduleRequest) -> Result<(), RepositoryError> {
        let mut guard = self.reschedules.lock().expect("reschedule mutex poisoned");
        if guard.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(request.id.clone(), request);
        Ok(())
    }

    fn update_reschedule(&self, request: RescheduleRequest) -> Result<(), RepositoryError> {
        let mut guard = self.reschedules.lock().expect("reschedule mutex poisoned");
        if guard.contains_key(&request.id) {
            guard.insert(request.id.clone(), request);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_reschedule(
        &self,
        id: &RescheduleId,
    ) -> Result<Option<RescheduleRequest>, RepositoryError> {
        let guard = self.reschedules.lock().expect("reschedule mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn pending_reschedules(&self) -> Result<Vec<RescheduleRequest>, RepositoryError> {
        let guard = self.reschedules.lock().expect("reschedule mutex poisoned");
        Ok(guard
            .values()
            .filter(|request| request.status == RescheduleStatus::Pending)
            .cloned()
            .collect())
    }

    fn upsert_waitlist(&self, entry: WaitlistEntry) -> Result<(), RepositoryError> {
        let mut guard = self.waitlist.lock().expect("waitlist mutex poisoned");
        if !guard
            .iter()
            .any(|e| e.session_id == entry.session_id && e.tutor_id == entry.tutor_id)
        {
            guard.push(entry);
        }
        Ok(())
    }

    fn waitlist_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<WaitlistEntry>, RepositoryError> {
        let guard = self.waitlist.lock().expect("waitlist mutex poisoned");
        Ok(guard
            .iter()
            .filter(|entry| &entry.session_id == session_id)
            .cloned()
            .collect())
    }

    fn insert_analysis(&self, analysis: CancellationAnalysis) -> Result<(), RepositoryError> {
        let mut guard = self.analyses.lock().expect("analysis mutex poisoned");
        if guard.contains_key(&analysis.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(analysis.id.clone(), analysis);
        Ok(())
    }

    fn update_analysis(&self, analysis: CancellationAnalysis) -> Result<(), RepositoryError> {
        let mut guard = self.analyses.lock().expect("analysis mutex poisoned");
        if guard.contains_key(&analysis.id) {
            guard.insert(analysis.id.clone(), analysis);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_analysis(
        &self,
        id: &AnalysisId,
    ) -> Result<Option<CancellationAnalysis>, RepositoryError> {
        let guard = self.analyses.lock().expect("analysis mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryTutorDirectory {
    profiles: Arc<Mutex<HashMap<TutorId, TutorProfile>>>,
}

impl InMemoryTutorDirectory {
    /// Directory seeded with a small roster, until the tutor platform feeds
    /// profiles in over its own channel.
    pub(crate) fn seeded() -> Self {
        let directory = Self::default();
        let roster = [
            ("tut-001", "Sarah Lim", "Chatswood", vec!["Mathematics", "Physics"], 8, 20, true),
            ("tut-002", "Marcus Okafor", "Epping", vec!["Mathematics", "Chemistry"], 9, 21, true),
            ("tut-003", "Elena Petrova", "Hornsby", vec!["English", "History"], 10, 18, false),
            ("tut-004", "James Wu", "Parramatta", vec!["Mathematics", "English"], 7, 19, true),
        ];
        {
            let mut guard = directory.profiles.lock().expect("directory mutex poisoned");
            for (id, name, suburb, subjects, start, end, short_ok) in roster {
                guard.insert(
                    TutorId(id.to_string()),
                    TutorProfile {
                        id: TutorId(id.to_string()),
                        full_name: name.to_string(),
                        suburb: suburb.to_string(),
                        subjects: subjects.into_iter().map(str::to_string).collect(),
                        available_start_hour: start,
                        available_end_hour: end,
                        accepts_short_face_to_face_trials: short_ok,
                    },
                );
            }
        }
        directory
    }
}

impl TutorDirectory for InMemoryTutorDirectory {
    fn fetch_profile(&self, id: &TutorId) -> Result<Option<TutorProfile>, RepositoryError> {
        let guard = self.profiles.lock().expect("directory mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn profiles_for_subject(&self, subject: &str) -> Result<Vec<TutorProfile>, RepositoryError> {
        let guard = self.profiles.lock().expect("directory mutex poisoned");
        Ok(guard
            .values()
            .filter(|profile| profile.covers_subject(subject))
            .cloned()
            .collect())
    }
}

/// Travel estimator backed by a static suburb table. Stands in for the maps
/// provider integration; unknown suburbs surface as provider failures so the
/// engine exercises its degraded path.
#[derive(Default)]
pub(crate) struct SuburbTravelEstimator;

impl TravelTimeProvider for SuburbTravelEstimator {
    fn travel_minutes(&self, from_suburb: &str, destination: &str) -> Result<u32, TravelTimeError> {
        let minutes = match from_suburb {
            "Chatswood" => 12,
            "Epping" => 22,
            "Hornsby" => 35,
            "Parramatta" => 28,
            _ => {
                return Err(TravelTimeError::NoRoute {
                    from: from_suburb.to_string(),
                    to: destination.to_string(),
                })
            }
        };
        Ok(minutes)
    }
}

/// Keyword heuristic standing in for the hosted sentiment model. Scores fall
/// in [0, 1]: apologetic reasons score high, dismissive ones low.
#[derive(Default)]
pub(crate) struct KeywordSentimentScorer;

const APOLOGETIC: &[&str] = &["sorry", "apolog", "emergency", "unwell", "sick", "hospital"];
const DISMISSIVE: &[&str] = &["waste", "not worth", "can't be bothered", "whatever"];

impl SentimentScorer for KeywordSentimentScorer {
    fn score(&self, reason_text: &str) -> Result<f64, ScorerError> {
        let lowered = reason_text.to_ascii_lowercase();
        let mut score: f64 = 0.5;
        for marker in APOLOGETIC {
            if lowered.contains(marker) {
                score += 0.15;
            }
        }
        for marker in DISMISSIVE {
            if lowered.contains(marker) {
                score -= 0.2;
            }
        }
        Ok(score.clamp(0.0, 1.0))
    }
}
