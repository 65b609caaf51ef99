use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::clock::ManualClock;
use crate::workflows::trials::domain::{
    AnalysisId, AttemptId, CancellationAnalysis, OutreachAttempt, RescheduleId, RescheduleRequest,
    RescheduleStatus, SessionId, TrialSession, TutorId, TutorProfile, WaitlistEntry,
};
use crate::workflows::trials::penalty::{ScorerError, SentimentScorer};
use crate::workflows::trials::ranking::{TravelTimeError, TravelTimeProvider};
use crate::workflows::trials::repository::{RepositoryError, TrialStore, TutorDirectory};
use crate::workflows::trials::service::{
    EngineSettings, FeedbackInput, NewLesson, NewSession, SessionStateMachine,
};

/// Fixed "now" every test starts from.
pub(super) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("valid base time")
}

/// The default lesson start: two days out, 10:00 UTC.
pub(super) fn lesson_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0)
        .single()
        .expect("valid lesson time")
}

pub(super) fn new_session() -> NewSession {
    NewSession {
        parent_name: "Priya Narayan".to_string(),
        parent_email: "priya@example.com".to_string(),
        location: "Chatswood Library".to_string(),
        lessons: vec![NewLesson {
            subject: "Mathematics".to_string(),
            student_name: "Anika".to_string(),
            student_grade: "Year 8".to_string(),
            scheduled_at: lesson_time(),
            timezone: "Australia/Sydney".to_string(),
            duration_minutes: 60,
        }],
    }
}

pub(super) fn online_session() -> NewSession {
    let mut session = new_session();
    session.location = "Online (Zoom)".to_string();
    session
}

pub(super) fn profile(id: &str, suburb: &str) -> TutorProfile {
    TutorProfile {
        id: TutorId(id.to_string()),
        full_name: format!("Tutor {id}"),
        suburb: suburb.to_string(),
        subjects: vec!["Mathematics".to_string(), "Physics".to_string()],
        available_start_hour: 8,
        available_end_hour: 20,
        accepts_short_face_to_face_trials: true,
    }
}

/// A paragraph with exactly `words` words, for feedback validation tests.
pub(super) fn text_of(words: usize) -> String {
    vec!["progress"; words].join(" ")
}

pub(super) fn feedback(assessment_words: usize, section_words: usize) -> FeedbackInput {
    FeedbackInput {
        assessment: text_of(assessment_words),
        suggestions: text_of(section_words),
        plan: text_of(section_words),
    }
}

pub(super) fn valid_feedback() -> FeedbackInput {
    feedback(40, 30)
}

#[derive(Default)]
pub(super) struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, TrialSession>>,
    attempts: Mutex<HashMap<AttemptId, OutreachAttempt>>,
    reschedules: Mutex<HashMap<RescheduleId, RescheduleRequest>>,
    waitlist: Mutex<Vec<WaitlistEntry>>,
    analyses: Mutex<HashMap<AnalysisId, CancellationAnalysis>>,
}

impl TrialStore for MemoryStore {
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
        if !guard.contains_key(&session.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(session.id.clone(), session);
        Ok(())
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
        if !guard.contains_key(&attempt.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(attempt.id.clone(), attempt);
        Ok(())
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
        if !guard.contains_key(&request.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(request.id.clone(), request);
        Ok(())
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
        if !guard.contains_key(&analysis.id) {
            return Err(RepositoryError::NotFound);
        }
        guard.insert(analysis.id.clone(), analysis);
        Ok(())
    }

    fn fetch_analysis(
        &self,
        id: &AnalysisId,
    ) -> Result<Option<CancellationAnalysis>, RepositoryError> {
        let guard = self.analyses.lock().expect("analysis mutex poisoned");
        Ok(guard.get(id).cloned())
    }
}

#[derive(Default)]
pub(super) struct MemoryDirectory {
    profiles: Mutex<HashMap<TutorId, TutorProfile>>,
}

impl MemoryDirectory {
    pub(super) fn add(&self, profile: TutorProfile) {
        let mut guard = self.profiles.lock().expect("directory mutex poisoned");
        guard.insert(profile.id.clone(), profile);
    }
}

impl TutorDirectory for MemoryDirectory {
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

/// Travel provider with a fixed minutes-per-suburb table.
#[derive(Default)]
pub(super) struct TableTravel {
    minutes: Mutex<HashMap<String, u32>>,
}

impl TableTravel {
    pub(super) fn set(&self, suburb: &str, minutes: u32) {
        self.minutes
            .lock()
            .expect("travel mutex poisoned")
            .insert(suburb.to_string(), minutes);
    }
}

impl TravelTimeProvider for TableTravel {
    fn travel_minutes(&self, from_suburb: &str, _destination: &str) -> Result<u32, TravelTimeError> {
        let guard = self.minutes.lock().expect("travel mutex poisoned");
        guard
            .get(from_suburb)
            .copied()
            .ok_or_else(|| TravelTimeError::Unavailable("no table entry".to_string()))
    }
}

pub(super) struct FixedScorer(pub(super) f64);

impl SentimentScorer for FixedScorer {
    fn score(&self, _reason_text: &str) -> Result<f64, ScorerError> {
        Ok(self.0)
    }
}

pub(super) struct FailingScorer;

impl SentimentScorer for FailingScorer {
    fn score(&self, _reason_text: &str) -> Result<f64, ScorerError> {
        Err(ScorerError::Unavailable("scorer offline".to_string()))
    }
}

pub(super) type TestMachine = SessionStateMachine<MemoryStore, MemoryDirectory>;

pub(super) struct Harness {
    pub(super) machine: Arc<TestMachine>,
    pub(super) store: Arc<MemoryStore>,
    pub(super) directory: Arc<MemoryDirectory>,
    pub(super) travel: Arc<TableTravel>,
    pub(super) clock: Arc<ManualClock>,
}

pub(super) fn harness() -> Harness {
    harness_with_scorer(Arc::new(FixedScorer(0.5)))
}

pub(super) fn harness_with_scorer(scorer: Arc<dyn SentimentScorer>) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let directory = Arc::new(MemoryDirectory::default());
    let travel = Arc::new(TableTravel::default());
    let clock = Arc::new(ManualClock::new(base_time()));

    for (id, suburb, minutes) in [
        ("t-alpha", "Chatswood", 10),
        ("t-bravo", "Epping", 25),
        ("t-charlie", "Hornsby", 40),
    ] {
        directory.add(profile(id, suburb));
        travel.set(suburb, minutes);
    }

    let machine = Arc::new(SessionStateMachine::new(
        store.clone(),
        directory.clone(),
        travel.clone(),
        scorer,
        clock.clone(),
        EngineSettings::default(),
    ));

    Harness {
        machine,
        store,
        directory,
        travel,
        clock,
    }
}

impl Harness {
    /// Create a session and run outreach through to confirmation for `tutor`.
    pub(super) fn confirmed_session(&self, tutor: &str) -> TrialSession {
        let session = self
            .machine
            .create_session(new_session())
            .expect("session created");
        self.machine
            .start_outreach(&session.id, &[TutorId(tutor.to_string())])
            .expect("outreach started");
        let attempt = self
            .store
            .attempts_for_session(&session.id)
            .expect("attempts listed")
            .into_iter()
            .find(|attempt| attempt.tutor_id.0 == tutor)
            .expect("attempt for tutor");
        self.machine
            .respond_outreach(
                &attempt.id,
                crate::workflows::trials::outreach::OutreachResponse::Accepted,
            )
            .expect("acceptance succeeds");
        self.machine.get_session(&session.id).expect("session found")
    }

    pub(super) fn advance_hours(&self, hours: i64) {
        self.clock.advance(Duration::hours(hours));
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
