use serde::Serialize;

use super::domain::{
    AnalysisId, AttemptId, CancellationAnalysis, NextAction, OutreachAttempt, RescheduleId,
    RescheduleRequest, SessionId, TrialSession, TutorId, TutorProfile, WaitlistEntry,
};

/// Storage abstraction over the engine's persisted records so the state
/// machine can be exercised against in-memory fakes in tests.
pub trait TrialStore: Send + Sync {
    fn insert_session(&self, session: TrialSession) -> Result<TrialSession, RepositoryError>;
    fn update_session(&self, session: TrialSession) -> Result<(), RepositoryError>;
    fn fetch_session(&self, id: &SessionId) -> Result<Option<TrialSession>, RepositoryError>;

    fn insert_attempts(&self, attempts: Vec<OutreachAttempt>) -> Result<(), RepositoryError>;
    fn update_attempt(&self, attempt: OutreachAttempt) -> Result<(), RepositoryError>;
    fn fetch_attempt(&self, id: &AttemptId) -> Result<Option<OutreachAttempt>, RepositoryError>;
    fn attempts_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<OutreachAttempt>, RepositoryError>;
    fn clear_attempts(&self, session_id: &SessionId) -> Result<(), RepositoryError>;

    fn insert_reschedule(&self, request: RescheduleRequest) -> Result<(), RepositoryError>;
    fn update_reschedule(&self, request: RescheduleRequest) -> Result<(), RepositoryError>;
    fn fetch_reschedule(
        &self,
        id: &RescheduleId,
    ) -> Result<Option<RescheduleRequest>, RepositoryError>;
    fn pending_reschedules(&self) -> Result<Vec<RescheduleRequest>, RepositoryError>;

    fn upsert_waitlist(&self, entry: WaitlistEntry) -> Result<(), RepositoryError>;
    fn waitlist_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<WaitlistEntry>, RepositoryError>;

    fn insert_analysis(&self, analysis: CancellationAnalysis) -> Result<(), RepositoryError>;
    fn update_analysis(&self, analysis: CancellationAnalysis) -> Result<(), RepositoryError>;
    fn fetch_analysis(
        &self,
        id: &AnalysisId,
    ) -> Result<Option<CancellationAnalysis>, RepositoryError>;
}

/// Read-only lookup of tutor profiles maintained outside this engine.
pub trait TutorDirectory: Send + Sync {
    fn fetch_profile(&self, id: &TutorId) -> Result<Option<TutorProfile>, RepositoryError>;
    fn profiles_for_subject(&self, subject: &str) -> Result<Vec<TutorProfile>, RepositoryError>;
}

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Sanitized representation of a session for API responses: status as a
/// closed enum, the presentation label, and the server-derived next action.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: SessionId,
    pub status: super::domain::SessionStatus,
    pub status_label: &'static str,
    pub next_action: NextAction,
    pub assigned_tutor: Option<TutorId>,
    pub parent_name: String,
    pub location: super::domain::LessonLocation,
    pub lessons: Vec<super::domain::TrialLesson>,
    pub has_diagnostic: bool,
    pub has_reflection: bool,
}

impl SessionView {
    pub fn from_session(session: &TrialSession) -> Self {
        Self {
            session_id: session.id.clone(),
            status: session.status,
            status_label: session.status.label(),
            next_action: session.status.next_action(),
            assigned_tutor: session.assigned_tutor.clone(),
            parent_name: session.parent_name.clone(),
            location: session.location.clone(),
            lessons: session.lessons.clone(),
            has_diagnostic: session.diagnostic.is_some(),
            has_reflection: session.reflection.is_some(),
        }
    }
}

/// Attempt summary surfaced to the admin dashboard, including the
/// `require_different_time` flag outreach leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub attempt_id: AttemptId,
    pub tutor_id: TutorId,
    pub status: super::domain::OutreachStatus,
    pub status_label: &'static str,
    pub requires_different_time: bool,
}

impl AttemptView {
    pub fn from_attempt(attempt: &OutreachAttempt) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            tutor_id: attempt.tutor_id.clone(),
            status: attempt.status,
            status_label: attempt.status.label(),
            requires_different_time: attempt.status
                == super::domain::OutreachStatus::RequireDifferentTime,
        }
    }
}
