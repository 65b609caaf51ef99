use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

use crate::clock::Clock;

use super::domain::{
    require_words, AnalysisId, AttemptId, CancellationAnalysis, LessonLocation, RequesterType,
    RescheduleId, RescheduleRequest, RescheduleStatus, SessionId, SessionStatus, TrialFeedback,
    TrialLesson, TrialSession, TutorId, ValidationError,
};
use super::outreach::{OutreachCoordinator, OutreachResolution, OutreachResponse};
use super::penalty::{CancellationPenaltyEngine, PenaltyPolicy, SentimentScorer};
use super::ranking::{MatchRanker, MatchRequirements, RankedCandidate, TravelTimeProvider};
use super::repository::{
    AttemptView, RepositoryError, SessionView, TrialStore, TutorDirectory,
};
use super::reschedule::{RescheduleNegotiator, RescheduleResolution, RescheduleResponse};
use super::scores::{ScoreComponent, TutorScoreStore, TutorScoreView};
use super::waitlist::{JoinOutcome, WaitlistManager};

const DIAGNOSTIC_ASSESSMENT_MIN_WORDS: usize = 40;
const FEEDBACK_SECTION_MIN_WORDS: usize = 30;

/// Availability nudges applied when tutors answer outreach.
const ACCEPT_AVAILABILITY_DELTA: f64 = 0.25;
const DECLINE_AVAILABILITY_DELTA: f64 = -0.25;
/// Success nudge applied when a student decides to continue.
const CONTINUATION_SUCCESS_DELTA: f64 = 0.5;

static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    let id = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SessionId(format!("ts-{id:06}"))
}

/// Typed errors the engine returns to callers; nothing here should ever
/// crash the process on bad input.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
    #[error("cannot {operation} while in state '{state}'")]
    InvalidTransition {
        state: String,
        operation: &'static str,
    },
    #[error("session already assigned to another tutor")]
    AlreadyAssigned,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Per-session mutexes so concurrency-sensitive operations (outreach
/// acceptance, reschedule resolution, cancellation) serialize within one
/// session without ever blocking another session.
#[derive(Default)]
struct SessionLocks {
    inner: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn for_session(&self, id: &SessionId) -> Arc<Mutex<()>> {
        let mut guard = self.inner.lock().expect("session lock table poisoned");
        guard.entry(id.clone()).or_default().clone()
    }
}

/// Engine-wide knobs sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub priority_window: Duration,
    pub penalty: PenaltyPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            priority_window: Duration::hours(24),
            penalty: PenaltyPolicy::default(),
        }
    }
}

/// Inbound description of a new trial session.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSession {
    pub parent_name: String,
    pub parent_email: String,
    pub location: String,
    pub lessons: Vec<NewLesson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewLesson {
    pub subject: String,
    pub student_name: String,
    pub student_grade: String,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub duration_minutes: u32,
}

/// Tutor-authored feedback payload, validated server-side for word counts.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackInput {
    pub assessment: String,
    pub suggestions: String,
    pub plan: String,
}

/// Result of a tutor's outreach response as seen by the caller.
#[derive(Debug)]
pub enum OutreachOutcome {
    /// This tutor won; the session is confirmed to them.
    Confirmed(SessionView),
    /// Another tutor got there first. Not an error.
    AlreadyFilled,
    /// Response recorded; `session_failed` is true when the pool is exhausted
    /// and the session moved to `Failed - No Tutors`.
    Recorded { session_failed: bool },
}

/// Result of resolving a reschedule request.
#[derive(Debug)]
pub enum RescheduleOutcome {
    Approved { session: SessionView },
    Rejected { candidates: Vec<RankedCandidate> },
}

/// Result of a tutor cancellation: the penalty analysis plus where the
/// session landed (re-pooled to outreach, or back to pending).
#[derive(Debug)]
pub struct CancellationOutcome {
    pub analysis: CancellationAnalysis,
    pub session: SessionView,
}

/// Top-level orchestrator. Owns session status: every status mutation in the
/// engine flows through [`SessionStateMachine::transition`].
pub struct SessionStateMachine<S, D> {
    store: Arc<S>,
    scores: Arc<TutorScoreStore>,
    ranker: MatchRanker<D>,
    outreach: OutreachCoordinator<S>,
    negotiator: RescheduleNegotiator<S>,
    waitlist: WaitlistManager<S>,
    penalties: CancellationPenaltyEngine<S>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
}

impl<S, D> SessionStateMachine<S, D>
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    pub fn new(
        store: Arc<S>,
        directory: Arc<D>,
        travel: Arc<dyn TravelTimeProvider>,
        scorer: Arc<dyn SentimentScorer>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let scores = Arc::new(TutorScoreStore::new());
        Self {
            ranker: MatchRanker::new(directory, scores.clone(), travel),
            outreach: OutreachCoordinator::new(store.clone(), clock.clone()),
            negotiator: RescheduleNegotiator::new(
                store.clone(),
                clock.clone(),
                settings.priority_window,
            ),
            waitlist: WaitlistManager::new(store.clone(), clock.clone()),
            penalties: CancellationPenaltyEngine::new(
                store.clone(),
                scores.clone(),
                scorer,
                clock.clone(),
                settings.penalty,
            ),
            store,
            scores,
            clock,
            locks: SessionLocks::default(),
        }
    }

    pub fn create_session(&self, new_session: NewSession) -> Result<TrialSession, EngineError> {
        if new_session.lessons.is_empty() {
            return Err(ValidationError::NoLessons.into());
        }
        let now = self.clock.now();
        let session = TrialSession {
            id: next_session_id(),
            parent_name: new_session.parent_name,
            parent_email: new_session.parent_email,
            location: LessonLocation::categorize(&new_session.location),
            lessons: new_session
                .lessons
                .into_iter()
                .map(|lesson| TrialLesson {
                    subject: lesson.subject,
                    student_name: lesson.student_name,
                    student_grade: lesson.student_grade,
                    scheduled_at: lesson.scheduled_at,
                    timezone: lesson.timezone,
                    duration_minutes: lesson.duration_minutes,
                })
                .collect(),
            assigned_tutor: None,
            status: SessionStatus::Pending,
            diagnostic: None,
            reflection: None,
            created_at: now,
            updated_at: now,
        };
        Ok(self.store.insert_session(session)?)
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<TrialSession, EngineError> {
        self.store
            .fetch_session(session_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "session",
                id: session_id.0.clone(),
            })
    }

    /// Rank candidate tutors for a pending session. Read-only: status is not
    /// mutated, and an empty list is a valid answer.
    pub fn request_match(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<RankedCandidate>, EngineError> {
        let session = self.get_session(session_id)?;
        self.expect_status(&session, &[SessionStatus::Pending], "request a match")?;
        self.rank_for_session(&session, session.first_lesson().map(|l| l.scheduled_at))
    }

    /// Open outreach attempts to the chosen candidates and move the session
    /// into `Outreach in Progress`.
    pub fn start_outreach(
        &self,
        session_id: &SessionId,
        candidates: &[TutorId],
    ) -> Result<SessionView, EngineError> {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        let mut session = self.get_session(session_id)?;
        self.expect_status(&session, &[SessionStatus::Pending], "start outreach")?;
        if candidates.is_empty() {
            return Err(ValidationError::NoCandidates.into());
        }

        self.outreach.start_batch(session_id, candidates)?;
        self.transition(&mut session, SessionStatus::OutreachInProgress, "start outreach")?;
        Ok(SessionView::from_session(&session))
    }

    /// Manual override path: assign a tutor directly, superseding any open
    /// attempts for other tutors. Retrying the same assignment is a no-op.
    pub fn assign_tutor(
        &self,
        session_id: &SessionId,
        tutor_id: &TutorId,
    ) -> Result<SessionView, EngineError> {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        let mut session = self.get_session(session_id)?;
        if session.status == SessionStatus::Confirmed {
            if session.assigned_tutor.as_ref() == Some(tutor_id) {
                return Ok(SessionView::from_session(&session));
            }
            return Err(EngineError::AlreadyAssigned);
        }
        self.expect_status(
            &session,
            &[SessionStatus::Pending, SessionStatus::OutreachInProgress],
            "assign a tutor",
        )?;

        self.outreach.assign(session_id, tutor_id)?;
        session.assigned_tutor = Some(tutor_id.clone());
        self.transition(&mut session, SessionStatus::Confirmed, "assign a tutor")?;
        Ok(SessionView::from_session(&session))
    }

    /// Reopen a failed session: prior attempts are cleared and the session
    /// returns to `Pending` for a fresh match.
    pub fn retry_outreach(&self, session_id: &SessionId) -> Result<SessionView, EngineError> {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        let mut session = self.get_session(session_id)?;
        self.expect_status(&session, &[SessionStatus::FailedNoTutors], "retry outreach")?;
        self.store.clear_attempts(session_id)?;
        self.transition(&mut session, SessionStatus::Pending, "retry outreach")?;
        Ok(SessionView::from_session(&session))
    }

    /// Record a tutor's response to an outreach attempt. First accept wins
    /// under the session lock; losers get a polite `AlreadyFilled`.
    pub fn respond_outreach(
        &self,
        attempt_id: &AttemptId,
        response: OutreachResponse,
    ) -> Result<OutreachOutcome, EngineError> {
        let attempt = self
            .store
            .fetch_attempt(attempt_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "outreach attempt",
                id: attempt_id.0.clone(),
            })?;

        let lock = self.locks.for_session(&attempt.session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        match self.outreach.respond(attempt_id, response)? {
            OutreachResolution::Won { tutor_id } => {
                let mut session = self.get_session(&attempt.session_id)?;
                match session.status {
                    SessionStatus::OutreachInProgress => {
                        session.assigned_tutor = Some(tutor_id.clone());
                        self.transition(&mut session, SessionStatus::Confirmed, "accept outreach")?;
                        self.scores.adjust(
                            &tutor_id,
                            ScoreComponent::Availability,
                            ACCEPT_AVAILABILITY_DELTA,
                        );
                        Ok(OutreachOutcome::Confirmed(SessionView::from_session(&session)))
                    }
                    // A retried accept after the session already confirmed.
                    SessionStatus::Confirmed
                        if session.assigned_tutor.as_ref() == Some(&tutor_id) =>
                    {
                        Ok(OutreachOutcome::Confirmed(SessionView::from_session(&session)))
                    }
                    status => Err(EngineError::InvalidTransition {
                        state: status.label().to_string(),
                        operation: "accept outreach",
                    }),
                }
            }
            OutreachResolution::AlreadyFilled => Ok(OutreachOutcome::AlreadyFilled),
            OutreachResolution::Declined {
                pool_exhausted,
                echoed,
            } => {
                // Echoed retries re-apply nothing; they report where the
                // session stands now.
                if !echoed {
                    self.scores.adjust(
                        &attempt.tutor_id,
                        ScoreComponent::Availability,
                        DECLINE_AVAILABILITY_DELTA,
                    );
                }
                let session_failed =
                    self.session_failed_after_response(&attempt.session_id, pool_exhausted, echoed)?;
                Ok(OutreachOutcome::Recorded { session_failed })
            }
            OutreachResolution::RequiresDifferentTime {
                pool_exhausted,
                echoed,
            } => {
                let session_failed =
                    self.session_failed_after_response(&attempt.session_id, pool_exhausted, echoed)?;
                Ok(OutreachOutcome::Recorded { session_failed })
            }
        }
    }

    /// Attempt summaries for the admin dashboard, including which tutors
    /// asked for a different time.
    pub fn attempts_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<AttemptView>, EngineError> {
        self.get_session(session_id)?;
        let attempts = self.store.attempts_for_session(session_id)?;
        Ok(attempts.iter().map(AttemptView::from_attempt).collect())
    }

    /// Record the tutor's post-trial-one diagnostic; requires a confirmed
    /// session and minimum word counts on every section.
    pub fn submit_diagnostic(
        &self,
        session_id: &SessionId,
        input: FeedbackInput,
    ) -> Result<SessionView, EngineError> {
        let mut session = self.get_session(session_id)?;
        self.expect_status(&session, &[SessionStatus::Confirmed], "submit a diagnostic")?;
        session.diagnostic = Some(self.validated_feedback(input)?);
        self.transition(&mut session, SessionStatus::TrialOneComplete, "submit a diagnostic")?;
        Ok(SessionView::from_session(&session))
    }

    /// Record the tutor's post-trial-two reflection.
    pub fn submit_reflection(
        &self,
        session_id: &SessionId,
        input: FeedbackInput,
    ) -> Result<SessionView, EngineError> {
        let mut session = self.get_session(session_id)?;
        self.expect_status(
            &session,
            &[SessionStatus::TrialOneComplete],
            "submit a reflection",
        )?;
        session.reflection = Some(self.validated_feedback(input)?);
        self.transition(&mut session, SessionStatus::TrialTwoComplete, "submit a reflection")?;
        Ok(SessionView::from_session(&session))
    }

    /// The parent confirmed the student is continuing; the session hands off
    /// to permanent scheduling.
    pub fn mark_continuing(&self, session_id: &SessionId) -> Result<SessionView, EngineError> {
        let mut session = self.get_session(session_id)?;
        self.expect_status(
            &session,
            &[SessionStatus::TrialTwoComplete],
            "confirm continuation",
        )?;
        self.transition(
            &mut session,
            SessionStatus::ContinuingAwaitingSchedule,
            "confirm continuation",
        )?;
        if let Some(tutor) = &session.assigned_tutor {
            self.scores
                .adjust(tutor, ScoreComponent::Success, CONTINUATION_SUCCESS_DELTA);
        }
        Ok(SessionView::from_session(&session))
    }

    /// Parent or admin withdraws the request entirely.
    pub fn withdraw(&self, session_id: &SessionId) -> Result<SessionView, EngineError> {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        let mut session = self.get_session(session_id)?;
        self.outreach.supersede_others(session_id, None)?;
        self.transition(&mut session, SessionStatus::Cancelled, "withdraw the session")?;
        Ok(SessionView::from_session(&session))
    }

    /// Tutor cancellation of a confirmed session: run the penalty analysis,
    /// clear the assignment, and re-pool to the waitlist when possible.
    pub fn cancel(
        &self,
        session_id: &SessionId,
        canceling_tutor: &TutorId,
        reason: String,
    ) -> Result<CancellationOutcome, EngineError> {
        let lock = self.locks.for_session(session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        let mut session = self.get_session(session_id)?;
        self.expect_status(&session, &[SessionStatus::Confirmed], "cancel the session")?;
        if session.assigned_tutor.as_ref() != Some(canceling_tutor) {
            return Err(EngineError::AlreadyAssigned);
        }

        let analysis = self
            .penalties
            .analyze(&session, canceling_tutor, reason)?;

        session.assigned_tutor = None;
        let fallback = self
            .waitlist
            .tutors_for(session_id, Some(canceling_tutor))?;
        if fallback.is_empty() {
            self.transition(&mut session, SessionStatus::Pending, "cancel the session")?;
        } else {
            self.outreach.start_batch(session_id, &fallback)?;
            self.transition(
                &mut session,
                SessionStatus::OutreachInProgress,
                "cancel the session",
            )?;
        }

        Ok(CancellationOutcome {
            analysis,
            session: SessionView::from_session(&session),
        })
    }

    /// Open a reschedule request for a non-terminal session.
    pub fn create_reschedule(
        &self,
        session_id: &SessionId,
        requested_datetime: DateTime<Utc>,
        reason: String,
        requester_type: RequesterType,
        requester_id: String,
    ) -> Result<RescheduleRequest, EngineError> {
        let session = self.get_session(session_id)?;
        if session.status.is_terminal() || session.status == SessionStatus::FailedNoTutors {
            return Err(EngineError::InvalidTransition {
                state: session.status.label().to_string(),
                operation: "request a reschedule",
            });
        }
        self.negotiator
            .create(&session, requested_datetime, reason, requester_type, requester_id)
    }

    /// Resolve a reschedule request: approval moves the lesson, rejection
    /// returns a fresh ranked candidate list scoped to the requested time.
    pub fn respond_reschedule(
        &self,
        request_id: &RescheduleId,
        tutor_id: &TutorId,
        response: RescheduleResponse,
    ) -> Result<RescheduleOutcome, EngineError> {
        let stored = self.fetch_reschedule(request_id)?;
        let lock = self.locks.for_session(&stored.session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        // A fresh approval must still have a lesson at its anchor; a sibling
        // request's earlier approval may have moved it already.
        let current = self.negotiator.fetch_current(request_id)?;
        if current.status == RescheduleStatus::Pending
            && response == RescheduleResponse::Accepted
        {
            let session = self.get_session(&current.session_id)?;
            let anchored = session
                .lessons
                .iter()
                .any(|lesson| lesson.scheduled_at == current.original_datetime);
            if !anchored {
                return Err(ValidationError::AnchorMoved.into());
            }
        }

        let (request, resolution) = self.negotiator.respond(request_id, tutor_id, response)?;
        match resolution {
            RescheduleResolution::Approved { new_datetime } => {
                let mut session = self.get_session(&request.session_id)?;
                if let Some(lesson) = session
                    .lessons
                    .iter_mut()
                    .find(|lesson| lesson.scheduled_at == request.original_datetime)
                {
                    lesson.scheduled_at = new_datetime;
                }
                session.updated_at = self.clock.now();
                self.store.update_session(session.clone())?;
                Ok(RescheduleOutcome::Approved {
                    session: SessionView::from_session(&session),
                })
            }
            RescheduleResolution::Rejected { search_at } => {
                let session = self.get_session(&request.session_id)?;
                let candidates = self.rank_for_session(&session, Some(search_at))?;
                Ok(RescheduleOutcome::Rejected { candidates })
            }
        }
    }

    /// General-pool candidates for a request whose priority window has
    /// lapsed or been declined.
    pub fn rank_for_reschedule(
        &self,
        request_id: &RescheduleId,
    ) -> Result<Vec<RankedCandidate>, EngineError> {
        let stored = self.fetch_reschedule(request_id)?;
        let lock = self.locks.for_session(&stored.session_id);
        let _guard = lock.lock().expect("session lock poisoned");

        let request = self.negotiator.fetch_current(request_id)?;
        match request.status {
            RescheduleStatus::Expired | RescheduleStatus::Rejected => {
                let session = self.get_session(&request.session_id)?;
                self.rank_for_session(&session, Some(request.requested_datetime))
            }
            status => Err(EngineError::InvalidTransition {
                state: status.label().to_string(),
                operation: "match the general pool",
            }),
        }
    }

    /// Expire lapsed priority windows. The one time-driven transition in the
    /// engine; callers may drive it from a schedule or rely on lazy checks.
    /// Each request is expired under its session's lock, so a response
    /// committed at or before the deadline is never overwritten.
    pub fn sweep_reschedules(&self) -> Result<usize, EngineError> {
        let mut expired = 0;
        for request in self.store.pending_reschedules()? {
            let lock = self.locks.for_session(&request.session_id);
            let _guard = lock.lock().expect("session lock poisoned");
            if self.negotiator.expire_if_pending(&request.id)? {
                expired += 1;
            }
        }
        Ok(expired)
    }

    pub fn join_waitlist(
        &self,
        session_id: &SessionId,
        tutor_id: &TutorId,
    ) -> Result<JoinOutcome, EngineError> {
        let session = self.get_session(session_id)?;
        self.waitlist.join(&session, tutor_id)
    }

    /// Admin override of a cancellation penalty; audited and permanent.
    pub fn override_penalty(
        &self,
        analysis_id: &AnalysisId,
        override_penalty: f64,
        reason: &str,
        admin_id: &str,
    ) -> Result<CancellationAnalysis, EngineError> {
        self.penalties
            .override_penalty(analysis_id, override_penalty, reason, admin_id)
    }

    /// Admin mutation of one ranking component.
    pub fn set_score_component(
        &self,
        tutor_id: &TutorId,
        component: ScoreComponent,
        value: f64,
    ) -> TutorScoreView {
        self.scores.set_component(tutor_id, component, value);
        self.scores.view(tutor_id)
    }

    pub fn tutor_score(&self, tutor_id: &TutorId) -> TutorScoreView {
        self.scores.view(tutor_id)
    }

    fn validated_feedback(&self, input: FeedbackInput) -> Result<TrialFeedback, EngineError> {
        require_words("assessment", &input.assessment, DIAGNOSTIC_ASSESSMENT_MIN_WORDS)?;
        require_words("suggestions", &input.suggestions, FEEDBACK_SECTION_MIN_WORDS)?;
        require_words("plan", &input.plan, FEEDBACK_SECTION_MIN_WORDS)?;
        Ok(TrialFeedback {
            assessment: input.assessment,
            suggestions: input.suggestions,
            plan: input.plan,
            submitted_at: self.clock.now(),
        })
    }

    fn fetch_reschedule(
        &self,
        request_id: &RescheduleId,
    ) -> Result<RescheduleRequest, EngineError> {
        self.store
            .fetch_reschedule(request_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "reschedule request",
                id: request_id.0.clone(),
            })
    }

    fn rank_for_session(
        &self,
        session: &TrialSession,
        at: Option<DateTime<Utc>>,
    ) -> Result<Vec<RankedCandidate>, EngineError> {
        let lesson = session.first_lesson().ok_or(ValidationError::NoLessons)?;
        let requirements = MatchRequirements {
            subject: lesson.subject.clone(),
            location: session.location.clone(),
            scheduled_at: at.unwrap_or(lesson.scheduled_at),
            duration_minutes: lesson.duration_minutes,
        };
        let waitlisted = self.waitlist.tutors_for(&session.id, None)?;
        Ok(self.ranker.rank(&requirements, &waitlisted)?)
    }

    /// First responses drive the exhaustion transition; echoed retries only
    /// report whether the session stands failed.
    fn session_failed_after_response(
        &self,
        session_id: &SessionId,
        pool_exhausted: bool,
        echoed: bool,
    ) -> Result<bool, EngineError> {
        if echoed {
            return Ok(self.get_session(session_id)?.status == SessionStatus::FailedNoTutors);
        }
        if !pool_exhausted {
            return Ok(false);
        }
        let mut session = self.get_session(session_id)?;
        if session.status != SessionStatus::OutreachInProgress {
            return Ok(false);
        }
        self.transition(&mut session, SessionStatus::FailedNoTutors, "exhaust outreach")?;
        Ok(true)
    }

    fn expect_status(
        &self,
        session: &TrialSession,
        allowed: &[SessionStatus],
        operation: &'static str,
    ) -> Result<(), EngineError> {
        if allowed.contains(&session.status) {
            return Ok(());
        }
        Err(EngineError::InvalidTransition {
            state: session.status.label().to_string(),
            operation,
        })
    }

    /// The only place a session status changes. Rejects edges the transition
    /// table omits and persists the session atomically with the change.
    fn transition(
        &self,
        session: &mut TrialSession,
        to: SessionStatus,
        operation: &'static str,
    ) -> Result<(), EngineError> {
        if !session.status.allows(to) {
            return Err(EngineError::InvalidTransition {
                state: session.status.label().to_string(),
                operation,
            });
        }
        let from = session.status;
        session.status = to;
        session.updated_at = self.clock.now();
        self.store.update_session(session.clone())?;
        info!(session = %session.id.0, from = from.label(), to = to.label(), "session transitioned");
        Ok(())
    }
}
