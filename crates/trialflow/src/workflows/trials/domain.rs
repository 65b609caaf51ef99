use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for trial sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Identifier wrapper for tutors. Ordered so ranking ties resolve deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TutorId(pub String);

/// Identifier wrapper for outreach attempts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttemptId(pub String);

/// Identifier wrapper for reschedule requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RescheduleId(pub String);

/// Identifier wrapper for cancellation analyses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnalysisId(pub String);

/// Lifecycle status of a trial session. The transition table in [`SessionStatus::allows`]
/// is the single source of truth; no caller may move a session along an edge it omits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    OutreachInProgress,
    Confirmed,
    TrialOneComplete,
    TrialTwoComplete,
    ContinuingAwaitingSchedule,
    FailedNoTutors,
    Cancelled,
}

impl SessionStatus {
    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Pending => "Pending",
            SessionStatus::OutreachInProgress => "Outreach in Progress",
            SessionStatus::Confirmed => "Confirmed",
            SessionStatus::TrialOneComplete => "Trial 1 Complete - Diagnostic Submitted",
            SessionStatus::TrialTwoComplete => "Trial 2 Complete - Reflection Submitted",
            SessionStatus::ContinuingAwaitingSchedule => "Student Continuing - Awaiting Schedule",
            SessionStatus::FailedNoTutors => "Failed - No Tutors",
            SessionStatus::Cancelled => "Cancelled",
        }
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    ///
    /// Edges are one-directional except the explicit reopen paths: retry after
    /// `Failed - No Tutors` and re-pooling after a tutor cancellation.
    pub fn allows(self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Pending, OutreachInProgress | Confirmed | FailedNoTutors | Cancelled)
                | (OutreachInProgress, Confirmed | FailedNoTutors | Cancelled)
                | (Confirmed, TrialOneComplete | OutreachInProgress | Pending | Cancelled)
                | (TrialOneComplete, TrialTwoComplete)
                | (TrialTwoComplete, ContinuingAwaitingSchedule)
                | (FailedNoTutors, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::ContinuingAwaitingSchedule | SessionStatus::Cancelled
        )
    }

    /// The action a caller should take next, so clients never parse status labels.
    pub fn next_action(self) -> NextAction {
        match self {
            SessionStatus::Pending => NextAction::RequestMatch,
            SessionStatus::OutreachInProgress => NextAction::AwaitTutorResponse,
            SessionStatus::Confirmed => NextAction::SubmitDiagnostic,
            SessionStatus::TrialOneComplete => NextAction::SubmitReflection,
            SessionStatus::TrialTwoComplete => NextAction::ConfirmContinuation,
            SessionStatus::ContinuingAwaitingSchedule => NextAction::SchedulePermanentLessons,
            SessionStatus::FailedNoTutors => NextAction::RetryOutreach,
            SessionStatus::Cancelled => NextAction::None,
        }
    }
}

/// Machine-readable "what happens next" companion to the session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    RequestMatch,
    AwaitTutorResponse,
    SubmitDiagnostic,
    SubmitReflection,
    ConfirmContinuation,
    SchedulePermanentLessons,
    RetryOutreach,
    None,
}

/// Broad location category derived from the parent's free-text location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    Online,
    Library,
    InHome,
}

/// Free-text session location together with its derived category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonLocation {
    pub raw: String,
    pub kind: LocationKind,
}

impl LessonLocation {
    pub fn categorize(raw: &str) -> Self {
        let lowered = raw.to_ascii_lowercase();
        let kind = if lowered.contains("online") || lowered.contains("zoom") {
            LocationKind::Online
        } else if lowered.contains("library") {
            LocationKind::Library
        } else {
            LocationKind::InHome
        };
        Self {
            raw: raw.to_string(),
            kind,
        }
    }
}

/// A single trial lesson within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialLesson {
    pub subject: String,
    pub student_name: String,
    pub student_grade: String,
    pub scheduled_at: DateTime<Utc>,
    pub timezone: String,
    pub duration_minutes: u32,
}

/// Tutor-authored feedback attached after a completed trial lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFeedback {
    pub assessment: String,
    pub suggestions: String,
    pub plan: String,
    pub submitted_at: DateTime<Utc>,
}

/// A parent's request for trial lessons, tracked through a single lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSession {
    pub id: SessionId,
    pub parent_name: String,
    pub parent_email: String,
    pub location: LessonLocation,
    pub lessons: Vec<TrialLesson>,
    pub assigned_tutor: Option<TutorId>,
    pub status: SessionStatus,
    pub diagnostic: Option<TrialFeedback>,
    pub reflection: Option<TrialFeedback>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrialSession {
    /// Earliest scheduled lesson, used for notice-period and reschedule anchoring.
    pub fn first_lesson(&self) -> Option<&TrialLesson> {
        self.lessons.iter().min_by_key(|lesson| lesson.scheduled_at)
    }
}

/// Response state of an outreach attempt. Every state except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachStatus {
    Pending,
    Accepted,
    Declined,
    RequireDifferentTime,
    Superseded,
}

impl OutreachStatus {
    pub fn label(self) -> &'static str {
        match self {
            OutreachStatus::Pending => "pending",
            OutreachStatus::Accepted => "accepted",
            OutreachStatus::Declined => "declined",
            OutreachStatus::RequireDifferentTime => "require_different_time",
            OutreachStatus::Superseded => "superseded",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OutreachStatus::Pending)
    }
}

/// An offer of one session to one tutor, awaiting a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachAttempt {
    pub id: AttemptId,
    pub session_id: SessionId,
    pub tutor_id: TutorId,
    pub status: OutreachStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

/// Who asked for a session's lessons to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterType {
    Tutor,
    Parent,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl RescheduleStatus {
    pub fn label(self) -> &'static str {
        match self {
            RescheduleStatus::Pending => "pending",
            RescheduleStatus::Approved => "approved",
            RescheduleStatus::Rejected => "rejected",
            RescheduleStatus::Expired => "expired",
        }
    }
}

/// A proposed new lesson time, optionally gated by a priority window during
/// which only the named tutor may respond.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub id: RescheduleId,
    pub session_id: SessionId,
    pub requester_type: RequesterType,
    pub requester_id: String,
    pub reason: String,
    pub original_datetime: DateTime<Utc>,
    pub requested_datetime: DateTime<Utc>,
    pub priority_tutor: Option<TutorId>,
    pub priority_response_deadline: Option<DateTime<Utc>>,
    pub status: RescheduleStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A tutor's registered interest in a session not assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub session_id: SessionId,
    pub tutor_id: TutorId,
    pub joined_at: DateTime<Utc>,
}

/// Record of one tutor-cancellation event and its penalty resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationAnalysis {
    pub id: AnalysisId,
    pub session_id: SessionId,
    pub tutor_id: TutorId,
    pub reason_text: String,
    /// Hours between cancellation and the scheduled lesson start. Negative when
    /// the tutor cancelled after the lesson should already have begun.
    pub notice_hours: f64,
    pub ai_sentiment_score: f64,
    /// Set when the sentiment scorer was unavailable and a neutral default was used.
    pub scorer_degraded: bool,
    pub calculated_penalty: f64,
    pub final_penalty: Option<f64>,
    pub admin_override: bool,
    pub override_reason: Option<String>,
    pub overridden_by: Option<String>,
    pub overridden_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl CancellationAnalysis {
    /// The penalty currently in force: the admin override when present,
    /// otherwise the calculated value.
    pub fn effective_penalty(&self) -> f64 {
        self.final_penalty.unwrap_or(self.calculated_penalty)
    }
}

/// Default component score for tutors with no recorded history.
pub const DEFAULT_COMPONENT_SCORE: f64 = 5.0;

fn clamp_component(value: f64) -> f64 {
    value.clamp(0.0, 10.0)
}

/// Per-tutor ranking inputs. Components are clamped to [0, 10] on every write,
/// so the multiplicative composite stays within [0, 1000].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TutorScore {
    score_success: f64,
    score_reliability: f64,
    score_availability: f64,
}

impl Default for TutorScore {
    fn default() -> Self {
        Self {
            score_success: DEFAULT_COMPONENT_SCORE,
            score_reliability: DEFAULT_COMPONENT_SCORE,
            score_availability: DEFAULT_COMPONENT_SCORE,
        }
    }
}

impl TutorScore {
    pub fn new(success: f64, reliability: f64, availability: f64) -> Self {
        Self {
            score_success: clamp_component(success),
            score_reliability: clamp_component(reliability),
            score_availability: clamp_component(availability),
        }
    }

    pub fn success(&self) -> f64 {
        self.score_success
    }

    pub fn reliability(&self) -> f64 {
        self.score_reliability
    }

    pub fn availability(&self) -> f64 {
        self.score_availability
    }

    pub fn set_success(&mut self, value: f64) {
        self.score_success = clamp_component(value);
    }

    pub fn set_reliability(&mut self, value: f64) {
        self.score_reliability = clamp_component(value);
    }

    pub fn set_availability(&mut self, value: f64) {
        self.score_availability = clamp_component(value);
    }

    pub fn adjust_reliability(&mut self, delta: f64) {
        self.score_reliability = clamp_component(self.score_reliability + delta);
    }

    /// Composite ranking score. A single zero component zeroes the whole
    /// product, which is why missing tutors default to 5.0 per component.
    pub fn composite(&self) -> f64 {
        self.score_success * self.score_reliability * self.score_availability
    }
}

/// Directory entry describing a tutor's coverage and constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorProfile {
    pub id: TutorId,
    pub full_name: String,
    pub suburb: String,
    pub subjects: Vec<String>,
    /// Inclusive start and exclusive end of the tutor's daily availability, UTC hours.
    pub available_start_hour: u8,
    pub available_end_hour: u8,
    pub accepts_short_face_to_face_trials: bool,
}

impl TutorProfile {
    pub fn covers_subject(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(subject))
    }

    pub fn available_at(&self, hour: u8) -> bool {
        hour >= self.available_start_hour && hour < self.available_end_hour
    }
}

/// Validation failures surfaced to callers as recoverable, typed responses.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must contain at least {minimum} words, found {found}")]
    WordCount {
        field: &'static str,
        minimum: usize,
        found: usize,
    },
    #[error("a non-empty reason is required")]
    MissingReason,
    #[error("a session requires at least one trial lesson")]
    NoLessons,
    #[error("only the priority tutor may respond during the priority window")]
    NotPriorityTutor,
    #[error("outreach requires at least one candidate tutor")]
    NoCandidates,
    #[error("the lesson this request was anchored to has since been moved")]
    AnchorMoved,
}

pub(crate) fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub(crate) fn require_words(
    field: &'static str,
    text: &str,
    minimum: usize,
) -> Result<(), ValidationError> {
    let found = word_count(text);
    if found < minimum {
        return Err(ValidationError::WordCount {
            field,
            minimum,
            found,
        });
    }
    Ok(())
}
