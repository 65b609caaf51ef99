//! Trial session lifecycle: tutor matching, outreach negotiation, reschedule
//! priority windows, waitlists, and cancellation penalties.

pub mod domain;
pub mod outreach;
pub mod penalty;
pub mod ranking;
pub mod repository;
pub mod reschedule;
pub mod router;
pub mod scores;
pub mod service;
pub mod waitlist;

#[cfg(test)]
mod tests;

pub use domain::{
    AnalysisId, AttemptId, CancellationAnalysis, LessonLocation, LocationKind, NextAction,
    OutreachAttempt, OutreachStatus, RequesterType, RescheduleId, RescheduleRequest,
    RescheduleStatus, SessionId, SessionStatus, TrialLesson, TrialSession, TutorId, TutorProfile,
    TutorScore, ValidationError, WaitlistEntry, DEFAULT_COMPONENT_SCORE,
};
pub use outreach::{OutreachCoordinator, OutreachResolution, OutreachResponse};
pub use penalty::{
    calculated_penalty, CancellationPenaltyEngine, PenaltyPolicy, ScorerError, SentimentScorer,
    NEUTRAL_SENTIMENT,
};
pub use ranking::{
    MatchRanker, MatchRequirements, RankedCandidate, TravelTimeError, TravelTimeProvider,
};
pub use repository::{
    AttemptView, RepositoryError, SessionView, TrialStore, TutorDirectory,
};
pub use reschedule::{RescheduleNegotiator, RescheduleResolution, RescheduleResponse};
pub use router::trial_router;
pub use scores::{ScoreComponent, TutorScoreStore, TutorScoreView};
pub use service::{
    CancellationOutcome, EngineError, EngineSettings, FeedbackInput, NewLesson, NewSession,
    OutreachOutcome, RescheduleOutcome, SessionStateMachine,
};
pub use waitlist::{JoinOutcome, WaitlistManager};
