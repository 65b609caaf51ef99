use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;

use super::domain::{SessionId, TrialSession, TutorId, WaitlistEntry};
use super::repository::TrialStore;
use super::service::EngineError;

/// How a join request was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    /// The tutor is already assigned to this session; joining is meaningless,
    /// so the call succeeds without writing anything.
    OwnSessionNoOp,
}

/// Lets tutors register interest in sessions not assigned to them. The entry
/// list is the fallback candidate pool for matching and cancellation
/// re-pooling.
pub struct WaitlistManager<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> WaitlistManager<S>
where
    S: TrialStore,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Idempotent insert; a tutor holds at most one entry per session.
    pub fn join(
        &self,
        session: &TrialSession,
        tutor_id: &TutorId,
    ) -> Result<JoinOutcome, EngineError> {
        if session.assigned_tutor.as_ref() == Some(tutor_id) {
            debug!(session = %session.id.0, tutor = %tutor_id.0, "assigned tutor joined own waitlist, ignoring");
            return Ok(JoinOutcome::OwnSessionNoOp);
        }

        let existing = self.store.waitlist_for_session(&session.id)?;
        if existing.iter().any(|entry| &entry.tutor_id == tutor_id) {
            return Ok(JoinOutcome::AlreadyJoined);
        }

        self.store.upsert_waitlist(WaitlistEntry {
            session_id: session.id.clone(),
            tutor_id: tutor_id.clone(),
            joined_at: self.clock.now(),
        })?;
        Ok(JoinOutcome::Joined)
    }

    /// Waitlisted tutors in join order, optionally excluding one tutor
    /// (e.g. the tutor who just cancelled).
    pub fn tutors_for(
        &self,
        session_id: &SessionId,
        exclude: Option<&TutorId>,
    ) -> Result<Vec<TutorId>, EngineError> {
        let mut entries = self.store.waitlist_for_session(session_id)?;
        entries.sort_by_key(|entry| entry.joined_at);
        Ok(entries
            .into_iter()
            .map(|entry| entry.tutor_id)
            .filter(|tutor| Some(tutor) != exclude)
            .collect())
    }
}
