use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;

use super::domain::{AttemptId, OutreachAttempt, OutreachStatus, SessionId, TutorId};
use super::repository::TrialStore;
use super::service::EngineError;

static ATTEMPT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_attempt_id() -> AttemptId {
    let id = ATTEMPT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AttemptId(format!("oa-{id:06}"))
}

/// A tutor's answer to an outreach attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutreachResponse {
    Accepted,
    Declined,
    RequireDifferentTime,
}

/// What a response did to the session's outreach round. The state machine
/// translates these into status transitions; the coordinator never touches
/// session status itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutreachResolution {
    /// This tutor won the session.
    Won { tutor_id: TutorId },
    /// Another tutor already accepted. A polite outcome, not an error.
    AlreadyFilled,
    /// Attempt declined; `pool_exhausted` is true when every attempt is now
    /// terminal with no winner, `echoed` when this call merely replayed an
    /// earlier resolution.
    Declined { pool_exhausted: bool, echoed: bool },
    /// Attempt closed with the needs-another-time flag for the admin dashboard.
    RequiresDifferentTime { pool_exhausted: bool, echoed: bool },
}

/// Creates and resolves per-tutor outreach attempts, enforcing
/// first-accept-wins. Callers must hold the session's lock around `respond`
/// so acceptance checks are serialized per session.
pub struct OutreachCoordinator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S> OutreachCoordinator<S>
where
    S: TrialStore,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open one pending attempt per candidate tutor. Duplicate tutor ids in
    /// the batch collapse to a single attempt.
    pub fn start_batch(
        &self,
        session_id: &SessionId,
        tutor_ids: &[TutorId],
    ) -> Result<Vec<OutreachAttempt>, EngineError> {
        let now = self.clock.now();
        let mut seen: Vec<&TutorId> = Vec::new();
        let mut attempts = Vec::new();
        for tutor_id in tutor_ids {
            if seen.contains(&tutor_id) {
                continue;
            }
            seen.push(tutor_id);
            attempts.push(OutreachAttempt {
                id: next_attempt_id(),
                session_id: session_id.clone(),
                tutor_id: tutor_id.clone(),
                status: OutreachStatus::Pending,
                created_at: now,
                responded_at: None,
            });
        }
        self.store.insert_attempts(attempts.clone())?;
        Ok(attempts)
    }

    /// Resolve one attempt. Each resolution is a one-time terminal transition;
    /// retrying an identical response after a timeout returns the original
    /// outcome without re-applying any effect.
    pub fn respond(
        &self,
        attempt_id: &AttemptId,
        response: OutreachResponse,
    ) -> Result<OutreachResolution, EngineError> {
        let attempt = self
            .store
            .fetch_attempt(attempt_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "outreach attempt",
                id: attempt_id.0.clone(),
            })?;

        match (attempt.status, response) {
            (OutreachStatus::Pending, OutreachResponse::Accepted) => self.accept(attempt),
            (OutreachStatus::Pending, OutreachResponse::Declined) => {
                self.close(attempt, OutreachStatus::Declined)
            }
            (OutreachStatus::Pending, OutreachResponse::RequireDifferentTime) => {
                self.close(attempt, OutreachStatus::RequireDifferentTime)
            }
            // Retried calls observe the prior terminal state and echo it.
            (OutreachStatus::Accepted, OutreachResponse::Accepted) => {
                Ok(OutreachResolution::Won {
                    tutor_id: attempt.tutor_id,
                })
            }
            (OutreachStatus::Superseded, OutreachResponse::Accepted) => {
                Ok(OutreachResolution::AlreadyFilled)
            }
            (OutreachStatus::Declined, OutreachResponse::Declined) => {
                Ok(OutreachResolution::Declined {
                    pool_exhausted: self.pool_exhausted(&attempt.session_id)?,
                    echoed: true,
                })
            }
            (OutreachStatus::RequireDifferentTime, OutreachResponse::RequireDifferentTime) => {
                Ok(OutreachResolution::RequiresDifferentTime {
                    pool_exhausted: self.pool_exhausted(&attempt.session_id)?,
                    echoed: true,
                })
            }
            (status, _) => Err(EngineError::InvalidTransition {
                state: status.label().to_string(),
                operation: "respond to outreach attempt",
            }),
        }
    }

    /// Manual assignment: the chosen tutor's open attempt (if any) is marked
    /// accepted so their later retries echo the win, and every attempt for
    /// other tutors is superseded.
    pub fn assign(
        &self,
        session_id: &SessionId,
        tutor_id: &TutorId,
    ) -> Result<(), EngineError> {
        let own = self
            .store
            .attempts_for_session(session_id)?
            .into_iter()
            .find(|attempt| &attempt.tutor_id == tutor_id && !attempt.status.is_terminal());

        match own {
            Some(mut attempt) => {
                let winner_id = attempt.id.clone();
                attempt.status = OutreachStatus::Accepted;
                attempt.responded_at = Some(self.clock.now());
                self.store.update_attempt(attempt)?;
                self.supersede_others(session_id, Some(&winner_id))
            }
            None => self.supersede_others(session_id, None),
        }
    }

    /// Mark every non-terminal attempt for the session superseded, except the
    /// optionally named winner. Used by acceptance, assignment, and withdrawal.
    pub fn supersede_others(
        &self,
        session_id: &SessionId,
        winner: Option<&AttemptId>,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        for mut sibling in self.store.attempts_for_session(session_id)? {
            if Some(&sibling.id) == winner || sibling.status.is_terminal() {
                continue;
            }
            sibling.status = OutreachStatus::Superseded;
            sibling.responded_at = Some(now);
            self.store.update_attempt(sibling)?;
        }
        Ok(())
    }

    fn accept(&self, mut attempt: OutreachAttempt) -> Result<OutreachResolution, EngineError> {
        let siblings = self.store.attempts_for_session(&attempt.session_id)?;
        let already_won = siblings
            .iter()
            .any(|sibling| sibling.status == OutreachStatus::Accepted);

        let now = self.clock.now();
        if already_won {
            attempt.status = OutreachStatus::Superseded;
            attempt.responded_at = Some(now);
            self.store.update_attempt(attempt)?;
            return Ok(OutreachResolution::AlreadyFilled);
        }

        let session_id = attempt.session_id.clone();
        let winner_id = attempt.id.clone();
        let tutor_id = attempt.tutor_id.clone();
        attempt.status = OutreachStatus::Accepted;
        attempt.responded_at = Some(now);
        self.store.update_attempt(attempt)?;
        self.supersede_others(&session_id, Some(&winner_id))?;

        Ok(OutreachResolution::Won { tutor_id })
    }

    fn close(
        &self,
        mut attempt: OutreachAttempt,
        status: OutreachStatus,
    ) -> Result<OutreachResolution, EngineError> {
        let session_id = attempt.session_id.clone();
        attempt.status = status;
        attempt.responded_at = Some(self.clock.now());
        self.store.update_attempt(attempt)?;

        let pool_exhausted = self.pool_exhausted(&session_id)?;
        Ok(match status {
            OutreachStatus::Declined => OutreachResolution::Declined {
                pool_exhausted,
                echoed: false,
            },
            _ => OutreachResolution::RequiresDifferentTime {
                pool_exhausted,
                echoed: false,
            },
        })
    }

    fn pool_exhausted(&self, session_id: &SessionId) -> Result<bool, EngineError> {
        let attempts = self.store.attempts_for_session(session_id)?;
        Ok(attempts
            .iter()
            .all(|attempt| attempt.status.is_terminal() && attempt.status != OutreachStatus::Accepted))
    }
}
