use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::Clock;

use super::domain::{
    RequesterType, RescheduleId, RescheduleRequest, RescheduleStatus, TrialSession, TutorId,
    ValidationError,
};
use super::repository::TrialStore;
use super::service::EngineError;

static RESCHEDULE_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_reschedule_id() -> RescheduleId {
    let id = RESCHEDULE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RescheduleId(format!("rr-{id:06}"))
}

/// A tutor's answer to a pending reschedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RescheduleResponse {
    Accepted,
    Declined,
}

/// Outcome of resolving a reschedule request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescheduleResolution {
    /// The new time stands; the session's lesson must move to it.
    Approved { new_datetime: DateTime<Utc> },
    /// The priority tutor declined; a fresh match scoped to the requested
    /// time should be offered instead.
    Rejected { search_at: DateTime<Utc> },
}

/// Manages the time-boxed priority window during which one tutor may accept
/// or reject a proposed new time before the request reopens to general
/// matching.
///
/// Expiry is lazily checked on every read and can also be driven per request
/// through [`RescheduleNegotiator::expire_if_pending`]. The window rule: a
/// response is effective up to and including the deadline; strictly after it,
/// the sweep (or the lazy check) marks the request expired. Callers must hold
/// the session's lock around `respond`, `fetch_current`, and
/// `expire_if_pending` so a response and an expiry never race on one request.
pub struct RescheduleNegotiator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    priority_window: Duration,
}

impl<S> RescheduleNegotiator<S>
where
    S: TrialStore,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, priority_window: Duration) -> Self {
        Self {
            store,
            clock,
            priority_window,
        }
    }

    /// Open a pending request anchored to the session's first lesson. When the
    /// requester is not the tutor and the session has an assigned tutor, that
    /// tutor is granted the priority window.
    pub fn create(
        &self,
        session: &TrialSession,
        requested_datetime: DateTime<Utc>,
        reason: String,
        requester_type: RequesterType,
        requester_id: String,
    ) -> Result<RescheduleRequest, EngineError> {
        let original = session
            .first_lesson()
            .ok_or(ValidationError::NoLessons)?
            .scheduled_at;

        let now = self.clock.now();
        let priority_tutor = match requester_type {
            RequesterType::Tutor => None,
            RequesterType::Parent | RequesterType::Admin => session.assigned_tutor.clone(),
        };
        let priority_response_deadline = priority_tutor
            .as_ref()
            .map(|_| now + self.priority_window);

        let request = RescheduleRequest {
            id: next_reschedule_id(),
            session_id: session.id.clone(),
            requester_type,
            requester_id,
            reason,
            original_datetime: original,
            requested_datetime,
            priority_tutor,
            priority_response_deadline,
            status: RescheduleStatus::Pending,
            created_at: now,
            resolved_at: None,
        };
        self.store.insert_reschedule(request.clone())?;
        Ok(request)
    }

    /// Resolve a pending request. During a priority window only the named
    /// tutor's response has effect; once the deadline has passed the request
    /// is marked expired and responses are rejected, leaving the request to
    /// general-pool resolution.
    pub fn respond(
        &self,
        request_id: &RescheduleId,
        tutor_id: &TutorId,
        response: RescheduleResponse,
    ) -> Result<(RescheduleRequest, RescheduleResolution), EngineError> {
        let mut request = self.fetch_current(request_id)?;
        let now = self.clock.now();

        match request.status {
            RescheduleStatus::Pending => {}
            // Retried calls echo the prior resolution without re-applying it.
            RescheduleStatus::Approved if response == RescheduleResponse::Accepted => {
                let resolution = RescheduleResolution::Approved {
                    new_datetime: request.requested_datetime,
                };
                return Ok((request, resolution));
            }
            RescheduleStatus::Rejected if response == RescheduleResponse::Declined => {
                let resolution = RescheduleResolution::Rejected {
                    search_at: request.requested_datetime,
                };
                return Ok((request, resolution));
            }
            status => {
                return Err(EngineError::InvalidTransition {
                    state: status.label().to_string(),
                    operation: "respond to reschedule request",
                })
            }
        }

        if let Some(priority_tutor) = &request.priority_tutor {
            if priority_tutor != tutor_id {
                return Err(ValidationError::NotPriorityTutor.into());
            }
        }

        request.resolved_at = Some(now);
        let resolution = match response {
            RescheduleResponse::Accepted => {
                request.status = RescheduleStatus::Approved;
                RescheduleResolution::Approved {
                    new_datetime: request.requested_datetime,
                }
            }
            RescheduleResponse::Declined => {
                request.status = RescheduleStatus::Rejected;
                RescheduleResolution::Rejected {
                    search_at: request.requested_datetime,
                }
            }
        };
        self.store.update_reschedule(request.clone())?;
        Ok((request, resolution))
    }

    /// Fetch a request, applying the lazy expiry check first.
    pub fn fetch_current(
        &self,
        request_id: &RescheduleId,
    ) -> Result<RescheduleRequest, EngineError> {
        let request = self
            .store
            .fetch_reschedule(request_id)?
            .ok_or_else(|| EngineError::NotFound {
                kind: "reschedule request",
                id: request_id.0.clone(),
            })?;
        Ok(self.expire_if_due(request)?)
    }

    /// Expire one request if it is still pending past its deadline. The
    /// stored record is re-read here rather than trusted from the caller's
    /// snapshot, so a response that landed after the snapshot is never
    /// overwritten. Returns true when this call performed the transition.
    pub fn expire_if_pending(&self, request_id: &RescheduleId) -> Result<bool, EngineError> {
        let Some(request) = self.store.fetch_reschedule(request_id)? else {
            return Ok(false);
        };
        if request.status != RescheduleStatus::Pending {
            return Ok(false);
        }
        Ok(self.expire_if_due(request)?.status == RescheduleStatus::Expired)
    }

    fn expire_if_due(
        &self,
        mut request: RescheduleRequest,
    ) -> Result<RescheduleRequest, EngineError> {
        if request.status != RescheduleStatus::Pending {
            return Ok(request);
        }
        let Some(deadline) = request.priority_response_deadline else {
            return Ok(request);
        };
        if self.clock.now() > deadline {
            request.status = RescheduleStatus::Expired;
            request.resolved_at = Some(self.clock.now());
            self.store.update_reschedule(request.clone())?;
            info!(request = %request.id.0, "reschedule priority window expired");
        }
        Ok(request)
    }
}
