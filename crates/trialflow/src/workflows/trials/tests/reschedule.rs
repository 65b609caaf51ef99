use chrono::{Duration, TimeZone, Utc};

use super::common::{harness, lesson_time, new_session};
use crate::workflows::trials::domain::{
    RequesterType, RescheduleStatus, SessionStatus, TutorId, ValidationError,
};
use crate::workflows::trials::repository::TrialStore;
use crate::workflows::trials::reschedule::{RescheduleNegotiator, RescheduleResponse};
use crate::workflows::trials::service::{EngineError, RescheduleOutcome};

fn tutor(id: &str) -> TutorId {
    TutorId(id.to_string())
}

fn new_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 6, 14, 0, 0)
        .single()
        .expect("valid time")
}

fn later_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 7, 11, 0, 0)
        .single()
        .expect("valid time")
}

#[test]
fn parent_request_grants_the_assigned_tutor_a_priority_window() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");

    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clashes with swimming".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    assert_eq!(request.status, RescheduleStatus::Pending);
    assert_eq!(request.original_datetime, lesson_time());
    assert_eq!(request.priority_tutor, Some(tutor("t-alpha")));
    assert_eq!(
        request.priority_response_deadline,
        Some(super::common::base_time() + Duration::hours(24))
    );
}

#[test]
fn tutor_request_has_no_priority_window() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");

    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "double booked".to_string(),
            RequesterType::Tutor,
            "t-alpha".to_string(),
        )
        .expect("created");

    assert!(request.priority_tutor.is_none());
    assert!(request.priority_response_deadline.is_none());

    // Without a window, any responder resolves the request.
    let outcome = h
        .machine
        .respond_reschedule(&request.id, &tutor("t-bravo"), RescheduleResponse::Accepted)
        .expect("resolved");
    assert!(matches!(outcome, RescheduleOutcome::Approved { .. }));
}

#[test]
fn only_the_priority_tutor_may_respond_inside_the_window() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    let result = h.machine.respond_reschedule(
        &request.id,
        &tutor("t-bravo"),
        RescheduleResponse::Accepted,
    );
    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::NotPriorityTutor))
    ));

    // The named tutor's acceptance moves the lesson.
    let outcome = h
        .machine
        .respond_reschedule(&request.id, &tutor("t-alpha"), RescheduleResponse::Accepted)
        .expect("approved");
    match outcome {
        RescheduleOutcome::Approved { session: view } => {
            assert_eq!(view.lessons[0].scheduled_at, new_time());
            assert_eq!(view.status, SessionStatus::Confirmed);
        }
        other => panic!("expected approval, got {other:?}"),
    }
}

#[test]
fn response_on_the_deadline_still_counts() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    // Exactly at the deadline: the window is inclusive.
    h.advance_hours(24);
    let outcome = h
        .machine
        .respond_reschedule(&request.id, &tutor("t-alpha"), RescheduleResponse::Accepted)
        .expect("approved at the boundary");
    assert!(matches!(outcome, RescheduleOutcome::Approved { .. }));
}

#[test]
fn responses_after_the_deadline_find_an_expired_request() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    h.advance_hours(25);
    let result = h.machine.respond_reschedule(
        &request.id,
        &tutor("t-alpha"),
        RescheduleResponse::Accepted,
    );
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { .. })
    ));

    // The lapsed request now resolves through general-pool matching.
    let candidates = h
        .machine
        .rank_for_reschedule(&request.id)
        .expect("general pool");
    assert!(!candidates.is_empty());
}

#[test]
fn sweep_expires_only_lapsed_windows() {
    let h = harness();
    let first = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &first.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    // Still inside the window: nothing to expire.
    h.advance_hours(24);
    assert_eq!(h.machine.sweep_reschedules().expect("swept"), 0);

    // One hour past: exactly this request expires.
    h.advance_hours(1);
    assert_eq!(h.machine.sweep_reschedules().expect("swept"), 1);
    assert_eq!(h.machine.sweep_reschedules().expect("swept"), 0);

    let refreshed = h
        .machine
        .rank_for_reschedule(&request.id)
        .expect("expired request ranks");
    assert!(!refreshed.is_empty());
}

#[test]
fn expiry_never_overwrites_a_response_that_landed_first() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    // The tutor approves exactly at the deadline.
    h.advance_hours(24);
    h.machine
        .respond_reschedule(&request.id, &tutor("t-alpha"), RescheduleResponse::Accepted)
        .expect("approved");

    // A sweep driven from a snapshot taken before the approval re-reads the
    // record and leaves the resolution alone.
    h.advance_hours(2);
    let negotiator =
        RescheduleNegotiator::new(h.store.clone(), h.clock.clone(), Duration::hours(24));
    assert!(!negotiator
        .expire_if_pending(&request.id)
        .expect("expiry checked"));

    let stored = h
        .store
        .fetch_reschedule(&request.id)
        .expect("fetch")
        .expect("exists");
    assert_eq!(stored.status, RescheduleStatus::Approved);
    assert!(stored.resolved_at.is_some());
}

#[test]
fn approval_against_a_moved_lesson_is_rejected() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let first = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");
    let second = h
        .machine
        .create_reschedule(
            &session.id,
            later_time(),
            "second thoughts".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    h.machine
        .respond_reschedule(&first.id, &tutor("t-alpha"), RescheduleResponse::Accepted)
        .expect("approved");

    // The sibling request's anchor no longer matches any lesson.
    let result = h.machine.respond_reschedule(
        &second.id,
        &tutor("t-alpha"),
        RescheduleResponse::Accepted,
    );
    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::AnchorMoved))
    ));

    // The lesson stays where the first approval put it.
    let session = h.machine.get_session(&session.id).expect("session");
    assert_eq!(session.lessons[0].scheduled_at, new_time());
}

#[test]
fn decline_returns_candidates_for_the_requested_time() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    let outcome = h
        .machine
        .respond_reschedule(&request.id, &tutor("t-alpha"), RescheduleResponse::Declined)
        .expect("declined");
    match outcome {
        RescheduleOutcome::Rejected { candidates } => {
            assert!(!candidates.is_empty());
        }
        other => panic!("expected rejection with candidates, got {other:?}"),
    }

    // The lesson stays where it was.
    let session = h.machine.get_session(&session.id).expect("session");
    assert_eq!(session.lessons[0].scheduled_at, lesson_time());
}

#[test]
fn retried_responses_echo_the_prior_resolution() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    h.machine
        .respond_reschedule(&request.id, &tutor("t-alpha"), RescheduleResponse::Accepted)
        .expect("approved");

    // Retry with the same answer echoes; a contradictory answer conflicts.
    let echoed = h
        .machine
        .respond_reschedule(&request.id, &tutor("t-alpha"), RescheduleResponse::Accepted)
        .expect("echoed");
    assert!(matches!(echoed, RescheduleOutcome::Approved { .. }));

    let conflicting = h.machine.respond_reschedule(
        &request.id,
        &tutor("t-alpha"),
        RescheduleResponse::Declined,
    );
    assert!(matches!(
        conflicting,
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[test]
fn general_pool_ranking_requires_a_lapsed_or_declined_request() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let request = h
        .machine
        .create_reschedule(
            &session.id,
            new_time(),
            "clash".to_string(),
            RequesterType::Parent,
            "parent-1".to_string(),
        )
        .expect("created");

    assert!(matches!(
        h.machine.rank_for_reschedule(&request.id),
        Err(EngineError::InvalidTransition { .. })
    ));
}

#[test]
fn terminal_sessions_reject_reschedule_requests() {
    let h = harness();
    let session = h.machine.create_session(new_session()).expect("created");
    h.machine.withdraw(&session.id).expect("withdrawn");

    let result = h.machine.create_reschedule(
        &session.id,
        new_time(),
        "too late".to_string(),
        RequesterType::Parent,
        "parent-1".to_string(),
    );
    assert!(matches!(
        result,
        Err(EngineError::InvalidTransition { .. })
    ));
}
