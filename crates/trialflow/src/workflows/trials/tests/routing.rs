use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::{harness, read_json_body, text_of, Harness};

fn app(h: &Harness) -> Router {
    crate::workflows::trials::router::trial_router(h.machine.clone())
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request built")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request built")
}

fn session_payload() -> Value {
    json!({
        "parent_name": "Priya Narayan",
        "parent_email": "priya@example.com",
        "location": "Chatswood Library",
        "lessons": [{
            "subject": "Mathematics",
            "student_name": "Anika",
            "student_grade": "Year 8",
            "scheduled_at": "2026-03-04T10:00:00Z",
            "timezone": "Australia/Sydney",
            "duration_minutes": 60
        }]
    })
}

async fn create_session(h: &Harness) -> String {
    let response = app(h)
        .oneshot(post_json("/api/v1/sessions", session_payload()))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json_body(response).await;
    body["session_id"].as_str().expect("session id").to_string()
}

#[tokio::test]
async fn create_session_returns_a_pending_view() {
    let h = harness();
    let response = app(&h)
        .oneshot(post_json("/api/v1/sessions", session_payload()))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json_body(response).await;
    assert_eq!(body["status"], "pending");
    assert_eq!(body["status_label"], "Pending");
    assert_eq!(body["next_action"], "request_match");
    assert_eq!(body["location"]["kind"], "library");
    assert!(body["assigned_tutor"].is_null());
}

#[tokio::test]
async fn unknown_session_returns_404_with_code() {
    let h = harness();
    let response = app(&h)
        .oneshot(get("/api/v1/sessions/ts-999999"))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json_body(response).await;
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn match_endpoint_lists_ranked_tutors() {
    let h = harness();
    let session_id = create_session(&h).await;

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/match"),
            json!({}),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json_body(response).await;
    let tutors = body["matched_tutors"].as_array().expect("array");
    assert_eq!(tutors.len(), 3);
    assert_eq!(tutors[0]["id"], "t-alpha");
    assert_eq!(tutors[0]["travel_time_text"], "10 min");
    assert_eq!(tutors[0]["composite_score"], 125.0);
}

#[tokio::test]
async fn outreach_round_trip_confirms_the_first_acceptance() {
    let h = harness();
    let session_id = create_session(&h).await;

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/start-outreach"),
            json!({ "matched_tutors": ["t-alpha", "t-bravo"] }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["status"], "outreach_in_progress");

    let response = app(&h)
        .oneshot(get(&format!(
            "/api/v1/sessions/{session_id}/outreach-attempts"
        )))
        .await
        .expect("routed");
    let body = read_json_body(response).await;
    let attempts = body["attempts"].as_array().expect("attempts");
    assert_eq!(attempts.len(), 2);
    let first = attempts[0]["attempt_id"].as_str().expect("id").to_string();
    let second = attempts[1]["attempt_id"].as_str().expect("id").to_string();

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/outreach-attempts/{first}/respond"),
            json!({ "response": "accepted" }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["outcome"], "confirmed");
    assert_eq!(body["session"]["status"], "confirmed");

    // The losing acceptance stays a 200 with its own outcome.
    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/outreach-attempts/{second}/respond"),
            json!({ "response": "accepted" }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["outcome"], "already_filled");
}

#[tokio::test]
async fn short_feedback_is_a_422_validation_error() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let session_id = session.id.0;

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/submit-diagnostic-enhanced"),
            json!({
                "assessment": "too short",
                "suggestions": text_of(30),
                "plan": text_of(30),
            }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json_body(response).await;
    assert_eq!(body["code"], "validation_error");
    assert!(body["error"]
        .as_str()
        .expect("message")
        .contains("assessment"));
}

#[tokio::test]
async fn out_of_order_operations_conflict() {
    let h = harness();
    let session_id = create_session(&h).await;

    // Reflection before the diagnostic: the lifecycle says no.
    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/submit-reflection-enhanced"),
            json!({
                "assessment": text_of(40),
                "suggestions": text_of(30),
                "plan": text_of(30),
            }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = read_json_body(response).await;
    assert_eq!(body["code"], "invalid_transition");
}

#[tokio::test]
async fn score_endpoints_read_and_write_components() {
    let h = harness();

    let response = app(&h)
        .oneshot(get("/api/v1/tutors/t-alpha/score"))
        .await
        .expect("routed");
    let body = read_json_body(response).await;
    assert_eq!(body["composite_score"], 125.0);

    let response = app(&h)
        .oneshot(post_json(
            "/api/v1/tutors/t-alpha/score",
            json!({ "component": "reliability", "value": 8.0 }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["score_reliability"], 8.0);
    assert_eq!(body["composite_score"], 200.0);
}

#[tokio::test]
async fn join_waitlist_reports_each_outcome() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let session_id = session.id.0;

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/join-waitlist"),
            json!({ "tutor_id": "t-bravo" }),
        ))
        .await
        .expect("routed");
    let body = read_json_body(response).await;
    assert_eq!(body["outcome"], "joined");

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/join-waitlist"),
            json!({ "tutor_id": "t-bravo" }),
        ))
        .await
        .expect("routed");
    let body = read_json_body(response).await;
    assert_eq!(body["outcome"], "already_joined");

    // The assigned tutor joining their own session succeeds as a no-op.
    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/join-waitlist"),
            json!({ "tutor_id": "t-alpha" }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["outcome"], "already_assigned");
}

#[tokio::test]
async fn cancellation_returns_analysis_and_override_is_audited() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let session_id = session.id.0.clone();

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/cancel"),
            json!({ "canceling_tutor_id": "t-alpha", "reason": "unwell" }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    let analysis_id = body["analysis"]["id"].as_str().expect("id").to_string();
    assert_eq!(body["session"]["status"], "pending");

    // Override without a reason is rejected; with one it is recorded.
    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/cancellation-analysis/{analysis_id}/override"),
            json!({ "override_penalty": 0.0, "override_reason": "", "admin_id": "admin-7" }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/cancellation-analysis/{analysis_id}/override"),
            json!({
                "override_penalty": 0.0,
                "override_reason": "medical certificate provided",
                "admin_id": "admin-7"
            }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json_body(response).await;
    assert_eq!(body["admin_override"], true);
    assert_eq!(body["final_penalty"], 0.0);
    assert_eq!(body["overridden_by"], "admin-7");
}

#[tokio::test]
async fn sweep_endpoint_reports_expired_windows() {
    let h = harness();
    let session = h.confirmed_session("t-alpha");
    let session_id = session.id.0;

    let response = app(&h)
        .oneshot(post_json(
            &format!("/api/v1/sessions/{session_id}/reschedule"),
            json!({
                "new_datetime": "2026-03-06T14:00:00Z",
                "reason": "clashes with sport",
                "requester_id": "parent-1",
                "requester_type": "parent"
            }),
        ))
        .await
        .expect("routed");
    assert_eq!(response.status(), StatusCode::CREATED);

    h.advance_hours(25);
    let response = app(&h)
        .oneshot(post_json("/api/v1/reschedule-requests/sweep", json!({})))
        .await
        .expect("routed");
    let body = read_json_body(response).await;
    assert_eq!(body["expired"], 1);
}
