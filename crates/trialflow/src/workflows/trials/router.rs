use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::domain::{
    AnalysisId, AttemptId, RequesterType, RescheduleId, SessionId, TutorId,
};
use super::outreach::OutreachResponse;
use super::ranking::RankedCandidate;
use super::repository::{RepositoryError, TrialStore, TutorDirectory};
use super::reschedule::RescheduleResponse;
use super::scores::ScoreComponent;
use super::service::{
    EngineError, FeedbackInput, NewSession, OutreachOutcome, RescheduleOutcome,
    SessionStateMachine,
};
use super::waitlist::JoinOutcome;

/// Router builder exposing the trial lifecycle engine over HTTP.
pub fn trial_router<S, D>(service: Arc<SessionStateMachine<S, D>>) -> Router
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    Router::new()
        .route("/api/v1/sessions", post(create_session::<S, D>))
        .route("/api/v1/sessions/:session_id", get(get_session::<S, D>))
        .route("/api/v1/sessions/:session_id/match", post(match_session::<S, D>))
        .route(
            "/api/v1/sessions/:session_id/start-outreach",
            post(start_outreach::<S, D>),
        )
        .route("/api/v1/sessions/:session_id/assign", post(assign_tutor::<S, D>))
        .route(
            "/api/v1/sessions/:session_id/retry-outreach",
            post(retry_outreach::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/outreach-attempts",
            get(list_attempts::<S, D>),
        )
        .route(
            "/api/v1/outreach-attempts/:attempt_id/respond",
            post(respond_outreach::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/reschedule",
            post(create_reschedule::<S, D>),
        )
        .route(
            "/api/v1/reschedule-requests/:request_id/respond",
            post(respond_reschedule::<S, D>),
        )
        .route(
            "/api/v1/reschedule-requests/:request_id/candidates",
            get(reschedule_candidates::<S, D>),
        )
        .route(
            "/api/v1/reschedule-requests/sweep",
            post(sweep_reschedules::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/join-waitlist",
            post(join_waitlist::<S, D>),
        )
        .route("/api/v1/sessions/:session_id/cancel", post(cancel_session::<S, D>))
        .route(
            "/api/v1/cancellation-analysis/:analysis_id/override",
            post(override_penalty::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/submit-diagnostic-enhanced",
            post(submit_diagnostic::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/submit-reflection-enhanced",
            post(submit_reflection::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/continue",
            post(mark_continuing::<S, D>),
        )
        .route(
            "/api/v1/sessions/:session_id/withdraw",
            post(withdraw_session::<S, D>),
        )
        .route(
            "/api/v1/tutors/:tutor_id/score",
            get(get_score::<S, D>).post(set_score::<S, D>),
        )
        .with_state(service)
}

fn error_response(error: EngineError) -> Response {
    let (status, code) = match &error {
        EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        EngineError::AlreadyAssigned => (StatusCode::CONFLICT, "already_assigned"),
        EngineError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
        EngineError::Repository(RepositoryError::NotFound) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        EngineError::Repository(RepositoryError::Conflict) => (StatusCode::CONFLICT, "conflict"),
        EngineError::Repository(RepositoryError::Unavailable(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "store_unavailable")
        }
    };
    let payload = json!({
        "error": error.to_string(),
        "code": code,
    });
    (status, axum::Json(payload)).into_response()
}

/// Candidate shape the client renders in the match dialog.
#[derive(Debug, Serialize)]
struct MatchedTutorView {
    id: TutorId,
    full_name: String,
    suburb: String,
    travel_time_text: String,
    composite_score: f64,
    from_waitlist: bool,
}

impl From<RankedCandidate> for MatchedTutorView {
    fn from(candidate: RankedCandidate) -> Self {
        Self {
            id: candidate.tutor_id,
            full_name: candidate.full_name,
            suburb: candidate.suburb,
            travel_time_text: candidate.travel_time_text,
            composite_score: candidate.composite_score,
            from_waitlist: candidate.from_waitlist,
        }
    }
}

fn matched_tutors(candidates: Vec<RankedCandidate>) -> serde_json::Value {
    let views: Vec<MatchedTutorView> = candidates.into_iter().map(Into::into).collect();
    json!({ "matched_tutors": views })
}

async fn create_session<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    axum::Json(payload): axum::Json<NewSession>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.create_session(payload) {
        Ok(session) => (
            StatusCode::CREATED,
            axum::Json(super::repository::SessionView::from_session(&session)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn get_session<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.get_session(&SessionId(session_id)) {
        Ok(session) => axum::Json(super::repository::SessionView::from_session(&session))
            .into_response(),
        Err(error) => error_response(error),
    }
}

async fn match_session<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.request_match(&SessionId(session_id)) {
        Ok(candidates) => axum::Json(matched_tutors(candidates)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct StartOutreachRequest {
    matched_tutors: Vec<String>,
}

async fn start_outreach<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<StartOutreachRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    let candidates: Vec<TutorId> = payload.matched_tutors.into_iter().map(TutorId).collect();
    match service.start_outreach(&SessionId(session_id), &candidates) {
        Ok(view) => axum::Json(view).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    tutor_id: String,
}

async fn assign_tutor<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<AssignRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.assign_tutor(&SessionId(session_id), &TutorId(payload.tutor_id)) {
        Ok(view) => axum::Json(json!({ "session": view })).into_response(),
        Err(error) => error_response(error),
    }
}

async fn retry_outreach<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.retry_outreach(&SessionId(session_id)) {
        Ok(view) => axum::Json(view).into_response(),
        Err(error) => error_response(error),
    }
}

async fn list_attempts<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.attempts_for_session(&SessionId(session_id)) {
        Ok(attempts) => axum::Json(json!({ "attempts": attempts })).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct OutreachRespondRequest {
    response: OutreachResponse,
}

async fn respond_outreach<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(attempt_id): Path<String>,
    axum::Json(payload): axum::Json<OutreachRespondRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.respond_outreach(&AttemptId(attempt_id), payload.response) {
        Ok(OutreachOutcome::Confirmed(view)) => {
            axum::Json(json!({ "outcome": "confirmed", "session": view })).into_response()
        }
        // The race was lost; a polite outcome rather than an error.
        Ok(OutreachOutcome::AlreadyFilled) => {
            axum::Json(json!({ "outcome": "already_filled" })).into_response()
        }
        Ok(OutreachOutcome::Recorded { session_failed }) => axum::Json(json!({
            "outcome": "recorded",
            "session_failed": session_failed,
        }))
        .into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct CreateRescheduleRequest {
    new_datetime: DateTime<Utc>,
    reason: String,
    requester_id: String,
    requester_type: RequesterType,
}

async fn create_reschedule<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<CreateRescheduleRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.create_reschedule(
        &SessionId(session_id),
        payload.new_datetime,
        payload.reason,
        payload.requester_type,
        payload.requester_id,
    ) {
        Ok(request) => (StatusCode::CREATED, axum::Json(request)).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct RescheduleRespondRequest {
    response: RescheduleResponse,
    tutor_id: String,
}

async fn respond_reschedule<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(request_id): Path<String>,
    axum::Json(payload): axum::Json<RescheduleRespondRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.respond_reschedule(
        &RescheduleId(request_id),
        &TutorId(payload.tutor_id),
        payload.response,
    ) {
        Ok(RescheduleOutcome::Approved { session }) => {
            axum::Json(json!({ "outcome": "approved", "session": session })).into_response()
        }
        Ok(RescheduleOutcome::Rejected { candidates }) => axum::Json(json!({
            "outcome": "rejected",
            "matched_tutors": candidates
                .into_iter()
                .map(MatchedTutorView::from)
                .collect::<Vec<_>>(),
        }))
        .into_response(),
        Err(error) => error_response(error),
    }
}

async fn reschedule_candidates<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(request_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.rank_for_reschedule(&RescheduleId(request_id)) {
        Ok(candidates) => axum::Json(matched_tutors(candidates)).into_response(),
        Err(error) => error_response(error),
    }
}

async fn sweep_reschedules<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.sweep_reschedules() {
        Ok(expired) => axum::Json(json!({ "expired": expired })).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct JoinWaitlistRequest {
    tutor_id: String,
}

async fn join_waitlist<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<JoinWaitlistRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.join_waitlist(&SessionId(session_id), &TutorId(payload.tutor_id)) {
        Ok(outcome) => {
            let outcome = match outcome {
                JoinOutcome::Joined => "joined",
                JoinOutcome::AlreadyJoined => "already_joined",
                JoinOutcome::OwnSessionNoOp => "already_assigned",
            };
            axum::Json(json!({ "outcome": outcome })).into_response()
        }
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    canceling_tutor_id: String,
    #[serde(default)]
    reason: String,
}

async fn cancel_session<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<CancelRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.cancel(
        &SessionId(session_id),
        &TutorId(payload.canceling_tutor_id),
        payload.reason,
    ) {
        Ok(outcome) => axum::Json(json!({
            "analysis": outcome.analysis,
            "session": outcome.session,
        }))
        .into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct OverrideRequest {
    override_penalty: f64,
    override_reason: String,
    admin_id: String,
}

async fn override_penalty<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(analysis_id): Path<String>,
    axum::Json(payload): axum::Json<OverrideRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.override_penalty(
        &AnalysisId(analysis_id),
        payload.override_penalty,
        &payload.override_reason,
        &payload.admin_id,
    ) {
        Ok(analysis) => axum::Json(analysis).into_response(),
        Err(error) => error_response(error),
    }
}

async fn submit_diagnostic<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<FeedbackInput>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.submit_diagnostic(&SessionId(session_id), payload) {
        Ok(view) => axum::Json(view).into_response(),
        Err(error) => error_response(error),
    }
}

async fn submit_reflection<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
    axum::Json(payload): axum::Json<FeedbackInput>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.submit_reflection(&SessionId(session_id), payload) {
        Ok(view) => axum::Json(view).into_response(),
        Err(error) => error_response(error),
    }
}

async fn mark_continuing<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.mark_continuing(&SessionId(session_id)) {
        Ok(view) => axum::Json(view).into_response(),
        Err(error) => error_response(error),
    }
}

async fn withdraw_session<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(session_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    match service.withdraw(&SessionId(session_id)) {
        Ok(view) => axum::Json(view).into_response(),
        Err(error) => error_response(error),
    }
}

#[derive(Debug, Deserialize)]
struct SetScoreRequest {
    component: ScoreComponent,
    value: f64,
}

async fn set_score<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(tutor_id): Path<String>,
    axum::Json(payload): axum::Json<SetScoreRequest>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    let view = service.set_score_component(&TutorId(tutor_id), payload.component, payload.value);
    axum::Json(view).into_response()
}

async fn get_score<S, D>(
    State(service): State<Arc<SessionStateMachine<S, D>>>,
    Path(tutor_id): Path<String>,
) -> Response
where
    S: TrialStore + 'static,
    D: TutorDirectory + 'static,
{
    axum::Json(service.tutor_score(&TutorId(tutor_id))).into_response()
}
