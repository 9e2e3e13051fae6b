use crate::error::TrackerError;
use crate::ledger::{NewSubmission, SubmissionFilter};
use crate::service::TrackerService;
use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequestParts, Json, Path, Query, Request, State,
    },
    http::{request::Parts, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<TrackerService>,
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/submissions", post(create_submission).get(list_submissions))
        .route("/api/submissions/stats", get(submission_stats))
        .route("/api/submissions/:id", get(get_submission).delete(delete_submission))
        .route("/api/analysis/dashboard", get(get_dashboard))
        .route("/api/analysis/weaknesses", get(get_weaknesses))
        .route("/api/analysis/weaknesses/:topic", get(get_topic_weaknesses))
        .route("/api/analysis/weaknesses/id/:id", delete(delete_weakness))
        .route("/api/analysis/topic/:topic", post(analyze_topic))
        .route("/api/analysis/topic/:topic/run", post(run_analysis))
        .route("/api/analysis/reconcile", post(reconcile))
        .route("/api/reviews", get(list_reviews))
        .route("/api/reviews/due", get(due_reviews))
        .route("/api/reviews/topic/:topic", get(topic_review).post(schedule_review))
        .route("/api/reviews/:id/complete", patch(complete_review))
        .route("/api/reviews/:id", delete(delete_review))
        .route("/api/feedback", get(feedback_for_user))
        .route("/api/feedback/submission/:id", get(feedback_for_submission))
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(req).await;

    log::info!(
        "{} {} -> {} in {}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

/// Caller identity from the `x-user-id` header.
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = TrackerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or(TrackerError::Unauthorized)
    }
}

impl IntoResponse for TrackerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            TrackerError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            TrackerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            TrackerError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            TrackerError::Storage(_) | TrackerError::Serialization(_) => {
                log::error!("request failed: {}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

fn accepted(message: &str) -> Response {
    (StatusCode::ACCEPTED, Json(json!({ "success": true, "message": message }))).into_response()
}

type ApiResult = Result<Response, TrackerError>;

#[derive(Deserialize)]
struct AccuracyRequest {
    accuracy: Option<f64>,
}

impl AccuracyRequest {
    fn accuracy(self) -> Result<f64, TrackerError> {
        self.accuracy
            .ok_or_else(|| TrackerError::validation("accuracy is required"))
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, TrackerError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| TrackerError::validation(e.body_text()))
}

async fn create_submission(
    State(state): State<ApiState>,
    UserId(user): UserId,
    payload: Result<Json<NewSubmission>, JsonRejection>,
) -> ApiResult {
    let receipt = state.service.record_submission(&user, body(payload)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Submission recorded", "data": receipt })),
    )
        .into_response())
}

async fn list_submissions(
    State(state): State<ApiState>,
    UserId(user): UserId,
    filter: Result<Query<SubmissionFilter>, QueryRejection>,
) -> ApiResult {
    let Query(filter) = filter.map_err(|e| TrackerError::validation(e.body_text()))?;
    Ok(ok(state.service.list_submissions(&user, &filter).await?))
}

async fn submission_stats(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.submission_stats(&user).await?))
}

async fn get_submission(State(state): State<ApiState>, UserId(user): UserId, Path(id): Path<String>) -> ApiResult {
    Ok(ok(state.service.get_submission(&user, &id).await?))
}

async fn delete_submission(State(state): State<ApiState>, UserId(user): UserId, Path(id): Path<String>) -> ApiResult {
    state.service.delete_submission(&user, &id).await?;
    Ok(Json(json!({ "success": true, "message": "Submission deleted" })).into_response())
}

async fn get_dashboard(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.get_dashboard(&user).await?))
}

async fn get_weaknesses(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.get_weaknesses(&user).await?))
}

async fn get_topic_weaknesses(
    State(state): State<ApiState>,
    UserId(user): UserId,
    Path(topic): Path<String>,
) -> ApiResult {
    Ok(ok(state.service.get_topic_weaknesses(&user, &topic).await?))
}

async fn delete_weakness(State(state): State<ApiState>, UserId(user): UserId, Path(id): Path<String>) -> ApiResult {
    state.service.delete_weakness(&user, &id).await?;
    Ok(Json(json!({ "success": true, "message": "Weakness deleted" })).into_response())
}

async fn analyze_topic(State(state): State<ApiState>, UserId(user): UserId, Path(topic): Path<String>) -> ApiResult {
    state.service.analyze_topic(&user, &topic)?;
    Ok(accepted("Analysis queued"))
}

async fn run_analysis(State(state): State<ApiState>, UserId(user): UserId, Path(topic): Path<String>) -> ApiResult {
    Ok(ok(state.service.run_analysis(&user, &topic).await?))
}

async fn reconcile(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.reconcile_profile(&user).await?))
}

async fn list_reviews(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.list_reviews(&user).await?))
}

async fn due_reviews(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.due_reviews(&user).await?))
}

async fn topic_review(State(state): State<ApiState>, UserId(user): UserId, Path(topic): Path<String>) -> ApiResult {
    Ok(ok(state.service.topic_review(&user, &topic).await?))
}

async fn schedule_review(
    State(state): State<ApiState>,
    UserId(user): UserId,
    Path(topic): Path<String>,
    payload: Result<Json<AccuracyRequest>, JsonRejection>,
) -> ApiResult {
    let accuracy = body(payload)?.accuracy()?;
    state.service.schedule_review(&user, &topic, accuracy)?;
    Ok(accepted("Review check queued"))
}

async fn complete_review(
    State(state): State<ApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
    payload: Result<Json<AccuracyRequest>, JsonRejection>,
) -> ApiResult {
    let accuracy = body(payload)?.accuracy()?;
    Ok(ok(state.service.complete_review(&user, &id, accuracy).await?))
}

async fn delete_review(State(state): State<ApiState>, UserId(user): UserId, Path(id): Path<String>) -> ApiResult {
    state.service.delete_review(&user, &id).await?;
    Ok(Json(json!({ "success": true, "message": "Review deleted" })).into_response())
}

async fn feedback_for_user(State(state): State<ApiState>, UserId(user): UserId) -> ApiResult {
    Ok(ok(state.service.feedback_for_user(&user).await?))
}

async fn feedback_for_submission(
    State(state): State<ApiState>,
    UserId(user): UserId,
    Path(id): Path<String>,
) -> ApiResult {
    Ok(ok(state.service.feedback_for_submission(&user, &id).await?))
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
