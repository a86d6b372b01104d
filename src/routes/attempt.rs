use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use uuid::Uuid;
use validator::Validate;

use crate::database::store::Pagination;
use crate::dto::attempt_dto::{
    AvailableAssessmentsPage, MonitorEventRequest, SaveAnswerRequest, SaveAnswerResponse,
    SubmitResponse,
};
use crate::error::{Error, Result};
use crate::middleware::auth::AuthUser;
use crate::AppState;

#[axum::debug_handler]
pub async fn list_available(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(pagination): Query<Pagination>,
) -> Result<Response> {
    let pagination = pagination.normalized();
    let (items, total) = state
        .attempt_service
        .list_available(user.user_id, pagination)
        .await?;
    let total_pages = (total + pagination.per_page - 1) / pagination.per_page;

    Ok(Json(AvailableAssessmentsPage {
        items,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(assessment_id): Path<Uuid>,
) -> Result<Response> {
    let started = state
        .attempt_service
        .start(user.user_id, assessment_id)
        .await?;
    Ok((StatusCode::CREATED, Json(started)).into_response())
}

#[axum::debug_handler]
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(assessment_id): Path<Uuid>,
) -> Result<Response> {
    let attempts = state
        .attempt_service
        .history(user.user_id, assessment_id)
        .await?;
    Ok(Json(attempts).into_response())
}

#[axum::debug_handler]
pub async fn get_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let view = state.attempt_service.status(attempt_id, user.user_id).await?;
    Ok(Json(view).into_response())
}

#[axum::debug_handler]
pub async fn get_questions(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let resumed = state.attempt_service.resume(attempt_id, user.user_id).await?;
    Ok(Json(resumed).into_response())
}

#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<SaveAnswerRequest>,
) -> Result<Response> {
    req.validate()?;
    let answer = state
        .attempt_service
        .save_answer(attempt_id, req.question_id, &req.answer, user.user_id)
        .await?;

    Ok(Json(SaveAnswerResponse {
        saved: true,
        question_id: answer.question_id,
        timestamp: answer.answered_at,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(attempt_id): Path<Uuid>,
) -> Result<Response> {
    let result = state.attempt_service.submit(attempt_id, user.user_id).await?;
    Ok(Json(SubmitResponse::from(result)).into_response())
}

#[axum::debug_handler]
pub async fn submit_monitor_event(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(attempt_id): Path<Uuid>,
    Json(req): Json<MonitorEventRequest>,
) -> Result<Response> {
    req.validate()?;
    let image = req
        .image
        .as_deref()
        .map(|encoded| {
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::BadRequest(format!("image is not valid base64: {}", e)))
        })
        .transpose()?;

    let result = state
        .attempt_service
        .submit_monitor_event(attempt_id, &req.event_type, &req.details, image, user.user_id)
        .await?;
    Ok(Json(result).into_response())
}
