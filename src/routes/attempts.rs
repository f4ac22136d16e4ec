use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use uuid::Uuid;
use validator::Validate;

use crate::{dto::grading_dto::ManualGradePayload, error::Result, models::user::Viewer, AppState};

#[utoipa::path(
    get,
    path = "/api/quizzes/{id}/attempts",
    params(
        ("id" = Uuid, Path, description = "Quiz ID")
    ),
    responses(
        (status = 200, description = "All attempts of the quiz with their answers"),
        (status = 403, description = "Caller may not view other students' attempts")
    )
)]
#[axum::debug_handler]
pub async fn list_quiz_attempts(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let attempts = state.attempt_service.quiz_attempts(&viewer, id).await?;
    Ok(Json(attempts))
}

#[utoipa::path(
    get,
    path = "/api/me/attempts",
    responses((status = 200, description = "The caller's own attempts"))
)]
#[axum::debug_handler]
pub async fn my_attempts(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
) -> Result<impl IntoResponse> {
    let attempts = state.attempt_service.my_attempts(&viewer).await?;
    Ok(Json(attempts))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/grade",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    request_body = ManualGradePayload,
    responses(
        (status = 200, description = "Attempt graded manually"),
        (status = 400, description = "Missing or out-of-range grades"),
        (status = 403, description = "Caller may not grade")
    )
)]
#[axum::debug_handler]
pub async fn grade_attempt(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ManualGradePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let attempt = state
        .attempt_service
        .grade_manually(&viewer, id, &payload.grades)
        .await?;
    Ok(Json(attempt))
}

#[utoipa::path(
    post,
    path = "/api/attempts/{id}/regrade",
    params(
        ("id" = Uuid, Path, description = "Attempt ID")
    ),
    responses(
        (status = 200, description = "Grading function invoked again"),
        (status = 409, description = "Attempt was graded manually")
    )
)]
#[axum::debug_handler]
pub async fn regrade_attempt(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let outcome = state.attempt_service.regrade(&viewer, id).await?;
    Ok(Json(outcome))
}
