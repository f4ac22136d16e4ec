use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use uuid::Uuid;

use crate::{dto::session_dto::AnswerRequest, error::Result, models::user::Viewer, AppState};

#[utoipa::path(
    post,
    path = "/api/quizzes/{id}/sessions",
    params(
        ("id" = Uuid, Path, description = "Quiz ID")
    ),
    responses(
        (status = 201, description = "Session started"),
        (status = 403, description = "Caller may not take quizzes"),
        (status = 404, description = "Quiz not found or not published"),
        (status = 409, description = "Maximum attempts reached")
    )
)]
#[axum::debug_handler]
pub async fn start_session(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.attempt_service.start(&viewer, id).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[utoipa::path(
    get,
    path = "/api/sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Current session state"),
        (status = 404, description = "Session not found")
    )
)]
#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.attempt_service.view(&viewer, id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    put,
    path = "/api/sessions/{id}/answers/{question_id}",
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("question_id" = Uuid, Path, description = "Question ID")
    ),
    responses(
        (status = 200, description = "Answer stored"),
        (status = 400, description = "Question is not part of the session"),
        (status = 409, description = "Session is no longer in progress")
    )
)]
#[axum::debug_handler]
pub async fn save_answer(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path((id, question_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<AnswerRequest>,
) -> Result<impl IntoResponse> {
    let view = state
        .attempt_service
        .answer(&viewer, id, question_id, payload.value)
        .await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/next",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses((status = 200, description = "Cursor moved forward"))
)]
#[axum::debug_handler]
pub async fn next_question(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.attempt_service.next(&viewer, id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/previous",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses((status = 200, description = "Cursor moved back"))
)]
#[axum::debug_handler]
pub async fn previous_question(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.attempt_service.previous(&viewer, id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    post,
    path = "/api/sessions/{id}/submit",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    responses(
        (status = 200, description = "Attempt submitted; grading outcome included"),
        (status = 409, description = "Attempt was already submitted"),
        (status = 500, description = "Submission could not be stored; retry")
    )
)]
#[axum::debug_handler]
pub async fn submit_session(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.submit(&viewer, id).await?;
    Ok(Json(result))
}
