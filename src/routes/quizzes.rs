use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use uuid::Uuid;

use crate::{
    dto::quiz_dto::{QuizListQuery, SaveQuizPayload},
    error::Result,
    models::user::Viewer,
    AppState,
};

#[utoipa::path(
    get,
    path = "/api/quizzes",
    params(
        ("course_id" = Option<Uuid>, Query, description = "Only quizzes of this course")
    ),
    responses(
        (status = 200, description = "Quizzes visible to the caller"),
        (status = 401, description = "Missing or invalid token")
    )
)]
#[axum::debug_handler]
pub async fn list_quizzes(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Query(query): Query<QuizListQuery>,
) -> Result<impl IntoResponse> {
    let quizzes = state.quiz_service.list(&viewer, query).await?;
    Ok(Json(quizzes))
}

#[utoipa::path(
    post,
    path = "/api/quizzes",
    request_body = SaveQuizPayload,
    responses(
        (status = 201, description = "Quiz saved; body carries the temporary id mapping"),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Caller may not manage quizzes")
    )
)]
#[axum::debug_handler]
pub async fn create_quiz(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Json(payload): Json<SaveQuizPayload>,
) -> Result<impl IntoResponse> {
    let saved = state.quiz_service.save(&viewer, payload, None).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

#[utoipa::path(
    get,
    path = "/api/quizzes/{id}",
    params(
        ("id" = Uuid, Path, description = "Quiz ID")
    ),
    responses(
        (status = 200, description = "Full definition for staff, summary for students"),
        (status = 404, description = "Quiz not found")
    )
)]
#[axum::debug_handler]
pub async fn get_quiz(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let view = state.quiz_service.get(&viewer, id).await?;
    Ok(Json(view))
}

#[utoipa::path(
    put,
    path = "/api/quizzes/{id}",
    params(
        ("id" = Uuid, Path, description = "Quiz ID")
    ),
    request_body = SaveQuizPayload,
    responses(
        (status = 200, description = "Quiz saved"),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "A question id does not belong to the quiz")
    )
)]
#[axum::debug_handler]
pub async fn update_quiz(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveQuizPayload>,
) -> Result<impl IntoResponse> {
    let saved = state.quiz_service.save(&viewer, payload, Some(id)).await?;
    Ok(Json(saved))
}

#[utoipa::path(
    delete,
    path = "/api/quizzes/{id}",
    params(
        ("id" = Uuid, Path, description = "Quiz ID")
    ),
    responses(
        (status = 204, description = "Quiz deleted"),
        (status = 404, description = "Quiz not found")
    )
)]
#[axum::debug_handler]
pub async fn delete_quiz(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.quiz_service.delete(&viewer, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/quizzes/{id}/questions/{question_id}",
    params(
        ("id" = Uuid, Path, description = "Quiz ID"),
        ("question_id" = Uuid, Path, description = "Question ID")
    ),
    responses(
        (status = 204, description = "Question deleted"),
        (status = 404, description = "Question not found in quiz")
    )
)]
#[axum::debug_handler]
pub async fn delete_question(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path((id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    state
        .quiz_service
        .delete_question(&viewer, id, question_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
