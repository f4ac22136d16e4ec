use axum::{
    extract::{Path, State},
    response::{IntoResponse, Json},
    Extension,
};
use uuid::Uuid;

use crate::{error::Result, models::user::Viewer, AppState};

#[utoipa::path(
    get,
    path = "/api/quizzes/{id}/analytics",
    params(
        ("id" = Uuid, Path, description = "Quiz ID")
    ),
    responses(
        (status = 200, description = "Score, pass rate, timing and per-question statistics"),
        (status = 403, description = "Caller may not view analytics"),
        (status = 404, description = "Quiz not found")
    )
)]
#[axum::debug_handler]
pub async fn quiz_analytics(
    State(state): State<AppState>,
    Extension(viewer): Extension<Viewer>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let analytics = state.analytics_service.quiz_analytics(&viewer, id).await?;
    Ok(Json(analytics))
}
