use axum::response::{IntoResponse, Json};
use utoipa::OpenApi;

use super::{analytics, attempts, health, quizzes, sessions};

#[derive(OpenApi)]
#[openapi(
    info(title = "campus-quiz", description = "Quiz delivery and grading API"),
    paths(
        health::health,
        quizzes::list_quizzes,
        quizzes::create_quiz,
        quizzes::get_quiz,
        quizzes::update_quiz,
        quizzes::delete_quiz,
        quizzes::delete_question,
        sessions::start_session,
        sessions::get_session,
        sessions::save_answer,
        sessions::next_question,
        sessions::previous_question,
        sessions::submit_session,
        attempts::list_quiz_attempts,
        attempts::my_attempts,
        attempts::grade_attempt,
        attempts::regrade_attempt,
        analytics::quiz_analytics,
    )
)]
pub struct ApiDoc;

#[axum::debug_handler]
pub async fn openapi_json() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
