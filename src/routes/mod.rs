use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::middleware::auth::require_bearer_auth;
use crate::AppState;

pub mod analytics;
pub mod attempts;
pub mod docs;
pub mod health;
pub mod quizzes;
pub mod sessions;

pub fn build_router(state: AppState) -> Router {
    let base_routes = Router::new()
        .route("/health", get(health::health))
        .route("/api/openapi.json", get(docs::openapi_json));

    let quiz_api = Router::new()
        .route(
            "/api/quizzes",
            get(quizzes::list_quizzes).post(quizzes::create_quiz),
        )
        .route(
            "/api/quizzes/:id",
            get(quizzes::get_quiz)
                .put(quizzes::update_quiz)
                .delete(quizzes::delete_quiz),
        )
        .route(
            "/api/quizzes/:id/questions/:question_id",
            delete(quizzes::delete_question),
        )
        .route("/api/quizzes/:id/sessions", post(sessions::start_session))
        .route(
            "/api/quizzes/:id/attempts",
            get(attempts::list_quiz_attempts),
        )
        .route(
            "/api/quizzes/:id/analytics",
            get(analytics::quiz_analytics),
        )
        .route("/api/sessions/:id", get(sessions::get_session))
        .route(
            "/api/sessions/:id/answers/:question_id",
            put(sessions::save_answer),
        )
        .route("/api/sessions/:id/next", post(sessions::next_question))
        .route(
            "/api/sessions/:id/previous",
            post(sessions::previous_question),
        )
        .route("/api/sessions/:id/submit", post(sessions::submit_session))
        .route("/api/me/attempts", get(attempts::my_attempts))
        .route("/api/attempts/:id/grade", post(attempts::grade_attempt))
        .route(
            "/api/attempts/:id/regrade",
            post(attempts::regrade_attempt),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_bearer_auth,
        ));

    base_routes.merge(quiz_api).with_state(state)
}
