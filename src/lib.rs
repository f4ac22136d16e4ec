pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use crate::database::store::QuizStore;
use crate::services::{
    analytics_service::AnalyticsService,
    attempt_service::AttemptService,
    grading_service::{GradingService, RetryPolicy},
    quiz_service::QuizService,
    session_registry::SessionRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn QuizStore>,
    pub quiz_service: QuizService,
    pub attempt_service: AttemptService,
    pub grading_service: GradingService,
    pub analytics_service: AnalyticsService,
    pub sessions: SessionRegistry,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    pub fn new(store: Arc<dyn QuizStore>, jwt_secret: &str, policy: RetryPolicy) -> Self {
        let sessions = SessionRegistry::new();
        let grading_service = GradingService::new(store.clone(), policy);
        let attempt_service =
            AttemptService::new(store.clone(), grading_service.clone(), sessions.clone());
        let quiz_service = QuizService::new(store.clone());
        let analytics_service = AnalyticsService::new(store.clone());

        Self {
            store,
            quiz_service,
            attempt_service,
            grading_service,
            analytics_service,
            sessions,
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}
