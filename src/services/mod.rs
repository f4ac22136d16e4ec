pub mod analytics_service;
pub mod attempt_service;
pub mod attempt_session;
pub mod grading_service;
pub mod quiz_service;
pub mod session_registry;
