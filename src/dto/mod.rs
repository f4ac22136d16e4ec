pub mod grading_dto;
pub mod quiz_dto;
pub mod session_dto;
