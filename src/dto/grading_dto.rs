use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManualGrade {
    pub question_id: Uuid,
    pub points: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ManualGradePayload {
    #[validate(length(min = 1, message = "At least one grade is required"))]
    pub grades: Vec<ManualGrade>,
}
