use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::answer::Answer;
use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradingStatus {
    Pending,
    AutoGraded,
    ManuallyGraded,
}

text_enum!(GradingStatus {
    Pending => "pending",
    AutoGraded => "auto_graded",
    ManuallyGraded => "manually_graded",
});

impl GradingStatus {
    pub fn is_graded(&self) -> bool {
        !matches!(self, GradingStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Attempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i32,
    #[sqlx(try_from = "String")]
    pub grading_status: GradingStatus,
    pub score: Option<Decimal>,
    pub max_score: Option<Decimal>,
    pub percentage_score: Option<Decimal>,
    pub requires_manual_review: bool,
    pub grading_failures: i32,
    pub last_grading_error: Option<String>,
    pub next_grading_at: Option<DateTime<Utc>>,
    pub graded_by: Option<Uuid>,
    pub graded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    /// Percentage score, only once grading has left `pending`.
    pub fn graded_percentage(&self) -> Option<f64> {
        if !self.grading_status.is_graded() {
            return None;
        }
        self.percentage_score.and_then(|p| p.to_f64())
    }
}

/// The row written at submission time; grading columns start empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub student_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptWithAnswers {
    #[serde(flatten)]
    pub attempt: Attempt,
    pub answers: Vec<Answer>,
}
