use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::question::QuestionWithOptions;
use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizType {
    Graded,
    Trivia,
    Personality,
    Survey,
    Poll,
}

text_enum!(QuizType {
    Graded => "graded",
    Trivia => "trivia",
    Personality => "personality",
    Survey => "survey",
    Poll => "poll",
});

impl Default for QuizType {
    fn default() -> Self {
        QuizType::Graded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Quiz {
    pub id: Uuid,
    pub course_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    #[sqlx(try_from = "String")]
    pub quiz_type: QuizType,
    pub time_limit_minutes: Option<i32>,
    pub max_attempts: Option<i32>,
    pub randomize_questions: bool,
    pub randomize_answers: bool,
    pub show_results_immediately: bool,
    pub passing_score: Decimal,
    pub is_published: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quiz {
    /// Countdown length for a session, if the quiz is timed. Saturates for limits the
    /// editor would not accept.
    pub fn time_limit_seconds(&self) -> Option<u32> {
        self.time_limit_minutes
            .and_then(|m| u32::try_from(m).ok())
            .filter(|m| *m > 0)
            .map(|m| m.saturating_mul(60))
    }
}

/// A quiz with its questions (ordered by position) and each question's options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub questions: Vec<QuestionWithOptions>,
}

impl QuizDefinition {
    pub fn question(&self, question_id: Uuid) -> Option<&QuestionWithOptions> {
        self.questions.iter().find(|q| q.question.id == question_id)
    }

    pub fn total_points(&self) -> i32 {
        self.questions.iter().map(|q| q.question.points).sum()
    }
}
