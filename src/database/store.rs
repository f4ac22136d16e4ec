use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dto::quiz_dto::{SaveQuizPayload, SavedQuiz};
use crate::error::Result;
use crate::models::answer::NewAnswer;
use crate::models::attempt::{Attempt, AttemptWithAnswers, GradingStatus, NewAttempt};
use crate::models::question::{Question, QuestionWithOptions, QuizOption};
use crate::models::quiz::{Quiz, QuizDefinition};
use crate::services::grading_service::GradeReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuizFilter {
    pub course_id: Option<Uuid>,
    pub published_only: bool,
}

/// Everything the quiz workflow needs from persistence. The grading function lives
/// behind `invoke_grading` and is treated as a fallible remote call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuizStore: Send + Sync {
    async fn fetch_quiz(&self, quiz_id: Uuid) -> Result<QuizDefinition>;

    async fn list_quizzes(&self, filter: QuizFilter) -> Result<Vec<Quiz>>;

    /// Upserts the quiz, its questions and their options as one unit.
    async fn save_quiz_aggregate(
        &self,
        payload: &SaveQuizPayload,
        editor_id: Uuid,
    ) -> Result<SavedQuiz>;

    async fn delete_quiz(&self, quiz_id: Uuid) -> Result<bool>;

    async fn delete_question(&self, quiz_id: Uuid, question_id: Uuid) -> Result<bool>;

    async fn count_attempts(&self, quiz_id: Uuid, student_id: Uuid) -> Result<i64>;

    /// Idempotent on the attempt id.
    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<()>;

    /// Idempotent on `(attempt_id, question_id)`.
    async fn insert_answers(&self, answers: &[NewAnswer]) -> Result<()>;

    async fn invoke_grading(&self, attempt_id: Uuid) -> Result<()>;

    async fn fetch_attempt(&self, attempt_id: Uuid) -> Result<AttemptWithAnswers>;

    async fn list_quiz_attempts(&self, quiz_id: Uuid) -> Result<Vec<AttemptWithAnswers>>;

    async fn list_student_attempts(&self, student_id: Uuid) -> Result<Vec<Attempt>>;

    async fn record_grading_failure(
        &self,
        attempt_id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<Attempt>;

    /// Pending attempts the retry worker should grade, oldest first: those whose retry
    /// time has passed with a failure count below `max_failures`, and those submitted
    /// before `unclaimed_before` that never got a grade or a recorded failure.
    async fn due_grading_retries(
        &self,
        now: DateTime<Utc>,
        unclaimed_before: DateTime<Utc>,
        max_failures: i32,
        limit: i64,
    ) -> Result<Vec<Uuid>>;

    async fn save_grade(
        &self,
        attempt_id: Uuid,
        report: &GradeReport,
        status: GradingStatus,
        graded_by: Option<Uuid>,
    ) -> Result<Attempt>;
}

/// Groups flat question and option rows into a definition, both ordered by position.
pub fn assemble(quiz: Quiz, questions: Vec<Question>, options: Vec<QuizOption>) -> QuizDefinition {
    let mut by_question: HashMap<Uuid, Vec<QuizOption>> = HashMap::new();
    for option in options {
        by_question.entry(option.question_id).or_default().push(option);
    }

    let mut questions: Vec<QuestionWithOptions> = questions
        .into_iter()
        .map(|question| {
            let mut options = by_question.remove(&question.id).unwrap_or_default();
            options.sort_by_key(|o| o.position);
            QuestionWithOptions { question, options }
        })
        .collect();
    questions.sort_by_key(|q| q.question.position);

    QuizDefinition { quiz, questions }
}
