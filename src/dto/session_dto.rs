use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::quiz_dto::PublicQuestion;
use crate::models::attempt::{Attempt, GradingStatus};
use crate::models::quiz::Quiz;
use crate::services::attempt_session::{AttemptSession, SessionState};
use crate::services::grading_service::GradingOutcome;

/// A session as its student sees it: the working question order without answer keys.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub quiz_id: Option<Uuid>,
    pub title: Option<String>,
    pub state: SessionState,
    pub cursor: usize,
    pub question_count: usize,
    pub current_question_id: Option<Uuid>,
    pub questions: Vec<PublicQuestion>,
    pub answers: HashMap<Uuid, JsonValue>,
    pub remaining_seconds: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

impl From<&AttemptSession> for SessionView {
    fn from(session: &AttemptSession) -> Self {
        Self {
            session_id: session.attempt_id(),
            quiz_id: session.quiz().map(|q| q.id),
            title: session.quiz().map(|q| q.title.clone()),
            state: session.state(),
            cursor: session.cursor(),
            question_count: session.questions().len(),
            current_question_id: session.current_question().map(|q| q.question.id),
            questions: session.questions().iter().map(PublicQuestion::from).collect(),
            answers: session.answers().clone(),
            remaining_seconds: session.remaining_seconds(),
            started_at: session.started_at(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    #[serde(default)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub attempt_id: Uuid,
    pub state: SessionState,
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i32,
    pub grading_status: GradingStatus,
    pub grading: Option<GradingOutcome>,
    pub score: Option<Decimal>,
    pub max_score: Option<Decimal>,
    pub percentage_score: Option<Decimal>,
    pub passed: Option<bool>,
}

/// The score columns a student may see: only once graded, and only if the quiz
/// reveals results.
struct Revealed {
    score: Option<Decimal>,
    max_score: Option<Decimal>,
    percentage_score: Option<Decimal>,
    passed: Option<bool>,
}

impl Revealed {
    fn new(attempt: &Attempt, quiz: Option<&Quiz>) -> Self {
        let quiz = quiz.filter(|q| q.show_results_immediately && attempt.grading_status.is_graded());
        let percentage_score = quiz.and(attempt.percentage_score);
        Self {
            score: quiz.and(attempt.score),
            max_score: quiz.and(attempt.max_score),
            percentage_score,
            passed: quiz.zip(percentage_score).map(|(q, p)| p >= q.passing_score),
        }
    }
}

impl SubmitResponse {
    pub fn new(
        attempt: &Attempt,
        quiz: &Quiz,
        state: SessionState,
        grading: Option<GradingOutcome>,
    ) -> Self {
        let revealed = Revealed::new(attempt, Some(quiz));
        Self {
            attempt_id: attempt.id,
            state,
            submitted_at: attempt.submitted_at,
            time_spent_seconds: attempt.time_spent_seconds,
            grading_status: attempt.grading_status,
            grading,
            score: revealed.score,
            max_score: revealed.max_score,
            percentage_score: revealed.percentage_score,
            passed: revealed.passed,
        }
    }
}

/// One of the caller's own attempts. Grading internals stay server side, and scores
/// follow the same reveal rule as the submit response.
#[derive(Debug, Clone, Serialize)]
pub struct StudentAttempt {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub submitted_at: DateTime<Utc>,
    pub time_spent_seconds: i32,
    pub grading_status: GradingStatus,
    pub score: Option<Decimal>,
    pub max_score: Option<Decimal>,
    pub percentage_score: Option<Decimal>,
    pub passed: Option<bool>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl StudentAttempt {
    /// `quiz` is `None` when the quiz has since been deleted; scores are then withheld.
    pub fn new(attempt: &Attempt, quiz: Option<&Quiz>) -> Self {
        let revealed = Revealed::new(attempt, quiz);
        Self {
            id: attempt.id,
            quiz_id: attempt.quiz_id,
            started_at: attempt.started_at,
            submitted_at: attempt.submitted_at,
            time_spent_seconds: attempt.time_spent_seconds,
            grading_status: attempt.grading_status,
            score: revealed.score,
            max_score: revealed.max_score,
            percentage_score: revealed.percentage_score,
            passed: revealed.passed,
            graded_at: attempt.graded_at,
        }
    }
}
