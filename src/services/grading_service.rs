use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::database::store::QuizStore;
use crate::dto::grading_dto::ManualGrade;
use crate::error::{Error, Result};
use crate::models::answer::Answer;
use crate::models::attempt::{Attempt, AttemptWithAnswers, GradingStatus};
use crate::models::question::{QuestionType, QuestionWithOptions};
use crate::models::quiz::QuizDefinition;

const RETRY_BATCH: i64 = 50;

/// Grade of one answer. `None` points means the answer still waits for a human.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerGrade {
    pub answer_id: Uuid,
    pub question_id: Uuid,
    pub is_correct: Option<bool>,
    pub points_awarded: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeReport {
    pub score: Decimal,
    pub max_score: Decimal,
    pub percentage_score: Decimal,
    pub requires_manual_review: bool,
    pub answers: Vec<AnswerGrade>,
}

impl GradeReport {
    fn from_grades(max_points: i32, answers: Vec<AnswerGrade>) -> Self {
        let earned: i32 = answers.iter().filter_map(|a| a.points_awarded).sum();
        let score = Decimal::from(earned);
        let max_score = Decimal::from(max_points);
        let percentage_score = if max_score > Decimal::ZERO {
            (score * Decimal::ONE_HUNDRED / max_score)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        } else {
            Decimal::ZERO
        };
        let requires_manual_review = answers.iter().any(|a| a.points_awarded.is_none());
        Self {
            score,
            max_score,
            percentage_score,
            requires_manual_review,
            answers,
        }
    }

    /// Status an automatic pass leaves the attempt in.
    pub fn status(&self) -> GradingStatus {
        if self.requires_manual_review {
            GradingStatus::Pending
        } else {
            GradingStatus::AutoGraded
        }
    }
}

/// Checks one answer to an objective question. Always false for subjective types.
pub fn check_objective(question: &QuestionWithOptions, answer: &Answer) -> bool {
    match question.question.question_type {
        QuestionType::MultipleChoice => {
            let correct: BTreeSet<Uuid> = question.correct_option_ids().into_iter().collect();
            let selected: BTreeSet<Uuid> =
                answer.selected_options.iter().flatten().copied().collect();
            !correct.is_empty() && selected == correct
        }
        QuestionType::FillBlank => {
            let given = match answer.text_answer.as_deref() {
                Some(text) => text.trim().to_lowercase(),
                None => return false,
            };
            !given.is_empty()
                && question
                    .options
                    .iter()
                    .filter(|o| o.is_correct)
                    .any(|o| o.option_text.trim().to_lowercase() == given)
        }
        QuestionType::Ranking => {
            let expected = question.canonical_order();
            !expected.is_empty() && answer.ranking_order.as_deref() == Some(expected.as_slice())
        }
        _ => false,
    }
}

/// The rules `auto_grade_quiz_attempt` applies: objective answers earn full points or
/// none, subjective answers are left for manual review. Answers to questions that no
/// longer exist earn nothing.
pub fn grade_objective(definition: &QuizDefinition, answers: &[Answer]) -> GradeReport {
    let grades = answers
        .iter()
        .map(|answer| {
            let (is_correct, points_awarded) = match definition.question(answer.question_id) {
                Some(q) if q.question.question_type.is_objective() => {
                    let correct = check_objective(q, answer);
                    (Some(correct), Some(if correct { q.question.points } else { 0 }))
                }
                Some(_) => (None, None),
                None => (Some(false), Some(0)),
            };
            AnswerGrade {
                answer_id: answer.id,
                question_id: answer.question_id,
                is_correct,
                points_awarded,
            }
        })
        .collect();
    GradeReport::from_grades(definition.total_points(), grades)
}

/// Combines the automatic grades with a grader's points. Every subjective answer of the
/// attempt must be covered; objective answers may be overridden.
pub fn apply_manual(
    definition: &QuizDefinition,
    attempt: &AttemptWithAnswers,
    grades: &[ManualGrade],
) -> Result<GradeReport> {
    for grade in grades {
        let question = definition.question(grade.question_id).ok_or_else(|| {
            Error::BadRequest(format!("Question {} is not part of this quiz", grade.question_id))
        })?;
        if !attempt
            .answers
            .iter()
            .any(|a| a.question_id == grade.question_id)
        {
            return Err(Error::BadRequest(format!(
                "Attempt has no answer for question {}",
                grade.question_id
            )));
        }
        if grade.points < 0 || grade.points > question.question.points {
            return Err(Error::BadRequest(format!(
                "Points for question {} must be between 0 and {}",
                grade.question_id, question.question.points
            )));
        }
    }

    let automatic = grade_objective(definition, &attempt.answers);
    let answers: Vec<AnswerGrade> = automatic
        .answers
        .into_iter()
        .map(|mut answer| {
            if let Some(grade) = grades.iter().find(|g| g.question_id == answer.question_id) {
                let max = definition
                    .question(answer.question_id)
                    .map(|q| q.question.points)
                    .unwrap_or(0);
                answer.points_awarded = Some(grade.points);
                answer.is_correct = Some(grade.points == max);
            }
            answer
        })
        .collect();

    if let Some(missing) = answers.iter().find(|a| a.points_awarded.is_none()) {
        return Err(Error::BadRequest(format!(
            "Question {} still needs a grade",
            missing.question_id
        )));
    }
    Ok(GradeReport::from_grades(definition.total_points(), answers))
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub inline_attempts: u32,
    pub inline_delay: Duration,
    pub max_failures: i32,
    pub base_secs: i64,
    pub max_secs: i64,
    /// How long a submitted attempt may sit ungraded with no recorded failure before the
    /// worker picks it up.
    pub unclaimed_grace_secs: i64,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            inline_attempts: config.grading_inline_attempts,
            inline_delay: Duration::from_millis(200),
            max_failures: config.grading_max_failures,
            base_secs: config.grading_retry_base_secs,
            max_secs: config.grading_retry_max_secs,
            unclaimed_grace_secs: config.grading_unclaimed_grace_secs,
        }
    }

    /// `min(max, base * 2^(failures - 1))`
    pub fn backoff_secs(&self, failures: i32) -> i64 {
        let exponent = (failures - 1).clamp(0, 30) as u32;
        self.base_secs
            .saturating_mul(1_i64 << exponent)
            .min(self.max_secs)
    }

    /// When the worker should try again, or `None` once the failure budget is spent.
    pub fn next_attempt_at(&self, failures: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if failures >= self.max_failures {
            None
        } else {
            Some(now + chrono::Duration::seconds(self.backoff_secs(failures)))
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            inline_attempts: 2,
            inline_delay: Duration::from_millis(200),
            max_failures: 5,
            base_secs: 30,
            max_secs: 3600,
            unclaimed_grace_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GradingOutcome {
    Graded {
        status: GradingStatus,
    },
    AwaitingManualReview,
    RetryScheduled {
        failures: i32,
        next_attempt_at: DateTime<Utc>,
        error: String,
    },
    GaveUp {
        failures: i32,
        error: String,
    },
}

#[derive(Clone)]
pub struct GradingService {
    store: Arc<dyn QuizStore>,
    policy: RetryPolicy,
}

impl GradingService {
    pub fn new(store: Arc<dyn QuizStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Invokes the grading function for a submitted attempt. Failures are retried
    /// inline a few times and then recorded on the attempt for the retry worker.
    pub async fn grade(&self, attempt_id: Uuid) -> Result<GradingOutcome> {
        let rounds = self.policy.inline_attempts.max(1);
        let mut last_error = String::new();

        for round in 0..rounds {
            if round > 0 && !self.policy.inline_delay.is_zero() {
                tokio::time::sleep(self.policy.inline_delay * round).await;
            }
            match self.try_grade(attempt_id).await {
                Ok(outcome) => {
                    tracing::info!(%attempt_id, ?outcome, "attempt graded");
                    return Ok(outcome);
                }
                Err(err) => {
                    tracing::warn!(%attempt_id, round, error = %err, "grading call failed");
                    last_error = err.to_string();
                }
            }
        }

        self.record_failure(attempt_id, &last_error).await
    }

    async fn try_grade(&self, attempt_id: Uuid) -> Result<GradingOutcome> {
        self.store.invoke_grading(attempt_id).await?;
        let attempt = self.store.fetch_attempt(attempt_id).await?.attempt;
        if attempt.grading_status.is_graded() {
            Ok(GradingOutcome::Graded {
                status: attempt.grading_status,
            })
        } else if attempt.requires_manual_review {
            Ok(GradingOutcome::AwaitingManualReview)
        } else {
            Err(Error::Internal(
                "grading function left the attempt ungraded".to_string(),
            ))
        }
    }

    async fn record_failure(&self, attempt_id: Uuid, error: &str) -> Result<GradingOutcome> {
        let current = self.store.fetch_attempt(attempt_id).await?.attempt;
        let failures = current.grading_failures + 1;
        let next_attempt_at = self.policy.next_attempt_at(failures, Utc::now());
        let updated = self
            .store
            .record_grading_failure(attempt_id, error, next_attempt_at)
            .await?;

        Ok(match next_attempt_at {
            Some(at) => {
                tracing::warn!(%attempt_id, failures = updated.grading_failures, next_attempt_at = %at, "grading retry scheduled");
                GradingOutcome::RetryScheduled {
                    failures: updated.grading_failures,
                    next_attempt_at: at,
                    error: error.to_string(),
                }
            }
            None => {
                tracing::error!(%attempt_id, failures = updated.grading_failures, error, "giving up on automatic grading");
                GradingOutcome::GaveUp {
                    failures: updated.grading_failures,
                    error: error.to_string(),
                }
            }
        })
    }

    /// One pass of the retry worker: grades every attempt whose retry is due.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self
            .store
            .due_grading_retries(
                now,
                now - chrono::Duration::seconds(self.policy.unclaimed_grace_secs),
                self.policy.max_failures,
                RETRY_BATCH,
            )
            .await?;
        for attempt_id in &due {
            if let Err(err) = self.grade(*attempt_id).await {
                tracing::error!(%attempt_id, error = %err, "grading retry failed");
            }
        }
        Ok(due.len())
    }

    pub async fn grade_manually(
        &self,
        attempt_id: Uuid,
        definition: &QuizDefinition,
        grades: &[ManualGrade],
        grader_id: Uuid,
    ) -> Result<Attempt> {
        let attempt = self.store.fetch_attempt(attempt_id).await?;
        let report = apply_manual(definition, &attempt, grades)?;
        let saved = self
            .store
            .save_grade(
                attempt_id,
                &report,
                GradingStatus::ManuallyGraded,
                Some(grader_id),
            )
            .await?;
        tracing::info!(%attempt_id, %grader_id, score = %report.score, "attempt graded manually");
        Ok(saved)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::models::question::{Question, QuizOption};
    use crate::models::quiz::{Quiz, QuizType};

    pub fn question(
        quiz_id: Uuid,
        position: i32,
        question_type: QuestionType,
        points: i32,
        options: &[(&str, bool)],
    ) -> QuestionWithOptions {
        let id = Uuid::new_v4();
        QuestionWithOptions {
            question: Question {
                id,
                quiz_id,
                position,
                question_type,
                prompt: format!("question {}", position),
                points,
                explanation: Some("because".into()),
                media_url: None,
            },
            options: options
                .iter()
                .enumerate()
                .map(|(i, (text, correct))| QuizOption {
                    id: Uuid::new_v4(),
                    question_id: id,
                    position: i as i32,
                    option_text: text.to_string(),
                    image_url: None,
                    is_correct: *correct,
                })
                .collect(),
        }
    }

    pub fn definition(questions: Vec<QuestionWithOptions>) -> QuizDefinition {
        let now = Utc::now();
        let quiz_id = questions
            .first()
            .map(|q| q.question.quiz_id)
            .unwrap_or_else(Uuid::new_v4);
        QuizDefinition {
            quiz: Quiz {
                id: quiz_id,
                course_id: None,
                title: "Organic chemistry".into(),
                description: None,
                quiz_type: QuizType::Graded,
                time_limit_minutes: None,
                max_attempts: None,
                randomize_questions: false,
                randomize_answers: false,
                show_results_immediately: true,
                passing_score: Decimal::new(70, 0),
                is_published: true,
                created_by: None,
                created_at: now,
                updated_at: now,
            },
            questions,
        }
    }

    pub fn answer(attempt_id: Uuid, question_id: Uuid) -> Answer {
        Answer {
            id: Uuid::new_v4(),
            attempt_id,
            question_id,
            selected_options: None,
            text_answer: None,
            ranking_order: None,
            is_correct: None,
            points_awarded: None,
            created_at: Utc::now(),
        }
    }

    pub fn attempt(quiz_id: Uuid, status: GradingStatus) -> Attempt {
        let now = Utc::now();
        Attempt {
            id: Uuid::new_v4(),
            quiz_id,
            student_id: Uuid::new_v4(),
            started_at: now,
            submitted_at: now,
            time_spent_seconds: 30,
            grading_status: status,
            score: None,
            max_score: None,
            percentage_score: None,
            requires_manual_review: false,
            grading_failures: 0,
            last_grading_error: None,
            next_grading_at: None,
            graded_by: None,
            graded_at: None,
            created_at: now,
        }
    }
}
