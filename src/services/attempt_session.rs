//! The attempt session: a student's timed pass over one quiz, from start to submission.
//!
//! The session is a plain state machine with no I/O. Persisting the submission and
//! invoking grading is done by [`AttemptService`](super::attempt_service::AttemptService),
//! which calls back into [`AttemptSession::mark_completed`] once the rows are written.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::answer::NewAnswer;
use crate::models::attempt::NewAttempt;
use crate::models::question::QuestionWithOptions;
use crate::models::quiz::{Quiz, QuizDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    InProgress,
    Submitting,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The quiz has no time limit, or the session is no longer running.
    Idle,
    Running { remaining_seconds: u32 },
    /// The countdown reached zero and the session was forced into submission.
    Expired,
}

/// Rows produced by a submission: one attempt, one answer per answered question.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionPayload {
    pub attempt: NewAttempt,
    pub answers: Vec<NewAnswer>,
}

#[derive(Debug, Clone)]
pub struct AttemptSession {
    attempt_id: Uuid,
    student_id: Uuid,
    state: SessionState,
    quiz: Option<Quiz>,
    questions: Vec<QuestionWithOptions>,
    cursor: usize,
    answers: HashMap<Uuid, JsonValue>,
    remaining_seconds: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    submitted_at: Option<DateTime<Utc>>,
}

impl AttemptSession {
    pub fn new(attempt_id: Uuid, student_id: Uuid) -> Self {
        Self {
            attempt_id,
            student_id,
            state: SessionState::Initializing,
            quiz: None,
            questions: Vec::new(),
            cursor: 0,
            answers: HashMap::new(),
            remaining_seconds: None,
            started_at: None,
            submitted_at: None,
        }
    }

    /// Builds the working question list and starts the countdown, if any.
    pub fn start<R: Rng + ?Sized>(
        &mut self,
        definition: &QuizDefinition,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != SessionState::Initializing {
            return Err(Error::Conflict("Session has already been started".to_string()));
        }
        let quiz = &definition.quiz;
        if !quiz.is_published {
            return Err(Error::BadRequest("Quiz is not published".to_string()));
        }

        let mut questions = definition.questions.clone();
        if quiz.randomize_questions {
            questions.shuffle(rng);
        }
        if quiz.randomize_answers {
            for question in questions.iter_mut() {
                question.options.shuffle(rng);
            }
        }

        self.questions = questions;
        self.remaining_seconds = quiz.time_limit_seconds();
        self.quiz = Some(quiz.clone());
        self.cursor = 0;
        self.answers.clear();
        self.started_at = Some(now);
        self.state = SessionState::InProgress;
        Ok(())
    }

    /// Stores or overwrites the raw answer value for a question of this session.
    pub fn answer(&mut self, question_id: Uuid, value: JsonValue) -> Result<()> {
        self.ensure_in_progress()?;
        if !self.questions.iter().any(|q| q.question.id == question_id) {
            return Err(Error::BadRequest(format!(
                "Question {} is not part of this quiz",
                question_id
            )));
        }
        self.answers.insert(question_id, value);
        Ok(())
    }

    pub fn next(&mut self) -> Result<usize> {
        self.ensure_in_progress()?;
        self.cursor = (self.cursor + 1).min(self.last_index());
        Ok(self.cursor)
    }

    pub fn previous(&mut self) -> Result<usize> {
        self.ensure_in_progress()?;
        self.cursor = self.cursor.saturating_sub(1);
        Ok(self.cursor)
    }

    /// Advances the countdown by one second. At zero the session moves to `Submitting`
    /// and can no longer be answered.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.state != SessionState::InProgress {
            return TickOutcome::Idle;
        }
        let Some(remaining) = self.remaining_seconds else {
            return TickOutcome::Idle;
        };
        let remaining = remaining.saturating_sub(1);
        self.remaining_seconds = Some(remaining);
        if remaining > 0 {
            return TickOutcome::Running {
                remaining_seconds: remaining,
            };
        }
        self.begin_submission(now);
        TickOutcome::Expired
    }

    /// Produces the submission rows. From `InProgress` this freezes the session; from
    /// `Submitting` (a previous write failed) it yields the same attempt again so the
    /// retry is idempotent.
    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<SubmissionPayload> {
        match self.state {
            SessionState::InProgress => self.begin_submission(now),
            SessionState::Submitting => {}
            SessionState::Initializing => {
                return Err(Error::Conflict("Session has not been started".to_string()))
            }
            SessionState::Completed => {
                return Err(Error::Conflict(
                    "Attempt has already been submitted".to_string(),
                ))
            }
        }
        self.payload()
    }

    pub fn mark_completed(&mut self) -> Result<()> {
        if self.state != SessionState::Submitting {
            return Err(Error::Conflict(format!(
                "Cannot complete a session in state {:?}",
                self.state
            )));
        }
        self.state = SessionState::Completed;
        Ok(())
    }

    fn begin_submission(&mut self, now: DateTime<Utc>) {
        self.submitted_at = Some(now);
        self.state = SessionState::Submitting;
    }

    fn payload(&self) -> Result<SubmissionPayload> {
        let (Some(quiz), Some(started_at), Some(submitted_at)) =
            (self.quiz.as_ref(), self.started_at, self.submitted_at)
        else {
            return Err(Error::Internal("Session is missing its start data".to_string()));
        };
        let time_spent = (submitted_at - started_at).num_seconds().max(0);

        let attempt = NewAttempt {
            id: self.attempt_id,
            quiz_id: quiz.id,
            student_id: self.student_id,
            started_at,
            submitted_at,
            time_spent_seconds: i32::try_from(time_spent).unwrap_or(i32::MAX),
        };

        let answers = self
            .questions
            .iter()
            .filter_map(|q| {
                self.answers.get(&q.question.id).map(|value| {
                    NewAnswer::shape(
                        self.attempt_id,
                        q.question.id,
                        q.question.question_type,
                        value,
                    )
                })
            })
            .collect();

        Ok(SubmissionPayload { attempt, answers })
    }

    fn ensure_in_progress(&self) -> Result<()> {
        if self.state == SessionState::InProgress {
            Ok(())
        } else {
            Err(Error::Conflict(format!(
                "Session is not in progress (state: {:?})",
                self.state
            )))
        }
    }

    fn last_index(&self) -> usize {
        self.questions.len().saturating_sub(1)
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn student_id(&self) -> Uuid {
        self.student_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn quiz(&self) -> Option<&Quiz> {
        self.quiz.as_ref()
    }

    pub fn questions(&self) -> &[QuestionWithOptions] {
        &self.questions
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current_question(&self) -> Option<&QuestionWithOptions> {
        self.questions.get(self.cursor)
    }

    pub fn answers(&self) -> &HashMap<Uuid, JsonValue> {
        &self.answers
    }

    pub fn remaining_seconds(&self) -> Option<u32> {
        self.remaining_seconds
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::question::{Question, QuestionType, QuizOption};
    use crate::models::quiz::QuizType;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal::Decimal;
    use serde_json::json;

    fn question(quiz_id: Uuid, position: i32, question_type: QuestionType) -> QuestionWithOptions {
        let id = Uuid::new_v4();
        let options = (0..4)
            .map(|i| QuizOption {
                id: Uuid::new_v4(),
                question_id: id,
                position: i,
                option_text: format!("option {}", i),
                image_url: None,
                is_correct: i == 0,
            })
            .collect();
        QuestionWithOptions {
            question: Question {
                id,
                quiz_id,
                position,
                question_type,
                prompt: format!("question {}", position),
                points: 1,
                explanation: None,
                media_url: None,
            },
            options,
        }
    }

    fn definition(time_limit: Option<i32>, randomize: bool) -> QuizDefinition {
        let quiz_id = Uuid::new_v4();
        let now = Utc::now();
        QuizDefinition {
            quiz: Quiz {
                id: quiz_id,
                course_id: None,
                title: "Thermodynamics".into(),
                description: None,
                quiz_type: QuizType::Graded,
                time_limit_minutes: time_limit,
                max_attempts: None,
                randomize_questions: randomize,
                randomize_answers: randomize,
                show_results_immediately: true,
                passing_score: Decimal::new(70, 0),
                is_published: true,
                created_by: None,
                created_at: now,
                updated_at: now,
            },
            questions: vec![
                question(quiz_id, 0, QuestionType::MultipleChoice),
                question(quiz_id, 1, QuestionType::OpenEnded),
                question(quiz_id, 2, QuestionType::Ranking),
                question(quiz_id, 3, QuestionType::FillBlank),
                question(quiz_id, 4, QuestionType::MultipleChoice),
                question(quiz_id, 5, QuestionType::WrittenAnswer),
            ],
        }
    }

    fn started(definition: &QuizDefinition, seed: u64) -> AttemptSession {
        let mut session = AttemptSession::new(Uuid::new_v4(), Uuid::new_v4());
        let mut rng = StdRng::seed_from_u64(seed);
        session.start(definition, &mut rng, Utc::now()).unwrap();
        session
    }

    fn ordering(session: &AttemptSession) -> Vec<(Uuid, Vec<Uuid>)> {
        session
            .questions()
            .iter()
            .map(|q| (q.question.id, q.options.iter().map(|o| o.id).collect()))
            .collect()
    }

    #[test]
    fn without_randomization_orderings_are_identical() {
        let def = definition(None, false);
        let first = started(&def, 1);
        let second = started(&def, 2);
        assert_eq!(ordering(&first), ordering(&second));
        let authored: Vec<Uuid> = def.questions.iter().map(|q| q.question.id).collect();
        let session_ids: Vec<Uuid> = first.questions().iter().map(|q| q.question.id).collect();
        assert_eq!(session_ids, authored);
    }

    #[test]
    fn randomization_keeps_the_same_questions_and_options() {
        let def = definition(None, true);
        let session = started(&def, 7);
        let mut expected: Vec<Uuid> = def.questions.iter().map(|q| q.question.id).collect();
        let mut got: Vec<Uuid> = session.questions().iter().map(|q| q.question.id).collect();
        expected.sort();
        got.sort();
        assert_eq!(expected, got);
        for q in session.questions() {
            let original = def.question(q.question.id).unwrap();
            let mut a: Vec<Uuid> = original.options.iter().map(|o| o.id).collect();
            let mut b: Vec<Uuid> = q.options.iter().map(|o| o.id).collect();
            a.sort();
            b.sort();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn unpublished_quiz_cannot_start() {
        let mut def = definition(None, false);
        def.quiz.is_published = false;
        let mut session = AttemptSession::new(Uuid::new_v4(), Uuid::new_v4());
        let err = session
            .start(&def, &mut StdRng::seed_from_u64(0), Utc::now())
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(session.state(), SessionState::Initializing);
    }

    #[test]
    fn cursor_is_clamped() {
        let def = definition(None, false);
        let mut session = started(&def, 0);
        assert_eq!(session.previous().unwrap(), 0);
        for _ in 0..20 {
            session.next().unwrap();
        }
        assert_eq!(session.cursor(), 5);
        assert_eq!(session.previous().unwrap(), 4);
    }

    #[test]
    fn empty_quiz_cursor_stays_at_zero() {
        let mut def = definition(None, false);
        def.questions.clear();
        let mut session = started(&def, 0);
        assert_eq!(session.next().unwrap(), 0);
        assert!(session.current_question().is_none());
    }

    #[test]
    fn navigation_does_not_touch_answers() {
        let def = definition(None, false);
        let mut session = started(&def, 0);
        let qid = def.questions[1].question.id;
        session.answer(qid, json!("first")).unwrap();
        session.next().unwrap();
        session.previous().unwrap();
        session.answer(qid, json!("second")).unwrap();
        assert_eq!(session.answers().len(), 1);
        assert_eq!(session.answers()[&qid], json!("second"));
    }

    #[test]
    fn answers_for_foreign_questions_are_rejected() {
        let def = definition(None, false);
        let mut session = started(&def, 0);
        assert!(matches!(
            session.answer(Uuid::new_v4(), json!("x")),
            Err(Error::BadRequest(_))
        ));
    }

    #[test]
    fn one_minute_limit_expires_on_the_sixtieth_tick() {
        let def = definition(Some(1), false);
        let mut session = started(&def, 0);
        assert_eq!(session.remaining_seconds(), Some(60));
        let now = Utc::now();
        for i in 1..60 {
            assert_eq!(
                session.tick(now),
                TickOutcome::Running {
                    remaining_seconds: 60 - i
                }
            );
            assert_eq!(session.state(), SessionState::InProgress);
        }
        assert_eq!(session.tick(now), TickOutcome::Expired);
        assert_eq!(session.state(), SessionState::Submitting);
        assert_eq!(session.tick(now), TickOutcome::Idle);
        assert!(session.answer(def.questions[0].question.id, json!("late")).is_err());
    }

    #[test]
    fn untimed_sessions_ignore_ticks() {
        let def = definition(None, false);
        let mut session = started(&def, 0);
        assert_eq!(session.tick(Utc::now()), TickOutcome::Idle);
        assert_eq!(session.state(), SessionState::InProgress);
    }

    #[test]
    fn submission_shapes_answers_and_measures_time() {
        let def = definition(None, false);
        let mut session = AttemptSession::new(Uuid::new_v4(), Uuid::new_v4());
        let start = Utc::now();
        session
            .start(&def, &mut StdRng::seed_from_u64(0), start)
            .unwrap();

        let mc = &def.questions[0];
        let open = &def.questions[1];
        let ranking = &def.questions[2];
        session
            .answer(mc.question.id, json!([mc.options[0].id.to_string()]))
            .unwrap();
        session.answer(open.question.id, json!("free text")).unwrap();
        let order: Vec<String> = ranking.options.iter().rev().map(|o| o.id.to_string()).collect();
        session.answer(ranking.question.id, json!(order)).unwrap();

        let payload = session.submit(start + Duration::seconds(95)).unwrap();
        assert_eq!(payload.attempt.time_spent_seconds, 95);
        assert_eq!(payload.attempt.quiz_id, def.quiz.id);
        assert_eq!(payload.answers.len(), 3);

        let mc_row = &payload.answers[0];
        assert_eq!(mc_row.selected_options, Some(vec![mc.options[0].id]));
        assert!(mc_row.text_answer.is_none() && mc_row.ranking_order.is_none());

        let open_row = &payload.answers[1];
        assert_eq!(open_row.text_answer.as_deref(), Some("free text"));
        assert!(open_row.selected_options.is_none() && open_row.ranking_order.is_none());

        let ranking_row = &payload.answers[2];
        assert_eq!(ranking_row.ranking_order.as_ref().map(Vec::len), Some(4));
        assert!(ranking_row.selected_options.is_none() && ranking_row.text_answer.is_none());
    }

    #[test]
    fn resubmitting_yields_the_same_attempt_until_completed() {
        let def = definition(None, false);
        let mut session = started(&def, 0);
        let first = session.submit(Utc::now()).unwrap();
        let retry = session.submit(Utc::now() + Duration::seconds(30)).unwrap();
        assert_eq!(first.attempt, retry.attempt);
        session.mark_completed().unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert!(matches!(session.submit(Utc::now()), Err(Error::Conflict(_))));
    }

    #[test]
    fn submit_before_start_is_rejected() {
        let mut session = AttemptSession::new(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(session.submit(Utc::now()), Err(Error::Conflict(_))));
        assert!(session.mark_completed().is_err());
    }
}
