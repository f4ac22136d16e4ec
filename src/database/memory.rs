use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{assemble, QuizFilter, QuizStore};
use crate::dto::quiz_dto::{DraftId, SaveQuizPayload, SavedQuiz};
use crate::error::{Error, Result};
use crate::models::answer::{Answer, NewAnswer};
use crate::models::attempt::{Attempt, AttemptWithAnswers, GradingStatus, NewAttempt};
use crate::models::question::{Question, QuizOption};
use crate::models::quiz::{Quiz, QuizDefinition};
use crate::services::grading_service::{grade_objective, GradeReport};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    quizzes: HashMap<Uuid, Quiz>,
    questions: HashMap<Uuid, Question>,
    options: HashMap<Uuid, Vec<QuizOption>>,
    attempts: HashMap<Uuid, Attempt>,
    answers: HashMap<Uuid, Vec<Answer>>,
}

impl MemoryState {
    fn definition(&self, quiz_id: Uuid) -> Result<QuizDefinition> {
        let quiz = self
            .quizzes
            .get(&quiz_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Quiz {} not found", quiz_id)))?;
        let questions: Vec<Question> = self
            .questions
            .values()
            .filter(|q| q.quiz_id == quiz_id)
            .cloned()
            .collect();
        let options = questions
            .iter()
            .flat_map(|q| self.options.get(&q.id).cloned().unwrap_or_default())
            .collect();
        Ok(assemble(quiz, questions, options))
    }

    fn attempt_mut(&mut self, attempt_id: Uuid) -> Result<&mut Attempt> {
        self.attempts
            .get_mut(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))
    }

    fn with_answers(&self, attempt: &Attempt) -> AttemptWithAnswers {
        AttemptWithAnswers {
            attempt: attempt.clone(),
            answers: self.answers.get(&attempt.id).cloned().unwrap_or_default(),
        }
    }

    fn apply_report(
        &mut self,
        attempt_id: Uuid,
        report: &GradeReport,
        status: GradingStatus,
        graded_by: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Attempt> {
        if let Some(answers) = self.answers.get_mut(&attempt_id) {
            for answer in answers.iter_mut() {
                if let Some(grade) = report.answers.iter().find(|g| g.answer_id == answer.id) {
                    answer.is_correct = grade.is_correct;
                    answer.points_awarded = grade.points_awarded;
                }
            }
        }

        let attempt = self.attempt_mut(attempt_id)?;
        attempt.grading_status = status;
        attempt.score = Some(report.score);
        attempt.max_score = Some(report.max_score);
        attempt.percentage_score = Some(report.percentage_score);
        attempt.requires_manual_review = report.requires_manual_review;
        attempt.graded_by = graded_by;
        attempt.graded_at = if status.is_graded() { Some(now) } else { None };
        attempt.next_grading_at = None;
        attempt.last_grading_error = None;
        Ok(attempt.clone())
    }
}

/// A process-local store for tests and local runs. Grading applies the same rules as the
/// database function. Faults can be injected to exercise failure handling.
#[derive(Clone, Default)]
pub struct MemoryQuizStore {
    state: Arc<RwLock<MemoryState>>,
    grading_faults: Arc<AtomicU32>,
    write_faults: Arc<AtomicU32>,
    grading_calls: Arc<AtomicU32>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` grading calls fail.
    pub fn fail_next_gradings(&self, count: u32) {
        self.grading_faults.store(count, Ordering::SeqCst);
    }

    /// The next `count` attempt/answer writes fail.
    pub fn fail_next_writes(&self, count: u32) {
        self.write_faults.store(count, Ordering::SeqCst);
    }

    pub fn grading_calls(&self) -> u32 {
        self.grading_calls.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().expect("memory store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().expect("memory store lock poisoned")
    }
}

fn take_fault(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl QuizStore for MemoryQuizStore {
    async fn fetch_quiz(&self, quiz_id: Uuid) -> Result<QuizDefinition> {
        self.read().definition(quiz_id)
    }

    async fn list_quizzes(&self, filter: QuizFilter) -> Result<Vec<Quiz>> {
        let state = self.read();
        let mut quizzes: Vec<Quiz> = state
            .quizzes
            .values()
            .filter(|q| filter.course_id.map_or(true, |c| q.course_id == Some(c)))
            .filter(|q| !filter.published_only || q.is_published)
            .cloned()
            .collect();
        quizzes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(quizzes)
    }

    async fn save_quiz_aggregate(
        &self,
        payload: &SaveQuizPayload,
        editor_id: Uuid,
    ) -> Result<SavedQuiz> {
        let passing_score = payload.passing_score_decimal()?;
        let now = Utc::now();
        let mut guard = self.write();
        // Work on a copy so a failure part-way leaves nothing behind.
        let mut draft = guard.clone();

        let quiz_id = payload.id.unwrap_or_else(Uuid::new_v4);
        let (created_by, created_at) = match draft.quizzes.get(&quiz_id) {
            Some(existing) => (existing.created_by, existing.created_at),
            None => (Some(editor_id), now),
        };
        draft.quizzes.insert(
            quiz_id,
            Quiz {
                id: quiz_id,
                course_id: payload.course_id,
                title: payload.title.clone(),
                description: payload.description.clone(),
                quiz_type: payload.quiz_type,
                time_limit_minutes: payload.time_limit_minutes,
                max_attempts: payload.max_attempts,
                randomize_questions: payload.randomize_questions,
                randomize_answers: payload.randomize_answers,
                show_results_immediately: payload.show_results_immediately,
                passing_score,
                is_published: payload.is_published,
                created_by,
                created_at,
                updated_at: now,
            },
        );

        let mut created_question_ids = HashMap::new();
        for (position, question) in payload.questions.iter().enumerate() {
            let question_id = match &question.id {
                DraftId::Temporary(temp_id) => {
                    let id = Uuid::new_v4();
                    if !temp_id.is_empty() {
                        created_question_ids.insert(temp_id.clone(), id);
                    }
                    id
                }
                DraftId::Persisted(id) => {
                    let belongs = draft
                        .questions
                        .get(id)
                        .is_some_and(|existing| existing.quiz_id == quiz_id);
                    if !belongs {
                        return Err(Error::NotFound(format!(
                            "Question {} does not belong to quiz {}",
                            id, quiz_id
                        )));
                    }
                    *id
                }
            };

            draft.questions.insert(
                question_id,
                Question {
                    id: question_id,
                    quiz_id,
                    position: position as i32,
                    question_type: question.question_type,
                    prompt: question.prompt.clone(),
                    points: question.points,
                    explanation: question.explanation.clone(),
                    media_url: question.media_url.clone(),
                },
            );

            if !question.options.is_empty() {
                let options = question
                    .options
                    .iter()
                    .enumerate()
                    .map(|(i, option)| QuizOption {
                        id: Uuid::new_v4(),
                        question_id,
                        position: i as i32,
                        option_text: option.text.clone(),
                        image_url: option.image_url.clone(),
                        is_correct: option.is_correct,
                    })
                    .collect();
                draft.options.insert(question_id, options);
            }
        }

        let quiz = draft.definition(quiz_id)?;
        *guard = draft;
        Ok(SavedQuiz {
            quiz,
            created_question_ids,
        })
    }

    async fn delete_quiz(&self, quiz_id: Uuid) -> Result<bool> {
        let mut state = self.write();
        if state.quizzes.remove(&quiz_id).is_none() {
            return Ok(false);
        }
        let question_ids: Vec<Uuid> = state
            .questions
            .values()
            .filter(|q| q.quiz_id == quiz_id)
            .map(|q| q.id)
            .collect();
        for id in question_ids {
            state.questions.remove(&id);
            state.options.remove(&id);
        }
        let attempt_ids: Vec<Uuid> = state
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id)
            .map(|a| a.id)
            .collect();
        for id in attempt_ids {
            state.attempts.remove(&id);
            state.answers.remove(&id);
        }
        Ok(true)
    }

    async fn delete_question(&self, quiz_id: Uuid, question_id: Uuid) -> Result<bool> {
        let mut state = self.write();
        let belongs = state
            .questions
            .get(&question_id)
            .is_some_and(|q| q.quiz_id == quiz_id);
        if !belongs {
            return Ok(false);
        }
        state.questions.remove(&question_id);
        state.options.remove(&question_id);
        for answers in state.answers.values_mut() {
            answers.retain(|a| a.question_id != question_id);
        }
        Ok(true)
    }

    async fn count_attempts(&self, quiz_id: Uuid, student_id: Uuid) -> Result<i64> {
        let state = self.read();
        Ok(state
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id && a.student_id == student_id)
            .count() as i64)
    }

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<()> {
        if take_fault(&self.write_faults) {
            return Err(Error::Internal("attempt write failed".to_string()));
        }
        let mut state = self.write();
        if !state.quizzes.contains_key(&attempt.quiz_id) {
            return Err(Error::NotFound(format!("Quiz {} not found", attempt.quiz_id)));
        }
        state.attempts.entry(attempt.id).or_insert_with(|| Attempt {
            id: attempt.id,
            quiz_id: attempt.quiz_id,
            student_id: attempt.student_id,
            started_at: attempt.started_at,
            submitted_at: attempt.submitted_at,
            time_spent_seconds: attempt.time_spent_seconds,
            grading_status: GradingStatus::Pending,
            score: None,
            max_score: None,
            percentage_score: None,
            requires_manual_review: false,
            grading_failures: 0,
            last_grading_error: None,
            next_grading_at: None,
            graded_by: None,
            graded_at: None,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn insert_answers(&self, answers: &[NewAnswer]) -> Result<()> {
        if answers.is_empty() {
            return Ok(());
        }
        if take_fault(&self.write_faults) {
            return Err(Error::Internal("answer write failed".to_string()));
        }
        let mut state = self.write();
        if let Some(missing) = answers
            .iter()
            .find(|a| !state.attempts.contains_key(&a.attempt_id))
        {
            return Err(Error::NotFound(format!(
                "Attempt {} not found",
                missing.attempt_id
            )));
        }
        let now = Utc::now();
        for answer in answers {
            let rows = state.answers.entry(answer.attempt_id).or_default();
            if rows.iter().any(|a| a.question_id == answer.question_id) {
                continue;
            }
            rows.push(Answer {
                id: answer.id,
                attempt_id: answer.attempt_id,
                question_id: answer.question_id,
                selected_options: answer.selected_options.clone(),
                text_answer: answer.text_answer.clone(),
                ranking_order: answer.ranking_order.clone(),
                is_correct: None,
                points_awarded: None,
                created_at: now,
            });
        }
        Ok(())
    }

    async fn invoke_grading(&self, attempt_id: Uuid) -> Result<()> {
        self.grading_calls.fetch_add(1, Ordering::SeqCst);
        if take_fault(&self.grading_faults) {
            return Err(Error::Internal(
                "auto_grade_quiz_attempt is unavailable".to_string(),
            ));
        }
        let mut state = self.write();
        let attempt = state
            .attempts
            .get(&attempt_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        let definition = state.definition(attempt.quiz_id)?;
        let answers = state.answers.get(&attempt_id).cloned().unwrap_or_default();
        let report = grade_objective(&definition, &answers);
        state.apply_report(attempt_id, &report, report.status(), None, Utc::now())?;
        Ok(())
    }

    async fn fetch_attempt(&self, attempt_id: Uuid) -> Result<AttemptWithAnswers> {
        let state = self.read();
        let attempt = state
            .attempts
            .get(&attempt_id)
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        Ok(state.with_answers(attempt))
    }

    async fn list_quiz_attempts(&self, quiz_id: Uuid) -> Result<Vec<AttemptWithAnswers>> {
        let state = self.read();
        let mut attempts: Vec<AttemptWithAnswers> = state
            .attempts
            .values()
            .filter(|a| a.quiz_id == quiz_id)
            .map(|a| state.with_answers(a))
            .collect();
        attempts.sort_by(|a, b| b.attempt.submitted_at.cmp(&a.attempt.submitted_at));
        Ok(attempts)
    }

    async fn list_student_attempts(&self, student_id: Uuid) -> Result<Vec<Attempt>> {
        let state = self.read();
        let mut attempts: Vec<Attempt> = state
            .attempts
            .values()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(attempts)
    }

    async fn record_grading_failure(
        &self,
        attempt_id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<Attempt> {
        let mut state = self.write();
        let attempt = state.attempt_mut(attempt_id)?;
        attempt.grading_failures += 1;
        attempt.last_grading_error = Some(error.to_string());
        attempt.next_grading_at = next_attempt_at;
        Ok(attempt.clone())
    }

    async fn due_grading_retries(
        &self,
        now: DateTime<Utc>,
        unclaimed_before: DateTime<Utc>,
        max_failures: i32,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let state = self.read();
        let mut due: Vec<&Attempt> = state
            .attempts
            .values()
            .filter(|a| {
                let retry_due = a.grading_failures > 0
                    && a.next_grading_at.is_some_and(|at| at <= now);
                let unclaimed = a.grading_failures == 0
                    && a.next_grading_at.is_none()
                    && a.submitted_at <= unclaimed_before;
                a.grading_status == GradingStatus::Pending
                    && !a.requires_manual_review
                    && a.grading_failures < max_failures
                    && (retry_due || unclaimed)
            })
            .collect();
        due.sort_by_key(|a| a.next_grading_at.unwrap_or(a.submitted_at));
        Ok(due
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|a| a.id)
            .collect())
    }

    async fn save_grade(
        &self,
        attempt_id: Uuid,
        report: &GradeReport,
        status: GradingStatus,
        graded_by: Option<Uuid>,
    ) -> Result<Attempt> {
        self.write()
            .apply_report(attempt_id, report, status, graded_by, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::quiz_dto::{OptionDraft, QuestionDraft};
    use crate::models::question::QuestionType;
    use crate::models::quiz::QuizType;

    fn option(text: &str, is_correct: bool) -> OptionDraft {
        OptionDraft {
            text: text.to_string(),
            image_url: None,
            is_correct,
        }
    }

    fn question(id: DraftId, question_type: QuestionType, options: Vec<OptionDraft>) -> QuestionDraft {
        QuestionDraft {
            id,
            question_type,
            prompt: "Which gas do plants absorb?".to_string(),
            points: 1,
            explanation: None,
            media_url: None,
            options,
        }
    }

    fn payload(id: Option<Uuid>, questions: Vec<QuestionDraft>) -> SaveQuizPayload {
        SaveQuizPayload {
            id,
            course_id: None,
            title: "Biology basics".to_string(),
            description: None,
            quiz_type: QuizType::Graded,
            time_limit_minutes: None,
            max_attempts: None,
            randomize_questions: false,
            randomize_answers: false,
            show_results_immediately: true,
            passing_score: 60.0,
            is_published: true,
            questions,
        }
    }

    #[tokio::test]
    async fn temporary_ids_are_mapped_to_created_questions() {
        let store = MemoryQuizStore::new();
        let saved = store
            .save_quiz_aggregate(
                &payload(
                    None,
                    vec![
                        question(
                            DraftId::parse("temp-1"),
                            QuestionType::MultipleChoice,
                            vec![option("CO2", true), option("O2", false)],
                        ),
                        question(DraftId::parse("temp-2"), QuestionType::OpenEnded, vec![]),
                    ],
                ),
                Uuid::new_v4(),
            )
            .await
            .unwrap();

        assert_eq!(saved.created_question_ids.len(), 2);
        let first = saved.created_question_ids["temp-1"];
        assert_eq!(saved.quiz.questions[0].question.id, first);
        assert_eq!(saved.quiz.questions[0].options.len(), 2);
        assert_eq!(saved.quiz.questions[1].question.position, 1);
    }

    #[tokio::test]
    async fn empty_option_list_keeps_existing_options() {
        let store = MemoryQuizStore::new();
        let editor = Uuid::new_v4();
        let saved = store
            .save_quiz_aggregate(
                &payload(
                    None,
                    vec![question(
                        DraftId::parse("temp-1"),
                        QuestionType::MultipleChoice,
                        vec![option("a", true), option("b", false), option("c", false)],
                    )],
                ),
                editor,
            )
            .await
            .unwrap();
        let quiz_id = saved.quiz.quiz.id;
        let question_id = saved.quiz.questions[0].question.id;

        let resaved = store
            .save_quiz_aggregate(
                &payload(
                    Some(quiz_id),
                    vec![question(
                        DraftId::Persisted(question_id),
                        QuestionType::MultipleChoice,
                        vec![],
                    )],
                ),
                editor,
            )
            .await
            .unwrap();
        assert_eq!(resaved.quiz.questions[0].options.len(), 3);
        assert!(resaved.created_question_ids.is_empty());

        let replaced = store
            .save_quiz_aggregate(
                &payload(
                    Some(quiz_id),
                    vec![question(
                        DraftId::Persisted(question_id),
                        QuestionType::MultipleChoice,
                        vec![option("only", true)],
                    )],
                ),
                editor,
            )
            .await
            .unwrap();
        assert_eq!(replaced.quiz.questions[0].options.len(), 1);
        assert_eq!(replaced.quiz.quiz.created_by, Some(editor));
    }

    #[tokio::test]
    async fn foreign_question_id_aborts_the_whole_save() {
        let store = MemoryQuizStore::new();
        let quiz_id = Uuid::new_v4();
        let err = store
            .save_quiz_aggregate(
                &payload(
                    Some(quiz_id),
                    vec![
                        question(DraftId::parse("temp-1"), QuestionType::OpenEnded, vec![]),
                        question(
                            DraftId::Persisted(Uuid::new_v4()),
                            QuestionType::OpenEnded,
                            vec![],
                        ),
                    ],
                ),
                Uuid::new_v4(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(store.fetch_quiz(quiz_id).await.is_err());
    }

    #[tokio::test]
    async fn submissions_are_idempotent_and_graded_with_database_rules() {
        let store = MemoryQuizStore::new();
        let saved = store
            .save_quiz_aggregate(
                &payload(
                    None,
                    vec![question(
                        DraftId::parse("temp-1"),
                        QuestionType::MultipleChoice,
                        vec![option("CO2", true), option("O2", false)],
                    )],
                ),
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        let q = &saved.quiz.questions[0];
        let now = Utc::now();
        let attempt = NewAttempt {
            id: Uuid::new_v4(),
            quiz_id: saved.quiz.quiz.id,
            student_id: Uuid::new_v4(),
            started_at: now,
            submitted_at: now,
            time_spent_seconds: 12,
        };
        let answer = NewAnswer {
            id: Uuid::new_v4(),
            attempt_id: attempt.id,
            question_id: q.question.id,
            selected_options: Some(vec![q.options[0].id]),
            text_answer: None,
            ranking_order: None,
        };

        for _ in 0..2 {
            store.insert_attempt(&attempt).await.unwrap();
            store
                .insert_answers(&[NewAnswer {
                    id: Uuid::new_v4(),
                    ..answer.clone()
                }])
                .await
                .unwrap();
        }
        assert_eq!(
            store
                .count_attempts(attempt.quiz_id, attempt.student_id)
                .await
                .unwrap(),
            1
        );

        store.invoke_grading(attempt.id).await.unwrap();
        let graded = store.fetch_attempt(attempt.id).await.unwrap();
        assert_eq!(graded.answers.len(), 1);
        assert_eq!(graded.attempt.grading_status, GradingStatus::AutoGraded);
        assert_eq!(
            graded.attempt.percentage_score,
            Some(rust_decimal::Decimal::ONE_HUNDRED)
        );
        assert_eq!(graded.answers[0].is_correct, Some(true));
    }

    #[tokio::test]
    async fn ungraded_attempts_without_recorded_failures_become_due_after_the_grace() {
        let store = MemoryQuizStore::new();
        let saved = store
            .save_quiz_aggregate(
                &payload(
                    None,
                    vec![question(DraftId::parse("temp-1"), QuestionType::FillBlank, vec![])],
                ),
                Uuid::new_v4(),
            )
            .await
            .unwrap();
        let submitted_at = Utc::now();
        let attempt = NewAttempt {
            id: Uuid::new_v4(),
            quiz_id: saved.quiz.quiz.id,
            student_id: Uuid::new_v4(),
            started_at: submitted_at,
            submitted_at,
            time_spent_seconds: 30,
        };
        store.insert_attempt(&attempt).await.unwrap();

        let grace = chrono::Duration::seconds(120);
        let now = submitted_at + chrono::Duration::seconds(10);
        assert!(store
            .due_grading_retries(now, now - grace, 5, 50)
            .await
            .unwrap()
            .is_empty());

        let later = submitted_at + chrono::Duration::days(1);
        assert_eq!(
            store
                .due_grading_retries(later, later - grace, 5, 50)
                .await
                .unwrap(),
            vec![attempt.id]
        );

        store.invoke_grading(attempt.id).await.unwrap();
        assert!(store
            .due_grading_retries(later, later - grace, 5, 50)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let store = MemoryQuizStore::new();
        store.fail_next_gradings(1);
        assert!(store.invoke_grading(Uuid::new_v4()).await.is_err());
        assert!(matches!(
            store.invoke_grading(Uuid::new_v4()).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(store.grading_calls(), 2);
    }
}
