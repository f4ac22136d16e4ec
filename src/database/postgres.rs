use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::store::{assemble, QuizFilter, QuizStore};
use crate::dto::quiz_dto::{DraftId, OptionDraft, SaveQuizPayload, SavedQuiz};
use crate::error::{Error, Result};
use crate::models::answer::{Answer, NewAnswer};
use crate::models::attempt::{Attempt, AttemptWithAnswers, GradingStatus, NewAttempt};
use crate::models::question::{Question, QuizOption};
use crate::models::quiz::{Quiz, QuizDefinition};
use crate::services::grading_service::GradeReport;

#[derive(Clone)]
pub struct PgQuizStore {
    pool: PgPool,
}

impl PgQuizStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn load_definition(conn: &mut PgConnection, quiz_id: Uuid) -> Result<QuizDefinition> {
    let quiz: Quiz = sqlx::query_as(r#"SELECT * FROM quizzes WHERE id = $1"#)
        .bind(quiz_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Quiz {} not found", quiz_id)))?;

    let questions: Vec<Question> = sqlx::query_as(
        r#"
        SELECT id, quiz_id, position, question_type, prompt, points, explanation, media_url
        FROM quiz_questions
        WHERE quiz_id = $1
        ORDER BY position, id
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    let options: Vec<QuizOption> = sqlx::query_as(
        r#"
        SELECT o.id, o.question_id, o.position, o.option_text, o.image_url, o.is_correct
        FROM quiz_options o
        JOIN quiz_questions q ON q.id = o.question_id
        WHERE q.quiz_id = $1
        ORDER BY o.position
        "#,
    )
    .bind(quiz_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(assemble(quiz, questions, options))
}

async fn replace_options(
    conn: &mut PgConnection,
    question_id: Uuid,
    options: &[OptionDraft],
) -> Result<()> {
    sqlx::query(r#"DELETE FROM quiz_options WHERE question_id = $1"#)
        .bind(question_id)
        .execute(&mut *conn)
        .await?;

    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO quiz_options (id, question_id, position, option_text, image_url, is_correct) ",
    );
    builder.push_values(options.iter().enumerate(), |mut row, (position, option)| {
        row.push_bind(Uuid::new_v4())
            .push_bind(question_id)
            .push_bind(position as i32)
            .push_bind(option.text.clone())
            .push_bind(option.image_url.clone())
            .push_bind(option.is_correct);
    });
    builder.build().execute(&mut *conn).await?;
    Ok(())
}

async fn attach_answers(pool: &PgPool, attempts: Vec<Attempt>) -> Result<Vec<AttemptWithAnswers>> {
    let ids: Vec<Uuid> = attempts.iter().map(|a| a.id).collect();
    let answers: Vec<Answer> = sqlx::query_as(
        r#"SELECT * FROM quiz_answers WHERE attempt_id = ANY($1) ORDER BY created_at"#,
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_attempt: HashMap<Uuid, Vec<Answer>> = HashMap::new();
    for answer in answers {
        by_attempt.entry(answer.attempt_id).or_default().push(answer);
    }
    Ok(attempts
        .into_iter()
        .map(|attempt| {
            let answers = by_attempt.remove(&attempt.id).unwrap_or_default();
            AttemptWithAnswers { attempt, answers }
        })
        .collect())
}

#[async_trait]
impl QuizStore for PgQuizStore {
    async fn fetch_quiz(&self, quiz_id: Uuid) -> Result<QuizDefinition> {
        let mut conn = self.pool.acquire().await?;
        load_definition(&mut conn, quiz_id).await
    }

    async fn list_quizzes(&self, filter: QuizFilter) -> Result<Vec<Quiz>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM quizzes WHERE 1 = 1");
        if let Some(course_id) = filter.course_id {
            builder.push(" AND course_id = ").push_bind(course_id);
        }
        if filter.published_only {
            builder.push(" AND is_published = TRUE");
        }
        builder.push(" ORDER BY created_at DESC");

        let quizzes = builder
            .build_query_as::<Quiz>()
            .fetch_all(&self.pool)
            .await?;
        Ok(quizzes)
    }

    async fn save_quiz_aggregate(
        &self,
        payload: &SaveQuizPayload,
        editor_id: Uuid,
    ) -> Result<SavedQuiz> {
        let passing_score = payload.passing_score_decimal()?;
        let quiz_id = payload.id.unwrap_or_else(Uuid::new_v4);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO quizzes (
                id, course_id, title, description, quiz_type, time_limit_minutes,
                max_attempts, randomize_questions, randomize_answers,
                show_results_immediately, passing_score, is_published, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                course_id = EXCLUDED.course_id,
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                quiz_type = EXCLUDED.quiz_type,
                time_limit_minutes = EXCLUDED.time_limit_minutes,
                max_attempts = EXCLUDED.max_attempts,
                randomize_questions = EXCLUDED.randomize_questions,
                randomize_answers = EXCLUDED.randomize_answers,
                show_results_immediately = EXCLUDED.show_results_immediately,
                passing_score = EXCLUDED.passing_score,
                is_published = EXCLUDED.is_published,
                updated_at = NOW()
            "#,
        )
        .bind(quiz_id)
        .bind(payload.course_id)
        .bind(&payload.title)
        .bind(&payload.description)
        .bind(payload.quiz_type.as_str())
        .bind(payload.time_limit_minutes)
        .bind(payload.max_attempts)
        .bind(payload.randomize_questions)
        .bind(payload.randomize_answers)
        .bind(payload.show_results_immediately)
        .bind(passing_score)
        .bind(payload.is_published)
        .bind(editor_id)
        .execute(&mut *tx)
        .await?;

        let mut created_question_ids = HashMap::new();
        for (position, draft) in payload.questions.iter().enumerate() {
            let question_id = match &draft.id {
                DraftId::Temporary(temp_id) => {
                    let id = Uuid::new_v4();
                    sqlx::query(
                        r#"
                        INSERT INTO quiz_questions
                            (id, quiz_id, position, question_type, prompt, points, explanation, media_url)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        "#,
                    )
                    .bind(id)
                    .bind(quiz_id)
                    .bind(position as i32)
                    .bind(draft.question_type.as_str())
                    .bind(&draft.prompt)
                    .bind(draft.points)
                    .bind(&draft.explanation)
                    .bind(&draft.media_url)
                    .execute(&mut *tx)
                    .await?;
                    if !temp_id.is_empty() {
                        created_question_ids.insert(temp_id.clone(), id);
                    }
                    id
                }
                DraftId::Persisted(id) => {
                    let updated = sqlx::query(
                        r#"
                        UPDATE quiz_questions
                        SET position = $3, question_type = $4, prompt = $5, points = $6,
                            explanation = $7, media_url = $8
                        WHERE id = $1 AND quiz_id = $2
                        "#,
                    )
                    .bind(id)
                    .bind(quiz_id)
                    .bind(position as i32)
                    .bind(draft.question_type.as_str())
                    .bind(&draft.prompt)
                    .bind(draft.points)
                    .bind(&draft.explanation)
                    .bind(&draft.media_url)
                    .execute(&mut *tx)
                    .await?;
                    if updated.rows_affected() == 0 {
                        return Err(Error::NotFound(format!(
                            "Question {} does not belong to quiz {}",
                            id, quiz_id
                        )));
                    }
                    *id
                }
            };

            if !draft.options.is_empty() {
                replace_options(&mut tx, question_id, &draft.options).await?;
            }
        }

        let quiz = load_definition(&mut tx, quiz_id).await?;
        tx.commit().await?;

        Ok(SavedQuiz {
            quiz,
            created_question_ids,
        })
    }

    async fn delete_quiz(&self, quiz_id: Uuid) -> Result<bool> {
        let result = sqlx::query(r#"DELETE FROM quizzes WHERE id = $1"#)
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_question(&self, quiz_id: Uuid, question_id: Uuid) -> Result<bool> {
        let result = sqlx::query(r#"DELETE FROM quiz_questions WHERE id = $1 AND quiz_id = $2"#)
            .bind(question_id)
            .bind(quiz_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_attempts(&self, quiz_id: Uuid, student_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1 AND student_id = $2"#,
        )
        .bind(quiz_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn insert_attempt(&self, attempt: &NewAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quiz_attempts
                (id, quiz_id, student_id, started_at, submitted_at, time_spent_seconds, grading_status)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending')
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.quiz_id)
        .bind(attempt.student_id)
        .bind(attempt.started_at)
        .bind(attempt.submitted_at)
        .bind(attempt.time_spent_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_answers(&self, answers: &[NewAnswer]) -> Result<()> {
        if answers.is_empty() {
            return Ok(());
        }
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO quiz_answers (id, attempt_id, question_id, selected_options, text_answer, ranking_order) ",
        );
        builder.push_values(answers, |mut row, answer| {
            row.push_bind(answer.id)
                .push_bind(answer.attempt_id)
                .push_bind(answer.question_id)
                .push_bind(answer.selected_options.clone())
                .push_bind(answer.text_answer.clone())
                .push_bind(answer.ranking_order.clone());
        });
        builder.push(" ON CONFLICT (attempt_id, question_id) DO NOTHING");
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn invoke_grading(&self, attempt_id: Uuid) -> Result<()> {
        sqlx::query(r#"SELECT auto_grade_quiz_attempt($1)"#)
            .bind(attempt_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_attempt(&self, attempt_id: Uuid) -> Result<AttemptWithAnswers> {
        let attempt: Attempt = sqlx::query_as(r#"SELECT * FROM quiz_attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;

        let answers: Vec<Answer> = sqlx::query_as(
            r#"SELECT * FROM quiz_answers WHERE attempt_id = $1 ORDER BY created_at"#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(AttemptWithAnswers { attempt, answers })
    }

    async fn list_quiz_attempts(&self, quiz_id: Uuid) -> Result<Vec<AttemptWithAnswers>> {
        let attempts: Vec<Attempt> = sqlx::query_as(
            r#"SELECT * FROM quiz_attempts WHERE quiz_id = $1 ORDER BY submitted_at DESC"#,
        )
        .bind(quiz_id)
        .fetch_all(&self.pool)
        .await?;
        attach_answers(&self.pool, attempts).await
    }

    async fn list_student_attempts(&self, student_id: Uuid) -> Result<Vec<Attempt>> {
        let attempts: Vec<Attempt> = sqlx::query_as(
            r#"SELECT * FROM quiz_attempts WHERE student_id = $1 ORDER BY submitted_at DESC"#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(attempts)
    }

    async fn record_grading_failure(
        &self,
        attempt_id: Uuid,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<Attempt> {
        let attempt: Attempt = sqlx::query_as(
            r#"
            UPDATE quiz_attempts
            SET grading_failures = grading_failures + 1,
                last_grading_error = $2,
                next_grading_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(error)
        .bind(next_attempt_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;
        Ok(attempt)
    }

    async fn due_grading_retries(
        &self,
        now: DateTime<Utc>,
        unclaimed_before: DateTime<Utc>,
        max_failures: i32,
        limit: i64,
    ) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM quiz_attempts
            WHERE grading_status = 'pending'
              AND requires_manual_review = FALSE
              AND grading_failures < $3
              AND (
                (grading_failures > 0 AND next_grading_at IS NOT NULL AND next_grading_at <= $1)
                OR (grading_failures = 0 AND next_grading_at IS NULL AND submitted_at <= $2)
              )
            ORDER BY COALESCE(next_grading_at, submitted_at)
            LIMIT $4
            "#,
        )
        .bind(now)
        .bind(unclaimed_before)
        .bind(max_failures)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn save_grade(
        &self,
        attempt_id: Uuid,
        report: &GradeReport,
        status: GradingStatus,
        graded_by: Option<Uuid>,
    ) -> Result<Attempt> {
        let mut tx = self.pool.begin().await?;

        for grade in &report.answers {
            sqlx::query(
                r#"UPDATE quiz_answers SET is_correct = $2, points_awarded = $3 WHERE id = $1 AND attempt_id = $4"#,
            )
            .bind(grade.answer_id)
            .bind(grade.is_correct)
            .bind(grade.points_awarded)
            .bind(attempt_id)
            .execute(&mut *tx)
            .await?;
        }

        let attempt: Attempt = sqlx::query_as(
            r#"
            UPDATE quiz_attempts
            SET grading_status = $2,
                score = $3,
                max_score = $4,
                percentage_score = $5,
                requires_manual_review = $6,
                graded_by = $7,
                graded_at = CASE WHEN $2 = 'pending' THEN NULL ELSE NOW() END,
                next_grading_at = NULL,
                last_grading_error = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(status.as_str())
        .bind(report.score)
        .bind(report.max_score)
        .bind(report.percentage_score)
        .bind(report.requires_manual_review)
        .bind(graded_by)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Attempt {} not found", attempt_id)))?;

        tx.commit().await?;
        Ok(attempt)
    }
}
