use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::attempt_session::{AttemptSession, SessionState};
use super::grading_service::{GradingOutcome, GradingService};
use super::session_registry::{SessionRegistry, SharedSession};
use crate::database::store::QuizStore;
use crate::dto::grading_dto::ManualGrade;
use crate::dto::session_dto::{SessionView, StudentAttempt, SubmitResponse};
use crate::error::{Error, Result};
use crate::models::attempt::{Attempt, AttemptWithAnswers, GradingStatus};
use crate::models::quiz::Quiz;
use crate::models::user::{Capability, Viewer};

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<dyn QuizStore>,
    grading: GradingService,
    sessions: SessionRegistry,
}

impl AttemptService {
    pub fn new(store: Arc<dyn QuizStore>, grading: GradingService, sessions: SessionRegistry) -> Self {
        Self {
            store,
            grading,
            sessions,
        }
    }

    pub async fn start(&self, viewer: &Viewer, quiz_id: Uuid) -> Result<SessionView> {
        viewer.require(Capability::TakeQuizzes)?;
        let definition = self.store.fetch_quiz(quiz_id).await?;
        if !definition.quiz.is_published {
            return Err(Error::NotFound(format!("Quiz {} not found", quiz_id)));
        }

        if let Some(max_attempts) = definition.quiz.max_attempts {
            let used = self.store.count_attempts(quiz_id, viewer.user_id).await?;
            if used >= i64::from(max_attempts) {
                return Err(Error::Conflict(format!(
                    "Maximum number of attempts ({}) reached",
                    max_attempts
                )));
            }
        }

        let mut session = AttemptSession::new(Uuid::new_v4(), viewer.user_id);
        session.start(&definition, &mut rand::thread_rng(), Utc::now())?;
        let view = SessionView::from(&session);
        let timed = session.remaining_seconds().is_some();
        let shared = self.sessions.insert(session);

        if timed {
            let service = self.clone();
            self.sessions.spawn_countdown(shared, move |session| async move {
                service.submit_expired(session).await;
            });
        }

        tracing::info!(session_id = %view.session_id, %quiz_id, student_id = %viewer.user_id, "attempt session started");
        Ok(view)
    }

    async fn owned_session(&self, viewer: &Viewer, session_id: Uuid) -> Result<SharedSession> {
        let shared = self.sessions.get(session_id)?;
        if shared.lock().await.student_id() != viewer.user_id {
            return Err(Error::NotFound(format!("Session {} not found", session_id)));
        }
        Ok(shared)
    }

    pub async fn view(&self, viewer: &Viewer, session_id: Uuid) -> Result<SessionView> {
        let shared = self.owned_session(viewer, session_id).await?;
        let session = shared.lock().await;
        Ok(SessionView::from(&*session))
    }

    pub async fn answer(
        &self,
        viewer: &Viewer,
        session_id: Uuid,
        question_id: Uuid,
        value: JsonValue,
    ) -> Result<SessionView> {
        let shared = self.owned_session(viewer, session_id).await?;
        let mut session = shared.lock().await;
        session.answer(question_id, value)?;
        Ok(SessionView::from(&*session))
    }

    pub async fn next(&self, viewer: &Viewer, session_id: Uuid) -> Result<SessionView> {
        let shared = self.owned_session(viewer, session_id).await?;
        let mut session = shared.lock().await;
        session.next()?;
        Ok(SessionView::from(&*session))
    }

    pub async fn previous(&self, viewer: &Viewer, session_id: Uuid) -> Result<SessionView> {
        let shared = self.owned_session(viewer, session_id).await?;
        let mut session = shared.lock().await;
        session.previous()?;
        Ok(SessionView::from(&*session))
    }

    pub async fn submit(&self, viewer: &Viewer, session_id: Uuid) -> Result<SubmitResponse> {
        let shared = self.owned_session(viewer, session_id).await?;
        let mut session = shared.lock().await;
        let grading = self.complete(&mut session).await?;

        let quiz = session
            .quiz()
            .cloned()
            .ok_or_else(|| Error::Internal("Completed session has no quiz".to_string()))?;
        let attempt = self.store.fetch_attempt(session.attempt_id()).await?.attempt;
        Ok(SubmitResponse::new(&attempt, &quiz, session.state(), grading))
    }

    /// Persists the submission, invokes grading and completes the session. A write
    /// failure leaves the session in `Submitting` so the same attempt can be retried.
    /// Grading problems never fail the submission.
    async fn complete(&self, session: &mut AttemptSession) -> Result<Option<GradingOutcome>> {
        let payload = session.submit(Utc::now())?;
        let attempt_id = payload.attempt.id;

        if let Err(err) = self.persist(&payload.attempt, &payload.answers).await {
            tracing::error!(%attempt_id, error = %err, "failed to persist submission");
            return Err(err);
        }

        let grading = match self.grading.grade(attempt_id).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                tracing::error!(%attempt_id, error = %err, "grading could not be recorded");
                None
            }
        };

        session.mark_completed()?;
        tracing::info!(%attempt_id, answers = payload.answers.len(), "attempt submitted");
        Ok(grading)
    }

    async fn persist(
        &self,
        attempt: &crate::models::attempt::NewAttempt,
        answers: &[crate::models::answer::NewAnswer],
    ) -> Result<()> {
        self.store.insert_attempt(attempt).await?;
        self.store.insert_answers(answers).await?;
        Ok(())
    }

    async fn submit_expired(&self, shared: SharedSession) {
        let mut session = shared.lock().await;
        if session.state() != SessionState::Submitting {
            return;
        }
        let attempt_id = session.attempt_id();
        if let Err(err) = self.complete(&mut session).await {
            tracing::warn!(%attempt_id, error = %err, "timed-out attempt left for the student to resubmit");
        }
    }

    pub async fn my_attempts(&self, viewer: &Viewer) -> Result<Vec<StudentAttempt>> {
        let attempts = self.store.list_student_attempts(viewer.user_id).await?;
        let mut quizzes: HashMap<Uuid, Option<Quiz>> = HashMap::new();
        for attempt in &attempts {
            if quizzes.contains_key(&attempt.quiz_id) {
                continue;
            }
            let quiz = match self.store.fetch_quiz(attempt.quiz_id).await {
                Ok(definition) => Some(definition.quiz),
                Err(Error::NotFound(_)) => None,
                Err(err) => return Err(err),
            };
            quizzes.insert(attempt.quiz_id, quiz);
        }

        Ok(attempts
            .iter()
            .map(|a| StudentAttempt::new(a, quizzes.get(&a.quiz_id).and_then(Option::as_ref)))
            .collect())
    }

    pub async fn quiz_attempts(
        &self,
        viewer: &Viewer,
        quiz_id: Uuid,
    ) -> Result<Vec<AttemptWithAnswers>> {
        viewer.require(Capability::ViewAllAttempts)?;
        self.store.fetch_quiz(quiz_id).await?;
        self.store.list_quiz_attempts(quiz_id).await
    }

    pub async fn grade_manually(
        &self,
        viewer: &Viewer,
        attempt_id: Uuid,
        grades: &[ManualGrade],
    ) -> Result<Attempt> {
        viewer.require(Capability::GradeAttempts)?;
        let attempt = self.store.fetch_attempt(attempt_id).await?.attempt;
        let definition = self.store.fetch_quiz(attempt.quiz_id).await?;
        self.grading
            .grade_manually(attempt_id, &definition, grades, viewer.user_id)
            .await
    }

    /// Re-runs automatic grading, e.g. after the retry budget was spent. Manually graded
    /// attempts keep their grades.
    pub async fn regrade(&self, viewer: &Viewer, attempt_id: Uuid) -> Result<GradingOutcome> {
        viewer.require(Capability::GradeAttempts)?;
        let attempt = self.store.fetch_attempt(attempt_id).await?.attempt;
        if attempt.grading_status == GradingStatus::ManuallyGraded {
            return Err(Error::Conflict(
                "Attempt has already been graded manually".to_string(),
            ));
        }
        self.grading.grade(attempt_id).await
    }
}
