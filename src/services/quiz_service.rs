use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::database::store::{QuizFilter, QuizStore};
use crate::dto::quiz_dto::{
    PublicQuizDefinition, QuizListQuery, QuizSummary, QuizView, SaveQuizPayload, SavedQuiz,
};
use crate::error::{Error, Result};
use crate::models::user::{Capability, Viewer};

#[derive(Clone)]
pub struct QuizService {
    store: Arc<dyn QuizStore>,
}

impl QuizService {
    pub fn new(store: Arc<dyn QuizStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self, viewer: &Viewer, query: QuizListQuery) -> Result<Vec<QuizSummary>> {
        let filter = QuizFilter {
            course_id: query.course_id,
            published_only: !viewer.can(Capability::ViewUnpublished),
        };
        let quizzes = self.store.list_quizzes(filter).await?;
        Ok(quizzes.into_iter().map(QuizSummary::from).collect())
    }

    /// Staff get the full definition including answer keys; students get a summary of
    /// published quizzes only.
    pub async fn get(&self, viewer: &Viewer, quiz_id: Uuid) -> Result<QuizView> {
        let definition = self.store.fetch_quiz(quiz_id).await?;
        if viewer.can(Capability::ManageQuizzes) {
            return Ok(QuizView::Full(definition));
        }
        if !definition.quiz.is_published && !viewer.can(Capability::ViewUnpublished) {
            return Err(Error::NotFound(format!("Quiz {} not found", quiz_id)));
        }
        Ok(QuizView::Public(PublicQuizDefinition::from(definition)))
    }

    /// Saves the whole quiz aggregate. `path_id` comes from `PUT /quizzes/:id` and wins
    /// over any id in the body.
    pub async fn save(
        &self,
        viewer: &Viewer,
        mut payload: SaveQuizPayload,
        path_id: Option<Uuid>,
    ) -> Result<SavedQuiz> {
        viewer.require(Capability::ManageQuizzes)?;
        payload.validate()?;
        if path_id.is_some() {
            payload.id = path_id;
        }

        let saved = self
            .store
            .save_quiz_aggregate(&payload, viewer.user_id)
            .await?;
        tracing::info!(
            quiz_id = %saved.quiz.quiz.id,
            questions = saved.quiz.questions.len(),
            created = saved.created_question_ids.len(),
            editor = %viewer.user_id,
            "quiz saved"
        );
        Ok(saved)
    }

    pub async fn delete(&self, viewer: &Viewer, quiz_id: Uuid) -> Result<()> {
        viewer.require(Capability::ManageQuizzes)?;
        if !self.store.delete_quiz(quiz_id).await? {
            return Err(Error::NotFound(format!("Quiz {} not found", quiz_id)));
        }
        tracing::info!(%quiz_id, editor = %viewer.user_id, "quiz deleted");
        Ok(())
    }

    pub async fn delete_question(
        &self,
        viewer: &Viewer,
        quiz_id: Uuid,
        question_id: Uuid,
    ) -> Result<()> {
        viewer.require(Capability::ManageQuizzes)?;
        if !self.store.delete_question(quiz_id, question_id).await? {
            return Err(Error::NotFound(format!(
                "Question {} not found in quiz {}",
                question_id, quiz_id
            )));
        }
        Ok(())
    }
}
