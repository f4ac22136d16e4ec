use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::text_enum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    WrittenAnswer,
    FillBlank,
    OpenEnded,
    Ranking,
    PictureChoice,
    AudioButton,
    MultiFactor,
}

text_enum!(QuestionType {
    MultipleChoice => "multiple_choice",
    WrittenAnswer => "written_answer",
    FillBlank => "fill_blank",
    OpenEnded => "open_ended",
    Ranking => "ranking",
    PictureChoice => "picture_choice",
    AudioButton => "audio_button",
    MultiFactor => "multi_factor",
});

/// Which column of an answer row carries the student's response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerShape {
    SelectedOptions,
    RankingOrder,
    Text,
}

impl QuestionType {
    /// Objective types have a checkable answer and are graded automatically;
    /// every other type is routed to manual grading.
    pub fn is_objective(&self) -> bool {
        matches!(
            self,
            QuestionType::MultipleChoice | QuestionType::FillBlank | QuestionType::Ranking
        )
    }

    pub fn answer_shape(&self) -> AnswerShape {
        match self {
            QuestionType::MultipleChoice => AnswerShape::SelectedOptions,
            QuestionType::Ranking => AnswerShape::RankingOrder,
            _ => AnswerShape::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub position: i32,
    #[sqlx(try_from = "String")]
    pub question_type: QuestionType,
    pub prompt: String,
    pub points: i32,
    pub explanation: Option<String>,
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QuizOption {
    pub id: Uuid,
    pub question_id: Uuid,
    pub position: i32,
    pub option_text: String,
    pub image_url: Option<String>,
    pub is_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionWithOptions {
    #[serde(flatten)]
    pub question: Question,
    pub options: Vec<QuizOption>,
}

impl QuestionWithOptions {
    pub fn correct_option_ids(&self) -> Vec<Uuid> {
        self.options
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id)
            .collect()
    }

    /// Option ids in their authored order, which is the expected answer of a ranking question.
    pub fn canonical_order(&self) -> Vec<Uuid> {
        let mut options: Vec<&QuizOption> = self.options.iter().collect();
        options.sort_by_key(|o| o.position);
        options.into_iter().map(|o| o.id).collect()
    }
}
