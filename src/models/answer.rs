use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

use super::question::{AnswerShape, QuestionType};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Answer {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub selected_options: Option<Vec<Uuid>>,
    pub text_answer: Option<String>,
    pub ranking_order: Option<Vec<Uuid>>,
    pub is_correct: Option<bool>,
    pub points_awarded: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// An answer row as produced by a session at submission time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnswer {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: Uuid,
    pub selected_options: Option<Vec<Uuid>>,
    pub text_answer: Option<String>,
    pub ranking_order: Option<Vec<Uuid>>,
}

impl NewAnswer {
    /// Shapes a raw answer value into the column its question type uses. Values of the
    /// wrong shape are coerced where that is unambiguous and dropped otherwise.
    pub fn shape(
        attempt_id: Uuid,
        question_id: Uuid,
        question_type: QuestionType,
        value: &JsonValue,
    ) -> Self {
        let mut answer = NewAnswer {
            id: Uuid::new_v4(),
            attempt_id,
            question_id,
            selected_options: None,
            text_answer: None,
            ranking_order: None,
        };
        match question_type.answer_shape() {
            AnswerShape::SelectedOptions => answer.selected_options = Some(uuid_list(value)),
            AnswerShape::RankingOrder => answer.ranking_order = Some(uuid_list(value)),
            AnswerShape::Text => answer.text_answer = text_value(value),
        }
        answer
    }
}

fn uuid_list(value: &JsonValue) -> Vec<Uuid> {
    let parse = |v: &JsonValue| v.as_str().and_then(|s| Uuid::parse_str(s).ok());
    match value {
        JsonValue::Array(items) => items.iter().filter_map(parse).collect(),
        JsonValue::String(_) => parse(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn text_value(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multiple_choice_populates_only_selected_options() {
        let option = Uuid::new_v4();
        let answer = NewAnswer::shape(
            Uuid::new_v4(),
            Uuid::new_v4(),
            QuestionType::MultipleChoice,
            &json!([option.to_string()]),
        );
        assert_eq!(answer.selected_options, Some(vec![option]));
        assert!(answer.text_answer.is_none());
        assert!(answer.ranking_order.is_none());
    }

    #[test]
    fn single_selection_string_is_accepted() {
        let option = Uuid::new_v4();
        let answer = NewAnswer::shape(
            Uuid::new_v4(),
            Uuid::new_v4(),
            QuestionType::MultipleChoice,
            &json!(option.to_string()),
        );
        assert_eq!(answer.selected_options, Some(vec![option]));
    }

    #[test]
    fn open_ended_populates_only_text() {
        let answer = NewAnswer::shape(
            Uuid::new_v4(),
            Uuid::new_v4(),
            QuestionType::OpenEnded,
            &json!("Because entropy increases"),
        );
        assert_eq!(answer.text_answer.as_deref(), Some("Because entropy increases"));
        assert!(answer.selected_options.is_none());
        assert!(answer.ranking_order.is_none());
    }

    #[test]
    fn ranking_populates_only_ranking_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let answer = NewAnswer::shape(
            Uuid::new_v4(),
            Uuid::new_v4(),
            QuestionType::Ranking,
            &json!([b.to_string(), "not-a-uuid", a.to_string()]),
        );
        assert_eq!(answer.ranking_order, Some(vec![b, a]));
        assert!(answer.selected_options.is_none());
        assert!(answer.text_answer.is_none());
    }

    #[test]
    fn numeric_text_answer_is_stringified() {
        let answer = NewAnswer::shape(
            Uuid::new_v4(),
            Uuid::new_v4(),
            QuestionType::FillBlank,
            &json!(42),
        );
        assert_eq!(answer.text_answer.as_deref(), Some("42"));
    }
}
