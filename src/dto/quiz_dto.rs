use std::collections::HashMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;
use validator::Validate;

use crate::error::{Error, Result};
use crate::models::question::{QuestionType, QuestionWithOptions};
use crate::models::quiz::{Quiz, QuizDefinition, QuizType};

/// Identifier of a question in an editor save. Editors mint temporary ids such as
/// `temp-3` for questions that do not exist yet; anything that parses as a UUID is
/// treated as an existing question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DraftId {
    Persisted(Uuid),
    Temporary(String),
}

impl DraftId {
    pub fn parse(raw: &str) -> Self {
        match Uuid::parse_str(raw.trim()) {
            Ok(id) => DraftId::Persisted(id),
            Err(_) => DraftId::Temporary(raw.trim().to_string()),
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, DraftId::Temporary(_))
    }
}

impl Default for DraftId {
    fn default() -> Self {
        DraftId::Temporary(String::new())
    }
}

impl Serialize for DraftId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DraftId::Persisted(id) => serializer.serialize_str(&id.to_string()),
            DraftId::Temporary(temp) => serializer.serialize_str(temp),
        }
    }
}

impl<'de> Deserialize<'de> for DraftId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(DraftId::parse(&raw))
    }
}

fn trim_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(raw.trim().to_string())
}

// Trims strings and converts empty strings to None
fn trim_optional_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

fn default_true() -> bool {
    true
}

fn default_passing_score() -> f64 {
    60.0
}

fn default_points() -> i32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SaveQuizPayload {
    pub id: Option<Uuid>,
    pub course_id: Option<Uuid>,

    #[serde(deserialize_with = "trim_string")]
    #[validate(length(min = 1, message = "Title is required"))]
    pub title: String,

    #[serde(default, deserialize_with = "trim_optional_string")]
    pub description: Option<String>,

    #[serde(default)]
    pub quiz_type: QuizType,

    #[validate(range(
        min = 1,
        max = 1440,
        message = "Time limit must be between 1 and 1440 minutes"
    ))]
    pub time_limit_minutes: Option<i32>,

    #[validate(range(min = 1, message = "Max attempts must be at least 1"))]
    pub max_attempts: Option<i32>,

    #[serde(default)]
    pub randomize_questions: bool,

    #[serde(default)]
    pub randomize_answers: bool,

    #[serde(default = "default_true")]
    pub show_results_immediately: bool,

    #[serde(default = "default_passing_score")]
    #[validate(range(
        min = 0.0,
        max = 100.0,
        message = "Passing score must be between 0 and 100"
    ))]
    pub passing_score: f64,

    #[serde(default)]
    pub is_published: bool,

    #[serde(default)]
    #[validate(nested)]
    pub questions: Vec<QuestionDraft>,
}

impl SaveQuizPayload {
    pub fn passing_score_decimal(&self) -> Result<Decimal> {
        Decimal::from_f64(self.passing_score)
            .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
            .ok_or_else(|| Error::BadRequest("Invalid passing score".to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct QuestionDraft {
    #[serde(default)]
    pub id: DraftId,

    #[serde(rename = "type")]
    pub question_type: QuestionType,

    #[serde(deserialize_with = "trim_string")]
    #[validate(length(min = 1, message = "Question prompt is required"))]
    pub prompt: String,

    #[serde(default = "default_points")]
    #[validate(range(min = 0, message = "Points cannot be negative"))]
    pub points: i32,

    #[serde(default, deserialize_with = "trim_optional_string")]
    pub explanation: Option<String>,

    pub media_url: Option<String>,

    #[serde(default)]
    pub options: Vec<OptionDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionDraft {
    #[serde(default)]
    pub text: String,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_correct: bool,
}

/// Result of an editor save: the stored aggregate plus the ids minted for questions
/// that arrived with temporary ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedQuiz {
    pub quiz: QuizDefinition,
    pub created_question_ids: HashMap<String, Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct QuizListQuery {
    pub course_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizSummary {
    pub id: Uuid,
    pub course_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub quiz_type: QuizType,
    pub time_limit_minutes: Option<i32>,
    pub max_attempts: Option<i32>,
    pub passing_score: Decimal,
    pub is_published: bool,
}

impl From<Quiz> for QuizSummary {
    fn from(quiz: Quiz) -> Self {
        Self {
            id: quiz.id,
            course_id: quiz.course_id,
            title: quiz.title,
            description: quiz.description,
            quiz_type: quiz.quiz_type,
            time_limit_minutes: quiz.time_limit_minutes,
            max_attempts: quiz.max_attempts,
            passing_score: quiz.passing_score,
            is_published: quiz.is_published,
        }
    }
}

/// What a student sees of a quiz before taking it: no correctness flags, no explanations.
#[derive(Debug, Clone, Serialize)]
pub struct PublicQuizDefinition {
    #[serde(flatten)]
    pub quiz: QuizSummary,
    pub question_count: usize,
    pub total_points: i32,
}

impl From<QuizDefinition> for PublicQuizDefinition {
    fn from(definition: QuizDefinition) -> Self {
        let question_count = definition.questions.len();
        let total_points = definition.total_points();
        Self {
            quiz: QuizSummary::from(definition.quiz),
            question_count,
            total_points,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum QuizView {
    Full(QuizDefinition),
    Public(PublicQuizDefinition),
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicOption {
    pub id: Uuid,
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicQuestion {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub prompt: String,
    pub points: i32,
    pub media_url: Option<String>,
    pub options: Vec<PublicOption>,
}

impl From<&QuestionWithOptions> for PublicQuestion {
    fn from(q: &QuestionWithOptions) -> Self {
        Self {
            id: q.question.id,
            question_type: q.question.question_type,
            prompt: q.question.prompt.clone(),
            points: q.question.points,
            media_url: q.question.media_url.clone(),
            options: q
                .options
                .iter()
                .map(|o| PublicOption {
                    id: o.id,
                    text: o.option_text.clone(),
                    image_url: o.image_url.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_ids_distinguish_temporary_from_persisted() {
        let id = Uuid::new_v4();
        assert_eq!(DraftId::parse(&id.to_string()), DraftId::Persisted(id));
        assert_eq!(
            DraftId::parse("temp-1712"),
            DraftId::Temporary("temp-1712".into())
        );
        assert!(DraftId::default().is_temporary());
    }

    #[test]
    fn time_limit_is_bounded_to_a_day() {
        let within: SaveQuizPayload = serde_json::from_value(json!({
            "title": "Final exam",
            "time_limit_minutes": 1440
        }))
        .unwrap();
        assert!(within.validate().is_ok());

        let oversized: SaveQuizPayload = serde_json::from_value(json!({
            "title": "Final exam",
            "time_limit_minutes": 100_000_000
        }))
        .unwrap();
        let errors = oversized.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("time_limit_minutes"));
    }

    #[test]
    fn blank_title_fails_validation() {
        let payload: SaveQuizPayload = serde_json::from_value(json!({
            "title": "   ",
            "questions": []
        }))
        .unwrap();
        assert_eq!(payload.title, "");
        assert!(payload.validate().is_err());
    }

    #[test]
    fn payload_defaults_apply() {
        let payload: SaveQuizPayload = serde_json::from_value(json!({
            "title": "Week 3 check-in",
            "questions": [{ "id": "temp-1", "type": "open_ended", "prompt": "Why?" }]
        }))
        .unwrap();
        assert!(payload.validate().is_ok());
        assert_eq!(payload.quiz_type, QuizType::Graded);
        assert!(payload.show_results_immediately);
        assert_eq!(payload.passing_score_decimal().unwrap(), Decimal::new(60, 0));
        assert_eq!(payload.questions[0].points, 1);
        assert!(payload.questions[0].id.is_temporary());
    }

    #[test]
    fn nested_question_validation_runs() {
        let payload: SaveQuizPayload = serde_json::from_value(json!({
            "title": "Quiz",
            "passing_score": 120.0,
            "questions": [{ "type": "ranking", "prompt": "", "points": -1 }]
        }))
        .unwrap();
        let errors = payload.validate().unwrap_err();
        assert!(errors.errors().contains_key("passing_score"));
        assert!(errors.errors().contains_key("questions"));
    }
}
