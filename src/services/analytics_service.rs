use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use uuid::Uuid;

use crate::database::store::QuizStore;
use crate::error::Result;
use crate::models::attempt::AttemptWithAnswers;
use crate::models::quiz::QuizDefinition;
use crate::models::user::{Capability, Viewer};

const BUCKETS: [(&str, f64); 5] = [
    ("[0,20]", 20.0),
    ("(20,40]", 40.0),
    ("(40,60]", 60.0),
    ("(60,80]", 80.0),
    ("(80,100]", 100.0),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBucket {
    pub range: &'static str,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionStats {
    pub question_id: Uuid,
    pub prompt: String,
    pub answered: usize,
    pub correct: usize,
    pub correct_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuizAnalytics {
    pub quiz_id: Uuid,
    pub total_attempts: usize,
    pub graded_attempts: usize,
    pub pending_attempts: usize,
    pub average_score: f64,
    pub pass_rate: f64,
    pub average_time_seconds: f64,
    pub highest_score: Option<f64>,
    pub lowest_score: Option<f64>,
    pub distribution: Vec<ScoreBucket>,
    pub questions: Vec<QuestionStats>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    round2(values.iter().sum::<f64>() / values.len() as f64)
}

/// Share of scores at or above `passing_score`, as a percentage.
pub fn pass_rate(scores: &[f64], passing_score: f64) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let passed = scores.iter().filter(|s| **s >= passing_score).count();
    round2(passed as f64 * 100.0 / scores.len() as f64)
}

/// Buckets `[0,20] (20,40] (40,60] (60,80] (80,100]`; out-of-range scores are clamped.
pub fn bucket_index(score: f64) -> usize {
    let score = score.clamp(0.0, 100.0);
    BUCKETS
        .iter()
        .position(|(_, upper)| score <= *upper)
        .unwrap_or(BUCKETS.len() - 1)
}

pub fn score_distribution(scores: &[f64]) -> Vec<ScoreBucket> {
    let mut counts = [0usize; 5];
    for score in scores {
        counts[bucket_index(*score)] += 1;
    }
    BUCKETS
        .iter()
        .zip(counts)
        .map(|(&(range, _), count)| ScoreBucket { range, count })
        .collect()
}

pub fn summarize(definition: &QuizDefinition, attempts: &[AttemptWithAnswers]) -> QuizAnalytics {
    let graded: Vec<&AttemptWithAnswers> = attempts
        .iter()
        .filter(|a| a.attempt.grading_status.is_graded())
        .collect();
    let scores: Vec<f64> = graded
        .iter()
        .filter_map(|a| a.attempt.graded_percentage())
        .collect();
    let times: Vec<f64> = graded
        .iter()
        .map(|a| f64::from(a.attempt.time_spent_seconds))
        .collect();
    let passing_score = definition.quiz.passing_score.to_f64().unwrap_or(0.0);

    let questions = definition
        .questions
        .iter()
        .map(|q| {
            let graded_answers: Vec<bool> = attempts
                .iter()
                .flat_map(|a| a.answers.iter())
                .filter(|answer| answer.question_id == q.question.id)
                .filter_map(|answer| answer.is_correct)
                .collect();
            let answered = attempts
                .iter()
                .flat_map(|a| a.answers.iter())
                .filter(|answer| answer.question_id == q.question.id)
                .count();
            let correct = graded_answers.iter().filter(|c| **c).count();
            let correct_rate = if graded_answers.is_empty() {
                0.0
            } else {
                round2(correct as f64 * 100.0 / graded_answers.len() as f64)
            };
            QuestionStats {
                question_id: q.question.id,
                prompt: q.question.prompt.clone(),
                answered,
                correct,
                correct_rate,
            }
        })
        .collect();

    QuizAnalytics {
        quiz_id: definition.quiz.id,
        total_attempts: attempts.len(),
        graded_attempts: graded.len(),
        pending_attempts: attempts.len() - graded.len(),
        average_score: average(&scores),
        pass_rate: pass_rate(&scores, passing_score),
        average_time_seconds: average(&times),
        highest_score: scores.iter().copied().reduce(f64::max),
        lowest_score: scores.iter().copied().reduce(f64::min),
        distribution: score_distribution(&scores),
        questions,
    }
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn QuizStore>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn QuizStore>) -> Self {
        Self { store }
    }

    pub async fn quiz_analytics(&self, viewer: &Viewer, quiz_id: Uuid) -> Result<QuizAnalytics> {
        viewer.require(Capability::ViewAnalytics)?;
        let definition = self.store.fetch_quiz(quiz_id).await?;
        let attempts = self.store.list_quiz_attempts(quiz_id).await?;
        Ok(summarize(&definition, &attempts))
    }
}
