//! Deterministic quiz scoring.
//!
//! Multiple choice answers are matched on the option's original index, so
//! grading is unaffected by the order or language options were shown in.

use std::collections::BTreeMap;

use db::models::{
    quiz_attempt::{AnswerValue, QuestionResult},
    toolbox_talk::{QuestionType, ToolboxTalkQuestion},
};
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GradingError {
    #[error("{} question(s) unanswered", .0.len())]
    Unanswered(Vec<Uuid>),
    #[error("answer given for unknown question {0}")]
    UnknownQuestion(Uuid),
    #[error("question {question_id} expects {expected}")]
    WrongAnswerKind {
        question_id: Uuid,
        expected: &'static str,
    },
    #[error("option {index} does not exist on question {question_id}")]
    OptionOutOfRange { question_id: Uuid, index: i32 },
    #[error("question {0} has no usable answer key")]
    MisconfiguredQuestion(Uuid),
}

/// Canonical answer key, one variant per question type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerKey {
    MultipleChoice { option_count: usize, correct_index: i32 },
    TrueFalse { correct: bool },
    ShortAnswer { expected: String },
}

impl AnswerKey {
    fn check(&self, question_id: Uuid, answer: &AnswerValue) -> Result<bool, GradingError> {
        match (self, answer) {
            (
                AnswerKey::MultipleChoice {
                    option_count,
                    correct_index,
                },
                AnswerValue::OptionIndex(index),
            ) => {
                if *index < 0 || *index as usize >= *option_count {
                    return Err(GradingError::OptionOutOfRange {
                        question_id,
                        index: *index,
                    });
                }
                Ok(index == correct_index)
            }
            (AnswerKey::MultipleChoice { .. }, AnswerValue::Text(_)) => {
                Err(GradingError::WrongAnswerKind {
                    question_id,
                    expected: "an option index",
                })
            }
            (AnswerKey::TrueFalse { correct }, AnswerValue::Text(text)) => {
                Ok(parse_bool(text) == Some(*correct))
            }
            (AnswerKey::ShortAnswer { expected }, AnswerValue::Text(text)) => {
                Ok(normalize(text) == normalize(expected))
            }
            (_, AnswerValue::OptionIndex(_)) => Err(GradingError::WrongAnswerKind {
                question_id,
                expected: "a text answer",
            }),
        }
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone)]
pub struct GradableQuestion {
    pub id: Uuid,
    pub points: i32,
    pub key: AnswerKey,
}

impl TryFrom<&ToolboxTalkQuestion> for GradableQuestion {
    type Error = GradingError;

    fn try_from(question: &ToolboxTalkQuestion) -> Result<Self, Self::Error> {
        let misconfigured = || GradingError::MisconfiguredQuestion(question.id);
        let key = match question.question_type {
            QuestionType::MultipleChoice => {
                let option_count = question.options.0.len();
                let correct_index = question.correct_option_index.ok_or_else(misconfigured)?;
                if correct_index < 0 || correct_index as usize >= option_count {
                    return Err(misconfigured());
                }
                AnswerKey::MultipleChoice {
                    option_count,
                    correct_index,
                }
            }
            QuestionType::TrueFalse => AnswerKey::TrueFalse {
                correct: question
                    .correct_answer
                    .as_deref()
                    .and_then(|a| parse_bool(a.trim()))
                    .ok_or_else(misconfigured)?,
            },
            QuestionType::ShortAnswer => AnswerKey::ShortAnswer {
                expected: question
                    .correct_answer
                    .clone()
                    .filter(|a| !a.trim().is_empty())
                    .ok_or_else(misconfigured)?,
            },
        };

        Ok(Self {
            id: question.id,
            points: question.points.max(0),
            key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export)]
pub struct QuizResult {
    pub results: Vec<QuestionResult>,
    pub score: i32,
    pub max_score: i32,
    pub percentage: i32,
    pub passed: bool,
}

/// Grades a complete submission. Partial submissions are rejected, never
/// scored.
pub fn grade(
    questions: &[GradableQuestion],
    answers: &BTreeMap<Uuid, AnswerValue>,
    passing_score: Option<i32>,
) -> Result<QuizResult, GradingError> {
    let missing: Vec<Uuid> = questions
        .iter()
        .filter(|q| !answers.contains_key(&q.id))
        .map(|q| q.id)
        .collect();
    if !missing.is_empty() {
        return Err(GradingError::Unanswered(missing));
    }
    if let Some(unknown) = answers
        .keys()
        .find(|id| !questions.iter().any(|q| q.id == **id))
    {
        return Err(GradingError::UnknownQuestion(*unknown));
    }

    let mut results = Vec::with_capacity(questions.len());
    for question in questions {
        let correct = question.key.check(question.id, &answers[&question.id])?;
        results.push(QuestionResult {
            question_id: question.id,
            correct,
            points_awarded: if correct { question.points } else { 0 },
            points_possible: question.points,
        });
    }

    let score: i32 = results.iter().map(|r| r.points_awarded).sum();
    let max_score: i32 = results.iter().map(|r| r.points_possible).sum();
    let percentage = rounded_percentage(score, max_score);
    let passed = passing_score.is_none_or(|threshold| percentage >= threshold);

    Ok(QuizResult {
        results,
        score,
        max_score,
        percentage,
        passed,
    })
}

/// `score / max * 100`, rounded half up. A quiz worth no points is 100%.
fn rounded_percentage(score: i32, max_score: i32) -> i32 {
    if max_score <= 0 {
        return 100;
    }
    let (score, max) = (i64::from(score), i64::from(max_score));
    ((score * 200 + max) / (max * 2)) as i32
}
