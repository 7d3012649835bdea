// src/exam/scoring.rs

use serde::{Deserialize, Serialize};

use crate::{
    config::{DEFAULT_MARKS_PER_QUESTION, DEFAULT_NEGATIVE_MARKS, MAX_MARKS},
    exam::answers::{AnswerSet, QuestionId},
    models::test::Test,
};

/// Marks awarded for a correct answer and deducted for a wrong one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkingScheme {
    pub marks_per_question: i32,
    pub negative_marks: i32,
}

impl MarkingScheme {
    /// Resolves the optional per-test fields.
    ///
    /// A missing or non-positive `marks_per_question` falls back to the default,
    /// while an explicit `negative_marks` of zero is kept (no negative marking).
    /// Stored values beyond `MAX_MARKS` are clamped.
    pub fn from_fields(marks_per_question: Option<i32>, negative_marks: Option<i32>) -> Self {
        Self {
            marks_per_question: marks_per_question
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_MARKS_PER_QUESTION)
                .min(MAX_MARKS),
            negative_marks: negative_marks
                .unwrap_or(DEFAULT_NEGATIVE_MARKS)
                .clamp(0, MAX_MARKS),
        }
    }
}

impl Default for MarkingScheme {
    fn default() -> Self {
        Self::from_fields(None, None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Wrong,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub correct_count: usize,
    pub wrong_count: usize,
    pub skipped_count: usize,
    pub total_score: i32,
    pub total_possible: i32,
    pub percentage: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub question_id: QuestionId,
    pub selected: Option<String>,
    pub correct_answer: String,
    pub outcome: Outcome,
    /// Signed contribution of this question to the total.
    pub marks: i32,
}

/// Per-question breakdown plus the summary, as shown after a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultView {
    pub test_id: i64,
    pub scheme: MarkingScheme,
    pub summary: ScoreSummary,
    pub questions: Vec<QuestionOutcome>,
}

/// Scores `answers` against `test`.
///
/// Used both when an attempt is submitted and when a stored attempt is shown
/// again, so the two always agree.
pub fn score(test: &Test, answers: &AnswerSet) -> ScoreSummary {
    evaluate(test, answers).summary
}

/// Grades every question of `test` in order.
pub fn evaluate(test: &Test, answers: &AnswerSet) -> ResultView {
    let scheme = test.marking_scheme();
    let mut summary = ScoreSummary {
        correct_count: 0,
        wrong_count: 0,
        skipped_count: 0,
        total_score: 0,
        total_possible: 0,
        percentage: 0,
    };

    let questions: Vec<QuestionOutcome> = test
        .questions
        .iter()
        .map(|question| {
            let selected = answers.get(question.id);
            let (outcome, marks) = match selected {
                None => {
                    summary.skipped_count += 1;
                    (Outcome::Skipped, 0)
                }
                Some(key) if key == question.correct_answer => {
                    summary.correct_count += 1;
                    (Outcome::Correct, scheme.marks_per_question)
                }
                Some(_) => {
                    summary.wrong_count += 1;
                    (Outcome::Wrong, -scheme.negative_marks)
                }
            };
            summary.total_score = summary.total_score.saturating_add(marks);

            QuestionOutcome {
                question_id: question.id,
                selected: selected.map(str::to_string),
                correct_answer: question.correct_answer.clone(),
                outcome,
                marks,
            }
        })
        .collect();

    summary.total_possible = i32::try_from(test.questions.len())
        .unwrap_or(i32::MAX)
        .saturating_mul(scheme.marks_per_question);
    summary.percentage = percentage(summary.total_score, summary.total_possible);

    ResultView {
        test_id: test.id,
        scheme,
        summary,
        questions,
    }
}

fn percentage(total_score: i32, total_possible: i32) -> i32 {
    if total_possible == 0 {
        return 0;
    }
    (f64::from(total_score) / f64::from(total_possible) * 100.0).round() as i32
}
