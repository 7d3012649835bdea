// src/models/test.rs

use std::{
    collections::{BTreeMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::{
    config::{MAX_DURATION_MINUTES, MINUTE_PER_QUESTION},
    exam::{answers::QuestionId, scoring::MarkingScheme},
};

static OPTION_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]$").expect("option key pattern is valid"));

/// A multiple-choice question as stored inside a test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,

    /// The prompt text.
    #[serde(rename = "question")]
    pub prompt: String,

    /// Option key (single letter) to option text.
    pub options: BTreeMap<String, String>,

    #[serde(rename = "correctAnswer")]
    pub correct_answer: String,
}

impl Question {
    pub fn has_option(&self, key: &str) -> bool {
        self.options.contains_key(key)
    }
}

/// A question without its answer key, for clients taking the test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicQuestion {
    pub id: QuestionId,
    #[serde(rename = "question")]
    pub prompt: String,
    pub options: BTreeMap<String, String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            prompt: q.prompt.clone(),
            options: q.options.clone(),
        }
    }
}

/// A complete test definition.
///
/// The optional marking and duration fields are kept as stored; use
/// [`Test::marking_scheme`] and [`Test::duration_secs`] for the effective values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    pub custom_id: Option<String>,
    pub marks_per_question: Option<i32>,
    pub negative_marks: Option<i32>,
    /// Minutes.
    pub duration: Option<i32>,
    #[serde(default)]
    pub section_ids: Vec<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Test {
    pub fn marking_scheme(&self) -> MarkingScheme {
        MarkingScheme::from_fields(self.marks_per_question, self.negative_marks)
    }

    /// Effective duration in minutes: the stored value, or one minute per question,
    /// capped at `MAX_DURATION_MINUTES`.
    pub fn duration_minutes(&self) -> u32 {
        let minutes = match self.duration {
            Some(minutes) if minutes > 0 => minutes.unsigned_abs(),
            _ => u32::try_from(self.questions.len())
                .unwrap_or(u32::MAX)
                .saturating_mul(MINUTE_PER_QUESTION),
        };
        minutes.min(MAX_DURATION_MINUTES.unsigned_abs())
    }

    pub fn duration_secs(&self) -> u32 {
        self.duration_minutes().saturating_mul(60)
    }

    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    pub fn summary(&self) -> TestSummary {
        let scheme = self.marking_scheme();
        TestSummary {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            question_count: self.questions.len(),
            duration_minutes: self.duration_minutes(),
            marks_per_question: scheme.marks_per_question,
            negative_marks: scheme.negative_marks,
            custom_id: self.custom_id.clone(),
            section_ids: self.section_ids.clone(),
            created_at: self.created_at,
        }
    }

    /// The test as shown on its intro page, answer keys removed.
    pub fn intro(&self) -> TestIntro {
        TestIntro {
            summary: self.summary(),
            questions: self.questions.iter().map(PublicQuestion::from).collect(),
        }
    }
}

/// Catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSummary {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub question_count: usize,
    pub duration_minutes: u32,
    pub marks_per_question: i32,
    pub negative_marks: i32,
    pub custom_id: Option<String>,
    pub section_ids: Vec<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TestIntro {
    #[serde(flatten)]
    pub summary: TestSummary,
    pub questions: Vec<PublicQuestion>,
}

/// Query parameters for the catalog.
#[derive(Debug, Default, Deserialize)]
pub struct TestListParams {
    pub section: Option<i64>,
}

/// Input for inserting a test through a `ContentStore`.
#[derive(Debug, Clone)]
pub struct NewTest {
    pub title: String,
    pub description: String,
    pub questions: Vec<Question>,
    pub custom_id: Option<String>,
    pub marks_per_question: i32,
    pub negative_marks: i32,
    pub duration: i32,
}

/// DTO for creating a single test (admin).
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTestRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    #[validate(custom(function = validate_questions))]
    pub questions: Vec<Question>,
    #[validate(length(min = 1, max = 64))]
    pub custom_id: Option<String>,
    #[validate(range(min = 1, max = 100))]
    pub marks_per_question: Option<i32>,
    #[validate(range(min = 0, max = 100))]
    pub negative_marks: Option<i32>,
    #[validate(range(min = 1, max = 1440))]
    pub duration: Option<i32>,
    #[serde(default)]
    pub section_ids: Vec<i64>,
}

/// Fallback settings applied to imported tests that omit them.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ImportDefaults {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    #[serde(default = "default_marks")]
    #[validate(range(min = 1, max = 100))]
    pub marks_per_question: i32,
    #[serde(default = "default_negative")]
    #[validate(range(min = 0, max = 100))]
    pub negative_marks: i32,
    #[serde(default = "default_import_duration")]
    #[validate(range(min = 1, max = 1440))]
    pub duration: i32,
}

impl Default for ImportDefaults {
    fn default() -> Self {
        Self {
            description: String::new(),
            marks_per_question: default_marks(),
            negative_marks: default_negative(),
            duration: default_import_duration(),
        }
    }
}

fn default_marks() -> i32 {
    crate::config::DEFAULT_MARKS_PER_QUESTION
}

fn default_negative() -> i32 {
    crate::config::DEFAULT_NEGATIVE_MARKS
}

fn default_import_duration() -> i32 {
    crate::config::DEFAULT_IMPORT_DURATION_MINUTES
}

/// DTO for a bulk import (admin).
///
/// Each entry of `tests` is parsed on its own so one malformed item only
/// fails that item.
#[derive(Debug, Deserialize, Validate)]
pub struct ImportTestsRequest {
    pub tests: Vec<serde_json::Value>,
    #[serde(default)]
    #[validate(nested)]
    pub defaults: ImportDefaults,
    #[validate(length(min = 1, max = 64))]
    pub custom_id: Option<String>,
    #[serde(default)]
    pub section_ids: Vec<i64>,
}

/// One entry of an import file. Every field may be missing.
#[derive(Debug, Deserialize)]
pub struct ImportedTest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub questions: Option<Vec<Question>>,
    pub marks_per_question: Option<i32>,
    pub negative_marks: Option<i32>,
    pub duration: Option<i32>,
}

/// Checks question ids, option keys and answer keys.
pub fn validate_questions(questions: &[Question]) -> Result<(), ValidationError> {
    if questions.is_empty() {
        return Err(ValidationError::new("questions_cannot_be_empty"));
    }

    let mut seen = HashSet::new();
    for q in questions {
        if !seen.insert(q.id) {
            return Err(ValidationError::new("duplicate_question_id"));
        }
        if q.prompt.trim().is_empty() {
            return Err(ValidationError::new("question_text_empty"));
        }
        if q.options.is_empty() {
            return Err(ValidationError::new("options_cannot_be_empty"));
        }
        if q.options.keys().any(|k| !OPTION_KEY.is_match(k)) {
            return Err(ValidationError::new("option_key_must_be_a_letter"));
        }
        if !q.has_option(&q.correct_answer) {
            return Err(ValidationError::new("correct_answer_not_an_option"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(id: i64) -> Question {
        Question {
            id,
            prompt: "2 + 2?".to_string(),
            options: [("A", "3"), ("B", "4")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            correct_answer: "B".to_string(),
        }
    }

    fn test_with(questions: Vec<Question>, duration: Option<i32>) -> Test {
        Test {
            id: 1,
            title: "Arithmetic".to_string(),
            description: String::new(),
            questions,
            custom_id: None,
            marks_per_question: None,
            negative_marks: None,
            duration,
            section_ids: Vec::new(),
            created_at: None,
        }
    }

    #[test]
    fn duration_falls_back_to_question_count() {
        let test = test_with(vec![question(1), question(2), question(3)], None);
        assert_eq!(test.duration_secs(), 180);

        let zero = test_with(vec![question(1)], Some(0));
        assert_eq!(zero.duration_secs(), 60);

        let explicit = test_with(vec![question(1)], Some(45));
        assert_eq!(explicit.duration_secs(), 45 * 60);
    }

    #[test]
    fn huge_durations_are_capped() {
        let huge = test_with(vec![question(1)], Some(2_000_000_000));
        assert_eq!(huge.duration_minutes(), 1440);
        assert_eq!(huge.duration_secs(), 1440 * 60);

        let max = test_with(vec![question(1)], Some(i32::MAX));
        assert_eq!(max.duration_secs(), 1440 * 60);
    }

    #[test]
    fn reads_camel_case_question_fields() {
        let q: Question = serde_json::from_value(serde_json::json!({
            "id": 5,
            "question": "Capital of France?",
            "options": {"A": "Paris", "B": "Rome"},
            "correctAnswer": "A"
        }))
        .unwrap();
        assert_eq!(q.prompt, "Capital of France?");
        assert_eq!(q.correct_answer, "A");
    }

    #[test]
    fn intro_hides_answer_keys() {
        let intro = test_with(vec![question(1)], None).intro();
        let json = serde_json::to_value(&intro).unwrap();
        assert!(json["questions"][0].get("correctAnswer").is_none());
        assert_eq!(json["question_count"], 1);
    }

    #[test]
    fn validation_rejects_bad_questions() {
        assert!(validate_questions(&[question(1), question(2)]).is_ok());
        assert!(validate_questions(&[]).is_err());
        assert!(validate_questions(&[question(1), question(1)]).is_err());

        let mut lower_key = question(1);
        lower_key.options.insert("c".to_string(), "5".to_string());
        assert!(validate_questions(&[lower_key]).is_err());

        let mut bad_answer = question(1);
        bad_answer.correct_answer = "D".to_string();
        assert!(validate_questions(&[bad_answer]).is_err());
    }
}
