// src/exam/answers.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Question identifier, unique within a single test.
pub type QuestionId = i64;

/// The answers captured during an attempt.
///
/// Maps a question id to the selected option key. A question missing from the
/// map is unanswered. Serializes as a JSON object (`{"1": "A"}`); the legacy
/// array form (`[{"questionId": 1, "selectedAnswer": "A"}]`) is accepted on
/// input and normalized into the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AnswerSetRepr", into = "BTreeMap<String, String>")]
pub struct AnswerSet(BTreeMap<QuestionId, String>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, question_id: QuestionId) -> Option<&str> {
        self.0.get(&question_id).map(String::as_str)
    }

    pub fn contains(&self, question_id: QuestionId) -> bool {
        self.0.contains_key(&question_id)
    }

    /// Records `option_key` for `question_id`.
    /// Returns `false` when the same key was already selected.
    pub fn select(&mut self, question_id: QuestionId, option_key: &str) -> bool {
        match self.0.get(&question_id) {
            Some(existing) if existing == option_key => false,
            _ => {
                self.0.insert(question_id, option_key.to_string());
                true
            }
        }
    }

    /// Removes the answer for `question_id`. Returns `false` if there was none.
    pub fn clear(&mut self, question_id: QuestionId) -> bool {
        self.0.remove(&question_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn question_ids(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (QuestionId, &str)> {
        self.0.iter().map(|(id, key)| (*id, key.as_str()))
    }
}

impl FromIterator<(QuestionId, String)> for AnswerSet {
    fn from_iter<I: IntoIterator<Item = (QuestionId, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<AnswerSet> for BTreeMap<String, String> {
    fn from(set: AnswerSet) -> Self {
        set.0
            .into_iter()
            .map(|(id, key)| (id.to_string(), key))
            .collect()
    }
}

/// Entry of the legacy array representation.
#[derive(Debug, Deserialize)]
struct LegacyAnswer {
    #[serde(rename = "questionId")]
    question_id: QuestionId,
    #[serde(rename = "selectedAnswer")]
    selected_answer: String,
}

/// Wire shapes accepted when reading an answer set.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnswerSetRepr {
    Map(BTreeMap<String, String>),
    Legacy(Vec<LegacyAnswer>),
}

impl TryFrom<AnswerSetRepr> for AnswerSet {
    type Error = String;

    fn try_from(repr: AnswerSetRepr) -> Result<Self, Self::Error> {
        match repr {
            AnswerSetRepr::Map(map) => map
                .into_iter()
                .map(|(id, key)| {
                    id.trim()
                        .parse::<QuestionId>()
                        .map(|id| (id, key))
                        .map_err(|_| format!("invalid question id '{}'", id))
                })
                .collect(),
            // Later entries win, matching how the old client overwrote answers.
            AnswerSetRepr::Legacy(entries) => Ok(entries
                .into_iter()
                .map(|a| (a.question_id, a.selected_answer))
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_is_idempotent() {
        let mut answers = AnswerSet::new();
        assert!(answers.select(1, "A"));
        let after_first = answers.clone();
        assert!(!answers.select(1, "A"));
        assert_eq!(answers, after_first);
    }

    #[test]
    fn select_switches_keys() {
        let mut answers = AnswerSet::new();
        answers.select(1, "A");
        assert!(answers.select(1, "C"));
        assert_eq!(answers.get(1), Some("C"));
        assert_eq!(answers.len(), 1);
    }

    #[test]
    fn clear_missing_answer_is_noop() {
        let mut answers = AnswerSet::new();
        answers.select(2, "B");
        let before = answers.clone();
        assert!(!answers.clear(1));
        assert_eq!(answers, before);
    }

    #[test]
    fn reads_map_form() {
        let answers: AnswerSet = serde_json::from_str(r#"{"1":"A","7":"D"}"#).unwrap();
        assert_eq!(answers.get(1), Some("A"));
        assert_eq!(answers.get(7), Some("D"));
    }

    #[test]
    fn normalizes_legacy_array_form() {
        let answers: AnswerSet = serde_json::from_str(
            r#"[{"questionId":3,"selectedAnswer":"B"},{"questionId":4,"selectedAnswer":"A"}]"#,
        )
        .unwrap();
        assert_eq!(answers.get(3), Some("B"));
        assert_eq!(answers.get(4), Some("A"));

        let written = serde_json::to_value(&answers).unwrap();
        assert_eq!(written, serde_json::json!({"3": "B", "4": "A"}));
    }

    #[test]
    fn rejects_non_numeric_keys() {
        let result: Result<AnswerSet, _> = serde_json::from_str(r#"{"one":"A"}"#);
        assert!(result.is_err());
    }
}
