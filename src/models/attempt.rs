// src/models/attempt.rs

use serde::{Deserialize, Serialize};

use crate::exam::{answers::AnswerSet, scoring::ResultView};

/// Represents the 'attempts' table.
/// One row per submitted test; rows are never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub test_id: i64,
    pub answers: AnswerSet,
    pub score: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Input for `AttemptStore::save_attempt`.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub user_id: i64,
    pub test_id: i64,
    pub answers: AnswerSet,
    pub score: i32,
}

/// A row of the user's history page.
#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub test_id: i64,
    pub test_title: String,
    pub score: i32,
    pub answered_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A stored attempt re-scored against its test.
#[derive(Debug, Serialize)]
pub struct AttemptResult {
    pub attempt_id: i64,
    pub test_title: String,
    pub stored_score: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    pub result: ResultView,
}
