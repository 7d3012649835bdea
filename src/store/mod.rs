// src/store/mod.rs

//! Persistence seams.
//!
//! The exam session and the HTTP handlers only talk to these traits. `postgres`
//! implements them on a `PgPool`; `memory` keeps everything in process and is
//! what the tests run against.

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;

use crate::models::{
    attempt::{Attempt, NewAttempt},
    section::Section,
    test::{NewTest, Test, TestSummary},
    user::User,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Composite key of a session snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub user_id: i64,
    pub test_id: i64,
}

impl SnapshotKey {
    pub fn new(user_id: i64, test_id: i64) -> Self {
        Self { user_id, test_id }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exam-session:{}:{}", self.user_id, self.test_id)
    }
}

/// Test definitions and sections.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch_test(&self, id: i64) -> Result<Option<Test>, StoreError>;

    /// Summaries, newest first, optionally restricted to one section.
    async fn fetch_tests(&self, section: Option<i64>) -> Result<Vec<TestSummary>, StoreError>;

    async fn fetch_sections(&self) -> Result<Vec<Section>, StoreError>;

    async fn find_test_by_title(&self, title: &str) -> Result<Option<i64>, StoreError>;

    async fn insert_test(&self, test: NewTest) -> Result<Test, StoreError>;

    /// Returns `false` if no such test existed.
    async fn delete_test(&self, id: i64) -> Result<bool, StoreError>;

    /// Fails with `Conflict` when the name is taken.
    async fn create_section(&self, name: &str) -> Result<Section, StoreError>;

    /// Tags `test_id` with every section in `section_ids`.
    async fn assign_sections(&self, test_id: i64, section_ids: &[i64]) -> Result<(), StoreError>;
}

/// Submitted attempts. Rows are insert-only.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn save_attempt(&self, attempt: NewAttempt) -> Result<Attempt, StoreError>;

    /// Newest first.
    async fn fetch_user_attempts(&self, user_id: i64) -> Result<Vec<Attempt>, StoreError>;

    async fn fetch_attempt(&self, id: i64) -> Result<Option<Attempt>, StoreError>;

    async fn delete_attempt(&self, id: i64) -> Result<bool, StoreError>;
}

/// Durable key-value storage for in-progress session snapshots.
///
/// Values are opaque JSON strings; parsing and validation happen in the
/// session layer so a corrupt value never fails the store call itself.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, key: SnapshotKey) -> Result<Option<String>, StoreError>;

    async fn put(&self, key: SnapshotKey, value: String) -> Result<(), StoreError>;

    async fn delete(&self, key: SnapshotKey) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the username is taken.
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;
}
