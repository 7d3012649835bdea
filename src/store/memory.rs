// src/store/memory.rs

use std::{
    collections::HashMap,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::Utc;

use super::{AttemptStore, ContentStore, SnapshotKey, SnapshotStore, StoreError, UserStore};
use crate::models::{
    attempt::{Attempt, NewAttempt},
    section::Section,
    test::{NewTest, Test, TestSummary},
    user::User,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    tests: Vec<Test>,
    sections: Vec<Section>,
    attempts: Vec<Attempt>,
    users: Vec<User>,
    snapshots: HashMap<SnapshotKey, String>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Process-local implementation of every store trait.
///
/// Used by the test suites and for running the service without a database.
/// The `fail_*` switches make the corresponding writes return
/// `StoreError::Unavailable`.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_attempt_saves: AtomicBool,
    fail_snapshot_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_attempt_saves(&self, fail: bool) {
        self.fail_attempt_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_snapshot_writes(&self, fail: bool) {
        self.fail_snapshot_writes.store(fail, Ordering::SeqCst);
    }

    /// Stores `test` as-is, keeping its id. Handy for fixtures.
    pub fn insert_fixture(&self, test: Test) {
        let mut tables = self.lock();
        tables.next_id = tables.next_id.max(test.id);
        tables.tests.retain(|t| t.id != test.id);
        tables.tests.push(test);
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable.
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn fetch_test(&self, id: i64) -> Result<Option<Test>, StoreError> {
        Ok(self.lock().tests.iter().find(|t| t.id == id).cloned())
    }

    async fn fetch_tests(&self, section: Option<i64>) -> Result<Vec<TestSummary>, StoreError> {
        let tables = self.lock();
        let mut tests: Vec<&Test> = tables
            .tests
            .iter()
            .filter(|t| section.is_none_or(|s| t.section_ids.contains(&s)))
            .collect();
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tests.into_iter().map(Test::summary).collect())
    }

    async fn fetch_sections(&self) -> Result<Vec<Section>, StoreError> {
        let mut sections = self.lock().sections.clone();
        sections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sections)
    }

    async fn find_test_by_title(&self, title: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .lock()
            .tests
            .iter()
            .find(|t| t.title == title)
            .map(|t| t.id))
    }

    async fn insert_test(&self, test: NewTest) -> Result<Test, StoreError> {
        let mut tables = self.lock();
        let id = tables.next_id();
        let stored = Test {
            id,
            title: test.title,
            description: test.description,
            questions: test.questions,
            custom_id: test.custom_id,
            marks_per_question: Some(test.marks_per_question),
            negative_marks: Some(test.negative_marks),
            duration: Some(test.duration),
            section_ids: Vec::new(),
            created_at: Some(Utc::now()),
        };
        tables.tests.push(stored.clone());
        Ok(stored)
    }

    async fn delete_test(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        let before = tables.tests.len();
        tables.tests.retain(|t| t.id != id);
        tables.snapshots.retain(|key, _| key.test_id != id);
        Ok(tables.tests.len() != before)
    }

    async fn create_section(&self, name: &str) -> Result<Section, StoreError> {
        let mut tables = self.lock();
        if tables.sections.iter().any(|s| s.name == name) {
            return Err(StoreError::Conflict(format!(
                "Section '{}' already exists",
                name
            )));
        }
        let section = Section {
            id: tables.next_id(),
            name: name.to_string(),
            created_at: Some(Utc::now()),
        };
        tables.sections.push(section.clone());
        Ok(section)
    }

    async fn assign_sections(&self, test_id: i64, section_ids: &[i64]) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if let Some(missing) = section_ids
            .iter()
            .find(|id| !tables.sections.iter().any(|s| s.id == **id))
        {
            return Err(StoreError::NotFound(format!("Section {} not found", missing)));
        }
        let test = tables
            .tests
            .iter_mut()
            .find(|t| t.id == test_id)
            .ok_or_else(|| StoreError::NotFound(format!("Test {} not found", test_id)))?;
        for id in section_ids {
            if !test.section_ids.contains(id) {
                test.section_ids.push(*id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn save_attempt(&self, attempt: NewAttempt) -> Result<Attempt, StoreError> {
        if self.fail_attempt_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("attempt writes disabled".to_string()));
        }
        let mut tables = self.lock();
        let stored = Attempt {
            id: tables.next_id(),
            user_id: attempt.user_id,
            test_id: attempt.test_id,
            answers: attempt.answers,
            score: attempt.score,
            created_at: Utc::now(),
        };
        tables.attempts.push(stored.clone());
        Ok(stored)
    }

    async fn fetch_user_attempts(&self, user_id: i64) -> Result<Vec<Attempt>, StoreError> {
        let tables = self.lock();
        let mut attempts: Vec<Attempt> = tables
            .attempts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(attempts)
    }

    async fn fetch_attempt(&self, id: i64) -> Result<Option<Attempt>, StoreError> {
        Ok(self.lock().attempts.iter().find(|a| a.id == id).cloned())
    }

    async fn delete_attempt(&self, id: i64) -> Result<bool, StoreError> {
        let mut tables = self.lock();
        let before = tables.attempts.len();
        tables.attempts.retain(|a| a.id != id);
        Ok(tables.attempts.len() != before)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<String>, StoreError> {
        Ok(self.lock().snapshots.get(&key).cloned())
    }

    async fn put(&self, key: SnapshotKey, value: String) -> Result<(), StoreError> {
        if self.fail_snapshot_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("snapshot writes disabled".to_string()));
        }
        self.lock().snapshots.insert(key, value);
        Ok(())
    }

    async fn delete(&self, key: SnapshotKey) -> Result<(), StoreError> {
        self.lock().snapshots.remove(&key);
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, StoreError> {
        let mut tables = self.lock();
        if tables.users.iter().any(|u| u.username == username) {
            return Err(StoreError::Conflict(format!(
                "Username '{}' already exists",
                username
            )));
        }
        let user = User {
            id: tables.next_id(),
            username: username.to_string(),
            password: password_hash.to_string(),
            role: role.to_string(),
            created_at: Some(Utc::now()),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }
}
