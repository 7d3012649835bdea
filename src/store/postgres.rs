// src/store/postgres.rs

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, types::Json};

use super::{AttemptStore, ContentStore, SnapshotKey, SnapshotStore, StoreError, UserStore};
use crate::{
    exam::answers::AnswerSet,
    models::{
        attempt::{Attempt, NewAttempt},
        section::Section,
        test::{NewTest, Question, Test, TestSummary},
        user::User,
    },
};

/// All store traits backed by one PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Row shape of `tests` joined with its section ids.
#[derive(FromRow)]
struct TestRow {
    id: i64,
    title: String,
    description: String,
    questions: Json<Vec<Question>>,
    custom_id: Option<String>,
    marks_per_question: Option<i32>,
    negative_marks: Option<i32>,
    duration: Option<i32>,
    section_ids: Vec<i64>,
    created_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<TestRow> for Test {
    fn from(row: TestRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            questions: row.questions.0,
            custom_id: row.custom_id,
            marks_per_question: row.marks_per_question,
            negative_marks: row.negative_marks,
            duration: row.duration,
            section_ids: row.section_ids,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    id: i64,
    user_id: i64,
    test_id: i64,
    answers: Json<AnswerSet>,
    score: i32,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<AttemptRow> for Attempt {
    fn from(row: AttemptRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            test_id: row.test_id,
            answers: row.answers.0,
            score: row.score,
            created_at: row.created_at,
        }
    }
}

const TEST_COLUMNS: &str = r#"
    t.id,
    t.title,
    t.description,
    t.questions,
    t.custom_id,
    t.marks_per_question,
    t.negative_marks,
    t.duration,
    t.created_at,
    COALESCE(
        ARRAY_AGG(ts.section_id ORDER BY ts.section_id) FILTER (WHERE ts.section_id IS NOT NULL),
        '{}'::BIGINT[]
    ) AS section_ids
"#;

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

#[async_trait]
impl ContentStore for PgStore {
    async fn fetch_test(&self, id: i64) -> Result<Option<Test>, StoreError> {
        let sql = format!(
            "SELECT {} FROM tests t LEFT JOIN test_sections ts ON ts.test_id = t.id \
             WHERE t.id = $1 GROUP BY t.id",
            TEST_COLUMNS
        );
        let row = sqlx::query_as::<_, TestRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Test::from))
    }

    async fn fetch_tests(&self, section: Option<i64>) -> Result<Vec<TestSummary>, StoreError> {
        let sql = format!(
            "SELECT {} FROM tests t LEFT JOIN test_sections ts ON ts.test_id = t.id \
             WHERE $1::BIGINT IS NULL OR EXISTS ( \
                 SELECT 1 FROM test_sections f WHERE f.test_id = t.id AND f.section_id = $1 \
             ) \
             GROUP BY t.id \
             ORDER BY t.created_at DESC, t.id DESC",
            TEST_COLUMNS
        );
        let rows = sqlx::query_as::<_, TestRow>(&sql)
            .bind(section)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| Test::from(r).summary()).collect())
    }

    async fn fetch_sections(&self) -> Result<Vec<Section>, StoreError> {
        let sections = sqlx::query_as::<_, Section>(
            "SELECT id, name, created_at FROM sections ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sections)
    }

    async fn find_test_by_title(&self, title: &str) -> Result<Option<i64>, StoreError> {
        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM tests WHERE title = $1 LIMIT 1")
            .bind(title)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_test(&self, test: NewTest) -> Result<Test, StoreError> {
        let row = sqlx::query_as::<_, TestRow>(
            r#"
            INSERT INTO tests
            (title, description, questions, custom_id, marks_per_question, negative_marks, duration)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING
                id, title, description, questions, custom_id,
                marks_per_question, negative_marks, duration, created_at,
                '{}'::BIGINT[] AS section_ids
            "#,
        )
        .bind(&test.title)
        .bind(&test.description)
        .bind(Json(&test.questions))
        .bind(&test.custom_id)
        .bind(test.marks_per_question)
        .bind(test.negative_marks)
        .bind(test.duration)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn delete_test(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tests WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_section(&self, name: &str) -> Result<Section, StoreError> {
        sqlx::query_as::<_, Section>(
            "INSERT INTO sections (name) VALUES ($1) RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("Section '{}' already exists", name))
            } else {
                StoreError::from(e)
            }
        })
    }

    async fn assign_sections(&self, test_id: i64, section_ids: &[i64]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for section_id in section_ids {
            sqlx::query(
                "INSERT INTO test_sections (test_id, section_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(test_id)
            .bind(section_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    StoreError::NotFound(format!(
                        "Test {} or section {} not found",
                        test_id, section_id
                    ))
                } else {
                    StoreError::from(e)
                }
            })?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn save_attempt(&self, attempt: NewAttempt) -> Result<Attempt, StoreError> {
        let row = sqlx::query_as::<_, AttemptRow>(
            r#"
            INSERT INTO attempts (user_id, test_id, answers, score)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, test_id, answers, score, created_at
            "#,
        )
        .bind(attempt.user_id)
        .bind(attempt.test_id)
        .bind(Json(&attempt.answers))
        .bind(attempt.score)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn fetch_user_attempts(&self, user_id: i64) -> Result<Vec<Attempt>, StoreError> {
        let rows = sqlx::query_as::<_, AttemptRow>(
            r#"
            SELECT id, user_id, test_id, answers, score, created_at
            FROM attempts
            WHERE user_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Attempt::from).collect())
    }

    async fn fetch_attempt(&self, id: i64) -> Result<Option<Attempt>, StoreError> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "SELECT id, user_id, test_id, answers, score, created_at FROM attempts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Attempt::from))
    }

    async fn delete_attempt(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM attempts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SnapshotStore for PgStore {
    async fn get(&self, key: SnapshotKey) -> Result<Option<String>, StoreError> {
        let payload = sqlx::query_scalar::<_, String>(
            "SELECT payload FROM session_snapshots WHERE user_id = $1 AND test_id = $2",
        )
        .bind(key.user_id)
        .bind(key.test_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }

    async fn put(&self, key: SnapshotKey, value: String) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_snapshots (user_id, test_id, payload, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, test_id) DO UPDATE SET
                payload = EXCLUDED.payload,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key.user_id)
        .bind(key.test_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: SnapshotKey) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM session_snapshots WHERE user_id = $1 AND test_id = $2")
            .bind(key.user_id)
            .bind(key.test_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        role: &str,
    ) -> Result<User, StoreError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password, role)
            VALUES ($1, $2, $3)
            RETURNING id, username, password, role, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .bind(role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("Username '{}' already exists", username))
            } else {
                tracing::error!("Failed to create user: {:?}", e);
                StoreError::from(e)
            }
        })
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password, role, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, password, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }
}
