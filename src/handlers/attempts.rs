// src/handlers/attempts.rs

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    exam::scoring::evaluate,
    models::attempt::{Attempt, AttemptResult, HistoryEntry},
    state::AppState,
    utils::jwt::Claims,
};

/// Title shown for attempts whose test has since been deleted.
const UNKNOWN_TEST_TITLE: &str = "Unknown Test";

/// Lists the caller's attempts, newest first, with test titles.
pub async fn list_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let attempts = state
        .attempts
        .fetch_user_attempts(claims.user_id()?)
        .await?;

    let mut titles: HashMap<i64, String> = HashMap::new();
    let mut history = Vec::with_capacity(attempts.len());
    for attempt in attempts {
        if !titles.contains_key(&attempt.test_id) {
            let title = state
                .content
                .fetch_test(attempt.test_id)
                .await?
                .map(|t| t.title)
                .unwrap_or_else(|| UNKNOWN_TEST_TITLE.to_string());
            titles.insert(attempt.test_id, title);
        }

        history.push(HistoryEntry {
            id: attempt.id,
            test_id: attempt.test_id,
            test_title: titles[&attempt.test_id].clone(),
            score: attempt.score,
            answered_count: attempt.answers.len(),
            created_at: attempt.created_at,
        });
    }

    Ok(Json(history))
}

/// Re-scores a stored attempt against its test.
/// Owner or admin only.
pub async fn get_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = owned_attempt(&state, &claims, id).await?;

    let test = state
        .content
        .fetch_test(attempt.test_id)
        .await?
        .ok_or(AppError::NotFound(format!(
            "Test {} no longer exists",
            attempt.test_id
        )))?;

    let result = evaluate(&test, &attempt.answers);
    if result.summary.total_score != attempt.score {
        tracing::warn!(
            "Attempt {} stored score {} but re-scores to {}",
            attempt.id,
            attempt.score,
            result.summary.total_score
        );
    }

    Ok(Json(AttemptResult {
        attempt_id: attempt.id,
        test_title: test.title,
        stored_score: attempt.score,
        created_at: attempt.created_at,
        result,
    }))
}

/// Deletes an attempt.
/// Owner or admin only.
pub async fn delete_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    owned_attempt(&state, &claims, id).await?;

    if !state.attempts.delete_attempt(id).await? {
        return Err(AppError::NotFound(format!("Attempt {} not found", id)));
    }

    tracing::info!("Attempt {} deleted by user {}", id, claims.sub);
    Ok(StatusCode::NO_CONTENT)
}

async fn owned_attempt(state: &AppState, claims: &Claims, id: i64) -> Result<Attempt, AppError> {
    let attempt = state
        .attempts
        .fetch_attempt(id)
        .await?
        .ok_or(AppError::NotFound(format!("Attempt {} not found", id)))?;

    if attempt.user_id != claims.user_id()? && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "You can only access your own attempts".to_string(),
        ));
    }
    Ok(attempt)
}
