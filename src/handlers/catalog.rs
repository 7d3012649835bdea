// src/handlers/catalog.rs

use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use crate::{error::AppError, models::test::TestListParams, state::AppState};

/// Lists test summaries, newest first. `?section=<id>` narrows to one section.
pub async fn list_tests(
    State(state): State<AppState>,
    Query(params): Query<TestListParams>,
) -> Result<impl IntoResponse, AppError> {
    let tests = state.content.fetch_tests(params.section).await?;
    Ok(Json(tests))
}

/// Returns a test's intro page data. Answer keys are never included.
pub async fn get_test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let test = state
        .content
        .fetch_test(id)
        .await?
        .ok_or(AppError::NotFound(format!("Test {} not found", id)))?;

    Ok(Json(test.intro()))
}

pub async fn list_sections(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let sections = state.content.fetch_sections().await?;
    Ok(Json(sections))
}
