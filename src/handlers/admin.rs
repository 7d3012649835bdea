// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use validator::Validate;

use crate::{
    config::{EXAMPLE_DATA_ID, MAX_DURATION_MINUTES, MAX_MARKS},
    error::AppError,
    models::{
        section::CreateSectionRequest,
        test::{
            CreateTestRequest, ImportDefaults, ImportTestsRequest, ImportedTest, NewTest,
            validate_questions,
        },
    },
    state::AppState,
    utils::text::clean_text,
};

/// Bundled example tests used by `seed_examples`.
const EXAMPLE_TESTS: &str = include_str!("../../data/example_tests.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Success,
    Error,
}

#[derive(Debug, Serialize)]
pub struct ImportLogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Outcome of a bulk import. Items are processed independently.
#[derive(Debug, Default, Serialize)]
pub struct ImportReport {
    pub succeeded: usize,
    pub failed: usize,
    pub log: Vec<ImportLogEntry>,
}

impl ImportReport {
    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => tracing::warn!("Import: {}", message),
            _ => tracing::info!("Import: {}", message),
        }
        self.log.push(ImportLogEntry { level, message });
    }

    fn fail(&mut self, message: String) {
        self.failed += 1;
        self.push(LogLevel::Error, message);
    }
}

/// Creates a single test.
/// Admin only.
pub async fn create_test(
    State(state): State<AppState>,
    Json(payload): Json<CreateTestRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let title = clean_text(&payload.title);
    if title.is_empty() {
        return Err(AppError::BadRequest("Title cannot be empty".to_string()));
    }
    if state.content.find_test_by_title(&title).await?.is_some() {
        return Err(AppError::Conflict(format!(
            "Test \"{}\" already exists",
            title
        )));
    }

    let question_count = payload.questions.len() as i32;
    let test = state
        .content
        .insert_test(NewTest {
            title,
            description: clean_text(&payload.description),
            questions: payload.questions,
            custom_id: payload.custom_id,
            marks_per_question: payload
                .marks_per_question
                .unwrap_or(crate::config::DEFAULT_MARKS_PER_QUESTION),
            negative_marks: payload
                .negative_marks
                .unwrap_or(crate::config::DEFAULT_NEGATIVE_MARKS),
            duration: payload.duration.unwrap_or(question_count),
        })
        .await?;

    if !payload.section_ids.is_empty() {
        state
            .content
            .assign_sections(test.id, &payload.section_ids)
            .await?;
    }

    tracing::info!("Test {} \"{}\" created", test.id, test.title);
    let test = state.content.fetch_test(test.id).await?.unwrap_or(test);
    Ok((StatusCode::CREATED, Json(test.summary())))
}

/// Imports many tests at once, filling gaps from `defaults`.
/// Admin only.
///
/// Entries without a title or questions, with invalid questions, or whose
/// title already exists are skipped and counted as failed.
pub async fn import_tests(
    State(state): State<AppState>,
    Json(payload): Json<ImportTestsRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let report = run_import(
        &state,
        payload.tests,
        &payload.defaults,
        payload.custom_id,
        &payload.section_ids,
    )
    .await?;
    Ok(Json(report))
}

/// Imports the bundled example tests tagged with `example-data`.
/// Admin only.
pub async fn seed_examples(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let tests: Vec<serde_json::Value> = serde_json::from_str(EXAMPLE_TESTS)
        .map_err(|e| AppError::InternalServerError(format!("Bundled examples: {}", e)))?;

    let report = run_import(
        &state,
        tests,
        &ImportDefaults::default(),
        Some(EXAMPLE_DATA_ID.to_string()),
        &[],
    )
    .await?;
    Ok(Json(report))
}

/// Deletes a test. Existing attempts keep their test id.
/// Admin only.
pub async fn delete_test(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if !state.content.delete_test(id).await? {
        return Err(AppError::NotFound(format!("Test {} not found", id)));
    }

    tracing::info!("Test {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

/// Creates a section.
/// Admin only.
pub async fn create_section(
    State(state): State<AppState>,
    Json(payload): Json<CreateSectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let name = clean_text(&payload.name);
    if name.is_empty() {
        return Err(AppError::BadRequest("Section name cannot be empty".to_string()));
    }

    let section = state.content.create_section(&name).await?;
    tracing::info!("Section {} \"{}\" created", section.id, section.name);
    Ok((StatusCode::CREATED, Json(section)))
}

/// Name of the first numeric field above its allowed maximum.
fn out_of_range_field(
    marks_per_question: Option<i32>,
    negative_marks: Option<i32>,
    duration: Option<i32>,
) -> Option<&'static str> {
    if marks_per_question.is_some_and(|m| m > MAX_MARKS) {
        Some("marks_per_question")
    } else if negative_marks.is_some_and(|m| m > MAX_MARKS) {
        Some("negative_marks")
    } else if duration.is_some_and(|d| d > MAX_DURATION_MINUTES) {
        Some("duration")
    } else {
        None
    }
}

async fn run_import(
    state: &AppState,
    tests: Vec<serde_json::Value>,
    defaults: &ImportDefaults,
    custom_id: Option<String>,
    section_ids: &[i64],
) -> Result<ImportReport, AppError> {
    let mut report = ImportReport::default();
    report.push(
        LogLevel::Info,
        format!("Importing {} test(s)", tests.len()),
    );

    for (position, raw) in tests.into_iter().enumerate() {
        let item: ImportedTest = match serde_json::from_value(raw) {
            Ok(item) => item,
            Err(e) => {
                report.fail(format!("Item {}: unreadable ({})", position + 1, e));
                continue;
            }
        };

        let (Some(title), Some(questions)) = (item.title, item.questions) else {
            report.fail(format!(
                "Item {}: skipped, missing title or questions",
                position + 1
            ));
            continue;
        };

        let title = clean_text(&title);
        if title.is_empty() {
            report.fail(format!("Item {}: skipped, empty title", position + 1));
            continue;
        }
        if let Err(e) = validate_questions(&questions) {
            report.fail(format!("\"{}\": invalid questions ({})", title, e.code));
            continue;
        }
        if let Some(field) =
            out_of_range_field(item.marks_per_question, item.negative_marks, item.duration)
        {
            report.fail(format!("\"{}\": skipped, {} out of range", title, field));
            continue;
        }
        if state.content.find_test_by_title(&title).await?.is_some() {
            report.fail(format!("\"{}\": skipped, already exists", title));
            continue;
        }

        let description = item
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| defaults.description.clone());

        let new_test = NewTest {
            title: title.clone(),
            description: clean_text(&description),
            questions,
            custom_id: custom_id.clone(),
            marks_per_question: item
                .marks_per_question
                .filter(|m| *m > 0)
                .unwrap_or(defaults.marks_per_question),
            negative_marks: item
                .negative_marks
                .filter(|m| *m >= 0)
                .unwrap_or(defaults.negative_marks),
            duration: item
                .duration
                .filter(|d| *d > 0)
                .unwrap_or(defaults.duration),
        };

        let test = match state.content.insert_test(new_test).await {
            Ok(test) => test,
            Err(e) => {
                report.fail(format!("\"{}\": insert failed ({})", title, e));
                continue;
            }
        };

        if section_ids.is_empty() {
            report.push(LogLevel::Success, format!("\"{}\": imported", title));
        } else if let Err(e) = state.content.assign_sections(test.id, section_ids).await {
            report.push(
                LogLevel::Error,
                format!("\"{}\": imported, but section assignment failed ({})", title, e),
            );
        } else {
            report.push(
                LogLevel::Success,
                format!("\"{}\": imported with sections", title),
            );
        }
        report.succeeded += 1;
    }

    report.push(
        LogLevel::Info,
        format!(
            "Import finished: {} succeeded, {} failed or skipped",
            report.succeeded, report.failed
        ),
    );
    Ok(report)
}
