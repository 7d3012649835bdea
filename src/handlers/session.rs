// src/handlers/session.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::AppError,
    exam::{
        answers::QuestionId,
        controller::{ExamController, Opening, ResumeOffer, SessionView},
        session::{RejectReason, SessionPhase, SubmitReason, Transition},
    },
    state::AppState,
    store::SnapshotKey,
    utils::jwt::Claims,
};

/// Optional header identifying the browser tab or device driving the session.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Response of `begin`, `resume` and `discard`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BeginResponse {
    /// A new session was started.
    Started { view: SessionView },
    /// A session for this test is already live in this process.
    Active { view: SessionView },
    /// The saved session was restored.
    Resumed { view: SessionView },
    /// A saved session exists; call `resume` or `discard`.
    ResumeAvailable { offer: ResumeOffer },
}

/// Response of every state-changing session call.
#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    pub view: SessionView,
}

#[derive(Debug, Deserialize)]
pub struct SelectAnswerRequest {
    pub option: String,
}

#[derive(Debug, Deserialize)]
pub struct GoToRequest {
    pub index: usize,
}

/// Opens a session for the caller, or reports that a saved one can be resumed.
pub async fn begin(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let key = SnapshotKey::new(claims.user_id()?, test_id);
    if let Some(controller) = live(&state, key) {
        return Ok(Json(BeginResponse::Active {
            view: controller.view().await,
        }));
    }

    let response = match open(&state, key, &headers).await? {
        Opening::Fresh(controller) => {
            let view = controller.view().await;
            state.sessions.insert(controller);
            BeginResponse::Started { view }
        }
        Opening::ResumeAvailable(pending) => BeginResponse::ResumeAvailable {
            offer: pending.offer().clone(),
        },
    };
    Ok(Json(response))
}

/// Continues the saved session. Starts a new one if the snapshot is gone.
pub async fn resume(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let key = SnapshotKey::new(claims.user_id()?, test_id);
    if let Some(controller) = live(&state, key) {
        return Ok(Json(BeginResponse::Active {
            view: controller.view().await,
        }));
    }

    let (controller, resumed) = match open(&state, key, &headers).await? {
        Opening::Fresh(controller) => (controller, false),
        Opening::ResumeAvailable(pending) => (pending.resume().await, true),
    };
    let view = controller.view().await;
    state.sessions.insert(controller);

    Ok(Json(if resumed {
        BeginResponse::Resumed { view }
    } else {
        BeginResponse::Started { view }
    }))
}

/// Throws away any saved or live session for this test and starts over.
pub async fn discard(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let key = SnapshotKey::new(claims.user_id()?, test_id);
    if state
        .sessions
        .get(key)
        .is_some_and(|c| c.phase() == SessionPhase::Submitting)
    {
        return Err(AppError::Conflict(
            "a submission is already in progress".to_string(),
        ));
    }
    state.sessions.remove(key);

    let controller = match open(&state, key, &headers).await? {
        Opening::Fresh(controller) => controller,
        Opening::ResumeAvailable(pending) => pending.discard().await,
    };
    tracing::info!("User {} started test {} over", key.user_id, key.test_id);

    let view = controller.view().await;
    state.sessions.insert(controller);
    Ok(Json(BeginResponse::Started { view }))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    Ok(Json(controller.view().await))
}

pub async fn select_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((test_id, question_id)): Path<(i64, QuestionId)>,
    Json(payload): Json<SelectAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let transition = controller
        .select_answer(question_id, payload.option.trim())
        .await;
    Ok(Json(respond(&controller, transition).await))
}

pub async fn clear_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((test_id, question_id)): Path<(i64, QuestionId)>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let transition = controller.clear_answer(question_id).await;
    Ok(Json(respond(&controller, transition).await))
}

pub async fn toggle_review(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((test_id, question_id)): Path<(i64, QuestionId)>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let transition = controller.toggle_review(question_id).await;
    Ok(Json(respond(&controller, transition).await))
}

pub async fn go_to(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
    Json(payload): Json<GoToRequest>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let transition = controller.go_to(payload.index).await;
    Ok(Json(respond(&controller, transition).await))
}

pub async fn next(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let transition = controller.next().await;
    Ok(Json(respond(&controller, transition).await))
}

pub async fn previous(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let transition = controller.previous().await;
    Ok(Json(respond(&controller, transition).await))
}

/// Scores and saves the attempt.
///
/// A 503 means nothing was saved and the session is still live; the client
/// may retry.
pub async fn submit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let controller = require(&state, &claims, test_id)?;
    let receipt = controller.submit(SubmitReason::Manual).await?;
    Ok(Json(receipt))
}

fn live(state: &AppState, key: SnapshotKey) -> Option<ExamController> {
    state
        .sessions
        .get(key)
        .filter(|c| c.phase() != SessionPhase::Terminated)
}

fn require(state: &AppState, claims: &Claims, test_id: i64) -> Result<ExamController, AppError> {
    let key = SnapshotKey::new(claims.user_id()?, test_id);
    state
        .sessions
        .get(key)
        .ok_or(AppError::NotFound(format!(
            "No session for test {}; call begin first",
            test_id
        )))
}

async fn open(
    state: &AppState,
    key: SnapshotKey,
    headers: &HeaderMap,
) -> Result<Opening, AppError> {
    let test = state
        .content
        .fetch_test(key.test_id)
        .await?
        .ok_or(AppError::NotFound(format!("Test {} not found", key.test_id)))?;

    let client_id = headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Ok(ExamController::open(key.user_id, Arc::new(test), client_id, state.session_deps()).await)
}

async fn respond(controller: &ExamController, transition: Transition) -> TransitionResponse {
    let reason = match transition {
        Transition::Rejected(reason) => Some(reason),
        Transition::Applied | Transition::Unchanged => None,
    };
    TransitionResponse {
        applied: transition == Transition::Applied,
        reason,
        view: controller.view().await,
    }
}
