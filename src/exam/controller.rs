// src/exam/controller.rs

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex as StdMutex, Weak},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{Mutex, oneshot, watch},
    time::{Instant, interval_at},
};

use crate::{
    config::COUNTDOWN_PERIOD,
    exam::{
        answers::{AnswerSet, QuestionId},
        scoring::{ResultView, ScoreSummary},
        session::{
            ExamSession, SessionPhase, SessionSnapshot, SubmitReason, SubmitRejection,
            TickOutcome, Transition,
        },
    },
    models::{
        attempt::{Attempt, NewAttempt},
        test::{PublicQuestion, Test},
    },
    store::{AttemptStore, SnapshotKey, SnapshotStore, StoreError},
};

/// Stores and timing a controller needs. Cheap to clone.
#[derive(Clone)]
pub struct SessionDeps {
    pub attempts: Arc<dyn AttemptStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub period: Duration,
}

impl SessionDeps {
    pub fn new(attempts: Arc<dyn AttemptStore>, snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            attempts,
            snapshots,
            period: COUNTDOWN_PERIOD,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("a submission is already in progress")]
    InProgress,

    #[error("this attempt has already been submitted")]
    AlreadySubmitted,

    #[error("session cannot be submitted while {0:?}")]
    NotReady(SessionPhase),

    #[error("failed to save attempt: {0}")]
    Persistence(#[source] StoreError),
}

impl From<SubmitRejection> for SubmitError {
    fn from(rejection: SubmitRejection) -> Self {
        match rejection {
            SubmitRejection::InProgress => SubmitError::InProgress,
            SubmitRejection::AlreadySubmitted => SubmitError::AlreadySubmitted,
            SubmitRejection::NotStarted(phase) => SubmitError::NotReady(phase),
        }
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub reason: SubmitReason,
    pub attempt: Attempt,
    pub result: ResultView,
}

/// What a client needs to render the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub test_id: i64,
    pub phase: SessionPhase,
    pub question_count: usize,
    pub current_index: usize,
    pub current_question: Option<PublicQuestion>,
    pub remaining_secs: u32,
    pub answers: AnswerSet,
    pub answered_count: usize,
    pub marked_for_review: BTreeSet<QuestionId>,
    pub visited: BTreeSet<usize>,
    pub attempt_id: Option<i64>,
    pub score: Option<ScoreSummary>,
}

/// Details shown when a stored session can be resumed.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeOffer {
    pub test_id: i64,
    pub saved_at: DateTime<Utc>,
    pub remaining_secs: u32,
    pub answered_count: usize,
    pub current_index: usize,
    /// The snapshot was written by the same client that is now asking.
    /// Only affects how the choice is worded.
    pub same_client: bool,
}

/// Result of [`ExamController::open`].
pub enum Opening {
    Fresh(ExamController),
    ResumeAvailable(PendingResume),
}

/// A valid snapshot waiting for the caller to resume or discard it.
pub struct PendingResume {
    session: ExamSession,
    offer: ResumeOffer,
    client_id: Option<String>,
    deps: SessionDeps,
}

impl PendingResume {
    pub fn offer(&self) -> &ResumeOffer {
        &self.offer
    }

    /// Continues from the snapshot, including its remaining time.
    pub async fn resume(self) -> ExamController {
        tracing::info!(
            "Resuming exam session for user {} on test {} with {}s left",
            self.session.user_id(),
            self.offer.test_id,
            self.offer.remaining_secs
        );
        ExamController::start(self.session, self.client_id, self.deps).await
    }

    /// Deletes the snapshot and starts over.
    pub async fn discard(self) -> ExamController {
        let key = SnapshotKey::new(self.session.user_id(), self.offer.test_id);
        if let Err(e) = self.deps.snapshots.delete(key).await {
            tracing::warn!("Failed to delete snapshot {}: {}", key, e);
        }
        let fresh = ExamSession::begin(self.session.user_id(), self.session.test().clone());
        ExamController::start(fresh, self.client_id, self.deps).await
    }
}

/// Drives one `ExamSession`: countdown, snapshots and submission.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct ExamController {
    inner: Arc<Inner>,
}

struct Inner {
    key: SnapshotKey,
    test: Arc<Test>,
    client_id: Option<String>,
    deps: SessionDeps,
    session: Mutex<ExamSession>,
    countdown: StdMutex<Option<Countdown>>,
    receipt: StdMutex<Option<SubmissionReceipt>>,
    phase_tx: watch::Sender<SessionPhase>,
}

/// Handle to the running countdown task. Dropping it stops the task at its
/// next wake-up without interrupting work it is already doing.
struct Countdown {
    _stop: oneshot::Sender<()>,
}

impl ExamController {
    /// Opens a session for `user_id` on `test`.
    ///
    /// A stored snapshot is never applied automatically: if one is found and
    /// valid the caller gets a [`PendingResume`]. Unreadable or mismatched
    /// snapshots are logged, deleted and ignored.
    pub async fn open(
        user_id: i64,
        test: Arc<Test>,
        client_id: Option<String>,
        deps: SessionDeps,
    ) -> Opening {
        let key = SnapshotKey::new(user_id, test.id);
        match load_snapshot(&deps, key, user_id, &test).await {
            Some((session, snapshot)) => {
                let offer = ResumeOffer {
                    test_id: test.id,
                    saved_at: snapshot.saved_at,
                    remaining_secs: session.remaining_secs(),
                    answered_count: session.answers().len(),
                    current_index: session.state().current_index,
                    same_client: client_id.is_some() && snapshot.client_id == client_id,
                };
                Opening::ResumeAvailable(PendingResume {
                    session,
                    offer,
                    client_id,
                    deps,
                })
            }
            None => {
                tracing::info!(
                    "Starting exam session for user {} on test {}",
                    user_id,
                    test.id
                );
                let session = ExamSession::begin(user_id, test);
                Opening::Fresh(Self::start(session, client_id, deps).await)
            }
        }
    }

    async fn start(session: ExamSession, client_id: Option<String>, deps: SessionDeps) -> Self {
        let phase = session.phase();
        let inner = Arc::new(Inner {
            key: SnapshotKey::new(session.user_id(), session.test().id),
            test: session.test().clone(),
            client_id,
            deps,
            session: Mutex::new(session),
            countdown: StdMutex::new(None),
            receipt: StdMutex::new(None),
            phase_tx: watch::Sender::new(phase),
        });
        let controller = Self { inner };

        {
            let session = controller.inner.session.lock().await;
            controller.persist(&session).await;
        }

        match phase {
            SessionPhase::Running => controller.start_countdown(),
            SessionPhase::Expired => {
                // Time ran out while nobody was connected.
                let expired = controller.clone();
                tokio::spawn(async move {
                    expired.submit_on_expiry().await;
                });
            }
            _ => {}
        }
        controller
    }

    pub fn key(&self) -> SnapshotKey {
        self.inner.key
    }

    pub fn test(&self) -> &Arc<Test> {
        &self.inner.test
    }

    /// Watches phase changes, e.g. to learn when an expiry submission finished.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase_tx.borrow()
    }

    pub fn receipt(&self) -> Option<SubmissionReceipt> {
        lock(&self.inner.receipt).clone()
    }

    pub async fn view(&self) -> SessionView {
        let session = self.inner.session.lock().await;
        let state = session.state();
        let receipt = self.receipt();
        SessionView {
            test_id: self.inner.test.id,
            phase: session.phase(),
            question_count: self.inner.test.question_count(),
            current_index: state.current_index,
            current_question: self
                .inner
                .test
                .questions
                .get(state.current_index)
                .map(PublicQuestion::from),
            remaining_secs: state.remaining_secs,
            answers: state.answers.clone(),
            answered_count: state.answers.len(),
            marked_for_review: state.marked_for_review.clone(),
            visited: state.visited.clone(),
            attempt_id: receipt.as_ref().map(|r| r.attempt.id),
            score: receipt.map(|r| r.result.summary),
        }
    }

    pub async fn select_answer(&self, question_id: QuestionId, option_key: &str) -> Transition {
        self.mutate(|s| s.select_answer(question_id, option_key))
            .await
    }

    pub async fn clear_answer(&self, question_id: QuestionId) -> Transition {
        self.mutate(|s| s.clear_answer(question_id)).await
    }

    pub async fn toggle_review(&self, question_id: QuestionId) -> Transition {
        self.mutate(|s| s.toggle_review(question_id)).await
    }

    pub async fn go_to(&self, index: usize) -> Transition {
        self.mutate(|s| s.go_to(index)).await
    }

    pub async fn next(&self) -> Transition {
        self.mutate(ExamSession::next).await
    }

    pub async fn previous(&self) -> Transition {
        self.mutate(ExamSession::previous).await
    }

    /// Scores and saves the attempt.
    ///
    /// Rejected while another submission is in flight or after success. When
    /// saving fails the session returns to `Running` (countdown restarted) or
    /// stays `Expired`, with its answers intact, so the call can be retried.
    pub async fn submit(&self, reason: SubmitReason) -> Result<SubmissionReceipt, SubmitError> {
        let submission = {
            let mut session = self.inner.session.lock().await;
            let submission = session.start_submission(reason)?;
            self.publish(&session);
            submission
        };
        let reason = submission.reason;
        self.stop_countdown();

        let saved = self
            .inner
            .deps
            .attempts
            .save_attempt(NewAttempt {
                user_id: self.inner.key.user_id,
                test_id: self.inner.key.test_id,
                answers: submission.answers,
                score: submission.result.summary.total_score,
            })
            .await;

        let mut session = self.inner.session.lock().await;
        match saved {
            Ok(attempt) => {
                if let Err(e) = self.inner.deps.snapshots.delete(self.inner.key).await {
                    tracing::warn!("Failed to delete snapshot {}: {}", self.inner.key, e);
                }
                session.finish();
                let receipt = SubmissionReceipt {
                    reason,
                    attempt,
                    result: submission.result,
                };
                *lock(&self.inner.receipt) = Some(receipt.clone());
                self.publish(&session);
                tracing::info!(
                    "Attempt {} saved for user {} on test {} ({:?}, score {})",
                    receipt.attempt.id,
                    self.inner.key.user_id,
                    self.inner.key.test_id,
                    reason,
                    receipt.attempt.score
                );
                Ok(receipt)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to save attempt for user {} on test {}: {}",
                    self.inner.key.user_id,
                    self.inner.key.test_id,
                    e
                );
                let phase = session.submission_failed();
                self.persist(&session).await;
                self.publish(&session);
                drop(session);
                if phase == SessionPhase::Running {
                    self.start_countdown();
                }
                Err(SubmitError::Persistence(e))
            }
        }
    }

    /// Stops the countdown. The snapshot is left in place so the attempt can
    /// be resumed later.
    pub fn teardown(&self) {
        self.stop_countdown();
    }

    async fn mutate<F>(&self, apply: F) -> Transition
    where
        F: FnOnce(&mut ExamSession) -> Transition,
    {
        let mut session = self.inner.session.lock().await;
        let transition = apply(&mut session);
        if transition.changed() {
            self.persist(&session).await;
        }
        transition
    }

    /// Best-effort snapshot write; a failure only costs resumability.
    async fn persist(&self, session: &ExamSession) {
        let snapshot = session.snapshot(self.inner.client_id.clone());
        let raw = match snapshot.to_json() {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize snapshot {}: {}", self.inner.key, e);
                return;
            }
        };
        if let Err(e) = self.inner.deps.snapshots.put(self.inner.key, raw).await {
            tracing::warn!("Failed to write snapshot {}: {}", self.inner.key, e);
        }
    }

    fn publish(&self, session: &ExamSession) {
        self.inner.phase_tx.send_replace(session.phase());
    }

    fn start_countdown(&self) {
        let (stop_tx, stop_rx) = oneshot::channel();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(run_countdown(weak, self.inner.deps.period, stop_rx));
        *lock(&self.inner.countdown) = Some(Countdown { _stop: stop_tx });
    }

    fn stop_countdown(&self) {
        lock(&self.inner.countdown).take();
    }

    async fn submit_on_expiry(&self) {
        match self.submit(SubmitReason::Expiry).await {
            Ok(_) => {}
            Err(SubmitError::InProgress | SubmitError::AlreadySubmitted) => {}
            Err(e) => tracing::error!(
                "Automatic submission for {} failed, session stays expired until a retry: {}",
                self.inner.key,
                e
            ),
        }
    }
}

async fn run_countdown(inner: Weak<Inner>, period: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else { break };
        let controller = ExamController { inner };

        let outcome = {
            let mut session = controller.inner.session.lock().await;
            let outcome = session.tick();
            if outcome != TickOutcome::Idle {
                controller.persist(&session).await;
                controller.publish(&session);
            }
            outcome
        };

        match outcome {
            TickOutcome::Running(_) => {}
            TickOutcome::Expired => {
                tracing::info!("Time is up for {}, submitting", controller.inner.key);
                controller.submit_on_expiry().await;
                break;
            }
            TickOutcome::Idle => break,
        }
    }
}

/// Reads and validates the stored snapshot. Anything unusable is discarded.
async fn load_snapshot(
    deps: &SessionDeps,
    key: SnapshotKey,
    user_id: i64,
    test: &Arc<Test>,
) -> Option<(ExamSession, SessionSnapshot)> {
    let raw = match deps.snapshots.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Failed to read snapshot {}: {}", key, e);
            return None;
        }
    };

    let restored = SessionSnapshot::from_json(&raw).and_then(|snapshot| {
        ExamSession::restore(user_id, test.clone(), snapshot.clone())
            .map(|session| (session, snapshot))
    });

    match restored {
        Ok(pair) => Some(pair),
        Err(e) => {
            tracing::warn!("Discarding unusable snapshot {}: {}", key, e);
            if let Err(e) = deps.snapshots.delete(key).await {
                tracing::warn!("Failed to delete snapshot {}: {}", key, e);
            }
            None
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
