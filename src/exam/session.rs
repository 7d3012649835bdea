// src/exam/session.rs

//! The in-progress state of one test attempt.
//!
//! `ExamSession` is synchronous and does no I/O. It owns answer capture,
//! review flags, navigation and the remaining time; the controller in
//! `exam::controller` drives its countdown, persists snapshots and performs the
//! submission.

use std::{collections::BTreeSet, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::SNAPSHOT_VERSION,
    exam::{
        answers::{AnswerSet, QuestionId},
        scoring::{self, ResultView},
    },
    models::test::Test,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Loading,
    Resuming,
    Running,
    Expired,
    Submitting,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitReason {
    Manual,
    Expiry,
}

/// Everything that survives a reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub current_index: usize,
    pub answers: AnswerSet,
    pub marked_for_review: BTreeSet<QuestionId>,
    pub visited: BTreeSet<usize>,
    pub remaining_secs: u32,
    pub submitting: bool,
    pub expired: bool,
}

/// Serialized form kept in the snapshot store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub user_id: i64,
    pub test_id: i64,
    /// Opaque id of the client that wrote the snapshot.
    pub client_id: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub state: SessionState,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(raw).map_err(SnapshotError::Malformed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON for this schema: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("snapshot schema version {found} is not supported")]
    Version { found: u32 },

    #[error("snapshot belongs to user {user_id} / test {test_id}")]
    WrongOwner { user_id: i64, test_id: i64 },

    #[error("snapshot references question {0} which the test does not have")]
    UnknownQuestion(QuestionId),

    #[error("snapshot answer '{key}' is not an option of question {question_id}")]
    UnknownOption { question_id: QuestionId, key: String },

    #[error("snapshot index {0} is outside the test")]
    IndexOutOfRange(usize),

    #[error("snapshot has {found}s remaining but the test only allows {allowed}s")]
    TimeExceedsDuration { found: u32, allowed: u32 },
}

/// Why a mutation did not change anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    NotRunning,
    UnknownQuestion,
    UnknownOption,
    IndexOutOfRange,
}

/// Result of a mutating operation. Rejections are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
    Rejected(RejectReason),
}

impl Transition {
    pub fn changed(self) -> bool {
        matches!(self, Transition::Applied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still running with this many seconds left.
    Running(u32),
    /// Time ran out on this tick; the attempt must now be submitted.
    Expired,
    /// The session is not running; nothing changed.
    Idle,
}

/// Data captured when a submission starts.
#[derive(Debug, Clone)]
pub struct Submission {
    pub reason: SubmitReason,
    pub answers: AnswerSet,
    pub result: ResultView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejection {
    InProgress,
    AlreadySubmitted,
    NotStarted(SessionPhase),
}

#[derive(Debug, Clone)]
pub struct ExamSession {
    user_id: i64,
    test: Arc<Test>,
    phase: SessionPhase,
    state: SessionState,
}

impl ExamSession {
    /// A fresh attempt: first question, nothing answered, full duration.
    pub fn begin(user_id: i64, test: Arc<Test>) -> Self {
        let state = SessionState {
            current_index: 0,
            answers: AnswerSet::new(),
            marked_for_review: BTreeSet::new(),
            visited: BTreeSet::from([0]),
            remaining_secs: test.duration_secs(),
            submitting: false,
            expired: false,
        };
        Self {
            user_id,
            test,
            phase: SessionPhase::Running,
            state,
        }
    }

    /// Rebuilds a session from a snapshot after validating it against `test`.
    ///
    /// A snapshot with no time left comes back `Expired` so it gets submitted.
    pub fn restore(
        user_id: i64,
        test: Arc<Test>,
        snapshot: SessionSnapshot,
    ) -> Result<Self, SnapshotError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: snapshot.version,
            });
        }
        if snapshot.user_id != user_id || snapshot.test_id != test.id {
            return Err(SnapshotError::WrongOwner {
                user_id: snapshot.user_id,
                test_id: snapshot.test_id,
            });
        }

        let mut state = snapshot.state;
        for (question_id, key) in state.answers.iter() {
            let question = test
                .question(question_id)
                .ok_or(SnapshotError::UnknownQuestion(question_id))?;
            if !question.has_option(key) {
                return Err(SnapshotError::UnknownOption {
                    question_id,
                    key: key.to_string(),
                });
            }
        }
        if let Some(unknown) = state
            .marked_for_review
            .iter()
            .find(|id| test.question(**id).is_none())
        {
            return Err(SnapshotError::UnknownQuestion(*unknown));
        }

        let last_index = test.question_count().saturating_sub(1);
        if state.current_index > last_index {
            return Err(SnapshotError::IndexOutOfRange(state.current_index));
        }
        if let Some(bad) = state.visited.iter().find(|i| **i > last_index) {
            return Err(SnapshotError::IndexOutOfRange(*bad));
        }

        let allowed = test.duration_secs();
        if state.remaining_secs > allowed {
            return Err(SnapshotError::TimeExceedsDuration {
                found: state.remaining_secs,
                allowed,
            });
        }

        // A submission that was in flight when the snapshot was written did not finish.
        state.submitting = false;
        state.visited.insert(state.current_index);
        let phase = if state.expired || state.remaining_secs == 0 {
            state.expired = true;
            SessionPhase::Expired
        } else {
            SessionPhase::Running
        };

        Ok(Self {
            user_id,
            test,
            phase,
            state,
        })
    }

    pub fn snapshot(&self, client_id: Option<String>) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            user_id: self.user_id,
            test_id: self.test.id,
            client_id,
            saved_at: Utc::now(),
            state: self.state.clone(),
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn test(&self) -> &Arc<Test> {
        &self.test
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.state.answers
    }

    pub fn remaining_secs(&self) -> u32 {
        self.state.remaining_secs
    }

    pub fn select_answer(&mut self, question_id: QuestionId, option_key: &str) -> Transition {
        if self.phase != SessionPhase::Running {
            return Transition::Rejected(RejectReason::NotRunning);
        }
        let Some(question) = self.test.question(question_id) else {
            return Transition::Rejected(RejectReason::UnknownQuestion);
        };
        if !question.has_option(option_key) {
            return Transition::Rejected(RejectReason::UnknownOption);
        }
        if self.state.answers.select(question_id, option_key) {
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }

    pub fn clear_answer(&mut self, question_id: QuestionId) -> Transition {
        if self.phase != SessionPhase::Running {
            return Transition::Rejected(RejectReason::NotRunning);
        }
        if self.state.answers.clear(question_id) {
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }

    pub fn toggle_review(&mut self, question_id: QuestionId) -> Transition {
        if !self.accepts_navigation() {
            return Transition::Rejected(RejectReason::NotRunning);
        }
        if self.test.question(question_id).is_none() {
            return Transition::Rejected(RejectReason::UnknownQuestion);
        }
        if !self.state.marked_for_review.remove(&question_id) {
            self.state.marked_for_review.insert(question_id);
        }
        Transition::Applied
    }

    /// Moves to `index`. Out-of-range requests leave the index untouched.
    pub fn go_to(&mut self, index: usize) -> Transition {
        if !self.accepts_navigation() {
            return Transition::Rejected(RejectReason::NotRunning);
        }
        if index >= self.test.question_count() {
            return Transition::Rejected(RejectReason::IndexOutOfRange);
        }
        let moved = self.state.current_index != index;
        let first_visit = self.state.visited.insert(index);
        self.state.current_index = index;
        if moved || first_visit {
            Transition::Applied
        } else {
            Transition::Unchanged
        }
    }

    pub fn next(&mut self) -> Transition {
        self.go_to(self.state.current_index + 1)
    }

    pub fn previous(&mut self) -> Transition {
        match self.state.current_index.checked_sub(1) {
            Some(index) => self.go_to(index),
            None => Transition::Rejected(RejectReason::IndexOutOfRange),
        }
    }

    /// One countdown step.
    pub fn tick(&mut self) -> TickOutcome {
        if self.phase != SessionPhase::Running {
            return TickOutcome::Idle;
        }
        if self.state.remaining_secs <= 1 {
            self.state.remaining_secs = 0;
            self.state.expired = true;
            self.phase = SessionPhase::Expired;
            return TickOutcome::Expired;
        }
        self.state.remaining_secs -= 1;
        TickOutcome::Running(self.state.remaining_secs)
    }

    /// Enters `Submitting` and scores the current answers.
    ///
    /// Only one submission may be in flight; answers are frozen until it
    /// either completes or fails. Once time has run out the reason is always
    /// `Expiry`, whoever asks.
    pub fn start_submission(&mut self, reason: SubmitReason) -> Result<Submission, SubmitRejection> {
        let reason = match self.phase {
            SessionPhase::Running => reason,
            SessionPhase::Expired => SubmitReason::Expiry,
            SessionPhase::Submitting => return Err(SubmitRejection::InProgress),
            SessionPhase::Terminated => return Err(SubmitRejection::AlreadySubmitted),
            other => return Err(SubmitRejection::NotStarted(other)),
        };
        // Scored before the phase changes so the session is never left half-submitted.
        let result = scoring::evaluate(&self.test, &self.state.answers);
        self.phase = SessionPhase::Submitting;
        self.state.submitting = true;
        Ok(Submission {
            reason,
            answers: self.state.answers.clone(),
            result,
        })
    }

    /// Returns to a state where submitting can be retried.
    pub fn submission_failed(&mut self) -> SessionPhase {
        if self.phase == SessionPhase::Submitting {
            self.state.submitting = false;
            self.phase = if self.state.expired {
                SessionPhase::Expired
            } else {
                SessionPhase::Running
            };
        }
        self.phase
    }

    pub fn finish(&mut self) {
        self.state.submitting = false;
        self.phase = SessionPhase::Terminated;
    }

    fn accepts_navigation(&self) -> bool {
        matches!(self.phase, SessionPhase::Running | SessionPhase::Expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test::Question;

    fn test_with(count: i64, duration: Option<i32>) -> Arc<Test> {
        let questions = (1..=count)
            .map(|id| Question {
                id,
                prompt: format!("Question {}", id),
                options: ["A", "B", "C"]
                    .iter()
                    .map(|k| (k.to_string(), format!("Option {}", k)))
                    .collect(),
                correct_answer: "A".to_string(),
            })
            .collect();
        Arc::new(Test {
            id: 42,
            title: "Physics".to_string(),
            description: String::new(),
            questions,
            custom_id: None,
            marks_per_question: Some(4),
            negative_marks: Some(1),
            duration,
            section_ids: Vec::new(),
            created_at: None,
        })
    }

    #[test]
    fn begin_initializes_state() {
        let session = ExamSession::begin(7, test_with(3, None));
        assert_eq!(session.phase(), SessionPhase::Running);
        assert_eq!(session.state().current_index, 0);
        assert!(session.answers().is_empty());
        assert_eq!(session.state().visited, BTreeSet::from([0]));
        assert_eq!(session.remaining_secs(), 180);

        let timed = ExamSession::begin(7, test_with(3, Some(10)));
        assert_eq!(timed.remaining_secs(), 600);
    }

    #[test]
    fn select_answer_is_idempotent() {
        let mut session = ExamSession::begin(7, test_with(2, None));
        assert_eq!(session.select_answer(1, "B"), Transition::Applied);
        let after_first = session.answers().clone();
        assert_eq!(session.select_answer(1, "B"), Transition::Unchanged);
        assert_eq!(session.answers(), &after_first);
        assert_eq!(session.select_answer(1, "C"), Transition::Applied);
        assert_eq!(session.answers().get(1), Some("C"));
    }

    #[test]
    fn select_answer_rejects_unknown_ids_and_keys() {
        let mut session = ExamSession::begin(7, test_with(2, None));
        assert_eq!(
            session.select_answer(99, "A"),
            Transition::Rejected(RejectReason::UnknownQuestion)
        );
        assert_eq!(
            session.select_answer(1, "Z"),
            Transition::Rejected(RejectReason::UnknownOption)
        );
        assert!(session.answers().is_empty());
    }

    #[test]
    fn clear_unanswered_is_noop() {
        let mut session = ExamSession::begin(7, test_with(2, None));
        session.select_answer(2, "A");
        let before = session.answers().clone();
        assert_eq!(session.clear_answer(1), Transition::Unchanged);
        assert_eq!(session.answers(), &before);
        assert_eq!(session.clear_answer(2), Transition::Applied);
        assert!(session.answers().is_empty());
    }

    #[test]
    fn review_flags_toggle_independently_of_answers() {
        let mut session = ExamSession::begin(7, test_with(2, None));
        session.toggle_review(2);
        assert!(session.state().marked_for_review.contains(&2));
        assert!(!session.answers().contains(2));
        session.toggle_review(2);
        assert!(session.state().marked_for_review.is_empty());
    }

    #[test]
    fn navigation_stays_in_bounds_and_tracks_visits() {
        let mut session = ExamSession::begin(7, test_with(3, None));
        assert_eq!(
            session.go_to(3),
            Transition::Rejected(RejectReason::IndexOutOfRange)
        );
        assert_eq!(session.state().current_index, 0);
        assert_eq!(
            session.previous(),
            Transition::Rejected(RejectReason::IndexOutOfRange)
        );

        assert_eq!(session.go_to(2), Transition::Applied);
        assert_eq!(session.state().visited, BTreeSet::from([0, 2]));
        assert_eq!(
            session.next(),
            Transition::Rejected(RejectReason::IndexOutOfRange)
        );
        assert_eq!(session.previous(), Transition::Applied);
        assert_eq!(session.state().current_index, 1);
        assert_eq!(session.state().visited, BTreeSet::from([0, 1, 2]));
    }

    #[test]
    fn tick_at_one_second_expires_without_going_negative() {
        let mut session = ExamSession::begin(7, test_with(1, None));
        for _ in 0..59 {
            assert!(matches!(session.tick(), TickOutcome::Running(_)));
        }
        assert_eq!(session.remaining_secs(), 1);
        assert_eq!(session.tick(), TickOutcome::Expired);
        assert_eq!(session.remaining_secs(), 0);
        assert_eq!(session.phase(), SessionPhase::Expired);
        assert_eq!(session.tick(), TickOutcome::Idle);
        assert_eq!(session.remaining_secs(), 0);
    }

    #[test]
    fn answers_are_frozen_after_expiry() {
        let mut session = ExamSession::begin(7, test_with(1, None));
        session.select_answer(1, "A");
        while session.tick() != TickOutcome::Expired {}
        assert_eq!(
            session.select_answer(1, "B"),
            Transition::Rejected(RejectReason::NotRunning)
        );
        assert_eq!(
            session.clear_answer(1),
            Transition::Rejected(RejectReason::NotRunning)
        );
        assert_eq!(session.answers().get(1), Some("A"));
    }

    #[test]
    fn submission_is_single_flight_and_recoverable() {
        let mut session = ExamSession::begin(7, test_with(2, None));
        session.select_answer(1, "A");

        let submission = session.start_submission(SubmitReason::Manual).unwrap();
        assert_eq!(submission.result.summary.total_score, 4);
        assert_eq!(
            session.start_submission(SubmitReason::Manual).unwrap_err(),
            SubmitRejection::InProgress
        );
        assert_eq!(
            session.select_answer(2, "A"),
            Transition::Rejected(RejectReason::NotRunning)
        );

        assert_eq!(session.submission_failed(), SessionPhase::Running);
        assert_eq!(session.answers().get(1), Some("A"));

        session.start_submission(SubmitReason::Manual).unwrap();
        session.finish();
        assert_eq!(
            session.start_submission(SubmitReason::Manual).unwrap_err(),
            SubmitRejection::AlreadySubmitted
        );
    }

    #[test]
    fn retry_after_expiry_keeps_expiry_reason() {
        let mut session = ExamSession::begin(7, test_with(1, None));
        while session.tick() != TickOutcome::Expired {}

        let first = session.start_submission(SubmitReason::Expiry).unwrap();
        assert_eq!(first.reason, SubmitReason::Expiry);
        assert_eq!(session.submission_failed(), SessionPhase::Expired);

        let retry = session.start_submission(SubmitReason::Manual).unwrap();
        assert_eq!(retry.reason, SubmitReason::Expiry);
    }

    #[test]
    fn extreme_marking_values_still_submit() {
        let mut test = (*test_with(3, Some(i32::MAX))).clone();
        test.marks_per_question = Some(i32::MAX);
        test.negative_marks = Some(i32::MAX);
        let mut session = ExamSession::begin(7, Arc::new(test));
        assert_eq!(session.remaining_secs(), 1440 * 60);
        session.select_answer(1, "A");
        session.select_answer(2, "B");

        let submission = session.start_submission(SubmitReason::Manual).unwrap();
        assert_eq!(session.phase(), SessionPhase::Submitting);
        assert_eq!(submission.result.summary.total_possible, 300);
        assert_eq!(submission.result.summary.total_score, 0);
    }

    #[test]
    fn snapshot_round_trip_restores_state() {
        let test = test_with(3, None);
        let mut session = ExamSession::begin(7, test.clone());
        session.select_answer(1, "B");
        session.go_to(1);
        session.toggle_review(3);
        session.tick();

        let snapshot = session.snapshot(Some("tab-1".to_string()));
        let raw = snapshot.to_json().unwrap();
        let restored =
            ExamSession::restore(7, test, SessionSnapshot::from_json(&raw).unwrap()).unwrap();

        assert_eq!(restored.state(), session.state());
        assert_eq!(restored.state().current_index, 1);
        assert_eq!(restored.phase(), SessionPhase::Running);
    }

    #[test]
    fn restore_rejects_mismatched_snapshots() {
        let test = test_with(2, None);
        let session = ExamSession::begin(7, test.clone());

        let wrong_user = ExamSession::restore(8, test.clone(), session.snapshot(None));
        assert!(matches!(wrong_user, Err(SnapshotError::WrongOwner { .. })));

        let mut unknown = session.snapshot(None);
        unknown.state.answers.select(99, "A");
        assert!(matches!(
            ExamSession::restore(7, test.clone(), unknown),
            Err(SnapshotError::UnknownQuestion(99))
        ));

        let mut out_of_range = session.snapshot(None);
        out_of_range.state.current_index = 5;
        assert!(matches!(
            ExamSession::restore(7, test.clone(), out_of_range),
            Err(SnapshotError::IndexOutOfRange(5))
        ));

        let mut too_long = session.snapshot(None);
        too_long.state.remaining_secs = 10_000;
        assert!(matches!(
            ExamSession::restore(7, test.clone(), too_long),
            Err(SnapshotError::TimeExceedsDuration { .. })
        ));

        let mut old = session.snapshot(None);
        old.version = 0;
        assert!(matches!(
            ExamSession::restore(7, test, old),
            Err(SnapshotError::Version { found: 0 })
        ));

        assert!(matches!(
            SessionSnapshot::from_json("{not json"),
            Err(SnapshotError::Malformed(_))
        ));
    }

    #[test]
    fn restore_of_exhausted_snapshot_is_expired() {
        let test = test_with(1, None);
        let mut snapshot = ExamSession::begin(7, test.clone()).snapshot(None);
        snapshot.state.remaining_secs = 0;
        snapshot.state.submitting = true;
        let restored = ExamSession::restore(7, test, snapshot).unwrap();
        assert_eq!(restored.phase(), SessionPhase::Expired);
        assert!(!restored.state().submitting);
    }
}
