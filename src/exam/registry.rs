// src/exam/registry.rs

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    exam::{controller::ExamController, session::SessionPhase},
    store::SnapshotKey,
};

/// Live sessions of this process, one per `(user, test)`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    live: Arc<Mutex<HashMap<SnapshotKey, ExamController>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: SnapshotKey) -> Option<ExamController> {
        self.lock().get(&key).cloned()
    }

    /// Registers `controller`, tearing down whatever held its key before.
    /// Finished sessions of other keys are dropped on the way.
    pub fn insert(&self, controller: ExamController) {
        let mut live = self.lock();
        live.retain(|_, c| c.phase() != SessionPhase::Terminated);
        if let Some(previous) = live.insert(controller.key(), controller) {
            previous.teardown();
        }
    }

    pub fn remove(&self, key: SnapshotKey) -> Option<ExamController> {
        let removed = self.lock().remove(&key);
        if let Some(controller) = &removed {
            controller.teardown();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SnapshotKey, ExamController>> {
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
