// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use sqlx::PgPool;

use crate::{
    config::Config,
    exam::{controller::SessionDeps, registry::SessionRegistry},
    store::{
        AttemptStore, ContentStore, SnapshotStore, UserStore, memory::MemoryStore,
        postgres::PgStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub content: Arc<dyn ContentStore>,
    pub attempts: Arc<dyn AttemptStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub users: Arc<dyn UserStore>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn postgres(pool: PgPool, config: Config) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            config,
            content: store.clone(),
            attempts: store.clone(),
            snapshots: store.clone(),
            users: store,
            sessions: SessionRegistry::new(),
        }
    }

    /// All stores in memory. Returns the store too so callers can seed or
    /// inspect it.
    pub fn in_memory(config: Config) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = Self {
            config,
            content: store.clone(),
            attempts: store.clone(),
            snapshots: store.clone(),
            users: store.clone(),
            sessions: SessionRegistry::new(),
        };
        (state, store)
    }

    pub fn session_deps(&self) -> SessionDeps {
        SessionDeps::new(self.attempts.clone(), self.snapshots.clone())
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
