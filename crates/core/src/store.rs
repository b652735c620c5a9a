//! Session Persistence Contract
//!
//! The state machine loads a session, mutates it in memory, and saves it back
//! through this narrow interface. Store failures are the one error class that
//! propagates to the caller instead of being degraded into fallback output.

use crate::session::Session;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Key-value persistence for [`Session`] records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads a session by id. `None` means the id is unknown.
    async fn get(&self, session_id: &str) -> Result<Option<Session>>;

    /// Persists the session, replacing any previous record with the same id.
    async fn save(&self, session: &Session) -> Result<()>;
}

/// An in-memory store for tests and local development.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.sessions.lock().await.get(session_id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let mut stored = session.clone();
        // The in-flight user message is transient and must not survive a save.
        stored.user_message = None;
        self.sessions
            .lock()
            .await
            .insert(stored.session_id.clone(), stored);
        Ok(())
    }
}
