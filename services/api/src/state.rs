//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the state machine, the database handle, the
//! per-session lock registry, and configuration.

use crate::config::Config;
use crate::db::Db;
use crate::locks::SessionLocks;
use revise_core::StateMachine;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<StateMachine>,
    pub db: Arc<Db>,
    pub locks: SessionLocks,
    pub config: Arc<Config>,
}
