//! Revise API Library Crate
//!
//! This library contains all the logic for the revision tutoring web service:
//! application state, database access, REST handlers, WebSocket transport,
//! per-session locking, and routing. The `api` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod locks;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
