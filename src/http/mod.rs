//! HTTP API server for external control
//!
//! This module provides a REST API for driving voice sessions:
//! - POST /sessions - Create and connect a session
//! - POST /sessions/:id/text - Send a user text turn
//! - POST /sessions/:id/disconnect - Disconnect and remove a session
//! - GET /sessions/:id/status - Query status, speaking flag and stats
//! - GET /sessions/:id/transcript - Get accumulated transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, SessionFactory};
