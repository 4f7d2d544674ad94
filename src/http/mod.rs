//! HTTP API server for external control
//!
//! This module provides a REST API for driving voice sessions:
//! - POST /voice/sessions - Create a session and connect it
//! - POST /voice/sessions/:id/connect - Reconnect after the socket closed
//! - POST /voice/sessions/:id/start - Start voice mode
//! - POST /voice/sessions/:id/stop - Stop voice mode (socket stays open)
//! - DELETE /voice/sessions/:id - Disconnect and dispose
//! - GET /voice/sessions/:id/status - Query session statistics
//! - GET /voice/sessions/:id/messages - Get the conversation so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{CreateSessionRequest, SessionResponse};
pub use routes::create_router;
pub use state::AppState;
