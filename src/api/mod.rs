//! HTTP API for the quiz solver.
//!
//! ## Endpoints
//!
//! - `POST /solve` - Start a solve run for a quiz URL
//! - `GET /` - Health check
//! - `GET /health` - Health check

mod auth;
mod routes;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
