//! API request and response types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to start solving a quiz chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveRequest {
    /// Caller's identity (informational; the configured email is submitted)
    pub email: String,

    /// Shared secret
    pub secret: String,

    /// First quiz page
    pub url: String,
}

/// Response after a run was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveAccepted {
    pub message: String,

    /// Identifier of the background run, also attached to its log span
    pub run_id: Uuid,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

/// Error body for rejected requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
