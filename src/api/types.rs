//! API request and response types

use crate::orchestrator::ErrorKind;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};

/// One customer utterance
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Omit to start a new session
    #[serde(default)]
    pub session_id: Option<SessionId>,
}

/// Answer to a one-shot turn. Failed turns carry `error` and a
/// customer-safe `response`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

#[derive(Debug, Serialize)]
pub struct ResponderInfo {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct RespondersResponse {
    pub responders: Vec<ResponderInfo>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
