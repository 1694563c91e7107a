//! Turn failure taxonomy

use super::TurnPhase;
use crate::llm::LlmError;
use crate::responder::ResponderError;
use crate::session::{SessionId, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a failed turn, safe to show to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionNotFound,
    RoutingFailure,
    ResponderFailure,
    StreamingUnsupported,
    MidStreamFailure,
    PersistFailure,
}

impl ErrorKind {
    /// Message returned to the customer in place of an answer
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorKind::SessionNotFound => {
                "I couldn't find this conversation. Please start a new conversation and try again."
            }
            ErrorKind::RoutingFailure => {
                "I apologize, but I couldn't work out who should handle your request. Please try again."
            }
            ErrorKind::ResponderFailure => {
                "I apologize, but I encountered an error while processing your request. Please try again."
            }
            ErrorKind::StreamingUnsupported => {
                "Streaming is not supported by this agent. Please disable streaming and try again."
            }
            ErrorKind::MidStreamFailure => {
                "The answer was interrupted before it was complete. Please try again."
            }
            ErrorKind::PersistFailure => {
                "Your answer could not be saved to this conversation. Please try again."
            }
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::SessionNotFound => "session_not_found",
            ErrorKind::RoutingFailure => "routing_failure",
            ErrorKind::ResponderFailure => "responder_failure",
            ErrorKind::StreamingUnsupported => "streaming_unsupported",
            ErrorKind::MidStreamFailure => "mid_stream_failure",
            ErrorKind::PersistFailure => "persist_failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    /// Stored lanes exist but cannot be decoded
    #[error("Session {session_id} holds unreadable state: {source}")]
    SessionCorrupted {
        session_id: SessionId,
        source: serde_json::Error,
    },

    #[error("Routing failed: {0}")]
    Routing(#[source] LlmError),

    #[error("Responder {responder} failed: {source}")]
    Responder {
        responder: String,
        source: ResponderError,
    },

    #[error("Responder {0} cannot stream")]
    StreamingUnsupported(String),

    #[error("Responder {responder} stream broke after {delivered} chunks: {source}")]
    MidStream {
        responder: String,
        delivered: usize,
        source: ResponderError,
    },

    #[error("Failed to persist session: {0}")]
    Persist(#[from] StoreError),
}

impl TurnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TurnError::SessionNotFound(_) | TurnError::SessionCorrupted { .. } => {
                ErrorKind::SessionNotFound
            }
            TurnError::Routing(_) => ErrorKind::RoutingFailure,
            TurnError::Responder { .. } => ErrorKind::ResponderFailure,
            TurnError::StreamingUnsupported(_) => ErrorKind::StreamingUnsupported,
            TurnError::MidStream { .. } => ErrorKind::MidStreamFailure,
            TurnError::Persist(_) => ErrorKind::PersistFailure,
        }
    }
}

/// A turn that ended in the error state.
///
/// Always names a session so the caller can retry on it.
#[derive(Debug, Error)]
#[error("Turn on session {session_id} failed while {phase}: {error}")]
pub struct TurnFailure {
    pub session_id: SessionId,
    pub phase: TurnPhase,
    #[source]
    pub error: TurnError,
}

impl TurnFailure {
    pub(crate) fn new(session_id: SessionId, phase: TurnPhase, error: TurnError) -> Self {
        match error.kind() {
            ErrorKind::SessionNotFound => {
                tracing::warn!(session_id = %session_id, %phase, error = %error, "Turn failed");
            }
            _ => {
                tracing::error!(session_id = %session_id, %phase, error = %error, "Turn failed");
            }
        }
        Self {
            session_id,
            phase,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}
