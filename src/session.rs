//! Session state store
//!
//! Each session holds two serialized lanes: the full dialogue and the
//! reduced routing history. Both lanes exist together or not at all.

mod memory;
mod thread;

pub use memory::InMemorySessionStore;
pub use thread::{Thread, ThreadMessage};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Mint a fresh identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Serialized lane contents. The store never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBlob(String);

impl StateBlob {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Both lanes of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub dialogue: StateBlob,
    pub routing: StateBlob,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to encode session state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Session backend unavailable: {0}")]
    Backend(String),
}

/// Storage for session lanes.
///
/// `put` overwrites unconditionally. Two turns driving the same session
/// concurrently race and the last writer wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Look up both lanes. A session with only one lane present is reported
    /// as absent.
    async fn get(&self, id: &SessionId) -> Option<SessionState>;

    /// Write both lanes
    async fn put(&self, id: &SessionId, state: SessionState) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: SessionStore + ?Sized> SessionStore for Arc<T> {
    async fn get(&self, id: &SessionId) -> Option<SessionState> {
        (**self).get(id).await
    }

    async fn put(&self, id: &SessionId, state: SessionState) -> Result<(), StoreError> {
        (**self).put(id, state).await
    }
}
