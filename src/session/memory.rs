//! In-process session store

use super::{SessionId, SessionState, SessionStore, StateBlob, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

#[derive(Default)]
struct Lanes {
    dialogue: HashMap<SessionId, StateBlob>,
    routing: HashMap<SessionId, StateBlob>,
}

/// Session store backed by two in-memory maps.
///
/// Nothing is evicted; expiry belongs to whoever replaces this backend.
#[derive(Default)]
pub struct InMemorySessionStore {
    lanes: RwLock<Lanes>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions with a dialogue lane
    pub fn len(&self) -> usize {
        self.lanes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dialogue
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write only the dialogue lane, leaving the session corrupt
    #[cfg(test)]
    pub(crate) fn insert_dialogue_only(&self, id: &SessionId, dialogue: StateBlob) {
        self.lanes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .dialogue
            .insert(id.clone(), dialogue);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &SessionId) -> Option<SessionState> {
        let lanes = self.lanes.read().unwrap_or_else(PoisonError::into_inner);
        match (lanes.dialogue.get(id), lanes.routing.get(id)) {
            (Some(dialogue), Some(routing)) => Some(SessionState {
                dialogue: dialogue.clone(),
                routing: routing.clone(),
            }),
            (None, None) => None,
            (dialogue, routing) => {
                tracing::warn!(
                    session_id = %id,
                    has_dialogue = dialogue.is_some(),
                    has_routing = routing.is_some(),
                    "Session has only one state lane; treating as not found"
                );
                None
            }
        }
    }

    async fn put(&self, id: &SessionId, state: SessionState) -> Result<(), StoreError> {
        let mut lanes = self.lanes.write().unwrap_or_else(PoisonError::into_inner);
        lanes.dialogue.insert(id.clone(), state.dialogue);
        lanes.routing.insert(id.clone(), state.routing);
        Ok(())
    }
}
