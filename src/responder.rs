//! Responder capability
//!
//! A responder answers one utterance given the dialogue so far and hands
//! back the updated dialogue. It never writes to the session store.

pub mod banking;
mod llm_responder;
mod registry;

pub use llm_responder::{LlmResponder, PromptContext};
pub use registry::{RegistryError, ResponderDescriptor, ResponderFactory, ResponderRegistry};

use crate::llm::LlmError;
use crate::session::Thread;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Complete answer from a responder
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub dialogue: Thread,
}

/// Item of a streaming answer
#[derive(Debug, Clone)]
pub enum ReplyEvent {
    /// Next piece of answer text
    Delta(String),
    /// Answer finished; carries the updated dialogue
    Done(Thread),
}

/// Lazy, finite, non-restartable answer stream
pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<ReplyEvent, ResponderError>> + Send>>;

#[derive(Debug, Error)]
pub enum ResponderError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait Responder: Send + Sync {
    fn name(&self) -> &str;

    /// One-line summary of the domain this responder covers
    fn description(&self) -> &str;

    /// Answer `utterance` in one piece
    async fn handle(&self, utterance: &str, dialogue: Thread) -> Result<Reply, ResponderError>;

    /// Answer `utterance` incrementally. `None` when streaming is unsupported.
    fn handle_stream(&self, _utterance: &str, _dialogue: Thread) -> Option<ReplyStream> {
        None
    }
}

#[async_trait]
impl<T: Responder + ?Sized> Responder for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> &str {
        (**self).description()
    }

    async fn handle(&self, utterance: &str, dialogue: Thread) -> Result<Reply, ResponderError> {
        (**self).handle(utterance, dialogue).await
    }

    fn handle_stream(&self, utterance: &str, dialogue: Thread) -> Option<ReplyStream> {
        (**self).handle_stream(utterance, dialogue)
    }
}
