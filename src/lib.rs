//! Triage orchestrator
//!
//! Routes each customer utterance to one specialist responder, keeps two
//! lanes of conversation state per session, and returns the answer whole
//! or as a stream.

pub mod api;
pub mod config;
pub mod llm;
pub mod orchestrator;
pub mod responder;
pub mod router;
pub mod session;

pub use orchestrator::{
    ErrorKind, Orchestrator, TurnChunk, TurnFailure, TurnLimits, TurnPhase, TurnReply,
    TurnRequest, TurnStream,
};
