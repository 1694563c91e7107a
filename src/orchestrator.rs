//! Turn orchestration
//!
//! A turn moves through `ResolvingSession -> Routing -> Dispatching ->
//! Persisting` and ends either with a reply or a [`TurnFailure`]. Session
//! state is written once, after the whole answer is known, so a failed or
//! abandoned turn leaves the store as it found it.

mod error;
mod stream;
#[cfg(test)]
pub mod testing;

pub use error::{ErrorKind, TurnError, TurnFailure};
pub use stream::{TurnChunk, TurnStream};

use crate::llm::LlmError;
use crate::responder::{Reply, Responder, ResponderError, ResponderRegistry};
use crate::router::{Routed, Router, RoutingDecision, DECLINE_MESSAGE, ORCHESTRATOR_AUTHOR};
use crate::session::{SessionId, SessionState, SessionStore, StoreError, Thread};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Phase a turn was in when it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    ResolvingSession,
    Routing,
    Dispatching,
    Persisting,
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnPhase::ResolvingSession => "resolving session",
            TurnPhase::Routing => "routing",
            TurnPhase::Dispatching => "dispatching",
            TurnPhase::Persisting => "persisting",
        };
        f.write_str(s)
    }
}

/// Upper bounds on the external calls a turn makes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnLimits {
    pub routing_timeout: Duration,
    pub dispatch_timeout: Duration,
    /// Longest wait for the next piece of a streamed answer
    pub chunk_timeout: Duration,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            routing_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(120),
            chunk_timeout: Duration::from_secs(60),
        }
    }
}

/// One user utterance, optionally continuing a session
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub utterance: String,
    pub session_id: Option<SessionId>,
}

impl TurnRequest {
    pub fn new(utterance: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            session_id: None,
        }
    }

    #[must_use]
    pub fn on_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Successful turn
#[derive(Debug, Clone)]
pub struct TurnReply {
    pub text: String,
    pub session_id: SessionId,
    pub decision: RoutingDecision,
}

struct ResolvedSession {
    id: SessionId,
    dialogue: Thread,
    routing: Thread,
}

pub struct Orchestrator<S> {
    store: S,
    router: Router,
    responders: ResponderRegistry,
    limits: TurnLimits,
}

impl<S: SessionStore> Orchestrator<S> {
    pub fn new(store: S, router: Router, responders: ResponderRegistry) -> Self {
        Self {
            store,
            router,
            responders,
            limits: TurnLimits::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: TurnLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn responders(&self) -> &ResponderRegistry {
        &self.responders
    }

    /// Run one complete turn and return the whole answer
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnReply, TurnFailure> {
        let started = Instant::now();
        let TurnRequest {
            utterance,
            session_id,
        } = request;

        let session = self.resolve_session(session_id).await?;
        let Routed { decision, routing } = self.route(&session, &utterance).await?;
        let ResolvedSession { id, dialogue, .. } = session;

        let (text, dialogue) = match &decision {
            RoutingDecision::Unsupported => (
                DECLINE_MESSAGE.to_string(),
                dialogue.with_exchange(utterance.as_str(), ORCHESTRATOR_AUTHOR, DECLINE_MESSAGE),
            ),
            RoutingDecision::Responder(name) => {
                let Reply { text, dialogue } = self.dispatch(&id, name, &utterance, dialogue).await?;
                (text, dialogue)
            }
        };

        self.persist(&id, &dialogue, &routing, TurnPhase::Persisting)
            .await?;

        tracing::info!(
            session_id = %id,
            decision = ?decision,
            duration_ms = started.elapsed().as_millis(),
            "Turn complete"
        );
        Ok(TurnReply {
            text,
            session_id: id,
            decision,
        })
    }

    /// Load the lanes for `requested`, or mint a session when none is given.
    ///
    /// A new session is stored with empty lanes right away so its id is
    /// valid for a retry even if this turn fails.
    async fn resolve_session(
        &self,
        requested: Option<SessionId>,
    ) -> Result<ResolvedSession, TurnFailure> {
        let Some(id) = requested else {
            let id = SessionId::generate();
            let (dialogue, routing) = (Thread::new(), Thread::new());
            self.persist(&id, &dialogue, &routing, TurnPhase::ResolvingSession)
                .await?;
            tracing::info!(session_id = %id, "Started new session");
            return Ok(ResolvedSession {
                id,
                dialogue,
                routing,
            });
        };

        let Some(state) = self.store.get(&id).await else {
            let error = TurnError::SessionNotFound(id.clone());
            return Err(TurnFailure::new(id, TurnPhase::ResolvingSession, error));
        };

        match (
            Thread::from_blob(&state.dialogue),
            Thread::from_blob(&state.routing),
        ) {
            (Ok(dialogue), Ok(routing)) => {
                tracing::debug!(session_id = %id, turns = dialogue.len(), "Resumed session");
                Ok(ResolvedSession {
                    id,
                    dialogue,
                    routing,
                })
            }
            (Err(source), _) | (_, Err(source)) => {
                let error = TurnError::SessionCorrupted {
                    session_id: id.clone(),
                    source,
                };
                Err(TurnFailure::new(id, TurnPhase::ResolvingSession, error))
            }
        }
    }

    async fn route(
        &self,
        session: &ResolvedSession,
        utterance: &str,
    ) -> Result<Routed, TurnFailure> {
        let routing = session.routing.clone();
        let outcome =
            tokio::time::timeout(self.limits.routing_timeout, self.router.route(utterance, routing))
                .await;

        let error = match outcome {
            Ok(Ok(routed)) => {
                tracing::debug!(session_id = %session.id, decision = ?routed.decision, "Routed turn");
                return Ok(routed);
            }
            Ok(Err(e)) => e,
            Err(_) => LlmError::timeout(self.limits.routing_timeout),
        };
        Err(TurnFailure::new(
            session.id.clone(),
            TurnPhase::Routing,
            TurnError::Routing(error),
        ))
    }

    fn lookup(&self, id: &SessionId, name: &str) -> Result<Arc<dyn Responder>, TurnFailure> {
        self.responders.resolve(name).ok_or_else(|| {
            TurnFailure::new(
                id.clone(),
                TurnPhase::Dispatching,
                TurnError::Responder {
                    responder: name.to_string(),
                    source: ResponderError::Failed(format!("no responder registered as {name}")),
                },
            )
        })
    }

    async fn dispatch(
        &self,
        id: &SessionId,
        name: &str,
        utterance: &str,
        dialogue: Thread,
    ) -> Result<Reply, TurnFailure> {
        let responder = self.lookup(id, name)?;
        let outcome = tokio::time::timeout(
            self.limits.dispatch_timeout,
            responder.handle(utterance, dialogue),
        )
        .await;

        let source = match outcome {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(e)) => e,
            Err(_) => ResponderError::Timeout(self.limits.dispatch_timeout),
        };
        Err(TurnFailure::new(
            id.clone(),
            TurnPhase::Dispatching,
            TurnError::Responder {
                responder: name.to_string(),
                source,
            },
        ))
    }

    /// Write both lanes in one store call
    async fn persist(
        &self,
        id: &SessionId,
        dialogue: &Thread,
        routing: &Thread,
        phase: TurnPhase,
    ) -> Result<(), TurnFailure> {
        let result = match encode(dialogue, routing) {
            Ok(state) => self.store.put(id, state).await,
            Err(e) => Err(StoreError::from(e)),
        };
        result.map_err(|e| TurnFailure::new(id.clone(), phase, TurnError::Persist(e)))
    }
}

fn encode(dialogue: &Thread, routing: &Thread) -> Result<SessionState, serde_json::Error> {
    Ok(SessionState {
        dialogue: dialogue.to_blob()?,
        routing: routing.to_blob()?,
    })
}
