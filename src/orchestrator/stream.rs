//! Streaming turns
//!
//! The turn runs on its own task and forwards answer pieces through a
//! bounded channel. The consumer sees partial chunks followed by exactly
//! one final chunk carrying the session id.

use super::{
    ErrorKind, Orchestrator, ResolvedSession, TurnError, TurnFailure, TurnPhase, TurnRequest,
};
use crate::responder::{ReplyEvent, ResponderError};
use crate::router::{Routed, RoutingDecision, DECLINE_MESSAGE, ORCHESTRATOR_AUTHOR};
use crate::session::{SessionId, SessionStore, Thread};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Chunks buffered between the turn task and a slow consumer
const STREAM_BUFFER: usize = 32;

/// One piece of a streamed turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TurnChunk {
    pub text: String,
    pub is_final: bool,
    /// Present on the final chunk only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl TurnChunk {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
            session_id: None,
            error: None,
        }
    }

    pub fn last(text: impl Into<String>, session_id: SessionId) -> Self {
        Self {
            text: text.into(),
            is_final: true,
            session_id: Some(session_id),
            error: None,
        }
    }

    pub fn failed(failure: &TurnFailure) -> Self {
        Self {
            text: failure.user_message().to_string(),
            is_final: true,
            session_id: Some(failure.session_id.clone()),
            error: Some(failure.kind()),
        }
    }
}

/// Consumer side of a streamed turn. Ends after the final chunk.
pub struct TurnStream {
    inner: ReceiverStream<TurnChunk>,
    finished: bool,
}

impl TurnStream {
    fn new(rx: mpsc::Receiver<TurnChunk>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            finished: false,
        }
    }
}

impl Stream for TurnStream {
    type Item = TurnChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<TurnChunk>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(chunk)) => {
                this.finished = chunk.is_final;
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                this.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: SessionStore + 'static> Orchestrator<S> {
    /// Run one turn, delivering the answer incrementally.
    ///
    /// Dropping the returned stream before the final chunk abandons the
    /// turn; nothing is persisted.
    pub fn run_turn_stream(self: &Arc<Self>, request: TurnRequest) -> TurnStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let Some(last) = orchestrator.stream_turn(request, &tx).await else {
                return;
            };
            if tx.send(last).await.is_err() {
                tracing::debug!("Stream consumer left before the final chunk");
            }
        });
        TurnStream::new(rx)
    }

    /// Drive a turn, sending partial chunks on `tx`. Returns the final
    /// chunk, or `None` when the consumer has gone away.
    async fn stream_turn(
        &self,
        request: TurnRequest,
        tx: &mpsc::Sender<TurnChunk>,
    ) -> Option<TurnChunk> {
        let TurnRequest {
            utterance,
            session_id,
        } = request;

        let session = match self.resolve_session(session_id).await {
            Ok(session) => session,
            Err(failure) => return Some(TurnChunk::failed(&failure)),
        };
        let Routed { decision, routing } = match self.route(&session, &utterance).await {
            Ok(routed) => routed,
            Err(failure) => return Some(TurnChunk::failed(&failure)),
        };
        let ResolvedSession { id, dialogue, .. } = session;

        let name = match decision {
            RoutingDecision::Responder(name) => name,
            RoutingDecision::Unsupported => {
                let dialogue =
                    dialogue.with_exchange(utterance, ORCHESTRATOR_AUTHOR, DECLINE_MESSAGE);
                return Some(
                    match self
                        .persist(&id, &dialogue, &routing, TurnPhase::Persisting)
                        .await
                    {
                        Ok(()) => TurnChunk::last(DECLINE_MESSAGE, id),
                        Err(failure) => TurnChunk::failed(&failure),
                    },
                );
            }
        };

        let dialogue = match self.forward(&id, &name, &utterance, dialogue, tx).await {
            Forwarded::Complete(dialogue) => dialogue,
            Forwarded::Failed(failure) => return Some(TurnChunk::failed(&failure)),
            Forwarded::Abandoned => return None,
        };

        if tx.is_closed() {
            tracing::info!(session_id = %id, responder = %name, "Stream consumer left; discarding turn");
            return None;
        }
        Some(
            match self
                .persist(&id, &dialogue, &routing, TurnPhase::Persisting)
                .await
            {
                Ok(()) => {
                    tracing::info!(session_id = %id, responder = %name, "Streamed turn complete");
                    TurnChunk::last("", id)
                }
                Err(failure) => TurnChunk::failed(&failure),
            },
        )
    }

    /// Relay the responder's answer pieces until it reports the updated
    /// dialogue
    async fn forward(
        &self,
        id: &SessionId,
        name: &str,
        utterance: &str,
        dialogue: Thread,
        tx: &mpsc::Sender<TurnChunk>,
    ) -> Forwarded {
        let responder = match self.lookup(id, name) {
            Ok(responder) => responder,
            Err(failure) => return Forwarded::Failed(failure),
        };
        let Some(mut upstream) = responder.handle_stream(utterance, dialogue) else {
            return Forwarded::Failed(TurnFailure::new(
                id.clone(),
                TurnPhase::Dispatching,
                TurnError::StreamingUnsupported(name.to_string()),
            ));
        };

        let chunk_timeout = self.limits.chunk_timeout;
        let mut delivered = 0usize;
        loop {
            let next = tokio::select! {
                () = tx.closed() => {
                    tracing::info!(session_id = %id, responder = %name, delivered, "Stream consumer left; discarding turn");
                    return Forwarded::Abandoned;
                }
                next = tokio::time::timeout(chunk_timeout, upstream.next()) => next,
            };

            let source = match next {
                Ok(Some(Ok(ReplyEvent::Delta(text)))) => {
                    if text.is_empty() {
                        continue;
                    }
                    if tx.send(TurnChunk::partial(text)).await.is_err() {
                        tracing::info!(session_id = %id, responder = %name, delivered, "Stream consumer left; discarding turn");
                        return Forwarded::Abandoned;
                    }
                    delivered += 1;
                    continue;
                }
                Ok(Some(Ok(ReplyEvent::Done(dialogue)))) => return Forwarded::Complete(dialogue),
                Ok(Some(Err(e))) => e,
                Ok(None) => ResponderError::Failed("stream ended before the answer completed".into()),
                Err(_) => ResponderError::Timeout(chunk_timeout),
            };

            let error = if delivered == 0 {
                TurnError::Responder {
                    responder: name.to_string(),
                    source,
                }
            } else {
                TurnError::MidStream {
                    responder: name.to_string(),
                    delivered,
                    source,
                }
            };
            return Forwarded::Failed(TurnFailure::new(id.clone(), TurnPhase::Dispatching, error));
        }
    }
}

enum Forwarded {
    Complete(Thread),
    Failed(TurnFailure),
    Abandoned,
}
