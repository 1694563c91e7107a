//! Mock implementations for testing
//!
//! These mocks drive whole turns without a network: a scripted language
//! service, scripted responders and a store that can be told to fail.

use super::*;
use crate::llm::{ContentBlock, LlmRequest, LlmResponse, LlmService, TextStream, Usage};
use crate::responder::{banking, ReplyEvent, ReplyStream};
use crate::router::{route_tool_name, TriagePolicy, BANKING_TRIAGE_RULES};
use crate::session::{InMemorySessionStore, StateBlob, StoreError};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

// ============================================================================
// Mock LLM Service
// ============================================================================

/// Language service that returns queued responses
#[allow(dead_code)]
pub struct MockLlmService {
    responses: Mutex<VecDeque<Result<LlmResponse, LlmError>>>,
    stream: Mutex<Option<Vec<Result<String, LlmError>>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<LlmRequest>>,
}

#[allow(dead_code)]
impl MockLlmService {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            stream: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: LlmResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Enable streaming; every stream replays these items
    pub fn set_stream(&self, items: Vec<Result<String, LlmError>>) {
        *self.stream.lock().unwrap() = Some(items);
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockLlmService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn complete_stream(&self, request: LlmRequest) -> Option<TextStream> {
        let items = self.stream.lock().unwrap().clone()?;
        self.requests.lock().unwrap().push(request);
        Some(Box::pin(futures::stream::iter(items)))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// Classifier response selecting `responder`
pub fn route_to(responder: &str) -> LlmResponse {
    LlmResponse {
        content: vec![ContentBlock::tool_use(
            "call_route",
            route_tool_name(responder),
            serde_json::json!({}),
        )],
        usage: Usage::default(),
    }
}

/// Classifier that routes on keywords in the latest utterance
pub struct KeywordClassifier;

#[async_trait]
impl LlmService for KeywordClassifier {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let latest = request
            .messages
            .last()
            .map(|m| m.text().to_lowercase())
            .unwrap_or_default();
        let has = |words: &[&str]| words.iter().any(|w| latest.contains(w));

        let response = if has(&["balance", "card", "beneficiar"]) {
            route_to(banking::ACCOUNT_AGENT)
        } else if has(&["history", "movements", "already paid"]) {
            route_to(banking::TRANSACTION_HISTORY_AGENT)
        } else if has(&["pay", "bill", "invoice"]) {
            route_to(banking::PAYMENT_AGENT)
        } else {
            LlmResponse::from_text("This request is outside the supported domains.")
        };
        Ok(response)
    }

    fn model_id(&self) -> &str {
        "keyword-classifier"
    }
}

/// Keyword classifier that answers only after `delay`
pub struct SlowClassifier {
    pub delay: Duration,
}

#[async_trait]
impl LlmService for SlowClassifier {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        tokio::time::sleep(self.delay).await;
        KeywordClassifier.complete(request).await
    }

    fn model_id(&self) -> &str {
        "slow-classifier"
    }
}

// ============================================================================
// Scripted Responder
// ============================================================================

/// One step of a scripted streaming answer
#[derive(Debug, Clone)]
pub enum StreamStep {
    Delta(String),
    Fail(String),
    Pause(Duration),
    /// End the stream without reporting the updated dialogue
    Cut,
}

pub fn delta(text: &str) -> StreamStep {
    StreamStep::Delta(text.to_string())
}

/// Responder with a fixed answer and recorded inputs
#[allow(dead_code)]
pub struct ScriptedResponder {
    name: String,
    answer: String,
    failure: Option<String>,
    delay: Option<Duration>,
    gate: Option<Arc<Notify>>,
    steps: Option<Vec<StreamStep>>,
    /// Signalled when `handle` starts
    pub started: Arc<Notify>,
    /// Every utterance received, in order
    pub utterances: Mutex<Vec<String>>,
    /// Dialogue length seen by each call
    pub dialogue_lens: Mutex<Vec<usize>>,
}

#[allow(dead_code)]
impl ScriptedResponder {
    pub fn new(name: &str, answer: &str) -> Self {
        Self {
            name: name.to_string(),
            answer: answer.to_string(),
            failure: None,
            delay: None,
            gate: None,
            steps: None,
            started: Arc::new(Notify::new()),
            utterances: Mutex::new(Vec::new()),
            dialogue_lens: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every answer until `gate` is notified
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn streaming(mut self, steps: Vec<StreamStep>) -> Self {
        self.steps = Some(steps);
        self
    }

    pub fn recorded_utterances(&self) -> Vec<String> {
        self.utterances.lock().unwrap().clone()
    }

    pub fn recorded_dialogue_lens(&self) -> Vec<usize> {
        self.dialogue_lens.lock().unwrap().clone()
    }

    fn record(&self, utterance: &str, dialogue: &Thread) {
        self.utterances.lock().unwrap().push(utterance.to_string());
        self.dialogue_lens.lock().unwrap().push(dialogue.len());
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "scripted test responder"
    }

    async fn handle(&self, utterance: &str, dialogue: Thread) -> Result<Reply, ResponderError> {
        self.record(utterance, &dialogue);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &self.failure {
            return Err(ResponderError::Failed(message.clone()));
        }
        Ok(Reply {
            text: self.answer.clone(),
            dialogue: dialogue.with_exchange(utterance, &self.name, &self.answer),
        })
    }

    fn handle_stream(&self, utterance: &str, dialogue: Thread) -> Option<ReplyStream> {
        let steps = self.steps.clone()?;
        self.record(utterance, &dialogue);
        let name = self.name.clone();
        let utterance = utterance.to_string();

        Some(Box::pin(async_stream::stream! {
            let mut full = String::new();
            for step in steps {
                match step {
                    StreamStep::Delta(text) => {
                        full.push_str(&text);
                        yield Ok(ReplyEvent::Delta(text));
                    }
                    StreamStep::Fail(message) => {
                        yield Err(ResponderError::Failed(message));
                        return;
                    }
                    StreamStep::Pause(d) => tokio::time::sleep(d).await,
                    StreamStep::Cut => return,
                }
            }
            yield Ok(ReplyEvent::Done(dialogue.with_exchange(utterance, name, full)));
        }))
    }
}

// ============================================================================
// Flaky Store
// ============================================================================

/// In-memory store whose writes can be switched off
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemorySessionStore,
    reject_puts: AtomicBool,
}

impl FlakyStore {
    pub fn reject_puts(&self, reject: bool) {
        self.reject_puts.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FlakyStore {
    async fn get(&self, id: &SessionId) -> Option<SessionState> {
        self.inner.get(id).await
    }

    async fn put(&self, id: &SessionId, state: SessionState) -> Result<(), StoreError> {
        if self.reject_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        self.inner.put(id, state).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Orchestrator over `store` with the given responders and classifier
pub fn orchestrator_with<S: SessionStore>(
    store: S,
    classifier: Arc<dyn LlmService>,
    responders: &[Arc<ScriptedResponder>],
) -> Orchestrator<S> {
    let registry = responders
        .iter()
        .fold(ResponderRegistry::builder(), |builder, r| {
            builder.shared(Arc::clone(r) as Arc<dyn Responder>)
        })
        .build()
        .unwrap();
    let router = Router::new(classifier, TriagePolicy::new(BANKING_TRIAGE_RULES, &registry));
    Orchestrator::new(store, router, registry)
}

/// The three banking domains with fixed answers
pub fn banking_responders() -> Vec<Arc<ScriptedResponder>> {
    vec![
        Arc::new(ScriptedResponder::new(
            banking::ACCOUNT_AGENT,
            "Your balance is 1,250.00 EUR.",
        )),
        Arc::new(ScriptedResponder::new(
            banking::TRANSACTION_HISTORY_AGENT,
            "You paid Contoso 85.00 EUR on 2 March.",
        )),
        Arc::new(ScriptedResponder::new(
            banking::PAYMENT_AGENT,
            "Which payment method should I use?",
        )),
    ]
}

fn keyword_orchestrator(
    responders: &[Arc<ScriptedResponder>],
) -> Arc<Orchestrator<Arc<InMemorySessionStore>>> {
    Arc::new(orchestrator_with(
        Arc::new(InMemorySessionStore::new()),
        Arc::new(KeywordClassifier),
        responders,
    ))
}

async fn lanes(
    orchestrator: &Orchestrator<Arc<InMemorySessionStore>>,
    id: &SessionId,
) -> (Thread, Thread) {
    let state = orchestrator.store().get(id).await.expect("session stored");
    (
        Thread::from_blob(&state.dialogue).unwrap(),
        Thread::from_blob(&state.routing).unwrap(),
    )
}

async fn collect(stream: TurnStream) -> Vec<TurnChunk> {
    stream.collect().await
}

/// Exactly one final chunk, at the end, and it alone carries the session id
fn assert_terminal_contract(chunks: &[TurnChunk]) {
    assert!(!chunks.is_empty(), "stream produced nothing");
    let finals = chunks.iter().filter(|c| c.is_final).count();
    assert_eq!(finals, 1, "chunks: {chunks:?}");
    let last = chunks.last().unwrap();
    assert!(last.is_final);
    assert!(last.session_id.is_some());
    assert!(chunks[..chunks.len() - 1]
        .iter()
        .all(|c| c.session_id.is_none() && c.error.is_none()));
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmErrorKind;

    // ========================================================================
    // Turn Tests
    // ========================================================================

    #[tokio::test]
    async fn test_first_turn_mints_session_and_persists_both_lanes() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);

        let reply = orchestrator
            .run_turn(TurnRequest::new("What is my balance?"))
            .await
            .unwrap();

        assert_eq!(reply.text, "Your balance is 1,250.00 EUR.");
        assert_eq!(
            reply.decision,
            RoutingDecision::Responder(banking::ACCOUNT_AGENT.to_string())
        );
        let (dialogue, routing) = lanes(&orchestrator, &reply.session_id).await;
        assert_eq!(dialogue.len(), 2);
        assert_eq!(routing.len(), 2);
        assert_eq!(orchestrator.store().len(), 1);
    }

    #[tokio::test]
    async fn test_routing_lane_never_sees_responder_text() {
        let payment = Arc::new(ScriptedResponder::new(
            banking::PAYMENT_AGENT,
            "I can also show your card balance. Shall I pay the bill with your card?",
        ));
        let orchestrator = keyword_orchestrator(&[Arc::clone(&payment)]);

        let reply = orchestrator
            .run_turn(TurnRequest::new("I want to pay this bill"))
            .await
            .unwrap();
        let (dialogue, routing) = lanes(&orchestrator, &reply.session_id).await;

        assert!(dialogue.contains_text(&reply.text));
        assert!(!routing.contains_text(&reply.text));
        assert!(routing.contains_text("I want to pay this bill"));
        assert!(routing
            .messages()
            .iter()
            .filter_map(|m| m.author.as_deref())
            .all(|author| author == ORCHESTRATOR_AUTHOR));
    }

    #[tokio::test]
    async fn test_classifier_sees_only_routing_history() {
        let classifier = Arc::new(MockLlmService::new());
        classifier.queue_response(route_to(banking::ACCOUNT_AGENT));
        classifier.queue_response(route_to(banking::ACCOUNT_AGENT));
        let responders = banking_responders();
        let orchestrator = orchestrator_with(
            Arc::new(InMemorySessionStore::new()),
            Arc::clone(&classifier) as Arc<dyn LlmService>,
            &responders,
        );

        let first = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap();
        orchestrator
            .run_turn(TurnRequest::new("and my cards?").on_session(first.session_id))
            .await
            .unwrap();

        let second = &classifier.recorded_requests()[1];
        assert!(second
            .messages
            .iter()
            .all(|m| m.text() != "Your balance is 1,250.00 EUR."));
        assert_eq!(second.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_responder_receives_original_utterance() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);
        let utterance = "  Pay invoice Nº 1527248 (85,00 €)  \n";

        orchestrator
            .run_turn(TurnRequest::new(utterance))
            .await
            .unwrap();

        assert_eq!(responders[2].recorded_utterances(), vec![utterance.to_string()]);
    }

    #[tokio::test]
    async fn test_unsupported_request_is_declined_and_persisted() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);

        let reply = orchestrator
            .run_turn(TurnRequest::new("What's the weather today?"))
            .await
            .unwrap();

        assert_eq!(reply.decision, RoutingDecision::Unsupported);
        assert_eq!(reply.text, DECLINE_MESSAGE);
        assert!(responders.iter().all(|r| r.recorded_utterances().is_empty()));

        let (dialogue, routing) = lanes(&orchestrator, &reply.session_id).await;
        assert!(dialogue.contains_text("What's the weather today?"));
        assert!(dialogue.contains_text(DECLINE_MESSAGE));
        assert!(routing.contains_text(DECLINE_MESSAGE));

        let next = orchestrator
            .run_turn(TurnRequest::new("ok, my balance then").on_session(reply.session_id.clone()))
            .await
            .unwrap();
        assert_eq!(next.session_id, reply.session_id);
        assert_eq!(responders[0].recorded_dialogue_lens(), vec![2]);
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_created() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);
        let id = SessionId::from("never-issued");

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?").on_session(id.clone()))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::SessionNotFound);
        assert_eq!(failure.phase, TurnPhase::ResolvingSession);
        assert_eq!(failure.session_id, id);
        assert!(orchestrator.store().get(&id).await.is_none());
        assert!(orchestrator.store().is_empty());
    }

    #[tokio::test]
    async fn test_half_written_session_is_not_found() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);
        let id = SessionId::from("half");
        orchestrator
            .store()
            .insert_dialogue_only(&id, Thread::new().to_blob().unwrap());

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?").on_session(id))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_unreadable_session_is_not_found() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);
        let id = SessionId::from("garbled");
        orchestrator
            .store()
            .put(
                &id,
                SessionState {
                    dialogue: StateBlob::new("not json"),
                    routing: Thread::new().to_blob().unwrap(),
                },
            )
            .await
            .unwrap();

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?").on_session(id))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, TurnError::SessionCorrupted { .. }));
        assert_eq!(failure.kind(), ErrorKind::SessionNotFound);
        assert!(responders[0].recorded_utterances().is_empty());
    }

    #[tokio::test]
    async fn test_resolving_twice_reads_the_same_state() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);
        let reply = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap();

        let first = orchestrator
            .resolve_session(Some(reply.session_id.clone()))
            .await
            .unwrap();
        let second = orchestrator
            .resolve_session(Some(reply.session_id.clone()))
            .await
            .unwrap();
        assert_eq!(first.dialogue, second.dialogue);
        assert_eq!(first.routing, second.routing);
        assert_eq!(orchestrator.store().len(), 1);
    }

    #[tokio::test]
    async fn test_responder_failure_leaves_state_untouched() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "unused").failing("core banking down"),
        );
        let orchestrator = keyword_orchestrator(&[Arc::clone(&account)]);

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::ResponderFailure);
        assert_eq!(failure.phase, TurnPhase::Dispatching);
        assert!(!failure.user_message().contains("core banking"));

        // the minted session exists, empty, so the caller can retry on it
        let (dialogue, routing) = lanes(&orchestrator, &failure.session_id).await;
        assert!(dialogue.is_empty());
        assert!(routing.is_empty());
    }

    #[tokio::test]
    async fn test_routing_failure_reports_session() {
        let classifier = Arc::new(MockLlmService::new());
        classifier.queue_error(LlmError::rate_limit("slow down"));
        let responders = banking_responders();
        let orchestrator = orchestrator_with(
            Arc::new(InMemorySessionStore::new()),
            classifier,
            &responders,
        );

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::RoutingFailure);
        assert_eq!(failure.phase, TurnPhase::Routing);
        assert!(orchestrator.store().get(&failure.session_id).await.is_some());
    }

    #[tokio::test]
    async fn test_routing_timeout_is_routing_failure() {
        let responders = banking_responders();
        let orchestrator = orchestrator_with(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(SlowClassifier {
                delay: Duration::from_secs(5),
            }),
            &responders,
        )
        .with_limits(TurnLimits {
            routing_timeout: Duration::from_millis(50),
            ..TurnLimits::default()
        });

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::RoutingFailure);
        assert_eq!(failure.phase, TurnPhase::Routing);
        assert!(matches!(
            &failure.error,
            TurnError::Routing(e) if e.kind == LlmErrorKind::Timeout
        ));

        // The minted session is echoed back and still empty
        let state = orchestrator.store().get(&failure.session_id).await.unwrap();
        assert!(Thread::from_blob(&state.dialogue).unwrap().is_empty());
        assert!(responders.iter().all(|r| r.recorded_utterances().is_empty()));
    }

    #[tokio::test]
    async fn test_dispatch_timeout_is_responder_failure() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "late").with_delay(Duration::from_secs(5)),
        );
        let orchestrator = Arc::new(
            orchestrator_with(
                Arc::new(InMemorySessionStore::new()),
                Arc::new(KeywordClassifier),
                &[account],
            )
            .with_limits(TurnLimits {
                dispatch_timeout: Duration::from_millis(50),
                ..TurnLimits::default()
            }),
        );

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap_err();
        assert!(matches!(
            failure.error,
            TurnError::Responder {
                source: ResponderError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_persist_failure_is_reported() {
        let store = Arc::new(FlakyStore::default());
        let responders = banking_responders();
        let orchestrator = orchestrator_with(
            Arc::clone(&store),
            Arc::new(KeywordClassifier),
            &responders,
        );
        let first = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap();

        store.reject_puts(true);
        let failure = orchestrator
            .run_turn(TurnRequest::new("my cards?").on_session(first.session_id.clone()))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::PersistFailure);
        assert_eq!(failure.phase, TurnPhase::Persisting);
        assert_eq!(failure.session_id, first.session_id);

        let failure = orchestrator
            .run_turn(TurnRequest::new("balance?"))
            .await
            .unwrap_err();
        assert_eq!(failure.phase, TurnPhase::ResolvingSession);
    }

    #[tokio::test]
    async fn test_multi_turn_dialogue_accumulates() {
        let responders = banking_responders();
        let orchestrator = keyword_orchestrator(&responders);

        let first = orchestrator
            .run_turn(TurnRequest::new("I want to pay this bill"))
            .await
            .unwrap();
        let id = first.session_id;
        for utterance in ["Did I already paid Contoso?", "ok, pay it with my card"] {
            let reply = orchestrator
                .run_turn(TurnRequest::new(utterance).on_session(id.clone()))
                .await
                .unwrap();
            assert_eq!(reply.session_id, id);
        }

        let (dialogue, routing) = lanes(&orchestrator, &id).await;
        assert_eq!(dialogue.len(), 6);
        assert_eq!(routing.len(), 6);
        assert_eq!(responders[1].recorded_dialogue_lens(), vec![2]);
        assert_eq!(
            responders[0].recorded_utterances(),
            vec!["ok, pay it with my card".to_string()]
        );
    }

    // ========================================================================
    // Concurrency Tests
    // ========================================================================

    #[tokio::test]
    async fn test_same_session_turns_race_last_writer_wins() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "1,250.00 EUR")
                .with_delay(Duration::from_millis(50)),
        );
        let orchestrator = keyword_orchestrator(&[Arc::clone(&account)]);
        let id = orchestrator
            .resolve_session(None)
            .await
            .unwrap()
            .id;

        let (a, b) = tokio::join!(
            orchestrator.run_turn(TurnRequest::new("balance?").on_session(id.clone())),
            orchestrator.run_turn(TurnRequest::new("card balance?").on_session(id.clone())),
        );
        a.unwrap();
        b.unwrap();

        // both turns started from the empty session; one update is lost
        assert_eq!(account.recorded_dialogue_lens(), vec![0, 0]);
        let (dialogue, _) = lanes(&orchestrator, &id).await;
        assert_eq!(dialogue.len(), 2);
    }

    #[tokio::test]
    async fn test_sessions_do_not_block_each_other() {
        let gate = Arc::new(Notify::new());
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "1,250.00 EUR").gated(Arc::clone(&gate)),
        );
        let payment = Arc::new(ScriptedResponder::new(banking::PAYMENT_AGENT, "Which bill?"));
        let orchestrator = keyword_orchestrator(&[Arc::clone(&account), payment]);

        let slow = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            async move { orchestrator.run_turn(TurnRequest::new("balance?")).await }
        });
        account.started.notified().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            orchestrator.run_turn(TurnRequest::new("pay my bill")),
        )
        .await
        .expect("unrelated session was blocked")
        .unwrap();
        assert_eq!(fast.text, "Which bill?");

        gate.notify_one();
        let slow = slow.await.unwrap().unwrap();
        assert_ne!(slow.session_id, fast.session_id);
    }

    // ========================================================================
    // Streaming Tests
    // ========================================================================

    #[tokio::test]
    async fn test_stream_delivers_deltas_then_final_chunk() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "")
                .streaming(vec![delta("Your balance "), delta(""), delta("is 1,250.00 EUR.")]),
        );
        let orchestrator = keyword_orchestrator(&[account]);

        let chunks = collect(orchestrator.run_turn_stream(TurnRequest::new("balance?"))).await;

        assert_terminal_contract(&chunks);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Your balance ");
        let id = chunks[2].session_id.clone().unwrap();
        assert!(chunks[2].error.is_none());

        let (dialogue, routing) = lanes(&orchestrator, &id).await;
        assert!(dialogue.contains_text("Your balance is 1,250.00 EUR."));
        assert!(!routing.contains_text("Your balance is 1,250.00 EUR."));
    }

    #[tokio::test]
    async fn test_every_stream_outcome_ends_with_one_final_chunk() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "")
                .streaming(vec![delta("a"), delta("b")]),
        );
        let history = Arc::new(
            ScriptedResponder::new(banking::TRANSACTION_HISTORY_AGENT, "")
                .streaming(vec![delta("a"), StreamStep::Fail("socket closed".into())]),
        );
        let payment = Arc::new(ScriptedResponder::new(banking::PAYMENT_AGENT, "no streaming"));
        let orchestrator = keyword_orchestrator(&[account, history, payment]);

        let cases = [
            (TurnRequest::new("balance?"), None),
            (TurnRequest::new("tell me a joke"), None),
            (TurnRequest::new("show my movements"), Some(ErrorKind::MidStreamFailure)),
            (TurnRequest::new("pay the bill"), Some(ErrorKind::StreamingUnsupported)),
            (
                TurnRequest::new("balance?").on_session(SessionId::from("unknown")),
                Some(ErrorKind::SessionNotFound),
            ),
        ];
        for (request, expected) in cases {
            let chunks = collect(orchestrator.run_turn_stream(request)).await;
            assert_terminal_contract(&chunks);
            assert_eq!(chunks.last().unwrap().error, expected);
        }
    }

    #[tokio::test]
    async fn test_streamed_decline_is_one_final_chunk() {
        let orchestrator = keyword_orchestrator(&banking_responders());

        let chunks = collect(orchestrator.run_turn_stream(TurnRequest::new("tell me a joke"))).await;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, DECLINE_MESSAGE);
        let id = chunks[0].session_id.clone().unwrap();
        let (dialogue, _) = lanes(&orchestrator, &id).await;
        assert!(dialogue.contains_text(DECLINE_MESSAGE));
    }

    #[tokio::test]
    async fn test_mid_stream_failure_keeps_previous_state() {
        let history = Arc::new(
            ScriptedResponder::new(banking::TRANSACTION_HISTORY_AGENT, "You paid Contoso.")
                .streaming(vec![
                    delta("You paid "),
                    delta("Contoso"),
                    StreamStep::Fail("upstream reset".into()),
                ]),
        );
        let orchestrator = keyword_orchestrator(&[Arc::clone(&history)]);

        let first = orchestrator
            .run_turn(TurnRequest::new("show my movements"))
            .await
            .unwrap();
        let before = orchestrator.store().get(&first.session_id).await.unwrap();

        let chunks = collect(
            orchestrator
                .run_turn_stream(TurnRequest::new("payments history?").on_session(first.session_id.clone())),
        )
        .await;
        assert_terminal_contract(&chunks);
        assert_eq!(chunks.len(), 3);
        let last = chunks.last().unwrap();
        assert_eq!(last.error, Some(ErrorKind::MidStreamFailure));
        assert_eq!(last.session_id.as_ref(), Some(&first.session_id));

        let after = orchestrator.store().get(&first.session_id).await.unwrap();
        assert_eq!(before, after);

        orchestrator
            .run_turn(TurnRequest::new("movements again").on_session(first.session_id))
            .await
            .unwrap();
        assert_eq!(history.recorded_dialogue_lens(), vec![0, 2, 2]);
    }

    #[tokio::test]
    async fn test_failure_before_first_chunk_is_responder_failure() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "")
                .streaming(vec![StreamStep::Fail("refused".into())]),
        );
        let orchestrator = keyword_orchestrator(&[account]);

        let chunks = collect(orchestrator.run_turn_stream(TurnRequest::new("balance?"))).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].error, Some(ErrorKind::ResponderFailure));
    }

    #[tokio::test]
    async fn test_stream_without_completion_is_mid_stream_failure() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "")
                .streaming(vec![delta("Your bal"), StreamStep::Cut]),
        );
        let orchestrator = keyword_orchestrator(&[account]);

        let chunks = collect(orchestrator.run_turn_stream(TurnRequest::new("balance?"))).await;
        assert_terminal_contract(&chunks);
        let last = chunks.last().unwrap();
        assert_eq!(last.error, Some(ErrorKind::MidStreamFailure));
        let (dialogue, _) = lanes(&orchestrator, last.session_id.as_ref().unwrap()).await;
        assert!(dialogue.is_empty());
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let account = Arc::new(
            ScriptedResponder::new(banking::ACCOUNT_AGENT, "")
                .streaming(vec![delta("Your"), StreamStep::Pause(Duration::from_secs(5))]),
        );
        let orchestrator = Arc::new(
            orchestrator_with(
                Arc::new(InMemorySessionStore::new()),
                Arc::new(KeywordClassifier),
                &[account],
            )
            .with_limits(TurnLimits {
                chunk_timeout: Duration::from_millis(50),
                ..TurnLimits::default()
            }),
        );

        let chunks = collect(orchestrator.run_turn_stream(TurnRequest::new("balance?"))).await;
        assert_terminal_contract(&chunks);
        assert_eq!(chunks.last().unwrap().error, Some(ErrorKind::MidStreamFailure));
    }

    #[tokio::test]
    async fn test_abandoned_stream_persists_nothing() {
        let account = Arc::new(ScriptedResponder::new(banking::ACCOUNT_AGENT, "").streaming(vec![
            delta("Your balance "),
            StreamStep::Pause(Duration::from_millis(100)),
            delta("is 1,250.00 EUR."),
        ]));
        let orchestrator = keyword_orchestrator(&[account]);
        let first = orchestrator
            .run_turn_stream(TurnRequest::new("balance?"))
            .collect::<Vec<_>>()
            .await;
        let id = first.last().unwrap().session_id.clone().unwrap();
        let before = orchestrator.store().get(&id).await.unwrap();

        let mut stream = orchestrator.run_turn_stream(TurnRequest::new("balance?").on_session(id.clone()));
        let chunk = stream.next().await.unwrap();
        assert!(!chunk.is_final);
        drop(stream);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = orchestrator.store().get(&id).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_streaming_uses_llm_responder_end_to_end() {
        let llm = Arc::new(MockLlmService::new());
        llm.set_stream(vec![Ok("Which ".to_string()), Ok("bill?".to_string())]);
        let registry = banking::registry(
            Arc::clone(&llm) as Arc<dyn LlmService>,
            &crate::responder::PromptContext::default(),
        )
        .unwrap();
        let classifier = Arc::new(MockLlmService::new());
        classifier.queue_response(route_to(banking::PAYMENT_AGENT));
        let router = Router::new(classifier, TriagePolicy::new(BANKING_TRIAGE_RULES, &registry));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(InMemorySessionStore::new()),
            router,
            registry,
        ));

        let chunks = collect(orchestrator.run_turn_stream(TurnRequest::new("pay my bill"))).await;
        assert_terminal_contract(&chunks);
        let text: String = chunks.iter().filter(|c| !c.is_final).map(|c| c.text.as_str()).collect();
        assert_eq!(text, "Which bill?");

        let id = chunks.last().unwrap().session_id.clone().unwrap();
        let (dialogue, _) = lanes(&orchestrator, &id).await;
        assert!(dialogue.contains_text("Which bill?"));
        assert!(llm.recorded_requests()[0]
            .system
            .as_deref()
            .unwrap()
            .contains("customer@example.com"));
    }
}
