//! Intent routing
//!
//! One classification call per turn picks a single responder. The router
//! reads and extends only the routing lane, so responder output never
//! influences the next turn's triage.

mod policy;

pub use policy::{route_tool_name, Route, TriagePolicy, BANKING_TRIAGE_RULES};

use crate::llm::{LlmError, LlmMessage, LlmRequest, LlmResponse, LlmService};
use crate::session::Thread;
use std::sync::Arc;

/// Reply for requests outside every responder's domain
pub const DECLINE_MESSAGE: &str = "I'm sorry, I can only help with questions about your bank account, your transactions and your payments.";

/// Author recorded on turns written by the orchestrator itself
pub const ORCHESTRATOR_AUTHOR: &str = "Orchestrator";

const ROUTING_MAX_TOKENS: u32 = 256;

/// Outcome of triage for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    Responder(String),
    Unsupported,
}

/// Routing decision plus the extended routing lane
#[derive(Debug, Clone)]
pub struct Routed {
    pub decision: RoutingDecision,
    pub routing: Thread,
}

pub struct Router {
    classifier: Arc<dyn LlmService>,
    policy: TriagePolicy,
}

impl Router {
    pub fn new(classifier: Arc<dyn LlmService>, policy: TriagePolicy) -> Self {
        Self { classifier, policy }
    }

    /// Classify `utterance` against the routing history.
    ///
    /// The returned lane gains the utterance and the orchestrator's own
    /// note about where it went.
    pub async fn route(&self, utterance: &str, mut routing: Thread) -> Result<Routed, LlmError> {
        let mut request = LlmRequest::new(self.policy.instructions())
            .with_messages(routing.to_llm_messages())
            .with_messages([LlmMessage::user(utterance)])
            .with_tools(self.policy.tools());
        request.max_tokens = Some(ROUTING_MAX_TOKENS);

        let response = self.classifier.complete(&request).await?;
        let decision = self.decide(&response);

        routing.push_user(utterance);
        match &decision {
            RoutingDecision::Responder(name) => {
                routing.push_assistant(ORCHESTRATOR_AUTHOR, format!("Routed to {name}."));
            }
            RoutingDecision::Unsupported => {
                routing.push_assistant(ORCHESTRATOR_AUTHOR, DECLINE_MESSAGE);
            }
        }

        Ok(Routed { decision, routing })
    }

    fn decide(&self, response: &LlmResponse) -> RoutingDecision {
        if let Some(tool) = response.tool_names().first() {
            return match self.policy.responder_for_tool(tool) {
                Some(name) => RoutingDecision::Responder(name.to_string()),
                None => {
                    tracing::warn!(tool = %tool, "Classifier picked an unknown route");
                    RoutingDecision::Unsupported
                }
            };
        }

        let text = response.text();
        match self.policy.responder_named(text.trim()) {
            Some(name) => RoutingDecision::Responder(name.to_string()),
            None => RoutingDecision::Unsupported,
        }
    }
}
