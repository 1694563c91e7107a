//! Declarative triage policy

use crate::llm::ToolDefinition;
use crate::responder::ResponderRegistry;
use serde_json::json;
use std::fmt::Write;

/// Triage rules for the banking responder set
pub const BANKING_TRIAGE_RULES: &str = r"You are a banking customer support agent triaging customer requests about their bank account, movements and payments.
Evaluate the whole conversation with the customer and forward the latest request to the appropriate agent by calling exactly one routing function.

# Triage rules
- If the request is about bank account information like account balance, payment methods, cards and the beneficiaries book, route it to AccountAgent.
- If the request is about banking movements and payments history, route it to TransactionHistoryAgent.
- If the request is about initiating a payment, uploading a bill or invoice image for payment, or managing an on-going payment process, route it to PaymentAgent.
- If the request is not related to accounts, transactions or payments, do not call any routing function.";

/// One routing function offered to the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub responder: String,
    pub tool_name: String,
    pub description: String,
}

/// Natural-language rules plus the closed set of routes the classifier
/// may pick from
#[derive(Debug, Clone)]
pub struct TriagePolicy {
    rules: String,
    routes: Vec<Route>,
}

impl TriagePolicy {
    /// Offer one route per registered responder
    pub fn new(rules: impl Into<String>, registry: &ResponderRegistry) -> Self {
        let routes = registry
            .descriptors()
            .map(|d| Route {
                responder: d.name.clone(),
                tool_name: route_tool_name(&d.name),
                description: d.description.clone(),
            })
            .collect();
        Self {
            rules: rules.into(),
            routes,
        }
    }

    /// System prompt for the classification call
    pub fn instructions(&self) -> String {
        let mut out = self.rules.clone();
        out.push_str("\n\n# Available agents\n");
        for route in &self.routes {
            let _ = writeln!(
                out,
                "- {} (call `{}`): {}",
                route.responder, route.tool_name, route.description
            );
        }
        out
    }

    pub fn tools(&self) -> Vec<ToolDefinition> {
        self.routes
            .iter()
            .map(|route| ToolDefinition {
                name: route.tool_name.clone(),
                description: format!(
                    "Route the conversation to {}. {}",
                    route.responder, route.description
                ),
                input_schema: json!({ "type": "object", "properties": {} }),
            })
            .collect()
    }

    pub fn responder_for_tool(&self, tool_name: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.tool_name == tool_name)
            .map(|r| r.responder.as_str())
    }

    pub fn responder_named(&self, name: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.responder == name)
            .map(|r| r.responder.as_str())
    }
}

/// `TransactionHistoryAgent` -> `route_to_transaction_history_agent`
pub fn route_tool_name(responder: &str) -> String {
    let mut name = String::from("route_to_");
    let mut prev_lower = false;
    for c in responder.chars() {
        if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                name.push('_');
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
            prev_lower = false;
        }
    }
    name
}
