//! Process configuration
//!
//! Everything is read from environment variables with working defaults, so
//! the service starts with nothing set (answers then fail until an API key
//! is provided).

use crate::llm::LlmConfig;
use crate::orchestrator::TurnLimits;
use crate::responder::PromptContext;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub llm: LlmConfig,
    pub limits: TurnLimits,
    pub prompt: PromptContext,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = TurnLimits::default();
        let port = lookup("ORCHESTRATOR_PORT")
            .and_then(|p| parsed("ORCHESTRATOR_PORT", &p))
            .unwrap_or(DEFAULT_PORT);

        let limits = TurnLimits {
            routing_timeout: seconds(&lookup, "ROUTING_TIMEOUT_SECS")
                .unwrap_or(defaults.routing_timeout),
            dispatch_timeout: seconds(&lookup, "DISPATCH_TIMEOUT_SECS")
                .unwrap_or(defaults.dispatch_timeout),
            chunk_timeout: seconds(&lookup, "STREAM_CHUNK_TIMEOUT_SECS")
                .unwrap_or(defaults.chunk_timeout),
        };

        let prompt = match lookup("BANKING_USER_MAIL").filter(|m| !m.trim().is_empty()) {
            Some(user_mail) => PromptContext { user_mail },
            None => PromptContext::default(),
        };

        Self {
            port,
            llm: LlmConfig::from_lookup(&lookup),
            limits,
            prompt,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
    let value = raw.trim().parse().ok();
    if value.is_none() {
        tracing::warn!(key, value = raw, "Ignoring unparseable setting");
    }
    value
}

/// Positive whole seconds; zero and garbage fall back to the default
fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let secs: u64 = parsed(key, &lookup(key)?)?;
    if secs == 0 {
        tracing::warn!(key, "Ignoring zero timeout");
        return None;
    }
    Some(Duration::from_secs(secs))
}
