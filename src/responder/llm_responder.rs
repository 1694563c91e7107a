//! Responder backed by the language capability

use super::{Reply, ReplyEvent, ReplyStream, Responder, ResponderError};
use crate::llm::{LlmMessage, LlmRequest, LlmService};
use crate::session::Thread;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::StreamExt;
use std::sync::Arc;

const USER_MAIL_PLACEHOLDER: &str = "{user_mail}";
const DATE_TIME_PLACEHOLDER: &str = "{current_date_time}";

/// Values rendered into responder instructions on every call
#[derive(Debug, Clone)]
pub struct PromptContext {
    /// E-mail of the logged-in customer, used to look up their account
    pub user_mail: String,
}

impl Default for PromptContext {
    fn default() -> Self {
        Self {
            user_mail: "customer@example.com".to_string(),
        }
    }
}

/// A responder whose answers come from an [`LlmService`]
pub struct LlmResponder {
    name: String,
    description: String,
    instructions: String,
    context: PromptContext,
    llm: Arc<dyn LlmService>,
}

impl LlmResponder {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            instructions: instructions.into(),
            context: PromptContext::default(),
            llm,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: PromptContext) -> Self {
        self.context = context;
        self
    }

    fn render_instructions(&self, now: DateTime<Local>) -> String {
        self.instructions
            .replace(USER_MAIL_PLACEHOLDER, &self.context.user_mail)
            .replace(
                DATE_TIME_PLACEHOLDER,
                &now.format("%Y-%m-%d %H:%M:%S").to_string(),
            )
    }

    fn build_request(&self, utterance: &str, dialogue: &Thread) -> LlmRequest {
        LlmRequest::new(self.render_instructions(Local::now()))
            .with_messages(dialogue.to_llm_messages())
            .with_messages([LlmMessage::user(utterance)])
    }
}

#[async_trait]
impl Responder for LlmResponder {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn handle(&self, utterance: &str, dialogue: Thread) -> Result<Reply, ResponderError> {
        let request = self.build_request(utterance, &dialogue);
        let response = self.llm.complete(&request).await?;
        let text = response.text();
        Ok(Reply {
            dialogue: dialogue.with_exchange(utterance, &self.name, &text),
            text,
        })
    }

    fn handle_stream(&self, utterance: &str, dialogue: Thread) -> Option<ReplyStream> {
        let request = self.build_request(utterance, &dialogue);
        let mut deltas = self.llm.complete_stream(request)?;
        let name = self.name.clone();
        let utterance = utterance.to_string();

        Some(Box::pin(async_stream::stream! {
            let mut full = String::new();
            while let Some(item) = deltas.next().await {
                match item {
                    Ok(text) => {
                        full.push_str(&text);
                        yield Ok(ReplyEvent::Delta(text));
                    }
                    Err(e) => {
                        yield Err(ResponderError::from(e));
                        return;
                    }
                }
            }
            yield Ok(ReplyEvent::Done(dialogue.with_exchange(utterance, name, full)));
        }))
    }
}
