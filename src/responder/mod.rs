//! AI responder dependency
//!
//! The pipeline only knows this trait: given the conversation's system
//! prompt, an optional knowledge-base reference, and a bounded history
//! window, produce raw reply text. The raw text may carry one embedded
//! status directive (see [`crate::directive`]); parsing it is the
//! orchestrator's job, not the responder's.

mod openai;

use async_trait::async_trait;

use crate::Result;

pub use openai::OpenAiResponder;

/// Reply sent to the customer when the responder fails
pub const FALLBACK_REPLY: &str = "I am currently experiencing issues. Please try again later.";

/// Role of a history entry, from the responder's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderRole {
    /// Inbound customer messages
    Customer,
    /// Assistant and operator messages (both are "our side" of the chat)
    Assistant,
}

/// One history entry handed to the responder
#[derive(Debug, Clone)]
pub struct ResponderMessage {
    pub role: ResponderRole,
    pub content: String,
}

/// A single generation request
#[derive(Debug, Clone)]
pub struct ResponderRequest<'a> {
    /// Integration-configured system prompt
    pub system_prompt: &'a str,
    /// Optional knowledge-base document reference
    pub knowledge_base_url: Option<&'a str>,
    /// Bounded context window, chronological order
    pub history: &'a [ResponderMessage],
}

/// External AI responder
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate raw reply text for a conversation turn
    ///
    /// # Errors
    ///
    /// Returns error if the remote call fails; callers recover locally with
    /// [`FALLBACK_REPLY`] and never propagate the failure further
    async fn generate(&self, request: ResponderRequest<'_>) -> Result<String>;
}

/// Placeholder responder used when no API key is configured
///
/// Always fails, which the orchestrator turns into the fallback reply.
pub struct UnconfiguredResponder;

#[async_trait]
impl Responder for UnconfiguredResponder {
    async fn generate(&self, _request: ResponderRequest<'_>) -> Result<String> {
        Err(crate::Error::Responder("no OpenAI API key configured".into()))
    }
}
