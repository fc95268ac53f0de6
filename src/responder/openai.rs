//! OpenAI-backed responder

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Responder, ResponderRequest, ResponderRole};
use crate::{Error, Result};

const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Knowledge-base text is capped to keep the context window sane
const KNOWLEDGE_CHAR_LIMIT: usize = 20_000;

/// Hidden instructions teaching the model to emit status directives
const CRM_INSTRUCTIONS: &str = "\n\n### CRM SYSTEM INSTRUCTIONS (hidden from the customer) ###\n\
When the conversation stage changes, append exactly one token of the form\n\
[[UPDATE_STATUS: <status>]] to the very end of your reply.\n\
Rules:\n\
1. If the customer provides a PHONE NUMBER or asks for a CALL -> [[UPDATE_STATUS: waiting_call]].\n\
2. If the customer asks about PRICE, DETAILS, or shows INTEREST -> [[UPDATE_STATUS: interested]].\n\
3. If a meeting/call is SCHEDULED for a specific time -> [[UPDATE_STATUS: scheduled]].\n\
4. If the customer REFUSES or is NOT INTERESTED -> [[UPDATE_STATUS: closed_lost]].\n\
5. If the customer CONFIRMS PAYMENT or AGREES TO BUY -> [[UPDATE_STATUS: closed_won]].\n\
Never mention the token or the statuses to the customer.";

static GOOGLE_DOC_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/d/([a-zA-Z0-9-_]+)").expect("valid regex"));

/// Chat-completions responder
pub struct OpenAiResponder {
    client: Client,
    api_key: String,
    model: String,
}

impl OpenAiResponder {
    /// Create a new responder
    #[must_use]
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }

    /// Fetch knowledge-base text for a Google Docs reference
    ///
    /// A `/d/<id>` link is rewritten to the plain-text export endpoint.
    /// Failures are not fatal - the reply is generated without the
    /// knowledge base.
    async fn fetch_knowledge(&self, url: &str) -> Option<String> {
        let doc_id = GOOGLE_DOC_ID.captures(url)?.get(1)?.as_str().to_string();
        let export_url =
            format!("https://docs.google.com/document/d/{doc_id}/export?format=txt");

        let response = match self.client.get(&export_url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "knowledge base fetch failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "knowledge base fetch failed");
                return None;
            }
        };

        let text = response.text().await.ok()?;
        Some(text.chars().take(KNOWLEDGE_CHAR_LIMIT).collect())
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn generate(&self, request: ResponderRequest<'_>) -> Result<String> {
        let mut system_prompt = request.system_prompt.to_string();

        if let Some(url) = request.knowledge_base_url {
            if let Some(knowledge) = self.fetch_knowledge(url).await {
                system_prompt.push_str(
                    "\n\n=== KNOWLEDGE BASE (use this information to answer) ===\n",
                );
                system_prompt.push_str(&knowledge);
                system_prompt.push_str("\n==================================================");
            }
        }

        system_prompt.push_str(CRM_INSTRUCTIONS);

        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(ChatMessage {
            role: "system",
            content: system_prompt,
        });
        for entry in request.history {
            messages.push(ChatMessage {
                role: match entry.role {
                    ResponderRole::Customer => "user",
                    ResponderRole::Assistant => "assistant",
                },
                content: entry.content.clone(),
            });
        }

        let body = ChatRequest {
            model: &self.model,
            messages,
        };

        let response = self
            .client
            .post(CHAT_COMPLETIONS_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Responder(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Responder(format!("OpenAI API error: {status} - {body}")));
        }

        let completion: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Responder(format!("OpenAI response parse error: {e}")))?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(Error::Responder("OpenAI returned an empty completion".into()));
        }

        Ok(content)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}
