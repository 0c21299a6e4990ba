//! LLM client using RIG with the Groq provider.
//!
//! Every clinical agent interprets utterances through its own system prompt
//! and expects a strict JSON envelope back, so the client hands out
//! per-prompt [`JsonAgent`] handles rather than a single shared agent.

use rig::agent::Agent;
use rig::client::CompletionClient;
use rig::providers::groq;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;

/// Errors from LLM completion and response decoding.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),
    #[error("invalid JSON response from LLM: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Factory for per-agent Groq completion handles.
pub struct LlmClient {
    client: groq::Client,
    model: String,
    temperature: f64,
    max_tokens: u64,
}

impl LlmClient {
    /// Create a new LLM client.
    ///
    /// # Errors
    /// Returns an error if the Groq client cannot be constructed.
    pub fn new(config: &AppConfig) -> Result<Self, LlmError> {
        info!("Using Groq model: {}", config.groq_model);

        let client = groq::Client::builder()
            .api_key(&config.groq_api_key)
            .build()
            .map_err(|e| LlmError::Request(format!("Failed to create Groq client: {}", e)))?;

        Ok(Self { client, model: config.groq_model.clone(), temperature: config.temperature, max_tokens: config.max_tokens })
    }

    /// Build a completion handle bound to one agent's system prompt.
    pub fn json_agent(&self, system_prompt: &str) -> JsonAgent {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(system_prompt)
            .temperature(self.temperature)
            .max_tokens(self.max_tokens)
            .additional_params(json!({
                "response_format": {"type": "json_object"}
            }))
            .build();

        JsonAgent { agent }
    }
}

/// A completion handle that always decodes the reply as a JSON object.
pub struct JsonAgent {
    agent: Agent<groq::CompletionModel>,
}

impl JsonAgent {
    /// Ask the model to process one utterance, returning the decoded JSON.
    ///
    /// # Errors
    /// Returns an error if the request fails or the reply is not JSON even
    /// after the repair pass.
    pub async fn request(&self, utterance: &str) -> Result<Value, LlmError> {
        self.ask(&format!("Process this request: {}", utterance)).await
    }

    /// Send a fully-formed user message (e.g. a retrieval-augmented prompt)
    /// and decode the JSON reply.
    pub async fn ask(&self, content: &str) -> Result<Value, LlmError> {
        use rig::completion::Chat;

        debug!("LLM prompt: {}", content);

        let response = self.agent.chat(content, vec![]).await.map_err(|e| LlmError::Request(e.to_string()))?;
        let response = response.trim();

        debug!("LLM response: {}", response);

        match serde_json::from_str::<Value>(response) {
            Ok(value) => Ok(value),
            Err(first_err) => {
                // Models occasionally emit literally-escaped newlines and
                // quotes inside string values; strip them and retry once.
                warn!("LLM reply was not valid JSON ({}), attempting repair", first_err);
                let repaired = response.replace("\\n", " ").replace("\\\"", "\"");
                serde_json::from_str::<Value>(&repaired).map_err(|_| LlmError::InvalidJson(first_err))
            }
        }
    }
}
