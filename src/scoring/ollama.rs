/// Ollama scoring provider
///
/// Calls the Ollama /api/chat endpoint with a structured output schema derived
/// from ModelAssessment. No API key required for self-hosted deployments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ModelAssessment, PaperPrompt, ScoringError, ScoringProvider};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Request body for Ollama /api/chat with structured output
#[derive(Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
    format: serde_json::Value,
}

#[derive(Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

/// Response from Ollama /api/chat
#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
}

#[derive(Deserialize)]
struct OllamaResponseMessage {
    content: String,
}

/// JSON schema constraining the model output
fn assessment_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(ModelAssessment))
        .unwrap_or_else(|_| serde_json::Value::String("json".to_string()))
}

pub struct OllamaScoringProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaScoringProvider {
    pub fn new(client: reqwest::Client, base_url: Option<String>, model: String) -> Self {
        OllamaScoringProvider {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model,
        }
    }
}

#[async_trait]
impl ScoringProvider for OllamaScoringProvider {
    async fn assess(&self, prompt: &PaperPrompt) -> Result<String, ScoringError> {
        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: vec![
                OllamaMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                OllamaMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            stream: false,
            options: OllamaOptions { temperature: 0.0 },
            format: assessment_schema(),
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ScoringError::Api { status, message: body });
        }

        let chat_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Generation(format!("Failed to parse Ollama response: {}", e)))?;

        Ok(chat_response.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
