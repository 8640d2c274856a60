/// OpenAI-compatible scoring provider
///
/// Calls a Chat Completions endpoint with json_object response format. The base
/// URL is configurable so local OpenAI-compatible servers work too; the API key
/// is optional only when a custom base URL is set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{PaperPrompt, ScoringError, ScoringProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Request body for the Chat Completions API
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

/// Response from the Chat Completions API
#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAIScoringProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAIScoringProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
    ) -> Self {
        OpenAIScoringProvider {
            client,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl ScoringProvider for OpenAIScoringProvider {
    async fn assess(&self, prompt: &PaperPrompt) -> Result<String, ScoringError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ScoringError::Api { status, message: body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Generation(format!("Failed to parse chat response: {}", e)))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ScoringError::Generation("Chat response had no content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
