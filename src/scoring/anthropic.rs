/// Anthropic Messages API scoring provider
///
/// Sends the evaluator instruction as the system prompt and the paper as the
/// single user turn. Requires an API key.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{PaperPrompt, ScoringError, ScoringProvider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

pub struct AnthropicScoringProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicScoringProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: Option<String>,
        api_key: String,
        model: String,
        max_tokens: u32,
    ) -> Self {
        AnthropicScoringProvider {
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
impl ScoringProvider for AnthropicScoringProvider {
    async fn assess(&self, prompt: &PaperPrompt) -> Result<String, ScoringError> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: prompt.system.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.user.clone(),
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
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

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ScoringError::Generation(format!("Failed to parse Anthropic response: {}", e)))?;

        // Concatenate text blocks; tool or thinking blocks are not expected here.
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect();

        if text.trim().is_empty() {
            return Err(ScoringError::Generation("Anthropic response had no text".to_string()));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_assess_sends_headers_and_reads_text_blocks() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "ak"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{ "type": "text", "text": "{\"score\": 9, \"summary\": \"Big.\"}" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = AnthropicScoringProvider::new(
            reqwest::Client::new(),
            Some(server.uri()),
            "ak".to_string(),
            "claude-haiku-4-5-20251001".to_string(),
            256,
        );
        let prompt = PaperPrompt {
            system: "sys".to_string(),
            user: "Title: T".to_string(),
        };
        let text = provider.assess(&prompt).await.unwrap();
        assert_eq!(
            super::super::parse_model_response(&text).map(|a| a.score),
            Some(9.0)
        );
    }

    #[tokio::test]
    async fn test_assess_overloaded_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = AnthropicScoringProvider::new(
            reqwest::Client::new(),
            Some(server.uri()),
            "ak".to_string(),
            "m".to_string(),
            256,
        );
        let prompt = PaperPrompt {
            system: String::new(),
            user: String::new(),
        };
        assert!(matches!(
            provider.assess(&prompt).await,
            Err(ScoringError::Api { status: 529, .. })
        ));
    }
}
