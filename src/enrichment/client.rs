/// Semantic Scholar batch API client
///
/// One POST per batch of up to 500 arXiv ids. The response is a list parallel to
/// the request ids, with `null` for papers Semantic Scholar has not indexed.

use std::time::Duration;

use thiserror::Error;

use crate::config::SemanticScholarConfig;

/// Fields requested for every paper in a batch.
pub const BATCH_FIELDS: &str =
    "authors.authorId,authors.name,authors.affiliations,authors.hIndex,authors.citationCount,citationCount";

/// Errors from the Semantic Scholar API.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure (connection, DNS, TLS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// 429 response
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// 4xx other than 429
    #[error("Bad request ({status}): {message}")]
    BadRequest { status: u16, message: String },

    /// 5xx response
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    /// Body was not JSON
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Valid JSON that does not line up with the request
    #[error("Malformed batch response: {0}")]
    Malformed(String),
}

impl ClientError {
    /// Returns true if the same request may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Server { .. } | Self::Http(_))
    }
}

/// Thin client over the `/paper/batch` endpoint.
#[derive(Clone)]
pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(config: &SemanticScholarConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(SemanticScholarClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Look up a batch of bare arXiv ids.
    ///
    /// Returns one JSON value per id, in request order. Callers interpret each value
    /// with [`super::parse_batch_record`].
    pub async fn get_papers_batch(&self, arxiv_ids: &[String]) -> Result<Vec<serde_json::Value>, ClientError> {
        if arxiv_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = arxiv_ids.iter().map(|id| format!("ArXiv:{}", id)).collect();
        let url = format!("{}/paper/batch", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .query(&[("fields", BATCH_FIELDS)])
            .json(&serde_json::json!({ "ids": ids }));

        if let Some(ref key) = self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = self.handle_response(request.send().await?).await?;
        let body = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)?;

        let serde_json::Value::Array(records) = value else {
            return Err(ClientError::Malformed("expected a JSON array".to_string()));
        };

        if records.len() != arxiv_ids.len() {
            return Err(ClientError::Malformed(format!(
                "requested {} ids, got {} records",
                arxiv_ids.len(),
                records.len()
            )));
        }

        Ok(records)
    }

    /// Map non-success statuses onto ClientError variants.
    async fn handle_response(&self, response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);
                Err(ClientError::RateLimited { retry_after: Duration::from_secs(retry_after) })
            }
            400..=499 => {
                let message = response.text().await.unwrap_or_default();
                Err(ClientError::BadRequest { status: status.as_u16(), message })
            }
            500..=599 => {
                let message = response.text().await.unwrap_or_default();
                Err(ClientError::Server { status: status.as_u16(), message })
            }
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(ClientError::UnexpectedStatus { status: status.as_u16(), message })
            }
        }
    }
}
