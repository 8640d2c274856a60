/// Paper scoring: heuristic, model assessment and combined rank
///
/// The heuristic is a pure function of enrichment signals. Papers that clear the
/// heuristic threshold are also sent to a text-generation provider, whose JSON
/// verdict is blended in using the configured weights.

pub mod anthropic;
pub mod ollama;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LlmConfig, ResearchInterests, ScoringConfig};
use crate::errors::ScoutError;
use crate::store::{Paper, PaperStore};

pub use anthropic::AnthropicScoringProvider;
pub use ollama::OllamaScoringProvider;
pub use openai::OpenAIScoringProvider;

/// Errors that can occur while asking a provider for an assessment.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Transport failure or timeout
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Response envelope could not be read
    #[error("Generation error: {0}")]
    Generation(String),

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// What the model is asked to return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelAssessment {
    /// Novelty and impact, 1 (incremental) to 10 (groundbreaking)
    pub score: f64,
    /// Two or three sentence assessment
    #[serde(default)]
    pub summary: String,
}

/// System instruction and user message for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperPrompt {
    pub system: String,
    pub user: String,
}

impl PaperPrompt {
    pub fn for_paper(paper: &Paper, interests: &ResearchInterests, max_abstract_chars: usize) -> Self {
        PaperPrompt {
            system: build_system_prompt(interests),
            user: build_user_message(
                &paper.title,
                &paper.category_list().join(", "),
                &paper.abstract_text,
                max_abstract_chars,
            ),
        }
    }
}

/// Core trait for model-based paper assessment.
///
/// Implementations return the raw model text; interpretation is left to
/// [`parse_model_response`] so every provider shares one parser.
#[async_trait]
pub trait ScoringProvider: Send + Sync {
    async fn assess(&self, prompt: &PaperPrompt) -> Result<String, ScoringError>;

    /// Return the model name identifier used by this provider.
    fn model_name(&self) -> &str;
}

/// Deterministic 0-10 score from enrichment signals.
///
/// Affiliation: 2 points per distinct matched keyword, capped at 4.
/// Impact: max author h-index scaled linearly, saturating at 60 for 4 points.
/// Citations: log scale, saturating at 100 citations for 2 points.
pub fn heuristic_score(match_count: usize, max_h_index: Option<i64>, citation_count: Option<i64>) -> f64 {
    let affiliation = (match_count as f64 * 2.0).min(4.0);

    let impact = max_h_index
        .map(|h| (h.max(0) as f64 / 60.0 * 4.0).min(4.0))
        .unwrap_or(0.0);

    let citations = citation_count
        .map(|c| ((c.max(0) as f64).ln_1p() / 100f64.ln_1p() * 2.0).min(2.0))
        .unwrap_or(0.0);

    (affiliation + impact + citations).clamp(0.0, 10.0)
}

/// Blend heuristic and model scores. Without a model score the heuristic stands alone.
pub fn combined_score(heuristic: f64, model: Option<f64>, weights: &ScoringConfig) -> f64 {
    match model {
        Some(m) => weights.heuristic_weight * heuristic + weights.llm_weight * m,
        None => heuristic,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn assessment_from_value(value: &serde_json::Value) -> Option<ModelAssessment> {
    let obj = value.as_object()?;
    let score = match obj.get("score")? {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }
    let summary = obj
        .get("summary")
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    Some(ModelAssessment {
        score: score.clamp(0.0, 10.0),
        summary,
    })
}

/// Extract `{"score": n, "summary": "..."}` from model output.
///
/// Accepts raw JSON, fenced JSON or prose around a single object. The score is
/// clamped to [0, 10]; anything unusable yields None.
pub fn parse_model_response(text: &str) -> Option<ModelAssessment> {
    let cleaned = strip_code_fence(text);

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(cleaned) {
        return assessment_from_value(&value);
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    let value = serde_json::from_str::<serde_json::Value>(&cleaned[start..=end]).ok()?;
    assessment_from_value(&value)
}

/// Build the system instruction, with research interests appended when configured.
pub fn build_system_prompt(interests: &ResearchInterests) -> String {
    let mut prompt = String::from(
        "You are a research paper evaluator. Rate this paper's novelty and potential impact. \
         Respond with JSON only: {\"score\": <1-10>, \"summary\": \"<2-3 sentence assessment>\"}\n\
         Score guide: 1-3=incremental, 4-6=solid contribution, 7-8=significant, \
         9-10=potentially groundbreaking",
    );

    if interests.boost.is_empty() && interests.penalize.is_empty() {
        return prompt;
    }

    prompt.push_str("\n\nYour evaluation should reflect these research preferences:");
    if !interests.boost.is_empty() {
        prompt.push_str("\nBOOST (score higher) papers about: ");
        prompt.push_str(&interests.boost.join("; "));
    }
    if !interests.penalize.is_empty() {
        prompt.push_str("\nPENALIZE (score lower) papers about: ");
        prompt.push_str(&interests.penalize.join("; "));
    }
    prompt
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_user_message(title: &str, categories: &str, abstract_text: &str, max_abstract_chars: usize) -> String {
    let abstract_text = abstract_text.trim();
    let truncated = truncate_chars(abstract_text, max_abstract_chars);
    if truncated.len() < abstract_text.len() {
        tracing::debug!(
            abstract_chars = abstract_text.chars().count(),
            truncated_to = max_abstract_chars,
            "Abstract truncated for scoring"
        );
    }
    format!("Title: {}\nCategories: {}\nAbstract: {}", title, categories, truncated)
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client, ScoringError> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn resolve_api_key(configured: &Option<String>, env_var: &str) -> Option<String> {
    configured
        .clone()
        .or_else(|| std::env::var(env_var).ok())
        .filter(|k| !k.trim().is_empty())
}

/// Build the configured provider.
///
/// Errors with NotConfigured when a hosted provider has no API key.
pub fn create_provider(config: &LlmConfig) -> Result<Box<dyn ScoringProvider>, ScoringError> {
    let client = http_client(config)?;
    match config.provider.as_str() {
        "anthropic" => {
            let api_key = resolve_api_key(&config.api_key, "ANTHROPIC_API_KEY").ok_or_else(|| {
                ScoringError::NotConfigured(
                    "Anthropic API key is required. Set llm.api_key, SCOUT_LLM__API_KEY or ANTHROPIC_API_KEY"
                        .to_string(),
                )
            })?;
            Ok(Box::new(AnthropicScoringProvider::new(
                client,
                config.base_url.clone(),
                api_key,
                config.model.clone(),
                config.max_tokens,
            )))
        }
        "openai" => {
            let api_key = resolve_api_key(&config.api_key, "OPENAI_API_KEY");
            if api_key.is_none() && config.base_url.is_none() {
                return Err(ScoringError::NotConfigured(
                    "OpenAI API key is required for the default endpoint. \
                     Set llm.api_key, SCOUT_LLM__API_KEY or OPENAI_API_KEY"
                        .to_string(),
                ));
            }
            Ok(Box::new(OpenAIScoringProvider::new(
                client,
                config.base_url.clone(),
                api_key,
                config.model.clone(),
                config.max_tokens,
            )))
        }
        "ollama" => Ok(Box::new(OllamaScoringProvider::new(
            client,
            config.base_url.clone(),
            config.model.clone(),
        ))),
        other => Err(ScoringError::NotConfigured(format!("Unknown llm.provider '{}'", other))),
    }
}

/// Counters for one scoring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScoreReport {
    /// Papers that received a heuristic score in this pass
    pub heuristics_recorded: usize,
    /// Papers that received a combined score in this pass
    pub papers_scored: usize,
    pub below_threshold: usize,
    pub model_calls: usize,
    pub model_scored: usize,
    pub model_failed: usize,
    pub model_unparseable: usize,
    /// Eligible papers skipped because max_llm_calls_per_run was reached
    pub budget_exhausted: usize,
    /// Model scores left by an interrupted pass and blended in without a new call
    pub model_reused: usize,
}

/// Applies heuristic, model and combined scores to unscored papers.
pub struct Scorer {
    config: ScoringConfig,
    interests: ResearchInterests,
    max_abstract_chars: usize,
    provider: Option<Box<dyn ScoringProvider>>,
}

impl Scorer {
    /// `provider` None disables model scoring; combined then equals the heuristic.
    pub fn new(
        config: ScoringConfig,
        interests: ResearchInterests,
        max_abstract_chars: usize,
        provider: Option<Box<dyn ScoringProvider>>,
    ) -> Self {
        Scorer {
            config,
            interests,
            max_abstract_chars,
            provider,
        }
    }

    /// Build from config, disabling model scoring with a warning if the provider
    /// cannot be constructed.
    pub fn from_config(scoring: ScoringConfig, llm: &LlmConfig, interests: ResearchInterests) -> Self {
        let provider = if !llm.enabled {
            tracing::info!("Model scoring disabled by config");
            None
        } else {
            match create_provider(llm) {
                Ok(p) => {
                    tracing::info!(provider = %llm.provider, model = p.model_name(), "Model scoring enabled");
                    Some(p)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Model scoring unavailable, using heuristic scores only");
                    None
                }
            }
        };
        Scorer::new(scoring, interests, llm.max_abstract_chars, provider)
    }

    /// Ask the provider about one paper. Failures become None and are counted.
    async fn model_score(&self, provider: &dyn ScoringProvider, paper: &Paper, report: &mut ScoreReport) -> Option<ModelAssessment> {
        report.model_calls += 1;
        let prompt = PaperPrompt::for_paper(paper, &self.interests, self.max_abstract_chars);

        match provider.assess(&prompt).await {
            Ok(text) => {
                let parsed = parse_model_response(&text);
                if parsed.is_none() {
                    report.model_unparseable += 1;
                    tracing::warn!(paper_id = paper.id, external_id = %paper.external_id, "Unparseable model response");
                }
                parsed
            }
            Err(e) => {
                report.model_failed += 1;
                tracing::warn!(paper_id = paper.id, external_id = %paper.external_id, error = %e, "Model scoring failed");
                None
            }
        }
    }

    /// Score every paper that is missing a heuristic or a combined score.
    ///
    /// Heuristics are recorded first for all unscored papers with an abstract. The
    /// second pass then fills in the combined score for every paper that has a
    /// heuristic but no combined score, which also picks up papers left half-scored
    /// by an interrupted run. A model score already stored for such a paper is reused.
    pub async fn score_all(&self, store: &dyn PaperStore) -> Result<ScoreReport, ScoutError> {
        let mut report = ScoreReport::default();

        for paper in store.list_unscored_papers(true).await? {
            let signals = store.scoring_signals(paper.id).await?;
            let heuristic = heuristic_score(
                signals.matched_keywords.len(),
                signals.max_h_index,
                signals.citation_count,
            );
            store.record_heuristic_score(paper.id, heuristic).await?;
            report.heuristics_recorded += 1;
        }

        for paper in store.list_papers_missing_combined().await? {
            let Some(heuristic) = paper.heuristic_score else {
                continue;
            };

            let mut model = paper.llm_score;
            if model.is_some() {
                report.model_reused += 1;
            } else if heuristic < self.config.min_heuristic_score_for_llm {
                report.below_threshold += 1;
            } else if let Some(ref provider) = self.provider {
                if report.model_calls >= self.config.max_llm_calls_per_run {
                    report.budget_exhausted += 1;
                } else if let Some(assessment) = self.model_score(&**provider, &paper, &mut report).await {
                    store
                        .record_model_score(paper.id, assessment.score, &assessment.summary)
                        .await?;
                    report.model_scored += 1;
                    model = Some(assessment.score);
                }
            }

            let combined = combined_score(heuristic, model, &self.config);
            store.record_combined_score(paper.id, combined).await?;
            report.papers_scored += 1;

            tracing::debug!(
                paper_id = paper.id,
                heuristic,
                model = ?model,
                combined,
                "Paper scored"
            );
        }

        tracing::info!(
            heuristics = report.heuristics_recorded,
            scored = report.papers_scored,
            model_scored = report.model_scored,
            model_failed = report.model_failed + report.model_unparseable,
            "Scoring pass complete"
        );
        Ok(report)
    }
}
