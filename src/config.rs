/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: arxiv-scout.toml (in working directory) or an explicit path
/// 3. Environment variables: prefixed SCOUT_, `__` separates nested keys
///    (e.g., SCOUT_SCORING__LLM_WEIGHT=0.7, SCOUT_SEMANTIC_SCHOLAR__API_KEY=...)

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Toml, Serialized},
};
use serde::{Deserialize, Serialize};
use crate::errors::ScoutError;

/// Default TOML file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "arxiv-scout.toml";

/// Semantic Scholar rejects batch requests with more than 500 ids.
pub const MAX_BATCH_SIZE: usize = 500;

/// Shared-pool pace for clients without an API key: one request per second.
pub const MIN_UNKEYED_REQUEST_INTERVAL_MS: u64 = 1000;

pub const MAX_RETRY_AFTER_HOURS: u64 = 24 * 365;
pub const MAX_RETRY_WINDOW_DAYS: u64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// SQLite database path. Supports sqlite:// URI scheme.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// arXiv listing categories fetched every run (e.g. "cs.LG", "hep-ph").
    #[serde(default)]
    pub categories: Vec<String>,

    /// Institution keywords matched case-insensitively against author affiliations.
    #[serde(default)]
    pub affiliation_keywords: Vec<String>,

    #[serde(default)]
    pub feed: FeedConfig,

    #[serde(default)]
    pub semantic_scholar: SemanticScholarConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub research_interests: ResearchInterests,

    #[serde(default)]
    pub email: EmailConfig,
}

/// Listing feed and arXiv search API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_api_url")]
    pub search_api_url: String,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on concurrent category fetches.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "default_backfill_page_size")]
    pub backfill_page_size: usize,
    /// arXiv asks for at least 3 seconds between search API calls.
    #[serde(default = "default_backfill_interval_ms")]
    pub backfill_interval_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Semantic Scholar batch enrichment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticScholarConfig {
    #[serde(default = "default_s2_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Minimum spacing between batch requests. At least 1000 without an API key.
    #[serde(default = "default_request_interval_ms")]
    pub request_interval_ms: u64,
    #[serde(default = "default_s2_timeout_secs")]
    pub timeout_secs: u64,
    /// Re-query papers that Semantic Scholar had not indexed yet.
    #[serde(default = "default_true")]
    pub retry_not_found: bool,
    #[serde(default = "default_retry_after_hours")]
    pub retry_after_hours: u64,
    #[serde(default = "default_retry_window_days")]
    pub retry_window_days: u64,
}

/// Score combination weights and model-call budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_heuristic_weight")]
    pub heuristic_weight: f64,
    #[serde(default = "default_llm_weight")]
    pub llm_weight: f64,
    /// Papers below this heuristic score never reach the model.
    #[serde(default = "default_min_heuristic_score_for_llm")]
    pub min_heuristic_score_for_llm: f64,
    #[serde(default = "default_max_llm_calls_per_run")]
    pub max_llm_calls_per_run: usize,
}

/// Text-generation provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// One of "anthropic", "openai" (any OpenAI-compatible endpoint) or "ollama".
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_abstract_chars")]
    pub max_abstract_chars: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

/// SMTP digest settings.
///
/// SMTP_EMAIL, SMTP_PASSWORD and SMTP_RECIPIENT override sender, password and
/// recipient when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Send the digest after every run-all.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub sender: Option<String>,
    /// For Gmail this must be an App Password.
    #[serde(default)]
    pub password: Option<String>,
    /// Defaults to the sender.
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default = "default_digest_top_n")]
    pub top_n: usize,
    /// Only papers fetched within this many days. 0 includes everything.
    #[serde(default = "default_digest_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_smtp_timeout_secs")]
    pub timeout_secs: u64,
}

/// Topics appended to the scoring prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchInterests {
    #[serde(default)]
    pub boost: Vec<String>,
    #[serde(default)]
    pub penalize: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    "sqlite://arxiv_scout.db".to_string()
}

fn default_feed_base_url() -> String {
    "https://rss.arxiv.org/rss".to_string()
}

fn default_search_api_url() -> String {
    "https://export.arxiv.org/api/query".to_string()
}

fn default_feed_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_fetches() -> usize {
    4
}

fn default_backfill_page_size() -> usize {
    100
}

fn default_backfill_interval_ms() -> u64 {
    3000
}

fn default_user_agent() -> String {
    format!("arxiv-scout/{}", env!("CARGO_PKG_VERSION"))
}

fn default_s2_base_url() -> String {
    "https://api.semanticscholar.org/graph/v1".to_string()
}

fn default_batch_size() -> usize {
    MAX_BATCH_SIZE
}

fn default_request_interval_ms() -> u64 {
    1000
}

fn default_s2_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_retry_after_hours() -> u64 {
    24
}

fn default_retry_window_days() -> u64 {
    7
}

fn default_heuristic_weight() -> f64 {
    0.4
}

fn default_llm_weight() -> f64 {
    0.6
}

fn default_min_heuristic_score_for_llm() -> f64 {
    3.0
}

fn default_max_llm_calls_per_run() -> usize {
    100
}

fn default_llm_provider() -> String {
    "anthropic".to_string()
}

fn default_llm_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_max_abstract_chars() -> usize {
    4000
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_digest_top_n() -> usize {
    20
}

fn default_digest_lookback_days() -> u32 {
    1
}

fn default_smtp_timeout_secs() -> u64 {
    30
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            base_url: default_feed_base_url(),
            search_api_url: default_search_api_url(),
            timeout_secs: default_feed_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            backfill_page_size: default_backfill_page_size(),
            backfill_interval_ms: default_backfill_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl FeedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SemanticScholarConfig {
    fn default() -> Self {
        SemanticScholarConfig {
            base_url: default_s2_base_url(),
            api_key: None,
            batch_size: default_batch_size(),
            request_interval_ms: default_request_interval_ms(),
            timeout_secs: default_s2_timeout_secs(),
            retry_not_found: true,
            retry_after_hours: default_retry_after_hours(),
            retry_window_days: default_retry_window_days(),
        }
    }
}

impl SemanticScholarConfig {
    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// How long a not-found paper waits before it is requested again.
    pub fn retry_after(&self) -> Result<chrono::TimeDelta, ScoutError> {
        i64::try_from(self.retry_after_hours)
            .ok()
            .and_then(chrono::TimeDelta::try_hours)
            .ok_or_else(|| {
                ScoutError::Config(format!(
                    "semantic_scholar.retry_after_hours is out of range: {}",
                    self.retry_after_hours
                ))
            })
    }

    /// How far back (by fetch time) not-found papers stay eligible for a retry.
    pub fn retry_window(&self) -> Result<chrono::TimeDelta, ScoutError> {
        i64::try_from(self.retry_window_days)
            .ok()
            .and_then(chrono::TimeDelta::try_days)
            .ok_or_else(|| {
                ScoutError::Config(format!(
                    "semantic_scholar.retry_window_days is out of range: {}",
                    self.retry_window_days
                ))
            })
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            heuristic_weight: default_heuristic_weight(),
            llm_weight: default_llm_weight(),
            min_heuristic_score_for_llm: default_min_heuristic_score_for_llm(),
            max_llm_calls_per_run: default_max_llm_calls_per_run(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            enabled: true,
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: None,
            api_key: None,
            max_tokens: default_max_tokens(),
            max_abstract_chars: default_max_abstract_chars(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        EmailConfig {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            sender: None,
            password: None,
            recipient: None,
            top_n: default_digest_top_n(),
            lookback_days: default_digest_lookback_days(),
            timeout_secs: default_smtp_timeout_secs(),
        }
    }
}

impl EmailConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            db_path: default_db_path(),
            categories: Vec::new(),
            affiliation_keywords: Vec::new(),
            feed: FeedConfig::default(),
            semantic_scholar: SemanticScholarConfig::default(),
            scoring: ScoringConfig::default(),
            llm: LlmConfig::default(),
            research_interests: ResearchInterests::default(),
            email: EmailConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, arxiv-scout.toml, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// Example: SCOUT_LOG_LEVEL=debug overrides log_level in arxiv-scout.toml
    pub fn load() -> Result<Config, ScoutError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Same as [`Config::load`] but reads the TOML layer from `path`.
    ///
    /// A missing file is not an error (figment skips it); defaults and env still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Config, ScoutError> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SCOUT_").split("__"))
            .extract()
            .map_err(|e| ScoutError::Config(format!("Failed to load config: {}", e)))
    }

    /// Reject configurations no stage can run with. Called once at startup.
    pub fn validate(&self) -> Result<(), ScoutError> {
        if self.categories.iter().all(|c| c.trim().is_empty()) {
            return Err(ScoutError::Config(
                "categories must list at least one feed category (e.g. categories = [\"cs.LG\"])"
                    .to_string(),
            ));
        }

        let batch = self.semantic_scholar.batch_size;
        if batch == 0 || batch > MAX_BATCH_SIZE {
            return Err(ScoutError::Config(format!(
                "semantic_scholar.batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, batch
            )));
        }

        let s2 = &self.semantic_scholar;
        if s2.request_interval_ms == 0 {
            return Err(ScoutError::Config(
                "semantic_scholar.request_interval_ms must be greater than 0".to_string(),
            ));
        }
        if s2.api_key.is_none() && s2.request_interval_ms < MIN_UNKEYED_REQUEST_INTERVAL_MS {
            return Err(ScoutError::Config(format!(
                "semantic_scholar.request_interval_ms must be at least {} without an api_key, got {}",
                MIN_UNKEYED_REQUEST_INTERVAL_MS, s2.request_interval_ms
            )));
        }
        if s2.retry_after_hours > MAX_RETRY_AFTER_HOURS {
            return Err(ScoutError::Config(format!(
                "semantic_scholar.retry_after_hours must be at most {}, got {}",
                MAX_RETRY_AFTER_HOURS, s2.retry_after_hours
            )));
        }
        if s2.retry_window_days > MAX_RETRY_WINDOW_DAYS {
            return Err(ScoutError::Config(format!(
                "semantic_scholar.retry_window_days must be at most {}, got {}",
                MAX_RETRY_WINDOW_DAYS, s2.retry_window_days
            )));
        }

        if self.feed.max_concurrent_fetches == 0 {
            return Err(ScoutError::Config(
                "feed.max_concurrent_fetches must be at least 1".to_string(),
            ));
        }

        for (name, weight) in [
            ("scoring.heuristic_weight", self.scoring.heuristic_weight),
            ("scoring.llm_weight", self.scoring.llm_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(ScoutError::Config(format!(
                    "{} must be a finite non-negative number, got {}",
                    name, weight
                )));
            }
        }

        let threshold = self.scoring.min_heuristic_score_for_llm;
        if !(0.0..=10.0).contains(&threshold) {
            return Err(ScoutError::Config(format!(
                "scoring.min_heuristic_score_for_llm must be within [0, 10], got {}",
                threshold
            )));
        }

        if !matches!(self.llm.provider.as_str(), "anthropic" | "openai" | "ollama") {
            return Err(ScoutError::Config(format!(
                "llm.provider must be one of anthropic, openai, ollama; got '{}'",
                self.llm.provider
            )));
        }

        if self.email.top_n == 0 {
            return Err(ScoutError::Config("email.top_n must be at least 1".to_string()));
        }

        if self.affiliation_keywords.is_empty() {
            tracing::warn!("affiliation_keywords is empty; affiliation scores will always be 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_file, None);
        assert_eq!(config.db_path, "sqlite://arxiv_scout.db");
        assert_eq!(config.semantic_scholar.batch_size, 500);
        assert_eq!(config.semantic_scholar.request_interval_ms, 1000);
        assert_eq!(config.scoring.heuristic_weight, 0.4);
        assert_eq!(config.scoring.llm_weight, 0.6);
        assert_eq!(config.scoring.min_heuristic_score_for_llm, 3.0);
        assert_eq!(config.llm.provider, "anthropic");
        assert!(!config.email.enabled);
        assert_eq!(config.email.smtp_port, 587);
        assert_eq!(config.email.top_n, 20);
    }

    #[test]
    fn test_validate_requires_categories() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScoutError::Config(msg) if msg.contains("categories")));
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let mut config = Config::default();
        config.categories = vec!["cs.LG".to_string()];
        config.semantic_scholar.batch_size = 501;
        assert!(config.validate().is_err());

        config.semantic_scholar.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_negative_weight_and_unknown_provider() {
        let mut config = Config::default();
        config.categories = vec!["cs.LG".to_string()];
        config.scoring.llm_weight = -0.1;
        assert!(config.validate().is_err());

        config.scoring.llm_weight = 0.6;
        config.llm.provider = "mystery".to_string();
        assert!(config.validate().is_err());

        config.llm.provider = "ollama".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_enforces_enrichment_pacing() {
        let mut config = Config::default();
        config.categories = vec!["cs.LG".to_string()];
        config.semantic_scholar.request_interval_ms = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScoutError::Config(msg) if msg.contains("request_interval_ms")));

        config.semantic_scholar.request_interval_ms = 200;
        assert!(config.validate().is_err());

        config.semantic_scholar.api_key = Some("key".to_string());
        assert!(config.validate().is_ok());

        config.semantic_scholar.request_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_retry_durations() {
        let mut config = Config::default();
        config.categories = vec!["cs.LG".to_string()];
        config.semantic_scholar.retry_window_days = 1_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScoutError::Config(msg) if msg.contains("retry_window_days")));

        config.semantic_scholar.retry_window_days = MAX_RETRY_WINDOW_DAYS;
        config.semantic_scholar.retry_after_hours = MAX_RETRY_AFTER_HOURS + 1;
        assert!(config.validate().is_err());

        config.semantic_scholar.retry_after_hours = MAX_RETRY_AFTER_HOURS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_durations_never_wrap() {
        let mut s2 = SemanticScholarConfig::default();
        assert_eq!(s2.retry_after().unwrap(), chrono::TimeDelta::hours(24));
        assert_eq!(s2.retry_window().unwrap(), chrono::TimeDelta::days(7));

        s2.retry_window_days = u64::MAX;
        assert!(matches!(s2.retry_window(), Err(ScoutError::Config(_))));
        s2.retry_after_hours = i64::MAX as u64;
        assert!(matches!(s2.retry_after(), Err(ScoutError::Config(_))));
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "scout.toml",
                r#"
                categories = ["hep-ph", "cs.LG"]
                affiliation_keywords = ["Google", "MIT"]

                [scoring]
                llm_weight = 0.5
                "#,
            )?;
            jail.set_env("SCOUT_SCORING__LLM_WEIGHT", "0.7");
            jail.set_env("SCOUT_SEMANTIC_SCHOLAR__API_KEY", "secret");

            let config = Config::load_from("scout.toml").expect("config loads");
            assert_eq!(config.categories, vec!["hep-ph", "cs.LG"]);
            assert_eq!(config.affiliation_keywords, vec!["Google", "MIT"]);
            assert_eq!(config.scoring.llm_weight, 0.7);
            assert_eq!(config.scoring.heuristic_weight, 0.4);
            assert_eq!(config.semantic_scholar.api_key.as_deref(), Some("secret"));
            assert!(config.validate().is_ok());
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = Config::load_from("does-not-exist.toml").expect("defaults load");
            assert!(config.categories.is_empty());
            assert_eq!(config.feed.max_concurrent_fetches, 4);
            Ok(())
        });
    }
}
