/// Paper store abstraction layer
///
/// Provides the PaperStore trait and the records it persists: papers, authors,
/// paper-author links and affiliation matches. The Store is the single source of
/// truth for every pipeline stage; other components only hold in-flight copies.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ScoutError;

pub mod sqlite;

pub use sqlite::SqlitePaperStore;

/// Whether the Enricher has processed a paper.
///
/// Kept separate from author rows: a paper with feed-only placeholder authors is still
/// Pending, and a paper Semantic Scholar had never heard of is Attempted with found=false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EnrichmentState {
    Pending,
    Attempted { found: bool, at: DateTime<Utc> },
}

impl EnrichmentState {
    pub fn is_pending(&self) -> bool {
        matches!(self, EnrichmentState::Pending)
    }
}

/// A stored paper with enrichment and scoring state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    /// Internal row id
    pub id: i64,
    /// Bare arXiv id, version suffix stripped (e.g. "2602.12345")
    pub external_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Comma-joined category tags
    pub categories: String,
    pub published_date: Option<NaiveDate>,
    pub url: String,
    /// Unknown until Semantic Scholar returns a record for the paper
    pub citation_count: Option<i64>,
    pub heuristic_score: Option<f64>,
    pub llm_score: Option<f64>,
    pub llm_summary: Option<String>,
    pub combined_score: Option<f64>,
    pub fetched_at: DateTime<Utc>,
    pub scored_at: Option<DateTime<Utc>>,
    pub enrichment: EnrichmentState,
}

impl Paper {
    pub fn category_list(&self) -> Vec<&str> {
        self.categories
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect()
    }

    pub fn has_abstract(&self) -> bool {
        !self.abstract_text.trim().is_empty()
    }
}

/// Input type for inserting a freshly fetched paper.
///
/// The store generates id and fetched_at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewPaper {
    pub external_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub categories: Vec<String>,
    /// Defaults to the fetch date when the feed carries none
    pub published_date: Option<NaiveDate>,
    pub url: String,
}

/// Result of an insert: a duplicate external id is reported, not raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    /// Semantic Scholar author id; None for unresolved authors
    pub external_id: Option<String>,
    pub h_index: Option<i64>,
    pub citation_count: Option<i64>,
}

/// An author as linked to one paper, in byline order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperAuthor {
    #[serde(flatten)]
    pub author: Author,
    /// 0 = first author
    pub position: i64,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AffiliationMatch {
    pub id: i64,
    pub author_id: i64,
    /// Institution string as it appeared upstream
    pub institution_name: String,
    pub matched_keyword: String,
}

/// Enrichment signal aggregated over a paper's linked authors, consumed by the Scorer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringSignals {
    pub matched_keywords: BTreeSet<String>,
    pub max_h_index: Option<i64>,
    pub citation_count: Option<i64>,
}

/// Sort column for [`PaperStore::query_papers`]. Always descending, ties on id ascending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    CombinedScore,
    HeuristicScore,
    LlmScore,
    PublishedDate,
    FetchedAt,
    CitationCount,
}

impl OrderBy {
    pub fn column(&self) -> &'static str {
        match self {
            OrderBy::CombinedScore => "combined_score",
            OrderBy::HeuristicScore => "heuristic_score",
            OrderBy::LlmScore => "llm_score",
            OrderBy::PublishedDate => "published_date",
            OrderBy::FetchedAt => "fetched_at",
            OrderBy::CitationCount => "citation_count",
        }
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for OrderBy {
    type Err = ScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combined_score" => Ok(OrderBy::CombinedScore),
            "heuristic_score" => Ok(OrderBy::HeuristicScore),
            "llm_score" => Ok(OrderBy::LlmScore),
            "published_date" => Ok(OrderBy::PublishedDate),
            "fetched_at" => Ok(OrderBy::FetchedAt),
            "citation_count" => Ok(OrderBy::CitationCount),
            other => Err(ScoutError::validation(
                "order_by",
                &format!(
                    "unknown sort column '{}' (expected combined_score, heuristic_score, \
                     llm_score, published_date, fetched_at or citation_count)",
                    other
                ),
            )),
        }
    }
}

/// Filter and pagination for the presentation-layer query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperQuery {
    /// Minimum combined score; None keeps unscored papers visible
    pub min_score: Option<f64>,
    /// Exact category tag (e.g. "cs.LG")
    pub category: Option<String>,
    pub order_by: OrderBy,
    /// Page size (clamped to 1..=500)
    pub limit: i64,
    pub offset: i64,
    /// Only papers fetched on or after this date
    pub since: Option<NaiveDate>,
}

impl Default for PaperQuery {
    fn default() -> Self {
        PaperQuery {
            min_score: None,
            category: None,
            order_by: OrderBy::default(),
            limit: 50,
            offset: 0,
            since: None,
        }
    }
}

/// Row counts describing pipeline progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub papers: i64,
    pub pending_enrichment: i64,
    pub enriched_found: i64,
    pub enriched_not_found: i64,
    pub unscored: i64,
    pub model_scored: i64,
    pub authors: i64,
}

/// Core abstraction for paper persistence operations.
///
/// All implementations must be Send + Sync so a single handle can be shared by every stage.
/// Any constraint violation other than a duplicate paper id is returned as
/// ScoutError::Storage; callers do not retry.
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Insert a paper. A known external id yields AlreadyExists and leaves the row untouched.
    async fn insert_paper(&self, paper: NewPaper) -> Result<InsertOutcome, ScoutError>;

    async fn get_paper_by_external_id(&self, external_id: &str) -> Result<Option<Paper>, ScoutError>;

    /// Insert or refresh an author and return its internal id.
    ///
    /// With an external id the existing row's metrics are updated in place; without one
    /// a new row is always created (names are never used as identity).
    async fn upsert_author(
        &self,
        name: &str,
        external_id: Option<&str>,
        h_index: Option<i64>,
        citation_count: Option<i64>,
    ) -> Result<i64, ScoutError>;

    /// Link an author to a paper at a byline position. Re-linking is a no-op.
    async fn link_paper_author(&self, paper_id: i64, author_id: i64, position: i64) -> Result<(), ScoutError>;

    /// Record that an author's affiliation matched a keyword. Duplicates are ignored.
    async fn insert_affiliation_match(
        &self,
        author_id: i64,
        institution_name: &str,
        matched_keyword: &str,
    ) -> Result<(), ScoutError>;

    /// Papers never seen by the Enricher, oldest first.
    async fn list_unenriched_papers(&self) -> Result<Vec<Paper>, ScoutError>;

    /// Papers attempted with no upstream record, last tried before `retry_after` ago
    /// and fetched within `window`.
    async fn list_enrichment_retries(
        &self,
        retry_after: chrono::Duration,
        window: chrono::Duration,
    ) -> Result<Vec<Paper>, ScoutError>;

    /// Papers with no heuristic score yet, optionally skipping empty abstracts.
    async fn list_unscored_papers(&self, must_have_abstract: bool) -> Result<Vec<Paper>, ScoutError>;

    /// Papers with a heuristic score but no combined score, by id.
    async fn list_papers_missing_combined(&self) -> Result<Vec<Paper>, ScoutError>;

    async fn record_heuristic_score(&self, paper_id: i64, score: f64) -> Result<(), ScoutError>;

    async fn record_model_score(&self, paper_id: i64, score: f64, summary: &str) -> Result<(), ScoutError>;

    /// Set the combined score and stamp scored_at.
    async fn record_combined_score(&self, paper_id: i64, score: f64) -> Result<(), ScoutError>;

    async fn record_citation_count(&self, paper_id: i64, citation_count: i64) -> Result<(), ScoutError>;

    /// Set the enrichment marker. Called even when nothing was found.
    async fn mark_enrichment_attempted(&self, paper_id: i64, found: bool) -> Result<(), ScoutError>;

    /// Unlink unresolved (external_id IS NULL) authors from a paper and delete any that
    /// are left orphaned. Returns the number of links removed.
    async fn clear_unresolved_authors(&self, paper_id: i64) -> Result<u64, ScoutError>;

    async fn scoring_signals(&self, paper_id: i64) -> Result<ScoringSignals, ScoutError>;

    async fn get_paper_authors(&self, paper_id: i64) -> Result<Vec<PaperAuthor>, ScoutError>;

    async fn get_author_affiliations(&self, author_id: i64) -> Result<Vec<AffiliationMatch>, ScoutError>;

    /// Filtered, sorted, paginated view for presentation.
    async fn query_papers(&self, query: &PaperQuery) -> Result<Vec<Paper>, ScoutError>;

    async fn stats(&self) -> Result<StoreStats, ScoutError>;
}
