/// Bibliometric enrichment from Semantic Scholar
///
/// Resolves authors, h-indices, citation counts and affiliations for papers the
/// Enricher has not processed yet, and marks each processed paper so it is not
/// requested again.

pub mod client;

use std::collections::{BTreeSet, HashSet};

use governor::{Quota, RateLimiter};
use serde::Serialize;
use serde_json::Value;

use crate::config::SemanticScholarConfig;
use crate::errors::ScoutError;
use crate::store::{Paper, PaperStore};

pub use client::{ClientError, SemanticScholarClient};

type BatchLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// An author as returned inside a batch record.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedAuthor {
    pub external_id: Option<String>,
    pub name: String,
    pub affiliations: Vec<String>,
    pub h_index: Option<i64>,
    pub citation_count: Option<i64>,
}

/// Bibliometric data for one paper.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentRecord {
    pub citation_count: Option<i64>,
    pub authors: Vec<EnrichedAuthor>,
}

/// Counters for one enrichment pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub papers_considered: usize,
    pub batches_sent: usize,
    pub batches_failed: usize,
    pub found: usize,
    pub not_found: usize,
    pub authors_linked: usize,
    pub affiliation_matches: usize,
}

/// Keywords that occur (case-insensitively) in any of the affiliations.
///
/// Returns the keywords as configured, not the affiliation strings.
pub fn match_affiliations<A, K>(affiliations: &[A], keywords: &[K]) -> BTreeSet<String>
where
    A: AsRef<str>,
    K: AsRef<str>,
{
    let lowered: Vec<String> = affiliations.iter().map(|a| a.as_ref().to_lowercase()).collect();

    keywords
        .iter()
        .map(|k| k.as_ref())
        .filter(|kw| !kw.trim().is_empty())
        .filter(|kw| {
            let needle = kw.to_lowercase();
            lowered.iter().any(|aff| aff.contains(&needle))
        })
        .map(str::to_string)
        .collect()
}

fn as_count(value: Option<&Value>) -> Option<i64> {
    value.and_then(Value::as_i64).filter(|n| *n >= 0)
}

/// Interpret one element of a batch response.
///
/// `null` (paper not indexed) and non-objects are "no data", never an error.
pub fn parse_batch_record(value: &Value) -> Option<EnrichmentRecord> {
    let obj = value.as_object()?;

    let authors = obj
        .get("authors")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_object)
                .map(|a| EnrichedAuthor {
                    external_id: a
                        .get("authorId")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    name: a.get("name").and_then(Value::as_str).unwrap_or_default().trim().to_string(),
                    affiliations: a
                        .get("affiliations")
                        .and_then(Value::as_array)
                        .map(|affs| {
                            affs.iter()
                                .filter_map(Value::as_str)
                                .map(str::trim)
                                .filter(|s| !s.is_empty())
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default(),
                    h_index: as_count(a.get("hIndex")),
                    citation_count: as_count(a.get("citationCount")),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(EnrichmentRecord {
        citation_count: as_count(obj.get("citationCount")),
        authors,
    })
}

/// Batches pending papers through Semantic Scholar and writes the results.
pub struct Enricher {
    client: SemanticScholarClient,
    config: SemanticScholarConfig,
    /// None when request_interval_ms is 0, which `Config::validate` rejects.
    limiter: Option<BatchLimiter>,
}

impl Enricher {
    pub fn new(client: SemanticScholarClient, config: SemanticScholarConfig) -> Self {
        let limiter = Quota::with_period(config.request_interval()).map(RateLimiter::direct);
        Enricher {
            client,
            config,
            limiter,
        }
    }

    /// Enrich every pending paper, plus not-found papers due for a retry.
    pub async fn run(&self, store: &dyn PaperStore, keywords: &[String]) -> Result<EnrichReport, ScoutError> {
        let mut papers = store.list_unenriched_papers().await?;

        if self.config.retry_not_found {
            let retries = store
                .list_enrichment_retries(self.config.retry_after()?, self.config.retry_window()?)
                .await?;
            let mut seen: HashSet<i64> = papers.iter().map(|p| p.id).collect();
            papers.extend(retries.into_iter().filter(|p| seen.insert(p.id)));
        }

        self.enrich_batch(store, &papers, keywords).await
    }

    /// Enrich the given papers in request-sized batches, oldest first.
    ///
    /// A failed or malformed batch is logged and left unmarked; storage errors abort.
    pub async fn enrich_batch(
        &self,
        store: &dyn PaperStore,
        papers: &[Paper],
        keywords: &[String],
    ) -> Result<EnrichReport, ScoutError> {
        let mut report = EnrichReport {
            papers_considered: papers.len(),
            ..EnrichReport::default()
        };
        if papers.is_empty() {
            tracing::info!("No papers pending enrichment");
            return Ok(report);
        }

        let batch_size = self.config.batch_size.clamp(1, crate::config::MAX_BATCH_SIZE);

        for (batch_idx, batch) in papers.chunks(batch_size).enumerate() {
            if let Some(ref limiter) = self.limiter {
                limiter.until_ready().await;
            }

            let ids: Vec<String> = batch.iter().map(|p| p.external_id.clone()).collect();
            report.batches_sent += 1;

            let records = match self.client.get_papers_batch(&ids).await {
                Ok(records) => records,
                Err(e) => {
                    report.batches_failed += 1;
                    tracing::warn!(
                        batch = batch_idx,
                        papers = batch.len(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Semantic Scholar batch failed, papers left pending"
                    );
                    continue;
                }
            };

            for (paper, value) in batch.iter().zip(records.iter()) {
                match parse_batch_record(value) {
                    Some(record) => {
                        let (authors, matches) = self.apply_record(store, paper, &record, keywords).await?;
                        report.found += 1;
                        report.authors_linked += authors;
                        report.affiliation_matches += matches;
                    }
                    None => {
                        store.mark_enrichment_attempted(paper.id, false).await?;
                        report.not_found += 1;
                    }
                }
            }

            tracing::debug!(batch = batch_idx, papers = batch.len(), "Enrichment batch applied");
        }

        tracing::info!(
            considered = report.papers_considered,
            found = report.found,
            not_found = report.not_found,
            batches_failed = report.batches_failed,
            "Enrichment pass complete"
        );
        Ok(report)
    }

    /// Write one record: citations, resolved authors in byline order, affiliation
    /// matches, then the marker. Returns (authors linked, affiliation rows written).
    async fn apply_record(
        &self,
        store: &dyn PaperStore,
        paper: &Paper,
        record: &EnrichmentRecord,
        keywords: &[String],
    ) -> Result<(usize, usize), ScoutError> {
        if let Some(citations) = record.citation_count {
            store.record_citation_count(paper.id, citations).await?;
        }

        let removed = store.clear_unresolved_authors(paper.id).await?;
        if removed > 0 {
            tracing::debug!(paper_id = paper.id, removed, "Replaced feed byline");
        }

        let mut matches = 0;
        for (position, author) in record.authors.iter().enumerate() {
            let author_id = store
                .upsert_author(
                    &author.name,
                    author.external_id.as_deref(),
                    author.h_index,
                    author.citation_count,
                )
                .await?;
            store.link_paper_author(paper.id, author_id, position as i64).await?;

            for affiliation in &author.affiliations {
                for keyword in match_affiliations(std::slice::from_ref(affiliation), keywords) {
                    store.insert_affiliation_match(author_id, affiliation, &keyword).await?;
                    matches += 1;
                }
            }
        }

        store.mark_enrichment_attempted(paper.id, true).await?;
        Ok((record.authors.len(), matches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_match_affiliations_examples() {
        let keywords = ["Google", "MIT"];

        let matched = match_affiliations(&["Google DeepMind"], &keywords);
        assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec!["Google"]);

        let matched = match_affiliations(&["Massachusetts Institute of Technology (MIT)"], &keywords);
        assert_eq!(matched.into_iter().collect::<Vec<_>>(), vec!["MIT"]);

        let matched = match_affiliations(&["google research", "mit csail"], &keywords);
        assert_eq!(matched.len(), 2);

        assert!(match_affiliations(&["Stanford University"], &keywords).is_empty());
        assert!(match_affiliations::<&str, &str>(&[], &keywords).is_empty());
        assert!(match_affiliations(&["Google"], &Vec::<String>::new()).is_empty());
    }

    #[test]
    fn test_match_affiliations_is_order_independent() {
        let a = match_affiliations(&["OpenAI", "Google Brain"], &["Google", "OpenAI"]);
        let b = match_affiliations(&["Google Brain", "OpenAI"], &["OpenAI", "Google"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_batch_record_null_and_non_object() {
        assert_eq!(parse_batch_record(&Value::Null), None);
        assert_eq!(parse_batch_record(&json!("oops")), None);
        assert_eq!(parse_batch_record(&json!([1, 2])), None);
    }

    #[test]
    fn test_parse_batch_record_full() {
        let value = json!({
            "paperId": "abc",
            "citationCount": 12,
            "authors": [
                {
                    "authorId": "123",
                    "name": "Ada Lovelace",
                    "affiliations": ["Google DeepMind", ""],
                    "hIndex": 40,
                    "citationCount": 5000
                },
                { "authorId": null, "name": "Anon", "affiliations": null, "hIndex": null }
            ]
        });

        let record = parse_batch_record(&value).unwrap();
        assert_eq!(record.citation_count, Some(12));
        assert_eq!(record.authors.len(), 2);
        assert_eq!(record.authors[0].external_id.as_deref(), Some("123"));
        assert_eq!(record.authors[0].affiliations, vec!["Google DeepMind"]);
        assert_eq!(record.authors[0].h_index, Some(40));
        assert_eq!(record.authors[1].external_id, None);
        assert!(record.authors[1].affiliations.is_empty());
        assert_eq!(record.authors[1].h_index, None);
    }

    #[test]
    fn test_parse_batch_record_missing_fields() {
        let record = parse_batch_record(&json!({})).unwrap();
        assert_eq!(record, EnrichmentRecord { citation_count: None, authors: vec![] });
    }
}
