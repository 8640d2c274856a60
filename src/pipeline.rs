/// Pipeline orchestration: fetch, enrich, score
///
/// Each stage reads its work list from the store, so any stage can be rerun on
/// its own. run_all commits each stage fully before starting the next.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::enrichment::{EnrichReport, Enricher, SemanticScholarClient};
use crate::errors::ScoutError;
use crate::feed::{FeedReader, FeedRecord};
use crate::scoring::{ScoreReport, Scorer};
use crate::store::{InsertOutcome, NewPaper, PaperStore};

/// Counters for a fetch or backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    pub new_papers: usize,
    pub duplicates: usize,
    pub failed_categories: Vec<String>,
}

/// Outcome of a full fetch, enrich, score run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub fetch: FetchReport,
    pub enrich: EnrichReport,
    pub score: ScoreReport,
    pub elapsed_ms: u128,
}

pub struct Pipeline {
    store: Arc<dyn PaperStore>,
    feed: FeedReader,
    enricher: Enricher,
    scorer: Scorer,
    categories: Vec<String>,
    keywords: Vec<String>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn PaperStore>,
        feed: FeedReader,
        enricher: Enricher,
        scorer: Scorer,
        categories: Vec<String>,
        keywords: Vec<String>,
    ) -> Self {
        Pipeline {
            store,
            feed,
            enricher,
            scorer,
            categories,
            keywords,
        }
    }

    /// Wire every stage from a validated config.
    pub fn from_config(config: &Config, store: Arc<dyn PaperStore>) -> Result<Self, ScoutError> {
        let feed = FeedReader::new(config.feed.clone())
            .map_err(|e| ScoutError::Config(format!("Failed to build feed client: {}", e)))?;
        let client = SemanticScholarClient::new(&config.semantic_scholar)
            .map_err(|e| ScoutError::Config(format!("Failed to build Semantic Scholar client: {}", e)))?;
        if !client.has_api_key() {
            tracing::info!("No Semantic Scholar API key configured, using the shared rate limit");
        }
        let enricher = Enricher::new(client, config.semantic_scholar.clone());
        let scorer = Scorer::from_config(
            config.scoring.clone(),
            &config.llm,
            config.research_interests.clone(),
        );

        let categories = config
            .categories
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        Ok(Pipeline::new(
            store,
            feed,
            enricher,
            scorer,
            categories,
            config.affiliation_keywords.clone(),
        ))
    }

    /// Insert records, linking the feed byline as unresolved authors on new papers.
    async fn ingest(&self, records: Vec<FeedRecord>, report: &mut FetchReport) -> Result<(), ScoutError> {
        for record in records {
            let authors = record.authors;
            let paper = NewPaper {
                external_id: record.external_id,
                title: record.title,
                abstract_text: record.abstract_text,
                categories: record.categories,
                published_date: record.published,
                url: record.url,
            };

            match self.store.insert_paper(paper).await? {
                InsertOutcome::Inserted(paper_id) => {
                    for (position, name) in authors.iter().enumerate() {
                        let author_id = self.store.upsert_author(name, None, None, None).await?;
                        self.store
                            .link_paper_author(paper_id, author_id, position as i64)
                            .await?;
                    }
                    report.new_papers += 1;
                }
                InsertOutcome::AlreadyExists => report.duplicates += 1,
            }
        }
        Ok(())
    }

    /// Fetch today's listings for every configured category.
    pub async fn fetch(&self) -> Result<FetchReport, ScoutError> {
        let mut report = FetchReport::default();

        for fetch in self.feed.fetch_all(&self.categories).await {
            match fetch.result {
                Ok(records) => self.ingest(records, &mut report).await?,
                Err(_) => report.failed_categories.push(fetch.category),
            }
        }

        tracing::info!(
            new_papers = report.new_papers,
            duplicates = report.duplicates,
            failed_categories = report.failed_categories.len(),
            "Fetch complete"
        );
        Ok(report)
    }

    /// Load papers submitted in the last `days` days from the search API.
    pub async fn backfill(&self, days: u32) -> Result<FetchReport, ScoutError> {
        let mut report = FetchReport::default();

        for category in &self.categories {
            match self.feed.backfill_category(category, days).await {
                Ok(records) => self.ingest(records, &mut report).await?,
                Err(e) => {
                    tracing::warn!(category = %category, error = %e, "Backfill failed");
                    report.failed_categories.push(category.clone());
                }
            }
        }

        tracing::info!(
            days,
            new_papers = report.new_papers,
            duplicates = report.duplicates,
            "Backfill complete"
        );
        Ok(report)
    }

    pub async fn enrich(&self) -> Result<EnrichReport, ScoutError> {
        self.enricher.run(self.store.as_ref(), &self.keywords).await
    }

    pub async fn score(&self) -> Result<ScoreReport, ScoutError> {
        self.scorer.score_all(self.store.as_ref()).await
    }

    /// Fetch, then enrich, then score.
    pub async fn run_all(&self) -> Result<RunReport, ScoutError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("pipeline_run", %run_id);

        async move {
            let started = Instant::now();
            tracing::info!(categories = ?self.categories, "Pipeline run started");

            let fetch = self.fetch().await?;
            let enrich = self.enrich().await?;
            let score = self.score().await?;

            let elapsed_ms = started.elapsed().as_millis();
            tracing::info!(elapsed_ms = elapsed_ms as u64, "Pipeline run finished");

            Ok(RunReport {
                run_id,
                fetch,
                enrich,
                score,
                elapsed_ms,
            })
        }
        .instrument(span)
        .await
    }
}
