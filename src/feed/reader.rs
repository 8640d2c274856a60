/// HTTP side of the feed reader
///
/// Fetches daily listings per category (bounded fan-out) and pages through the
/// arXiv search API for backfills. Performs no storage.

use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use governor::{Quota, RateLimiter};

use super::{parse_feed, parse_feed_page, FeedError, FeedRecord};
use crate::config::FeedConfig;

type PageLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Result of fetching one category.
#[derive(Debug)]
pub struct CategoryFetch {
    pub category: String,
    pub result: Result<Vec<FeedRecord>, FeedError>,
}

pub struct FeedReader {
    client: reqwest::Client,
    config: FeedConfig,
    /// Paces search API pages; None when the interval is zero.
    page_limiter: Option<PageLimiter>,
}

impl FeedReader {
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        let page_limiter = Quota::with_period(Duration::from_millis(config.backfill_interval_ms))
            .map(RateLimiter::direct);

        Ok(FeedReader {
            client,
            config,
            page_limiter,
        })
    }

    async fn get_bytes(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, FeedError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch and parse today's listing for one category.
    ///
    /// The requested category is added to every record that does not already carry it.
    pub async fn fetch_category(&self, category: &str) -> Result<Vec<FeedRecord>, FeedError> {
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), category);
        let bytes = self.get_bytes(self.client.get(&url)).await?;
        let mut records = parse_feed(&bytes)?;

        for record in &mut records {
            if !record.categories.iter().any(|c| c == category) {
                record.categories.insert(0, category.to_string());
            }
        }

        tracing::info!(category, papers = records.len(), "Fetched listing");
        Ok(records)
    }

    /// Fetch every category with bounded concurrency.
    ///
    /// One result per category, in input order. A failed category never affects the others.
    pub async fn fetch_all(&self, categories: &[String]) -> Vec<CategoryFetch> {
        let limit = self.config.max_concurrent_fetches.max(1);

        let mut results: Vec<(usize, CategoryFetch)> = stream::iter(categories.iter().enumerate())
            .map(|(idx, category)| async move {
                let result = self.fetch_category(category).await;
                if let Err(ref e) = result {
                    tracing::warn!(category = %category, error = %e, "Listing fetch failed");
                }
                (idx, CategoryFetch { category: category.clone(), result })
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        results.sort_by_key(|(idx, _)| *idx);
        results.into_iter().map(|(_, fetch)| fetch).collect()
    }

    /// Page through the search API for papers submitted in the last `days` days.
    ///
    /// Stops on an empty or short page, counting entries before id filtering. Pages
    /// are spaced by `backfill_interval_ms`.
    pub async fn backfill_category(&self, category: &str, days: u32) -> Result<Vec<FeedRecord>, FeedError> {
        let end = Utc::now();
        let start = end
            .checked_sub_days(chrono::Days::new(u64::from(days)))
            .ok_or(FeedError::Window { days })?;
        let query = format!(
            "cat:{} AND submittedDate:[{}0000 TO {}2359]",
            category,
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        );
        let page_size = self.config.backfill_page_size.max(1);

        let mut records = Vec::new();
        let mut offset = 0usize;
        loop {
            if let Some(ref limiter) = self.page_limiter {
                limiter.until_ready().await;
            }

            let request = self.client.get(&self.config.search_api_url).query(&[
                ("search_query", query.clone()),
                ("start", offset.to_string()),
                ("max_results", page_size.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ]);
            let bytes = self.get_bytes(request).await?;
            let page = parse_feed_page(&bytes)?;
            let page_len = page.entries;

            tracing::debug!(category, offset, page_len, kept = page.records.len(), "Fetched backfill page");
            records.extend(page.records);

            if page_len < page_size {
                break;
            }
            offset += page_size;
        }

        tracing::info!(category, days, papers = records.len(), "Backfill complete");
        Ok(records)
    }
}
