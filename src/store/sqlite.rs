/// SQLite-backed implementation of PaperStore
///
/// Uses sqlx with WAL mode for cross-restart persistence.
/// Runs migrations automatically on initialization.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow, SqliteSynchronous},
    Row,
};

use crate::errors::ScoutError;
use crate::store::{
    AffiliationMatch, Author, EnrichmentState, InsertOutcome, NewPaper, Paper, PaperAuthor,
    PaperQuery, PaperStore, ScoringSignals, StoreStats,
};

const PAPER_COLUMNS: &str = "id, external_id, title, abstract, categories, published_date, url, \
     citation_count, heuristic_score, llm_score, llm_summary, combined_score, fetched_at, \
     scored_at, enrichment_attempted_at, enrichment_found";

const MAX_PAGE_SIZE: i64 = 500;

/// SQLite-backed paper store using sqlx connection pool.
pub struct SqlitePaperStore {
    pool: SqlitePool,
}

impl SqlitePaperStore {
    /// Create a new SqlitePaperStore, opening (or creating) the database at db_path.
    ///
    /// Enables WAL mode and foreign keys.
    /// Automatically runs pending migrations on startup.
    pub async fn new(db_path: &str) -> Result<Self, ScoutError> {
        let opts = SqliteConnectOptions::from_str(db_path)
            .map_err(|e| ScoutError::Storage(format!("Invalid db_path '{}': {}", db_path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| ScoutError::Storage(format!("Failed to connect to database: {}", e)))?;

        Self::from_pool(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// Every SQLite connection to `:memory:` gets its own database, so the pool is pinned
    /// to a single connection that is never recycled.
    pub async fn in_memory() -> Result<Self, ScoutError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| ScoutError::Storage(e.to_string()))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .map_err(|e| ScoutError::Storage(format!("Failed to open in-memory database: {}", e)))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self, ScoutError> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(SqlitePaperStore { pool })
    }

    /// Underlying pool, for maintenance queries outside the PaperStore surface.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Fixed-width RFC 3339 so that TEXT comparison orders timestamps correctly.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, ScoutError> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|e| ScoutError::Storage(format!("Parse {} '{}': {}", column, raw, e)))
}

/// Map a sqlx row to a Paper struct manually (timestamps are stored as TEXT).
fn row_to_paper(row: &SqliteRow) -> Result<Paper, ScoutError> {
    let published_raw: Option<String> = row.try_get("published_date")?;
    let fetched_raw: String = row.try_get("fetched_at")?;
    let scored_raw: Option<String> = row.try_get("scored_at")?;
    let attempted_raw: Option<String> = row.try_get("enrichment_attempted_at")?;
    let found: i64 = row.try_get("enrichment_found")?;

    let published_date = published_raw
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| ScoutError::Storage(format!("Parse published_date '{}': {}", s, e)))
        })
        .transpose()?;

    let scored_at = scored_raw
        .as_deref()
        .map(|s| parse_timestamp("scored_at", s))
        .transpose()?;

    let enrichment = match attempted_raw {
        None => EnrichmentState::Pending,
        Some(raw) => EnrichmentState::Attempted {
            found: found != 0,
            at: parse_timestamp("enrichment_attempted_at", &raw)?,
        },
    };

    Ok(Paper {
        id: row.try_get("id")?,
        external_id: row.try_get("external_id")?,
        title: row.try_get("title")?,
        abstract_text: row.try_get("abstract")?,
        categories: row.try_get("categories")?,
        published_date,
        url: row.try_get("url")?,
        citation_count: row.try_get("citation_count")?,
        heuristic_score: row.try_get("heuristic_score")?,
        llm_score: row.try_get("llm_score")?,
        llm_summary: row.try_get("llm_summary")?,
        combined_score: row.try_get("combined_score")?,
        fetched_at: parse_timestamp("fetched_at", &fetched_raw)?,
        scored_at,
        enrichment,
    })
}

fn row_to_author(row: &SqliteRow) -> Result<Author, ScoutError> {
    Ok(Author {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        external_id: row.try_get("external_id")?,
        h_index: row.try_get("h_index")?,
        citation_count: row.try_get("citation_count")?,
    })
}

impl SqlitePaperStore {
    async fn fetch_papers(&self, sql: &str, binds: &[String]) -> Result<Vec<Paper>, ScoutError> {
        let mut q = sqlx::query(sql);
        for b in binds {
            q = q.bind(b);
        }
        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_paper).collect()
    }

    /// Run a single-row UPDATE and turn "no such paper" into NotFound.
    fn expect_one(paper_id: i64, rows_affected: u64) -> Result<(), ScoutError> {
        if rows_affected == 0 {
            return Err(ScoutError::NotFound { id: paper_id.to_string() });
        }
        Ok(())
    }

    async fn matched_keywords_for(&self, author_id: i64) -> Result<Vec<String>, ScoutError> {
        let keywords = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT matched_keyword FROM affiliations WHERE author_id = ? ORDER BY matched_keyword",
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keywords)
    }
}

#[async_trait]
impl PaperStore for SqlitePaperStore {
    async fn insert_paper(&self, paper: NewPaper) -> Result<InsertOutcome, ScoutError> {
        let external_id = paper.external_id.trim();
        if external_id.is_empty() {
            return Err(ScoutError::validation("external_id", "Paper external id cannot be empty"));
        }

        let now = Utc::now();
        let published = paper.published_date.unwrap_or_else(|| now.date_naive());
        let categories = paper
            .categories
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(",");

        // The UNIQUE constraint decides; concurrent inserts of one id cannot both succeed.
        let result = sqlx::query(
            "INSERT INTO papers (external_id, title, abstract, categories, published_date, url, fetched_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(external_id) DO NOTHING",
        )
        .bind(external_id)
        .bind(&paper.title)
        .bind(&paper.abstract_text)
        .bind(&categories)
        .bind(published.format("%Y-%m-%d").to_string())
        .bind(&paper.url)
        .bind(timestamp(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| ScoutError::Storage(format!("Failed to insert paper: {}", e)))?;

        if result.rows_affected() == 0 {
            return Ok(InsertOutcome::AlreadyExists);
        }
        Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
    }

    async fn get_paper_by_external_id(&self, external_id: &str) -> Result<Option<Paper>, ScoutError> {
        let sql = format!("SELECT {} FROM papers WHERE external_id = ?", PAPER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_paper).transpose()
    }

    async fn upsert_author(
        &self,
        name: &str,
        external_id: Option<&str>,
        h_index: Option<i64>,
        citation_count: Option<i64>,
    ) -> Result<i64, ScoutError> {
        let id = match external_id {
            Some(ext) => {
                // A missing metric in a fresh response keeps the last known value.
                sqlx::query_scalar::<_, i64>(
                    "INSERT INTO authors (name, external_id, h_index, citation_count) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(external_id) DO UPDATE SET \
                         name = excluded.name, \
                         h_index = COALESCE(excluded.h_index, authors.h_index), \
                         citation_count = COALESCE(excluded.citation_count, authors.citation_count) \
                     RETURNING id",
                )
                .bind(name)
                .bind(ext)
                .bind(h_index)
                .bind(citation_count)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ScoutError::Storage(format!("Failed to upsert author: {}", e)))?
            }
            None => {
                sqlx::query(
                    "INSERT INTO authors (name, external_id, h_index, citation_count) VALUES (?, NULL, ?, ?)",
                )
                .bind(name)
                .bind(h_index)
                .bind(citation_count)
                .execute(&self.pool)
                .await
                .map_err(|e| ScoutError::Storage(format!("Failed to insert author: {}", e)))?
                .last_insert_rowid()
            }
        };
        Ok(id)
    }

    async fn link_paper_author(&self, paper_id: i64, author_id: i64, position: i64) -> Result<(), ScoutError> {
        sqlx::query(
            "INSERT OR IGNORE INTO paper_authors (paper_id, author_id, position) VALUES (?, ?, ?)",
        )
        .bind(paper_id)
        .bind(author_id)
        .bind(position)
        .execute(&self.pool)
        .await
        .map_err(|e| ScoutError::Storage(format!("Failed to link author: {}", e)))?;
        Ok(())
    }

    async fn insert_affiliation_match(
        &self,
        author_id: i64,
        institution_name: &str,
        matched_keyword: &str,
    ) -> Result<(), ScoutError> {
        sqlx::query(
            "INSERT OR IGNORE INTO affiliations (author_id, institution_name, matched_keyword) VALUES (?, ?, ?)",
        )
        .bind(author_id)
        .bind(institution_name)
        .bind(matched_keyword)
        .execute(&self.pool)
        .await
        .map_err(|e| ScoutError::Storage(format!("Failed to insert affiliation: {}", e)))?;
        Ok(())
    }

    async fn list_unenriched_papers(&self) -> Result<Vec<Paper>, ScoutError> {
        let sql = format!(
            "SELECT {} FROM papers WHERE enrichment_attempted_at IS NULL ORDER BY fetched_at ASC, id ASC",
            PAPER_COLUMNS
        );
        self.fetch_papers(&sql, &[]).await
    }

    async fn list_enrichment_retries(
        &self,
        retry_after: chrono::Duration,
        window: chrono::Duration,
    ) -> Result<Vec<Paper>, ScoutError> {
        let now = Utc::now();
        let cutoff = |span: chrono::Duration, name: &str| {
            now.checked_sub_signed(span).ok_or_else(|| {
                ScoutError::validation(name, &format!("Retry {} of {} is out of range", name, span))
            })
        };
        let attempted_before = cutoff(retry_after, "retry_after")?;
        let fetched_after = cutoff(window, "window")?;

        let sql = format!(
            "SELECT {} FROM papers \
             WHERE enrichment_attempted_at IS NOT NULL \
               AND enrichment_found = 0 \
               AND enrichment_attempted_at < ? \
               AND fetched_at > ? \
             ORDER BY fetched_at ASC, id ASC",
            PAPER_COLUMNS
        );
        self.fetch_papers(&sql, &[timestamp(&attempted_before), timestamp(&fetched_after)])
            .await
    }

    async fn list_unscored_papers(&self, must_have_abstract: bool) -> Result<Vec<Paper>, ScoutError> {
        let abstract_filter = if must_have_abstract {
            " AND TRIM(abstract) <> ''"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM papers WHERE heuristic_score IS NULL{} ORDER BY id ASC",
            PAPER_COLUMNS, abstract_filter
        );
        self.fetch_papers(&sql, &[]).await
    }

    async fn list_papers_missing_combined(&self) -> Result<Vec<Paper>, ScoutError> {
        let sql = format!(
            "SELECT {} FROM papers \
             WHERE heuristic_score IS NOT NULL AND combined_score IS NULL \
             ORDER BY id ASC",
            PAPER_COLUMNS
        );
        self.fetch_papers(&sql, &[]).await
    }

    async fn record_heuristic_score(&self, paper_id: i64, score: f64) -> Result<(), ScoutError> {
        let result = sqlx::query("UPDATE papers SET heuristic_score = ? WHERE id = ?")
            .bind(score)
            .bind(paper_id)
            .execute(&self.pool)
            .await?;
        Self::expect_one(paper_id, result.rows_affected())
    }

    async fn record_model_score(&self, paper_id: i64, score: f64, summary: &str) -> Result<(), ScoutError> {
        let result = sqlx::query("UPDATE papers SET llm_score = ?, llm_summary = ? WHERE id = ?")
            .bind(score)
            .bind(summary)
            .bind(paper_id)
            .execute(&self.pool)
            .await?;
        Self::expect_one(paper_id, result.rows_affected())
    }

    async fn record_combined_score(&self, paper_id: i64, score: f64) -> Result<(), ScoutError> {
        let result = sqlx::query("UPDATE papers SET combined_score = ?, scored_at = ? WHERE id = ?")
            .bind(score)
            .bind(timestamp(&Utc::now()))
            .bind(paper_id)
            .execute(&self.pool)
            .await?;
        Self::expect_one(paper_id, result.rows_affected())
    }

    async fn record_citation_count(&self, paper_id: i64, citation_count: i64) -> Result<(), ScoutError> {
        let result = sqlx::query("UPDATE papers SET citation_count = ? WHERE id = ?")
            .bind(citation_count)
            .bind(paper_id)
            .execute(&self.pool)
            .await?;
        Self::expect_one(paper_id, result.rows_affected())
    }

    async fn mark_enrichment_attempted(&self, paper_id: i64, found: bool) -> Result<(), ScoutError> {
        let result = sqlx::query(
            "UPDATE papers SET enrichment_attempted_at = ?, enrichment_found = ? WHERE id = ?",
        )
        .bind(timestamp(&Utc::now()))
        .bind(found)
        .bind(paper_id)
        .execute(&self.pool)
        .await?;
        Self::expect_one(paper_id, result.rows_affected())
    }

    async fn clear_unresolved_authors(&self, paper_id: i64) -> Result<u64, ScoutError> {
        let mut tx = self.pool.begin().await?;

        let unresolved: Vec<i64> = sqlx::query_scalar(
            "SELECT pa.author_id FROM paper_authors pa \
             JOIN authors a ON a.id = pa.author_id \
             WHERE pa.paper_id = ? AND a.external_id IS NULL",
        )
        .bind(paper_id)
        .fetch_all(&mut *tx)
        .await?;

        for author_id in &unresolved {
            sqlx::query("DELETE FROM paper_authors WHERE paper_id = ? AND author_id = ?")
                .bind(paper_id)
                .bind(author_id)
                .execute(&mut *tx)
                .await?;

            let still_linked: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM paper_authors WHERE author_id = ?")
                    .bind(author_id)
                    .fetch_one(&mut *tx)
                    .await?;

            if still_linked == 0 {
                sqlx::query("DELETE FROM affiliations WHERE author_id = ?")
                    .bind(author_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM authors WHERE id = ?")
                    .bind(author_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        tx.commit().await?;
        Ok(unresolved.len() as u64)
    }

    async fn scoring_signals(&self, paper_id: i64) -> Result<ScoringSignals, ScoutError> {
        let citation_count: Option<i64> =
            sqlx::query_scalar::<_, Option<i64>>("SELECT citation_count FROM papers WHERE id = ?")
                .bind(paper_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| ScoutError::NotFound { id: paper_id.to_string() })?;

        let keywords = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT af.matched_keyword FROM affiliations af \
             JOIN paper_authors pa ON pa.author_id = af.author_id \
             WHERE pa.paper_id = ?",
        )
        .bind(paper_id)
        .fetch_all(&self.pool)
        .await?;

        let max_h_index = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(a.h_index) FROM authors a \
             JOIN paper_authors pa ON pa.author_id = a.id \
             WHERE pa.paper_id = ?",
        )
        .bind(paper_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ScoringSignals {
            matched_keywords: keywords.into_iter().collect(),
            max_h_index,
            citation_count,
        })
    }

    async fn get_paper_authors(&self, paper_id: i64) -> Result<Vec<PaperAuthor>, ScoutError> {
        let rows = sqlx::query(
            "SELECT a.id, a.name, a.external_id, a.h_index, a.citation_count, pa.position \
             FROM authors a JOIN paper_authors pa ON a.id = pa.author_id \
             WHERE pa.paper_id = ? \
             ORDER BY pa.position ASC, a.id ASC",
        )
        .bind(paper_id)
        .fetch_all(&self.pool)
        .await?;

        let mut authors = Vec::with_capacity(rows.len());
        for row in &rows {
            let author = row_to_author(row)?;
            let matched_keywords = self.matched_keywords_for(author.id).await?;
            authors.push(PaperAuthor {
                position: row.try_get("position")?,
                author,
                matched_keywords,
            });
        }
        Ok(authors)
    }

    async fn get_author_affiliations(&self, author_id: i64) -> Result<Vec<AffiliationMatch>, ScoutError> {
        let rows = sqlx::query(
            "SELECT id, author_id, institution_name, matched_keyword FROM affiliations \
             WHERE author_id = ? ORDER BY id ASC",
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AffiliationMatch {
                    id: row.try_get("id")?,
                    author_id: row.try_get("author_id")?,
                    institution_name: row.try_get("institution_name")?,
                    matched_keyword: row.try_get("matched_keyword")?,
                })
            })
            .collect()
    }

    async fn query_papers(&self, query: &PaperQuery) -> Result<Vec<Paper>, ScoutError> {
        let limit = query.limit.clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.max(0);

        let mut conditions: Vec<&str> = Vec::new();
        if query.min_score.is_some() {
            conditions.push("combined_score >= ?");
        }
        if query.category.is_some() {
            conditions.push("instr(',' || categories || ',', ?) > 0");
        }
        if query.since.is_some() {
            conditions.push("fetched_at >= ?");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Column name comes from the OrderBy enum, never from caller text.
        let sql = format!(
            "SELECT {} FROM papers {} ORDER BY {} DESC NULLS LAST, id ASC LIMIT ? OFFSET ?",
            PAPER_COLUMNS,
            where_clause,
            query.order_by.column()
        );

        let mut q = sqlx::query(&sql);
        if let Some(min) = query.min_score {
            q = q.bind(min);
        }
        if let Some(ref category) = query.category {
            q = q.bind(format!(",{},", category.trim()));
        }
        if let Some(since) = query.since {
            q = q.bind(since.format("%Y-%m-%d").to_string());
        }
        q = q.bind(limit).bind(offset);

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_paper).collect()
    }

    async fn stats(&self) -> Result<StoreStats, ScoutError> {
        let row = sqlx::query(
            "SELECT \
                 COUNT(*) AS papers, \
                 COALESCE(SUM(CASE WHEN enrichment_attempted_at IS NULL THEN 1 ELSE 0 END), 0) AS pending_enrichment, \
                 COALESCE(SUM(CASE WHEN enrichment_attempted_at IS NOT NULL AND enrichment_found = 1 THEN 1 ELSE 0 END), 0) AS enriched_found, \
                 COALESCE(SUM(CASE WHEN enrichment_attempted_at IS NOT NULL AND enrichment_found = 0 THEN 1 ELSE 0 END), 0) AS enriched_not_found, \
                 COALESCE(SUM(CASE WHEN heuristic_score IS NULL THEN 1 ELSE 0 END), 0) AS unscored, \
                 COALESCE(SUM(CASE WHEN llm_score IS NOT NULL THEN 1 ELSE 0 END), 0) AS model_scored \
             FROM papers",
        )
        .fetch_one(&self.pool)
        .await?;

        let authors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authors")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            papers: row.try_get("papers")?,
            pending_enrichment: row.try_get("pending_enrichment")?,
            enriched_found: row.try_get("enriched_found")?,
            enriched_not_found: row.try_get("enriched_not_found")?,
            unscored: row.try_get("unscored")?,
            model_scored: row.try_get("model_scored")?,
            authors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_paper(id: &str) -> NewPaper {
        NewPaper {
            external_id: id.to_string(),
            title: format!("Paper {}", id),
            abstract_text: "We study things.".to_string(),
            categories: vec!["cs.LG".to_string()],
            published_date: NaiveDate::from_ymd_opt(2026, 2, 20),
            url: format!("https://arxiv.org/abs/{}", id),
        }
    }

    async fn insert(store: &SqlitePaperStore, id: &str) -> i64 {
        match store.insert_paper(new_paper(id)).await.unwrap() {
            InsertOutcome::Inserted(pid) => pid,
            InsertOutcome::AlreadyExists => panic!("{} already existed", id),
        }
    }

    #[tokio::test]
    async fn test_insert_paper_is_deduplicated() {
        let store = SqlitePaperStore::in_memory().await.unwrap();

        let first = store.insert_paper(new_paper("2602.12345")).await.unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));

        let second = store.insert_paper(new_paper("2602.12345")).await.unwrap();
        assert_eq!(second, InsertOutcome::AlreadyExists);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM papers WHERE external_id = ?")
            .bind("2602.12345")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_blank_external_id() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let err = store.insert_paper(new_paper("  ")).await.unwrap_err();
        assert!(matches!(err, ScoutError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_get_paper_by_external_id() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        insert(&store, "2602.00001").await;

        let paper = store.get_paper_by_external_id("2602.00001").await.unwrap().unwrap();
        assert_eq!(paper.title, "Paper 2602.00001");
        assert_eq!(paper.categories, "cs.LG");
        assert_eq!(paper.published_date, NaiveDate::from_ymd_opt(2026, 2, 20));
        assert_eq!(paper.citation_count, None);
        assert!(paper.enrichment.is_pending());

        assert!(store.get_paper_by_external_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_author_by_external_id_updates_in_place() {
        let store = SqlitePaperStore::in_memory().await.unwrap();

        let a = store.upsert_author("Alice", Some("s2-1"), Some(10), Some(100)).await.unwrap();
        let b = store.upsert_author("Alice Smith", Some("s2-1"), Some(12), None).await.unwrap();
        assert_eq!(a, b);

        let row = sqlx::query("SELECT name, h_index, citation_count FROM authors WHERE id = ?")
            .bind(a)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("name"), "Alice Smith");
        assert_eq!(row.get::<i64, _>("h_index"), 12);
        assert_eq!(row.get::<i64, _>("citation_count"), 100);
    }

    #[tokio::test]
    async fn test_upsert_author_without_external_id_never_merges() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let a = store.upsert_author("J. Smith", None, None, None).await.unwrap();
        let b = store.upsert_author("J. Smith", None, None, None).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_link_paper_author_is_idempotent() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00002").await;
        let aid = store.upsert_author("Bob", Some("s2-2"), Some(5), None).await.unwrap();

        store.link_paper_author(pid, aid, 0).await.unwrap();
        store.link_paper_author(pid, aid, 0).await.unwrap();

        let authors = store.get_paper_authors(pid).await.unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].position, 0);
        assert_eq!(authors[0].author.name, "Bob");
    }

    #[tokio::test]
    async fn test_affiliation_matches_and_signals() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00003").await;
        let a1 = store.upsert_author("A", Some("s2-a"), Some(20), None).await.unwrap();
        let a2 = store.upsert_author("B", Some("s2-b"), Some(45), None).await.unwrap();
        store.link_paper_author(pid, a1, 0).await.unwrap();
        store.link_paper_author(pid, a2, 1).await.unwrap();

        store.insert_affiliation_match(a1, "Google DeepMind", "Google").await.unwrap();
        store.insert_affiliation_match(a1, "Google DeepMind", "DeepMind").await.unwrap();
        store.insert_affiliation_match(a1, "Google DeepMind", "Google").await.unwrap();
        store.insert_affiliation_match(a2, "Google Research", "Google").await.unwrap();
        store.record_citation_count(pid, 7).await.unwrap();

        assert_eq!(store.get_author_affiliations(a1).await.unwrap().len(), 2);

        let signals = store.scoring_signals(pid).await.unwrap();
        assert_eq!(
            signals.matched_keywords.into_iter().collect::<Vec<_>>(),
            vec!["DeepMind".to_string(), "Google".to_string()]
        );
        assert_eq!(signals.max_h_index, Some(45));
        assert_eq!(signals.citation_count, Some(7));

        let authors = store.get_paper_authors(pid).await.unwrap();
        assert_eq!(authors[0].matched_keywords, vec!["DeepMind", "Google"]);
        assert_eq!(authors[1].matched_keywords, vec!["Google"]);
    }

    #[tokio::test]
    async fn test_signals_for_paper_without_authors() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00004").await;
        let signals = store.scoring_signals(pid).await.unwrap();
        assert_eq!(signals, ScoringSignals::default());

        let err = store.scoring_signals(9999).await.unwrap_err();
        assert!(matches!(err, ScoutError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_enrichment_marker_removes_paper_from_unenriched() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let p1 = insert(&store, "2602.00005").await;
        let p2 = insert(&store, "2602.00006").await;

        let pending: Vec<i64> = store.list_unenriched_papers().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(pending, vec![p1, p2]);

        store.mark_enrichment_attempted(p1, false).await.unwrap();
        let pending: Vec<i64> = store.list_unenriched_papers().await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(pending, vec![p2]);

        let paper = store.get_paper_by_external_id("2602.00005").await.unwrap().unwrap();
        assert!(matches!(paper.enrichment, EnrichmentState::Attempted { found: false, .. }));
    }

    #[tokio::test]
    async fn test_placeholder_authors_do_not_count_as_enriched() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00007").await;
        let placeholder = store.upsert_author("Feed Name", None, None, None).await.unwrap();
        store.link_paper_author(pid, placeholder, 0).await.unwrap();

        assert_eq!(store.list_unenriched_papers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enrichment_retries_respect_cooldown() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00008").await;
        store.mark_enrichment_attempted(pid, false).await.unwrap();

        let within_cooldown = store
            .list_enrichment_retries(chrono::Duration::hours(24), chrono::Duration::days(7))
            .await
            .unwrap();
        assert!(within_cooldown.is_empty());

        let no_cooldown = store
            .list_enrichment_retries(chrono::Duration::zero() - chrono::Duration::seconds(1), chrono::Duration::days(7))
            .await
            .unwrap();
        assert_eq!(no_cooldown.len(), 1);

        store.mark_enrichment_attempted(pid, true).await.unwrap();
        let found = store
            .list_enrichment_retries(chrono::Duration::zero() - chrono::Duration::seconds(1), chrono::Duration::days(7))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_retries_reject_overflowing_window() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let result = store
            .list_enrichment_retries(chrono::Duration::hours(24), chrono::Duration::MAX)
            .await;
        assert!(matches!(result, Err(ScoutError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_clear_unresolved_authors_keeps_resolved_links() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00009").await;
        let placeholder = store.upsert_author("Feed Name", None, None, None).await.unwrap();
        let resolved = store.upsert_author("Resolved", Some("s2-r"), Some(3), None).await.unwrap();
        store.link_paper_author(pid, placeholder, 0).await.unwrap();
        store.link_paper_author(pid, resolved, 1).await.unwrap();

        let removed = store.clear_unresolved_authors(pid).await.unwrap();
        assert_eq!(removed, 1);

        let authors = store.get_paper_authors(pid).await.unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].author.id, resolved);

        let orphan: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM authors WHERE id = ?")
            .bind(placeholder)
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(orphan, 0);
    }

    #[tokio::test]
    async fn test_unscored_excludes_empty_abstracts() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let with_abstract = insert(&store, "2602.00010").await;
        let mut blank = new_paper("2602.00011");
        blank.abstract_text = "   ".to_string();
        store.insert_paper(blank).await.unwrap();

        let unscored: Vec<i64> = store.list_unscored_papers(true).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(unscored, vec![with_abstract]);
        assert_eq!(store.list_unscored_papers(false).await.unwrap().len(), 2);

        store.record_heuristic_score(with_abstract, 4.0).await.unwrap();
        assert!(store.list_unscored_papers(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_combined_lists_half_scored_papers() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        insert(&store, "2602.00020").await;
        let half = insert(&store, "2602.00021").await;
        let done = insert(&store, "2602.00022").await;

        store.record_heuristic_score(half, 3.0).await.unwrap();
        store.record_heuristic_score(done, 5.0).await.unwrap();
        store.record_combined_score(done, 5.0).await.unwrap();

        let pending: Vec<i64> = store
            .list_papers_missing_combined()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(pending, vec![half]);
    }

    #[tokio::test]
    async fn test_score_updates_are_targeted() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let pid = insert(&store, "2602.00012").await;

        store.record_heuristic_score(pid, 6.5).await.unwrap();
        store.record_model_score(pid, 8.0, "Strong.").await.unwrap();
        store.record_combined_score(pid, 7.4).await.unwrap();
        store.record_heuristic_score(pid, 6.0).await.unwrap();

        let paper = store.get_paper_by_external_id("2602.00012").await.unwrap().unwrap();
        assert_eq!(paper.heuristic_score, Some(6.0));
        assert_eq!(paper.llm_score, Some(8.0));
        assert_eq!(paper.llm_summary.as_deref(), Some("Strong."));
        assert_eq!(paper.combined_score, Some(7.4));
        assert!(paper.scored_at.is_some());

        let err = store.record_heuristic_score(424242, 1.0).await.unwrap_err();
        assert!(matches!(err, ScoutError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_papers_orders_ties_by_id() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let a = insert(&store, "2602.00013").await;
        let b = insert(&store, "2602.00014").await;
        let c = insert(&store, "2602.00015").await;
        store.record_combined_score(a, 5.0).await.unwrap();
        store.record_combined_score(b, 5.0).await.unwrap();
        store.record_combined_score(c, 9.0).await.unwrap();

        let query = PaperQuery::default();
        let first: Vec<i64> = store.query_papers(&query).await.unwrap().iter().map(|p| p.id).collect();
        let second: Vec<i64> = store.query_papers(&query).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(first, vec![c, a, b]);
        assert_eq!(first, second);

        let page = PaperQuery { limit: 1, offset: 1, ..PaperQuery::default() };
        let ids: Vec<i64> = store.query_papers(&page).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a]);
    }

    #[tokio::test]
    async fn test_query_papers_filters() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let ml = insert(&store, "2602.00016").await;
        let mut physics = new_paper("2602.00017");
        physics.categories = vec!["hep-ph".to_string(), "hep-ex".to_string()];
        let physics = match store.insert_paper(physics).await.unwrap() {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::AlreadyExists => unreachable!(),
        };
        let unscored = insert(&store, "2602.00018").await;
        store.record_combined_score(ml, 2.0).await.unwrap();
        store.record_combined_score(physics, 8.0).await.unwrap();

        let all = store.query_papers(&PaperQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3, "unscored papers stay visible without min_score");
        assert_eq!(all.last().unwrap().id, unscored, "NULL scores sort last");

        let high = PaperQuery { min_score: Some(5.0), ..PaperQuery::default() };
        let ids: Vec<i64> = store.query_papers(&high).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![physics]);

        let hep = PaperQuery { category: Some("hep-ex".to_string()), ..PaperQuery::default() };
        let ids: Vec<i64> = store.query_papers(&hep).await.unwrap().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![physics]);

        let partial = PaperQuery { category: Some("hep".to_string()), ..PaperQuery::default() };
        assert!(store.query_papers(&partial).await.unwrap().is_empty());

        let future = PaperQuery {
            since: NaiveDate::from_ymd_opt(2999, 1, 1),
            ..PaperQuery::default()
        };
        assert!(store.query_papers(&future).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let store = SqlitePaperStore::in_memory().await.unwrap();
        let empty = store.stats().await.unwrap();
        assert_eq!(empty, StoreStats::default());

        let p1 = insert(&store, "2602.00019").await;
        let p2 = insert(&store, "2602.00020").await;
        insert(&store, "2602.00021").await;
        store.mark_enrichment_attempted(p1, true).await.unwrap();
        store.mark_enrichment_attempted(p2, false).await.unwrap();
        store.record_heuristic_score(p1, 3.0).await.unwrap();
        store.record_model_score(p1, 6.0, "ok").await.unwrap();
        store.upsert_author("X", None, None, None).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.papers, 3);
        assert_eq!(stats.pending_enrichment, 1);
        assert_eq!(stats.enriched_found, 1);
        assert_eq!(stats.enriched_not_found, 1);
        assert_eq!(stats.unscored, 2);
        assert_eq!(stats.model_scored, 1);
        assert_eq!(stats.authors, 1);
    }
}
