/// arXiv listing feed parsing
///
/// Turns RSS 1.0/2.0 listings and Atom search results into normalized
/// FeedRecords. Parsing is pure; network access lives in [`reader`].

pub mod reader;

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

pub use reader::FeedReader;

/// Errors from fetching or parsing a listing.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection failure or timeout
    #[error("Feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the listing server
    #[error("Feed returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// Document is not RSS or Atom
    #[error("Failed to parse feed: {0}")]
    Parse(String),

    /// Backfill window reaches before the earliest representable date
    #[error("Backfill window of {days} days is out of range")]
    Window { days: u32 },
}

/// One paper as announced by a listing, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedRecord {
    /// Bare arXiv id without version suffix
    pub external_id: String,
    pub title: String,
    pub abstract_text: String,
    /// Byline order
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub published: Option<NaiveDate>,
    pub url: String,
}

static NEW_STYLE_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}\.\d{4,5})(?:v\d+)?").expect("valid arXiv id regex"));

static OLD_STYLE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([a-z][a-z\-]*(?:\.[A-Z]{2})?/\d{7})(?:v\d+)?").expect("valid legacy arXiv id regex")
});

static ANNOUNCE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arXiv:\S+\s+Announce Type:\s*\S+\s*").expect("valid announce regex")
});

static DATED_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arXiv:\S+\s+\d{1,2}\s+\w+\s+\d{4}\.\s*").expect("valid dated prefix regex")
});

static ABSTRACT_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Abstract:\s*").expect("valid label regex"));

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

/// Extract the bare catalog id from a link, guid or entry id.
///
/// `http://arxiv.org/abs/2602.12345v1` gives `2602.12345`;
/// `http://arxiv.org/abs/hep-ph/0601001v2` gives `hep-ph/0601001`.
pub fn extract_arxiv_id(text: &str) -> Option<String> {
    if let Some(caps) = NEW_STYLE_ID.captures(text) {
        return Some(caps[1].to_string());
    }
    OLD_STYLE_ID.captures(text).map(|caps| caps[1].to_string())
}

/// Collapse runs of whitespace into single spaces.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strip the listing's metadata prefix and markup from a description.
pub fn clean_abstract(description: &str) -> String {
    let text = description.trim();
    let text = ANNOUNCE_PREFIX.replace(text, "");
    let text = ABSTRACT_LABEL.replace(text.trim_start(), "");
    let text = DATED_PREFIX.replace(text.trim_start(), "");
    let text = HTML_TAG.replace_all(&text, " ");
    collapse_whitespace(&text)
}

/// Split author strings into names.
///
/// The RSS listing puts the whole byline in one `dc:creator`, comma-separated.
pub fn split_authors<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    raw.into_iter()
        .flat_map(|s| s.split(','))
        .map(collapse_whitespace)
        .filter(|name| !name.is_empty())
        .collect()
}

/// Canonical abstract page for a bare id.
pub fn abs_url(external_id: &str) -> String {
    format!("https://arxiv.org/abs/{}", external_id)
}

/// Records parsed from one document, plus how many entries it carried.
///
/// `entries` counts skipped entries too, so pagination can tell a full page from
/// a short one.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub records: Vec<FeedRecord>,
    pub entries: usize,
}

/// Parse an RSS or Atom listing into records.
///
/// Only an unparseable document is an error; entries without a recognisable id
/// are skipped.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<FeedRecord>, FeedError> {
    parse_feed_page(bytes).map(|page| page.records)
}

pub fn parse_feed_page(bytes: &[u8]) -> Result<FeedPage, FeedError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| FeedError::Parse(e.to_string()))?;
    let entries = feed.entries.len();

    let records = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let external_id = entry
                .links
                .iter()
                .find_map(|l| extract_arxiv_id(&l.href))
                .or_else(|| extract_arxiv_id(&entry.id));

            let Some(external_id) = external_id else {
                tracing::debug!(entry_id = %entry.id, "Skipping feed entry without arXiv id");
                return None;
            };

            let title = entry
                .title
                .as_ref()
                .map(|t| collapse_whitespace(&t.content))
                .unwrap_or_default();

            let description = entry
                .summary
                .as_ref()
                .map(|t| t.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                .unwrap_or_default();

            let authors = split_authors(entry.authors.iter().map(|p| p.name.as_str()));

            let categories = entry
                .categories
                .iter()
                .map(|c| c.term.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();

            let published = entry.published.or(entry.updated).map(|dt| dt.date_naive());

            Some(FeedRecord {
                url: abs_url(&external_id),
                external_id,
                title,
                abstract_text: clean_abstract(&description),
                authors,
                categories,
                published,
            })
        })
        .collect();

    Ok(FeedPage { records, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS_LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>cs.LG updates on arXiv.org</title>
    <link>http://rss.arxiv.org/rss/cs.LG</link>
    <description>cs.LG updates</description>
    <item>
      <title>Sparse   Attention
        at Scale</title>
      <link>https://arxiv.org/abs/2602.12345</link>
      <description><![CDATA[arXiv:2602.12345v1 Announce Type: new
Abstract: We present a <b>sparse</b> attention method.]]></description>
      <guid isPermaLink="false">oai:arXiv.org:2602.12345v1</guid>
      <category>cs.LG</category>
      <category>cs.AI</category>
      <pubDate>Fri, 20 Feb 2026 00:00:00 -0500</pubDate>
    </item>
    <item>
      <title>Conference announcement</title>
      <link>https://example.org/news</link>
      <description>Not a paper.</description>
      <guid isPermaLink="false">news-1</guid>
    </item>
    <item>
      <title>Legacy Id Paper</title>
      <link>http://arxiv.org/abs/hep-ph/0601001v2</link>
      <guid isPermaLink="false">legacy-1</guid>
    </item>
  </channel>
</rss>"#;

    const ATOM_PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>http://arxiv.org/api/query</id>
  <title>ArXiv Query</title>
  <updated>2026-02-21T00:00:00Z</updated>
  <entry>
    <id>http://arxiv.org/abs/2602.54321v2</id>
    <updated>2026-02-21T10:00:00Z</updated>
    <published>2026-02-19T18:30:00Z</published>
    <title>Quantum
      Error Correction</title>
    <summary>  We study codes.
    </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name></author>
    <link href="http://arxiv.org/abs/2602.54321v2" rel="alternate" type="text/html"/>
    <category term="quant-ph" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    #[test]
    fn test_extract_arxiv_id_variants() {
        assert_eq!(extract_arxiv_id("https://arxiv.org/abs/2602.12345v1").as_deref(), Some("2602.12345"));
        assert_eq!(extract_arxiv_id("oai:arXiv.org:2602.1234v3").as_deref(), Some("2602.1234"));
        assert_eq!(extract_arxiv_id("http://arxiv.org/abs/hep-ph/0601001v2").as_deref(), Some("hep-ph/0601001"));
        assert_eq!(extract_arxiv_id("http://arxiv.org/abs/math.GT/0309136").as_deref(), Some("math.GT/0309136"));
        assert_eq!(extract_arxiv_id("https://example.org/news"), None);
    }

    #[test]
    fn test_clean_abstract_strips_prefixes_and_markup() {
        let raw = "arXiv:2602.12345v1 Announce Type: new \nAbstract: We show <i>things</i>\n  work.";
        assert_eq!(clean_abstract(raw), "We show things work.");

        let dated = "arXiv:2602.12345v1 20 Feb 2026. A result.";
        assert_eq!(clean_abstract(dated), "A result.");

        assert_eq!(clean_abstract("Plain abstract."), "Plain abstract.");
        assert_eq!(clean_abstract(""), "");
    }

    #[test]
    fn test_split_authors_handles_single_creator_string() {
        let names = split_authors(["Alice Smith, Bob  Jones, ", "Carol"]);
        assert_eq!(names, vec!["Alice Smith", "Bob Jones", "Carol"]);
        assert!(split_authors(Vec::<&str>::new()).is_empty());
    }

    #[test]
    fn test_parse_rss_listing() {
        let records = parse_feed(RSS_LISTING.as_bytes()).unwrap();
        assert_eq!(records.len(), 2, "non-arXiv entry is skipped");

        let first = &records[0];
        assert_eq!(first.external_id, "2602.12345");
        assert_eq!(first.title, "Sparse Attention at Scale");
        assert_eq!(first.abstract_text, "We present a sparse attention method.");
        assert_eq!(first.url, "https://arxiv.org/abs/2602.12345");
        assert_eq!(first.categories, vec!["cs.LG", "cs.AI"]);
        assert!(first.published.is_some());

        let legacy = &records[1];
        assert_eq!(legacy.external_id, "hep-ph/0601001");
        assert_eq!(legacy.abstract_text, "");
        assert!(legacy.authors.is_empty());
    }

    #[test]
    fn test_parse_atom_page() {
        let records = parse_feed(ATOM_PAGE.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.external_id, "2602.54321");
        assert_eq!(record.title, "Quantum Error Correction");
        assert_eq!(record.abstract_text, "We study codes.");
        assert_eq!(record.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(record.categories, vec!["quant-ph"]);
        assert_eq!(record.published, NaiveDate::from_ymd_opt(2026, 2, 19));
    }

    #[test]
    fn test_parse_rejects_non_feed_document() {
        let err = parse_feed(b"this is not xml").unwrap_err();
        assert!(matches!(err, FeedError::Parse(_)));
    }
}
