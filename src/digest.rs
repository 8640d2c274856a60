/// Email digest of the top-ranked papers
///
/// Renders an HTML summary of the best combined scores straight from the store
/// and sends it over SMTP with STARTTLS. Credentials come from the `[email]`
/// config section; SMTP_EMAIL, SMTP_PASSWORD and SMTP_RECIPIENT override it.

use std::time::Duration;

use chrono::{NaiveDate, Utc};
use lettre::message::{header::ContentType, Mailbox};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use thiserror::Error;

use crate::config::EmailConfig;
use crate::errors::ScoutError;
use crate::scoring::truncate_chars;
use crate::store::{OrderBy, Paper, PaperAuthor, PaperQuery, PaperStore};

const ABSTRACT_PREVIEW_CHARS: usize = 500;
const BYLINE_AUTHORS: usize = 5;

const HIGH_SCORE_COLOR: &str = "#28a745";
const MEDIUM_SCORE_COLOR: &str = "#ffc107";
const LOW_SCORE_COLOR: &str = "#6c757d";

#[derive(Debug, Error)]
pub enum DigestError {
    #[error(transparent)]
    Store(#[from] ScoutError),

    #[error("SMTP credentials missing: set email.sender and email.password, or SMTP_EMAIL and SMTP_PASSWORD")]
    MissingCredentials,

    #[error("Invalid email address '{address}': {message}")]
    Address { address: String, message: String },

    #[error("Failed to build message: {0}")]
    Message(#[from] lettre::error::Error),

    /// SMTP 535. Gmail rejects account passwords here.
    #[error("SMTP authentication failed for {sender}; Gmail accounts need an App Password (https://myaccount.google.com/apppasswords)")]
    Auth { sender: String },

    #[error("Error sending email: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Resolved SMTP endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub sender: String,
    pub password: String,
    pub recipient: String,
    pub timeout: Duration,
}

impl SmtpSettings {
    /// Merge config with the SMTP_* variables looked up through `env`.
    ///
    /// Variables win over config. The recipient falls back to the sender.
    pub fn resolve(config: &EmailConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self, DigestError> {
        let pick = |var: &str, configured: &Option<String>| {
            env(var)
                .or_else(|| configured.clone())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let sender = pick("SMTP_EMAIL", &config.sender).ok_or(DigestError::MissingCredentials)?;
        let password = pick("SMTP_PASSWORD", &config.password).ok_or(DigestError::MissingCredentials)?;
        let recipient = pick("SMTP_RECIPIENT", &config.recipient).unwrap_or_else(|| sender.clone());

        Ok(SmtpSettings {
            host: config.smtp_host.clone(),
            port: config.smtp_port,
            sender,
            password,
            recipient,
            timeout: config.timeout(),
        })
    }

    pub fn from_env(config: &EmailConfig) -> Result<Self, DigestError> {
        Self::resolve(config, |var| std::env::var(var).ok())
    }
}

/// One paper in the digest with its byline.
#[derive(Debug, Clone, Serialize)]
pub struct DigestEntry {
    pub paper: Paper,
    pub authors: Vec<PaperAuthor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub date: NaiveDate,
    /// Every paper in the store, scored or not
    pub total_tracked: i64,
    pub entries: Vec<DigestEntry>,
}

impl Digest {
    pub fn subject(&self) -> String {
        format!(
            "arxiv-scout digest {}: top {} papers",
            self.date.format("%Y-%m-%d"),
            self.entries.len()
        )
    }
}

/// What `send_digest` did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DigestOutcome {
    /// Rendered but not sent
    DryRun { papers: usize, html: String },
    Sent { recipient: String, papers: usize },
}

/// Top `top_n` papers by combined score, optionally only those fetched since `since`.
pub async fn collect_digest(
    store: &dyn PaperStore,
    top_n: usize,
    since: Option<NaiveDate>,
) -> Result<Digest, ScoutError> {
    let total_tracked = store.stats().await?.papers;

    let papers = if top_n == 0 {
        Vec::new()
    } else {
        store
            .query_papers(&PaperQuery {
                min_score: Some(0.0),
                order_by: OrderBy::CombinedScore,
                limit: i64::try_from(top_n).unwrap_or(i64::MAX),
                since,
                ..PaperQuery::default()
            })
            .await?
    };

    let mut entries = Vec::with_capacity(papers.len());
    for paper in papers {
        let authors = store.get_paper_authors(paper.id).await?;
        entries.push(DigestEntry { paper, authors });
    }

    Ok(Digest {
        date: Utc::now().date_naive(),
        total_tracked,
        entries,
    })
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Badge color: green from 7, yellow from 4, grey below.
pub fn score_color(score: f64) -> &'static str {
    if score >= 7.0 {
        HIGH_SCORE_COLOR
    } else if score >= 4.0 {
        MEDIUM_SCORE_COLOR
    } else {
        LOW_SCORE_COLOR
    }
}

fn badge(text: &str, color: &str) -> String {
    format!(
        "<span style=\"background:{};color:#fff;border-radius:3px;padding:1px 6px;font-size:12px;margin-right:4px\">{}</span>",
        color,
        escape_html(text)
    )
}

fn render_byline(authors: &[PaperAuthor]) -> String {
    let mut parts: Vec<String> = authors
        .iter()
        .take(BYLINE_AUTHORS)
        .map(|a| {
            let mut name = escape_html(&a.author.name);
            for keyword in &a.matched_keywords {
                name.push(' ');
                name.push_str(&badge(keyword, "#0366d6"));
            }
            name
        })
        .collect();
    if authors.len() > BYLINE_AUTHORS {
        parts.push("et al.".to_string());
    }
    parts.join(", ")
}

fn render_entry(rank: usize, entry: &DigestEntry) -> String {
    let paper = &entry.paper;
    let score = paper.combined_score.unwrap_or_default();

    let mut html = format!(
        "<div style=\"margin-bottom:20px;border-bottom:1px solid #eee;padding-bottom:12px\">\n\
         <h3 style=\"margin:0 0 4px 0\">{}. <a href=\"{}\">{}</a></h3>\n\
         <div>{}{}</div>\n",
        rank,
        escape_html(&paper.url),
        escape_html(&paper.title),
        badge(&format!("{:.1}", score), score_color(score)),
        escape_html(&paper.category_list().join(", ")),
    );

    if !entry.authors.is_empty() {
        html.push_str(&format!(
            "<div style=\"color:#555;font-size:13px\">{}</div>\n",
            render_byline(&entry.authors)
        ));
    }

    if let Some(summary) = paper.llm_summary.as_deref().filter(|s| !s.trim().is_empty()) {
        html.push_str(&format!("<p><em>{}</em></p>\n", escape_html(summary)));
    }

    if paper.has_abstract() {
        let text = paper.abstract_text.trim();
        let preview = truncate_chars(text, ABSTRACT_PREVIEW_CHARS);
        let ellipsis = if preview.len() < text.len() { "..." } else { "" };
        html.push_str(&format!(
            "<p style=\"font-size:13px;color:#333\">{}{}</p>\n",
            escape_html(preview),
            ellipsis
        ));
    }

    html.push_str("</div>\n");
    html
}

pub fn render_html(digest: &Digest) -> String {
    let mut html = format!(
        "<html>\n<body style=\"font-family:sans-serif;max-width:760px\">\n\
         <h2>arxiv-scout daily digest</h2>\n\
         <p>{} &middot; top {} of {} papers tracked</p>\n",
        digest.date.format("%Y-%m-%d"),
        digest.entries.len(),
        digest.total_tracked
    );
    for (idx, entry) in digest.entries.iter().enumerate() {
        html.push_str(&render_entry(idx + 1, entry));
    }
    html.push_str("</body>\n</html>\n");
    html
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DigestError> {
    address.parse::<Mailbox>().map_err(|e| DigestError::Address {
        address: address.to_string(),
        message: e.to_string(),
    })
}

/// Send one HTML message over STARTTLS.
pub async fn send_email(settings: &SmtpSettings, subject: &str, html: String) -> Result<(), DigestError> {
    let message = Message::builder()
        .from(parse_mailbox(&settings.sender)?)
        .to(parse_mailbox(&settings.recipient)?)
        .subject(subject)
        .header(ContentType::TEXT_HTML)
        .body(html)?;

    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        .port(settings.port)
        .credentials(Credentials::new(settings.sender.clone(), settings.password.clone()))
        .timeout(Some(settings.timeout))
        .build();

    transport.send(message).await.map_err(|e| {
        let auth_rejected = e.status().is_some_and(|code| code.to_string() == "535");
        if auth_rejected {
            DigestError::Auth {
                sender: settings.sender.clone(),
            }
        } else {
            DigestError::Smtp(e)
        }
    })?;
    Ok(())
}

/// Build the digest and either send it or, on a dry run, hand back the HTML.
pub async fn send_digest(
    store: &dyn PaperStore,
    config: &EmailConfig,
    top_n: usize,
    dry_run: bool,
) -> Result<DigestOutcome, DigestError> {
    let since = (config.lookback_days > 0)
        .then(|| Utc::now().date_naive().checked_sub_days(chrono::Days::new(u64::from(config.lookback_days))))
        .flatten();

    let digest = collect_digest(store, top_n, since).await?;
    let html = render_html(&digest);
    let papers = digest.entries.len();

    if dry_run {
        tracing::info!(papers, "Dry run, digest not sent");
        return Ok(DigestOutcome::DryRun { papers, html });
    }

    let settings = SmtpSettings::from_env(config)?;
    send_email(&settings, &digest.subject(), html).await?;
    tracing::info!(papers, recipient = %settings.recipient, "Digest sent");

    Ok(DigestOutcome::Sent {
        recipient: settings.recipient,
        papers,
    })
}
