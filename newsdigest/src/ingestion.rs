use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use feed_rs::model::Entry;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use crate::model::{Article, ArticlesByCategory, CategorySources, SourceConfig};

/// Why a single feed could not be read. Never fatal for a run.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error fetching {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("feed {url} answered with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("failed to parse feed {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: parser::ParseFeedError,
    },
}

/// Source of feed entries: given a URL, the entries in source order.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<Article>, FetchError>;
}

const MAX_BACKOFF_DOUBLINGS: u32 = 10;

/// Fetches feeds over HTTP and parses RSS/Atom/JSON Feed with feed-rs.
pub struct HttpFeedFetcher {
    client: Client,
    max_retries: u32,
    backoff: Duration,
}

impl HttpFeedFetcher {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("newsdigest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            max_retries: 3,
            backoff: Duration::from_secs(1),
        })
    }

    /// `max_retries` counts attempts, so 1 disables retrying.
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.backoff = backoff;
        self
    }

    pub fn from_config(politeness: Option<&common::PolitenessConfig>) -> Result<Self> {
        let timeout = politeness.and_then(|p| p.fetch_timeout_seconds).unwrap_or(15);
        let retries = politeness.and_then(|p| p.max_retries).unwrap_or(3);
        let backoff_ms = politeness.and_then(|p| p.retry_backoff_ms).unwrap_or(1000);
        Ok(Self::new(timeout)?.with_retries(retries, Duration::from_millis(backoff_ms)))
    }

    /// 1x, 2x, 4x... the base backoff, doubling capped at 2^MAX_BACKOFF_DOUBLINGS.
    fn backoff_before(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(2).min(MAX_BACKOFF_DOUBLINGS);
        self.backoff.saturating_mul(1u32 << doublings)
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<Article>, FetchError> {
        let mut last_error = None;

        for attempt in 1..=self.max_retries {
            if attempt > 1 {
                let backoff = self.backoff_before(attempt);
                info!(
                    "Retrying feed fetch for {} (attempt {}/{}) after {:?}...",
                    url, attempt, self.max_retries, backoff
                );
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = match response.bytes().await {
                            Ok(bytes) => bytes,
                            Err(source) => {
                                last_error = Some(FetchError::Http {
                                    url: url.to_string(),
                                    source,
                                });
                                continue;
                            }
                        };
                        let feed = parser::parse(bytes.as_ref()).map_err(|source| {
                            FetchError::Parse {
                                url: url.to_string(),
                                source,
                            }
                        })?;
                        return Ok(feed.entries.into_iter().filter_map(entry_to_article).collect());
                    }

                    let error = FetchError::Status {
                        url: url.to_string(),
                        status,
                    };
                    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(error);
                        continue;
                    }
                    // Other 4xx are permanent
                    return Err(error);
                }
                Err(source) => {
                    last_error = Some(FetchError::Http {
                        url: url.to_string(),
                        source,
                    });
                }
            }
        }

        // max_retries >= 1, so at least one attempt recorded an error
        Err(last_error.unwrap_or(FetchError::Status {
            url: url.to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }))
    }
}

/// Keep entries that can be rendered: a non-empty title and a link.
fn entry_to_article(entry: Entry) -> Option<Article> {
    let title = entry
        .title
        .map(|t| t.content.trim().to_string())
        .unwrap_or_default();
    let link = entry
        .links
        .into_iter()
        .next()
        .map(|l| l.href)
        .unwrap_or_default();

    if title.is_empty() || link.is_empty() {
        debug!("Skipping entry without title or URL: {:?} {:?}", title, link);
        return None;
    }
    Some(Article { title, link })
}

/// Collects at most `limit` articles per category.
///
/// Feeds of one category are read one after another and reading stops as soon
/// as the category is full, so later feeds are never requested. Categories are
/// independent and may be collected concurrently; the result keeps configured
/// order either way.
pub struct FeedCollector {
    fetcher: Arc<dyn FeedFetcher>,
    concurrency: usize,
}

impl FeedCollector {
    pub fn new(fetcher: Arc<dyn FeedFetcher>) -> Self {
        Self {
            fetcher,
            concurrency: 1,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn collect(&self, config: &SourceConfig, limit_per_category: usize) -> ArticlesByCategory {
        info!(
            categories = config.categories.len(),
            limit = limit_per_category,
            "Collecting articles"
        );

        // `buffered` yields in input order whatever the completion order
        let collected: Vec<(String, Vec<Article>)> = stream::iter(config.categories.iter())
            .map(|category| self.collect_category(category, limit_per_category))
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut result = ArticlesByCategory::new();
        for (name, articles) in collected {
            result.push(name, articles);
        }
        result
    }

    async fn collect_category(&self, category: &CategorySources, limit: usize) -> (String, Vec<Article>) {
        let mut articles: Vec<Article> = Vec::with_capacity(limit);

        for url in &category.feeds {
            if articles.len() >= limit {
                break;
            }

            match self.fetcher.fetch(url).await {
                Ok(entries) => {
                    let remaining = limit - articles.len();
                    let before = articles.len();
                    articles.extend(entries.into_iter().take(remaining));
                    debug!(
                        category = %category.name,
                        url = %url,
                        taken = articles.len() - before,
                        "feed read"
                    );
                }
                Err(e) => {
                    warn!(category = %category.name, url = %url, error = %e, "skipping feed");
                }
            }
        }

        if articles.len() < limit {
            info!(
                "Category {:?} filled {} of {} slots",
                category.name,
                articles.len(),
                limit
            );
        }
        (category.name.clone(), articles)
    }
}
