use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::compose::{flatten, Block, DigestComposer};
use crate::ingestion::FeedCollector;
use crate::llm::summarizer::{SummarizationEngine, SummarizationError};
use crate::model::{ArticleSummaries, SourceConfig};
use crate::publish::{ChannelRef, PublishError, PublishReceipt, Publisher};

/// Errors that end a run. Feed failures never get here: the collector absorbs them.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Summarization(#[from] SummarizationError),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// What happens to the composed digest
pub enum Delivery {
    Publish {
        publisher: Arc<dyn Publisher>,
        destination: ChannelRef,
    },
    /// Compose only; the caller prints the result
    DryRun,
}

#[derive(Debug, Clone)]
pub struct DigestReport {
    pub categories: usize,
    pub articles: usize,
    pub blocks: Vec<Block>,
    /// Plain-text fallback sent alongside the blocks
    pub text: String,
    pub receipt: Option<PublishReceipt>,
}

/// collect -> summarize -> compose -> publish, strictly in that order.
///
/// Nothing is published unless every generation call succeeded.
pub struct DigestPipeline {
    collector: FeedCollector,
    engine: SummarizationEngine,
    composer: DigestComposer,
    delivery: Delivery,
    limit_per_category: usize,
    summarize_articles: bool,
}

impl DigestPipeline {
    pub fn new(
        collector: FeedCollector,
        engine: SummarizationEngine,
        composer: DigestComposer,
        delivery: Delivery,
    ) -> Self {
        Self {
            collector,
            engine,
            composer,
            delivery,
            limit_per_category: common::DEFAULT_LIMIT_PER_CATEGORY,
            summarize_articles: true,
        }
    }

    pub fn with_limit(mut self, limit_per_category: usize) -> Self {
        self.limit_per_category = limit_per_category;
        self
    }

    /// When disabled, articles are rendered with their feed titles.
    pub fn with_article_summaries(mut self, enabled: bool) -> Self {
        self.summarize_articles = enabled;
        self
    }

    pub async fn run(&self, sources: &SourceConfig) -> Result<DigestReport, PipelineError> {
        let started = Instant::now();

        info!("Fetching news...");
        let articles = self.collector.collect(sources, self.limit_per_category).await;
        info!(
            categories = articles.len(),
            articles = articles.total(),
            "collection finished"
        );

        info!("Creating digest sections...");
        let sections = self.engine.derive_sections(&articles).await?;

        let summaries = if self.summarize_articles {
            self.engine.summarize_all(&articles).await?
        } else {
            info!("Per-article summaries disabled, using feed titles");
            ArticleSummaries::new()
        };

        info!("Building digest...");
        let blocks = self.composer.compose(&sections, &articles, &summaries);
        let text = flatten(&blocks);

        let receipt = match &self.delivery {
            Delivery::Publish {
                publisher,
                destination,
            } => {
                info!(channel = %destination, "Posting digest...");
                Some(publisher.send(destination, &blocks, &text).await?)
            }
            Delivery::DryRun => {
                info!("Dry run: digest not posted");
                None
            }
        };

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "Digest run complete");
        Ok(DigestReport {
            categories: articles.len(),
            articles: articles.total(),
            blocks,
            text,
            receipt,
        })
    }
}
