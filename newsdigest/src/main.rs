/*
newsdigest - main.rs
Runs the digest pipeline once: collect feeds, summarize, compose, post to Slack, exit.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use newsdigest::compose::DigestComposer;
use newsdigest::ingestion::{FeedCollector, HttpFeedFetcher};
use newsdigest::llm::remote::RemoteLlmProvider;
use newsdigest::llm::summarizer::SummarizationEngine;
use newsdigest::model::SourceConfig;
use newsdigest::pipeline::{Delivery, DigestPipeline};
use newsdigest::publish::{ChannelRef, SlackPublisher};

#[derive(Parser, Debug)]
#[command(name = "newsdigest", about = "Post a categorized news digest to Slack")]
struct Args {
    /// Path to a config.toml overriding the built-in defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Compose and print the digest without posting it
    #[arg(long)]
    dry_run: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // A missing .env is fine: the real environment may already carry everything
    if dotenv::dotenv().is_ok() {
        info!(".env loaded");
    }

    if let Err(e) = run(args).await {
        error!("digest run failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config).await?;
    let credentials = config.resolve_credentials(|k| std::env::var(k).ok(), !args.dry_run)?;

    let fetcher = HttpFeedFetcher::from_config(config.politeness.as_ref())?;
    let collector = FeedCollector::new(Arc::new(fetcher))
        .with_concurrency(config.digest.fetch_concurrency());

    let llm = RemoteLlmProvider::from_config(config.llm.as_ref(), credentials.llm_api_key.clone());
    info!(model = llm.model(), "LLM provider initialized");
    let engine = SummarizationEngine::new(Arc::new(llm))
        .with_concurrency(config.digest.summary_concurrency());

    let composer = DigestComposer::new(config.digest.title());

    let delivery = match (&credentials.slack, args.dry_run) {
        (Some(slack), false) => Delivery::Publish {
            publisher: Arc::new(SlackPublisher::from_config(
                config.slack.as_ref(),
                slack.token.clone(),
            )?),
            destination: ChannelRef::new(slack.channel.clone()),
        },
        _ => Delivery::DryRun,
    };

    let pipeline = DigestPipeline::new(collector, engine, composer, delivery)
        .with_limit(config.digest.limit_per_category())
        .with_article_summaries(config.digest.summarize_articles());

    let sources = SourceConfig::from(config.categories.as_slice());
    let report = pipeline.run(&sources).await.context("digest pipeline failed")?;

    if args.dry_run {
        println!("{}", report.text);
    }
    info!(
        categories = report.categories,
        articles = report.articles,
        blocks = report.blocks.len(),
        posted = report.receipt.is_some(),
        "✅ Digest done"
    );
    Ok(())
}

async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let mut config = Config::load_with_defaults(override_path.as_deref()).await?;
    config.apply_env(|k| std::env::var(k).ok())?;
    config.validate().context("invalid configuration")?;

    info!(
        override_file = ?override_path,
        categories = config.categories.len(),
        limit = config.digest.limit_per_category(),
        "configuration loaded"
    );
    Ok(config)
}
