// Summarizer module: narrative sections and per-article blurbs
use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::{debug, info};

use super::{LlmProvider, LlmRequest};
use crate::model::{Article, ArticleSummaries, ArticleSummary, ArticlesByCategory, DigestSections};

const MOOD_MAX_TOKENS: usize = 60;
const FOCUS_MAX_TOKENS: usize = 150;
const WATCH_MAX_TOKENS: usize = 150;
const ARTICLE_MAX_TOKENS: usize = 50;

/// What a generation call was producing when it failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryTarget {
    Mood,
    FocusSummary,
    WatchList,
    Article { title: String },
}

impl fmt::Display for SummaryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SummaryTarget::Mood => f.write_str("mood section"),
            SummaryTarget::FocusSummary => f.write_str("focus summary section"),
            SummaryTarget::WatchList => f.write_str("watch list section"),
            SummaryTarget::Article { title } => write!(f, "article {:?}", title),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizationError {
    #[error("generation failed for {target}: {source:#}")]
    Backend {
        target: SummaryTarget,
        #[source]
        source: anyhow::Error,
    },
    #[error("generation for {target} returned no text")]
    EmptyOutput { target: SummaryTarget },
}

impl SummarizationError {
    pub fn target(&self) -> &SummaryTarget {
        match self {
            SummarizationError::Backend { target, .. } => target,
            SummarizationError::EmptyOutput { target } => target,
        }
    }
}

/// Turns collected headlines into digest text through an [`LlmProvider`].
///
/// Every call goes to the backend; nothing is cached, and any failed or empty
/// generation is an error rather than a blank section.
pub struct SummarizationEngine {
    provider: Arc<dyn LlmProvider>,
    concurrency: usize,
}

impl SummarizationEngine {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            concurrency: 1,
        }
    }

    /// Upper bound on in-flight per-article requests
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Mood, focus summary and watch list, all read from the same headline snapshot.
    pub async fn derive_sections(
        &self,
        articles: &ArticlesByCategory,
    ) -> Result<DigestSections, SummarizationError> {
        let headlines = articles.titles().join("\n");
        info!(headlines = articles.total(), "Deriving digest sections");

        let (mood, focus_summary, watch_list) = tokio::try_join!(
            self.generate(SummaryTarget::Mood, mood_prompt(&headlines), MOOD_MAX_TOKENS),
            self.generate(
                SummaryTarget::FocusSummary,
                focus_prompt(&headlines),
                FOCUS_MAX_TOKENS
            ),
            self.generate(
                SummaryTarget::WatchList,
                watch_prompt(&headlines),
                WATCH_MAX_TOKENS
            ),
        )?;

        Ok(DigestSections {
            mood: clean_emphasis(first_line(&mood)),
            focus_summary: clean_emphasis(&focus_summary),
            watch_list: clean_emphasis(&watch_list),
        })
    }

    /// Compress one headline into a single line.
    pub async fn summarize_article(&self, article: &Article) -> Result<ArticleSummary, SummarizationError> {
        let target = SummaryTarget::Article {
            title: article.title.clone(),
        };
        let raw = self
            .generate(target.clone(), article_prompt(&article.title), ARTICLE_MAX_TOKENS)
            .await?;

        let line = strip_bullet(first_line(&raw));
        if line.is_empty() {
            return Err(SummarizationError::EmptyOutput { target });
        }

        Ok(ArticleSummary {
            link: article.link.clone(),
            text: clean_emphasis(line),
        })
    }

    /// Summaries for every collected article, requested in traversal order.
    /// The first failure aborts the whole batch.
    pub async fn summarize_all(
        &self,
        articles: &ArticlesByCategory,
    ) -> Result<ArticleSummaries, SummarizationError> {
        info!(
            articles = articles.total(),
            concurrency = self.concurrency,
            "Summarizing articles"
        );

        let pairs: Vec<(Article, ArticleSummary)> = stream::iter(articles.articles())
            .map(|(category, article)| async move {
                debug!(category = %category, title = %article.title, "summarizing article");
                self.summarize_article(article)
                    .await
                    .map(|summary| (article.clone(), summary))
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(pairs.into_iter().collect())
    }

    async fn generate(
        &self,
        target: SummaryTarget,
        prompt: String,
        max_tokens: usize,
    ) -> Result<String, SummarizationError> {
        let response = self
            .provider
            .generate(LlmRequest::new(prompt, max_tokens))
            .await
            .map_err(|source| SummarizationError::Backend {
                target: target.clone(),
                source,
            })?;

        let text = response.content.trim();
        if text.is_empty() {
            return Err(SummarizationError::EmptyOutput { target });
        }

        debug!(
            target = %target,
            model = %response.model,
            tokens = response.usage.total_tokens,
            "generation complete"
        );
        Ok(text.to_string())
    }
}

fn mood_prompt(headlines: &str) -> String {
    format!(
        "Given the following news headlines, describe in one short line the overall mood \
         of the day and the top priority for data analysts. Reply with that single line only.\n\n{}",
        headlines
    )
}

fn focus_prompt(headlines: &str) -> String {
    format!(
        "Given the following news headlines, write a concise summary (exactly 3 bullet points) \
         about what data analysts should focus on today to improve their work:\n\n{}",
        headlines
    )
}

fn watch_prompt(headlines: &str) -> String {
    format!(
        "Using only the following news headlines, list exactly 3 numbered points that data \
         analysts should watch today. Stay strictly on the topics of these headlines: do not \
         mention events, companies or figures that are not in them.\n\n{}",
        headlines
    )
}

fn article_prompt(title: &str) -> String {
    format!(
        "Summarize this news headline in 1 line for data analysts:\n{}",
        title
    )
}

fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

fn strip_bullet(line: &str) -> &str {
    let line = line
        .trim_start_matches("- ")
        .trim_start_matches("• ")
        .trim();
    line.trim_matches('"').trim()
}

/// Collapse paired doubled emphasis delimiters (markdown `**bold**`,
/// `__bold words__`) to the single delimiters Slack mrkdwn understands.
/// A `__word__` span without whitespace is left alone so identifiers such as
/// `__init__` survive.
pub fn clean_emphasis(text: &str) -> String {
    let text = collapse_pairs(text, "**", |_| true);
    collapse_pairs(&text, "__", |inner| inner.contains(char::is_whitespace))
}

fn collapse_pairs(text: &str, delimiter: &str, is_emphasis: impl Fn(&str) -> bool) -> String {
    let single = &delimiter[..1];
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(open) = rest.find(delimiter) {
        let after_open = &rest[open + delimiter.len()..];
        let Some(close) = after_open.find(delimiter) else {
            break;
        };
        let inner = &after_open[..close];
        out.push_str(&rest[..open]);

        let tight = !inner.is_empty() && inner.trim().len() == inner.len();
        let marker = if tight && is_emphasis(inner) { single } else { delimiter };
        out.push_str(marker);
        out.push_str(inner);
        out.push_str(marker);

        rest = &after_open[close + delimiter.len()..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use anyhow::Result;
    use std::sync::Mutex;
    use std::time::Duration;

    type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

    struct FakeProvider {
        responder: Responder,
        prompts: Mutex<Vec<(String, Option<usize>)>>,
    }

    impl FakeProvider {
        fn new(responder: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                responder: Box::new(responder),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<(String, Option<usize>)> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for FakeProvider {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.prompts
                .lock()
                .unwrap()
                .push((request.prompt.clone(), request.max_tokens));
            let content = (self.responder)(&request.prompt)?;
            Ok(LlmResponse {
                content,
                usage: UsageMetadata::default(),
                model: "fake".to_string(),
            })
        }
    }

    fn sample() -> ArticlesByCategory {
        let mut articles = ArticlesByCategory::new();
        articles.push(
            "Data & AI",
            vec![
                Article::new("GPUs get cheaper", "https://a/1"),
                Article::new("New SQL engine", "https://a/2"),
            ],
        );
        articles.push("Tech News", vec![Article::new("Phone launch", "https://t/1")]);
        articles
    }

    fn canned(prompt: &str) -> Result<String> {
        Ok(if prompt.contains("overall mood") {
            "**Cautiously** optimistic\nsecond line ignored".to_string()
        } else if prompt.contains("focus on today") {
            "- **one**\n- two\n- three".to_string()
        } else if prompt.contains("watch today") {
            "1. **GPU** prices\n2. __SQL engines__ rising\n3. phones".to_string()
        } else {
            "  - \"Short blurb\"\nextra".to_string()
        })
    }

    #[tokio::test]
    async fn derive_sections_issues_three_calls_over_all_titles() {
        let provider = FakeProvider::new(canned);
        let engine = SummarizationEngine::new(provider.clone());

        let sections = engine.derive_sections(&sample()).await.expect("sections");

        assert_eq!(sections.mood, "*Cautiously* optimistic");
        assert_eq!(sections.focus_summary, "- *one*\n- two\n- three");
        assert_eq!(sections.watch_list, "1. *GPU* prices\n2. _SQL engines_ rising\n3. phones");

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 3);
        for (prompt, _) in &prompts {
            assert!(prompt.ends_with("GPUs get cheaper\nNew SQL engine\nPhone launch"));
        }
        let budgets: Vec<Option<usize>> = prompts.iter().map(|(_, t)| *t).collect();
        assert!(budgets.contains(&Some(MOOD_MAX_TOKENS)));
        assert!(budgets.contains(&Some(FOCUS_MAX_TOKENS)));
    }

    #[tokio::test]
    async fn failing_section_is_identified() {
        let provider = FakeProvider::new(|prompt| {
            if prompt.contains("watch today") {
                anyhow::bail!("backend unavailable")
            }
            canned(prompt)
        });
        let engine = SummarizationEngine::new(provider);

        let err = engine.derive_sections(&sample()).await.unwrap_err();

        assert_eq!(err.target(), &SummaryTarget::WatchList);
        assert!(err.to_string().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn blank_generation_is_an_error() {
        let provider = FakeProvider::new(|prompt| {
            if prompt.contains("overall mood") {
                return Ok("   \n ".to_string());
            }
            canned(prompt)
        });
        let engine = SummarizationEngine::new(provider);

        let err = engine.derive_sections(&sample()).await.unwrap_err();

        assert!(matches!(
            err,
            SummarizationError::EmptyOutput {
                target: SummaryTarget::Mood
            }
        ));
    }

    #[tokio::test]
    async fn article_summary_is_one_clean_line_paired_with_link() {
        let provider = FakeProvider::new(canned);
        let engine = SummarizationEngine::new(provider.clone());
        let article = Article::new("GPUs get cheaper", "https://a/1");

        let summary = engine.summarize_article(&article).await.expect("summary");

        assert_eq!(summary.text, "Short blurb");
        assert_eq!(summary.link, "https://a/1");
        let prompts = provider.prompts();
        assert!(prompts[0].0.ends_with("GPUs get cheaper"));
        assert_eq!(prompts[0].1, Some(ARTICLE_MAX_TOKENS));
    }

    #[tokio::test]
    async fn summarize_all_covers_every_article() {
        let provider = FakeProvider::new(|prompt| {
            let title = prompt.lines().last().unwrap_or_default();
            Ok(format!("about {}", title))
        });
        let engine = SummarizationEngine::new(provider.clone()).with_concurrency(3);
        let articles = sample();

        let summaries = engine.summarize_all(&articles).await.expect("summaries");

        assert_eq!(summaries.len(), 3);
        for (_, article) in articles.articles() {
            let summary = summaries.get(article).expect("summary present");
            assert_eq!(summary.text, format!("about {}", article.title));
            assert_eq!(summary.link, article.link);
        }
        let mut requested: Vec<String> = provider
            .prompts()
            .into_iter()
            .map(|(p, _)| p.lines().last().unwrap_or_default().to_string())
            .collect();
        requested.sort();
        assert_eq!(requested, vec!["GPUs get cheaper", "New SQL engine", "Phone launch"]);
    }

    struct SlowProvider;

    #[async_trait::async_trait]
    impl LlmProvider for SlowProvider {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
            // earlier titles finish last
            let delay = if request.prompt.contains("GPUs") { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if request.prompt.contains("Phone") {
                anyhow::bail!("rate limited");
            }
            Ok(LlmResponse {
                content: "ok".to_string(),
                usage: UsageMetadata::default(),
                model: "slow".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn summarize_all_aborts_on_first_failure() {
        let engine = SummarizationEngine::new(Arc::new(SlowProvider)).with_concurrency(4);

        let err = engine.summarize_all(&sample()).await.unwrap_err();

        assert_eq!(
            err.target(),
            &SummaryTarget::Article {
                title: "Phone launch".to_string()
            }
        );
    }

    #[test]
    fn clean_emphasis_collapses_paired_delimiters() {
        assert_eq!(
            clean_emphasis("**bold** and __two words__"),
            "*bold* and _two words_"
        );
        assert_eq!(clean_emphasis("plain *single*"), "plain *single*");
        assert_eq!(clean_emphasis("unpaired ** stays"), "unpaired ** stays");
    }

    #[test]
    fn clean_emphasis_keeps_dunder_identifiers() {
        assert_eq!(
            clean_emphasis("Python drops __init__ and __main__ quirks"),
            "Python drops __init__ and __main__ quirks"
        );
        assert_eq!(clean_emphasis("**__init__** explained"), "*__init__* explained");
    }
}
