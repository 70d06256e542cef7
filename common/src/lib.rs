/*!
common/src/lib.rs

Shared configuration types for newsdigest.

This file provides:
- Config data structures (deserialized from TOML)
- Layered loading: embedded defaults, optional override file, environment
- Validation and resolution of the credentials named by the config
*/

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Built-in configuration, merged underneath any user supplied file.
pub const DEFAULT_CONFIG: &str = include_str!("../config.default.toml");

pub const DEFAULT_TITLE: &str = ":newspaper: Daily Data & AI Digest";
pub const DEFAULT_LIMIT_PER_CATEGORY: usize = 3;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Environment variable overriding `digest.limit_per_category`
pub const LIMIT_ENV: &str = "DIGEST_LIMIT_PER_CATEGORY";

/// Digest shape and pipeline knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestConfig {
    /// Text of the header block
    pub title: Option<String>,
    /// Maximum number of articles kept per category (must be > 0)
    pub limit_per_category: Option<usize>,
    /// When false, article titles are rendered as-is instead of one-line summaries
    pub summarize_articles: Option<bool>,
    /// How many categories are collected at the same time
    pub fetch_concurrency: Option<usize>,
    /// How many per-article summaries are requested at the same time
    pub summary_concurrency: Option<usize>,
}

impl DigestConfig {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_TITLE)
    }

    pub fn limit_per_category(&self) -> usize {
        self.limit_per_category.unwrap_or(DEFAULT_LIMIT_PER_CATEGORY)
    }

    pub fn summarize_articles(&self) -> bool {
        self.summarize_articles.unwrap_or(true)
    }

    pub fn fetch_concurrency(&self) -> usize {
        self.fetch_concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }

    pub fn summary_concurrency(&self) -> usize {
        self.summary_concurrency.unwrap_or(DEFAULT_CONCURRENCY)
    }
}

/// Fetch attempts per feed, first try included
pub const MAX_RETRIES_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// One topic bucket and its ordered feed URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    #[serde(default)]
    pub feeds: Vec<String>,
}

/// OpenAI-compatible chat completions backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub temperature: Option<f32>,
}

/// Slack Web API delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the bot token
    pub token_env: Option<String>,
    /// Destination channel; when absent it is read from `channel_env`
    pub channel: Option<String>,
    pub channel_env: Option<String>,
    pub timeout_seconds: Option<u64>,
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
    pub llm: Option<LlmConfig>,
    pub slack: Option<SlackConfig>,
    pub politeness: Option<PolitenessConfig>,
}

/// Secrets and destination resolved from the environment at startup
#[derive(Clone)]
pub struct Credentials {
    pub llm_api_key: String,
    pub slack: Option<SlackCredentials>,
}

#[derive(Clone)]
pub struct SlackCredentials {
    pub token: String,
    pub channel: String,
}

// Never print secrets, even at debug level.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("llm_api_key", &"<redacted>")
            .field("slack", &self.slack)
            .finish()
    }
}

impl std::fmt::Debug for SlackCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackCredentials")
            .field("token", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

impl Config {
    /// Parse a configuration from TOML text, without merging defaults.
    pub fn from_toml_str(data: &str) -> Result<Self> {
        toml::from_str(data).context("Failed to parse TOML configuration")
    }

    /// The embedded defaults alone.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(DEFAULT_CONFIG).context("Built-in configuration is invalid")
    }

    /// Load the embedded defaults, merged with an optional override file
    /// (override takes precedence, arrays are replaced wholesale).
    pub async fn load_with_defaults(override_path: Option<&Path>) -> Result<Self> {
        let mut config_value: toml::Value =
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default configuration")?;

        if let Some(path) = override_path {
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read override config: {}", path.display()))?;
            let val: toml::Value =
                toml::from_str(&data).context("Failed to parse override configuration")?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value
            .try_into()
            .context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    /// Apply environment overrides. `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(LIMIT_ENV) {
            let limit: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a positive integer, got {:?}", LIMIT_ENV, raw))?;
            self.digest.limit_per_category = Some(limit);
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.digest.limit_per_category() == 0 {
            bail!("digest.limit_per_category must be greater than 0");
        }
        if self.digest.fetch_concurrency() == 0 || self.digest.summary_concurrency() == 0 {
            bail!("digest concurrency settings must be greater than 0");
        }

        for category in &self.categories {
            if category.name.trim().is_empty() {
                bail!("category names must not be empty");
            }
            for feed in &category.feeds {
                url::Url::parse(feed).with_context(|| {
                    format!("invalid feed URL {:?} in category {:?}", feed, category.name)
                })?;
            }
        }

        if let Some(retries) = self.politeness.as_ref().and_then(|p| p.max_retries) {
            if !MAX_RETRIES_RANGE.contains(&retries) {
                bail!(
                    "politeness.max_retries must be between {} and {}",
                    MAX_RETRIES_RANGE.start(),
                    MAX_RETRIES_RANGE.end()
                );
            }
        }

        if let Some(api_url) = self.llm.as_ref().and_then(|l| l.api_url.as_deref()) {
            url::Url::parse(api_url).with_context(|| format!("invalid llm.api_url {:?}", api_url))?;
        }
        if let Some(api_url) = self.slack.as_ref().and_then(|s| s.api_url.as_deref()) {
            url::Url::parse(api_url)
                .with_context(|| format!("invalid slack.api_url {:?}", api_url))?;
        }

        Ok(())
    }

    /// Read the secrets named by the config. Slack credentials are only
    /// mandatory when `require_slack` is set (i.e. outside dry runs).
    pub fn resolve_credentials<F>(&self, lookup: F, require_slack: bool) -> Result<Credentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_env = self
            .llm
            .as_ref()
            .and_then(|l| l.api_key_env.as_deref())
            .unwrap_or("OPENAI_API_KEY");
        let llm_api_key = non_empty(lookup(key_env))
            .with_context(|| format!("missing LLM API key: set {}", key_env))?;

        let slack_cfg = self.slack.as_ref();
        let token_env = slack_cfg
            .and_then(|s| s.token_env.as_deref())
            .unwrap_or("SLACK_BOT_TOKEN");
        let channel_env = slack_cfg
            .and_then(|s| s.channel_env.as_deref())
            .unwrap_or("CHANNEL_ID");

        let token = non_empty(lookup(token_env));
        // Environment wins over the file so one config can serve several channels
        let channel = non_empty(lookup(channel_env))
            .or_else(|| non_empty(slack_cfg.and_then(|s| s.channel.clone())));

        let slack = match (token, channel) {
            (Some(token), Some(channel)) => Some(SlackCredentials { token, channel }),
            (token, _) if require_slack => {
                if token.is_none() {
                    bail!("missing Slack bot token: set {}", token_env);
                }
                bail!("missing Slack channel: set {} or slack.channel", channel_env);
            }
            _ => None,
        };

        Ok(Credentials { llm_api_key, slack })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn builtin_config_is_valid_and_ordered() {
        let cfg = Config::builtin().expect("builtin config");
        cfg.validate().expect("builtin validates");

        let names: Vec<&str> = cfg.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Data & AI", "Tech News", "Political & Economic"]);
        assert_eq!(cfg.categories[2].feeds.len(), 4);
        assert_eq!(cfg.digest.limit_per_category(), 3);
        assert_eq!(cfg.digest.title(), DEFAULT_TITLE);
    }

    #[test]
    fn missing_digest_table_uses_defaults() {
        let cfg = Config::from_toml_str(
            r#"
            [[categories]]
            name = "Only"
            feeds = ["https://example.com/rss"]
            "#,
        )
        .expect("parse");

        assert_eq!(cfg.digest.limit_per_category(), DEFAULT_LIMIT_PER_CATEGORY);
        assert!(cfg.digest.summarize_articles());
        assert!(cfg.llm.is_none());
    }

    #[tokio::test]
    async fn override_file_merges_tables_and_replaces_categories() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"
            [digest]
            title = "Morning brief"

            [[categories]]
            name = "Rust"
            feeds = ["https://blog.rust-lang.org/feed.xml"]
            "#
        )
        .expect("write");

        let cfg = Config::load_with_defaults(Some(file.path()))
            .await
            .expect("load");

        assert_eq!(cfg.digest.title(), "Morning brief");
        // untouched keys of a merged table survive
        assert_eq!(cfg.digest.limit_per_category(), 3);
        assert_eq!(cfg.categories.len(), 1);
        assert_eq!(cfg.categories[0].name, "Rust");
        assert_eq!(
            cfg.llm.as_ref().and_then(|l| l.model.as_deref()),
            Some("gpt-4o-mini")
        );
    }

    #[tokio::test]
    async fn missing_override_file_is_an_error() {
        let result = Config::load_with_defaults(Some(Path::new("/nonexistent/newsdigest.toml"))).await;
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_limit() {
        let mut cfg = Config::builtin().unwrap();
        cfg.apply_env(env(&[(LIMIT_ENV, "5")])).unwrap();
        assert_eq!(cfg.digest.limit_per_category(), 5);

        let bad = cfg.apply_env(env(&[(LIMIT_ENV, "three")]));
        assert!(bad.is_err());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let mut cfg = Config::builtin().unwrap();
        cfg.digest.limit_per_category = Some(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn retry_count_must_stay_bounded() {
        let mut cfg = Config::builtin().unwrap();
        let politeness = cfg.politeness.get_or_insert(PolitenessConfig {
            fetch_timeout_seconds: None,
            max_retries: None,
            retry_backoff_ms: None,
        });
        politeness.max_retries = Some(40);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));

        cfg.politeness.as_mut().unwrap().max_retries = Some(0);
        assert!(cfg.validate().is_err());

        cfg.politeness.as_mut().unwrap().max_retries = Some(10);
        cfg.validate().expect("upper bound accepted");
    }

    #[test]
    fn invalid_feed_url_is_rejected() {
        let cfg = Config::from_toml_str(
            r#"
            [[categories]]
            name = "Broken"
            feeds = ["not a url"]
            "#,
        )
        .unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(format!("{:#}", err).contains("Broken"));
    }

    #[test]
    fn credentials_resolve_from_named_env_vars() {
        let cfg = Config::builtin().unwrap();
        let creds = cfg
            .resolve_credentials(
                env(&[
                    ("OPENAI_API_KEY", "sk-test"),
                    ("SLACK_BOT_TOKEN", "xoxb-test"),
                    ("CHANNEL_ID", "C123"),
                ]),
                true,
            )
            .expect("resolve");

        assert_eq!(creds.llm_api_key, "sk-test");
        let slack = creds.slack.expect("slack credentials");
        assert_eq!(slack.channel, "C123");
        assert!(!format!("{:?}", slack).contains("xoxb-test"));
    }

    #[test]
    fn missing_slack_token_only_fails_when_required() {
        let cfg = Config::builtin().unwrap();
        let lookup = env(&[("OPENAI_API_KEY", "sk-test"), ("CHANNEL_ID", "C123")]);

        let err = cfg.resolve_credentials(&lookup, true).unwrap_err();
        assert!(err.to_string().contains("SLACK_BOT_TOKEN"));

        let creds = cfg.resolve_credentials(&lookup, false).expect("dry run");
        assert!(creds.slack.is_none());
    }

    #[test]
    fn missing_llm_key_is_an_error() {
        let cfg = Config::builtin().unwrap();
        let err = cfg.resolve_credentials(env(&[]), false).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
