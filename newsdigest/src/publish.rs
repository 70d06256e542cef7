use std::fmt;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::compose::Block;

pub const DEFAULT_SLACK_API_URL: &str = "https://slack.com/api";

/// Slack refuses messages carrying more blocks than this
pub const MAX_BLOCKS_PER_MESSAGE: usize = 50;

/// Destination channel identifier (e.g. a Slack channel ID)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRef(String);

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the message landed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub channel: String,
    /// Transport message id (Slack `ts`), when provided
    pub ts: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("digest has {count} blocks, a single message accepts at most {max}")]
    TooManyBlocks { count: usize, max: usize },
    #[error("delivery request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("delivery endpoint answered with status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("message rejected by the API: {0}")]
    Api(String),
}

/// Delivers one composed digest as one message.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn send(
        &self,
        destination: &ChannelRef,
        blocks: &[Block],
        fallback_text: &str,
    ) -> Result<PublishReceipt, PublishError>;
}

/// Posts through the Slack Web API (`chat.postMessage`).
pub struct SlackPublisher {
    client: Client,
    endpoint: String,
    token: String,
}

impl SlackPublisher {
    pub fn new(api_url: &str, token: impl Into<String>, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat.postMessage", api_url.trim_end_matches('/')),
            token: token.into(),
        })
    }

    pub fn from_config(config: Option<&common::SlackConfig>, token: impl Into<String>) -> anyhow::Result<Self> {
        let api_url = config
            .and_then(|c| c.api_url.as_deref())
            .unwrap_or(DEFAULT_SLACK_API_URL);
        let timeout = config.and_then(|c| c.timeout_seconds).unwrap_or(15);
        Self::new(api_url, token, timeout)
    }
}

#[async_trait]
impl Publisher for SlackPublisher {
    async fn send(
        &self,
        destination: &ChannelRef,
        blocks: &[Block],
        fallback_text: &str,
    ) -> Result<PublishReceipt, PublishError> {
        // Checked before sending so a digest is never split or half posted
        if blocks.len() > MAX_BLOCKS_PER_MESSAGE {
            return Err(PublishError::TooManyBlocks {
                count: blocks.len(),
                max: MAX_BLOCKS_PER_MESSAGE,
            });
        }

        let body = PostMessage {
            channel: destination.as_str(),
            text: fallback_text,
            blocks: blocks.iter().map(SlackBlock::from).collect(),
            unfurl_links: false,
            unfurl_media: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(PublishError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Status { status, body });
        }

        // Slack reports API failures with 200 + ok=false
        let reply: PostMessageReply = response.json().await.map_err(PublishError::Transport)?;
        if !reply.ok {
            return Err(PublishError::Api(
                reply.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }

        let receipt = PublishReceipt {
            channel: reply.channel.unwrap_or_else(|| destination.to_string()),
            ts: reply.ts,
        };
        info!(channel = %receipt.channel, ts = ?receipt.ts, blocks = blocks.len(), "digest posted");
        Ok(receipt)
    }
}

// Slack Web API request/response structures
#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: &'a str,
    blocks: Vec<SlackBlock<'a>>,
    unfurl_links: bool,
    unfurl_media: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SlackBlock<'a> {
    Header { text: SlackText<'a> },
    Section { text: SlackText<'a> },
    Divider,
}

#[derive(Debug, Serialize)]
struct SlackText<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    emoji: Option<bool>,
}

impl<'a> From<&'a Block> for SlackBlock<'a> {
    fn from(block: &'a Block) -> Self {
        match block {
            Block::Header(text) => SlackBlock::Header {
                text: SlackText {
                    kind: "plain_text",
                    text,
                    emoji: Some(true),
                },
            },
            Block::Section(text) => SlackBlock::Section {
                text: SlackText {
                    kind: "mrkdwn",
                    text,
                    emoji: None,
                },
            },
            Block::Divider => SlackBlock::Divider,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostMessageReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}
