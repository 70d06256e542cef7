use crate::model::{ArticleSummaries, ArticlesByCategory, DigestSections};

/// Slack rejects section text longer than this
pub const MAX_SECTION_CHARS: usize = 3000;
/// and header text longer than this.
pub const MAX_HEADER_CHARS: usize = 150;

pub const EMPTY_CATEGORY_TEXT: &str = "_No new articles._";

/// A renderable unit of the digest. Section text is Slack mrkdwn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Header(String),
    Section(String),
    Divider,
}

/// Lays out a digest. Pure: the same inputs always give the same blocks.
#[derive(Debug, Clone)]
pub struct DigestComposer {
    title: String,
}

impl DigestComposer {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    /// Header, the three narrative sections each closed by a divider, then
    /// every category with its article links, then a closing divider.
    ///
    /// Articles without a summary are rendered with their raw title; empty
    /// categories get a placeholder line rather than being dropped.
    pub fn compose(
        &self,
        sections: &DigestSections,
        articles: &ArticlesByCategory,
        summaries: &ArticleSummaries,
    ) -> Vec<Block> {
        let mut blocks = Vec::with_capacity(8 + articles.len() + articles.total());

        blocks.push(Block::Header(truncate(&self.title, MAX_HEADER_CHARS)));

        for (heading, body) in [
            ("Mood of the day", &sections.mood),
            ("Summary for Data Analysts", &sections.focus_summary),
            ("What to watch today", &sections.watch_list),
        ] {
            blocks.push(section(format!("*{}*\n{}", heading, escape_mrkdwn(body))));
            blocks.push(Block::Divider);
        }

        for (category, items) in articles.iter() {
            blocks.push(section(format!("*{}*", escape_mrkdwn(category))));

            if items.is_empty() {
                blocks.push(Block::Section(EMPTY_CATEGORY_TEXT.to_string()));
                continue;
            }

            for article in items {
                let label = summaries
                    .get(article)
                    .map(|s| s.text.as_str())
                    .unwrap_or(article.title.as_str());
                blocks.push(section(format!(
                    "• <{}|{}>",
                    escape_link(&article.link),
                    escape_mrkdwn(label)
                )));
            }
        }

        blocks.push(Block::Divider);
        blocks
    }
}

/// Plain-text rendering of the blocks, used as the notification fallback.
pub fn flatten(blocks: &[Block]) -> String {
    blocks
        .iter()
        .map(|block| match block {
            Block::Header(text) => text.as_str(),
            Block::Section(text) => text.as_str(),
            Block::Divider => "---",
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn section(text: String) -> Block {
    Block::Section(truncate(&text, MAX_SECTION_CHARS))
}

/// Slack control characters in free text
fn escape_mrkdwn(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

// `|` and `>` would end the link target early
fn escape_link(link: &str) -> String {
    link.replace('|', "%7C").replace('>', "%3E").replace('<', "%3C")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}
