use std::collections::HashMap;

/// Ordered category -> feed URL mapping, straight from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceConfig {
    pub categories: Vec<CategorySources>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySources {
    pub name: String,
    pub feeds: Vec<String>,
}

impl SourceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style helper, mostly for tests and ad-hoc runs
    pub fn category<S: Into<String>>(mut self, name: S, feeds: &[&str]) -> Self {
        self.categories.push(CategorySources {
            name: name.into(),
            feeds: feeds.iter().map(|f| f.to_string()).collect(),
        });
        self
    }
}

impl From<&[common::CategoryConfig]> for SourceConfig {
    fn from(categories: &[common::CategoryConfig]) -> Self {
        Self {
            categories: categories
                .iter()
                .map(|c| CategorySources {
                    name: c.name.clone(),
                    feeds: c.feeds.clone(),
                })
                .collect(),
        }
    }
}

/// A feed entry reduced to what the digest renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Article {
    pub title: String,
    pub link: String,
}

impl Article {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
        }
    }
}

/// Collected articles, keyed by category in configured order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticlesByCategory {
    entries: Vec<(String, Vec<Article>)>,
}

impl ArticlesByCategory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a category. Categories keep insertion order.
    pub fn push(&mut self, category: impl Into<String>, articles: Vec<Article>) {
        self.entries.push((category.into(), articles));
    }

    pub fn get(&self, category: &str) -> Option<&[Article]> {
        self.entries
            .iter()
            .find(|(name, _)| name == category)
            .map(|(_, articles)| articles.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Article])> {
        self.entries
            .iter()
            .map(|(name, articles)| (name.as_str(), articles.as_slice()))
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Every article with its category, category order then article order.
    pub fn articles(&self) -> impl Iterator<Item = (&str, &Article)> {
        self.entries
            .iter()
            .flat_map(|(name, articles)| articles.iter().map(move |a| (name.as_str(), a)))
    }

    /// All titles flattened in traversal order.
    pub fn titles(&self) -> Vec<&str> {
        self.articles().map(|(_, a)| a.title.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of articles across all categories
    pub fn total(&self) -> usize {
        self.entries.iter().map(|(_, a)| a.len()).sum()
    }
}

/// The three cross-category narrative sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestSections {
    pub mood: String,
    pub focus_summary: String,
    pub watch_list: String,
}

/// One-line blurb for a single article, paired with its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleSummary {
    pub link: String,
    pub text: String,
}

/// Per-article summaries. Structurally equal articles share an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleSummaries {
    by_article: HashMap<Article, ArticleSummary>,
}

impl ArticleSummaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, article: Article, summary: ArticleSummary) {
        self.by_article.insert(article, summary);
    }

    pub fn get(&self, article: &Article) -> Option<&ArticleSummary> {
        self.by_article.get(article)
    }

    pub fn len(&self) -> usize {
        self.by_article.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_article.is_empty()
    }
}

impl FromIterator<(Article, ArticleSummary)> for ArticleSummaries {
    fn from_iter<I: IntoIterator<Item = (Article, ArticleSummary)>>(iter: I) -> Self {
        Self {
            by_article: iter.into_iter().collect(),
        }
    }
}
