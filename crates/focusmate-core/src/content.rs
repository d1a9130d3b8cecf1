//! Page content extraction seam.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_SNIPPET_CHARS: usize = 500;

/// Text pulled from a page for classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub title: String,
    pub content_snippet: String,
    pub h1: Option<String>,
    pub description: Option<String>,
}

impl PageContent {
    /// Content carrying nothing but the tab title
    #[must_use]
    pub fn bare(title: &str) -> Self {
        Self {
            title: title.trim().to_string(),
            ..Self::default()
        }
    }

    /// Best title: the page's own, then its heading, then the tab title
    #[must_use]
    pub fn best_title<'a>(&'a self, tab_title: &'a str) -> &'a str {
        if !self.title.trim().is_empty() {
            return self.title.trim();
        }
        match self.h1.as_deref().map(str::trim) {
            Some(h1) if !h1.is_empty() => h1,
            _ => tab_title.trim(),
        }
    }

    #[must_use]
    pub fn snippet(&self) -> Option<&str> {
        let snippet = self.content_snippet.trim();
        (!snippet.is_empty()).then_some(snippet)
    }
}

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<PageContent>;
}

/// Collapse whitespace, drop symbols and cap the length
///
/// Over-long text is cut at a word boundary when one lies in the last
/// fifth of the budget, and marked with an ellipsis.
#[must_use]
pub fn normalize_snippet(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if keeps_meaning(c) { c } else { ' ' })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= MAX_SNIPPET_CHARS {
        return collapsed;
    }

    let budget = MAX_SNIPPET_CHARS - 3;
    let mut cut: String = collapsed.chars().take(budget).collect();
    if let Some(space) = cut.rfind(' ') {
        if cut[..space].chars().count() > budget * 4 / 5 {
            cut.truncate(space);
        }
    }
    cut.push_str("...");
    cut
}

fn keeps_meaning(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || c == '_'
        || matches!(c, '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '-')
}

/// Extractor that fetches the page over HTTP and reads its markup
pub struct HttpContentExtractor {
    client: reqwest::Client,
    title: Regex,
    h1: Regex,
    description: Regex,
    paragraph: Regex,
    noise: Regex,
    tag: Regex,
}

impl HttpContentExtractor {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("focusmate/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            title: Regex::new(r"(?is)<title[^>]*>(.*?)</title>")?,
            h1: Regex::new(r"(?is)<h1(?:\s[^>]*)?>(.*?)</h1>")?,
            description: Regex::new(
                r#"(?is)<meta\s+[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']"#,
            )?,
            paragraph: Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)</p>")?,
            noise: Regex::new(r"(?is)<(script|style|nav|header|footer|aside)[^>]*>.*?</(script|style|nav|header|footer|aside)>")?,
            tag: Regex::new(r"(?s)<[^>]+>")?,
        })
    }

    fn text_of(&self, html: &str) -> String {
        let stripped = self.tag.replace_all(html, " ");
        decode_entities(&stripped)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn capture(&self, re: &Regex, html: &str) -> Option<String> {
        re.captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| self.text_of(m.as_str()))
            .filter(|text| !text.is_empty())
    }

    /// Parse a document into page content
    #[must_use]
    pub fn parse(&self, html: &str) -> PageContent {
        let html = self.noise.replace_all(html, " ");
        let title = self.capture(&self.title, &html).unwrap_or_default();
        let h1 = self.capture(&self.h1, &html);
        let description = self.capture(&self.description, &html);

        // Description, then heading, then the first real paragraph
        let snippet = description
            .clone()
            .filter(|d| d.chars().count() <= MAX_SNIPPET_CHARS)
            .or_else(|| h1.clone())
            .or_else(|| {
                self.paragraph
                    .captures_iter(&html)
                    .filter_map(|caps| caps.get(1).map(|m| self.text_of(m.as_str())))
                    .find(|text| text.chars().count() > 20)
            })
            .unwrap_or_default();

        PageContent {
            title,
            content_snippet: normalize_snippet(&snippet),
            h1,
            description,
        }
    }
}

#[async_trait]
impl ContentExtractor for HttpContentExtractor {
    async fn extract(&self, url: &str) -> Result<PageContent> {
        let html = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Page request failed for {url}"))?
            .text()
            .await
            .context("Failed to read page body")?;
        Ok(self.parse(&html))
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
