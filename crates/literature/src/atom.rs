//! Minimal Atom feed reader for arXiv query responses.
//!
//! arXiv's feed is flat and stable, so a handful of regular expressions over
//! `<entry>` blocks is sufficient. Anything richer (namespaced categories,
//! `arxiv:comment`) is ignored.

use pipeline::{PaperId, PaperRecord, Timestamp};
use regex::Regex;

pub(crate) struct AtomParser {
    entry: Regex,
    id: Regex,
    title: Regex,
    summary: Regex,
    author: Regex,
    published: Regex,
    whitespace: Regex,
}

/// An entry the parser could not use.
#[derive(Debug, PartialEq)]
pub(crate) enum FeedProblem {
    /// arXiv reports query errors as a 200 feed whose single entry points at
    /// `/api/errors`.
    ApiError(String),
}

impl AtomParser {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            entry: Regex::new(r"(?s)<entry\b[^>]*>(.*?)</entry>")?,
            id: Regex::new(r"(?s)<id\b[^>]*>(.*?)</id>")?,
            title: Regex::new(r"(?s)<title\b[^>]*>(.*?)</title>")?,
            summary: Regex::new(r"(?s)<summary\b[^>]*>(.*?)</summary>")?,
            author: Regex::new(r"(?s)<author\b[^>]*>.*?<name\b[^>]*>(.*?)</name>.*?</author>")?,
            published: Regex::new(r"(?s)<published\b[^>]*>(.*?)</published>")?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Papers in feed order. Entries without an id or title are skipped.
    pub(crate) fn parse(
        &self,
        feed: &str,
        source: &str,
        retrieved_at: Timestamp,
    ) -> Result<Vec<PaperRecord>, FeedProblem> {
        let mut papers = Vec::new();
        for entry in self.entry.captures_iter(feed) {
            let body = &entry[1];
            let Some(raw_id) = self.field(&self.id, body) else {
                continue;
            };
            if raw_id.contains("/api/errors") {
                let reason = self
                    .field(&self.summary, body)
                    .unwrap_or_else(|| "unspecified query error".to_string());
                return Err(FeedProblem::ApiError(reason));
            }
            let Some(id) = PaperId::new(raw_id.clone()) else {
                continue;
            };
            let Some(title) = self.field(&self.title, body).filter(|t| !t.is_empty()) else {
                continue;
            };

            let authors = self
                .author
                .captures_iter(body)
                .map(|c| self.clean(&c[1]))
                .filter(|name| !name.is_empty())
                .collect();
            let published = self
                .field(&self.published, body)
                .map(|date| date.chars().take(10).collect::<String>())
                .filter(|date| date.len() == 10);

            papers.push(PaperRecord {
                id,
                title,
                authors,
                abstract_text: self.field(&self.summary, body).unwrap_or_default(),
                url: raw_id,
                source: source.to_string(),
                published,
                retrieved_at,
            });
        }
        Ok(papers)
    }

    fn field(&self, pattern: &Regex, body: &str) -> Option<String> {
        pattern.captures(body).map(|c| self.clean(&c[1]))
    }

    fn clean(&self, raw: &str) -> String {
        let collapsed = self.whitespace.replace_all(raw.trim(), " ");
        unescape(&collapsed)
    }
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
