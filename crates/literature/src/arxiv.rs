//! arXiv search over the public Atom export API.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{LiteratureProvider, PaperRecord, ProviderError, ProviderName, Timestamp};
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::atom::{AtomParser, FeedProblem};

pub const ARXIV_BASE_URL: &str = "https://export.arxiv.org/api/query";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Searches arXiv by relevance across all fields.
///
/// The request is `search_query=all:<query>` sorted by relevance, descending.
/// Every returned record carries `source = "arxiv"` and uses the entry's abstract
/// URL as both its [`pipeline::PaperId`] and its link.
pub struct ArxivProvider {
    name: ProviderName,
    base_url: String,
    client: Client,
    parser: AtomParser,
}

impl ArxivProvider {
    pub fn new(name: ProviderName, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|err| configuration(&name, format!("cannot build HTTP client: {err}")))?;
        let parser = AtomParser::new()
            .map_err(|err| configuration(&name, format!("invalid feed pattern: {err}")))?;
        Ok(Self {
            name,
            base_url: base_url.into(),
            client,
            parser,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| configuration(&self.name, format!("cannot build HTTP client: {err}")))?;
        Ok(self)
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<String, ProviderError> {
        let search_query = format!("all:{query}");
        let max_results = max_results.to_string();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", search_query.as_str()),
                ("start", "0"),
                ("max_results", max_results.as_str()),
                ("sortBy", "relevance"),
                ("sortOrder", "descending"),
            ])
            .send()
            .await
            .map_err(|err| ProviderError::Unavailable {
                provider: self.name.clone(),
                message: err.to_string(),
            })?;

        let status = response.status();
        debug!(provider = %self.name, status = status.as_u16(), "arXiv responded");
        if !status.is_success() {
            return Err(self.status_error(status, response).await);
        }
        response.text().await.map_err(|err| ProviderError::Unavailable {
            provider: self.name.clone(),
            message: format!("cannot read response body: {err}"),
        })
    }

    async fn status_error(&self, status: StatusCode, response: Response) -> ProviderError {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.trim().chars().take(200).collect();
        let message = format!("HTTP {status}: {snippet}");
        warn!(provider = %self.name, status = status.as_u16(), "arXiv request failed");

        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
                provider: self.name.clone(),
                retry_after,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => configuration(&self.name, message),
            s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
                ProviderError::Unavailable {
                    provider: self.name.clone(),
                    message,
                }
            }
            _ => ProviderError::InvalidResponse {
                provider: self.name.clone(),
                message,
            },
        }
    }
}

#[async_trait]
impl LiteratureProvider for ArxivProvider {
    fn name(&self) -> &ProviderName {
        &self.name
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PaperRecord>, ProviderError> {
        let feed = self.fetch(query, max_results).await?;
        let mut papers = self
            .parser
            .parse(&feed, "arxiv", Timestamp::now())
            .map_err(|problem| match problem {
                FeedProblem::ApiError(reason) => {
                    configuration(&self.name, format!("arXiv rejected the query: {reason}"))
                }
            })?;
        papers.truncate(max_results);

        info!(provider = %self.name, query, found = papers.len(), "arXiv search complete");
        Ok(papers)
    }
}

fn configuration(provider: &ProviderName, message: String) -> ProviderError {
    ProviderError::Configuration {
        provider: provider.clone(),
        message,
    }
}
