//! Gateways between the workers and the external providers.
//!
//! Workers never call a provider directly. The gateways add the two concerns
//! every call shares: response caching and, for language models, transparent
//! provider substitution on rate limiting. A rate-limited primary that is
//! rescued by a fallback provider is invisible to the router.

use std::sync::Arc;
use std::time::Duration;

use pipeline::cache::Fingerprint;
use pipeline::{
    LiteratureProvider, LlmProvider, PaperRecord, ProviderError, ProviderName, ResponseCache,
    StageView,
};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Language models
// ---------------------------------------------------------------------------

/// Whether a completion may be answered from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    #[default]
    Reuse,
    /// Skip the lookup and overwrite the cached entry with the fresh answer.
    Refresh,
}

impl CachePolicy {
    /// `Refresh` once the stage is being re-run for quality; replaying the
    /// cached answer would score exactly the same.
    pub fn for_view(view: &StageView<'_>) -> Self {
        if view.quality_retry > 0 {
            CachePolicy::Refresh
        } else {
            CachePolicy::Reuse
        }
    }
}

/// Cached, multi-provider completion.
#[derive(Clone)]
pub struct LlmGateway {
    primary: Arc<dyn LlmProvider>,
    fallbacks: Vec<Arc<dyn LlmProvider>>,
    cache: Arc<dyn ResponseCache>,
    ttl: Duration,
}

impl LlmGateway {
    /// A gateway that calls `primary` first.
    pub fn new(primary: Arc<dyn LlmProvider>, cache: Arc<dyn ResponseCache>, ttl: Duration) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            cache,
            ttl,
        }
    }

    /// Appends a provider tried when every earlier one is rate limited.
    pub fn with_fallback(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.fallbacks.push(provider);
        self
    }

    /// Providers in default call order.
    pub fn providers(&self) -> impl Iterator<Item = &Arc<dyn LlmProvider>> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// Completes `prompt`.
    ///
    /// `provider_hint` moves the named provider to the front of the order for
    /// this call. On [`ProviderError::RateLimited`] the next provider is tried;
    /// any other error is returned as is.
    pub async fn complete(
        &self,
        prompt: &str,
        provider_hint: Option<&ProviderName>,
    ) -> Result<String, ProviderError> {
        self.complete_with_policy(prompt, provider_hint, CachePolicy::Reuse)
            .await
    }

    /// [`LlmGateway::complete`] with an explicit cache policy.
    pub async fn complete_with_policy(
        &self,
        prompt: &str,
        provider_hint: Option<&ProviderName>,
        policy: CachePolicy,
    ) -> Result<String, ProviderError> {
        let first = provider_hint
            .and_then(|hint| self.providers().position(|p| p.name() == hint))
            .unwrap_or(0);
        let head = self.providers().nth(first).unwrap_or(&self.primary);

        let mut outcome = self.complete_with(head.as_ref(), prompt, policy).await;
        let rest = self
            .providers()
            .enumerate()
            .filter(|(index, _)| *index != first)
            .map(|(_, provider)| provider);
        for provider in rest {
            match &outcome {
                Err(err) if err.is_rate_limited() => warn!(
                    limited = %err.provider(),
                    next = %provider.name(),
                    "provider rate limited, switching"
                ),
                _ => break,
            }
            outcome = self.complete_with(provider.as_ref(), prompt, policy).await;
        }
        outcome
    }

    async fn complete_with(
        &self,
        provider: &dyn LlmProvider,
        prompt: &str,
        policy: CachePolicy,
    ) -> Result<String, ProviderError> {
        let key = Fingerprint::new("llm")
            .part(provider.name().as_str())
            .part(provider.model())
            .part(prompt)
            .finish();
        match policy {
            CachePolicy::Reuse => {
                if let Some(hit) = self.cache.get(&key) {
                    debug!(provider = %provider.name(), "completion cache hit");
                    return Ok(hit);
                }
                debug!(provider = %provider.name(), model = provider.model(), "completion cache miss");
            }
            CachePolicy::Refresh => {
                debug!(provider = %provider.name(), model = provider.model(), "completion cache bypassed");
            }
        }

        let text = provider.complete(prompt).await?;
        self.cache.put(key, text.clone(), self.ttl);
        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Literature
// ---------------------------------------------------------------------------

/// Cached literature search.
///
/// Only non-empty result sets are cached, so an empty search is always
/// repeated against the provider on retry.
#[derive(Clone)]
pub struct LiteratureGateway {
    provider: Arc<dyn LiteratureProvider>,
    cache: Arc<dyn ResponseCache>,
    ttl: Duration,
}

impl LiteratureGateway {
    pub fn new(
        provider: Arc<dyn LiteratureProvider>,
        cache: Arc<dyn ResponseCache>,
        ttl: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            ttl,
        }
    }

    pub async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<PaperRecord>, ProviderError> {
        let key = Fingerprint::new("search")
            .part(self.provider.name().as_str())
            .query(query)
            .part(&max_results.to_string())
            .finish();

        if let Some(hit) = self.cache.get(&key) {
            match serde_json::from_str::<Vec<PaperRecord>>(&hit) {
                Ok(papers) => {
                    debug!(papers = papers.len(), "search cache hit");
                    return Ok(papers);
                }
                Err(err) => {
                    warn!(error = %err, "discarding unreadable cached search result");
                    self.cache.invalidate(&key);
                }
            }
        }

        let papers = self.provider.search(query, max_results).await?;
        if !papers.is_empty() {
            match serde_json::to_string(&papers) {
                Ok(json) => self.cache.put(key, json, self.ttl),
                Err(err) => warn!(error = %err, "search result not cached"),
            }
        }
        Ok(papers)
    }
}
