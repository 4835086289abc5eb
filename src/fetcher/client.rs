//! HTTP client for the contributors endpoint
//!
//! This module handles all requests made by the harvester:
//! - Building the reqwest client with timeouts and user agent
//! - Building the first-page URL with credential and page parameters
//! - Passing every request through the shared rate limiter
//! - Retrying HTTP 429 responses under their own backoff policy
//! - Walking continuation links lazily through [`PageCursor`]

use crate::config::{ApiConfig, ApiKey};
use crate::fetcher::classify::{classify_response, classify_transport, Classified, FetchOutcome};
use crate::fetcher::FetchFailure;
use crate::ratelimit::{BackoffPolicy, Clock, RateLimiter, SystemClock};
use crate::HarvestError;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Query parameter carrying the credential
const API_KEY_PARAM: &str = "api_key";

/// Upper bound on pages walked for one project
pub const MAX_PAGES: u32 = 10_000;

/// Builds an HTTP client with bounded request and connect timeouts
///
/// # Example
///
/// ```no_run
/// use contrib_harvest::config::ApiConfig;
/// use contrib_harvest::fetcher::build_http_client;
///
/// let client = build_http_client(&ApiConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &ApiConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// One page of a project's contributors
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    pub outcome: FetchOutcome,
}

/// Rate-limited client for `<base>/<project>/contributors`
pub struct ContributorsClient<C: Clock = SystemClock> {
    http: Client,
    base: Url,
    per_page: u32,
    api_key: ApiKey,
    limiter: Arc<RateLimiter<C>>,
    retry_429: BackoffPolicy,
}

impl<C: Clock> ContributorsClient<C> {
    /// Creates a client sharing `limiter` with every other request path
    pub fn new(
        config: &ApiConfig,
        api_key: ApiKey,
        limiter: Arc<RateLimiter<C>>,
        retry_429: BackoffPolicy,
    ) -> Result<Self, HarvestError> {
        let http = build_http_client(config)?;
        let base = Url::parse(&config.base_url)?;

        Ok(Self {
            http,
            base,
            per_page: config.per_page,
            api_key,
            limiter,
            retry_429,
        })
    }

    /// URL of page 1 for `project`
    pub fn first_page_url(&self, project: &str) -> Result<Url, HarvestError> {
        if project.trim().is_empty() {
            return Err(HarvestError::InvalidProjectName(project.to_string()));
        }

        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| HarvestError::InvalidProjectName(project.to_string()))?
            .pop_if_empty()
            .push(project)
            .push("contributors");

        url.query_pairs_mut()
            .append_pair("per_page", &self.per_page.to_string())
            .append_pair("page", "1")
            .append_pair(API_KEY_PARAM, self.api_key.expose());

        Ok(url)
    }

    /// Lazy sequence of `project`'s pages, starting at page 1
    pub fn pages(&self, project: &str) -> Result<PageCursor<'_, C>, HarvestError> {
        let first = self.first_page_url(project)?;
        let mut seen = HashSet::new();
        seen.insert(page_identity(&first));
        Ok(PageCursor {
            client: self,
            project: project.to_string(),
            next_url: Some(first),
            next_number: 1,
            seen,
        })
    }

    /// Every page of `project`, in order
    pub async fn fetch_all_pages(&self, project: &str) -> Result<Vec<Page>, HarvestError> {
        let mut cursor = self.pages(project)?;
        let mut pages = Vec::new();
        while let Some(page) = cursor.next_page().await {
            pages.push(page);
        }
        Ok(pages)
    }

    /// Sends one GET for `url`, re-issuing it while the remote answers 429
    async fn fetch_with_retry(&self, url: &Url) -> Classified {
        let mut attempt = 0;

        loop {
            if let Err(exhausted) = self.limiter.acquire().await {
                return Classified {
                    outcome: FetchOutcome::Failure(FetchFailure::RateLimitExhausted {
                        attempts: exhausted.attempts,
                    }),
                    next: None,
                };
            }

            let classified = self.send(url).await;

            let retry_after = match &classified.outcome {
                FetchOutcome::Failure(FetchFailure::RateLimited { retry_after, .. })
                    if attempt < self.retry_429.max_attempts =>
                {
                    *retry_after
                }
                _ => return classified,
            };

            let delay = retry_after
                .unwrap_or_default()
                .max(self.retry_429.delay_for(attempt))
                .min(self.retry_429.max_delay);
            tracing::warn!(
                attempt = attempt + 1,
                max_attempts = self.retry_429.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Remote answered 429, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn send(&self, url: &Url) -> Classified {
        match self.http.get(url.clone()).send().await {
            Ok(response) => classify_response(response).await,
            Err(e) => Classified {
                outcome: FetchOutcome::Failure(classify_transport(&e)),
                next: None,
            },
        }
    }

    /// Resolves a continuation target, keeping the request authenticated
    fn continuation_url(&self, current: &Url, target: &str) -> Option<Url> {
        let mut next = match current.join(target) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Ignoring unparseable continuation link '{}': {}", target, e);
                return None;
            }
        };

        if !next.query_pairs().any(|(k, _)| k == API_KEY_PARAM) {
            next.query_pairs_mut()
                .append_pair(API_KEY_PARAM, self.api_key.expose());
        }

        Some(next)
    }
}

/// Lazy, in-order walk over one project's result pages
///
/// Each call to [`PageCursor::next_page`] performs at most one logical
/// request, so callers can persist a page before the next one is fetched.
/// The walk ends after a page without a continuation link or after a
/// failed page. A continuation link back to a page already walked, or
/// past [`MAX_PAGES`], also ends it.
pub struct PageCursor<'a, C: Clock = SystemClock> {
    client: &'a ContributorsClient<C>,
    project: String,
    next_url: Option<Url>,
    next_number: u32,
    seen: HashSet<String>,
}

impl<'a, C: Clock> PageCursor<'a, C> {
    pub fn project(&self) -> &str {
        &self.project
    }

    /// Fetches the next page, or `None` once the sequence is finished
    pub async fn next_page(&mut self) -> Option<Page> {
        let url = self.next_url.take()?;
        let number = self.next_number;

        let classified = self.client.fetch_with_retry(&url).await;
        tracing::info!(
            "Sent request for project '{}', page {}",
            self.project,
            number
        );

        if classified.outcome.is_success() {
            if let Some(target) = classified.next.as_deref() {
                self.follow(&url, target, number);
            }
        }

        Some(Page {
            number,
            outcome: classified.outcome,
        })
    }

    fn follow(&mut self, current: &Url, target: &str, number: u32) {
        let Some(next) = self.client.continuation_url(current, target) else {
            return;
        };

        if !self.seen.insert(page_identity(&next)) {
            tracing::warn!(
                "Project '{}', page {} links back to a page already fetched; stopping",
                self.project,
                number
            );
            return;
        }

        if number >= MAX_PAGES {
            tracing::warn!(
                "Project '{}' reached {} pages; stopping",
                self.project,
                MAX_PAGES
            );
            return;
        }

        self.next_url = Some(next);
        self.next_number += 1;
    }
}

/// Path and sorted query pairs, so parameter order does not matter
fn page_identity(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    pairs.sort();

    let mut identity = url.path().to_string();
    for (key, value) in pairs {
        identity.push_str(&format!("&{}={}", key, value));
    }
    identity
}
