//! Response classification
//!
//! Maps an HTTP exchange to exactly one of two outcomes: the raw payload,
//! or a failure description the orchestrator records and, for 429, may
//! retry. Nothing here parses the payload.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use serde_json::json;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::fetcher::pagination::next_link;

/// Result of one page request
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// 2xx response; the body bytes, verbatim
    Success(Vec<u8>),

    /// Anything else
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Transport-level fault categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Timeout,
    Connect,
    Body,
    Decode,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Body => "body",
            Self::Decode => "decode",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Why a page request failed
#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    /// Error-range HTTP status other than 429
    Http { status: u16, message: String },

    /// HTTP 429 from the remote despite local limiting
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    /// The exchange itself failed (timeout, reset, unreadable body)
    Transport { kind: TransportKind, message: String },

    /// The local limiter never admitted the call
    RateLimitExhausted { attempts: u32 },
}

impl FetchFailure {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// HTTP status carried by the failure, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            _ => None,
        }
    }

    /// Structured description stored in `execution_error`
    ///
    /// HTTP-layer failures are keyed `HTTPError`, everything else
    /// `Exception`; the merge tooling reads both keys.
    pub fn describe(&self) -> String {
        let value = match self {
            Self::Http { message, .. } | Self::RateLimited { message, .. } => {
                json!({ "HTTPError": message })
            }
            Self::Transport { kind, message } => {
                json!({ "Exception": format!("{} error: {}", kind, message) })
            }
            Self::RateLimitExhausted { attempts } => json!({
                "Exception": format!("RateLimitExhausted after {} attempts", attempts)
            }),
        };
        value.to_string()
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http { message, .. } | Self::RateLimited { message, .. } => {
                write!(f, "HTTP error: {}", message)
            }
            Self::Transport { kind, message } => write!(f, "{} error: {}", kind, message),
            Self::RateLimitExhausted { attempts } => {
                write!(f, "local rate limit exhausted after {} attempts", attempts)
            }
        }
    }
}

/// A classified response plus its continuation link, if any
#[derive(Debug, Clone)]
pub struct Classified {
    pub outcome: FetchOutcome,
    pub next: Option<String>,
}

/// Classifies a received response, reading the body only on success
pub async fn classify_response(response: Response) -> Classified {
    let status = response.status();
    let headers = response.headers().clone();
    let url = response.url().clone();

    if let Some(failure) = classify_status(status, &url, &headers) {
        return Classified {
            outcome: FetchOutcome::Failure(failure),
            next: None,
        };
    }

    match response.bytes().await {
        Ok(body) => Classified {
            outcome: FetchOutcome::Success(body.to_vec()),
            next: next_link(&headers),
        },
        Err(e) => Classified {
            outcome: FetchOutcome::Failure(classify_transport(&e)),
            next: None,
        },
    }
}

/// Returns the failure a status code represents, or `None` for 2xx
pub fn classify_status(status: StatusCode, url: &Url, headers: &HeaderMap) -> Option<FetchFailure> {
    if status.is_success() {
        return None;
    }

    let message = format!(
        "{} {} for url: {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown Status"),
        redact(url)
    );

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Some(FetchFailure::RateLimited {
            retry_after: parse_retry_after(headers),
            message,
        });
    }

    Some(FetchFailure::Http {
        status: status.as_u16(),
        message,
    })
}

/// Classifies a failed exchange
pub fn classify_transport(err: &reqwest::Error) -> FetchFailure {
    let kind = if err.is_timeout() {
        TransportKind::Timeout
    } else if err.is_connect() {
        TransportKind::Connect
    } else if err.is_body() {
        TransportKind::Body
    } else if err.is_decode() {
        TransportKind::Decode
    } else {
        TransportKind::Other
    };

    // reqwest includes the request URL in its message; drop it so the key
    // in the query string never reaches the store.
    let message = match err.url() {
        Some(url) => err
            .to_string()
            .replace(url.as_str(), &redact(url)),
        None => err.to_string(),
    };

    FetchFailure::Transport { kind, message }
}

/// `Retry-After` in its delta-seconds form
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// URL without its query string
pub(crate) fn redact(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
