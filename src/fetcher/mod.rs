//! Fetcher module for the contributors endpoint
//!
//! This module contains everything between a package name and its raw
//! result pages:
//! - HTTP client construction and request URLs
//! - `Link` header pagination
//! - Response classification into success or failure

mod classify;
mod client;
mod pagination;

pub use classify::{
    classify_response, classify_status, classify_transport, Classified, FetchFailure,
    FetchOutcome, TransportKind,
};
pub use client::{build_http_client, ContributorsClient, Page, PageCursor, MAX_PAGES};
pub use pagination::{next_link, parse_link_header, LinkEntry};
