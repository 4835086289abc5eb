//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the contributors endpoint and
//! a temporary SQLite database for the record store.

mod harvest_tests;
mod ratelimit_tests;
