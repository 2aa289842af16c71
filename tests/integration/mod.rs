//! Integration tests for souk-scrape
//!
//! `engine_tests` drives the assembled engine with scripted components on
//! tokio's paused clock; `scrape_tests` runs the real HTTP stack against
//! wiremock servers end-to-end.

mod engine_tests;
mod scrape_tests;
mod support;
