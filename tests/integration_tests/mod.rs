//! Integration tests module
//!
//! End-to-end tests for histpull, run against the in-memory historian or a
//! wiremock server standing in for the Web API.

pub mod fixtures;
pub mod loader_test;
pub mod webapi_test;
