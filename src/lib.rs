//! Collection endpoint for browser security reports.
//!
//! Browsers POST Content-Security-Policy, HTTP Public-Key-Pinning and
//! Expect-CT failure reports here. Each report is validated, filtered for
//! known noise, enriched with request metadata and appended to a rotating
//! JSON-lines log for downstream ingestion.

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod reports;
pub mod state;
pub mod utils;
pub mod web;
