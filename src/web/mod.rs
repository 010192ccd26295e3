//! HTTP surface of the collector.

pub mod error;
pub mod middleware;
pub mod reports;
pub mod routes;
pub mod status;

pub use routes::*;
