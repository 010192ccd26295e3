//! Command-line arguments.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version, about = "Collection endpoint for browser security reports")]
pub struct Args {
    /// TOML config file (defaults to ./collector.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Diagnostic log output format
    #[arg(long, value_enum, default_value_t = TracingFormat::default())]
    pub tracing: TracingFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable, for local development
    Pretty,
    /// One JSON object per event, for log shippers
    Json,
}

impl Default for TracingFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            TracingFormat::Pretty
        } else {
            TracingFormat::Json
        }
    }
}
