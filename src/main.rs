use clap::Parser;
use report_collector::app::App;
use report_collector::cli::Args;
use report_collector::config::Config;
use report_collector::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Logging depends on config, so config errors can only go to stderr.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        environment = if cfg!(debug_assertions) {
            "development"
        } else {
            "production"
        },
        "starting report-collector"
    );

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = format!("{e:#}"), "Failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    app.run().await
}
