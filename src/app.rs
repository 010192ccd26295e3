use crate::config::Config;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web::create_router;
use crate::web::middleware::rate_limit::{PRUNE_INTERVAL, spawn_pruner};
use anyhow::Context;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Main application struct: validated config plus the shared request state.
pub struct App {
    config: Config,
    app_state: AppState,
}

impl App {
    /// Open the report log and load schemas. Failing here aborts startup.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let app_state = AppState::from_config(&config).context("Failed to initialize state")?;

        info!(
            report_log = %config.report_log_path.display(),
            max_bytes = config.report_log_max_bytes,
            backups = config.report_log_backups,
            csp_schema = %config.csp_schema_path.display(),
            hpkp_schema = %config.hpkp_schema_path.display(),
            "report pipeline ready"
        );

        Ok(App { config, app_state })
    }

    /// Serve until a shutdown signal, then drain within `shutdown_timeout`.
    pub async fn run(self) -> ExitCode {
        let addr = self.config.socket_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(address = %addr, error = %e, "Failed to bind listener");
                return ExitCode::FAILURE;
            }
        };

        info!(
            address = %addr,
            rate_limit = self.config.rate_limit_enabled,
            request_timeout = fmt_duration(self.config.request_timeout),
            "web server listening"
        );

        let pruner = self
            .app_state
            .rate_limits
            .clone()
            .map(|limits| spawn_pruner(limits, PRUNE_INTERVAL));

        let router = create_router(self.app_state, &self.config);
        let code = serve(listener, router, &self.config).await;

        if let Some(pruner) = pruner {
            pruner.abort();
        }
        code
    }
}

/// Run the server until it fails or a shutdown signal has been drained.
async fn serve(listener: TcpListener, router: axum::Router, config: &Config) -> ExitCode {
    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.notified().await }
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        result = &mut server => {
            return match result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) => {
                    error!(error = %e, "web server failed");
                    ExitCode::FAILURE
                }
                Err(e) => {
                    error!(error = %e, "web server task panicked");
                    ExitCode::FAILURE
                }
            };
        }
        _ = shutdown_signal() => {
            info!(timeout = fmt_duration(config.shutdown_timeout), "draining in-flight requests");
            shutdown.notify_one();
        }
    }

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(Ok(Ok(()))) => {
            info!("graceful shutdown complete");
            ExitCode::SUCCESS
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "web server failed during shutdown");
            ExitCode::FAILURE
        }
        Ok(Err(e)) => {
            error!(error = %e, "web server task panicked during shutdown");
            ExitCode::FAILURE
        }
        Err(_) => {
            warn!(
                timeout = fmt_duration(config.shutdown_timeout),
                "graceful shutdown timed out"
            );
            ExitCode::FAILURE
        }
    }
}

/// Resolves on SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
