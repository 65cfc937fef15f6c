//! # audioconv-api
//!
//! HTTP front end for the audioconv batch converter: upload a batch of audio
//! files, receive a storage name, download the result once.
//!

mod api;
mod config;


pub use api::{
    app, app_with_cors, convert_upload, download, download_url, health_check, root, AppError,
    AppState, ConvertResponse, ErrorResponse,
};
pub use config::{ServerConfig, DEFAULT_MAX_REQUEST_SIZE};

use anyhow::Context;
use audioconv::{FfmpegTranscoder, TempStorage};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default `RUST_LOG` directives when none are set
pub const DEFAULT_LOG_FILTER: &str = "audioconv_api=debug,audioconv=info,tower_http=debug";

/// Install the global tracing subscriber
pub fn init_tracing() {
    init_tracing_with(DEFAULT_LOG_FILTER);
}

/// Like [`init_tracing`], with a different fallback when `RUST_LOG` is unset
pub fn init_tracing_with(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the server until Ctrl-C, then drain pending deletions
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let temp_dir = config.temp_dir();
    let storage = Arc::new(
        TempStorage::open(&temp_dir)
            .with_context(|| format!("failed to open temp directory {}", temp_dir.display()))?,
    );

    if !config.no_startup_sweep {
        match storage.sweep(config.orphan_max_age()).await {
            Ok(report) => info!(
                removed = report.removed,
                kept = report.kept,
                failed = report.failed,
                "startup sweep finished"
            ),
            Err(e) => warn!(error = %e, "startup sweep failed"),
        }
    }

    let transcoder = Arc::new(FfmpegTranscoder::new(&config.ffmpeg));
    let state = AppState::new(storage.clone(), transcoder, config.batch_options())
        .with_body_limit(config.max_request_size);
    let cleanup = state.cleanup().clone();
    let router = app_with_cors(state, config.cors_layer()?);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    info!(
        address = %config.bind,
        temp_dir = %storage.base().display(),
        "audioconv API listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutting down, flushing pending deletions");
    cleanup.flush().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
