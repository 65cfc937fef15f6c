//! Server configuration, from command-line flags or `AUDIOCONV_*` variables

use anyhow::Context;
use audioconv::{BatchOptions, FormatPolicy, TempStorage, DEFAULT_MAX_FILE_SIZE};
use axum::http::{HeaderValue, Method};
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Default request body cap: room for a handful of maximum-size files
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 512 * 1024 * 1024;

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "AUDIOCONV_BIND", default_value = "0.0.0.0:8000")]
    pub bind: SocketAddr,

    /// Directory for temporary artifacts (defaults to <system temp>/audio_converter)
    #[arg(long, env = "AUDIOCONV_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// ffmpeg binary used for conversions
    #[arg(long, env = "AUDIOCONV_FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Accepted input extensions
    #[arg(
        long = "accept",
        env = "AUDIOCONV_ACCEPT",
        value_delimiter = ',',
        default_value = "mp3"
    )]
    pub accepted_formats: Vec<String>,

    /// Largest accepted file, in bytes
    #[arg(long, env = "AUDIOCONV_MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_FILE_SIZE)]
    pub max_file_size: u64,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "AUDIOCONV_MAX_REQUEST_SIZE", default_value_t = DEFAULT_MAX_REQUEST_SIZE)]
    pub max_request_size: usize,

    /// Origins allowed by CORS; permissive when empty
    #[arg(long = "allow-origin", env = "AUDIOCONV_ALLOW_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Skip removing leftovers of earlier runs at startup
    #[arg(long, env = "AUDIOCONV_NO_STARTUP_SWEEP")]
    pub no_startup_sweep: bool,

    /// Age in seconds after which a leftover artifact counts as orphaned
    #[arg(long, env = "AUDIOCONV_ORPHAN_MAX_AGE", default_value_t = 3600)]
    pub orphan_max_age_secs: u64,
}

impl ServerConfig {
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(TempStorage::default_base)
    }

    pub fn orphan_max_age(&self) -> Duration {
        Duration::from_secs(self.orphan_max_age_secs)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions::default()
            .with_formats(FormatPolicy::new(&self.accepted_formats))
            .with_max_file_size(self.max_file_size)
    }

    /// Permissive when no origins are configured
    pub fn cors_layer(&self) -> anyhow::Result<CorsLayer> {
        if self.allowed_origins.is_empty() {
            return Ok(CorsLayer::permissive());
        }

        let origins = self
            .allowed_origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim())
                    .with_context(|| format!("invalid CORS origin: {origin}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any))
    }
}
