use audioconv::{
    BatchConverter, BatchOptions, CleanupQueue, ConvertError, DownloadResponder, ErrorKind,
    TempStorage, Transcoder, UploadedFile,
};
use axum::{
    body::Body,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Characters escaped when a storage name is placed into a URL path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Multipart field names that carry uploaded files
const FILE_FIELDS: &[&str] = &["files", "files[]", "file"];

/// Shared handles used by every request
#[derive(Clone)]
pub struct AppState {
    /// Runs uploaded batches
    converter: Arc<BatchConverter>,
    /// Hands out converted artifacts once
    downloads: Arc<DownloadResponder>,
    /// Largest accepted request body, in bytes
    body_limit: usize,
}

impl AppState {
    /// Build the state and start the cleanup worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        storage: Arc<TempStorage>,
        transcoder: Arc<dyn Transcoder>,
        options: BatchOptions,
    ) -> Self {
        let (cleanup, _worker) = CleanupQueue::spawn(storage.clone());
        let converter = BatchConverter::new(storage.clone(), transcoder, cleanup.clone(), options);
        let downloads = DownloadResponder::new(storage, cleanup);
        Self {
            converter: Arc::new(converter),
            downloads: Arc::new(downloads),
            body_limit: crate::config::DEFAULT_MAX_REQUEST_SIZE,
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        self.converter.cleanup()
    }

    pub fn storage(&self) -> &Arc<TempStorage> {
        self.converter.storage()
    }
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable summary of what went wrong
    pub detail: String,
}

/// Response for a successful upload
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    /// Always `"success"`
    pub status: String,
    /// Relative URL the result can be downloaded from, once
    pub download_url: String,
    /// Short human-readable summary
    pub message: String,
    /// Storage name, usable with the download route
    pub filename: String,
    /// Name the download is offered under
    pub display_name: String,
    /// Number of converted files in the result
    pub file_count: usize,
}

/// Application-specific error types for the API
#[derive(Debug, Error)]
pub enum AppError {
    /// Validation, conversion, packaging and download errors
    #[error(transparent)]
    Convert(#[from] ConvertError),
    /// Malformed or oversized multipart body
    #[error("multipart error: {0}")]
    Multipart(#[from] MultipartError),
    /// Failures outside the conversion pipeline
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Convert(e) => match e.kind() {
                ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::ConversionFailed
                | ErrorKind::PackagingFailed
                | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Multipart(e) => e.status(),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client; internal details stay in the logs
    pub fn detail(&self) -> String {
        match self {
            AppError::Convert(e) => match e {
                ConvertError::EmptyBatch
                | ConvertError::UnsupportedFormat(_)
                | ConvertError::InvalidSize { .. } => e.to_string(),
                ConvertError::ConversionFailed { .. } => {
                    "Some files failed to convert, check that they are not corrupted".to_string()
                }
                ConvertError::OutputMissing(_) => {
                    "Conversion failed: some output files were not produced".to_string()
                }
                ConvertError::PackagingFailed(_) => "Failed to create archive".to_string(),
                ConvertError::NotFound(_) => "File not found".to_string(),
                ConvertError::Forbidden(_) => "Access denied".to_string(),
                ConvertError::Io(_) | ConvertError::Internal(_) => {
                    "Internal server error".to_string()
                }
            },
            AppError::Multipart(e) => e.body_text(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }

        let error_response = ErrorResponse {
            detail: self.detail(),
        };
        (status, Json(error_response)).into_response()
    }
}

/// Build the application router with a permissive CORS policy
pub fn app(state: AppState) -> Router {
    app_with_cors(state, CorsLayer::permissive())
}

pub fn app_with_cors(state: AppState, cors: CorsLayer) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health_check))
        .route("/api/convert/mp3-to-wav", post(convert_upload))
        .route("/download/{name}", get(download))
        .route("/api/download/{name}", get(download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "audioconv API",
        "health": "/api/health",
    }))
}

/// Health check endpoint for monitoring and load balancing
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "audioconv API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Accept a multipart batch and convert it
pub async fn convert_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ConvertResponse>, AppError> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or("").to_string();
        if !FILE_FIELDS.contains(&field_name.as_str()) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("").to_string();
        let bytes = field.bytes().await?;
        files.push(UploadedFile::new(file_name, bytes));
    }

    info!(files = files.len(), "upload received");
    let outcome = state.converter.convert_batch(files).await?;

    let message = if outcome.is_archive() {
        format!("Converted {} files", outcome.file_count)
    } else {
        "Conversion succeeded".to_string()
    };

    Ok(Json(ConvertResponse {
        status: "success".to_string(),
        download_url: download_url(&outcome.storage_name),
        message,
        filename: outcome.storage_name,
        display_name: outcome.display_name,
        file_count: outcome.file_count,
    }))
}

/// Stream an artifact once, then let it be deleted
pub async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, AppError> {
    let download = state.downloads.retrieve(&name).await?;

    let disposition = HeaderValue::from_str(&audioconv::content_disposition(
        &download.display_name,
    ))
    .map_err(|e| AppError::Internal(format!("invalid Content-Disposition header: {e}")))?;
    let mime_type = download.mime_type;
    let len = download.len;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(mime_type)),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            ),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
            (header::EXPIRES, HeaderValue::from_static("0")),
        ],
        Body::from_stream(download.into_stream()),
    )
        .into_response())
}

pub fn download_url(storage_name: &str) -> String {
    format!("/download/{}", utf8_percent_encode(storage_name, PATH_SEGMENT))
}
