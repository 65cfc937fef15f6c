//! One-shot retrieval of converted artifacts
//!
//! A storage name returned by the batch converter can be fetched exactly
//! once: the returned [`Download`] owns the artifact and schedules its
//! deletion as soon as the caller is done with the byte stream.

use crate::cleanup::{CleanupQueue, DeleteOnDrop};
use crate::error::{ConvertError, Result};
use crate::formats::mime_type_for;
use crate::storage::TempStorage;
use bytes::Bytes;
use futures::Stream;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// RFC 5987 `attr-char`: everything else is percent-encoded
const ATTR_CHAR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Name shown to the client: the storage name minus its batch-token prefix
pub fn download_display_name(storage_name: &str) -> &str {
    match storage_name.split_once('_') {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => storage_name,
    }
}

/// `Content-Disposition` value carrying an RFC 5987 encoded file name
pub fn content_disposition(display_name: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(display_name, ATTR_CHAR)
    )
}

/// An artifact checked out for download
#[derive(Debug)]
pub struct Download {
    pub storage_name: String,
    pub display_name: String,
    pub mime_type: &'static str,
    pub len: u64,
    file: File,
    guard: DeleteOnDrop,
}

impl Download {
    /// Byte stream of the artifact; deletion is scheduled when the stream is dropped
    pub fn into_stream(self) -> DownloadStream {
        DownloadStream {
            inner: ReaderStream::new(self.file),
            _guard: self.guard,
        }
    }
}

/// Streams a downloaded artifact and deletes it afterwards
#[derive(Debug)]
pub struct DownloadStream {
    inner: ReaderStream<File>,
    _guard: DeleteOnDrop,
}

impl Stream for DownloadStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

pub struct DownloadResponder {
    storage: Arc<TempStorage>,
    cleanup: CleanupQueue,
}

impl DownloadResponder {
    pub fn new(storage: Arc<TempStorage>, cleanup: CleanupQueue) -> Self {
        Self { storage, cleanup }
    }

    /// Check out an artifact by storage name.
    ///
    /// Names that do not resolve to a plain file inside the temp directory
    /// are `Forbidden`; names with nothing behind them are `NotFound`.
    pub async fn retrieve(&self, storage_name: &str) -> Result<Download> {
        let path = self.storage.resolve(storage_name).inspect_err(|_| {
            warn!(name = %storage_name, "rejected download name");
        })?;

        if !self.storage.exists(&path).await {
            warn!(path = %path.display(), "download target does not exist");
            return Err(ConvertError::NotFound(storage_name.to_string()));
        }

        if !self.storage.confine(&path) {
            warn!(path = %path.display(), "download target escapes the temp directory");
            return Err(ConvertError::Forbidden(storage_name.to_string()));
        }

        let file = open_artifact(&path, storage_name).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(ConvertError::NotFound(storage_name.to_string()));
        }

        let display_name = download_display_name(storage_name).to_string();
        let mime_type = mime_type_for(&display_name);
        info!(
            name = %storage_name,
            display = %display_name,
            mime = mime_type,
            bytes = metadata.len(),
            "download started"
        );

        Ok(Download {
            storage_name: storage_name.to_string(),
            display_name,
            mime_type,
            len: metadata.len(),
            file,
            guard: DeleteOnDrop::new(path, self.cleanup.clone()),
        })
    }
}

async fn open_artifact(path: &Path, storage_name: &str) -> Result<File> {
    match File::open(path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Err(ConvertError::NotFound(storage_name.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
