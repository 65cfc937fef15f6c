//! # audioconv
//!
//! Upload-convert-download plumbing for audio files, with the actual codec
//! work delegated to an external tool.
//!
//! ## Features
//!
//! - **Batch conversion**: validate N uploads together, convert them
//!   concurrently and return one result (a single file or a zip archive)
//! - **Confined temp storage**: every artifact lives in one flat directory;
//!   client-supplied names can never reach outside it
//! - **Guaranteed cleanup**: inputs, intermediates and failed partial outputs
//!   are always scheduled for deletion; downloads are one-shot
//! - **Pluggable codec**: anything implementing [`Transcoder`]; ffmpeg ships
//!   as [`FfmpegTranscoder`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use audioconv::{
//!     BatchConverter, BatchOptions, CleanupQueue, DownloadResponder, FfmpegTranscoder,
//!     TempStorage, UploadedFile,
//! };
//! use futures::StreamExt;
//! use std::sync::Arc;
//!
//! # async fn run() -> audioconv::Result<()> {
//! let storage = Arc::new(TempStorage::open("/tmp/audio_converter")?);
//! let (cleanup, _worker) = CleanupQueue::spawn(Arc::clone(&storage));
//!
//! let converter = BatchConverter::new(
//!     Arc::clone(&storage),
//!     Arc::new(FfmpegTranscoder::new("ffmpeg")),
//!     cleanup.clone(),
//!     BatchOptions::default(),
//! );
//! let outcome = converter
//!     .convert_batch(vec![
//!         UploadedFile::new("a.mp3", std::fs::read("a.mp3")?),
//!         UploadedFile::new("b.mp3", std::fs::read("b.mp3")?),
//!     ])
//!     .await?;
//!
//! let downloads = DownloadResponder::new(storage, cleanup);
//! let mut stream = downloads.retrieve(&outcome.storage_name).await?.into_stream();
//! while let Some(chunk) = stream.next().await {
//!     let _bytes = chunk?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod batch;
pub mod cleanup;
pub mod download;
pub mod error;
pub mod formats;
pub mod storage;
pub mod transcoder;

pub use archive::{disambiguate_names, ArchiveEntry, ArchivePackager, PackedArchive, Packager};
pub use batch::{
    BatchConverter, BatchOptions, BatchOutcome, BatchToken, ConversionResult, UploadedFile,
};
pub use cleanup::{CleanupQueue, CleanupStats, DeleteOnDrop};
pub use download::{
    content_disposition, download_display_name, Download, DownloadResponder, DownloadStream,
};
pub use error::{ConvertError, ErrorKind, Result};
pub use formats::{mime_type_for, FormatPolicy, DEFAULT_MAX_FILE_SIZE, SUPPORTED_AUDIO_FORMATS};
pub use storage::{SweepReport, TempStorage};
pub use transcoder::{EncodingParams, FfmpegTranscoder, TranscodeError, Transcoder};
