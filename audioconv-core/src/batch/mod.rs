//! Batch conversion of uploaded files
//!
//! A batch is one upload request: N files that are validated together,
//! persisted under a shared random token, converted concurrently and then
//! either handed back as a single output or packed into one archive.
//!
//! # Artifact lifecycle
//!
//! Every file a batch writes is tracked until it is either scheduled for
//! deletion or handed off to the caller as the download target. Whatever is
//! still tracked when the batch ends (error, panic, or the request future
//! being dropped) is scheduled for deletion automatically.
//!
//! # Example
//!
//! ```rust,no_run
//! use audioconv::{BatchConverter, BatchOptions, CleanupQueue, FfmpegTranscoder, TempStorage, UploadedFile};
//! use std::sync::Arc;
//!
//! # async fn run() -> audioconv::Result<()> {
//! let storage = Arc::new(TempStorage::open(TempStorage::default_base())?);
//! let (cleanup, _worker) = CleanupQueue::spawn(Arc::clone(&storage));
//! let converter = BatchConverter::new(
//!     storage,
//!     Arc::new(FfmpegTranscoder::new("ffmpeg")),
//!     cleanup,
//!     BatchOptions::default(),
//! );
//!
//! let outcome = converter
//!     .convert_batch(vec![UploadedFile::new("song.mp3", std::fs::read("song.mp3")?)])
//!     .await?;
//! println!("download {} as {}", outcome.storage_name, outcome.display_name);
//! # Ok(())
//! # }
//! ```

pub mod result;
pub mod token;

pub use result::{BatchOutcome, ConversionResult};
pub use token::{BatchToken, ARCHIVE_DISPLAY_NAME};

use crate::archive::{disambiguate_names, ArchiveEntry, ArchivePackager, Packager};
use crate::cleanup::{CleanupQueue, DeleteOnDrop};
use crate::error::{ConvertError, Result};
use crate::formats::{self, FormatPolicy, DEFAULT_MAX_FILE_SIZE};
use crate::storage::TempStorage;
use crate::transcoder::Transcoder;
use bytes::Bytes;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::task::AbortOnDropHandle;
use tracing::{error, info, info_span, warn, Instrument, Span};

/// One uploaded file with the name the caller gave it
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub display_name: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(display_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            display_name: display_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Options for batch conversion
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Input extensions a batch accepts
    pub formats: FormatPolicy,
    /// Largest accepted upload, in bytes
    pub max_file_size: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            formats: FormatPolicy::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

impl BatchOptions {
    pub fn with_formats(mut self, formats: FormatPolicy) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes.max(1);
        self
    }
}

/// Files written by one batch that nobody has taken ownership of yet
struct BatchArtifacts {
    cleanup: CleanupQueue,
    inputs: Vec<PathBuf>,
    outputs: Vec<PathBuf>,
    archive: Option<PathBuf>,
}

impl BatchArtifacts {
    fn new(cleanup: CleanupQueue) -> Self {
        Self {
            cleanup,
            inputs: Vec::new(),
            outputs: Vec::new(),
            archive: None,
        }
    }

    fn release_inputs(&mut self) {
        self.cleanup.schedule_all(self.inputs.drain(..));
    }

    fn release_outputs(&mut self) {
        self.cleanup.schedule_all(self.outputs.drain(..));
    }

    /// Stop tracking the outputs; the caller now owns them
    fn hand_off_outputs(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.outputs)
    }

    fn hand_off_archive(&mut self) -> Option<PathBuf> {
        self.archive.take()
    }
}

impl Drop for BatchArtifacts {
    fn drop(&mut self) {
        self.release_inputs();
        self.release_outputs();
        if let Some(archive) = self.archive.take() {
            self.cleanup.schedule(archive);
        }
    }
}

/// Converts batches of uploaded files through a [`Transcoder`]
pub struct BatchConverter {
    storage: Arc<TempStorage>,
    transcoder: Arc<dyn Transcoder>,
    packager: Arc<dyn Packager>,
    cleanup: CleanupQueue,
    options: BatchOptions,
}

impl BatchConverter {
    pub fn new(
        storage: Arc<TempStorage>,
        transcoder: Arc<dyn Transcoder>,
        cleanup: CleanupQueue,
        options: BatchOptions,
    ) -> Self {
        Self {
            storage,
            transcoder,
            packager: Arc::new(ArchivePackager::default()),
            cleanup,
            options,
        }
    }

    pub fn with_packager(mut self, packager: impl Packager + 'static) -> Self {
        self.packager = Arc::new(packager);
        self
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn storage(&self) -> &Arc<TempStorage> {
        &self.storage
    }

    pub fn cleanup(&self) -> &CleanupQueue {
        &self.cleanup
    }

    /// Check a batch before anything touches storage.
    ///
    /// Every offending name is reported, not just the first one.
    pub fn validate(&self, files: &[UploadedFile]) -> Result<()> {
        if files.is_empty() {
            return Err(ConvertError::EmptyBatch);
        }

        let unsupported: Vec<String> = files
            .iter()
            .filter(|file| !self.options.formats.accepts(&file.display_name))
            .map(|file| file.display_name.clone())
            .collect();
        if !unsupported.is_empty() {
            return Err(ConvertError::UnsupportedFormat(unsupported));
        }

        let max_bytes = self.options.max_file_size;
        let bad_size: Vec<String> = files
            .iter()
            .filter(|file| file.bytes.is_empty() || file.bytes.len() as u64 > max_bytes)
            .map(|file| file.display_name.clone())
            .collect();
        if !bad_size.is_empty() {
            return Err(ConvertError::InvalidSize {
                names: bad_size,
                max_bytes,
            });
        }

        Ok(())
    }

    /// Convert a batch and return a handle to its single result artifact
    pub async fn convert_batch(&self, files: Vec<UploadedFile>) -> Result<BatchOutcome> {
        self.validate(&files)?;

        let token = BatchToken::generate();
        let span = info_span!("batch", token = %token, files = files.len());
        let mut artifacts = BatchArtifacts::new(self.cleanup.clone());

        let result = self
            .process(&token, &files, &mut artifacts)
            .instrument(span.clone())
            .await;

        if let Err(e) = &result {
            span.in_scope(|| error!(error = %e, "batch failed, discarding its artifacts"));
        }
        result
    }

    async fn process(
        &self,
        token: &BatchToken,
        files: &[UploadedFile],
        artifacts: &mut BatchArtifacts,
    ) -> Result<BatchOutcome> {
        let extension = self.transcoder.output_extension().to_string();
        let display_names = disambiguate_names(
            files
                .iter()
                .map(|file| format!("{}.{extension}", formats::display_stem(&file.display_name))),
        );

        let mut inputs = Vec::with_capacity(files.len());
        for (index, file) in files.iter().enumerate() {
            let input_ext =
                formats::extension_of(&file.display_name).unwrap_or_else(|| "bin".to_string());
            let path = self.storage.resolve(&token.input_name(index, &input_ext))?;
            artifacts.inputs.push(path.clone());
            self.storage.write(&path, &file.bytes).await?;
            info!(path = %path.display(), bytes = file.bytes.len(), "input saved");
            inputs.push(path);
        }

        let outputs = display_names
            .iter()
            .map(|name| self.storage.resolve(&token.output_name(name)))
            .collect::<Result<Vec<_>>>()?;

        let results = self.run_conversions(&inputs, &outputs, artifacts).await;
        let failed = results.iter().filter(|result| !result.is_success()).count();
        if failed > 0 {
            for (file, result) in files.iter().zip(&results) {
                if let Some(reason) = result.reason() {
                    warn!(file = %file.display_name, %reason, "conversion failed");
                }
            }
            return Err(ConvertError::ConversionFailed {
                failed,
                total: results.len(),
            });
        }

        let mut missing = Vec::new();
        for (path, name) in outputs.iter().zip(&display_names) {
            if !self.storage.exists(path).await {
                missing.push(name.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ConvertError::OutputMissing(missing));
        }

        artifacts.release_inputs();

        if outputs.len() == 1 {
            artifacts.hand_off_outputs();
            let display_name = display_names[0].clone();
            info!(output = %outputs[0].display(), "single file converted");
            return Ok(BatchOutcome {
                storage_name: token.output_name(&display_name),
                display_name,
                file_count: 1,
            });
        }

        let archive_path = self.storage.resolve(&token.archive_name())?;
        artifacts.archive = Some(archive_path.clone());

        let suffix = format!(".{extension}");
        let entries = outputs
            .iter()
            .zip(&display_names)
            .map(|(source, name)| ArchiveEntry {
                source: source.clone(),
                display_stem: name.strip_suffix(&suffix).unwrap_or(name).to_string(),
            })
            .collect();
        let packed = self.packager.pack(&archive_path, entries, &extension).await?;
        if packed.entries.len() != outputs.len() {
            return Err(ConvertError::PackagingFailed(format!(
                "archive holds {} of {} converted files",
                packed.entries.len(),
                outputs.len()
            )));
        }

        artifacts.release_outputs();
        artifacts.hand_off_archive();

        Ok(BatchOutcome {
            storage_name: token.archive_name(),
            display_name: ARCHIVE_DISPLAY_NAME.to_string(),
            file_count: packed.entries.len(),
        })
    }

    /// Run one conversion per input concurrently and wait for all of them.
    ///
    /// A failure never cancels its siblings; results keep input order.
    /// Each task owns its output until it reports success, and dropping
    /// this future aborts every task that is still running.
    async fn run_conversions(
        &self,
        inputs: &[PathBuf],
        outputs: &[PathBuf],
        artifacts: &mut BatchArtifacts,
    ) -> Vec<ConversionResult> {
        let tasks = inputs.iter().zip(outputs).map(|(input, output)| {
            let transcoder = Arc::clone(&self.transcoder);
            let input = input.clone();
            let output = output.clone();
            let guard = DeleteOnDrop::new(output.clone(), self.cleanup.clone());
            AbortOnDropHandle::new(tokio::spawn(
                async move {
                    // outlives the conversion future, so a killed codec's output is scheduled last
                    let guard = guard;
                    transcoder.convert(&input, &output).await.map(|()| guard)
                }
                .instrument(Span::current()),
            ))
        });

        join_all(tasks)
            .await
            .into_iter()
            .map(|joined| match joined {
                Ok(Ok(guard)) => {
                    let output = guard.disarm();
                    artifacts.outputs.push(output.clone());
                    ConversionResult::Succeeded(output)
                }
                Ok(Err(e)) => ConversionResult::Failed(e.to_string()),
                Err(e) => ConversionResult::Failed(format!("conversion task aborted: {e}")),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcoder::TranscodeError;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct NeverCalled;

    #[async_trait]
    impl Transcoder for NeverCalled {
        fn output_extension(&self) -> &str {
            "wav"
        }

        async fn convert(&self, _input: &Path, _output: &Path) -> std::result::Result<(), TranscodeError> {
            panic!("validation should have stopped the batch");
        }
    }

    fn converter(dir: &TempDir) -> BatchConverter {
        let storage = Arc::new(TempStorage::open(dir.path()).unwrap());
        let (cleanup, _worker) = CleanupQueue::spawn(Arc::clone(&storage));
        BatchConverter::new(storage, Arc::new(NeverCalled), cleanup, BatchOptions::default())
    }

    fn stored_files(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_batch_options_default() {
        let options = BatchOptions::default();
        assert_eq!(options.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert!(options.formats.accepts("a.mp3"));
    }

    #[test]
    fn test_batch_options_builder() {
        let options = BatchOptions::default()
            .with_formats(FormatPolicy::new(["flac"]))
            .with_max_file_size(0);
        assert_eq!(options.max_file_size, 1);
        assert!(options.formats.accepts("a.flac"));
        assert!(!options.formats.accepts("a.mp3"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let result = converter(&dir).convert_batch(Vec::new()).await;
        assert!(matches!(result, Err(ConvertError::EmptyBatch)));
    }

    #[tokio::test]
    async fn test_every_unsupported_name_is_listed() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            UploadedFile::new("notes.txt", "x"),
            UploadedFile::new("ok.mp3", "x"),
            UploadedFile::new("cover.jpg", "x"),
        ];

        match converter(&dir).convert_batch(files).await {
            Err(ConvertError::UnsupportedFormat(names)) => {
                assert_eq!(names, vec!["notes.txt", "cover.jpg"]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(stored_files(&dir), 0);
    }

    #[tokio::test]
    async fn test_size_limits_are_checked_before_writing() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(TempStorage::open(dir.path()).unwrap());
        let (cleanup, _worker) = CleanupQueue::spawn(Arc::clone(&storage));
        let converter = BatchConverter::new(
            storage,
            Arc::new(NeverCalled),
            cleanup,
            BatchOptions::default().with_max_file_size(4),
        );

        let files = vec![
            UploadedFile::new("empty.mp3", Vec::new()),
            UploadedFile::new("fits.mp3", "1234"),
            UploadedFile::new("big.mp3", "12345"),
        ];
        match converter.convert_batch(files).await {
            Err(ConvertError::InvalidSize { names, max_bytes }) => {
                assert_eq!(names, vec!["empty.mp3", "big.mp3"]);
                assert_eq!(max_bytes, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(stored_files(&dir), 0);
    }
}
