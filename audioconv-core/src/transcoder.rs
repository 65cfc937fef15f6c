//! External codec boundary
//!
//! The batch converter only needs "turn this input file into that output
//! file, or fail". [`FfmpegTranscoder`] does that by running the `ffmpeg`
//! binary with fixed target encoding parameters.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("codec exited with {status}: {detail}")]
    Codec { status: String, detail: String },
}

/// Converts one file on disk into another
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Extension (without dot) of the files this transcoder produces
    fn output_extension(&self) -> &str;

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// Target encoding, fixed for the lifetime of a transcoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingParams {
    /// ffmpeg audio codec name
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub extension: String,
}

impl Default for EncodingParams {
    /// PCM 16-bit little-endian, 44.1 kHz stereo WAV
    fn default() -> Self {
        Self {
            codec: "pcm_s16le".to_string(),
            sample_rate: 44_100,
            channels: 2,
            extension: "wav".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: PathBuf,
    params: EncodingParams,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            params: EncodingParams::default(),
        }
    }

    pub fn with_params(mut self, params: EncodingParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &EncodingParams {
        &self.params
    }

    /// Command-line arguments for one conversion.
    ///
    /// `-y` overwrites a stale output, `-vn` drops embedded cover art.
    pub fn arguments(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-acodec".to_string(),
            self.params.codec.clone(),
            "-ar".to_string(),
            self.params.sample_rate.to_string(),
            "-ac".to_string(),
            self.params.channels.to_string(),
            output.to_string_lossy().into_owned(),
        ]
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn output_extension(&self) -> &str {
        &self.params.extension
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let result = Command::new(&self.binary)
            .args(self.arguments(input, output))
            .kill_on_drop(true)
            .output()
            .await;

        let out = result.map_err(|source| TranscodeError::Spawn {
            binary: self.binary.display().to_string(),
            source,
        })?;

        if out.status.success() {
            info!(input = %input.display(), output = %output.display(), "conversion succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&out.stderr);
        let detail = stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("unknown error")
            .to_string();
        error!(input = %input.display(), status = %out.status, %detail, "ffmpeg conversion failed");
        Err(TranscodeError::Codec {
            status: out.status.to_string(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = EncodingParams::default();
        assert_eq!(params.codec, "pcm_s16le");
        assert_eq!(params.sample_rate, 44_100);
        assert_eq!(params.channels, 2);
        assert_eq!(params.extension, "wav");
    }

    #[test]
    fn test_arguments_layout() {
        let transcoder = FfmpegTranscoder::new("ffmpeg");
        let args = transcoder.arguments(Path::new("/tmp/in.mp3"), Path::new("/tmp/out.wav"));
        assert_eq!(
            args,
            vec![
                "-y", "-i", "/tmp/in.mp3", "-vn", "-acodec", "pcm_s16le", "-ar", "44100", "-ac",
                "2", "/tmp/out.wav"
            ]
        );
    }

    #[test]
    fn test_custom_params() {
        let transcoder = FfmpegTranscoder::new("ffmpeg").with_params(EncodingParams {
            codec: "flac".to_string(),
            sample_rate: 48_000,
            channels: 1,
            extension: "flac".to_string(),
        });
        assert_eq!(transcoder.output_extension(), "flac");
        assert!(transcoder
            .arguments(Path::new("a"), Path::new("b"))
            .contains(&"48000".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let transcoder = FfmpegTranscoder::new("/nonexistent/definitely-not-ffmpeg");
        let result = transcoder
            .convert(Path::new("in.mp3"), Path::new("out.wav"))
            .await;
        assert!(matches!(result, Err(TranscodeError::Spawn { .. })));
    }
}
