//! Per-file conversion results and the batch outcome

use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of converting one file of a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionResult {
    Succeeded(PathBuf),
    Failed(String),
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Succeeded(_))
    }

    pub fn output_path(&self) -> Option<&Path> {
        match self {
            ConversionResult::Succeeded(path) => Some(path),
            ConversionResult::Failed(_) => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ConversionResult::Failed(reason) => Some(reason),
            ConversionResult::Succeeded(_) => None,
        }
    }
}

impl fmt::Display for ConversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionResult::Succeeded(path) => write!(f, "✓ {}", path.display()),
            ConversionResult::Failed(reason) => write!(f, "✗ {reason}"),
        }
    }
}

/// What a successful batch hands back: a retrieval handle, never the bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Name to pass to the download responder
    pub storage_name: String,
    /// Caller-facing file name of the result
    pub display_name: String,
    /// Number of converted files behind the handle
    pub file_count: usize,
}

impl BatchOutcome {
    /// Whether the handle refers to an archive of several outputs
    pub fn is_archive(&self) -> bool {
        self.file_count > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_result_accessors() {
        let ok = ConversionResult::Succeeded(PathBuf::from("/tmp/x.wav"));
        assert!(ok.is_success());
        assert_eq!(ok.output_path(), Some(Path::new("/tmp/x.wav")));
        assert_eq!(ok.reason(), None);

        let failed = ConversionResult::Failed("corrupt input".to_string());
        assert!(!failed.is_success());
        assert_eq!(failed.output_path(), None);
        assert_eq!(failed.reason(), Some("corrupt input"));
    }

    #[test]
    fn test_conversion_result_display() {
        let failed = ConversionResult::Failed("boom".to_string());
        assert_eq!(failed.to_string(), "✗ boom");
    }

    #[test]
    fn test_outcome_shape() {
        let single = BatchOutcome {
            storage_name: "t_song.wav".to_string(),
            display_name: "song.wav".to_string(),
            file_count: 1,
        };
        assert!(!single.is_archive());
    }
}
