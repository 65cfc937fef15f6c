use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("No files were uploaded")]
    EmptyBatch,

    #[error("Unsupported file format: {}", .0.join(", "))]
    UnsupportedFormat(Vec<String>),

    #[error("Invalid file size (allowed 1..={max_bytes} bytes): {}", names.join(", "))]
    InvalidSize { names: Vec<String>, max_bytes: u64 },

    #[error("{failed} of {total} conversions failed")]
    ConversionFailed { failed: usize, total: usize },

    #[error("Converted output missing: {}", .0.join(", "))]
    OutputMissing(Vec<String>),

    #[error("Archive packaging failed: {0}")]
    PackagingFailed(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Coarse classification of a [`ConvertError`], used by callers that map
/// failures onto transport-level status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    ConversionFailed,
    PackagingFailed,
    NotFound,
    Forbidden,
    Internal,
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvertError::EmptyBatch
            | ConvertError::UnsupportedFormat(_)
            | ConvertError::InvalidSize { .. } => ErrorKind::InvalidInput,
            ConvertError::ConversionFailed { .. } | ConvertError::OutputMissing(_) => {
                ErrorKind::ConversionFailed
            }
            ConvertError::PackagingFailed(_) => ErrorKind::PackagingFailed,
            ConvertError::NotFound(_) => ErrorKind::NotFound,
            ConvertError::Forbidden(_) => ErrorKind::Forbidden,
            ConvertError::Io(_) | ConvertError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::ConversionFailed => "conversion failed",
            ErrorKind::PackagingFailed => "packaging failed",
            ErrorKind::NotFound => "not found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl From<zip::result::ZipError> for ConvertError {
    fn from(err: zip::result::ZipError) -> Self {
        ConvertError::PackagingFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind as IoErrorKind};

    #[test]
    fn test_unsupported_format_lists_every_name() {
        let error = ConvertError::UnsupportedFormat(vec!["notes.txt".into(), "cover.jpg".into()]);
        assert_eq!(
            error.to_string(),
            "Unsupported file format: notes.txt, cover.jpg"
        );
        assert_eq!(error.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_conversion_failure_display() {
        let error = ConvertError::ConversionFailed {
            failed: 1,
            total: 3,
        };
        assert_eq!(error.to_string(), "1 of 3 conversions failed");
        assert_eq!(error.kind(), ErrorKind::ConversionFailed);
    }

    #[test]
    fn test_output_missing_is_a_conversion_failure() {
        let error = ConvertError::OutputMissing(vec!["a.wav".into()]);
        assert_eq!(error.kind(), ErrorKind::ConversionFailed);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = IoError::new(IoErrorKind::PermissionDenied, "denied");
        let error: ConvertError = io_error.into();
        assert_eq!(error.kind(), ErrorKind::Internal);
        assert!(error.to_string().contains("denied"));
    }

    #[test]
    fn test_zip_error_conversion() {
        let zip_error = zip::result::ZipError::FileNotFound;
        let error: ConvertError = zip_error.into();
        assert_eq!(error.kind(), ErrorKind::PackagingFailed);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not found");
        assert_eq!(ErrorKind::Forbidden.to_string(), "forbidden");
    }
}
