//! Transport stream error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing transport stream files.
#[derive(Error, Debug)]
pub enum TsError {
    /// The source file could not be opened.
    #[error("Failed to open {path}: {source}")]
    FileOpen {
        /// Path of the file.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// No run of three consecutive sync bytes was found before end of file.
    #[error("No MPEG-TS sync found (neither 188 nor 204-byte packets)")]
    NoSync,

    /// End of file was reached before any PID produced two PCR samples with
    /// a nonzero span, so the bitrate cannot be derived.
    #[error("Unable to compute bitrate: not enough PCRs found")]
    InsufficientPcrs,

    /// I/O error while reading the file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for transport stream operations.
pub type Result<T> = std::result::Result<T, TsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TsError::NoSync.to_string(),
            "No MPEG-TS sync found (neither 188 nor 204-byte packets)"
        );
        assert_eq!(
            TsError::InsufficientPcrs.to_string(),
            "Unable to compute bitrate: not enough PCRs found"
        );
    }

    #[test]
    fn test_file_open_display() {
        let err = TsError::FileOpen {
            path: PathBuf::from("/missing.ts"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert!(err.to_string().starts_with("Failed to open /missing.ts"));
    }
}
