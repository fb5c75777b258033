//! Download Worker error taxonomy.

use hawkbit_http::HttpError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("checksum mismatch: got {got} expected {want}")]
    ChecksumMismatch { got: String, want: String },

    #[error("insufficient disk space: need {needed} bytes, {available} available")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
