//! Transport/HTTP/JSON error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("JSON parse error: {0}")]
    Json(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl HttpError {
    /// Classifies a lower-level transport failure as worth retrying with
    /// a `Range` request rather than failing the deployment outright.
    #[must_use]
    pub fn is_resumable(&self) -> bool {
        match self {
            Self::Transport(msg) => {
                let m = msg.to_ascii_lowercase();
                m.contains("timed out")
                    || m.contains("timeout")
                    || m.contains("could not resolve host")
                    || m.contains("dns")
                    || m.contains("could not connect")
                    || m.contains("connection refused")
                    || m.contains("connect error")
                    || m.contains("partial")
                    || m.contains("send")
                    || m.contains("recv")
                    || m.contains("http2 framing")
                    || m.contains("http/2 framing")
                    || m.contains("stream error")
                    || m.contains("reset")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for HttpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HttpError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
