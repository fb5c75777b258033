//! Top-level runtime error taxonomy. In run-once mode, any variant here
//! surfacing from `Coordinator::process_base` maps to a process exit code
//! of 1.

use hawkbit_core::{config::ConfigError, ActionError};
use hawkbit_download::DownloadError;
use hawkbit_http::HttpError;
use hawkbit_install::InstallError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Http(#[from] HttpError),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Action(#[from] ActionError),

    /// A spawned download or install task reported a terminal failure
    /// (checksum mismatch, non-zero install exit status, join failure).
    #[error("one or more poll-cycle steps failed")]
    CycleFailed,
}
