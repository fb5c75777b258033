//! Resumable artifact download worker with checksum verification.

pub mod error;
pub mod progress;
pub mod worker;

pub use error::DownloadError;
pub use progress::ProgressThrottle;
pub use worker::{check_free_space, run, Outcome};
