//! Authenticated DDI REST client and resumable binary download transport.
//!
//! This crate performs no policy beyond the 409/429 REST retry and the
//! low-speed abort; everything else (what to request, how to react to a
//! failure) lives in `hawkbit-runtime`/`hawkbit-download`.

mod client;
mod download;
mod error;
mod urls;

pub use client::HttpClient;
pub use download::{download, DownloadOutcome};
pub use error::HttpError;
pub use urls::ControllerUrls;
