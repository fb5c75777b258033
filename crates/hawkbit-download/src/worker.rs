//! Download Worker: resumable binary fetch, checksum verification, and
//! the two progress checkpoints the server expects to see regardless of
//! deployment outcome.

use std::path::Path;
use std::time::Duration;

use hawkbit_core::action::{ActionState, ActiveAction, Artifact};
use hawkbit_http::HttpClient;
use tracing::{info, warn};

use crate::error::DownloadError;

const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Terminal outcome of a download attempt sequence. Cancellation is
/// reported as a variant rather than an error because observing
/// `CancelRequested` is an expected, non-exceptional checkpoint outcome.
#[derive(Debug)]
pub enum Outcome {
    Completed {
        average_speed_bps: f64,
    },
    ChecksumMismatch {
        got: String,
        want: String,
    },
    Canceled,
}

/// Reject the deployment before a byte is transferred if the destination
/// filesystem cannot hold the declared artifact size.
pub fn check_free_space(dest: &Path, needed: u64) -> Result<(), DownloadError> {
    let dir = dest.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let available = fs2::available_space(dir)?;
    if available < needed {
        return Err(DownloadError::InsufficientSpace { needed, available });
    }
    Ok(())
}

async fn observe_cancel(active: &ActiveAction) -> bool {
    let state = active.state().await;
    if matches!(state, ActionState::CancelRequested) {
        active.transition(ActionState::Canceled, None).await;
        true
    } else {
        false
    }
}

/// Run the download-and-verify loop for a single artifact. `on_progress`
/// is invoked with the two checkpoint messages the coordinator turns into
/// `none/proceeding` feedback ("Download complete ..." then "File checksum
/// OK." on the caller's side once it decides to install).
pub async fn run(
    client: &HttpClient,
    artifact: &Artifact,
    dest: &Path,
    resume_downloads: bool,
    low_speed_time: Duration,
    low_speed_rate: u64,
    active: &ActiveAction,
    mut on_progress: impl FnMut(String),
) -> Result<Outcome, DownloadError> {
    if observe_cancel(active).await {
        return Ok(Outcome::Canceled);
    }

    let mut resume_from = if resume_downloads {
        tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0)
    } else {
        0
    };

    loop {
        let result = hawkbit_http::download(
            client,
            &artifact.download_url,
            dest,
            resume_from,
            true,
            low_speed_time,
            low_speed_rate,
        )
        .await;

        match result {
            Ok(outcome) => {
                let mb_per_sec = outcome.average_speed_bps / (1024.0 * 1024.0);
                on_progress(format!("Download complete. {mb_per_sec:.2} MB/s"));

                let Some(got) = outcome.sha1 else {
                    // compute_sha1 was requested above; unreachable in practice.
                    return Err(DownloadError::Io("sha1 not computed".to_string()));
                };

                if got != artifact.sha1 {
                    return Ok(Outcome::ChecksumMismatch {
                        got,
                        want: artifact.sha1.clone(),
                    });
                }

                return Ok(Outcome::Completed {
                    average_speed_bps: outcome.average_speed_bps,
                });
            }
            Err(e) if e.is_resumable() && resume_downloads => {
                warn!(error = %e, "resumable download error, retrying");
                if observe_cancel(active).await {
                    return Ok(Outcome::Canceled);
                }
                resume_from = tokio::fs::metadata(dest).await.map(|m| m.len()).unwrap_or(0);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
            Err(e) => {
                info!(error = %e, "non-resumable download error");
                return Err(DownloadError::Http(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entry_checkpoint_honors_cancel_request() {
        let active = ActiveAction::new();
        active
            .transition(ActionState::CancelRequested, Some("1".to_string()))
            .await;
        assert!(observe_cancel(&active).await);
        assert_eq!(active.state().await, ActionState::Canceled);
    }

    #[test]
    fn rejects_when_space_is_short() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bundle.raucb");
        let err = check_free_space(&dest, u64::MAX).unwrap_err();
        assert!(matches!(err, DownloadError::InsufficientSpace { .. }));
    }

    #[test]
    fn accepts_when_space_is_sufficient() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("bundle.raucb");
        check_free_space(&dest, 1).unwrap();
    }
}
