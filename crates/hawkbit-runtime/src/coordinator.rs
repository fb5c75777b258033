//! Action Coordinator: owns the single Active Action, dispatches
//! deployments/cancels, and is the sole writer of feedback to the server.

use std::path::PathBuf;
use std::sync::Arc;

use hawkbit_core::action::{ActionState, ActiveAction, Artifact, BundleLocation, InstallContext, MaintenanceWindow};
use hawkbit_core::ddi::{BaseResource, CancelActionResource, DeploymentResource};
use hawkbit_core::feedback::Feedback;
use hawkbit_core::{ActionError, Config};
use hawkbit_http::{ControllerUrls, HttpClient};
use tracing::{debug, info, warn};

use crate::error::RuntimeError;

/// Everything the coordinator needs, bundled so `hawkbit-agent`'s
/// composition root only has to build one of these per process.
pub struct Coordinator {
    config: Arc<Config>,
    client: Arc<HttpClient>,
    urls: ControllerUrls,
    active: Arc<ActiveAction>,
    /// When set, `run_download`/`run_install` await their spawned task to
    /// completion and propagate its outcome, instead of firing-and-forgetting
    /// it, so `--run-once` reports the whole cycle's outcome and doesn't get
    /// its in-flight download/install dropped when the process exits.
    /// Mirrors the Install Context's `wait` flag.
    run_once: bool,
}

impl Coordinator {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        client: Arc<HttpClient>,
        active: Arc<ActiveAction>,
        run_once: bool,
    ) -> Self {
        let urls = ControllerUrls::new(&config);
        Self {
            config,
            client,
            urls,
            active,
            run_once,
        }
    }

    #[must_use]
    pub fn active(&self) -> &Arc<ActiveAction> {
        &self.active
    }

    async fn send_feedback(&self, url: &str, feedback: &Feedback) {
        if let Err(err) = self.client.post_json(url, &feedback.to_json()).await {
            warn!(%err, url, "failed to deliver feedback");
        }
    }

    /// Dispatch the three links a base-resource poll may carry.
    pub async fn process_base(&self, base: &BaseResource) -> Result<(), RuntimeError> {
        if base.links.config_data.is_some() {
            self.identify().await?;
        }
        if let Some(link) = &base.links.deployment_base {
            match self.process_deployment(&link.href).await {
                Ok(()) | Err(RuntimeError::Action(ActionError::AlreadyInProgress)) => {}
                Err(err) => return Err(err),
            }
        }
        if let Some(link) = &base.links.cancel_action {
            self.process_cancel(&link.href).await?;
        }
        Ok(())
    }

    async fn identify(&self) -> Result<(), RuntimeError> {
        let feedback = Feedback::identify(self.config.device_attributes.clone());
        self.client
            .put_json(&self.urls.config_data(), &feedback.to_json())
            .await?;
        Ok(())
    }

    /// Returns `Ok(())` for every outcome that is not itself a hard runtime
    /// error (skip, unsupported chunking, insufficient space are all
    /// terminal-but-ok). In run-once mode this also carries through the
    /// spawned download/install task's own outcome.
    pub async fn process_deployment(&self, href: &str) -> Result<(), RuntimeError> {
        if self.active.state().await.is_active() {
            debug!("deployment offered while an action is already in progress, ignoring");
            return Err(ActionError::AlreadyInProgress.into());
        }
        self.active.transition(ActionState::Processing, None).await;

        let root = self.client.get_json(href).await?;
        let resource: DeploymentResource = serde_json::from_value(root)
            .map_err(|e| RuntimeError::Http(hawkbit_http::HttpError::Json(e.to_string())))?;

        let id = resource.id;
        let deployment = resource.deployment;
        let feedback_url = self.urls.deployment_feedback(&id);

        if deployment.download.is_skip() {
            self.active.reset().await;
            return Ok(());
        }

        let previous_id = self.active.action_id().await;
        if deployment.update.is_skip() && previous_id.as_deref() == Some(id.as_str()) {
            self.active.reset().await;
            return Ok(());
        }

        if deployment.chunks.len() != 1 || deployment.chunks[0].artifacts.len() != 1 {
            let feedback = Feedback::terminal(
                id.clone(),
                false,
                format!("Deployment {id} unsupported: cannot handle multiple chunks."),
            );
            self.send_feedback(&feedback_url, &feedback).await;
            self.active.reset().await;
            return Ok(());
        }

        let chunk = &deployment.chunks[0];
        let artifact_resource = &chunk.artifacts[0];
        let Some(download_url) = artifact_resource.download_url() else {
            let feedback = Feedback::terminal(id.clone(), false, "no download link in artifact");
            self.send_feedback(&feedback_url, &feedback).await;
            self.active.reset().await;
            return Ok(());
        };

        let do_install = !deployment.update.is_skip();
        let maintenance_window = MaintenanceWindow::from_json(deployment.maintenance_window.as_ref());

        let artifact = Artifact {
            name: chunk.name.clone(),
            version: chunk.version.clone(),
            size: artifact_resource.size,
            sha1: artifact_resource.hashes.sha1.clone(),
            download_url: download_url.to_string(),
            feedback_url: feedback_url.clone(),
            maintenance_window,
            do_install,
        };

        self.active
            .transition(ActionState::Processing, Some(id.clone()))
            .await;

        if self.config.stream_bundle {
            self.active
                .transition(ActionState::Installing, Some(id.clone()))
                .await;
            let ctx = self.streaming_install_context(&artifact);
            self.run_install(id, artifact, ctx).await?;
            return Ok(());
        }

        let Some(dest) = self.config.bundle_download_location.clone() else {
            unreachable!("config validation requires bundle_download_location unless streaming")
        };

        if let Err(err) = hawkbit_download::check_free_space(&dest, artifact.size) {
            warn!(%err, "rejecting deployment for insufficient space");
            let feedback = Feedback::terminal(id.clone(), false, err.to_string());
            self.send_feedback(&feedback_url, &feedback).await;
            self.active.reset().await;
            return Ok(());
        }

        self.active
            .transition(ActionState::Downloading, Some(id.clone()))
            .await;
        self.run_download(id, artifact, dest).await?;
        Ok(())
    }

    fn streaming_install_context(&self, artifact: &Artifact) -> InstallContext {
        InstallContext {
            bundle: BundleLocation::Remote(artifact.download_url.clone()),
            auth_header: self.download_auth_header(),
            tls_verify: self.config.ssl_verify,
            tls_key: match &self.config.auth {
                hawkbit_core::config::AuthMethod::ClientCert { key, .. } => Some(key.clone()),
                _ => None,
            },
            tls_cert: match &self.config.auth {
                hawkbit_core::config::AuthMethod::ClientCert { cert, .. } => Some(cert.clone()),
                _ => None,
            },
            wait: self.run_once,
        }
    }

    fn download_auth_header(&self) -> Option<String> {
        match &self.config.auth {
            hawkbit_core::config::AuthMethod::TargetToken(t) => Some(format!("TargetToken {t}")),
            hawkbit_core::config::AuthMethod::GatewayToken(t) => Some(format!("GatewayToken {t}")),
            hawkbit_core::config::AuthMethod::ClientCert { .. } => None,
        }
    }

    /// Spawn the Download Worker and react to its checkpoints and terminal
    /// outcome. In run-once mode, awaits the spawned task and returns its
    /// outcome; otherwise returns `Ok(())` once the task is launched.
    async fn run_download(
        &self,
        id: String,
        artifact: Artifact,
        dest: PathBuf,
    ) -> Result<(), RuntimeError> {
        let client = self.client.clone();
        let active = self.active.clone();
        let feedback_url = artifact.feedback_url.clone();
        let resume_downloads = self.config.resume_downloads;
        let low_speed_time = self.config.low_speed_time;
        let low_speed_rate = self.config.low_speed_rate;
        let post_update_reboot = self.config.post_update_reboot;
        let stream_auth = self.download_auth_header();
        let ssl_verify = self.config.ssl_verify;
        let tls_key = match &self.config.auth {
            hawkbit_core::config::AuthMethod::ClientCert { key, .. } => Some(key.clone()),
            _ => None,
        };
        let tls_cert = match &self.config.auth {
            hawkbit_core::config::AuthMethod::ClientCert { cert, .. } => Some(cert.clone()),
            _ => None,
        };
        let run_once = self.run_once;

        let handle = tokio::spawn(async move {
            let mut progress_messages = Vec::new();
            let outcome = hawkbit_download::run(
                &client,
                &artifact,
                &dest,
                resume_downloads,
                low_speed_time,
                low_speed_rate,
                &active,
                |line| progress_messages.push(line),
            )
            .await;

            for line in &progress_messages {
                let feedback = Feedback::progress(id.clone(), line.clone());
                let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
            }

            match outcome {
                Ok(hawkbit_download::Outcome::Canceled) => {
                    let feedback = Feedback::cancel_acknowledged(id.clone(), "Action canceled.");
                    let _ = client
                        .post_json(&artifact.feedback_url, &feedback.to_json())
                        .await;
                    let _ = tokio::fs::remove_file(&dest).await;
                    active.reset().await;
                    Ok(())
                }
                Ok(hawkbit_download::Outcome::ChecksumMismatch { got, want }) => {
                    let feedback = Feedback::terminal(
                        id.clone(),
                        false,
                        format!(
                            "Software: {} V{}. Invalid checksum: {got} expected {want}",
                            artifact.name, artifact.version
                        ),
                    );
                    let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
                    let _ = tokio::fs::remove_file(&dest).await;
                    active.transition(ActionState::Error, None).await;
                    active.reset().await;
                    Err(RuntimeError::CycleFailed)
                }
                Ok(hawkbit_download::Outcome::Completed { .. }) => {
                    if !artifact.do_install {
                        let keep = matches!(
                            artifact.maintenance_window,
                            None | Some(MaintenanceWindow::Available)
                        );
                        if keep {
                            let feedback = Feedback::terminal(
                                id.clone(),
                                true,
                                "Software bundle downloaded successfully.",
                            );
                            let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
                            active.transition(ActionState::Success, None).await;
                            active.reset().await;
                        } else {
                            active.reset().await;
                        }
                        return Ok(());
                    }

                    let feedback = Feedback::progress(id.clone(), "File checksum OK.");
                    let _ = client.post_json(&feedback_url, &feedback.to_json()).await;

                    if matches!(active.state().await, ActionState::CancelRequested) {
                        active.transition(ActionState::Canceled, None).await;
                        let feedback =
                            Feedback::cancel_acknowledged(id.clone(), "Action canceled.");
                        let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
                        let _ = tokio::fs::remove_file(&dest).await;
                        active.reset().await;
                        return Ok(());
                    }

                    active
                        .transition(ActionState::Installing, Some(id.clone()))
                        .await;

                    let ctx = InstallContext {
                        bundle: BundleLocation::Local(dest.clone()),
                        auth_header: stream_auth,
                        tls_verify: ssl_verify,
                        tls_key,
                        tls_cert,
                        wait: run_once,
                    };

                    let result = run_install_and_report(
                        client.clone(),
                        &active,
                        id,
                        feedback_url,
                        ctx,
                        post_update_reboot,
                    )
                    .await;
                    let _ = tokio::fs::remove_file(&dest).await;
                    result
                }
                Err(err) => {
                    warn!(%err, "download failed");
                    let feedback = Feedback::terminal(id.clone(), false, err.to_string());
                    let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
                    let _ = tokio::fs::remove_file(&dest).await;
                    active.transition(ActionState::Error, None).await;
                    active.reset().await;
                    Err(RuntimeError::CycleFailed)
                }
            }
        });

        if run_once {
            return handle.await.unwrap_or(Err(RuntimeError::CycleFailed));
        }
        Ok(())
    }

    /// Streaming-install path: no download worker, the executor fetches
    /// the bundle itself.
    async fn run_install(
        &self,
        id: String,
        artifact: Artifact,
        ctx: InstallContext,
    ) -> Result<(), RuntimeError> {
        let client = self.client.clone();
        let active = self.active.clone();
        let feedback_url = artifact.feedback_url.clone();
        let run_once = self.run_once;
        let post_update_reboot = self.config.post_update_reboot;
        let handle = tokio::spawn(async move {
            run_install_and_report(client, &active, id, feedback_url, ctx, post_update_reboot).await
        });

        if run_once {
            return handle.await.unwrap_or(Err(RuntimeError::CycleFailed));
        }
        Ok(())
    }

    /// Dispatches a cancellation request for the currently-tracked action.
    pub async fn process_cancel(&self, href: &str) -> Result<(), RuntimeError> {
        let root = self.client.get_json(href).await?;
        let resource: CancelActionResource = serde_json::from_value(root)
            .map_err(|e| RuntimeError::Http(hawkbit_http::HttpError::Json(e.to_string())))?;
        let stop_id = resource.cancel_action.stop_id;

        let current_id = self.active.action_id().await;
        let state = self.active.state().await;

        if current_id.as_deref() != Some(stop_id.as_str()) {
            // Unknown or already-concluded action: acknowledge regardless.
            let feedback = Feedback::cancel_acknowledged(stop_id.clone(), "Action canceled.");
            self.send_feedback(&self.urls.cancel_feedback(&stop_id), &feedback)
                .await;
            return Ok(());
        }

        if state.rejects_cancel() {
            let feedback = Feedback::cancel_rejected(stop_id.clone());
            self.send_feedback(&self.urls.cancel_feedback(&stop_id), &feedback)
                .await;
            return Ok(());
        }

        if state.accepts_cancel() {
            self.active
                .transition(ActionState::CancelRequested, Some(stop_id.clone()))
                .await;
            self.active
                .wait_until(|s| s.is_terminal() || matches!(s, ActionState::None))
                .await;
        }

        let feedback = Feedback::cancel_acknowledged(stop_id.clone(), "Action canceled.");
        self.send_feedback(&self.urls.cancel_feedback(&stop_id), &feedback)
            .await;
        Ok(())
    }
}

/// Drives the install driver's event loop and reports its progress and
/// terminal outcome. The driver's `on_message` callback is synchronous, so
/// it enqueues onto an unbounded channel that a concurrent task drains and
/// turns into feedback posts; a `ProgressThrottle` keeps a chatty
/// `Progress` property from flooding the server with one feedback POST per
/// percentage tick. Returns `Ok(())` only when the executor reported exit
/// status 0.
async fn run_install_and_report(
    client: Arc<HttpClient>,
    active: &ActiveAction,
    id: String,
    feedback_url: String,
    ctx: InstallContext,
    post_update_reboot: bool,
) -> Result<(), RuntimeError> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<hawkbit_install::ProgressMessage>();

    let drain_client = client.clone();
    let drain_id = id.clone();
    let drain_feedback_url = feedback_url.clone();
    let drain = tokio::spawn(async move {
        let mut throttle = hawkbit_download::ProgressThrottle::default_interval();
        while let Some(msg) = rx.recv().await {
            if let hawkbit_install::ProgressMessage::Line(line) = msg {
                if !throttle.should_emit() {
                    continue;
                }
                let feedback = Feedback::progress(drain_id.clone(), line);
                let _ = drain_client
                    .post_json(&drain_feedback_url, &feedback.to_json())
                    .await;
            }
        }
    });

    let result = hawkbit_install::run(&ctx, |msg| {
        let _ = tx.send(msg);
    })
    .await;
    drop(tx);
    let _ = drain.await;

    let exit_status = match result {
        Ok(status) => status,
        Err(err) => {
            warn!(%err, "install driver failed");
            let feedback = Feedback::terminal(id.clone(), false, err.to_string());
            let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
            active.transition(ActionState::Error, None).await;
            active.reset().await;
            return Err(RuntimeError::CycleFailed);
        }
    };

    if exit_status == 0 {
        let feedback = Feedback::terminal(
            id.clone(),
            true,
            "Software bundle installed successfully.",
        );
        let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
        active.transition(ActionState::Success, None).await;
        active.reset().await;

        if post_update_reboot {
            info!("post_update_reboot set, rebooting now");
            reboot();
        }
        Ok(())
    } else {
        let feedback = Feedback::terminal(
            id.clone(),
            false,
            format!("Installation failed with exit status {exit_status}."),
        );
        let _ = client.post_json(&feedback_url, &feedback.to_json()).await;
        active.transition(ActionState::Error, None).await;
        active.reset().await;
        Err(RuntimeError::CycleFailed)
    }
}

#[cfg(unix)]
fn reboot() {
    // sync() then an immediate, non-graceful reboot. Requires
    // CAP_SYS_BOOT; failures are logged, not fatal.
    nix::unistd::sync();
    if let Err(err) = nix::sys::reboot::reboot(nix::sys::reboot::RebootMode::RB_AUTOBOOT) {
        warn!(%err, "reboot() failed");
    }
}

#[cfg(not(unix))]
fn reboot() {
    warn!("post_update_reboot is only implemented on unix targets");
}

#[cfg(test)]
mod tests {
    use super::*;
    use hawkbit_core::action::ActiveAction;
    use hawkbit_core::config::{AuthMethod, LogLevel};
    use sha1::{Digest, Sha1};
    use std::collections::BTreeMap;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer, bundle_dir: &std::path::Path) -> Config {
        let mut device_attributes = BTreeMap::new();
        device_attributes.insert("board".to_string(), "rpi4".to_string());
        Config {
            hawkbit_server: server.address().to_string(),
            tenant_id: "DEFAULT".to_string(),
            target_name: "dev-1".to_string(),
            auth: AuthMethod::TargetToken("tok".to_string()),
            ssl: false,
            ssl_verify: true,
            bundle_download_location: Some(bundle_dir.join("bundle.raucb")),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
            retry_wait: Duration::from_secs(300),
            low_speed_time: Duration::from_secs(60),
            low_speed_rate: 1,
            resume_downloads: false,
            stream_bundle: false,
            post_update_reboot: false,
            send_download_authentication: true,
            log_level: LogLevel::Message,
            device_attributes,
        }
    }

    fn sha1_hex(data: &[u8]) -> String {
        let mut hasher = Sha1::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    async fn wait_for_idle(active: &ActiveAction) {
        tokio::time::timeout(
            Duration::from_secs(5),
            active.wait_until(|s| matches!(s, ActionState::None)),
        )
        .await
        .expect("action did not return to idle in time");
    }

    fn deployment_body(id: &str, update: &str, artifact_url: String, size: usize, sha1: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "deployment": {
                "download": "forced",
                "update": update,
                "chunks": [{
                    "version": "1.0",
                    "name": "fw",
                    "artifacts": [{
                        "size": size,
                        "hashes": {"sha1": sha1},
                        "_links": {"download": {"href": artifact_url}}
                    }]
                }]
            }
        })
    }

    #[tokio::test]
    async fn staged_download_succeeds_and_returns_to_idle_when_update_is_skipped() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        let body = b"firmware-bytes".to_vec();
        let digest = sha1_hex(&body);

        Mock::given(method("GET"))
            .and(path("/deploymentBase/42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployment_body(
                "42",
                "skip",
                format!("{}/fw.raucb", server.uri()),
                body.len(),
                &digest,
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fw.raucb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/deploymentBase/42/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        coordinator
            .process_deployment(&format!("{}/deploymentBase/42", server.uri()))
            .await
            .unwrap();

        wait_for_idle(&active).await;
    }

    #[tokio::test]
    async fn checksum_mismatch_reports_failure_and_returns_to_idle() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        let body = b"firmware-bytes".to_vec();

        Mock::given(method("GET"))
            .and(path("/deploymentBase/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployment_body(
                "7",
                "skip",
                format!("{}/fw.raucb", server.uri()),
                body.len(),
                "0000000000000000000000000000000000000000",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fw.raucb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/deploymentBase/7/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        coordinator
            .process_deployment(&format!("{}/deploymentBase/7", server.uri()))
            .await
            .unwrap();

        wait_for_idle(&active).await;
    }

    #[tokio::test]
    async fn run_once_propagates_a_checksum_mismatch_as_a_process_deployment_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), true);

        let body = b"firmware-bytes".to_vec();

        Mock::given(method("GET"))
            .and(path("/deploymentBase/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(deployment_body(
                "11",
                "skip",
                format!("{}/fw.raucb", server.uri()),
                body.len(),
                "0000000000000000000000000000000000000000",
            )))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/fw.raucb"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/deploymentBase/11/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = coordinator
            .process_deployment(&format!("{}/deploymentBase/11", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, RuntimeError::CycleFailed));
    }

    #[tokio::test]
    async fn multi_chunk_deployment_is_rejected_synchronously() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        Mock::given(method("GET"))
            .and(path("/deploymentBase/99"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "99",
                "deployment": {
                    "download": "forced",
                    "update": "forced",
                    "chunks": [
                        {"version": "1.0", "name": "a", "artifacts": []},
                        {"version": "1.0", "name": "b", "artifacts": []}
                    ]
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/deploymentBase/99/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        coordinator
            .process_deployment(&format!("{}/deploymentBase/99", server.uri()))
            .await
            .unwrap();

        assert_eq!(active.state().await, ActionState::None);
    }

    #[tokio::test]
    async fn process_deployment_rejects_a_second_call_while_active() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        active
            .transition(ActionState::Downloading, Some("1".to_string()))
            .await;

        let err = coordinator
            .process_deployment(&format!("{}/deploymentBase/1", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Action(ActionError::AlreadyInProgress)
        ));
    }

    #[tokio::test]
    async fn process_cancel_acknowledges_unknown_actions_immediately() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        Mock::given(method("GET"))
            .and(path("/cancelAction/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cancelAction": {"stopId": "5"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cancelAction/5/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        coordinator
            .process_cancel(&format!("{}/cancelAction/5", server.uri()))
            .await
            .unwrap();

        assert_eq!(active.state().await, ActionState::None);
    }

    #[tokio::test]
    async fn process_cancel_is_rejected_once_installing() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        active
            .transition(ActionState::Installing, Some("8".to_string()))
            .await;

        Mock::given(method("GET"))
            .and(path("/cancelAction/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cancelAction": {"stopId": "8"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cancelAction/8/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        coordinator
            .process_cancel(&format!("{}/cancelAction/8", server.uri()))
            .await
            .unwrap();

        // rejects_cancel() branch never touches the state machine itself.
        assert_eq!(active.state().await, ActionState::Installing);
    }

    #[tokio::test]
    async fn process_cancel_accepts_and_waits_for_a_downloading_worker_to_land_terminal() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(&server, dir.path()));
        let client = Arc::new(HttpClient::new(&config).unwrap());
        let active = Arc::new(ActiveAction::new());
        let coordinator = Coordinator::new(config.clone(), client.clone(), active.clone(), false);

        active
            .transition(ActionState::Downloading, Some("3".to_string()))
            .await;

        // Stand in for the download worker observing CancelRequested and
        // landing on the terminal Canceled state.
        let worker_active = active.clone();
        tokio::spawn(async move {
            worker_active
                .wait_until(|s| matches!(s, ActionState::CancelRequested))
                .await;
            worker_active.transition(ActionState::Canceled, None).await;
        });

        Mock::given(method("GET"))
            .and(path("/cancelAction/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cancelAction": {"stopId": "3"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cancelAction/3/feedback"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        tokio::time::timeout(
            Duration::from_secs(5),
            coordinator.process_cancel(&format!("{}/cancelAction/3", server.uri())),
        )
        .await
        .expect("process_cancel did not return in time")
        .unwrap();

        assert_eq!(active.state().await, ActionState::Canceled);
    }
}
