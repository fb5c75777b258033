//! Install Driver: drives RAUC's `InstallBundle` call and translates its
//! property-change/signal stream into progress lines and a terminal exit
//! status.

use std::collections::HashMap;

use futures_util::StreamExt;
use hawkbit_core::action::{BundleLocation, InstallContext};
use tracing::warn;
use zbus::zvariant::Value;
use zbus::Connection;

use crate::error::InstallError;
use crate::proxy::InstallerProxy;

/// One line of translated progress, or the terminal exit status.
#[derive(Debug, Clone)]
pub enum ProgressMessage {
    Line(String),
    Terminal(i32),
}

/// Peer disappearance (the executor's bus name losing its owner) is
/// reported as terminal status 2, never 0.
const PEER_LOST_STATUS: i32 = 2;

fn install_args(ctx: &InstallContext) -> HashMap<&str, Value<'_>> {
    let mut args = HashMap::new();
    if let Some(auth) = &ctx.auth_header {
        args.insert(
            "http-headers",
            Value::new(vec![auth.clone()]),
        );
    }
    args.insert("tls-no-verify", Value::new(!ctx.tls_verify));
    if let Some(key) = &ctx.tls_key {
        args.insert("tls-key", Value::new(key.to_string_lossy().into_owned()));
    }
    if let Some(cert) = &ctx.tls_cert {
        args.insert("tls-cert", Value::new(cert.to_string_lossy().into_owned()));
    }
    args
}

fn bundle_source(ctx: &InstallContext) -> String {
    match &ctx.bundle {
        BundleLocation::Local(path) => path.to_string_lossy().into_owned(),
        BundleLocation::Remote(url) => url.clone(),
    }
}

/// Connect to the system bus, call `InstallBundle`, and drain the
/// executor's progress stream until `Completed` fires or the peer goes
/// away. `on_message` is invoked for every translated line, in FIFO
/// order, before the terminal message.
pub async fn run(
    ctx: &InstallContext,
    mut on_message: impl FnMut(ProgressMessage),
) -> Result<i32, InstallError> {
    let connection = Connection::system().await?;
    let proxy = InstallerProxy::new(&connection).await?;

    proxy
        .install_bundle(&bundle_source(ctx), install_args(ctx))
        .await
        .map_err(|e| InstallError::StreamInstall(e.to_string()))?;

    let mut operation_changed = proxy.receive_operation_changed().await;
    let mut progress_changed = proxy.receive_progress_changed().await;
    let mut last_error_changed = proxy.receive_last_error_changed().await;
    let mut completed = proxy.receive_completed().await?;
    let mut owner_changed = proxy.receive_owner_changed().await?;

    loop {
        tokio::select! {
            Some(signal) = completed.next() => {
                let args = signal.args().map_err(|e| InstallError::Dbus(e.to_string()))?;
                let status = args.nexit_status();
                on_message(ProgressMessage::Terminal(*status));
                return Ok(*status);
            }
            Some(change) = operation_changed.next() => {
                if let Ok(op) = change.get().await {
                    on_message(ProgressMessage::Line(op));
                }
            }
            Some(change) = progress_changed.next() => {
                if let Ok((pct, message, _step)) = change.get().await {
                    on_message(ProgressMessage::Line(format!("{pct:3}% {message}")));
                }
            }
            Some(change) = last_error_changed.next() => {
                if let Ok(msg) = change.get().await {
                    if !msg.is_empty() {
                        on_message(ProgressMessage::Line(format!("LastError: {msg}")));
                    }
                }
            }
            Some(owner) = owner_changed.next() => {
                if owner.is_none() {
                    warn!("RAUC bus name lost its owner mid-install");
                    on_message(ProgressMessage::Terminal(PEER_LOST_STATUS));
                    return Ok(PEER_LOST_STATUS);
                }
            }
            else => {
                warn!("install driver streams exhausted without a Completed signal");
                on_message(ProgressMessage::Terminal(PEER_LOST_STATUS));
                return Ok(PEER_LOST_STATUS);
            }
        }
    }
}
