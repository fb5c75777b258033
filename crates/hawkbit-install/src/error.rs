//! Install Driver error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("D-Bus error: {0}")]
    Dbus(String),

    #[error("executor rejected streamed install: {0}")]
    StreamInstall(String),
}

impl From<zbus::Error> for InstallError {
    fn from(err: zbus::Error) -> Self {
        Self::Dbus(err.to_string())
    }
}
