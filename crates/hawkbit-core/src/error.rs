//! Action-lifecycle error taxonomy.
//!
//! These are distinct from transport/HTTP/protocol errors (owned by
//! `hawkbit-http`) and from download errors (owned by `hawkbit-download`):
//! they describe outcomes of the coordinator's own state machine.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// `process_deployment` called while an action is already active.
    /// Informational: the server will simply re-offer the deployment later.
    #[error("an action is already in progress")]
    AlreadyInProgress,

    /// A cancel arrived after installation had already started.
    #[error("cancelation impossible, installation started already")]
    Cancelation,

    /// The executor rejected a streamed install URL.
    #[error("stream install rejected: {0}")]
    StreamInstall(String),

    /// Deployment carries more than one chunk or more than one artifact per
    /// chunk; RAUC handles exactly one bundle.
    #[error("deployment unsupported: {0}")]
    UnsupportedDeployment(String),

    /// Not enough free space on the download filesystem.
    #[error("insufficient disk space: need {needed} bytes, have {available} bytes")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("local I/O error: {0}")]
    Local(String),
}
