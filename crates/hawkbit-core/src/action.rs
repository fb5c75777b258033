//! The single Active Action.
//!
//! The process holds exactly one of these for its whole lifetime. State
//! transitions happen under a mutex; waiters (the cancel handler waiting
//! for a worker to observe `CancelRequested`) are woken through a
//! `Notify`, the async equivalent of the condvar the design calls for.
//! No component is meant to hold the guard across an `.await` on network
//! or D-Bus I/O — callers read what they need, drop the guard, do the I/O,
//! then reacquire it to publish the next state.

use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::{Mutex, Notify};

/// Total order for progress: `None < Processing <
/// Downloading < Installing < {Success | Error}`. `CancelRequested` and
/// `Canceled` are side-states reachable only from `{Processing,
/// Downloading}` and are not compared by rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionState {
    None,
    Processing,
    Downloading,
    Installing,
    CancelRequested,
    Canceled,
    Success,
    Error,
}

impl ActionState {
    /// True for every state other than `None` — used by
    /// `process_deployment`'s "already in progress" check.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::None)
    }

    /// True once the action has reached a terminal outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Canceled | Self::Success | Self::Error)
    }

    /// Cancellation is rejected once installation has begun or concluded.
    #[must_use]
    pub const fn rejects_cancel(self) -> bool {
        matches!(self, Self::Installing | Self::Success | Self::Error)
    }

    /// Cancellation is accepted (and awaited) from these states.
    #[must_use]
    pub const fn accepts_cancel(self) -> bool {
        matches!(self, Self::Processing | Self::Downloading)
    }
}

/// Hint carried alongside an artifact describing whether the server
/// believes install may proceed now. Any JSON value other than the
/// literal strings `"available"`/`"unavailable"` or `null` is folded
/// into `Unavailable` rather than treated as "available".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceWindow {
    Available,
    Unavailable,
}

impl MaintenanceWindow {
    #[must_use]
    pub fn from_json(value: Option<&Value>) -> Option<Self> {
        match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s == "available" => Some(Self::Available),
            Some(Value::String(s)) if s == "unavailable" => Some(Self::Unavailable),
            Some(_) => Some(Self::Unavailable),
        }
    }
}

/// A single deployment's downloadable unit.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: String,
    pub version: String,
    pub size: u64,
    pub sha1: String,
    pub download_url: String,
    pub feedback_url: String,
    pub maintenance_window: Option<MaintenanceWindow>,
    pub do_install: bool,
}

/// Where the executor should read the bundle from, and how.
#[derive(Debug, Clone)]
pub enum BundleLocation {
    Local(PathBuf),
    Remote(String),
}

/// Per-install parameters handed to the Install Driver.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub bundle: BundleLocation,
    pub auth_header: Option<String>,
    pub tls_verify: bool,
    pub tls_key: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    /// True when the caller (run-once mode) blocks until the driver's
    /// event loop exits and owns teardown; otherwise the driver frees
    /// itself on completion.
    pub wait: bool,
}

#[derive(Debug, Default)]
struct ActiveActionState {
    action_id: Option<String>,
    state: ActionState,
}

impl Default for ActionState {
    fn default() -> Self {
        Self::None
    }
}

/// The process-wide active action. Exactly one instance lives for the
/// process lifetime.
pub struct ActiveAction {
    inner: Mutex<ActiveActionState>,
    notify: Notify,
}

impl Default for ActiveAction {
    fn default() -> Self {
        Self::new()
    }
}

impl ActiveAction {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ActiveActionState::default()),
            notify: Notify::new(),
        }
    }

    /// Current state, without holding the guard.
    pub async fn state(&self) -> ActionState {
        self.inner.lock().await.state
    }

    /// Current action id, if any.
    pub async fn action_id(&self) -> Option<String> {
        self.inner.lock().await.action_id.clone()
    }

    /// Transition to a new state (and, optionally, a new action id),
    /// waking anyone parked in `wait_until`.
    pub async fn transition(&self, state: ActionState, action_id: Option<String>) {
        let mut guard = self.inner.lock().await;
        guard.state = state;
        if let Some(id) = action_id {
            guard.action_id = Some(id);
        }
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Reset to `None` with no action id, releasing the slot for the next
    /// poll cycle.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        guard.state = ActionState::None;
        guard.action_id = None;
        drop(guard);
        self.notify.notify_waiters();
    }

    /// Block until `predicate(state)` holds, re-checking on every
    /// transition notification. Used by `process_cancel` to wait for the
    /// worker to observe `CancelRequested` and land on a terminal state.
    pub async fn wait_until(&self, predicate: impl Fn(ActionState) -> bool) -> ActionState {
        loop {
            let notified = self.notify.notified();
            let current = self.inner.lock().await.state;
            if predicate(current) {
                return current;
            }
            notified.await;
        }
    }

}
