//! The DDI feedback/attribute payload builder.
//!
//! Pure value → JSON: no I/O here. `hawkbit-http` is responsible for
//! actually `POST`ing the result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFinished {
    None,
    Success,
    Failure,
}

impl ResultFinished {
    const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    Proceeding,
    Closed,
    Rejected,
}

impl Execution {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Proceeding => "proceeding",
            Self::Closed => "closed",
            Self::Rejected => "rejected",
        }
    }
}

/// A single DDI feedback payload.
#[derive(Debug, Clone)]
pub struct Feedback {
    pub id: Option<String>,
    pub finished: ResultFinished,
    pub execution: Execution,
    pub details: Option<String>,
    pub data: Option<BTreeMap<String, String>>,
}

impl Feedback {
    /// A `none/proceeding` progress message.
    #[must_use]
    pub fn progress(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            finished: ResultFinished::None,
            execution: Execution::Proceeding,
            details: Some(detail.into()),
            data: None,
        }
    }

    /// Terminal deployment feedback: `success|failure / closed`.
    #[must_use]
    pub fn terminal(id: impl Into<String>, success: bool, detail: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            finished: if success {
                ResultFinished::Success
            } else {
                ResultFinished::Failure
            },
            execution: Execution::Closed,
            details: Some(detail.into()),
            data: None,
        }
    }

    /// Cancel acknowledged: `success/closed`.
    #[must_use]
    pub fn cancel_acknowledged(id: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            finished: ResultFinished::Success,
            execution: Execution::Closed,
            details: Some(detail.into()),
            data: None,
        }
    }

    /// Cancel rejected because install already started: `success/rejected`.
    #[must_use]
    pub fn cancel_rejected(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            finished: ResultFinished::Success,
            execution: Execution::Rejected,
            details: Some("Cancelation impossible, installation started already.".to_string()),
            data: None,
        }
    }

    /// Device identification: attributes in `data`, `success/closed`, no id.
    #[must_use]
    pub fn identify(attributes: BTreeMap<String, String>) -> Self {
        Self {
            id: None,
            finished: ResultFinished::Success,
            execution: Execution::Closed,
            details: None,
            data: Some(attributes),
        }
    }

    /// Render the JSON body, stamping the current time.
    #[must_use]
    pub fn to_json_at(&self, now: DateTime<Utc>) -> Value {
        let mut status = Map::new();
        status.insert(
            "result".to_string(),
            json!({ "finished": self.finished.as_str() }),
        );
        status.insert(
            "execution".to_string(),
            Value::String(self.execution.as_str().to_string()),
        );
        if let Some(detail) = &self.details {
            status.insert("details".to_string(), json!([detail]));
        }

        let mut root = Map::new();
        if let Some(id) = &self.id {
            root.insert("id".to_string(), Value::String(id.clone()));
        }
        root.insert(
            "time".to_string(),
            Value::String(now.format("%Y%m%dT%H%M%S").to_string()),
        );
        root.insert("status".to_string(), Value::Object(status));
        if let Some(data) = &self.data {
            root.insert(
                "data".to_string(),
                Value::Object(
                    data.iter()
                        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                        .collect(),
                ),
            );
        }
        Value::Object(root)
    }

    /// Render using the current wall-clock time.
    #[must_use]
    pub fn to_json(&self) -> Value {
        self.to_json_at(Utc::now())
    }
}
