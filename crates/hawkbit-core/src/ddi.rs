//! DDI wire types. Rather than a full JSONPath engine, these are plain
//! `serde` structs mirroring the handful of fields the coordinator
//! actually reads, which is the idiomatic substitute for precompiled path
//! expressions in a statically-typed client.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BaseLinks {
    #[serde(rename = "configData")]
    pub config_data: Option<Link>,
    #[serde(rename = "deploymentBase")]
    pub deployment_base: Option<Link>,
    #[serde(rename = "cancelAction")]
    pub cancel_action: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Polling {
    pub sleep: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    pub polling: Polling,
}

/// The hawkBit base resource, returned by `GET /{tenant}/controller/v1/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseResource {
    pub config: Option<PollingConfig>,
    #[serde(rename = "_links", default)]
    pub links: BaseLinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionDirective {
    Attempt,
    Forced,
    Skip,
}

impl ActionDirective {
    #[must_use]
    pub const fn is_skip(self) -> bool {
        matches!(self, Self::Skip)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hashes {
    pub sha1: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactLinks {
    pub download: Option<Link>,
    #[serde(rename = "download-http")]
    pub download_http: Option<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactResource {
    pub size: u64,
    pub hashes: Hashes,
    #[serde(rename = "_links", default)]
    pub links: ArtifactLinks,
}

impl ArtifactResource {
    /// Favour https/`download.href`, falling back to `download-http.href`.
    #[must_use]
    pub fn download_url(&self) -> Option<&str> {
        self.links
            .download
            .as_ref()
            .or(self.links.download_http.as_ref())
            .map(|l| l.href.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chunk {
    pub version: String,
    pub name: String,
    pub artifacts: Vec<ArtifactResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentBody {
    #[serde(rename = "maintenanceWindow", default)]
    pub maintenance_window: Option<Value>,
    pub download: ActionDirective,
    pub update: ActionDirective,
    pub chunks: Vec<Chunk>,
}

/// `GET .../deploymentBase/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentResource {
    pub id: String,
    pub deployment: DeploymentBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelActionBody {
    #[serde(rename = "stopId")]
    pub stop_id: String,
}

/// `GET .../cancelAction/{id}` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelActionResource {
    #[serde(rename = "cancelAction")]
    pub cancel_action: CancelActionBody,
}
