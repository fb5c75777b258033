//! DDI URL construction:
//! `{scheme}://{host}/{tenant}/controller/v1/{controllerId}[/{suffix}]`.

use hawkbit_core::Config;

#[derive(Debug, Clone)]
pub struct ControllerUrls {
    base: String,
}

impl ControllerUrls {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let scheme = if config.ssl { "https" } else { "http" };
        Self {
            base: format!(
                "{scheme}://{}/{}/controller/v1/{}",
                config.hawkbit_server, config.tenant_id, config.target_name
            ),
        }
    }

    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    #[must_use]
    pub fn deployment_feedback(&self, action_id: &str) -> String {
        format!("{}/deploymentBase/{action_id}/feedback", self.base)
    }

    #[must_use]
    pub fn cancel_feedback(&self, action_id: &str) -> String {
        format!("{}/cancelAction/{action_id}/feedback", self.base)
    }

    #[must_use]
    pub fn config_data(&self) -> String {
        format!("{}/configData", self.base)
    }
}
