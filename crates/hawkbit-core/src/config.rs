//! Immutable agent configuration, loaded once at startup from an INI file:
//! a `[client]` section with server, transport and auth settings, and a
//! `[device]` section of attribute name/value pairs sent on
//! identification.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Everything that can go wrong while loading or validating the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("missing required key [{section}] {key}")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    #[error("exactly one of auth_token, gateway_token, or (ssl_key+ssl_cert) must be set")]
    AmbiguousAuth,

    #[error("invalid value for [{section}] {key}: {value}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("timeout ({timeout}s) must be >= connect_timeout ({connect_timeout}s)")]
    TimeoutOrder { timeout: u64, connect_timeout: u64 },

    #[error("[client] {key} must be greater than zero")]
    NonPositiveTimeout { key: &'static str },

    #[error("[device] section must define at least one attribute")]
    NoDeviceAttributes,
}

/// Exactly one of these is configured.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    TargetToken(String),
    GatewayToken(String),
    ClientCert {
        key: PathBuf,
        cert: PathBuf,
        engine: Option<String>,
    },
}

/// `log_level` values accepted by the `[client]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Message,
    Warning,
    Critical,
    Error,
    Fatal,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "message" => Some(Self::Message),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            "error" => Some(Self::Error),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Map onto a `tracing` level filter string, for the service glue's
    /// subscriber setup.
    #[must_use]
    pub const fn as_tracing_filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info | Self::Message => "info",
            Self::Warning => "warn",
            Self::Critical | Self::Error | Self::Fatal => "error",
        }
    }
}

/// Immutable, process-wide agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub hawkbit_server: String,
    pub tenant_id: String,
    pub target_name: String,
    pub auth: AuthMethod,
    pub ssl: bool,
    pub ssl_verify: bool,
    pub bundle_download_location: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub retry_wait: Duration,
    pub low_speed_time: Duration,
    pub low_speed_rate: u64,
    pub resume_downloads: bool,
    pub stream_bundle: bool,
    pub post_update_reboot: bool,
    pub send_download_authentication: bool,
    pub log_level: LogLevel,
    pub device_attributes: BTreeMap<String, String>,
}

/// Case-insensitive boolean parsing: {1,yes,true} / {0,no,false}.
fn parse_bool(section: &'static str, key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" => Ok(true),
        "0" | "no" | "false" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            section,
            key,
            value: other.to_string(),
        }),
    }
}

fn parse_u64(section: &'static str, key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        section,
        key,
        value: value.to_string(),
    })
}

impl Config {
    /// Load and validate the configuration from an INI-style file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let ini = ini::Ini::load_from_file(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &ini::Ini) -> Result<Self, ConfigError> {
        let client = ini.section(Some("client"));
        let get = |key: &'static str| -> Option<&str> { client.and_then(|s| s.get(key)) };
        let require = |key: &'static str| -> Result<String, ConfigError> {
            get(key)
                .map(str::to_string)
                .ok_or(ConfigError::MissingKey { section: "client", key })
        };

        let hawkbit_server = require("hawkbit_server")?;
        let target_name = require("target_name")?;

        let auth_token = get("auth_token").map(str::to_string);
        let gateway_token = get("gateway_token").map(str::to_string);
        let ssl_key = get("ssl_key").map(PathBuf::from);
        let ssl_cert = get("ssl_cert").map(PathBuf::from);
        let ssl_engine = get("ssl_engine").map(str::to_string);

        let auth = match (auth_token, gateway_token, ssl_key, ssl_cert) {
            (Some(t), None, None, None) => AuthMethod::TargetToken(t),
            (None, Some(t), None, None) => AuthMethod::GatewayToken(t),
            (None, None, Some(key), Some(cert)) => AuthMethod::ClientCert {
                key,
                cert,
                engine: ssl_engine,
            },
            _ => return Err(ConfigError::AmbiguousAuth),
        };

        let tenant_id = get("tenant_id").unwrap_or("DEFAULT").to_string();

        let ssl = match get("ssl") {
            Some(v) => parse_bool("client", "ssl", v)?,
            None => true,
        };
        let ssl_verify = match get("ssl_verify") {
            Some(v) => parse_bool("client", "ssl_verify", v)?,
            None => true,
        };

        let stream_bundle = match get("stream_bundle") {
            Some(v) => parse_bool("client", "stream_bundle", v)?,
            None => false,
        };

        let bundle_download_location = get("bundle_download_location").map(PathBuf::from);
        if bundle_download_location.is_none() && !stream_bundle {
            return Err(ConfigError::MissingKey {
                section: "client",
                key: "bundle_download_location",
            });
        }

        let connect_timeout_s = match get("connect_timeout") {
            Some(v) => parse_u64("client", "connect_timeout", v)?,
            None => 20,
        };
        let timeout_s = match get("timeout") {
            Some(v) => parse_u64("client", "timeout", v)?,
            None => 60,
        };
        if connect_timeout_s == 0 {
            return Err(ConfigError::NonPositiveTimeout { key: "connect_timeout" });
        }
        if timeout_s == 0 {
            return Err(ConfigError::NonPositiveTimeout { key: "timeout" });
        }
        if timeout_s < connect_timeout_s {
            return Err(ConfigError::TimeoutOrder {
                timeout: timeout_s,
                connect_timeout: connect_timeout_s,
            });
        }
        let retry_wait_s = match get("retry_wait") {
            Some(v) => parse_u64("client", "retry_wait", v)?,
            None => 300,
        };
        let low_speed_time_s = match get("low_speed_time") {
            Some(v) => parse_u64("client", "low_speed_time", v)?,
            None => 60,
        };
        let low_speed_rate = match get("low_speed_rate") {
            Some(v) => parse_u64("client", "low_speed_rate", v)?,
            None => 100,
        };

        let resume_downloads = match get("resume_downloads") {
            Some(v) => parse_bool("client", "resume_downloads", v)?,
            None => false,
        };
        let post_update_reboot = match get("post_update_reboot") {
            Some(v) => parse_bool("client", "post_update_reboot", v)?,
            None => false,
        };
        let send_download_authentication = match get("send_download_authentication") {
            Some(v) => parse_bool("client", "send_download_authentication", v)?,
            None => true,
        };

        let log_level = match get("log_level") {
            Some(v) => LogLevel::parse(v).ok_or_else(|| ConfigError::InvalidValue {
                section: "client",
                key: "log_level",
                value: v.to_string(),
            })?,
            None => LogLevel::Message,
        };

        let mut device_attributes = BTreeMap::new();
        if let Some(device) = ini.section(Some("device")) {
            for (k, v) in device.iter() {
                if !v.is_empty() {
                    device_attributes.insert(k.to_string(), v.to_string());
                }
            }
        }
        if device_attributes.is_empty() {
            return Err(ConfigError::NoDeviceAttributes);
        }

        Ok(Self {
            hawkbit_server,
            tenant_id,
            target_name,
            auth,
            ssl,
            ssl_verify,
            bundle_download_location,
            connect_timeout: Duration::from_secs(connect_timeout_s),
            timeout: Duration::from_secs(timeout_s),
            retry_wait: Duration::from_secs(retry_wait_s),
            low_speed_time: Duration::from_secs(low_speed_time_s),
            low_speed_rate,
            resume_downloads,
            stream_bundle,
            post_update_reboot,
            send_download_authentication,
            log_level,
            device_attributes,
        })
    }
}
