//! REST request execution: headers, auth, and the 409/429 retry policy.

use std::time::Duration;

use hawkbit_core::config::AuthMethod;
use hawkbit_core::Config;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::HttpError;

const USER_AGENT: &str = "rauc-hawkbit-agent-rs/1.0";
const MAX_RETRIES: u32 = 10;
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Authenticated HTTP client for the DDI endpoints.
pub struct HttpClient {
    http: reqwest::Client,
    auth_header: Option<(&'static str, String)>,
    pub send_download_authentication: bool,
}

impl HttpClient {
    /// Build the client from the loaded configuration. Fails only on
    /// malformed TLS material (client-cert auth).
    pub fn new(config: &Config) -> Result<Self, HttpError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .danger_accept_invalid_certs(!config.ssl_verify);

        let auth_header = match &config.auth {
            AuthMethod::TargetToken(t) => Some(("Authorization", format!("TargetToken {t}"))),
            AuthMethod::GatewayToken(t) => Some(("Authorization", format!("GatewayToken {t}"))),
            AuthMethod::ClientCert { key, cert, engine } => {
                if engine.is_some() {
                    warn!("ssl_engine is set but rustls-backed TLS has no PKCS#11 engine hook; ignoring");
                }
                let mut pem = std::fs::read(cert).map_err(HttpError::from)?;
                let mut key_pem = std::fs::read(key).map_err(HttpError::from)?;
                pem.append(&mut key_pem);
                let identity = reqwest::Identity::from_pem(&pem)
                    .map_err(|e| HttpError::Transport(e.to_string()))?;
                builder = builder.identity(identity);
                None
            }
        };

        let http = builder.build().map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            auth_header,
            send_download_authentication: config.send_download_authentication,
        })
    }

    pub(crate) fn auth_header(&self) -> Option<(&'static str, String)> {
        self.auth_header.clone()
    }

    async fn request_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, HttpError> {
        let mut attempt = 0;
        loop {
            let mut req = self
                .http
                .request(method.clone(), url)
                .header("Accept", "application/json;charset=UTF-8");

            if let Some((name, value)) = self.auth_header() {
                req = req.header(name, value);
            }
            if let Some(body) = body {
                req = req
                    .header("Content-Type", "application/json;charset=UTF-8")
                    .json(body);
            }

            let resp = req.send().await?;
            let status = resp.status();

            if status.is_success() {
                return Ok(resp);
            }

            if (status == StatusCode::CONFLICT || status == StatusCode::TOO_MANY_REQUESTS)
                && attempt < MAX_RETRIES
            {
                attempt += 1;
                debug!(%status, attempt, url, "retrying DDI request");
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                warn!("401 Unauthorized from DDI server — check auth_token/gateway_token");
            }

            return Err(HttpError::Http {
                status: status.as_u16(),
            });
        }
    }

    /// `GET` a JSON resource. Only HTTP 200 is success.
    pub async fn get_json(&self, url: &str) -> Result<Value, HttpError> {
        let resp = self.request_with_retry(Method::GET, url, None).await?;
        if resp.status() != StatusCode::OK {
            return Err(HttpError::Http {
                status: resp.status().as_u16(),
            });
        }
        let value = resp.json::<Value>().await.map_err(HttpError::from)?;
        Ok(value)
    }

    /// `PUT` a JSON body, discarding the response body. Only HTTP 200 is
    /// success.
    pub async fn put_json(&self, url: &str, body: &Value) -> Result<(), HttpError> {
        let resp = self.request_with_retry(Method::PUT, url, Some(body)).await?;
        if resp.status() != StatusCode::OK {
            return Err(HttpError::Http {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// `POST` a JSON body, discarding the response body. Only HTTP 200 is
    /// success.
    pub async fn post_json(&self, url: &str, body: &Value) -> Result<(), HttpError> {
        let resp = self.request_with_retry(Method::POST, url, Some(body)).await?;
        if resp.status() != StatusCode::OK {
            return Err(HttpError::Http {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    pub(crate) fn raw(&self) -> &reqwest::Client {
        &self.http
    }
}
