//! Runtime configuration.
//!
//! All settings come from environment variables supplied by the deployment.
//! Proxy settings (`HTTPS_PROXY`, `NO_PROXY`) are honored by the HTTP client
//! directly and are not read here.

use crate::error::ControllerError;
use osc_client::Credentials;
use std::net::SocketAddr;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Controller configuration loaded at startup.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub credentials: Credentials,
    /// Node the controller pod runs on; its VM carries the cluster tag
    pub node_name: String,
    pub namespace: Option<String>,
    /// Attempts per cloud API call before a transient error is surfaced
    pub max_attempts: u32,
    pub metrics_addr: SocketAddr,
}

impl ControllerConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    ControllerError::InvalidConfig(format!(
                        "{} environment variable is required",
                        key
                    ))
                })
        };

        let access_key = required("OSC_ACCESS_KEY")?;
        let secret_key = required("OSC_SECRET_KEY")?;
        let region = required("OSC_REGION")?;
        let node_name = required("NODE_NAME")?;

        let max_attempts = match lookup("OSC_API_MAX_ATTEMPTS") {
            Some(raw) => {
                let parsed: u32 = raw.trim().parse().map_err(|_| {
                    ControllerError::InvalidConfig(format!(
                        "OSC_API_MAX_ATTEMPTS must be a positive integer, got {}",
                        raw
                    ))
                })?;
                if parsed == 0 {
                    return Err(ControllerError::InvalidConfig(
                        "OSC_API_MAX_ATTEMPTS must be at least 1".to_string(),
                    ));
                }
                parsed
            }
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let metrics_raw = lookup("METRICS_BIND_ADDRESS").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_raw.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "METRICS_BIND_ADDRESS {} is not a socket address: {}",
                metrics_raw, e
            ))
        })?;

        Ok(Self {
            region,
            endpoint: lookup("OSC_ENDPOINT_API").filter(|v| !v.trim().is_empty()),
            credentials: Credentials {
                access_key,
                secret_key,
            },
            node_name,
            namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.trim().is_empty()),
            max_attempts,
            metrics_addr,
        })
    }
}
