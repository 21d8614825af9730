//! Configuration for the Sandgate HTTP server.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use sandgate_core::{
    ControllerConfig, IngressConfig, IngressError, LocalBackendConfig, ProbeConfig, RouteMode,
    DEFAULT_CONTROL_PORT,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

/// Request header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "SANDGATE-API-KEY";

/// Configuration for the Sandgate server.
#[derive(Debug, Clone)]
pub struct SandgateConfig {
    /// HTTP server bind address.
    pub http_addr: SocketAddr,

    /// Accepted API keys. Empty means every request is rejected.
    pub api_keys: Vec<String>,

    /// How sandbox ports are exposed outside the host.
    pub ingress: IngressConfig,

    /// Externally visible base used for `use_server_proxy` endpoints.
    /// Falls back to the request's `Host` header when unset.
    pub server_proxy_base: Option<String>,

    /// Host part of raw sandbox addresses (default: 127.0.0.1).
    pub sandbox_host: String,

    /// Control port probed after creation (default: 44772).
    pub control_port: u16,

    /// Readiness probe tuning.
    pub probe: ProbeConfig,
}

/// Configuration validation error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown ingress mode: {0}")]
    UnknownIngressMode(String),

    #[error("unknown gateway route mode: {0}")]
    UnknownRouteMode(String),

    #[error("invalid ingress configuration: {0}")]
    Ingress(#[from] IngressError),

    #[error("invalid controller configuration: {0}")]
    Controller(String),
}

impl Default for SandgateConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 8080),
            api_keys: Vec::new(),
            ingress: IngressConfig::Direct,
            server_proxy_base: None,
            sandbox_host: "127.0.0.1".to_string(),
            control_port: DEFAULT_CONTROL_PORT,
            probe: ProbeConfig::default(),
        }
    }
}

impl SandgateConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SANDGATE_HTTP_HOST` | `0.0.0.0` |
    /// | `SANDGATE_HTTP_PORT` | `8080` |
    /// | `SANDGATE_API_KEYS` | none (comma-separated) |
    /// | `SANDGATE_INGRESS_MODE` | `direct` (direct, gateway) |
    /// | `SANDGATE_GATEWAY_ADDRESS` | none |
    /// | `SANDGATE_GATEWAY_ROUTE` | `wildcard` (wildcard, uri, header) |
    /// | `SANDGATE_SERVER_PROXY_BASE` | request `Host` header |
    /// | `SANDGATE_SANDBOX_HOST` | `127.0.0.1` |
    /// | `SANDGATE_CONTROL_PORT` | `44772` |
    /// | `SANDGATE_PROBE_PATH` | `/health` |
    /// | `SANDGATE_PROBE_MAX_ATTEMPTS` | `150` |
    /// | `SANDGATE_PROBE_INTERVAL_MS` | `200` |
    /// | `SANDGATE_PROBE_TIMEOUT_MS` | `1000` |
    ///
    /// # Errors
    ///
    /// Returns an error only for values that cannot be interpreted at all
    /// (unknown ingress or route mode). Unparseable numbers fall back to
    /// their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let millis = |key: &str| parse_var::<u64, _>(&lookup, key).map(Duration::from_millis);

        let http_host: IpAddr =
            parse_var(&lookup, "SANDGATE_HTTP_HOST").unwrap_or(default.http_addr.ip());
        let http_port: u16 =
            parse_var(&lookup, "SANDGATE_HTTP_PORT").unwrap_or(default.http_addr.port());

        let api_keys = lookup("SANDGATE_API_KEYS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let ingress = match lookup("SANDGATE_INGRESS_MODE")
            .map(|v| v.trim().to_lowercase())
            .as_deref()
        {
            None | Some("") | Some("direct") => IngressConfig::Direct,
            Some("gateway") => {
                let address = lookup("SANDGATE_GATEWAY_ADDRESS").unwrap_or_default();
                let route = match lookup("SANDGATE_GATEWAY_ROUTE") {
                    Some(v) => RouteMode::parse(v.trim())
                        .ok_or_else(|| ConfigError::UnknownRouteMode(v.clone()))?,
                    None => RouteMode::Wildcard,
                };
                IngressConfig::gateway(address.trim(), route)
            }
            Some(other) => return Err(ConfigError::UnknownIngressMode(other.to_string())),
        };

        let probe = ProbeConfig {
            path: lookup("SANDGATE_PROBE_PATH").unwrap_or(default.probe.path),
            max_attempts: parse_var(&lookup, "SANDGATE_PROBE_MAX_ATTEMPTS")
                .unwrap_or(default.probe.max_attempts),
            interval: millis("SANDGATE_PROBE_INTERVAL_MS").unwrap_or(default.probe.interval),
            request_timeout: millis("SANDGATE_PROBE_TIMEOUT_MS")
                .unwrap_or(default.probe.request_timeout),
        };

        Ok(Self {
            http_addr: SocketAddr::new(http_host, http_port),
            api_keys,
            ingress,
            server_proxy_base: lookup("SANDGATE_SERVER_PROXY_BASE")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            sandbox_host: lookup("SANDGATE_SANDBOX_HOST").unwrap_or(default.sandbox_host),
            control_port: parse_var(&lookup, "SANDGATE_CONTROL_PORT")
                .unwrap_or(default.control_port),
            probe,
        })
    }

    /// Controller settings derived from this configuration.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            control_port: self.control_port,
            probe: self.probe.clone(),
        }
    }

    /// Settings for the in-process backend.
    pub fn backend_config(&self) -> LocalBackendConfig {
        LocalBackendConfig {
            sandbox_host: self.sandbox_host.clone(),
            ingress: Some(self.ingress.clone()),
            ..Default::default()
        }
    }

    /// Validate the configuration.
    ///
    /// Call this at startup so a misconfigured gateway fails before the
    /// first endpoint is published.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingress.validate()?;
        self.controller_config()
            .validate()
            .map_err(|e| ConfigError::Controller(e.to_string()))
    }

    /// Log warnings for settings that are valid but probably unintended.
    pub fn validate_warn(&self) {
        if self.api_keys.is_empty() {
            tracing::warn!("SANDGATE_API_KEYS is empty, every request will be rejected");
        }
    }
}

/// Parse a variable, treating unparseable values as unset.
fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}
