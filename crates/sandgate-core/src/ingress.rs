//! Ingress resolution: how a sandbox port becomes an externally reachable address.
//!
//! In `direct` mode clients use the sandbox's raw address. In `gateway` mode a
//! shared front door routes to the sandbox, discriminating either by wildcard
//! DNS (`sid-8080.example.com`), by path (`gateway.example.com/sid/8080`), or
//! by a header the client sets itself, in which case there is nothing to
//! rewrite.

use crate::sandbox::SandboxId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label that marks the substitution point in a wildcard gateway address.
pub const WILDCARD_LABEL: &str = "*.";

/// Ingress topology. `gateway` settings exist only in gateway mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum IngressConfig {
    /// Clients connect to the sandbox's own address.
    #[default]
    Direct,
    /// Clients connect through a shared gateway.
    Gateway {
        /// Gateway address and routing discriminator.
        gateway: GatewayConfig,
    },
}

/// Shared front door configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway domain, or a host template such as `*.example.com`.
    pub address: String,
    /// How the gateway tells sandboxes apart.
    pub route: RouteConfig,
}

/// Gateway routing discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Routing mode.
    pub mode: RouteMode,
}

/// Ways a gateway can route to a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    /// `{id}-{port}` replaces the wildcard label of the address.
    Wildcard,
    /// `{address}/{id}/{port}`.
    Uri,
    /// Routed by a client-supplied header; no address is derived.
    Header,
}

impl RouteMode {
    /// Parse from string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wildcard" => Some(Self::Wildcard),
            "uri" => Some(Self::Uri),
            "header" => Some(Self::Header),
            _ => None,
        }
    }
}

/// Gateway configuration that cannot produce a well-formed address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngressError {
    /// Gateway address is empty.
    #[error("gateway address is empty")]
    EmptyAddress,

    /// Wildcard routing needs an address beginning with `*.`.
    #[error("wildcard gateway address {0:?} must start with \"*.\"")]
    MissingWildcard(String),

    /// Only a single, leading wildcard label is supported.
    #[error("wildcard gateway address {0:?} must contain exactly one leading \"*\"")]
    AmbiguousWildcard(String),
}

impl IngressConfig {
    /// Build a gateway config.
    pub fn gateway(address: impl Into<String>, mode: RouteMode) -> Self {
        Self::Gateway {
            gateway: GatewayConfig {
                address: address.into(),
                route: RouteConfig { mode },
            },
        }
    }

    /// Check that every sandbox/port pair can be resolved with this config.
    pub fn validate(&self) -> Result<(), IngressError> {
        match self {
            Self::Direct => Ok(()),
            Self::Gateway { gateway } => gateway.validate(),
        }
    }
}

impl GatewayConfig {
    fn validate(&self) -> Result<(), IngressError> {
        if self.address.trim().is_empty() {
            return Err(IngressError::EmptyAddress);
        }
        if self.route.mode == RouteMode::Wildcard {
            wildcard_suffix(&self.address)?;
        }
        Ok(())
    }
}

/// Returns the part of a wildcard address after the leading `*.` label.
fn wildcard_suffix(address: &str) -> Result<&str, IngressError> {
    let suffix = address
        .strip_prefix(WILDCARD_LABEL)
        .ok_or_else(|| IngressError::MissingWildcard(address.to_string()))?;
    if suffix.is_empty() || suffix.contains('*') {
        return Err(IngressError::AmbiguousWildcard(address.to_string()));
    }
    Ok(suffix)
}

/// Compute the external address of `port` on sandbox `id`.
///
/// Returns `Ok(None)` when no rewrite applies (no config, direct mode, or
/// header routing) and the caller should publish the raw sandbox address.
pub fn resolve(
    config: Option<&IngressConfig>,
    id: &SandboxId,
    port: u16,
) -> Result<Option<String>, IngressError> {
    let gateway = match config {
        None | Some(IngressConfig::Direct) => return Ok(None),
        Some(IngressConfig::Gateway { gateway }) => gateway,
    };

    gateway.validate()?;

    match gateway.route.mode {
        RouteMode::Wildcard => {
            let suffix = wildcard_suffix(&gateway.address)?;
            Ok(Some(format!("{id}-{port}.{suffix}")))
        }
        RouteMode::Uri => Ok(Some(format!("{}/{id}/{port}", gateway.address))),
        RouteMode::Header => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> SandboxId {
        SandboxId::from("sid")
    }

    #[test]
    fn test_no_config_or_direct_returns_none() {
        assert_eq!(resolve(None, &sid(), 8080), Ok(None));
        assert_eq!(resolve(Some(&IngressConfig::Direct), &sid(), 8080), Ok(None));
    }

    #[test]
    fn test_wildcard() {
        let cfg = IngressConfig::gateway("*.example.com", RouteMode::Wildcard);
        assert_eq!(
            resolve(Some(&cfg), &sid(), 8080),
            Ok(Some("sid-8080.example.com".to_string()))
        );
    }

    #[test]
    fn test_uri() {
        let cfg = IngressConfig::gateway("gateway.example.com", RouteMode::Uri);
        assert_eq!(
            resolve(Some(&cfg), &sid(), 9000),
            Ok(Some("gateway.example.com/sid/9000".to_string()))
        );
    }

    #[test]
    fn test_header_returns_none() {
        let cfg = IngressConfig::gateway("gateway.example.com", RouteMode::Header);
        assert_eq!(resolve(Some(&cfg), &sid(), 9000), Ok(None));
    }

    #[test]
    fn test_wildcard_without_token_fails() {
        let cfg = IngressConfig::gateway("gateway.example.com", RouteMode::Wildcard);
        assert_eq!(
            resolve(Some(&cfg), &sid(), 8080),
            Err(IngressError::MissingWildcard("gateway.example.com".into()))
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_wildcard_not_leading_fails() {
        let cfg = IngressConfig::gateway("sandbox.*.example.com", RouteMode::Wildcard);
        assert!(matches!(
            resolve(Some(&cfg), &sid(), 8080),
            Err(IngressError::MissingWildcard(_))
        ));
    }

    #[test]
    fn test_multiple_wildcards_fail() {
        let cfg = IngressConfig::gateway("*.*.example.com", RouteMode::Wildcard);
        assert!(matches!(
            resolve(Some(&cfg), &sid(), 8080),
            Err(IngressError::AmbiguousWildcard(_))
        ));

        let bare = IngressConfig::gateway("*.", RouteMode::Wildcard);
        assert!(bare.validate().is_err());
    }

    #[test]
    fn test_uri_does_not_inspect_address_shape() {
        let cfg = IngressConfig::gateway("*.example.com", RouteMode::Uri);
        assert_eq!(
            resolve(Some(&cfg), &sid(), 1),
            Ok(Some("*.example.com/sid/1".to_string()))
        );
    }

    #[test]
    fn test_empty_address_rejected() {
        let cfg = IngressConfig::gateway("", RouteMode::Uri);
        assert_eq!(resolve(Some(&cfg), &sid(), 80), Err(IngressError::EmptyAddress));
        assert_eq!(cfg.validate(), Err(IngressError::EmptyAddress));
    }

    #[test]
    fn test_blank_address_rejected_like_validate() {
        for mode in [RouteMode::Uri, RouteMode::Wildcard, RouteMode::Header] {
            let cfg = IngressConfig::gateway("  ", mode);
            assert_eq!(resolve(Some(&cfg), &sid(), 9000), Err(IngressError::EmptyAddress));
            assert_eq!(cfg.validate(), Err(IngressError::EmptyAddress));
        }
    }

    #[test]
    fn test_config_wire_shape() {
        let cfg: IngressConfig = serde_json::from_str(
            r#"{"mode":"gateway","gateway":{"address":"*.example.com","route":{"mode":"wildcard"}}}"#,
        )
        .unwrap();
        assert_eq!(cfg, IngressConfig::gateway("*.example.com", RouteMode::Wildcard));

        let direct: IngressConfig = serde_json::from_str(r#"{"mode":"direct"}"#).unwrap();
        assert_eq!(direct, IngressConfig::Direct);

        assert!(serde_json::from_str::<IngressConfig>(r#"{"mode":"gateway"}"#).is_err());
    }

    #[test]
    fn test_route_mode_parse() {
        assert_eq!(RouteMode::parse("WILDCARD"), Some(RouteMode::Wildcard));
        assert_eq!(RouteMode::parse("uri"), Some(RouteMode::Uri));
        assert_eq!(RouteMode::parse("header"), Some(RouteMode::Header));
        assert_eq!(RouteMode::parse("dns"), None);
    }
}
