//! Egress network policy: wire types, validation and rule evaluation.
//!
//! Enforcement belongs to the network fabric; this module only makes sure a
//! malformed policy never reaches it.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Verdict for outbound traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the connection through.
    Allow,
    /// Drop the connection.
    #[default]
    Deny,
}

/// One egress rule. `target` is a domain, a `*.` wildcard domain, an IP or a CIDR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRule {
    /// Verdict when the target matches.
    pub action: Action,
    /// What the rule matches.
    pub target: String,
}

impl NetworkRule {
    /// Allow traffic to `target`.
    pub fn allow(target: impl Into<String>) -> Self {
        Self {
            action: Action::Allow,
            target: target.into(),
        }
    }

    /// Deny traffic to `target`.
    pub fn deny(target: impl Into<String>) -> Self {
        Self {
            action: Action::Deny,
            target: target.into(),
        }
    }
}

/// Ordered egress rules plus the fallback verdict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicy {
    /// Verdict when no rule matches. Omitted means `deny`.
    #[serde(default)]
    pub default_action: Action,
    /// Rules, first match wins.
    #[serde(default)]
    pub egress: Vec<NetworkRule>,
}

/// Parsed form of a rule target.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target<'a> {
    Ip(IpAddr),
    Cidr(IpAddr, u8),
    Wildcard(&'a str),
    Domain(&'a str),
}

impl<'a> Target<'a> {
    fn parse(raw: &'a str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Err("target must not be empty".into());
        }
        if raw.chars().any(char::is_whitespace) {
            return Err(format!("target {raw:?} contains whitespace"));
        }

        if let Some((addr, prefix)) = raw.split_once('/') {
            let addr: IpAddr = addr
                .parse()
                .map_err(|_| format!("target {raw:?} is not a valid CIDR"))?;
            let max = if addr.is_ipv4() { 32 } else { 128 };
            let prefix: u8 = prefix
                .parse()
                .ok()
                .filter(|p| *p <= max)
                .ok_or_else(|| format!("target {raw:?} has an invalid prefix length"))?;
            return Ok(Self::Cidr(addr, prefix));
        }

        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Ok(Self::Ip(ip));
        }

        if let Some(suffix) = raw.strip_prefix("*.") {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(format!("target {raw:?} has a misplaced wildcard"));
            }
            return Ok(Self::Wildcard(suffix));
        }
        if raw.contains('*') {
            return Err(format!("target {raw:?} has a misplaced wildcard"));
        }

        Ok(Self::Domain(raw))
    }

    fn matches(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.');
        match self {
            Self::Domain(domain) => host.eq_ignore_ascii_case(domain.trim_end_matches('.')),
            Self::Wildcard(suffix) => {
                let suffix = suffix.trim_end_matches('.');
                host.len() > suffix.len() + 1
                    && host.is_char_boundary(host.len() - suffix.len() - 1)
                    && host[host.len() - suffix.len() - 1..]
                        .eq_ignore_ascii_case(&format!(".{suffix}"))
            }
            Self::Ip(ip) => host.parse::<IpAddr>().is_ok_and(|h| h == *ip),
            Self::Cidr(net, prefix) => host
                .parse::<IpAddr>()
                .is_ok_and(|h| cidr_contains(*net, *prefix, h)),
        }
    }
}

fn cidr_contains(net: IpAddr, prefix: u8, addr: IpAddr) -> bool {
    match (net, addr) {
        (IpAddr::V4(net), IpAddr::V4(addr)) => {
            let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
            u32::from(net) & mask == u32::from(addr) & mask
        }
        (IpAddr::V6(net), IpAddr::V6(addr)) => {
            let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
            u128::from(net) & mask == u128::from(addr) & mask
        }
        _ => false,
    }
}

impl NetworkPolicy {
    /// Create a policy with no rules.
    pub fn new(default_action: Action) -> Self {
        Self {
            default_action,
            egress: Vec::new(),
        }
    }

    /// Deny everything.
    pub fn default_deny() -> Self {
        Self::new(Action::Deny)
    }

    /// Append a rule.
    pub fn with_rule(mut self, rule: NetworkRule) -> Self {
        self.egress.push(rule);
        self
    }

    /// Parse a policy from its JSON wire form.
    ///
    /// Unknown actions are reported as validation errors, and the parsed
    /// policy is validated before it is returned.
    pub fn parse(json: &str) -> Result<Self, CoreError> {
        let policy: Self = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("invalid network policy: {e}")))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Check that every rule has a usable target.
    ///
    /// Actions are typed, so only targets need checking here. An empty rule
    /// list is valid and reduces the policy to `default_action`.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (index, rule) in self.egress.iter().enumerate() {
            Target::parse(&rule.target).map_err(|reason| {
                CoreError::Validation(format!("invalid egress rule {index}: {reason}"))
            })?;
        }
        Ok(())
    }

    /// Verdict for an outbound connection to `host` (domain or IP).
    ///
    /// Rules are checked in order and the first match wins; unparseable
    /// targets never match.
    pub fn evaluate(&self, host: &str) -> Action {
        self.egress
            .iter()
            .find(|rule| Target::parse(&rule.target).is_ok_and(|t| t.matches(host)))
            .map(|rule| rule.action)
            .unwrap_or(self.default_action)
    }
}
