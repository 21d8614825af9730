//! Controller configuration types.

use crate::error::CoreError;
use crate::probe::ProbeConfig;
use std::time::Duration;

/// Port the in-sandbox execution daemon listens on.
pub const DEFAULT_CONTROL_PORT: u16 = 44772;

/// Configuration for [`LifecycleController`](crate::LifecycleController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Well-known port probed for readiness after creation (default: 44772).
    pub control_port: u16,
    /// Readiness probe tuning.
    pub probe: ProbeConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_port: DEFAULT_CONTROL_PORT,
            probe: ProbeConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Create a new config builder.
    pub fn builder() -> ControllerConfigBuilder {
        ControllerConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.control_port == 0 {
            return Err(CoreError::Validation("control_port must be > 0".into()));
        }
        if self.probe.max_attempts == 0 {
            return Err(CoreError::Validation("probe max_attempts must be > 0".into()));
        }
        if self.probe.request_timeout.is_zero() {
            return Err(CoreError::Validation(
                "probe request_timeout must be > 0".into(),
            ));
        }
        if !self.probe.path.starts_with('/') {
            return Err(CoreError::Validation(
                "probe path must start with '/'".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for ControllerConfig.
#[derive(Debug, Default)]
pub struct ControllerConfigBuilder {
    config: ControllerConfig,
}

impl ControllerConfigBuilder {
    /// Set the control port probed after creation.
    pub fn control_port(mut self, port: u16) -> Self {
        self.config.control_port = port;
        self
    }

    /// Set the health path.
    pub fn probe_path(mut self, path: impl Into<String>) -> Self {
        self.config.probe.path = path.into();
        self
    }

    /// Set the maximum number of probe attempts.
    pub fn probe_max_attempts(mut self, attempts: u32) -> Self {
        self.config.probe.max_attempts = attempts;
        self
    }

    /// Set the delay between probe attempts.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.config.probe.interval = interval;
        self
    }

    /// Set the timeout of a single probe request.
    pub fn probe_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.probe.request_timeout = timeout;
        self
    }

    /// Build the configuration, validating all fields.
    pub fn build(self) -> Result<ControllerConfig, CoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
