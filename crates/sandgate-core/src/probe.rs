//! Readiness probe for freshly created sandboxes.
//!
//! The probe resolves the sandbox address once, then polls `{address}{path}`
//! until it answers `200 OK` or the attempt budget runs out. Misses of any
//! kind (connection refused, non-200, timeout) are expected while the
//! sandbox boots and are never escalated.

use crate::error::CoreError;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Default health path.
pub const DEFAULT_HEALTH_PATH: &str = "/health";

/// Default number of attempts (~30s at the default interval).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 150;

/// Default delay between attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);

/// Default timeout for a single health request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);

/// Probe tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Path appended to the sandbox address.
    pub path: String,
    /// Maximum number of health requests.
    pub max_attempts: u32,
    /// Delay between consecutive requests.
    pub interval: Duration,
    /// Upper bound on a single request.
    pub request_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_HEALTH_PATH.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProbeConfig {
    /// Worst-case wall-clock time spent sleeping between attempts.
    ///
    /// Saturates at `Duration::MAX` for oversized settings.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

/// A single bounded health request.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// GET `url` and return the response status code.
    async fn status(&self, url: &str, timeout: Duration) -> Result<u16, CoreError>;
}

/// [`HealthCheck`] backed by `reqwest`.
#[derive(Debug, Clone, Default)]
pub struct HttpHealthCheck {
    client: reqwest::Client,
}

impl HttpHealthCheck {
    /// Create a health checker with a fresh connection pool.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn status(&self, url: &str, timeout: Duration) -> Result<u16, CoreError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| CoreError::Backend(format!("health request failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}

/// How a probe run ended.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// The sandbox answered 200.
    Ready {
        /// Attempt that succeeded (1-based)
        attempts: u32,
        /// Time from the first request to success
        elapsed: Duration,
    },
    /// Every attempt missed.
    Exhausted {
        /// Attempts made
        attempts: u32,
    },
    /// The address could not be resolved; no requests were made.
    LookupFailed(CoreError),
    /// The caller cancelled the probe.
    Cancelled {
        /// Attempts made before cancellation
        attempts: u32,
    },
}

impl ProbeOutcome {
    /// Whether the sandbox is ready.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

/// Polls a sandbox's health endpoint until it is reachable.
pub struct ReadinessProbe<'a> {
    health: &'a dyn HealthCheck,
    config: &'a ProbeConfig,
}

impl<'a> ReadinessProbe<'a> {
    /// Create a probe using `health` for requests.
    pub fn new(health: &'a dyn HealthCheck, config: &'a ProbeConfig) -> Self {
        Self { health, config }
    }

    /// Wait until the sandbox behind `lookup` answers healthy.
    ///
    /// `lookup` is called once. Attempts run strictly one after another with
    /// `interval` between them; there is no sleep after the final attempt.
    pub async fn wait_until_ready<F, Fut>(
        &self,
        lookup: F,
        cancel: &CancellationToken,
    ) -> ProbeOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, CoreError>>,
    {
        let address = match lookup().await {
            Ok(address) => address,
            Err(e) => {
                tracing::warn!(error = %e, "Readiness probe could not resolve sandbox address");
                return ProbeOutcome::LookupFailed(e);
            }
        };
        let url = health_url(&address, &self.config.path);
        tracing::debug!(
            url = %url,
            max_attempts = self.config.max_attempts,
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting readiness probe"
        );

        let start = Instant::now();
        for attempt in 1..=self.config.max_attempts {
            let check = tokio::time::timeout(
                self.config.request_timeout,
                self.health.status(&url, self.config.request_timeout),
            );
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(attempts = attempt - 1, "Readiness probe cancelled");
                    return ProbeOutcome::Cancelled { attempts: attempt - 1 };
                }
                result = check => result,
            };

            match result {
                Ok(Ok(200)) => {
                    let elapsed = start.elapsed();
                    tracing::info!(
                        url = %url,
                        attempts = attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Sandbox ready"
                    );
                    return ProbeOutcome::Ready {
                        attempts: attempt,
                        elapsed,
                    };
                }
                Ok(Ok(status)) => {
                    tracing::trace!(attempt, status, "Health check returned non-200, retrying...");
                }
                Ok(Err(e)) => {
                    tracing::trace!(attempt, error = %e, "Health check failed, retrying...");
                }
                Err(_) => {
                    tracing::trace!(attempt, "Health check timed out, retrying...");
                }
            }

            if attempt < self.config.max_attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(attempts = attempt, "Readiness probe cancelled");
                        return ProbeOutcome::Cancelled { attempts: attempt };
                    }
                    _ = tokio::time::sleep(self.config.interval) => {}
                }
            }
        }

        tracing::warn!(
            url = %url,
            attempts = self.config.max_attempts,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Readiness probe exhausted"
        );
        ProbeOutcome::Exhausted {
            attempts: self.config.max_attempts,
        }
    }
}

/// Join an address and path into a probe URL, defaulting to `http://`.
fn health_url(address: &str, path: &str) -> String {
    let base = address.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if base.contains("://") {
        format!("{base}/{path}")
    } else {
        format!("http://{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Answers with a scripted status per attempt; `None` simulates a transport error.
    struct ScriptedHealth {
        script: Vec<Option<u16>>,
        calls: AtomicU32,
        urls: Mutex<Vec<String>>,
    }

    impl ScriptedHealth {
        fn new(script: Vec<Option<u16>>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
                urls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthCheck for ScriptedHealth {
        async fn status(&self, url: &str, _timeout: Duration) -> Result<u16, CoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            self.urls.lock().unwrap().push(url.to_string());
            match self.script.get(n).copied().flatten() {
                Some(status) => Ok(status),
                None => Err(CoreError::Backend("connection refused".into())),
            }
        }
    }

    /// Never answers; every request runs into the per-request timeout.
    struct HangingHealth;

    #[async_trait]
    impl HealthCheck for HangingHealth {
        async fn status(&self, _url: &str, _timeout: Duration) -> Result<u16, CoreError> {
            std::future::pending().await
        }
    }

    fn config(max_attempts: u32) -> ProbeConfig {
        ProbeConfig {
            max_attempts,
            ..Default::default()
        }
    }

    async fn lookup() -> Result<String, CoreError> {
        Ok("10.0.0.5:44772".to_string())
    }

    #[test]
    fn test_config_defaults() {
        let config = ProbeConfig::default();
        assert_eq!(config.path, "/health");
        assert_eq!(config.max_attempts, 150);
        assert_eq!(config.interval, Duration::from_millis(200));
        assert_eq!(config.request_timeout, Duration::from_secs(1));
        assert_eq!(config.budget(), Duration::from_secs(30));
    }

    #[test]
    fn test_budget_saturates() {
        let config = ProbeConfig {
            interval: Duration::from_millis(u64::MAX),
            max_attempts: u32::MAX,
            ..Default::default()
        };
        assert_eq!(config.budget(), Duration::MAX);
    }

    #[test]
    fn test_health_url() {
        assert_eq!(health_url("10.0.0.5:8080", "/health"), "http://10.0.0.5:8080/health");
        assert_eq!(
            health_url("https://gw.example.com/sid/8080/", "health"),
            "https://gw.example.com/sid/8080/health"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_nth_attempt() {
        let health = ScriptedHealth::new(vec![None, Some(503), None, Some(200)]);
        let config = config(10);
        let probe = ReadinessProbe::new(&health, &config);

        let start = tokio::time::Instant::now();
        let outcome = probe.wait_until_ready(lookup, &CancellationToken::new()).await;

        assert!(outcome.is_ready());
        assert_eq!(health.calls(), 4);
        assert!(start.elapsed() >= config.interval * 3);
        assert_eq!(
            health.urls.lock().unwrap()[0],
            "http://10.0.0.5:44772/health".to_string()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_is_bounded() {
        let health = ScriptedHealth::new(vec![Some(500); 5]);
        let config = config(5);
        let probe = ReadinessProbe::new(&health, &config);

        let start = tokio::time::Instant::now();
        let outcome = probe.wait_until_ready(lookup, &CancellationToken::new()).await;

        assert!(matches!(outcome, ProbeOutcome::Exhausted { attempts: 5 }));
        assert_eq!(health.calls(), 5);
        assert!(start.elapsed() <= config.budget());
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_exact_200_counts() {
        let health = ScriptedHealth::new(vec![Some(204), Some(301), Some(200)]);
        let config = config(3);
        let probe = ReadinessProbe::new(&health, &config);

        let outcome = probe.wait_until_ready(lookup, &CancellationToken::new()).await;
        assert!(matches!(outcome, ProbeOutcome::Ready { attempts: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_requests_time_out_and_count_as_misses() {
        let config = config(3);
        let probe = ReadinessProbe::new(&HangingHealth, &config);

        let start = tokio::time::Instant::now();
        let outcome = probe.wait_until_ready(lookup, &CancellationToken::new()).await;

        assert!(matches!(outcome, ProbeOutcome::Exhausted { attempts: 3 }));
        assert!(start.elapsed() <= config.budget() + config.request_timeout * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_failure_short_circuits() {
        let health = ScriptedHealth::new(vec![Some(200)]);
        let config = config(10);
        let probe = ReadinessProbe::new(&health, &config);

        let outcome = probe
            .wait_until_ready(
                || async { Err(CoreError::Backend("no endpoint".into())) },
                &CancellationToken::new(),
            )
            .await;

        assert!(matches!(outcome, ProbeOutcome::LookupFailed(CoreError::Backend(_))));
        assert!(!outcome.is_ready());
        assert_eq!(health.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_early() {
        let health = ScriptedHealth::new(Vec::new());
        let config = config(DEFAULT_MAX_ATTEMPTS);
        let probe = ReadinessProbe::new(&health, &config);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        let outcome = probe.wait_until_ready(lookup, &cancel).await;

        assert!(matches!(outcome, ProbeOutcome::Cancelled { .. }));
        assert!(start.elapsed() < config.budget());
        assert!(health.calls() < DEFAULT_MAX_ATTEMPTS);
    }
}
