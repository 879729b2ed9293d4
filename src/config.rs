//! Configuration for the pool, validator and executor.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the pool, validator and request executor.
#[derive(Debug, Clone)]
pub struct RotatorConfig {
    /// Directory holding the persisted pool state.
    pub data_dir: PathBuf,
    /// Minimum interval between validation passes for one provider.
    pub validation_cooldown: Duration,
    /// Maximum in-flight `proxy_check` probes during a validation pass.
    pub validation_concurrency: usize,
    /// Per-attempt timeout for outbound requests.
    pub request_timeout: Duration,
    /// Proxy rotations allowed within one logical request.
    pub max_retries: usize,
    /// Pool draws attempted when looking for a not-yet-used proxy.
    pub max_proxy_draws: usize,
    /// Redirect hops followed within one logical request.
    pub max_redirects: usize,
    /// Pacing applied to outbound attempts, pool-wide.
    pub max_requests_per_second: f64,
}

impl RotatorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RotatorConfigBuilder {
        RotatorConfigBuilder::new()
    }
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Builder for `RotatorConfig`.
pub struct RotatorConfigBuilder {
    data_dir: Option<PathBuf>,
    validation_cooldown: Option<Duration>,
    validation_concurrency: Option<usize>,
    request_timeout: Option<Duration>,
    max_retries: Option<usize>,
    max_proxy_draws: Option<usize>,
    max_redirects: Option<usize>,
    max_requests_per_second: Option<f64>,
}

impl RotatorConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            data_dir: None,
            validation_cooldown: None,
            validation_concurrency: None,
            request_timeout: None,
            max_retries: None,
            max_proxy_draws: None,
            max_redirects: None,
            max_requests_per_second: None,
        }
    }

    /// Set the directory holding the persisted pool state.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Set the minimum interval between validation passes for one provider.
    pub fn validation_cooldown(mut self, cooldown: Duration) -> Self {
        self.validation_cooldown = Some(cooldown);
        self
    }

    /// Set the maximum number of in-flight validation probes.
    pub fn validation_concurrency(mut self, concurrency: usize) -> Self {
        self.validation_concurrency = Some(concurrency);
        self
    }

    /// Set the per-attempt timeout for outbound requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the number of proxy rotations allowed within one logical request.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set the number of pool draws attempted per rotation.
    pub fn max_proxy_draws(mut self, draws: usize) -> Self {
        self.max_proxy_draws = Some(draws);
        self
    }

    /// Set the number of redirect hops followed per logical request.
    pub fn max_redirects(mut self, redirects: usize) -> Self {
        self.max_redirects = Some(redirects);
        self
    }

    /// Set the pacing applied to outbound attempts.
    pub fn max_requests_per_second(mut self, rps: f64) -> Self {
        self.max_requests_per_second = Some(rps);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> RotatorConfig {
        RotatorConfig {
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("data/proxies")),
            // 2.5 hours between passes per provider
            validation_cooldown: self
                .validation_cooldown
                .unwrap_or(Duration::from_secs(9000)),
            validation_concurrency: self.validation_concurrency.unwrap_or(50),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(5)),
            max_retries: self.max_retries.unwrap_or(3),
            max_proxy_draws: self.max_proxy_draws.unwrap_or(10),
            max_redirects: self.max_redirects.unwrap_or(10),
            max_requests_per_second: self.max_requests_per_second.unwrap_or(5.0),
        }
    }
}

impl Default for RotatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
