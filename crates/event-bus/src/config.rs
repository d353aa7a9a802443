//! Bus configuration.

use std::env;
use std::time::Duration;

/// Default transport URL.
pub const DEFAULT_TRANSPORT_URL: &str = "redis://localhost:6379/0";

/// Settings for one bus instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Identity of the owning service; recorded on subscriptions and metrics.
    pub service_name: String,
    /// Broker address, used by network transports.
    pub transport_url: String,
    /// Upper bound on one `receive_one` wait in the dispatch loop.
    pub poll_interval: Duration,
    /// Pause after a transient receive error.
    pub error_backoff: Duration,
    /// Default deadline for request/response exchanges.
    pub request_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            service_name: "event_bus".to_string(),
            transport_url: DEFAULT_TRANSPORT_URL.to_string(),
            poll_interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_SERVICE_NAME`: Service name (default: event_bus)
    /// - `BUS_REDIS_URL`: Transport URL (default: redis://localhost:6379/0)
    /// - `BUS_POLL_INTERVAL_MS`: Dispatch poll interval (default: 1000)
    /// - `BUS_ERROR_BACKOFF_MS`: Back-off after receive errors (default: 1000)
    /// - `BUS_REQUEST_TIMEOUT_MS`: Default request timeout (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            service_name: env::var("BUS_SERVICE_NAME").unwrap_or(defaults.service_name),
            transport_url: env::var("BUS_REDIS_URL").unwrap_or(defaults.transport_url),
            poll_interval: env_millis("BUS_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            error_backoff: env_millis("BUS_ERROR_BACKOFF_MS").unwrap_or(defaults.error_backoff),
            request_timeout: env_millis("BUS_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout),
        }
    }

    /// Environment configuration with a fixed service name.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}
