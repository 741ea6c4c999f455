//! Driver configuration.

use std::time::Duration;

/// Default server URL.
pub const DEFAULT_URL: &str = "nats://localhost:4222";

/// Default bound on a request round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection settings for [`NatsBus`](crate::NatsBus).
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// Server URL, e.g. `nats://localhost:4222`.
    pub url: String,
    /// Applied to requests made without an explicit timeout.
    pub request_timeout: Duration,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl NatsConfig {
    /// Read configuration from `NATS_URL` and `NATS_REQUEST_TIMEOUT_SECS`,
    /// falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("NATS_URL").unwrap_or(defaults.url),
            request_timeout: std::env::var("NATS_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        }
    }
}
