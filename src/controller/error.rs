//! Error types for the MachinePool controller

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`).
/// This is idiomatic for error enums and improves readability at call sites.
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Remote cluster kubeconfig error: {0}")]
    KubeconfigError(String),

    #[error("No master machines in cluster")]
    NoMasterMachines,

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Cluster version not set on cluster deployment")]
    MissingClusterVersion,

    #[error("Invalid machine pool: {0}")]
    InvalidPoolSpec(String),

    #[error("Actuator error: {0}")]
    ActuatorError(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            // Kubernetes API errors are often retryable
            Error::KubeError(e) => {
                match e {
                    kube::Error::Api(api_err) => {
                        // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                        let code = api_err.code;
                        if (400..500).contains(&code) {
                            return code == 409 || code == 429;
                        }
                        // 5xx errors are retryable
                        true
                    }
                    // Network and other errors are retryable
                    _ => true,
                }
            }
            // The remote cluster may become reachable or grow masters later
            Error::KubeconfigError(_) => true,
            Error::NoMasterMachines => true,
            // User must fix the spec; retrying cannot help
            Error::UnsupportedPlatform(_) => false,
            Error::MissingClusterVersion => false,
            Error::InvalidPoolSpec(_) => false,
            Error::SerializationError(_) => false,
            Error::ActuatorError(_) => true,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);

        // Apply jitter
        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        // Cap at max delay
        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait out the max delay; the spec has to
            // change before another attempt can succeed
            self.max_delay
        }
    }
}

/// Per-key failure counter driving the exponential backoff. The counter
/// advances on every failed reconcile of a key and clears on the next
/// successful one.
#[derive(Debug, Default)]
pub struct RetryTracker {
    attempts: Mutex<HashMap<String, u32>>,
}

impl RetryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure and return its zero-based attempt number.
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut attempts = self.attempts.lock().expect("retry lock poisoned");
        let counter = attempts.entry(key.to_string()).or_insert(0);
        let attempt = *counter;
        *counter = counter.saturating_add(1);
        attempt
    }

    /// Clear the counter after a successful reconcile.
    pub fn reset(&self, key: &str) {
        let mut attempts = self.attempts.lock().expect("retry lock poisoned");
        attempts.remove(key);
    }
}
