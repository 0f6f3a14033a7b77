//! Pending-creation expectations for machine pools
//!
//! Some actuators create child objects asynchronously (currently name leases
//! on GCP). A reconcile that issued such a create must not run again until
//! the informer has observed the object, or it would issue the create a
//! second time. The store tracks a pending-create counter per pool key; the
//! child watch decrements it. A TTL bounds how long a lost event can block a
//! pool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How long unsatisfied expectations block a pool before the failsafe lets
/// reconciliation proceed anyway.
pub const EXPECTATIONS_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct PendingCreations {
    pending: i64,
    recorded_at: Instant,
}

impl PendingCreations {
    fn is_expired(&self) -> bool {
        self.recorded_at.elapsed() > EXPECTATIONS_TTL
    }
}

/// Process-wide registry of pending creations, keyed by pool key
/// (`<namespace>/<name>`).
#[derive(Debug, Default)]
pub struct ExpectationsStore {
    inner: Mutex<HashMap<String, PendingCreations>>,
}

impl ExpectationsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `count` child creations were issued for the pool and must
    /// be observed before its next reconcile.
    pub fn expect_creations(&self, key: &str, count: i64) {
        let mut inner = self.inner.lock().expect("expectations lock poisoned");
        debug!(%key, count, "recording creation expectations");
        inner.insert(
            key.to_string(),
            PendingCreations {
                pending: count,
                recorded_at: Instant::now(),
            },
        );
    }

    /// Observe one child creation for the pool.
    pub fn creation_observed(&self, key: &str) {
        let mut inner = self.inner.lock().expect("expectations lock poisoned");
        if let Some(pending) = inner.get_mut(key) {
            if pending.pending > 0 {
                pending.pending -= 1;
                debug!(%key, remaining = pending.pending, "observed expected creation");
            }
        }
    }

    /// Whether the pool may reconcile. True when nothing is pending, when
    /// all recorded creations have been observed, or when the TTL failsafe
    /// has elapsed.
    pub fn satisfied_expectations(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("expectations lock poisoned");
        match inner.get(key) {
            None => true,
            Some(pending) if pending.pending <= 0 => true,
            Some(pending) if pending.is_expired() => {
                warn!(%key, "expectations expired, allowing reconcile to proceed");
                true
            }
            Some(_) => false,
        }
    }

    /// Forget all expectations for the pool. Called when the pool is gone.
    pub fn delete_expectations(&self, key: &str) {
        let mut inner = self.inner.lock().expect("expectations lock poisoned");
        if inner.remove(key).is_some() {
            debug!(%key, "dropped expectations");
        }
    }
}
