//! Ingress-stage event filters
//!
//! These fingerprints are wired as watch-stream predicates so that churn
//! from status-only writes never wakes the work queue. An event passes only
//! when its fingerprint differs from the last one seen for the object.
//!
//! For pools the fingerprint covers the spec generation, the deletion mark,
//! and the error-class conditions that are currently true, so a failure
//! condition newly raised, newly flipped true, or re-raised with a changed
//! reason or message is surfaced promptly while ordinary status updates are
//! suppressed. Parent-cluster events are reduced to the fields the
//! reconcile gates actually read.

use std::hash::{DefaultHasher, Hash, Hasher};

use crate::controller::status::{condition_status, ERROR_CONDITIONS};
use crate::crd::{ClusterDeployment, MachinePool};

/// Fingerprint of a MachinePool for the ingress filter.
pub fn pool_change_fingerprint(pool: &MachinePool) -> Option<u64> {
    let mut hasher = DefaultHasher::new();

    pool.metadata.generation.hash(&mut hasher);
    pool.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    pool.metadata
        .finalizers
        .as_ref()
        .map(|f| f.len())
        .hash(&mut hasher);

    for type_ in ERROR_CONDITIONS {
        if let Some(cond) = pool.find_condition(type_) {
            if cond.status == condition_status::TRUE {
                type_.hash(&mut hasher);
                cond.reason.hash(&mut hasher);
                cond.message.hash(&mut hasher);
            }
        }
    }

    Some(hasher.finish())
}

/// Fingerprint of a ClusterDeployment covering the fields the pool
/// reconcile gates on.
pub fn cluster_deployment_fingerprint(cd: &ClusterDeployment) -> Option<u64> {
    let mut hasher = DefaultHasher::new();

    cd.spec.installed.hash(&mut hasher);
    cd.spec.cluster_metadata.is_some().hash(&mut hasher);
    cd.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    cd.is_paused_or_relocating().hash(&mut hasher);
    cd.is_fake().hash(&mut hasher);
    cd.is_centrally_managed().hash(&mut hasher);

    Some(hasher.finish())
}
