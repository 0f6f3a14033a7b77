//! GCP machine set generation and name leasing
//!
//! GCE instance names are short enough that machine set names cannot embed
//! the pool name directly; each pool instead holds a MachinePoolNameLease
//! granting it a one-character slot. Acquiring a lease is asynchronous: the
//! creation is recorded as an expectation first, then issued, and the
//! reconcile stops until the lease watch observes the object.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, ListParams, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::actuator::{
    build_machine_set, fixed_replicas, infra_id, master_provider_spec, provider_spec_string,
    set_provider_spec_field, Actuator,
};
use crate::controller::error::Result;
use crate::controller::expectations::ExpectationsStore;
use crate::controller::status::{
    condition_status, patch_pool_conditions, set_condition_with_change_check, UpdatePolicy,
};
use crate::crd::{
    ClusterDeployment, Machine, MachinePool, MachinePoolConditionType, MachinePoolNameLease,
    MachinePoolNameLeaseSpec, MachineSet, LEASE_CLUSTER_DEPLOYMENT_LABEL,
    MACHINE_POOL_NAME_LABEL,
};

/// JSON pointer to the zone in a GCP provider spec
const ZONE_POINTER: &str = "/zone";

/// The slots pools can lease. The original worker pool prefers "w".
const LEASE_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

const WORKER_POOL_NAME: &str = "worker";
const WORKER_LEASE_CHAR: &str = "w";

pub struct GcpActuator {
    client: Client,
    expectations: Arc<ExpectationsStore>,
    cluster_version: String,
    master_machine: Machine,
    remote_machine_sets: Vec<MachineSet>,
}

impl GcpActuator {
    pub fn new(
        client: Client,
        expectations: Arc<ExpectationsStore>,
        cluster_version: String,
        master_machine: Machine,
        remote_machine_sets: Vec<MachineSet>,
    ) -> Self {
        Self {
            client,
            expectations,
            cluster_version,
            master_machine,
            remote_machine_sets,
        }
    }

    fn zones(&self, pool: &MachinePool, skeleton: &Value) -> Vec<String> {
        let configured = pool
            .spec
            .platform
            .gcp
            .as_ref()
            .map(|gcp| gcp.zones.clone())
            .unwrap_or_default();
        if !configured.is_empty() {
            return configured;
        }
        provider_spec_string(skeleton, ZONE_POINTER)
            .map(|z| vec![z])
            .unwrap_or_default()
    }

    /// A pool that already owns remote machine sets keeps their leased
    /// name, even if the lease object itself was lost.
    fn leased_name_from_remote_sets(&self, infra: &str, pool: &MachinePool) -> Option<String> {
        let prefix = format!("{infra}-");
        self.remote_machine_sets
            .iter()
            .filter(|ms| {
                ms.metadata
                    .labels
                    .as_ref()
                    .and_then(|l| l.get(MACHINE_POOL_NAME_LABEL))
                    .is_some_and(|v| *v == pool.spec.name)
            })
            .filter_map(|ms| {
                let name = ms.name_any();
                let remainder = name.strip_prefix(&prefix)?.to_string();
                remainder.split('-').next().map(str::to_string)
            })
            .next()
    }

    /// Resolve the pool's leased name slot, allocating a lease when none
    /// exists. Returns None when generation cannot continue this pass.
    async fn find_leased_name(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
        infra: &str,
    ) -> Result<Option<String>> {
        if let Some(name) = self.leased_name_from_remote_sets(infra, pool) {
            debug!(leased = %name, "reusing name from existing remote machine sets");
            return Ok(Some(name));
        }

        let namespace = pool.namespace().unwrap_or_default();
        let leases: Api<MachinePoolNameLease> = Api::namespaced(self.client.clone(), &namespace);
        let selector = format!("{LEASE_CLUSTER_DEPLOYMENT_LABEL}={}", cd.name_any());
        let existing = leases.list(&ListParams::default().labels(&selector)).await?;

        let lease_prefix = format!("{infra}-");
        if let Some(held) = existing.items.iter().find(|lease| {
            lease
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(MACHINE_POOL_NAME_LABEL))
                .is_some_and(|v| *v == pool.spec.name)
        }) {
            let name = held.name_any();
            let slot = name
                .strip_prefix(&lease_prefix)
                .unwrap_or_default()
                .to_string();
            debug!(leased = %slot, "found existing name lease");
            return Ok(Some(slot));
        }

        let used: Vec<String> = existing
            .items
            .iter()
            .filter_map(|lease| {
                lease
                    .name_any()
                    .strip_prefix(&lease_prefix)
                    .map(str::to_string)
            })
            .collect();

        let preferred = (pool.spec.name == WORKER_POOL_NAME)
            .then(|| WORKER_LEASE_CHAR.to_string())
            .filter(|c| !used.contains(c));
        let available = preferred.or_else(|| {
            LEASE_CHARS
                .chars()
                .map(|c| c.to_string())
                .find(|c| !used.contains(c))
        });

        let conditions = pool
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        let Some(slot) = available else {
            warn!("no machine pool name leases available");
            let (conditions, changed) = set_condition_with_change_check(
                conditions,
                MachinePoolConditionType::NoMachinePoolNameLeasesAvailable,
                condition_status::TRUE,
                "OutOfMachinePoolNames",
                "All machine pool name leases for the cluster are in use",
                UpdatePolicy::IfReasonOrMessageChange,
            );
            if changed {
                patch_pool_conditions(&self.client, pool, &conditions).await?;
            }
            return Ok(None);
        };
        let (conditions, changed) = set_condition_with_change_check(
            conditions,
            MachinePoolConditionType::NoMachinePoolNameLeasesAvailable,
            condition_status::FALSE,
            "MachinePoolNamesAvailable",
            "A machine pool name lease is available",
            UpdatePolicy::Never,
        );
        if changed {
            patch_pool_conditions(&self.client, pool, &conditions).await?;
        }

        // The expectation is recorded before the create so a reconcile
        // racing the watch cannot double-allocate
        let pool_key = format!("{namespace}/{}", pool.name_any());
        self.expectations.expect_creations(&pool_key, 1);

        let lease = MachinePoolNameLease {
            metadata: ObjectMeta {
                name: Some(format!("{lease_prefix}{slot}")),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([
                    (
                        MACHINE_POOL_NAME_LABEL.to_string(),
                        pool.spec.name.clone(),
                    ),
                    (
                        LEASE_CLUSTER_DEPLOYMENT_LABEL.to_string(),
                        cd.name_any(),
                    ),
                ])),
                owner_references: Some(vec![pool.controller_owner_ref(&()).unwrap_or_default()]),
                ..Default::default()
            },
            spec: MachinePoolNameLeaseSpec::default(),
        };

        info!(
            lease = %lease.name_any(),
            cluster_version = %self.cluster_version,
            "creating machine pool name lease"
        );
        match leases.create(&PostParams::default(), &lease).await {
            Ok(_) => {}
            Err(e) => {
                // The create never happened; do not leave the pool blocked
                self.expectations.delete_expectations(&pool_key);
                return Err(e.into());
            }
        }

        // Wait for the informer to observe the lease before generating
        Ok(None)
    }
}

#[async_trait]
impl Actuator for GcpActuator {
    async fn generate_machine_sets(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<(Vec<MachineSet>, bool)> {
        let infra = infra_id(cd)?;
        let skeleton = master_provider_spec(&self.master_machine)?;

        let Some(leased) = self.find_leased_name(cd, pool, &infra).await? else {
            return Ok((Vec::new(), false));
        };

        let zones = self.zones(pool, &skeleton);
        let sets = zones
            .iter()
            .enumerate()
            .map(|(index, zone)| {
                let name = format!("{infra}-{leased}-{zone}");
                let mut spec = skeleton.clone();
                if let Some(machine_type) = pool
                    .spec
                    .platform
                    .gcp
                    .as_ref()
                    .map(|g| g.instance_type.clone())
                {
                    set_provider_spec_field(&mut spec, "/machineType", json!(machine_type));
                }
                set_provider_spec_field(&mut spec, ZONE_POINTER, json!(zone));
                build_machine_set(&infra, &name, fixed_replicas(pool, zones.len(), index), spec)
            })
            .collect();

        Ok((sets, true))
    }
}
