//! Three-way synchronization of generated objects against observed state
//!
//! A single planning routine serves machine sets, machine autoscalers, and
//! machine templates; per-kind logic lives in the drift closure. Planning is
//! pure so the create/update/delete decision is testable without a cluster;
//! applying performs the writes in Create, Update, Delete order and aborts
//! on the first failure, leaving the next pass to re-diff and retry.

use std::collections::BTreeMap;
use std::fmt::Debug;

use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::controller::error::Result;
use crate::controller::replicas::get_min_max_replicas;
use crate::crd::{
    AWSMachineTemplate, ClusterAutoscaler, ClusterAutoscalerSpec, ClusterDeployment,
    CrossVersionObjectReference, MachineAutoscaler, MachineAutoscalerSpec, MachinePool,
    MachineSet, ScaleDownConfig, MACHINE_POOL_NAME_LABEL,
};

/// Name of the singleton cluster autoscaler on the target cluster
pub const CLUSTER_AUTOSCALER_NAME: &str = "default";

/// The API version machine autoscalers use to address their target
const MACHINE_SET_API_VERSION: &str = "machine.openshift.io/v1beta1";

/// An observed object belongs to the pool iff its name carries the
/// `<clusterName>-<poolName>-` prefix or it is labeled with the pool name.
/// Only owned objects may ever enter a delete set.
pub fn is_controlled_by_pool(
    cd: &ClusterDeployment,
    pool: &MachinePool,
    name: &str,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let prefix = format!("{}-{}-", cd.spec.cluster_name, pool.spec.name);
    name.starts_with(&prefix)
        || labels
            .and_then(|l| l.get(MACHINE_POOL_NAME_LABEL))
            .is_some_and(|v| *v == pool.spec.name)
}

/// Merge required labels and annotations into the existing metadata without
/// disturbing entries the controller does not manage.
pub fn ensure_object_meta(modified: &mut bool, existing: &mut ObjectMeta, required: &ObjectMeta) {
    ensure_map(modified, &mut existing.labels, &required.labels);
    ensure_map(modified, &mut existing.annotations, &required.annotations);
}

fn ensure_map(
    modified: &mut bool,
    existing: &mut Option<BTreeMap<String, String>>,
    required: &Option<BTreeMap<String, String>>,
) {
    let Some(required) = required else { return };
    if required.is_empty() {
        return;
    }
    let existing = existing.get_or_insert_with(BTreeMap::new);
    for (key, value) in required {
        if existing.get(key) != Some(value) {
            existing.insert(key.clone(), value.clone());
            *modified = true;
        }
    }
}

/// Disjoint write sets produced by planning, plus the merged view of every
/// desired object (observed where present, generated otherwise) in desired
/// order.
#[derive(Debug, Default)]
pub struct SyncPlan<T> {
    pub to_create: Vec<T>,
    pub to_update: Vec<T>,
    pub to_delete: Vec<T>,
    pub result: Vec<T>,
}

impl<T> SyncPlan<T> {
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Compute the three disjoint sets for one kind. `apply_drift` folds the
/// desired object (by index) onto a copy of the observed one and reports
/// whether anything changed; `owned` scopes deletion to this pool's
/// objects. When the pool is being deleted the desired set is treated as
/// empty for deletion purposes.
fn plan_three_way<T: Clone>(
    desired: &[T],
    observed: &[T],
    key_of: impl Fn(&T) -> String,
    mut apply_drift: impl FnMut(&mut T, &T, usize) -> bool,
    owned: impl Fn(&T) -> bool,
    pool_deleting: bool,
) -> SyncPlan<T> {
    let mut plan = SyncPlan {
        to_create: Vec::new(),
        to_update: Vec::new(),
        to_delete: Vec::new(),
        result: Vec::with_capacity(desired.len()),
    };

    for (index, wanted) in desired.iter().enumerate() {
        match observed.iter().find(|o| key_of(o) == key_of(wanted)) {
            Some(existing) => {
                let mut merged = existing.clone();
                if apply_drift(&mut merged, wanted, index) {
                    plan.to_update.push(merged.clone());
                }
                plan.result.push(merged);
            }
            None => {
                plan.to_create.push(wanted.clone());
                plan.result.push(wanted.clone());
            }
        }
    }

    for existing in observed {
        if !owned(existing) {
            continue;
        }
        let keep =
            !pool_deleting && desired.iter().any(|w| key_of(w) == key_of(existing));
        if !keep {
            plan.to_delete.push(existing.clone());
        }
    }

    plan
}

fn bump_generation(meta: &mut ObjectMeta) {
    meta.generation = Some(meta.generation.unwrap_or(0) + 1);
}

/// Plan the machine set writes for one reconcile pass.
pub fn plan_machine_set_sync(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    generated: &[MachineSet],
    observed: &[MachineSet],
) -> SyncPlan<MachineSet> {
    let deleting = pool.metadata.deletion_timestamp.is_some();
    let num_machine_sets = generated.len();

    plan_three_way(
        generated,
        observed,
        |ms| ms.name_any(),
        |existing, wanted, index| {
            let mut meta_modified = false;
            let mut modified = false;
            ensure_object_meta(&mut meta_modified, &mut existing.metadata, &wanted.metadata);

            match &pool.spec.autoscaling {
                None => {
                    if existing.spec.replicas != wanted.spec.replicas {
                        info!(
                            machineset = %existing.name_any(),
                            desired = ?wanted.spec.replicas,
                            observed = ?existing.spec.replicas,
                            "replicas out of sync"
                        );
                        existing.spec.replicas = wanted.spec.replicas;
                        modified = true;
                    }
                }
                Some(bounds) => {
                    // When min == max the autoscaler ignores the machine set
                    // entirely, so the replica count is clamped into range
                    // here rather than left to the autoscaler.
                    let (min, max) = get_min_max_replicas(bounds, num_machine_sets, index);
                    match existing.spec.replicas {
                        None => {
                            info!(machineset = %existing.name_any(), min, max, "setting replicas to min");
                            existing.spec.replicas = Some(min);
                            modified = true;
                        }
                        Some(r) if r < min => {
                            info!(machineset = %existing.name_any(), observed = r, min, max, "setting replicas to min");
                            existing.spec.replicas = Some(min);
                            modified = true;
                        }
                        Some(r) if r > max => {
                            info!(machineset = %existing.name_any(), observed = r, min, max, "setting replicas to max");
                            existing.spec.replicas = Some(max);
                            modified = true;
                        }
                        Some(r) => {
                            debug!(machineset = %existing.name_any(), observed = r, min, max, "replicas within range");
                        }
                    }
                }
            }

            // An empty map and an absent one are the same thing to the
            // machine API; only a real difference counts as drift.
            let observed_labels = &existing.spec.template.spec.metadata.labels;
            let wanted_labels = &wanted.spec.template.spec.metadata.labels;
            if (!observed_labels.is_empty() || !wanted_labels.is_empty())
                && observed_labels != wanted_labels
            {
                info!(machineset = %existing.name_any(), "labels out of sync");
                existing.spec.template.spec.metadata.labels = wanted_labels.clone();
                modified = true;
            }

            let observed_taints = &existing.spec.template.spec.taints;
            let wanted_taints = &wanted.spec.template.spec.taints;
            if (!observed_taints.is_empty() || !wanted_taints.is_empty())
                && observed_taints != wanted_taints
            {
                info!(machineset = %existing.name_any(), "taints out of sync");
                existing.spec.template.spec.taints = wanted_taints.clone();
                modified = true;
            }

            if meta_modified || modified {
                bump_generation(&mut existing.metadata);
                return true;
            }
            false
        },
        |ms| is_controlled_by_pool(cd, pool, &ms.name_any(), ms.metadata.labels.as_ref()),
        deleting,
    )
}

/// Plan the machine autoscaler writes. The desired set is one autoscaler
/// per machine set, and only exists while the pool autoscales and is not
/// being deleted.
pub fn plan_machine_autoscaler_sync(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    machine_sets: &[MachineSet],
    observed: &[MachineAutoscaler],
) -> SyncPlan<MachineAutoscaler> {
    let deleting = pool.metadata.deletion_timestamp.is_some();

    let desired: Vec<MachineAutoscaler> = match (&pool.spec.autoscaling, deleting) {
        (Some(bounds), false) => machine_sets
            .iter()
            .enumerate()
            .map(|(index, ms)| {
                let (min_replicas, max_replicas) =
                    get_min_max_replicas(bounds, machine_sets.len(), index);
                MachineAutoscaler {
                    metadata: ObjectMeta {
                        namespace: ms.namespace(),
                        name: Some(ms.name_any()),
                        labels: Some(BTreeMap::from([(
                            MACHINE_POOL_NAME_LABEL.to_string(),
                            pool.spec.name.clone(),
                        )])),
                        ..Default::default()
                    },
                    spec: MachineAutoscalerSpec {
                        min_replicas,
                        max_replicas,
                        scale_target_ref: CrossVersionObjectReference {
                            api_version: MACHINE_SET_API_VERSION.to_string(),
                            kind: "MachineSet".to_string(),
                            name: ms.name_any(),
                        },
                    },
                }
            })
            .collect(),
        _ => Vec::new(),
    };

    plan_three_way(
        &desired,
        observed,
        |ma| ma.name_any(),
        |existing, wanted, _index| {
            let mut modified = false;
            if existing.spec.min_replicas != wanted.spec.min_replicas {
                info!(
                    machineautoscaler = %existing.name_any(),
                    desired = wanted.spec.min_replicas,
                    observed = existing.spec.min_replicas,
                    "min replicas out of sync"
                );
                existing.spec.min_replicas = wanted.spec.min_replicas;
                modified = true;
            }
            if existing.spec.max_replicas != wanted.spec.max_replicas {
                info!(
                    machineautoscaler = %existing.name_any(),
                    desired = wanted.spec.max_replicas,
                    observed = existing.spec.max_replicas,
                    "max replicas out of sync"
                );
                existing.spec.max_replicas = wanted.spec.max_replicas;
                modified = true;
            }
            modified
        },
        |ma| is_controlled_by_pool(cd, pool, &ma.name_any(), ma.metadata.labels.as_ref()),
        deleting,
    )
}

/// Plan the machine template writes for the central management variant.
pub fn plan_machine_template_sync(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    generated: &[AWSMachineTemplate],
    observed: &[AWSMachineTemplate],
) -> SyncPlan<AWSMachineTemplate> {
    let deleting = pool.metadata.deletion_timestamp.is_some();

    plan_three_way(
        generated,
        observed,
        |mt| mt.name_any(),
        |existing, wanted, _index| {
            let mut meta_modified = false;
            ensure_object_meta(&mut meta_modified, &mut existing.metadata, &wanted.metadata);
            // TODO: compare the template's machine shape as well and update
            // on drift; only metadata is inspected today.
            if meta_modified {
                bump_generation(&mut existing.metadata);
            }
            meta_modified
        },
        |mt| is_controlled_by_pool(cd, pool, &mt.name_any(), mt.metadata.labels.as_ref()),
        deleting,
    )
}

/// Apply a plan in Create, Update, Delete order. Writes are independent; the
/// first failure aborts and the next reconcile retries the remainder.
pub async fn apply_sync_plan<T>(client: &Client, plan: &SyncPlan<T>, kind: &str) -> Result<()>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug,
    <T as Resource>::DynamicType: Default,
{
    for obj in &plan.to_create {
        let api: Api<T> = Api::namespaced(client.clone(), &obj.namespace().unwrap_or_default());
        info!(kind, name = %obj.name_any(), "creating object");
        api.create(&PostParams::default(), obj).await?;
    }

    for obj in &plan.to_update {
        let api: Api<T> = Api::namespaced(client.clone(), &obj.namespace().unwrap_or_default());
        info!(kind, name = %obj.name_any(), "updating object");
        api.replace(&obj.name_any(), &PostParams::default(), obj)
            .await?;
    }

    for obj in &plan.to_delete {
        let api: Api<T> = Api::namespaced(client.clone(), &obj.namespace().unwrap_or_default());
        info!(kind, name = %obj.name_any(), "deleting object");
        api.delete(&obj.name_any(), &DeleteParams::default()).await?;
    }

    Ok(())
}

/// Make sure the singleton cluster autoscaler exists with scale-down
/// enabled. It is created if absent and patched if disabled, and never
/// deleted here. Only called while the pool autoscales.
pub async fn ensure_cluster_autoscaler(remote: &Client) -> Result<()> {
    let api: Api<ClusterAutoscaler> = Api::all(remote.clone());

    match api.get_opt(CLUSTER_AUTOSCALER_NAME).await? {
        Some(mut existing) => {
            let scale_down_enabled = existing
                .spec
                .scale_down
                .as_ref()
                .is_some_and(|sd| sd.enabled);
            if !scale_down_enabled {
                info!("enabling scale-down on cluster autoscaler");
                existing.spec.scale_down = Some(ScaleDownConfig { enabled: true });
                api.replace(CLUSTER_AUTOSCALER_NAME, &PostParams::default(), &existing)
                    .await?;
            }
        }
        None => {
            info!("creating cluster autoscaler");
            let autoscaler = ClusterAutoscaler {
                metadata: ObjectMeta {
                    name: Some(CLUSTER_AUTOSCALER_NAME.to_string()),
                    ..Default::default()
                },
                spec: ClusterAutoscalerSpec {
                    scale_down: Some(ScaleDownConfig { enabled: true }),
                },
            };
            api.create(&PostParams::default(), &autoscaler).await?;
        }
    }

    Ok(())
}
