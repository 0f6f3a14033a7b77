//! Reconciliation logic for MachinePool resources
//!
//! Each pass projects one pool onto the machine sets, machine autoscalers,
//! and (under central machine management) machine templates of its target
//! cluster. Writes are idempotent and at-least-once; a failed pass is
//! retried with backoff and re-diffs from scratch.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use crate::controller::context::{Context, RemoteConnection, FIELD_MANAGER};
use crate::controller::error::{BackoffConfig, Error, Result};
use crate::controller::replicas::{
    get_min_max_replicas, platform_allows_zero_autoscaling_min_replicas,
};
use crate::controller::status::{
    build_pool_status, condition_status, initialize_conditions, patch_pool_conditions,
    set_condition_with_change_check, update_pool_status, UpdatePolicy,
};
use crate::controller::sync::{
    apply_sync_plan, ensure_cluster_autoscaler, plan_machine_autoscaler_sync,
    plan_machine_set_sync, plan_machine_template_sync,
};
use crate::crd::{
    AWSMachineTemplate, ClusterDeployment, Machine, MachineAutoscaler, MachinePool,
    MachinePoolConditionType, MachineSet, MACHINE_POOL_NAME_LABEL, MANAGED_LABEL,
    MASTER_MACHINE_LABEL, MASTER_MACHINE_ROLE,
};

/// Deletion guard on MachinePool resources
pub const FINALIZER: &str = "hive.openshift.io/remotemachineset";

/// Requeue interval while remote machine sets converge. Remote machine set
/// changes cannot trigger a watch event here, so a pool that is not at
/// steady state polls on this cadence.
const CONVERGE_REQUEUE: Duration = Duration::from_secs(10 * 60);

/// Requeue interval after a write the ingress filter would suppress
const IMMEDIATE_REQUEUE: Duration = Duration::from_secs(1);

/// Requeue interval while waiting on issued deletions or an unreachable
/// remote cluster
const SHORT_REQUEUE: Duration = Duration::from_secs(60);

/// Main reconciliation function
#[instrument(skip(pool, ctx), fields(name = %pool.name_any(), namespace = pool.namespace().unwrap_or_default()))]
pub async fn reconcile(pool: Arc<MachinePool>, ctx: Arc<Context>) -> Result<Action> {
    let pool_key = format!(
        "{}/{}",
        pool.namespace().unwrap_or_default(),
        pool.name_any()
    );

    let action = reconcile_machine_pool(pool, &ctx).await?;
    // A clean pass ends the backoff escalation for this key
    ctx.retries.reset(&pool_key);
    Ok(action)
}

async fn reconcile_machine_pool(pool: Arc<MachinePool>, ctx: &Context) -> Result<Action> {
    let ns = pool.namespace().unwrap_or_default();
    let pool_key = format!("{}/{}", ns, pool.name_any());

    // Re-read so this pass sees the latest status and deletion mark
    let pools: Api<MachinePool> = Api::namespaced(ctx.client.clone(), &ns);
    let Some(pool) = pools.get_opt(&pool.name_any()).await? else {
        debug!("machine pool no longer exists");
        ctx.expectations.delete_expectations(&pool_key);
        return Ok(Action::await_change());
    };

    info!("reconciling machine pool");
    validate_pool_spec(&pool)?;

    let existing_conditions = pool
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    let initialized = initialize_conditions(existing_conditions.clone());
    if initialized.len() > existing_conditions.len() {
        info!("initializing machine pool conditions");
        patch_pool_conditions(&ctx.client, &pool, &initialized).await?;
        return Ok(Action::requeue(IMMEDIATE_REQUEUE));
    }

    // A pool that is going away and never got its guard needs no teardown
    if !has_finalizer(&pool) && pool.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    if !ctx.expectations.satisfied_expectations(&pool_key) {
        // The lease watch re-enqueues this pool once the creations land
        debug!("waiting for expectations to be satisfied");
        return Ok(Action::await_change());
    }

    let cds: Api<ClusterDeployment> = Api::namespaced(ctx.client.clone(), &ns);
    let Some(cd) = cds.get_opt(&pool.spec.cluster_deployment_ref.name).await? else {
        debug!("cluster deployment does not exist");
        return remove_finalizer(&pool, ctx).await;
    };

    if cd.is_paused_or_relocating() {
        debug!("cluster deployment is paused or relocating, skipping");
        return Ok(Action::await_change());
    }
    if cd.metadata.deletion_timestamp.is_some() {
        return remove_finalizer(&pool, ctx).await;
    }
    if !cd.spec.installed {
        debug!("cluster installation is not complete");
        return Ok(Action::await_change());
    }
    if cd.spec.cluster_metadata.is_none() {
        error!("installed cluster with no cluster metadata");
        return Ok(Action::await_change());
    }

    if !has_finalizer(&pool) {
        add_finalizer(&pool, ctx).await?;
        return Ok(Action::requeue(IMMEDIATE_REQUEUE));
    }

    if cd.is_fake() {
        info!("skipping reconcile for fake cluster");
        return Ok(Action::await_change());
    }

    let remote = match ctx.remote_clients.connect(&ctx.client, &cd).await? {
        RemoteConnection::Connected(client) => client,
        RemoteConnection::Unreachable { requeue } => {
            debug!("remote cluster is unreachable");
            return Ok(if requeue {
                Action::requeue(SHORT_REQUEUE)
            } else {
                Action::await_change()
            });
        }
    };

    info!("reconciling machine pool for cluster deployment");

    let master_machine = get_master_machine(&remote).await?;

    if cd.is_centrally_managed() {
        if cd.spec.platform.aws.is_none() {
            warn!("central machine management requested but unavailable for platform");
            let (conditions, changed) = set_condition_with_change_check(
                initialized,
                MachinePoolConditionType::UnsupportedConfiguration,
                condition_status::TRUE,
                "CentralMachineManagementUnsupported",
                "Central machine management is not available for the cluster's platform",
                UpdatePolicy::IfReasonOrMessageChange,
            );
            if changed {
                patch_pool_conditions(&ctx.client, &pool, &conditions).await?;
            }
            return Ok(Action::await_change());
        }
        info!("reconciling local machine sets");
        return reconcile_local_machine_sets(&pool, &cd, &master_machine, ctx).await;
    }

    info!("reconciling remote machine sets");
    reconcile_remote_machine_sets(&pool, &cd, &master_machine, &remote, ctx).await
}

/// Error policy for the controller with exponential backoff. Consecutive
/// failures of the same pool escalate the delay until a pass succeeds.
pub fn error_policy(pool: Arc<MachinePool>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = pool.name_any();
    let pool_key = format!("{}/{}", pool.namespace().unwrap_or_default(), name);
    let attempt = ctx.retries.record_failure(&pool_key);

    let backoff = BackoffConfig::default();
    let delay = backoff.delay_for_error(error, attempt);

    if error.is_retryable() {
        warn!(
            "Retryable error for {} (attempt {}): {:?}, requeuing in {:?}",
            name, attempt, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {:?}, requeuing in {:?} for manual intervention",
            name, error, delay
        );
    }

    Action::requeue(delay)
}

/// Exactly one of replicas and autoscaling must be set on a pool.
fn validate_pool_spec(pool: &MachinePool) -> Result<()> {
    match (&pool.spec.replicas, &pool.spec.autoscaling) {
        (Some(_), Some(_)) => Err(Error::InvalidPoolSpec(
            "replicas and autoscaling are mutually exclusive".to_string(),
        )),
        (None, None) => Err(Error::InvalidPoolSpec(
            "one of replicas or autoscaling must be set".to_string(),
        )),
        _ => Ok(()),
    }
}

async fn reconcile_remote_machine_sets(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    master_machine: &Machine,
    remote: &Client,
    ctx: &Context,
) -> Result<Action> {
    let remote_machine_sets = get_remote_machine_sets(remote).await?;

    let Some(generated) =
        generate_machine_sets(pool, cd, master_machine, &remote_machine_sets, ctx).await?
    else {
        return Ok(Action::await_change());
    };

    if let Some(action) = ensure_enough_replicas(pool, cd, generated.len(), ctx).await? {
        return Ok(action);
    }

    let plan = plan_machine_set_sync(pool, cd, &generated, &remote_machine_sets);
    apply_sync_plan(remote, &plan, "machineset").await?;
    let machine_sets = plan.result;
    info!("done reconciling machine sets for machine pool");

    let autoscalers: Api<MachineAutoscaler> = Api::all(remote.clone());
    let observed_autoscalers = autoscalers.list(&ListParams::default()).await?;
    debug!(
        count = observed_autoscalers.items.len(),
        "found remote machine autoscalers"
    );
    let autoscaler_plan =
        plan_machine_autoscaler_sync(pool, cd, &machine_sets, &observed_autoscalers.items);
    apply_sync_plan(remote, &autoscaler_plan, "machineautoscaler").await?;

    if pool.is_autoscaling() {
        ensure_cluster_autoscaler(remote).await?;
    }

    if pool.metadata.deletion_timestamp.is_some() {
        if !plan.to_delete.is_empty() || !autoscaler_plan.to_delete.is_empty() {
            // Deletions were issued this pass; the guard comes off only once
            // no owned object is observed anymore
            return Ok(Action::requeue(IMMEDIATE_REQUEUE));
        }
        let (status, _) = build_pool_status(pool, &machine_sets, remote).await;
        update_pool_status(&ctx.client, pool, &status).await?;
        return remove_finalizer(pool, ctx).await;
    }

    let (status, converging) = build_pool_status(pool, &machine_sets, remote).await;
    update_pool_status(&ctx.client, pool, &status).await?;

    Ok(if converging {
        Action::requeue(CONVERGE_REQUEUE)
    } else {
        Action::await_change()
    })
}

async fn reconcile_local_machine_sets(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    master_machine: &Machine,
    ctx: &Context,
) -> Result<Action> {
    let Some(target_namespace) = cd
        .spec
        .machine_management
        .as_ref()
        .and_then(|mm| mm.target_namespace.clone())
    else {
        error!("central machine management enabled with no target namespace");
        return Ok(Action::await_change());
    };

    let local_set_api: Api<MachineSet> = Api::namespaced(ctx.client.clone(), &target_namespace);
    let local_machine_sets = local_set_api.list(&ListParams::default()).await?.items;
    debug!(count = local_machine_sets.len(), "found local machine sets");

    let template_api: Api<AWSMachineTemplate> =
        Api::namespaced(ctx.client.clone(), &target_namespace);
    let local_templates = template_api.list(&ListParams::default()).await?.items;

    let Some(mut generated) =
        generate_machine_sets(pool, cd, master_machine, &[], ctx).await?
    else {
        return Ok(Action::await_change());
    };
    for ms in &mut generated {
        ms.metadata.namespace = Some(target_namespace.clone());
    }

    let mut generated_templates = if pool.metadata.deletion_timestamp.is_some() {
        Vec::new()
    } else {
        let actuator = ctx
            .actuators
            .create(ctx, cd, pool, master_machine, &[])
            .await?;
        actuator.generate_machine_templates(cd, pool).await?
    };
    for mt in &mut generated_templates {
        mt.metadata.namespace = Some(target_namespace.clone());
    }

    if let Some(action) = ensure_enough_replicas(pool, cd, generated.len(), ctx).await? {
        return Ok(action);
    }

    info!("syncing machine templates");
    let template_plan = plan_machine_template_sync(pool, cd, &generated_templates, &local_templates);
    apply_sync_plan(&ctx.client, &template_plan, "machinetemplate").await?;

    info!("syncing machine sets");
    let plan = plan_machine_set_sync(pool, cd, &generated, &local_machine_sets);
    apply_sync_plan(&ctx.client, &plan, "machineset").await?;
    let machine_sets = plan.result;

    if pool.metadata.deletion_timestamp.is_some() {
        if !plan.to_delete.is_empty() || !template_plan.to_delete.is_empty() {
            return Ok(Action::requeue(IMMEDIATE_REQUEUE));
        }
        let (status, _) = build_pool_status(pool, &machine_sets, &ctx.client).await;
        update_pool_status(&ctx.client, pool, &status).await?;
        return remove_finalizer(pool, ctx).await;
    }

    let (status, converging) = build_pool_status(pool, &machine_sets, &ctx.client).await;
    update_pool_status(&ctx.client, pool, &status).await?;

    Ok(if converging {
        Action::requeue(CONVERGE_REQUEUE)
    } else {
        Action::await_change()
    })
}

/// Run the actuator and stamp the pool's identity onto the generated sets.
/// Returns None when the actuator indicated not to proceed; a deleting pool
/// yields an empty desired set.
async fn generate_machine_sets(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    master_machine: &Machine,
    remote_machine_sets: &[MachineSet],
    ctx: &Context,
) -> Result<Option<Vec<MachineSet>>> {
    if pool.metadata.deletion_timestamp.is_some() {
        return Ok(Some(Vec::new()));
    }

    let actuator = ctx
        .actuators
        .create(ctx, cd, pool, master_machine, remote_machine_sets)
        .await?;

    let (mut generated, proceed) = actuator.generate_machine_sets(cd, pool).await?;
    if !proceed {
        info!("actuator indicated not to proceed, returning");
        return Ok(None);
    }

    let count = generated.len();
    for (index, ms) in generated.iter_mut().enumerate() {
        if let Some(bounds) = &pool.spec.autoscaling {
            let (min, _) = get_min_max_replicas(bounds, count, index);
            ms.spec.replicas = Some(min);
        }

        let labels = ms.metadata.labels.get_or_insert_with(Default::default);
        labels.insert(MACHINE_POOL_NAME_LABEL.to_string(), pool.spec.name.clone());
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        ms.spec.template.spec.metadata.labels = pool.spec.labels.clone();
        ms.spec.template.spec.taints = pool.spec.taints.clone();
    }

    info!(count, "generated worker machine sets");
    Ok(Some(generated))
}

/// Hard stop when autoscaling bounds cannot give every machine set at least
/// one replica on a platform that disallows empty sets. Nothing can change
/// until the user edits the pool, so no retry is scheduled.
async fn ensure_enough_replicas(
    pool: &MachinePool,
    cd: &ClusterDeployment,
    num_machine_sets: usize,
    ctx: &Context,
) -> Result<Option<Action>> {
    let Some(bounds) = &pool.spec.autoscaling else {
        return Ok(None);
    };
    let conditions = pool
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();

    if bounds.min_replicas < num_machine_sets as i32
        && !platform_allows_zero_autoscaling_min_replicas(cd)
    {
        warn!(
            machinesets = num_machine_sets,
            min_replicas = bounds.min_replicas,
            "when auto-scaling, the machine pool must have at least one replica for each machine set"
        );
        let (conditions, changed) = set_condition_with_change_check(
            conditions,
            MachinePoolConditionType::NotEnoughReplicas,
            condition_status::TRUE,
            "MinReplicasTooSmall",
            &format!(
                "When auto-scaling, the machine pool must have at least one replica for each machine set. The minReplicas must be at least {num_machine_sets}"
            ),
            UpdatePolicy::IfReasonOrMessageChange,
        );
        if changed {
            patch_pool_conditions(&ctx.client, pool, &conditions).await?;
        }
        return Ok(Some(Action::await_change()));
    }

    let (conditions, changed) = set_condition_with_change_check(
        conditions,
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::FALSE,
        "EnoughReplicas",
        "The machine pool has sufficient replicas for each machine set",
        UpdatePolicy::Never,
    );
    if changed {
        patch_pool_conditions(&ctx.client, pool, &conditions).await?;
        return Ok(Some(Action::requeue(IMMEDIATE_REQUEUE)));
    }
    Ok(None)
}

/// Sample one control-plane machine from the remote cluster. Actuators
/// derive the region, zone, and provider-spec skeleton from it.
async fn get_master_machine(remote: &Client) -> Result<Machine> {
    let machines: Api<Machine> = Api::all(remote.clone());
    let selector = format!("{MASTER_MACHINE_LABEL}={MASTER_MACHINE_ROLE}");
    let masters = machines
        .list(&ListParams::default().labels(&selector))
        .await?;
    masters
        .items
        .into_iter()
        .next()
        .ok_or(Error::NoMasterMachines)
}

async fn get_remote_machine_sets(remote: &Client) -> Result<Vec<MachineSet>> {
    let api: Api<MachineSet> = Api::all(remote.clone());
    let sets = api.list(&ListParams::default()).await?;
    info!(count = sets.items.len(), "found remote machine sets");
    Ok(sets.items)
}

/// Check if the finalizer is present
fn has_finalizer(pool: &MachinePool) -> bool {
    pool.metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.contains(&FINALIZER.to_string()))
}

/// Add the deletion guard once the installed cluster deployment has been
/// observed.
async fn add_finalizer(pool: &MachinePool, ctx: &Context) -> Result<()> {
    let ns = pool.namespace().unwrap_or_default();
    let api: Api<MachinePool> = Api::namespaced(ctx.client.clone(), &ns);

    let mut finalizers = pool.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers,
        }
    });
    api.patch(
        &pool.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    info!("added finalizer to machine pool");
    Ok(())
}

/// Remove the deletion guard. Idempotent.
async fn remove_finalizer(pool: &MachinePool, ctx: &Context) -> Result<Action> {
    if !has_finalizer(pool) {
        return Ok(Action::await_change());
    }

    let ns = pool.namespace().unwrap_or_default();
    let api: Api<MachinePool> = Api::namespaced(ctx.client.clone(), &ns);

    let finalizers: Vec<String> = pool
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != FINALIZER)
        .collect();
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": if finalizers.is_empty() { serde_json::Value::Null } else { serde_json::json!(finalizers) },
        }
    });
    api.patch(
        &pool.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    info!("removed finalizer from machine pool");
    Ok(Action::await_change())
}
