//! Condition management and status aggregation for MachinePool resources

use chrono::Utc;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tracing::{debug, error};

use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Result;
use crate::crd::{
    Machine, MachinePool, MachinePoolCondition, MachinePoolConditionType, MachinePoolStatus,
    MachineSet, MachineSetSummary,
};

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition types this controller owns on MachinePool status
pub const CONTROLLER_CONDITIONS: [MachinePoolConditionType; 4] = [
    MachinePoolConditionType::NotEnoughReplicas,
    MachinePoolConditionType::NoMachinePoolNameLeasesAvailable,
    MachinePoolConditionType::InvalidSubnets,
    MachinePoolConditionType::UnsupportedConfiguration,
];

/// Error-class condition types. A transition on one of these is what lets a
/// pool update event through the ingress filter.
pub const ERROR_CONDITIONS: [MachinePoolConditionType; 2] = [
    MachinePoolConditionType::InvalidSubnets,
    MachinePoolConditionType::UnsupportedConfiguration,
];

/// When an existing condition is refreshed even though its status did not
/// change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdatePolicy {
    /// Only a status flip counts as a change
    Never,
    /// A new reason or message also counts as a change
    IfReasonOrMessageChange,
}

/// Add Unknown placeholders for any controller-owned condition missing from
/// the list. Returns the possibly-extended list; the caller persists it when
/// it grew.
pub fn initialize_conditions(
    mut conditions: Vec<MachinePoolCondition>,
) -> Vec<MachinePoolCondition> {
    let now = Utc::now().to_rfc3339();
    for type_ in CONTROLLER_CONDITIONS {
        if !conditions.iter().any(|c| c.type_ == type_) {
            conditions.push(MachinePoolCondition {
                type_,
                status: condition_status::UNKNOWN.to_string(),
                reason: String::new(),
                message: String::new(),
                last_transition_time: now.clone(),
                last_probe_time: Some(now.clone()),
            });
        }
    }
    conditions
}

/// Set a condition, honoring the update policy. Returns the new list and
/// whether anything changed (and therefore needs persisting).
pub fn set_condition_with_change_check(
    mut conditions: Vec<MachinePoolCondition>,
    type_: MachinePoolConditionType,
    status: &str,
    reason: &str,
    message: &str,
    policy: UpdatePolicy,
) -> (Vec<MachinePoolCondition>, bool) {
    let now = Utc::now().to_rfc3339();

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            let status_changed = existing.status != status;
            let details_changed = existing.reason != reason || existing.message != message;
            let should_update = status_changed
                || (policy == UpdatePolicy::IfReasonOrMessageChange && details_changed);
            if !should_update {
                return (conditions, false);
            }
            if status_changed {
                existing.last_transition_time = now.clone();
            }
            existing.status = status.to_string();
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_probe_time = Some(now);
            (conditions, true)
        }
        None => {
            conditions.push(MachinePoolCondition {
                type_,
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now.clone(),
                last_probe_time: Some(now),
            });
            (conditions, true)
        }
    }
}

/// Persist the pool's condition list.
pub async fn patch_pool_conditions(
    client: &Client,
    pool: &MachinePool,
    conditions: &[MachinePoolCondition],
) -> Result<()> {
    let ns = pool.namespace().unwrap_or_default();
    let api: Api<MachinePool> = Api::namespaced(client.clone(), &ns);

    let patch = serde_json::json!({
        "status": {
            "conditions": conditions,
        }
    });
    api.patch_status(
        &pool.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/// Summarize machine-level failures of a machine set into one reason and
/// message. A single failed machine propagates its own reason and message;
/// several collapse into MultipleMachinesFailed with a concatenated message.
/// Returns None when every machine is healthy or the machines cannot be
/// listed.
pub async fn summarize_machines_error(
    remote: &Client,
    machine_set: &MachineSet,
) -> Option<(String, String)> {
    let selector = machine_set
        .spec
        .selector
        .match_labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",");
    if selector.is_empty() {
        return None;
    }

    let ns = machine_set.namespace().unwrap_or_default();
    let machines: Api<Machine> = Api::namespaced(remote.clone(), &ns);
    let list = match machines.list(&ListParams::default().labels(&selector)).await {
        Ok(list) => list,
        Err(e) => {
            error!(machineset = %machine_set.name_any(), error = %e, "failed to list machines for the machineset");
            return None;
        }
    };

    let failed: Vec<_> = list
        .items
        .iter()
        .filter_map(|m| {
            let status = m.status.as_ref()?;
            if status.error_reason.is_none() && status.error_message.is_none() {
                return None;
            }
            Some((
                m.name_any(),
                status.error_reason.clone().unwrap_or_default(),
                status.error_message.clone().unwrap_or_default(),
            ))
        })
        .collect();

    match failed.as_slice() {
        [] => None,
        [(_, reason, message)] => Some((reason.clone(), message.clone())),
        many => {
            let mut message = String::new();
            for (name, reason, msg) in many {
                message.push_str(&format!("Machine {name} failed ({reason}): {msg},\n"));
            }
            Some(("MultipleMachinesFailed".to_string(), message))
        }
    }
}

/// Build the aggregated pool status from the machine sets of this pass.
/// Returns the new status and whether any machine set is still converging
/// (which is what drives the ten-minute requeue).
pub async fn build_pool_status(
    pool: &MachinePool,
    machine_sets: &[MachineSet],
    remote: &Client,
) -> (MachinePoolStatus, bool) {
    let mut summaries = Vec::with_capacity(machine_sets.len());
    let mut total_replicas = 0;

    for (index, ms) in machine_sets.iter().enumerate() {
        let replicas = ms.spec.replicas.unwrap_or(0);
        let (min_replicas, max_replicas) = match &pool.spec.autoscaling {
            None => (replicas, replicas),
            Some(bounds) => crate::controller::replicas::get_min_max_replicas(
                bounds,
                machine_sets.len(),
                index,
            ),
        };

        let mut summary = MachineSetSummary {
            name: ms.name_any(),
            replicas,
            ready_replicas: ms.status.as_ref().map(|s| s.ready_replicas).unwrap_or(0),
            min_replicas,
            max_replicas,
            error_reason: ms.status.as_ref().and_then(|s| s.error_reason.clone()),
            error_message: ms.status.as_ref().and_then(|s| s.error_message.clone()),
        };

        // A lagging set without its own error gets one distilled from its
        // machines.
        if summary.replicas != summary.ready_replicas && summary.error_reason.is_none() {
            if let Some((reason, message)) = summarize_machines_error(remote, ms).await {
                summary.error_reason = Some(reason);
                summary.error_message = Some(message);
            }
        }

        total_replicas += replicas;
        summaries.push(summary);
    }

    let converging = summaries.iter().any(|s| s.replicas != s.ready_replicas);

    let status = MachinePoolStatus {
        replicas: total_replicas,
        machine_sets: summaries,
        conditions: pool
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default(),
    };

    (status, converging)
}

/// Write the aggregated status if it differs from what the pool already
/// carries.
pub async fn update_pool_status(
    client: &Client,
    pool: &MachinePool,
    status: &MachinePoolStatus,
) -> Result<()> {
    let unchanged = pool
        .status
        .as_ref()
        .is_some_and(|s| s.replicas == status.replicas && s.machine_sets == status.machine_sets);
    if unchanged {
        debug!(pool = %pool.name_any(), "pool status unchanged");
        return Ok(());
    }

    let ns = pool.namespace().unwrap_or_default();
    let api: Api<MachinePool> = Api::namespaced(client.clone(), &ns);
    let patch = serde_json::json!({
        "status": {
            "replicas": status.replicas,
            "machineSets": status.machine_sets,
        }
    });
    api.patch_status(
        &pool.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}
