use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label applied to every remote object created for a MachinePool. Also one
/// half of the ownership test (the other being the name prefix).
pub const MACHINE_POOL_NAME_LABEL: &str = "hive.openshift.io/machine-pool";

/// Label marking remote objects as managed by this operator.
pub const MANAGED_LABEL: &str = "hive.openshift.io/managed";

/// MachinePool is the Schema for the machinepools API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "MachinePool",
    plural = "machinepools",
    shortname = "mp",
    namespaced,
    status = "MachinePoolStatus",
    printcolumn = r#"{"name":"PoolName", "type":"string", "jsonPath":".spec.name"}"#,
    printcolumn = r#"{"name":"Cluster", "type":"string", "jsonPath":".spec.clusterDeploymentRef.name"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolSpec {
    /// Reference to the ClusterDeployment this pool belongs to
    pub cluster_deployment_ref: LocalObjectReference,

    /// Name of the machine pool within the cluster (e.g., "worker")
    pub name: String,

    /// Desired number of machine replicas. Mutually exclusive with
    /// autoscaling; exactly one of the two must be set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Autoscaling bounds for the pool. When set, replicas must not be.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<MachinePoolAutoscaling>,

    /// Labels applied to every machine created from this pool
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Taints applied to every machine created from this pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// Platform-specific machine shape for this pool
    pub platform: MachinePoolPlatform,
}

/// Autoscaling bounds split across the pool's zones
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolAutoscaling {
    /// Lower bound for the total machine count across all zones
    pub min_replicas: i32,
    /// Upper bound for the total machine count across all zones
    pub max_replicas: i32,
}

/// Reference to an object in the same namespace
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalObjectReference {
    pub name: String,
}

/// Node taint propagated onto machines
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: String,
}

/// Per-platform machine shape. Exactly one member is set, matching the
/// platform of the referenced ClusterDeployment.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolPlatform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsMachinePool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpMachinePool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureMachinePool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openstack: Option<OpenStackMachinePool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsphere: Option<VSphereMachinePool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovirt: Option<OvirtMachinePool>,
}

/// AWS machine shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsMachinePool {
    /// Availability zones to spread machines across. Defaults to the zone of
    /// the sampled master machine when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    /// EC2 instance type (e.g., "m5.large")
    pub instance_type: String,

    /// Explicit subnet IDs, one per zone. When empty, machines use the
    /// subnets of the master machine's network.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<String>,
}

/// GCP machine shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpMachinePool {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    /// GCE machine type (e.g., "n1-standard-4")
    pub instance_type: String,
}

/// Azure machine shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureMachinePool {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,

    /// Azure VM size (e.g., "Standard_D4s_v3")
    pub instance_type: String,
}

/// OpenStack machine shape. OpenStack machine pools are single-zone.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachinePool {
    /// Nova flavor for the machines
    pub flavor: String,
}

/// vSphere machine shape
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachinePool {
    /// Failure domains to spread machines across. Single-zone when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub zones: Vec<String>,
    pub num_cpus: i32,
    pub memory_mi_b: i64,
    pub os_disk_gi_b: i32,
}

/// oVirt machine shape. oVirt machine pools are single-zone.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OvirtMachinePool {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<OvirtCpu>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i32>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OvirtCpu {
    pub cores: i32,
    pub sockets: i32,
}

/// Observed state of a MachinePool
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolStatus {
    /// Total replicas across all machine sets generated from this pool
    #[serde(default)]
    pub replicas: i32,

    /// Per-zone machine set status
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub machine_sets: Vec<MachineSetSummary>,

    /// Conditions describing the pool's reconciliation state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MachinePoolCondition>,
}

/// Status of a single machine set generated from the pool
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSummary {
    pub name: String,
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    pub min_replicas: i32,
    pub max_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Condition types controlled by the machine pool controller
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Hash)]
pub enum MachinePoolConditionType {
    NotEnoughReplicas,
    NoMachinePoolNameLeasesAvailable,
    InvalidSubnets,
    UnsupportedConfiguration,
}

/// Tagged condition record on MachinePool status
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolCondition {
    #[serde(rename = "type")]
    pub type_: MachinePoolConditionType,
    /// "True", "False", or "Unknown"
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<String>,
}

impl MachinePool {
    /// Whether the pool has autoscaling bounds instead of a fixed replica
    /// count.
    pub fn is_autoscaling(&self) -> bool {
        self.spec.autoscaling.is_some()
    }

    /// Find a condition of the given type on the pool's status.
    pub fn find_condition(&self, type_: MachinePoolConditionType) -> Option<&MachinePoolCondition> {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
            .iter()
            .find(|c| c.type_ == type_)
    }
}
