//! Typed representations of the machine-provisioning objects this controller
//! manages on the target cluster's API.
//!
//! MachineSet, MachineAutoscaler, and the singleton ClusterAutoscaler are
//! owned by the controller. Machine is read-only and only consulted to
//! summarize failures. AWSMachineTemplate is the companion object of the
//! central machine management variant, where the same MachineSet type is
//! applied on the local cluster instead of the remote one.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::machine_pool::Taint;

/// Label selecting control-plane machines on the remote cluster
pub const MASTER_MACHINE_LABEL: &str = "machine.openshift.io/cluster-api-machine-type";
pub const MASTER_MACHINE_ROLE: &str = "master";

/// MachineSet is a per-zone group of identical machines
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "MachineSet",
    plural = "machinesets",
    namespaced,
    status = "MachineSetStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Desired machine count. None lets the autoscaler own the count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Selector matching the machines of this set
    #[serde(default)]
    pub selector: LabelSelector,

    /// Template stamped onto every machine of the set
    #[serde(default)]
    pub template: MachineTemplateSpec,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineTemplateSpec {
    #[serde(default)]
    pub metadata: MachineObjectMeta,
    #[serde(default)]
    pub spec: MachineSpec,
}

/// Reduced object meta carried inside machine templates
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineObjectMeta {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Labels applied to the node object of each machine
    #[serde(default)]
    pub metadata: MachineObjectMeta,

    /// Taints applied to the node object of each machine
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,

    /// Opaque platform-specific machine shape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_spec: Option<ProviderSpec>,
}

/// Platform-specific machine configuration, carried opaquely
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetStatus {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Machine is a single provisioned instance. Read-only to this controller.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpecFull {
    #[serde(default)]
    pub metadata: MachineObjectMeta,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub taints: Vec<Taint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_spec: Option<ProviderSpec>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

/// MachineAutoscaler binds autoscaling bounds onto a single MachineSet
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "autoscaling.openshift.io",
    version = "v1beta1",
    kind = "MachineAutoscaler",
    plural = "machineautoscalers",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachineAutoscalerSpec {
    pub min_replicas: i32,
    pub max_replicas: i32,
    pub scale_target_ref: CrossVersionObjectReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// ClusterAutoscaler is the cluster-scoped singleton (name = "default")
/// configuring the autoscaler deployment on the target cluster
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "autoscaling.openshift.io",
    version = "v1",
    kind = "ClusterAutoscaler",
    plural = "clusterautoscalers"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAutoscalerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down: Option<ScaleDownConfig>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleDownConfig {
    pub enabled: bool,
}

/// AWSMachineTemplate is the infrastructure template referenced by machine
/// sets under central machine management
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha4",
    kind = "AWSMachineTemplate",
    plural = "awsmachinetemplates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AWSMachineTemplateSpec {
    pub template: AWSMachineTemplateResource,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AWSMachineTemplateResource {
    /// Opaque machine shape stamped onto machines created from the template
    #[serde(default)]
    pub spec: serde_json::Value,
}
