use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label tying a lease to the ClusterDeployment whose name space it divides.
pub const LEASE_CLUSTER_DEPLOYMENT_LABEL: &str = "hive.openshift.io/cluster-deployment-name";

/// MachinePoolNameLease grants a pool one slot of the constrained machine
/// set name space on platforms with short name limits (currently GCP). The
/// lease name is the leased slot; the holding pool is recorded in labels and
/// an owner reference. The spec and status are intentionally empty.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "MachinePoolNameLease",
    plural = "machinepoolnameleases",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MachinePoolNameLeaseSpec {}
