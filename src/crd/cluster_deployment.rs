use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::crd::machine_pool::LocalObjectReference;

/// Annotation pausing all reconciliation of a cluster and its pools.
pub const RECONCILE_PAUSE_ANNOTATION: &str = "hive.openshift.io/reconcile-pause";

/// Annotation present while a cluster is being relocated to another
/// controller instance. Pools are left untouched for its duration.
pub const RELOCATING_ANNOTATION: &str = "hive.openshift.io/relocating";

/// Annotation marking a cluster as fake (no real remote API). Used by scale
/// testing; the controller skips machine management entirely.
pub const FAKE_CLUSTER_ANNOTATION: &str = "hive.openshift.io/fake-cluster";

/// Label carrying the cluster's major.minor.patch version.
pub const VERSION_MAJOR_MINOR_PATCH_LABEL: &str =
    "hive.openshift.io/version-major-minor-patch";

/// ClusterDeployment is the record of an installed tenant cluster. This
/// controller only ever reads it.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "hive.openshift.io",
    version = "v1",
    kind = "ClusterDeployment",
    plural = "clusterdeployments",
    shortname = "cd",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDeploymentSpec {
    /// Name of the installed cluster, used as the prefix of every object
    /// generated for its pools
    pub cluster_name: String,

    /// Whether installation has completed. Pools are not reconciled before
    /// this flips true.
    #[serde(default)]
    pub installed: bool,

    /// Identifiers and credentials of the installed cluster. Present once
    /// installed is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_metadata: Option<ClusterMetadata>,

    /// Platform the cluster runs on
    pub platform: Platform,

    /// Central machine management configuration. When set, machine sets are
    /// materialized on the local cluster instead of the remote one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_management: Option<MachineManagement>,
}

/// Identifiers of an installed cluster
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    /// Infrastructure identifier embedded in cloud resource names
    pub infra_id: String,
    /// Secret holding the admin kubeconfig for the remote API
    pub admin_kubeconfig_secret_ref: LocalObjectReference,
}

/// Platform discriminator for the cluster. Exactly one member is set.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Platform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp: Option<GcpPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzurePlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openstack: Option<OpenStackPlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vsphere: Option<VSpherePlatform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ovirt: Option<OvirtPlatform>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsPlatform {
    pub region: String,
    pub credentials_secret_ref: LocalObjectReference,
    /// ARN of a role to assume instead of using static credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_assume_role: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpPlatform {
    pub region: String,
    pub credentials_secret_ref: LocalObjectReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzurePlatform {
    pub region: String,
    pub credentials_secret_ref: LocalObjectReference,
    /// Azure cloud environment name (e.g., "AzurePublicCloud")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackPlatform {
    pub credentials_secret_ref: LocalObjectReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSpherePlatform {
    pub credentials_secret_ref: LocalObjectReference,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OvirtPlatform {
    pub credentials_secret_ref: LocalObjectReference,
}

/// Central machine management configuration
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineManagement {
    /// Marker enabling the central variant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub central: Option<CentralMachineManagement>,
    /// Namespace on the local cluster receiving machine sets and templates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_namespace: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CentralMachineManagement {}

impl ClusterDeployment {
    fn has_annotation(&self, key: &str) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .is_some_and(|v| v == "true")
    }

    /// Whether reconciliation of this cluster's pools is suspended, either
    /// explicitly or because the cluster is mid-relocation.
    pub fn is_paused_or_relocating(&self) -> bool {
        self.has_annotation(RECONCILE_PAUSE_ANNOTATION)
            || self
                .metadata
                .annotations
                .as_ref()
                .is_some_and(|a| a.contains_key(RELOCATING_ANNOTATION))
    }

    /// Whether this is a fake cluster with no remote API behind it.
    pub fn is_fake(&self) -> bool {
        self.has_annotation(FAKE_CLUSTER_ANNOTATION)
    }

    /// The cluster's major.minor.patch version label, when present.
    pub fn version_label(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(VERSION_MAJOR_MINOR_PATCH_LABEL))
            .map(String::as_str)
    }

    /// Whether central machine management is requested for this cluster.
    pub fn is_centrally_managed(&self) -> bool {
        self.spec
            .machine_management
            .as_ref()
            .is_some_and(|mm| mm.central.is_some())
    }
}
