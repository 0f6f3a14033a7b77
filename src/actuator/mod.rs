//! Platform actuators: the per-platform desired-state generators
//!
//! An actuator turns a (ClusterDeployment, MachinePool) pair into the
//! per-zone machine sets the pool should materialize, starting from the
//! provider-spec skeleton of a sampled control-plane machine. One actuator
//! exists per platform; `PlatformActuatorFactory` dispatches on the
//! cluster's platform field. Tests swap the whole family out by injecting
//! their own factory into the controller context.

mod aws;
mod azure;
mod gcp;
mod openstack;
mod ovirt;
mod vsphere;

pub use aws::AwsActuator;
pub use azure::AzureActuator;
pub use gcp::GcpActuator;
pub use openstack::OpenStackActuator;
pub use ovirt::OvirtActuator;
pub use vsphere::VSphereActuator;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ObjectMeta};
use kube::ResourceExt;
use serde_json::Value;

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::crd::{
    AWSMachineTemplate, ClusterDeployment, LabelSelector, Machine, MachinePool, MachineSet,
    MachineSetSpec, MachineSpec, MachineTemplateSpec, MachineObjectMeta, ProviderSpec,
};

/// Namespace holding machine API objects on the target cluster
pub const MACHINE_API_NAMESPACE: &str = "openshift-machine-api";

/// Cluster identity label stamped on machine sets and their machines
pub const CLUSTER_MEMBERSHIP_LABEL: &str = "machine.openshift.io/cluster-api-cluster";

/// Label tying a machine to its machine set
pub const MACHINE_SET_MEMBERSHIP_LABEL: &str = "machine.openshift.io/cluster-api-machineset";

/// Environment variable naming the assume-role credentials secret for the
/// AWS service-provider mode
pub const AWS_SERVICE_PROVIDER_SECRET_ENV: &str =
    "HIVE_AWS_SERVICE_PROVIDER_CREDENTIALS_SECRET_REF";

/// Platform-variant desired-state generator
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Synthesize the desired per-zone machine sets for the pool. The bool
    /// is the proceed flag: false means observable state is not sufficient
    /// yet and the reconcile should stop benignly (a watch or requeue will
    /// re-drive it).
    async fn generate_machine_sets(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<(Vec<MachineSet>, bool)>;

    /// Synthesize the companion infrastructure templates for central
    /// machine management. Only the AWS actuator supports this.
    async fn generate_machine_templates(
        &self,
        _cd: &ClusterDeployment,
        _pool: &MachinePool,
    ) -> Result<Vec<AWSMachineTemplate>> {
        Err(Error::ActuatorError(
            "machine templates are not supported for this platform".to_string(),
        ))
    }
}

/// Builds the actuator for a cluster's platform. The controller context
/// holds one of these; tests substitute a fake.
#[async_trait]
pub trait ActuatorFactory: Send + Sync {
    async fn create(
        &self,
        ctx: &Context,
        cd: &ClusterDeployment,
        pool: &MachinePool,
        master_machine: &Machine,
        remote_machine_sets: &[MachineSet],
    ) -> Result<Box<dyn Actuator>>;
}

/// The production factory
pub fn default_actuator_factory() -> Arc<dyn ActuatorFactory> {
    Arc::new(PlatformActuatorFactory)
}

/// Dispatches on the ClusterDeployment's platform field and resolves the
/// construction inputs each platform needs (credentials secrets, version
/// label, the master machine sample).
pub struct PlatformActuatorFactory;

#[async_trait]
impl ActuatorFactory for PlatformActuatorFactory {
    async fn create(
        &self,
        ctx: &Context,
        cd: &ClusterDeployment,
        _pool: &MachinePool,
        master_machine: &Machine,
        remote_machine_sets: &[MachineSet],
    ) -> Result<Box<dyn Actuator>> {
        let namespace = cd.namespace().unwrap_or_default();
        let platform = &cd.spec.platform;

        if let Some(aws) = &platform.aws {
            let assume_role_secret = std::env::var(AWS_SERVICE_PROVIDER_SECRET_ENV).ok();
            return Ok(Box::new(AwsActuator::new(
                ctx.client.clone(),
                aws.region.clone(),
                aws.credentials_secret_ref.name.clone(),
                assume_role_secret,
                master_machine.clone(),
            )));
        }

        if let Some(gcp) = &platform.gcp {
            // Credentials must resolve even though the zone queries that
            // consume them live behind the cloud SDK seam
            let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
            secrets.get(&gcp.credentials_secret_ref.name).await?;
            let cluster_version = cd
                .version_label()
                .ok_or(Error::MissingClusterVersion)?
                .to_string();
            return Ok(Box::new(GcpActuator::new(
                ctx.client.clone(),
                ctx.expectations.clone(),
                cluster_version,
                master_machine.clone(),
                remote_machine_sets.to_vec(),
            )));
        }

        if let Some(azure) = &platform.azure {
            let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
            secrets.get(&azure.credentials_secret_ref.name).await?;
            return Ok(Box::new(AzureActuator::new(
                azure.cloud_name.clone(),
                master_machine.clone(),
            )));
        }

        if platform.openstack.is_some() {
            return Ok(Box::new(OpenStackActuator::new(master_machine.clone())));
        }

        if platform.vsphere.is_some() {
            return Ok(Box::new(VSphereActuator::new(master_machine.clone())));
        }

        if platform.ovirt.is_some() {
            return Ok(Box::new(OvirtActuator::new(master_machine.clone())));
        }

        Err(Error::UnsupportedPlatform(
            "cluster deployment has no recognized platform".to_string(),
        ))
    }
}

/// The provider-spec skeleton every generated machine inherits, sampled
/// from a control-plane machine.
pub(crate) fn master_provider_spec(master_machine: &Machine) -> Result<Value> {
    master_machine
        .spec
        .provider_spec
        .as_ref()
        .and_then(|ps| ps.value.clone())
        .ok_or_else(|| {
            Error::ActuatorError("master machine has no provider spec".to_string())
        })
}

/// Read a string field out of a provider spec by JSON pointer.
pub(crate) fn provider_spec_string(spec: &Value, pointer: &str) -> Option<String> {
    spec.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Set a field in a provider spec by JSON pointer, creating intermediate
/// objects as needed.
pub(crate) fn set_provider_spec_field(spec: &mut Value, pointer: &str, value: Value) {
    let mut current = spec;
    let segments: Vec<&str> = pointer.trim_start_matches('/').split('/').collect();
    for (i, segment) in segments.iter().enumerate() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if i == segments.len() - 1 {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
    }
}

/// Assemble a machine set shell around a zone-specific provider spec. The
/// orchestrator stamps pool identity labels, machine labels, and taints on
/// afterwards.
pub(crate) fn build_machine_set(
    infra_id: &str,
    name: &str,
    replicas: Option<i32>,
    provider_spec: Value,
) -> MachineSet {
    let membership = BTreeMap::from([
        (CLUSTER_MEMBERSHIP_LABEL.to_string(), infra_id.to_string()),
        (MACHINE_SET_MEMBERSHIP_LABEL.to_string(), name.to_string()),
    ]);

    MachineSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(MACHINE_API_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                CLUSTER_MEMBERSHIP_LABEL.to_string(),
                infra_id.to_string(),
            )])),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas,
            selector: LabelSelector {
                match_labels: membership.clone(),
            },
            template: MachineTemplateSpec {
                metadata: MachineObjectMeta {
                    labels: membership,
                },
                spec: MachineSpec {
                    metadata: MachineObjectMeta::default(),
                    taints: Vec::new(),
                    provider_spec: Some(ProviderSpec {
                        value: Some(provider_spec),
                    }),
                },
            },
        },
        status: None,
    }
}

/// Fixed replica count for the machine set at `index` when the pool is not
/// autoscaling; autoscaling pools leave the count to the orchestrator.
pub(crate) fn fixed_replicas(pool: &MachinePool, num_zones: usize, index: usize) -> Option<i32> {
    pool.spec
        .replicas
        .map(|total| crate::controller::replicas::apportion_replicas(total, num_zones, index))
}

/// The infrastructure identifier machine set names are built from.
pub(crate) fn infra_id(cd: &ClusterDeployment) -> Result<String> {
    cd.spec
        .cluster_metadata
        .as_ref()
        .map(|m| m.infra_id.clone())
        .ok_or_else(|| Error::ActuatorError("cluster has no infrastructure id".to_string()))
}
