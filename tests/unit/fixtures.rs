//! Shared fixtures for unit tests

use std::collections::BTreeMap;

use kube::core::ObjectMeta;

use machinepool_operator::crd::{
    AwsMachinePool, AwsPlatform, ClusterDeployment, ClusterDeploymentSpec, ClusterMetadata,
    GcpPlatform, LocalObjectReference, Machine, MachinePool, MachinePoolAutoscaling,
    MachinePoolPlatform, MachinePoolSpec, MachineSet, MachineSetSpec, MachineSpecFull,
    OpenStackPlatform, Platform, ProviderSpec, VSpherePlatform, MACHINE_POOL_NAME_LABEL,
    VERSION_MAJOR_MINOR_PATCH_LABEL,
};

pub const CLUSTER_NAME: &str = "testcluster";
pub const INFRA_ID: &str = "testcluster-x4z9k";
pub const POOL_NAME: &str = "worker";

pub fn aws_platform() -> Platform {
    Platform {
        aws: Some(AwsPlatform {
            region: "us-east-1".to_string(),
            credentials_secret_ref: LocalObjectReference {
                name: "aws-creds".to_string(),
            },
            credentials_assume_role: None,
        }),
        ..Default::default()
    }
}

pub fn gcp_platform() -> Platform {
    Platform {
        gcp: Some(GcpPlatform {
            region: "us-central1".to_string(),
            credentials_secret_ref: LocalObjectReference {
                name: "gcp-creds".to_string(),
            },
        }),
        ..Default::default()
    }
}

pub fn openstack_platform() -> Platform {
    Platform {
        openstack: Some(OpenStackPlatform {
            credentials_secret_ref: LocalObjectReference {
                name: "openstack-creds".to_string(),
            },
        }),
        ..Default::default()
    }
}

pub fn vsphere_platform() -> Platform {
    Platform {
        vsphere: Some(VSpherePlatform {
            credentials_secret_ref: LocalObjectReference {
                name: "vsphere-creds".to_string(),
            },
        }),
        ..Default::default()
    }
}

pub fn cluster_deployment(platform: Platform) -> ClusterDeployment {
    ClusterDeployment {
        metadata: ObjectMeta {
            name: Some(CLUSTER_NAME.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: ClusterDeploymentSpec {
            cluster_name: CLUSTER_NAME.to_string(),
            installed: true,
            cluster_metadata: Some(ClusterMetadata {
                infra_id: INFRA_ID.to_string(),
                admin_kubeconfig_secret_ref: LocalObjectReference {
                    name: "admin-kubeconfig".to_string(),
                },
            }),
            platform,
            machine_management: None,
        },
    }
}

pub fn cluster_deployment_with_version(platform: Platform, version: &str) -> ClusterDeployment {
    let mut cd = cluster_deployment(platform);
    cd.metadata.labels = Some(BTreeMap::from([(
        VERSION_MAJOR_MINOR_PATCH_LABEL.to_string(),
        version.to_string(),
    )]));
    cd
}

pub fn machine_pool(replicas: Option<i32>, autoscaling: Option<(i32, i32)>) -> MachinePool {
    MachinePool {
        metadata: ObjectMeta {
            name: Some(format!("{CLUSTER_NAME}-{POOL_NAME}")),
            namespace: Some("default".to_string()),
            uid: Some("pool-uid-1234".to_string()),
            ..Default::default()
        },
        spec: MachinePoolSpec {
            cluster_deployment_ref: LocalObjectReference {
                name: CLUSTER_NAME.to_string(),
            },
            name: POOL_NAME.to_string(),
            replicas,
            autoscaling: autoscaling.map(|(min, max)| MachinePoolAutoscaling {
                min_replicas: min,
                max_replicas: max,
            }),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            platform: MachinePoolPlatform {
                aws: Some(AwsMachinePool {
                    zones: vec![
                        "us-east-1a".to_string(),
                        "us-east-1b".to_string(),
                        "us-east-1c".to_string(),
                    ],
                    instance_type: "m5.large".to_string(),
                    subnets: Vec::new(),
                }),
                ..Default::default()
            },
        },
        status: None,
    }
}

pub fn deleting(mut pool: MachinePool) -> MachinePool {
    pool.metadata.deletion_timestamp =
        Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
            chrono::Utc::now(),
        ));
    pool
}

/// An owned machine set, as the engine would have created it
pub fn owned_machine_set(name: &str, replicas: i32) -> MachineSet {
    MachineSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("openshift-machine-api".to_string()),
            labels: Some(BTreeMap::from([(
                MACHINE_POOL_NAME_LABEL.to_string(),
                POOL_NAME.to_string(),
            )])),
            generation: Some(1),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        },
        status: None,
    }
}

/// A machine set belonging to somebody else entirely
pub fn foreign_machine_set(name: &str, replicas: i32) -> MachineSet {
    MachineSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("openshift-machine-api".to_string()),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas: Some(replicas),
            ..Default::default()
        },
        status: None,
    }
}

/// A control-plane machine whose provider spec seeds the actuators
pub fn master_machine(provider_spec: serde_json::Value) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(format!("{INFRA_ID}-master-0")),
            namespace: Some("openshift-machine-api".to_string()),
            ..Default::default()
        },
        spec: MachineSpecFull {
            provider_spec: Some(ProviderSpec {
                value: Some(provider_spec),
            }),
            ..Default::default()
        },
        status: None,
    }
}
