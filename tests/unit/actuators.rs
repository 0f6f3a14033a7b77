//! Unit tests for actuator machine set generation
//!
//! Only the platforms whose actuators need no API client are exercised
//! directly; the AWS and GCP actuators share the same generation helpers
//! and are covered through the sync planner tests.

use machinepool_operator::actuator::{
    Actuator, AzureActuator, OpenStackActuator, OvirtActuator, VSphereActuator,
};
use machinepool_operator::crd::{
    AzureMachinePool, AzurePlatform, LocalObjectReference, MachinePoolPlatform,
    OpenStackMachinePool, OvirtCpu, OvirtMachinePool, OvirtPlatform, Platform,
    VSphereMachinePool,
};
use kube::ResourceExt;
use serde_json::json;

use crate::fixtures::{self, master_machine, INFRA_ID};

fn provider_spec_of(
    ms: &machinepool_operator::crd::MachineSet,
) -> serde_json::Value {
    ms.spec
        .template
        .spec
        .provider_spec
        .as_ref()
        .and_then(|ps| ps.value.clone())
        .expect("generated machine set has a provider spec")
}

#[tokio::test]
async fn test_vsphere_generates_one_set_per_failure_domain() {
    let actuator = VSphereActuator::new(master_machine(json!({
        "numCPUs": 8,
        "memoryMiB": 32768,
        "diskGiB": 120
    })));
    let cd = fixtures::cluster_deployment(fixtures::vsphere_platform());
    let mut pool = fixtures::machine_pool(None, Some((2, 5)));
    pool.spec.platform = MachinePoolPlatform {
        vsphere: Some(VSphereMachinePool {
            zones: vec!["fd-a".to_string(), "fd-b".to_string(), "fd-c".to_string()],
            num_cpus: 4,
            memory_mi_b: 16384,
            os_disk_gi_b: 120,
        }),
        ..Default::default()
    };

    let (sets, proceed) = actuator.generate_machine_sets(&cd, &pool).await.unwrap();

    assert!(proceed);
    assert_eq!(sets.len(), 3);
    assert_eq!(sets[0].name_any(), format!("{INFRA_ID}-worker-fd-a"));
    let spec = provider_spec_of(&sets[0]);
    assert_eq!(spec["numCPUs"], 4);
    assert_eq!(spec["memoryMiB"], 16384);
    assert_eq!(spec["failureDomain"], "fd-a");
}

#[tokio::test]
async fn test_vsphere_without_zones_is_single_set() {
    let actuator = VSphereActuator::new(master_machine(json!({"numCPUs": 8})));
    let cd = fixtures::cluster_deployment(fixtures::vsphere_platform());
    let mut pool = fixtures::machine_pool(Some(4), None);
    pool.spec.platform = MachinePoolPlatform {
        vsphere: Some(VSphereMachinePool {
            zones: Vec::new(),
            num_cpus: 4,
            memory_mi_b: 16384,
            os_disk_gi_b: 120,
        }),
        ..Default::default()
    };

    let (sets, _) = actuator.generate_machine_sets(&cd, &pool).await.unwrap();

    assert_eq!(sets.len(), 1);
    // A single set takes the whole fixed replica count
    assert_eq!(sets[0].spec.replicas, Some(4));
}

#[tokio::test]
async fn test_openstack_sets_flavor_from_pool() {
    let actuator = OpenStackActuator::new(master_machine(json!({
        "flavor": "m1.xlarge",
        "image": "rhcos"
    })));
    let cd = fixtures::cluster_deployment(fixtures::openstack_platform());
    let mut pool = fixtures::machine_pool(Some(3), None);
    pool.spec.platform = MachinePoolPlatform {
        openstack: Some(OpenStackMachinePool {
            flavor: "m1.large".to_string(),
        }),
        ..Default::default()
    };

    let (sets, proceed) = actuator.generate_machine_sets(&cd, &pool).await.unwrap();

    assert!(proceed);
    assert_eq!(sets.len(), 1);
    let spec = provider_spec_of(&sets[0]);
    assert_eq!(spec["flavor"], "m1.large");
    // Untouched skeleton fields carry over from the master machine
    assert_eq!(spec["image"], "rhcos");
}

#[tokio::test]
async fn test_ovirt_shapes_cpu_and_memory() {
    let actuator = OvirtActuator::new(master_machine(json!({})));
    let mut cd = fixtures::cluster_deployment(fixtures::openstack_platform());
    cd.spec.platform = Platform {
        ovirt: Some(OvirtPlatform {
            credentials_secret_ref: LocalObjectReference {
                name: "ovirt-creds".to_string(),
            },
        }),
        ..Default::default()
    };
    let mut pool = fixtures::machine_pool(Some(2), None);
    pool.spec.platform = MachinePoolPlatform {
        ovirt: Some(OvirtMachinePool {
            cpu: Some(OvirtCpu {
                cores: 4,
                sockets: 1,
            }),
            memory_mb: Some(16384),
        }),
        ..Default::default()
    };

    let (sets, _) = actuator.generate_machine_sets(&cd, &pool).await.unwrap();

    assert_eq!(sets.len(), 1);
    let spec = provider_spec_of(&sets[0]);
    assert_eq!(spec["cpu"]["cores"], 4);
    assert_eq!(spec["cpu"]["sockets"], 1);
    assert_eq!(spec["memoryMB"], 16384);
}

#[tokio::test]
async fn test_azure_spreads_zones_and_sets_vm_size() {
    let actuator = AzureActuator::new(None, master_machine(json!({
        "vmSize": "Standard_D8s_v3",
        "zone": "1"
    })));
    let mut cd = fixtures::cluster_deployment(fixtures::aws_platform());
    cd.spec.platform = Platform {
        azure: Some(AzurePlatform {
            region: "eastus".to_string(),
            credentials_secret_ref: LocalObjectReference {
                name: "azure-creds".to_string(),
            },
            cloud_name: None,
        }),
        ..Default::default()
    };
    let mut pool = fixtures::machine_pool(Some(5), None);
    pool.spec.platform = MachinePoolPlatform {
        azure: Some(AzureMachinePool {
            zones: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            instance_type: "Standard_D4s_v3".to_string(),
        }),
        ..Default::default()
    };

    let (sets, _) = actuator.generate_machine_sets(&cd, &pool).await.unwrap();

    assert_eq!(sets.len(), 3);
    let replicas: Vec<Option<i32>> = sets.iter().map(|ms| ms.spec.replicas).collect();
    assert_eq!(replicas, vec![Some(2), Some(2), Some(1)]);
    for (ms, zone) in sets.iter().zip(["1", "2", "3"]) {
        let spec = provider_spec_of(ms);
        assert_eq!(spec["vmSize"], "Standard_D4s_v3");
        assert_eq!(spec["zone"], zone);
    }
}

#[tokio::test]
async fn test_azure_falls_back_to_master_zone() {
    let actuator = AzureActuator::new(None, master_machine(json!({ "zone": "2" })));
    let mut cd = fixtures::cluster_deployment(fixtures::aws_platform());
    cd.spec.platform = Platform {
        azure: Some(AzurePlatform {
            region: "eastus".to_string(),
            credentials_secret_ref: LocalObjectReference {
                name: "azure-creds".to_string(),
            },
            cloud_name: None,
        }),
        ..Default::default()
    };
    let mut pool = fixtures::machine_pool(Some(2), None);
    pool.spec.platform = MachinePoolPlatform {
        azure: Some(AzureMachinePool {
            zones: Vec::new(),
            instance_type: "Standard_D4s_v3".to_string(),
        }),
        ..Default::default()
    };

    let (sets, _) = actuator.generate_machine_sets(&cd, &pool).await.unwrap();

    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].name_any(), format!("{INFRA_ID}-worker-2"));
}
