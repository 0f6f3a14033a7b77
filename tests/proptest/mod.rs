//! Property-based tests for replica apportionment and sync planning
//!
//! These tests use proptest to generate random pool shapes and verify that:
//! 1. Apportionment always preserves totals and spreads evenly
//! 2. Sync planning always produces disjoint write sets
//! 3. Foreign objects never end up in any write set
//! 4. Clamped replica counts always land inside the per-zone bounds

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use kube::core::ObjectMeta;
use kube::ResourceExt;
use proptest::prelude::*;

use machinepool_operator::controller::replicas::{apportion_replicas, get_min_max_replicas};
use machinepool_operator::controller::sync::plan_machine_set_sync;
use machinepool_operator::crd::{
    AwsMachinePool, AwsPlatform, ClusterDeployment, ClusterDeploymentSpec, ClusterMetadata,
    LocalObjectReference, MachinePool, MachinePoolAutoscaling, MachinePoolPlatform,
    MachinePoolSpec, MachineSet, MachineSetSpec, Platform, MACHINE_POOL_NAME_LABEL,
};

fn cluster_deployment() -> ClusterDeployment {
    ClusterDeployment {
        metadata: ObjectMeta {
            name: Some("propcluster".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: ClusterDeploymentSpec {
            cluster_name: "propcluster".to_string(),
            installed: true,
            cluster_metadata: Some(ClusterMetadata {
                infra_id: "propcluster-abc12".to_string(),
                admin_kubeconfig_secret_ref: LocalObjectReference {
                    name: "kubeconfig".to_string(),
                },
            }),
            platform: Platform {
                aws: Some(AwsPlatform {
                    region: "us-east-1".to_string(),
                    credentials_secret_ref: LocalObjectReference {
                        name: "creds".to_string(),
                    },
                    credentials_assume_role: None,
                }),
                ..Default::default()
            },
            machine_management: None,
        },
    }
}

fn pool(replicas: Option<i32>, autoscaling: Option<(i32, i32)>) -> MachinePool {
    MachinePool {
        metadata: ObjectMeta {
            name: Some("propcluster-worker".to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: MachinePoolSpec {
            cluster_deployment_ref: LocalObjectReference {
                name: "propcluster".to_string(),
            },
            name: "worker".to_string(),
            replicas,
            autoscaling: autoscaling.map(|(min, max)| MachinePoolAutoscaling {
                min_replicas: min,
                max_replicas: max,
            }),
            labels: BTreeMap::new(),
            taints: Vec::new(),
            platform: MachinePoolPlatform {
                aws: Some(AwsMachinePool {
                    zones: Vec::new(),
                    instance_type: "m5.large".to_string(),
                    subnets: Vec::new(),
                }),
                ..Default::default()
            },
        },
        status: None,
    }
}

fn machine_set(name: &str, replicas: Option<i32>, owned: bool) -> MachineSet {
    MachineSet {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("openshift-machine-api".to_string()),
            labels: owned.then(|| {
                BTreeMap::from([(
                    MACHINE_POOL_NAME_LABEL.to_string(),
                    "worker".to_string(),
                )])
            }),
            ..Default::default()
        },
        spec: MachineSetSpec {
            replicas,
            ..Default::default()
        },
        status: None,
    }
}

proptest! {
    #[test]
    fn prop_apportionment_preserves_the_total(total in 0..200i32, zones in 1..12usize) {
        let sum: i32 = (0..zones).map(|i| apportion_replicas(total, zones, i)).sum();
        prop_assert_eq!(sum, total);
    }

    #[test]
    fn prop_apportionment_spreads_evenly(total in 0..200i32, zones in 1..12usize) {
        let shares: Vec<i32> = (0..zones).map(|i| apportion_replicas(total, zones, i)).collect();
        let largest = *shares.iter().max().unwrap();
        let smallest = *shares.iter().min().unwrap();
        prop_assert!(largest - smallest <= 1);

        // The leading (total % zones) indices take the larger share
        let remainder = (total % zones as i32) as usize;
        for (i, share) in shares.iter().enumerate() {
            if i < remainder {
                prop_assert_eq!(*share, largest);
            }
        }
    }

    #[test]
    fn prop_min_never_exceeds_max(min in 0..100i32, max in 0..100i32, zones in 1..12usize) {
        let bounds = MachinePoolAutoscaling { min_replicas: min, max_replicas: max };
        for i in 0..zones {
            let (lo, hi) = get_min_max_replicas(&bounds, zones, i);
            prop_assert!(lo <= hi);
        }
    }

    #[test]
    fn prop_write_sets_are_disjoint(
        desired_zones in 1..6usize,
        observed_replicas in proptest::collection::vec(proptest::option::of(0..20i32), 0..6),
    ) {
        let p = pool(Some(9), None);
        let cd = cluster_deployment();
        let desired: Vec<MachineSet> = (0..desired_zones)
            .map(|i| machine_set(&format!("propcluster-abc12-worker-z{i}"), Some(apportion_replicas(9, desired_zones, i)), true))
            .collect();
        let observed: Vec<MachineSet> = observed_replicas
            .iter()
            .enumerate()
            .map(|(i, r)| machine_set(&format!("propcluster-abc12-worker-z{i}"), *r, true))
            .collect();

        let plan = plan_machine_set_sync(&p, &cd, &desired, &observed);

        let creates: BTreeSet<String> = plan.to_create.iter().map(|m| m.name_any()).collect();
        let updates: BTreeSet<String> = plan.to_update.iter().map(|m| m.name_any()).collect();
        let deletes: BTreeSet<String> = plan.to_delete.iter().map(|m| m.name_any()).collect();

        prop_assert!(creates.is_disjoint(&updates));
        prop_assert!(creates.is_disjoint(&deletes));
        prop_assert!(updates.is_disjoint(&deletes));
        prop_assert_eq!(plan.result.len(), desired_zones);
    }

    #[test]
    fn prop_foreign_objects_are_untouchable(
        foreign_names in proptest::collection::vec("[a-z]{3,10}-[a-z]{3,8}-[0-9]", 1..5),
    ) {
        let p = pool(Some(6), None);
        let cd = cluster_deployment();
        let desired: Vec<MachineSet> = (0..3)
            .map(|i| machine_set(&format!("propcluster-abc12-worker-z{i}"), Some(2), true))
            .collect();
        let observed: Vec<MachineSet> = foreign_names
            .iter()
            // A colliding prefix would legitimately confer ownership
            .filter(|n| !n.starts_with("propcluster-worker-"))
            .map(|n| machine_set(n, Some(1), false))
            .collect();

        let plan = plan_machine_set_sync(&p, &cd, &desired, &observed);

        for foreign in &observed {
            let name = foreign.name_any();
            prop_assert!(plan.to_update.iter().all(|m| m.name_any() != name));
            prop_assert!(plan.to_delete.iter().all(|m| m.name_any() != name));
        }
    }

    #[test]
    fn prop_clamped_replicas_stay_in_bounds(
        min in 0..30i32,
        spread in 0..30i32,
        observed in proptest::collection::vec(proptest::option::of(0..50i32), 3),
    ) {
        let max = min + spread;
        let p = pool(None, Some((min, max)));
        let cd = cluster_deployment();
        let bounds = MachinePoolAutoscaling { min_replicas: min, max_replicas: max };
        let desired: Vec<MachineSet> = (0..3)
            .map(|i| machine_set(&format!("propcluster-abc12-worker-z{i}"), Some(get_min_max_replicas(&bounds, 3, i).0), true))
            .collect();
        let observed: Vec<MachineSet> = observed
            .iter()
            .enumerate()
            .map(|(i, r)| machine_set(&format!("propcluster-abc12-worker-z{i}"), *r, true))
            .collect();

        let plan = plan_machine_set_sync(&p, &cd, &desired, &observed);

        for (i, ms) in plan.result.iter().enumerate() {
            let (lo, hi) = get_min_max_replicas(&bounds, 3, i);
            let replicas = ms.spec.replicas.expect("result always carries a count");
            prop_assert!(replicas >= lo && replicas <= hi, "index {}: {} outside [{}, {}]", i, replicas, lo, hi);
        }
    }
}
