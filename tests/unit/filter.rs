//! Unit tests for the ingress event filters

use machinepool_operator::controller::filter::{
    cluster_deployment_fingerprint, pool_change_fingerprint,
};
use machinepool_operator::controller::status::condition_status;
use machinepool_operator::crd::{MachinePoolCondition, MachinePoolConditionType, MachinePoolStatus};

use crate::fixtures::{self, cluster_deployment, machine_pool};

fn error_condition(status: &str, reason: &str, message: &str) -> MachinePoolCondition {
    MachinePoolCondition {
        type_: MachinePoolConditionType::InvalidSubnets,
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: "2024-01-01T00:00:00Z".to_string(),
        last_probe_time: None,
    }
}

#[test]
fn test_status_only_churn_is_suppressed() {
    let mut pool = machine_pool(Some(3), None);
    let before = pool_change_fingerprint(&pool);

    // Replica counters moving is exactly the churn the filter exists for
    pool.status = Some(MachinePoolStatus {
        replicas: 3,
        machine_sets: Vec::new(),
        conditions: Vec::new(),
    });
    let after = pool_change_fingerprint(&pool);

    assert_eq!(before, after);
}

#[test]
fn test_spec_generation_change_passes() {
    let mut pool = machine_pool(Some(3), None);
    pool.metadata.generation = Some(1);
    let before = pool_change_fingerprint(&pool);

    pool.metadata.generation = Some(2);
    let after = pool_change_fingerprint(&pool);

    assert_ne!(before, after);
}

#[test]
fn test_newly_true_error_condition_passes() {
    let mut pool = machine_pool(Some(3), None);
    let before = pool_change_fingerprint(&pool);

    pool.status = Some(MachinePoolStatus {
        replicas: 0,
        machine_sets: Vec::new(),
        conditions: vec![error_condition(
            condition_status::TRUE,
            "SubnetsInvalid",
            "duplicate subnet",
        )],
    });
    let after = pool_change_fingerprint(&pool);

    assert_ne!(before, after);
}

#[test]
fn test_error_condition_message_change_passes() {
    let mut pool = machine_pool(Some(3), None);
    pool.status = Some(MachinePoolStatus {
        replicas: 0,
        machine_sets: Vec::new(),
        conditions: vec![error_condition(
            condition_status::TRUE,
            "SubnetsInvalid",
            "duplicate subnet subnet-1",
        )],
    });
    let before = pool_change_fingerprint(&pool);

    pool.status.as_mut().unwrap().conditions[0].message =
        "duplicate subnet subnet-2".to_string();
    let after = pool_change_fingerprint(&pool);

    assert_ne!(before, after);
}

#[test]
fn test_false_error_condition_is_ignored() {
    let mut pool = machine_pool(Some(3), None);
    let before = pool_change_fingerprint(&pool);

    pool.status = Some(MachinePoolStatus {
        replicas: 0,
        machine_sets: Vec::new(),
        conditions: vec![error_condition(
            condition_status::FALSE,
            "SubnetsValid",
            "all good",
        )],
    });
    let after = pool_change_fingerprint(&pool);

    assert_eq!(before, after);
}

#[test]
fn test_cluster_deployment_install_flip_passes() {
    let mut cd = cluster_deployment(fixtures::aws_platform());
    cd.spec.installed = false;
    let before = cluster_deployment_fingerprint(&cd);

    cd.spec.installed = true;
    let after = cluster_deployment_fingerprint(&cd);

    assert_ne!(before, after);
}

#[test]
fn test_cluster_deployment_pause_flip_passes() {
    let mut cd = cluster_deployment(fixtures::aws_platform());
    let before = cluster_deployment_fingerprint(&cd);

    cd.metadata.annotations = Some(std::collections::BTreeMap::from([(
        "hive.openshift.io/reconcile-pause".to_string(),
        "true".to_string(),
    )]));
    let after = cluster_deployment_fingerprint(&cd);

    assert_ne!(before, after);
}

#[test]
fn test_cluster_deployment_fake_flip_passes() {
    let mut cd = cluster_deployment(fixtures::aws_platform());
    let before = cluster_deployment_fingerprint(&cd);

    cd.metadata.annotations = Some(std::collections::BTreeMap::from([(
        "hive.openshift.io/fake-cluster".to_string(),
        "true".to_string(),
    )]));
    let after = cluster_deployment_fingerprint(&cd);

    assert_ne!(before, after);
}

#[test]
fn test_cluster_deployment_central_management_flip_passes() {
    use machinepool_operator::crd::{CentralMachineManagement, MachineManagement};

    let mut cd = cluster_deployment(fixtures::aws_platform());
    let before = cluster_deployment_fingerprint(&cd);

    cd.spec.machine_management = Some(MachineManagement {
        central: Some(CentralMachineManagement {}),
        target_namespace: Some("machines".to_string()),
    });
    let after = cluster_deployment_fingerprint(&cd);

    assert_ne!(before, after);
}

#[test]
fn test_cluster_deployment_unrelated_change_is_suppressed() {
    let mut cd = cluster_deployment(fixtures::aws_platform());
    let before = cluster_deployment_fingerprint(&cd);

    cd.metadata.annotations = Some(std::collections::BTreeMap::from([(
        "some.other/annotation".to_string(),
        "value".to_string(),
    )]));
    let after = cluster_deployment_fingerprint(&cd);

    assert_eq!(before, after);
}
