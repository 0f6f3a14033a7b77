//! Unit tests for condition management

use machinepool_operator::controller::status::{
    condition_status, initialize_conditions, set_condition_with_change_check, UpdatePolicy,
    CONTROLLER_CONDITIONS,
};
use machinepool_operator::crd::{MachinePoolCondition, MachinePoolConditionType};

fn existing_condition(
    type_: MachinePoolConditionType,
    status: &str,
    reason: &str,
    message: &str,
) -> MachinePoolCondition {
    MachinePoolCondition {
        type_,
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: "2024-01-01T00:00:00Z".to_string(),
        last_probe_time: None,
    }
}

#[test]
fn test_initialize_adds_all_controller_conditions_as_unknown() {
    let conditions = initialize_conditions(Vec::new());

    assert_eq!(conditions.len(), CONTROLLER_CONDITIONS.len());
    for cond in &conditions {
        assert_eq!(cond.status, condition_status::UNKNOWN);
    }
}

#[test]
fn test_initialize_preserves_existing_conditions() {
    let existing = vec![existing_condition(
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::TRUE,
        "MinReplicasTooSmall",
        "too small",
    )];

    let conditions = initialize_conditions(existing);

    assert_eq!(conditions.len(), CONTROLLER_CONDITIONS.len());
    let not_enough = conditions
        .iter()
        .find(|c| c.type_ == MachinePoolConditionType::NotEnoughReplicas)
        .unwrap();
    assert_eq!(not_enough.status, condition_status::TRUE);
    assert_eq!(not_enough.reason, "MinReplicasTooSmall");
}

#[test]
fn test_initialize_is_idempotent() {
    let first = initialize_conditions(Vec::new());
    let second = initialize_conditions(first.clone());
    assert_eq!(first.len(), second.len());
}

#[test]
fn test_status_flip_always_updates() {
    let existing = vec![existing_condition(
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::FALSE,
        "EnoughReplicas",
        "fine",
    )];

    let (conditions, changed) = set_condition_with_change_check(
        existing,
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::TRUE,
        "MinReplicasTooSmall",
        "not fine",
        UpdatePolicy::Never,
    );

    assert!(changed);
    let cond = &conditions[0];
    assert_eq!(cond.status, condition_status::TRUE);
    assert_eq!(cond.reason, "MinReplicasTooSmall");
    // Status flipped, so the transition time moved
    assert_ne!(cond.last_transition_time, "2024-01-01T00:00:00Z");
}

#[test]
fn test_never_policy_ignores_reason_and_message_churn() {
    let existing = vec![existing_condition(
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::TRUE,
        "MinReplicasTooSmall",
        "minReplicas must be at least 3",
    )];

    let (_, changed) = set_condition_with_change_check(
        existing,
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::TRUE,
        "MinReplicasTooSmall",
        "minReplicas must be at least 4",
        UpdatePolicy::Never,
    );

    assert!(!changed);
}

#[test]
fn test_reason_or_message_policy_refreshes_details() {
    let existing = vec![existing_condition(
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::TRUE,
        "MinReplicasTooSmall",
        "minReplicas must be at least 3",
    )];

    let (conditions, changed) = set_condition_with_change_check(
        existing,
        MachinePoolConditionType::NotEnoughReplicas,
        condition_status::TRUE,
        "MinReplicasTooSmall",
        "minReplicas must be at least 4",
        UpdatePolicy::IfReasonOrMessageChange,
    );

    assert!(changed);
    let cond = &conditions[0];
    assert_eq!(cond.message, "minReplicas must be at least 4");
    // The status did not flip, so the transition time held still
    assert_eq!(cond.last_transition_time, "2024-01-01T00:00:00Z");
}

#[test]
fn test_identical_condition_is_not_an_update() {
    let existing = vec![existing_condition(
        MachinePoolConditionType::InvalidSubnets,
        condition_status::TRUE,
        "SubnetsInvalid",
        "duplicate subnet",
    )];

    let (_, changed) = set_condition_with_change_check(
        existing,
        MachinePoolConditionType::InvalidSubnets,
        condition_status::TRUE,
        "SubnetsInvalid",
        "duplicate subnet",
        UpdatePolicy::IfReasonOrMessageChange,
    );

    assert!(!changed);
}

#[test]
fn test_setting_a_missing_condition_adds_it() {
    let (conditions, changed) = set_condition_with_change_check(
        Vec::new(),
        MachinePoolConditionType::UnsupportedConfiguration,
        condition_status::TRUE,
        "CentralMachineManagementUnsupported",
        "not on this platform",
        UpdatePolicy::Never,
    );

    assert!(changed);
    assert_eq!(conditions.len(), 1);
    assert_eq!(
        conditions[0].type_,
        MachinePoolConditionType::UnsupportedConfiguration
    );
}
