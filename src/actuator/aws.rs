//! AWS machine set generation

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::ObjectMeta;
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::actuator::{
    build_machine_set, fixed_replicas, infra_id, master_provider_spec, provider_spec_string,
    set_provider_spec_field, Actuator,
};
use crate::controller::error::Result;
use crate::controller::status::{
    condition_status, patch_pool_conditions, set_condition_with_change_check, UpdatePolicy,
};
use crate::crd::{
    AWSMachineTemplate, AWSMachineTemplateResource, AWSMachineTemplateSpec, ClusterDeployment,
    Machine, MachinePool, MachinePoolConditionType, MachineSet, MACHINE_POOL_NAME_LABEL,
};

/// JSON pointer to the availability zone in an AWS provider spec
const ZONE_POINTER: &str = "/placement/availabilityZone";

pub struct AwsActuator {
    client: Client,
    region: String,
    credentials_secret: String,
    /// Assume-role credentials secret for the service-provider mode, from
    /// the well-known environment variable
    assume_role_secret: Option<String>,
    master_machine: Machine,
}

impl AwsActuator {
    pub fn new(
        client: Client,
        region: String,
        credentials_secret: String,
        assume_role_secret: Option<String>,
        master_machine: Machine,
    ) -> Self {
        Self {
            client,
            region,
            credentials_secret,
            assume_role_secret,
            master_machine,
        }
    }

    fn zones(&self, pool: &MachinePool, skeleton: &Value) -> Vec<String> {
        let configured = pool
            .spec
            .platform
            .aws
            .as_ref()
            .map(|aws| aws.zones.clone())
            .unwrap_or_default();
        if !configured.is_empty() {
            return configured;
        }
        provider_spec_string(skeleton, ZONE_POINTER)
            .map(|z| vec![z])
            .unwrap_or_default()
    }

    /// Structural subnet validation: explicit subnets must cover every zone
    /// and carry no duplicates. The cloud-side existence check lives behind
    /// the SDK seam and is not performed here.
    fn validate_subnets(subnets: &[String], zones: &[String]) -> Option<String> {
        if subnets.is_empty() {
            return None;
        }
        let mut seen = std::collections::BTreeSet::new();
        for subnet in subnets {
            if !seen.insert(subnet) {
                return Some(format!("duplicate subnet {subnet} in machine pool"));
            }
        }
        if subnets.len() < zones.len() {
            return Some(format!(
                "not enough subnets ({}) for the pool's zones ({})",
                subnets.len(),
                zones.len()
            ));
        }
        None
    }

    fn provider_spec_for_zone(
        &self,
        skeleton: &Value,
        pool: &MachinePool,
        zone: &str,
        subnet: Option<&str>,
    ) -> Value {
        let mut spec = skeleton.clone();
        let aws = pool.spec.platform.aws.as_ref();
        if let Some(instance_type) = aws.map(|a| a.instance_type.clone()) {
            set_provider_spec_field(&mut spec, "/instanceType", json!(instance_type));
        }
        set_provider_spec_field(&mut spec, ZONE_POINTER, json!(zone));
        set_provider_spec_field(&mut spec, "/placement/region", json!(self.region));
        if let Some(subnet) = subnet {
            set_provider_spec_field(&mut spec, "/subnet", json!({ "id": subnet }));
        }
        spec
    }
}

#[async_trait]
impl Actuator for AwsActuator {
    async fn generate_machine_sets(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<(Vec<MachineSet>, bool)> {
        let infra = infra_id(cd)?;
        let skeleton = master_provider_spec(&self.master_machine)?;
        let zones = self.zones(pool, &skeleton);
        let subnets = pool
            .spec
            .platform
            .aws
            .as_ref()
            .map(|a| a.subnets.clone())
            .unwrap_or_default();

        debug!(
            region = %self.region,
            credentials_secret = %self.credentials_secret,
            assume_role = self.assume_role_secret.is_some(),
            zones = zones.len(),
            "generating AWS machine sets"
        );

        let conditions = pool
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        if let Some(problem) = Self::validate_subnets(&subnets, &zones) {
            warn!(%problem, "machine pool subnets are invalid");
            let (conditions, changed) = set_condition_with_change_check(
                conditions,
                MachinePoolConditionType::InvalidSubnets,
                condition_status::TRUE,
                "SubnetsInvalid",
                &problem,
                UpdatePolicy::IfReasonOrMessageChange,
            );
            if changed {
                patch_pool_conditions(&self.client, pool, &conditions).await?;
            }
            return Ok((Vec::new(), false));
        }
        let (conditions, changed) = set_condition_with_change_check(
            conditions,
            MachinePoolConditionType::InvalidSubnets,
            condition_status::FALSE,
            "SubnetsValid",
            "Subnets are valid",
            UpdatePolicy::Never,
        );
        if changed {
            patch_pool_conditions(&self.client, pool, &conditions).await?;
        }

        let sets = zones
            .iter()
            .enumerate()
            .map(|(index, zone)| {
                let name = format!("{infra}-{}-{zone}", pool.spec.name);
                let subnet = subnets.get(index).map(String::as_str);
                let spec = self.provider_spec_for_zone(&skeleton, pool, zone, subnet);
                build_machine_set(
                    &infra,
                    &name,
                    fixed_replicas(pool, zones.len(), index),
                    spec,
                )
            })
            .collect();

        Ok((sets, true))
    }

    async fn generate_machine_templates(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<Vec<AWSMachineTemplate>> {
        let infra = infra_id(cd)?;
        let skeleton = master_provider_spec(&self.master_machine)?;
        let zones = self.zones(pool, &skeleton);

        let templates = zones
            .iter()
            .map(|zone| {
                let name = format!("{infra}-{}-{zone}", pool.spec.name);
                let spec = self.provider_spec_for_zone(&skeleton, pool, zone, None);
                AWSMachineTemplate {
                    metadata: ObjectMeta {
                        name: Some(name),
                        labels: Some(BTreeMap::from([(
                            MACHINE_POOL_NAME_LABEL.to_string(),
                            pool.spec.name.clone(),
                        )])),
                        ..Default::default()
                    },
                    spec: AWSMachineTemplateSpec {
                        template: AWSMachineTemplateResource { spec },
                    },
                }
            })
            .collect();

        Ok(templates)
    }
}
