//! Azure machine set generation

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::actuator::{
    build_machine_set, fixed_replicas, infra_id, master_provider_spec, provider_spec_string,
    set_provider_spec_field, Actuator,
};
use crate::controller::error::Result;
use crate::crd::{ClusterDeployment, Machine, MachinePool, MachineSet};

/// JSON pointer to the zone in an Azure provider spec
const ZONE_POINTER: &str = "/zone";

pub struct AzureActuator {
    cloud_name: Option<String>,
    master_machine: Machine,
}

impl AzureActuator {
    pub fn new(cloud_name: Option<String>, master_machine: Machine) -> Self {
        Self {
            cloud_name,
            master_machine,
        }
    }

    fn zones(&self, pool: &MachinePool, skeleton: &Value) -> Vec<String> {
        let configured = pool
            .spec
            .platform
            .azure
            .as_ref()
            .map(|azure| azure.zones.clone())
            .unwrap_or_default();
        if !configured.is_empty() {
            return configured;
        }
        provider_spec_string(skeleton, ZONE_POINTER)
            .map(|z| vec![z])
            .unwrap_or_default()
    }
}

#[async_trait]
impl Actuator for AzureActuator {
    async fn generate_machine_sets(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<(Vec<MachineSet>, bool)> {
        let infra = infra_id(cd)?;
        let skeleton = master_provider_spec(&self.master_machine)?;
        let zones = self.zones(pool, &skeleton);

        debug!(
            cloud = self.cloud_name.as_deref().unwrap_or("AzurePublicCloud"),
            zones = zones.len(),
            "generating Azure machine sets"
        );

        let sets = zones
            .iter()
            .enumerate()
            .map(|(index, zone)| {
                let name = format!("{infra}-{}-{zone}", pool.spec.name);
                let mut spec = skeleton.clone();
                if let Some(vm_size) = pool
                    .spec
                    .platform
                    .azure
                    .as_ref()
                    .map(|a| a.instance_type.clone())
                {
                    set_provider_spec_field(&mut spec, "/vmSize", json!(vm_size));
                }
                set_provider_spec_field(&mut spec, ZONE_POINTER, json!(zone));
                build_machine_set(&infra, &name, fixed_replicas(pool, zones.len(), index), spec)
            })
            .collect();

        Ok((sets, true))
    }
}
