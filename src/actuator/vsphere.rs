//! vSphere machine set generation

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::actuator::{
    build_machine_set, fixed_replicas, infra_id, master_provider_spec, set_provider_spec_field,
    Actuator,
};
use crate::controller::error::Result;
use crate::crd::{ClusterDeployment, Machine, MachinePool, MachineSet};

pub struct VSphereActuator {
    master_machine: Machine,
}

impl VSphereActuator {
    pub fn new(master_machine: Machine) -> Self {
        Self { master_machine }
    }

    fn shaped_spec(&self, pool: &MachinePool, skeleton: &Value) -> Value {
        let mut spec = skeleton.clone();
        if let Some(vsphere) = &pool.spec.platform.vsphere {
            set_provider_spec_field(&mut spec, "/numCPUs", json!(vsphere.num_cpus));
            set_provider_spec_field(&mut spec, "/memoryMiB", json!(vsphere.memory_mi_b));
            set_provider_spec_field(&mut spec, "/diskGiB", json!(vsphere.os_disk_gi_b));
        }
        spec
    }
}

#[async_trait]
impl Actuator for VSphereActuator {
    async fn generate_machine_sets(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<(Vec<MachineSet>, bool)> {
        let infra = infra_id(cd)?;
        let skeleton = master_provider_spec(&self.master_machine)?;

        let zones = pool
            .spec
            .platform
            .vsphere
            .as_ref()
            .map(|v| v.zones.clone())
            .unwrap_or_default();

        let sets = if zones.is_empty() {
            let name = format!("{infra}-{}-0", pool.spec.name);
            vec![build_machine_set(
                &infra,
                &name,
                fixed_replicas(pool, 1, 0),
                self.shaped_spec(pool, &skeleton),
            )]
        } else {
            zones
                .iter()
                .enumerate()
                .map(|(index, zone)| {
                    let name = format!("{infra}-{}-{zone}", pool.spec.name);
                    let mut spec = self.shaped_spec(pool, &skeleton);
                    set_provider_spec_field(&mut spec, "/failureDomain", json!(zone));
                    build_machine_set(
                        &infra,
                        &name,
                        fixed_replicas(pool, zones.len(), index),
                        spec,
                    )
                })
                .collect()
        };

        Ok((sets, true))
    }
}
