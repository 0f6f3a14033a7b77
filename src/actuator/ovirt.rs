//! oVirt machine set generation. oVirt pools are single-zone, so exactly
//! one machine set is produced.

use async_trait::async_trait;
use serde_json::json;

use crate::actuator::{
    build_machine_set, fixed_replicas, infra_id, master_provider_spec, set_provider_spec_field,
    Actuator,
};
use crate::controller::error::Result;
use crate::crd::{ClusterDeployment, Machine, MachinePool, MachineSet};

pub struct OvirtActuator {
    master_machine: Machine,
}

impl OvirtActuator {
    pub fn new(master_machine: Machine) -> Self {
        Self { master_machine }
    }
}

#[async_trait]
impl Actuator for OvirtActuator {
    async fn generate_machine_sets(
        &self,
        cd: &ClusterDeployment,
        pool: &MachinePool,
    ) -> Result<(Vec<MachineSet>, bool)> {
        let infra = infra_id(cd)?;
        let mut spec = master_provider_spec(&self.master_machine)?;

        if let Some(ovirt) = &pool.spec.platform.ovirt {
            if let Some(cpu) = &ovirt.cpu {
                set_provider_spec_field(&mut spec, "/cpu/cores", json!(cpu.cores));
                set_provider_spec_field(&mut spec, "/cpu/sockets", json!(cpu.sockets));
            }
            if let Some(memory) = ovirt.memory_mb {
                set_provider_spec_field(&mut spec, "/memoryMB", json!(memory));
            }
        }

        let name = format!("{infra}-{}-0", pool.spec.name);
        let set = build_machine_set(&infra, &name, fixed_replicas(pool, 1, 0), spec);
        Ok((vec![set], true))
    }
}
