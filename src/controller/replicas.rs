//! Replica apportionment across zones and the zero-minimum platform policy

use semver::Version;

use crate::crd::{ClusterDeployment, MachinePoolAutoscaling};

/// Share of `total` the machine set at `index` receives when split evenly
/// across `num_machine_sets` zones. Totals are preserved, shares differ by
/// at most one, and the leading `total % n` indices take the larger share.
pub fn apportion_replicas(total: i32, num_machine_sets: usize, index: usize) -> i32 {
    let n = num_machine_sets as i32;
    let mut share = total / n;
    if (index as i32) < total % n {
        share += 1;
    }
    share
}

/// Split the pool's autoscaling bounds across `num_machine_sets` zones for
/// the machine set at `index`. Min and max are apportioned independently; a
/// skewed remainder can leave max below min for an index, in which case max
/// is raised to min.
pub fn get_min_max_replicas(
    autoscaling: &MachinePoolAutoscaling,
    num_machine_sets: usize,
    index: usize,
) -> (i32, i32) {
    let min = apportion_replicas(autoscaling.min_replicas, num_machine_sets, index);
    let mut max = apportion_replicas(autoscaling.max_replicas, num_machine_sets, index);
    if max < min {
        max = min;
    }
    (min, max)
}

/// Whether the cluster's platform permits autoscaling with a minimum of
/// zero. AWS, Azure, and GCP always do. OpenStack does from 4.7.0, decided
/// against the cluster's version label; a missing or unparseable label means
/// the gate stays closed. Other platforms never allow it.
pub fn platform_allows_zero_autoscaling_min_replicas(cd: &ClusterDeployment) -> bool {
    let platform = &cd.spec.platform;
    if platform.aws.is_some() || platform.azure.is_some() || platform.gcp.is_some() {
        return true;
    }

    if platform.openstack.is_some() {
        let Some(label) = cd.version_label() else {
            return false;
        };
        let Ok(current) = Version::parse(label) else {
            return false;
        };
        // OpenStack clusters allow autoscaling down to zero from 4.7.0 on
        return current >= Version::new(4, 7, 0);
    }

    false
}
