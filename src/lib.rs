pub mod actuator;
pub mod controller;
pub mod crd;

pub use controller::{error_policy, reconcile, Context, Error, Result, FINALIZER};
pub use crd::{ClusterDeployment, MachinePool};

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt, TryStreamExt};
use kube::api::Api;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::{reflector, watcher, Controller, WatchStreamExt};
use kube::{Client, ResourceExt};

use crate::controller::filter;
use crate::crd::MachinePoolNameLease;

/// Interval of the periodic re-enqueue of every pool. Remote-side drift has
/// no watch wired back, so this is what closes the loop.
const PERIODIC_RESYNC: Duration = Duration::from_secs(30 * 60);

/// Fractional jitter applied to the periodic interval to desynchronize
/// large pool populations
const PERIODIC_JITTER: f64 = 0.1;

/// Environment variable setting the number of concurrent reconciles
const CONCURRENT_RECONCILES_ENV: &str = "MACHINE_POOL_CONCURRENT_RECONCILES";
const DEFAULT_CONCURRENT_RECONCILES: u16 = 5;

fn concurrent_reconciles() -> u16 {
    std::env::var(CONCURRENT_RECONCILES_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CONCURRENT_RECONCILES)
}

/// A stream of ticks on the resync interval with ±10% jitter per tick.
fn periodic_ticks(period: Duration) -> impl Stream<Item = ()> {
    futures::stream::unfold((), move |()| async move {
        let skew = (rand::random::<f64>() * 2.0 - 1.0) * PERIODIC_JITTER;
        tokio::time::sleep(period.mul_f64(1.0 + skew)).await;
        Some(((), ()))
    })
}

/// Run the operator controller
///
/// Assembles the event sources into one rate-limited queue: machine pool
/// changes (filtered so status-only churn is suppressed), name lease
/// creations (which also satisfy expectations), cluster deployment
/// transitions mapped onto every pool referencing them, and the periodic
/// tick. This is the main controller loop; it can be called from main.rs or
/// spawned as a background task during integration tests.
pub async fn run_controller(client: Client) {
    tracing::info!("Starting controller for MachinePool resources");

    let ctx = Arc::new(Context::new(client.clone()));

    let pools: Api<MachinePool> = Api::all(client.clone());
    let cluster_deployments: Api<ClusterDeployment> = Api::all(client.clone());
    let leases: Api<MachinePoolNameLease> = Api::all(client.clone());

    // Use any_semantic() for more reliable resource discovery in test environments
    let watcher_config = WatcherConfig::default().any_semantic();

    // The pool store lets cluster deployment events map back to the pools
    // that reference them without a round trip to the API server
    let (pool_store, pool_writer) = reflector::store::<MachinePool>();
    let pool_stream = reflector(pool_writer, watcher(pools, watcher_config.clone()))
        .applied_objects()
        .predicate_filter(filter::pool_change_fingerprint);

    // Observed lease creations satisfy the expectations recorded when the
    // creates were issued, then wake the owning pool
    let expectations = ctx.expectations.clone();
    let lease_stream = watcher(leases, watcher_config.clone())
        .applied_objects()
        .inspect_ok(move |lease: &MachinePoolNameLease| {
            if let Some(owner) = owning_pool(lease) {
                expectations.creation_observed(&format!("{}/{}", owner.0, owner.1));
            }
        });

    let cd_stream = watcher(cluster_deployments, watcher_config)
        .applied_objects()
        .predicate_filter(filter::cluster_deployment_fingerprint);

    let mapping_store = pool_store.clone();
    Controller::for_stream(pool_stream, pool_store)
        .with_config(ControllerConfig::default().concurrency(concurrent_reconciles()))
        .watches_stream(lease_stream, |lease| {
            owning_pool(&lease)
                .map(|(ns, name)| ObjectRef::<MachinePool>::new(&name).within(&ns))
                .into_iter()
        })
        .watches_stream(cd_stream, move |cd: ClusterDeployment| {
            let cd_name = cd.name_any();
            let cd_namespace = cd.namespace().unwrap_or_default();
            mapping_store
                .state()
                .into_iter()
                .filter(move |pool| {
                    pool.namespace().unwrap_or_default() == cd_namespace
                        && pool.spec.cluster_deployment_ref.name == cd_name
                })
                .map(|pool| ObjectRef::from_obj(pool.as_ref()))
                .collect::<Vec<_>>()
        })
        .reconcile_all_on(periodic_ticks(PERIODIC_RESYNC))
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    tracing::error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    tracing::info!("Controller stream ended");
}

/// The (namespace, name) of the MachinePool owning a lease, from its
/// controller owner reference.
fn owning_pool(lease: &MachinePoolNameLease) -> Option<(String, String)> {
    let namespace = lease.namespace()?;
    let owner = lease
        .owner_references()
        .iter()
        .find(|o| o.kind == "MachinePool")?;
    Some((namespace, owner.name.clone()))
}
