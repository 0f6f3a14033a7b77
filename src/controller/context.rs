//! Shared context for the MachinePool controller

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::actuator::{default_actuator_factory, ActuatorFactory};
use crate::controller::error::{Error, Result, RetryTracker};
use crate::controller::expectations::ExpectationsStore;
use crate::crd::ClusterDeployment;

/// Field manager name for the operator
pub(crate) const FIELD_MANAGER: &str = "machinepool-operator";

/// Key under which the admin kubeconfig secret stores its payload
const KUBECONFIG_SECRET_KEY: &str = "kubeconfig";

/// Shared context for the controller
#[derive(Clone)]
pub struct Context {
    /// Client for the local (controller-hosting) cluster
    pub client: Client,
    /// Pending-creation expectations, shared with the lease watch
    pub expectations: Arc<ExpectationsStore>,
    /// Consecutive-failure counters feeding the backoff in error_policy
    pub retries: Arc<RetryTracker>,
    /// Builder for remote tenant-cluster clients
    pub remote_clients: Arc<dyn RemoteClientBuilder>,
    /// Platform actuator factory. Tests inject a fake through here.
    pub actuators: Arc<dyn ActuatorFactory>,
}

impl Context {
    /// Create a context with the production client builder and actuators
    pub fn new(client: Client) -> Self {
        Self {
            client,
            expectations: Arc::new(ExpectationsStore::new()),
            retries: Arc::new(RetryTracker::new()),
            remote_clients: Arc::new(CachingRemoteClientBuilder::default()),
            actuators: default_actuator_factory(),
        }
    }

    /// Create a context with injected collaborators
    pub fn with_parts(
        client: Client,
        expectations: Arc<ExpectationsStore>,
        remote_clients: Arc<dyn RemoteClientBuilder>,
        actuators: Arc<dyn ActuatorFactory>,
    ) -> Self {
        Self {
            client,
            expectations,
            retries: Arc::new(RetryTracker::new()),
            remote_clients,
            actuators,
        }
    }
}

/// Outcome of attempting to reach a tenant cluster. Unreachability is an
/// expected state, not an error.
pub enum RemoteConnection {
    Connected(Client),
    Unreachable { requeue: bool },
}

/// Builds typed clients for tenant clusters
#[async_trait]
pub trait RemoteClientBuilder: Send + Sync {
    async fn connect(&self, local: &Client, cd: &ClusterDeployment) -> Result<RemoteConnection>;
}

/// Production builder reading the admin kubeconfig secret named by the
/// ClusterDeployment. Clients are cached per cluster key and invalidated
/// when the secret's resourceVersion moves.
#[derive(Default)]
pub struct CachingRemoteClientBuilder {
    cache: Mutex<HashMap<String, (String, Client)>>,
}

impl CachingRemoteClientBuilder {
    async fn build_client(secret: &Secret) -> Result<Client> {
        let raw = secret
            .data
            .as_ref()
            .and_then(|d| d.get(KUBECONFIG_SECRET_KEY))
            .ok_or_else(|| {
                Error::KubeconfigError(format!(
                    "secret {} has no {} key",
                    secret.name_any(),
                    KUBECONFIG_SECRET_KEY
                ))
            })?;
        let text = std::str::from_utf8(&raw.0)
            .map_err(|e| Error::KubeconfigError(format!("kubeconfig is not utf-8: {e}")))?;
        let kubeconfig = Kubeconfig::from_yaml(text)
            .map_err(|e| Error::KubeconfigError(format!("could not parse kubeconfig: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::KubeconfigError(format!("could not load kubeconfig: {e}")))?;
        Client::try_from(config).map_err(Error::KubeError)
    }
}

#[async_trait]
impl RemoteClientBuilder for CachingRemoteClientBuilder {
    async fn connect(&self, local: &Client, cd: &ClusterDeployment) -> Result<RemoteConnection> {
        let namespace = cd.namespace().unwrap_or_default();
        let metadata = cd
            .spec
            .cluster_metadata
            .as_ref()
            .ok_or_else(|| Error::KubeconfigError("cluster has no metadata".to_string()))?;

        let secrets: Api<Secret> = Api::namespaced(local.clone(), &namespace);
        let secret = secrets
            .get(&metadata.admin_kubeconfig_secret_ref.name)
            .await?;
        let secret_version = secret.resource_version().unwrap_or_default();

        let key = format!("{}/{}", namespace, cd.name_any());
        let mut cache = self.cache.lock().await;
        let client = match cache.get(&key) {
            Some((version, client)) if *version == secret_version => client.clone(),
            _ => {
                debug!(cluster = %key, "building remote cluster client");
                let client = Self::build_client(&secret).await?;
                cache.insert(key.clone(), (secret_version, client.clone()));
                client
            }
        };
        drop(cache);

        // A cheap probe; an unreachable API server is a normal condition for
        // a tenant cluster and must not surface as a reconcile error.
        match client.apiserver_version().await {
            Ok(_) => Ok(RemoteConnection::Connected(client)),
            Err(e) => {
                warn!(cluster = %key, error = %e, "remote cluster unreachable");
                info!(cluster = %key, "will retry on requeue");
                Ok(RemoteConnection::Unreachable { requeue: true })
            }
        }
    }
}
