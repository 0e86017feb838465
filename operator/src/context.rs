/*
 * State shared by every controller.
 */
use crate::config::OperatorConfig;
use crate::errors::Error;
use crate::metrics::{LogMetrics, MetricsSink};
use crate::remote::{KubeRemoteConnector, RemoteConnector};
use crate::store::{KubeStore, ObjectStore};

use k8s_openapi::NamespaceResourceScope;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Resource;
use kube::ResourceExt;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::watcher::Config as KubeWatcherConfig;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;

pub struct Context {
    pub kube_client: KubeClient,
    pub store: Arc<dyn ObjectStore>,
    pub remote: Arc<dyn RemoteConnector>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: OperatorConfig,
}

impl Context {

    pub fn new(kube_client: KubeClient, config: OperatorConfig) -> Self {
	let store: Arc<dyn ObjectStore> = Arc::new(KubeStore::new(kube_client.clone()));

	Self{
	    kube_client: kube_client,
	    remote: Arc::new(KubeRemoteConnector::new(store.clone(), config.remote_timeout)),
	    store: store,
	    metrics: Arc::new(LogMetrics),
	    config: config,
	}
    }

    pub fn api<K>(&self, namespace: &str) -> KubeApi<K>
    where
	K: Resource<Scope = NamespaceResourceScope>,
	K::DynamicType: Default,
    {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }

    /* Api used for watches: one namespace if configured, all otherwise */
    pub fn watched_api<K>(&self) -> KubeApi<K>
    where
	K: Resource<Scope = NamespaceResourceScope>,
	K::DynamicType: Default,
    {
	match &self.config.namespace {
	    Some(namespace) => KubeApi::namespaced(self.kube_client.clone(), namespace),
	    None => KubeApi::all(self.kube_client.clone()),
	}
    }

    pub fn watcher_config(&self) -> KubeWatcherConfig {
	KubeWatcherConfig::default().timeout(self.config.watch_timeout)
    }

    /*
     * Writes the status subresource, skipped when nothing changed so that
     * our own writes do not re-trigger reconciliation.
     */
    pub async fn write_status<K, S>(&self, obj: &K, old: Option<&S>, new: &S) -> Result<(), Error>
    where
	K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
	K::DynamicType: Default,
	S: Serialize + PartialEq,
    {
	if !crate::conditions::status_changed(old, new) {
	    return Ok(());
	}

	let api: KubeApi<K> = self.api(&obj.namespace().unwrap_or_default());
	let patch = serde_json::json!({ "status": new });
	api.patch_status(&obj.name_any(), &KubePatchParams::default(), &KubePatch::Merge(&patch)).await?;
	Ok(())
    }

    pub fn requeue(&self) -> KubeAction {
	KubeAction::requeue(self.config.requeue_interval)
    }
}

/*
 * Invalid specs wait for the user to change them, anything else is retried
 * after the error interval.
 */
pub fn error_policy<K>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> KubeAction
where
    K: Resource<DynamicType = ()>,
{
    log::error!("Reconciling {} {} failed: {}", K::kind(&()), obj.name_any(), error);
    ctx.metrics.reconcile_failed(&K::kind(&()), &obj.name_any(), &error.to_string());

    if error.is_invalid_spec() {
	KubeAction::await_change()
    } else {
	KubeAction::requeue(ctx.config.error_requeue_interval)
    }
}
