use crate::bundle::object::{BundleObjectKind, BundledObject};
use crate::errors::Error;
use kcp_operator_api as api;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use k8s_openapi::api::core::v1::Service as KubeService;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Resource;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

#[cfg(test)]
use mockall::automock;

/*
 * Point lookups against the managed-object store. Reconcilers read through
 * this trait so the resolution and bundling logic can run against a fake in
 * tests; writes go through the object reconciler.
 */
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_root_shard(&self, namespace: &str, name: &str) -> Result<Option<api::RootShard>, Error>;

    async fn get_shard(&self, namespace: &str, name: &str) -> Result<Option<api::Shard>, Error>;

    async fn get_front_proxy(&self, namespace: &str, name: &str) -> Result<Option<api::FrontProxy>, Error>;

    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<api::Bundle>, Error>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<KubeSecret>, Error>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<KubeDeployment>, Error>;

    /* Fetches one of the object kinds a Bundle can contain */
    async fn get_object(&self, kind: BundleObjectKind, namespace: &str, name: &str) -> Result<Option<BundledObject>, Error>;
}

#[derive(Clone)]
pub struct KubeStore {
    kube_client: KubeClient,
}

impl KubeStore {
    pub fn new(kube_client: KubeClient) -> Self {
	Self{ kube_client: kube_client }
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<Option<K>, Error>
    where
	K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
	K::DynamicType: Default,
    {
	let api: KubeApi<K> = KubeApi::namespaced(self.kube_client.clone(), namespace);
	Ok(api.get_opt(name).await?)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get_root_shard(&self, namespace: &str, name: &str) -> Result<Option<api::RootShard>, Error> {
	self.get(namespace, name).await
    }

    async fn get_shard(&self, namespace: &str, name: &str) -> Result<Option<api::Shard>, Error> {
	self.get(namespace, name).await
    }

    async fn get_front_proxy(&self, namespace: &str, name: &str) -> Result<Option<api::FrontProxy>, Error> {
	self.get(namespace, name).await
    }

    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<api::Bundle>, Error> {
	self.get(namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<KubeSecret>, Error> {
	self.get(namespace, name).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<KubeDeployment>, Error> {
	self.get(namespace, name).await
    }

    async fn get_object(&self, kind: BundleObjectKind, namespace: &str, name: &str) -> Result<Option<BundledObject>, Error> {
	let object = match kind {
	    BundleObjectKind::Secret => self.get::<KubeSecret>(namespace, name).await?.map(BundledObject::Secret),
	    BundleObjectKind::ConfigMap => self.get::<KubeConfigMap>(namespace, name).await?.map(BundledObject::ConfigMap),
	    BundleObjectKind::Service => self.get::<KubeService>(namespace, name).await?.map(BundledObject::Service),
	    BundleObjectKind::Deployment => self.get::<KubeDeployment>(namespace, name).await?.map(BundledObject::Deployment),
	};

	Ok(object)
    }
}
