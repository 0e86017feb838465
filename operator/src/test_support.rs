/*
 * In-memory ObjectStore for scenario tests.
 */
use crate::bundle::object::{BundleObjectKind, BundleObjectRef, BundledObject};
use crate::errors::Error;
use crate::store::ObjectStore;
use kcp_operator_api as api;

use async_trait::async_trait;
use k8s_openapi::ByteString;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeStore {
    root_shards: Mutex<HashMap<(String, String), api::RootShard>>,
    shards: Mutex<HashMap<(String, String), api::Shard>>,
    front_proxies: Mutex<HashMap<(String, String), api::FrontProxy>>,
    bundles: Mutex<HashMap<(String, String), api::Bundle>>,
    objects: Mutex<HashMap<BundleObjectRef, BundledObject>>,
    failing: Mutex<HashSet<BundleObjectRef>>,
}

fn key(namespace: &str, name: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn meta(reference: &BundleObjectRef) -> ObjectMeta {
    ObjectMeta{
	name: Some(reference.name.clone()),
	namespace: Some(reference.namespace.clone()),
	resource_version: Some(String::from("1")),
	uid: Some(format!("uid-{}", reference.name)),
	..Default::default()
    }
}

/* A plausible live object of the referenced kind, carrying some data */
pub fn sample_object(reference: &BundleObjectRef) -> BundledObject {
    match reference.kind {
	BundleObjectKind::Secret => BundledObject::Secret(Secret{
	    metadata: meta(reference),
	    data: Some(BTreeMap::from([(String::from("tls.crt"), ByteString(reference.name.as_bytes().to_vec()))])),
	    ..Default::default()
	}),
	BundleObjectKind::ConfigMap => BundledObject::ConfigMap(ConfigMap{
	    metadata: meta(reference),
	    data: Some(BTreeMap::from([(String::from("path-mapping.yaml"), String::from("[]"))])),
	    ..Default::default()
	}),
	BundleObjectKind::Service => BundledObject::Service(Service{
	    metadata: meta(reference),
	    spec: Some(ServiceSpec::default()),
	    ..Default::default()
	}),
	BundleObjectKind::Deployment => BundledObject::Deployment(Deployment{
	    metadata: meta(reference),
	    spec: Some(DeploymentSpec{ replicas: Some(1), ..Default::default() }),
	    ..Default::default()
	}),
    }
}

impl FakeStore {

    pub fn new() -> Self {
	Self::default()
    }

    pub fn add_root_shard(&self, rs: api::RootShard) {
	let k = key(rs.metadata.namespace.as_deref().unwrap_or_default(), rs.metadata.name.as_deref().unwrap_or_default());
	self.root_shards.lock().unwrap().insert(k, rs);
    }

    pub fn add_shard(&self, shard: api::Shard) {
	let k = key(shard.metadata.namespace.as_deref().unwrap_or_default(), shard.metadata.name.as_deref().unwrap_or_default());
	self.shards.lock().unwrap().insert(k, shard);
    }

    pub fn add_front_proxy(&self, fp: api::FrontProxy) {
	let k = key(fp.metadata.namespace.as_deref().unwrap_or_default(), fp.metadata.name.as_deref().unwrap_or_default());
	self.front_proxies.lock().unwrap().insert(k, fp);
    }

    pub fn add_bundle(&self, bundle: api::Bundle) {
	let k = key(bundle.metadata.namespace.as_deref().unwrap_or_default(), bundle.metadata.name.as_deref().unwrap_or_default());
	self.bundles.lock().unwrap().insert(k, bundle);
    }

    pub fn add_object(&self, reference: &BundleObjectRef, object: BundledObject) {
	self.objects.lock().unwrap().insert(reference.clone(), object);
    }

    /* Materializes every referenced object with sample content */
    pub fn fill(&self, references: &[BundleObjectRef]) {
	for reference in references {
	    self.add_object(reference, sample_object(reference));
	}
    }

    pub fn remove_object(&self, reference: &BundleObjectRef) {
	self.objects.lock().unwrap().remove(reference);
    }

    /* Lookups of this object fail with an I/O-like error */
    pub fn fail_object(&self, reference: &BundleObjectRef) {
	self.failing.lock().unwrap().insert(reference.clone());
    }

    fn lookup(&self, kind: BundleObjectKind, namespace: &str, name: &str) -> Result<Option<BundledObject>, Error> {
	let reference = BundleObjectRef::new(kind, namespace, name);
	if self.failing.lock().unwrap().contains(&reference) {
	    return Err(Error::Timeout(format!("lookup of {} timed out", reference)));
	}
	Ok(self.objects.lock().unwrap().get(&reference).cloned())
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_root_shard(&self, namespace: &str, name: &str) -> Result<Option<api::RootShard>, Error> {
	Ok(self.root_shards.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_shard(&self, namespace: &str, name: &str) -> Result<Option<api::Shard>, Error> {
	Ok(self.shards.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_front_proxy(&self, namespace: &str, name: &str) -> Result<Option<api::FrontProxy>, Error> {
	Ok(self.front_proxies.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_bundle(&self, namespace: &str, name: &str) -> Result<Option<api::Bundle>, Error> {
	Ok(self.bundles.lock().unwrap().get(&key(namespace, name)).cloned())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
	match self.lookup(BundleObjectKind::Secret, namespace, name)? {
	    Some(BundledObject::Secret(secret)) => Ok(Some(secret)),
	    _ => Ok(None),
	}
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, Error> {
	match self.lookup(BundleObjectKind::Deployment, namespace, name)? {
	    Some(BundledObject::Deployment(deployment)) => Ok(Some(deployment)),
	    _ => Ok(None),
	}
    }

    async fn get_object(&self, kind: BundleObjectKind, namespace: &str, name: &str) -> Result<Option<BundledObject>, Error> {
	self.lookup(kind, namespace, name)
    }
}
