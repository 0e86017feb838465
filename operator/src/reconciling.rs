/*
 * Idempotent create-or-update of derived objects.
 *
 * Every derived object is described by a mutate function that receives the
 * current object (or an empty one carrying only name/namespace) and returns
 * the object that should exist. Fields the function does not touch keep
 * their current value, so the result is compared as a whole and no write is
 * issued when nothing changed.
 */
use crate::errors::Error;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Resource;
use kube::ResourceExt;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::api::PostParams as KubePostParams;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/* Attempts before giving up on an object that keeps changing under us */
const MAX_CONFLICT_RETRIES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, PartialEq)]
pub enum Plan<K> {
    Create(K),
    Update(K),
    Nothing,
}

/*
 * Computes the write needed to converge `existing` to what `mutate` wants.
 * The mutate function must be deterministic: it is re-run on every retry.
 */
pub fn plan<K, F>(existing: Option<&K>, namespace: &str, name: &str, mutate: F) -> Plan<K>
where
    K: Resource + Default + Clone + PartialEq,
    F: Fn(K) -> K,
{
    match existing {
	None => {
	    let mut empty = K::default();
	    empty.meta_mut().name = Some(name.to_string());
	    empty.meta_mut().namespace = Some(namespace.to_string());

	    let mut desired = mutate(empty);
	    desired.meta_mut().name = Some(name.to_string());
	    desired.meta_mut().namespace = Some(namespace.to_string());
	    Plan::Create(desired)
	},
	Some(existing) => {
	    let mut desired = mutate(existing.clone());
	    /* identity and concurrency fields always come from the live object */
	    desired.meta_mut().name = existing.meta().name.clone();
	    desired.meta_mut().namespace = existing.meta().namespace.clone();
	    desired.meta_mut().resource_version = existing.meta().resource_version.clone();

	    if &desired == existing {
		Plan::Nothing
	    } else {
		Plan::Update(desired)
	    }
	},
    }
}

/*
 * Creates or updates the named object. Writes are conditional on the
 * resource version read just before, a conflict re-reads and re-plans.
 */
pub async fn reconcile<K, F>(kube_client: &KubeClient, namespace: &str, name: &str, mutate: F) -> Result<Applied, Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Default + Clone + PartialEq + Serialize + DeserializeOwned + Debug,
    K::DynamicType: Default,
    F: Fn(K) -> K,
{
    let api: KubeApi<K> = KubeApi::namespaced(kube_client.clone(), namespace);
    let kind = K::kind(&K::DynamicType::default()).to_string();
    let mut attempt = 0;

    loop {
	attempt += 1;
	let existing = api.get_opt(name).await?;

	let result = match plan(existing.as_ref(), namespace, name, &mutate) {
	    Plan::Nothing => return Ok(Applied::Unchanged),
	    Plan::Create(desired) => {
		log::debug!("Creating {} {}/{}", kind, namespace, name);
		api.create(&KubePostParams::default(), &desired).await.map(|_| Applied::Created)
	    },
	    Plan::Update(desired) => {
		log::debug!("Updating {} {}/{}", kind, namespace, name);
		api.replace(name, &KubePostParams::default(), &desired).await.map(|_| Applied::Updated)
	    },
	};

	match result.map_err(Error::from) {
	    Ok(applied) => return Ok(applied),
	    Err(err) if err.is_conflict() && attempt < MAX_CONFLICT_RETRIES => {
		log::debug!("Conflict writing {} {}/{}, retrying", kind, namespace, name);
	    },
	    Err(err) => return Err(err),
	}
    }
}

/*
 * Adds or refreshes an owner reference, identified by the owner's uid.
 * Other owner references are left alone.
 */
pub fn ensure_owner_ref(meta: &mut ObjectMeta, owner: OwnerReference) {
    let owners = meta.owner_references.get_or_insert_with(Vec::new);

    match owners.iter_mut().find(|o| o.uid == owner.uid) {
	Some(existing) => *existing = owner,
	None => owners.push(owner),
    }
}

/* Controller owner reference of a resource, used for exclusively owned objects */
pub fn controller_ref<O>(owner: &O) -> Result<OwnerReference, Error>
where
    O: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
	Error::MissingData(format!("{} has no uid yet", O::kind(&())))
    })
}

/* Plain owner reference, for objects that only follow their parent's lifetime */
pub fn owner_ref<O>(owner: &O) -> Result<OwnerReference, Error>
where
    O: Resource<DynamicType = ()>,
{
    owner.owner_ref(&()).ok_or_else(|| {
	Error::MissingData(format!("{} has no uid yet", O::kind(&())))
    })
}

/*
 * Links a resource to the parent it was resolved against, so that removing
 * the parent garbage-collects the resource as well.
 */
pub async fn link_to_parent<K, P>(api: &KubeApi<K>, obj: &K, parent: &P) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    P: Resource<DynamicType = ()>,
{
    let owner = owner_ref(parent)?;
    if obj.owner_references().iter().any(|o| o.uid == owner.uid) {
	return Ok(());
    }

    let mut owners = obj.owner_references().to_vec();
    owners.push(owner);
    let patch = serde_json::json!({
	"metadata": {
	    "ownerReferences": owners,
	    "resourceVersion": obj.resource_version(),
	}
    });

    log::debug!("Linking {} to its parent {}", obj.name_any(), P::kind(&()));
    api.patch(&obj.name_any(), &KubePatchParams::default(), &KubePatch::Merge(&patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::Secret;
    use std::collections::BTreeMap;

    fn with_key(mut secret: Secret) -> Secret {
	secret.data = Some(BTreeMap::from([(String::from("tls.crt"), ByteString(b"ca".to_vec()))]));
	secret
    }

    #[test]
    fn absent_object_is_created_with_identity() {
	match plan(None, "ns", "r1-merged-ca-bundle", with_key) {
	    Plan::Create(secret) => {
		assert_eq!(secret.metadata.name.as_deref(), Some("r1-merged-ca-bundle"));
		assert_eq!(secret.metadata.namespace.as_deref(), Some("ns"));
		assert!(secret.data.is_some());
	    },
	    other => panic!("unexpected plan {:?}", other),
	}
    }

    #[test]
    fn converged_object_is_not_written() {
	let mut live = with_key(Secret::default());
	live.metadata.name = Some("x".into());
	live.metadata.namespace = Some("ns".into());
	live.metadata.resource_version = Some("7".into());

	assert_eq!(plan(Some(&live), "ns", "x", with_key), Plan::Nothing);
    }

    #[test]
    fn update_keeps_unrelated_fields_and_resource_version() {
	let mut live = Secret::default();
	live.metadata.name = Some("x".into());
	live.metadata.namespace = Some("ns".into());
	live.metadata.resource_version = Some("7".into());
	live.metadata.labels = Some(BTreeMap::from([(String::from("team"), String::from("a"))]));

	match plan(Some(&live), "ns", "x", with_key) {
	    Plan::Update(secret) => {
		assert_eq!(secret.metadata.resource_version.as_deref(), Some("7"));
		assert_eq!(secret.metadata.labels, live.metadata.labels);
		assert!(secret.data.is_some());
	    },
	    other => panic!("unexpected plan {:?}", other),
	}
    }

    #[test]
    fn owner_refs_are_deduplicated_by_uid() {
	let mut meta = ObjectMeta::default();
	let owner = OwnerReference{ kind: "RootShard".into(), name: "r1".into(), uid: "u1".into(), ..Default::default() };

	ensure_owner_ref(&mut meta, owner.clone());
	ensure_owner_ref(&mut meta, OwnerReference{ controller: Some(true), ..owner });

	let owners = meta.owner_references.unwrap();
	assert_eq!(owners.len(), 1);
	assert_eq!(owners[0].controller, Some(true));
    }
}
