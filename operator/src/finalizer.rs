/*
 * Finalizer handling for resources that own state outside the local
 * cluster.
 *
 * The finalizer moves forward only:
 *
 *   NoFinalizer -> FinalizerPresent -> CleanupInFlight -> Removed
 *
 * Cleanup side effects only ever run while the finalizer is still present,
 * and the finalizer is removed only after cleanup succeeded.
 */
use crate::errors::Error;

use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api as KubeApi;
use kube::Resource;
use kube::ResourceExt;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalizerState {
    NoFinalizer,
    FinalizerPresent,
    CleanupInFlight,
    Removed,
}

impl FinalizerState {
    pub fn observe(meta: &ObjectMeta, finalizer: &str) -> Self {
	let present = meta.finalizers.as_ref().map_or(false, |f| f.iter().any(|x| x == finalizer));
	let deleting = meta.deletion_timestamp.is_some();

	match (present, deleting) {
	    (false, false) => FinalizerState::NoFinalizer,
	    (true, false) => FinalizerState::FinalizerPresent,
	    (true, true) => FinalizerState::CleanupInFlight,
	    (false, true) => FinalizerState::Removed,
	}
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    AddFinalizer,
    /* run cleanup, then drop the finalizer */
    Cleanup,
    Nothing,
}

/*
 * `wanted` tells whether the resource currently has external state at all.
 * A live resource that stops wanting it is cleaned up like a deleted one.
 */
pub fn next_step(state: FinalizerState, wanted: bool) -> Step {
    match state {
	FinalizerState::NoFinalizer if wanted => Step::AddFinalizer,
	FinalizerState::FinalizerPresent if !wanted => Step::Cleanup,
	FinalizerState::CleanupInFlight => Step::Cleanup,
	_ => Step::Nothing,
    }
}

async fn patch_finalizers<K>(api: &KubeApi<K>, obj: &K, finalizers: Vec<String>) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    /* resourceVersion makes the patch conditional on what we observed */
    let patch = serde_json::json!({
	"metadata": {
	    "finalizers": finalizers,
	    "resourceVersion": obj.resource_version(),
	}
    });

    api.patch(&obj.name_any(), &KubePatchParams::default(), &KubePatch::Merge(&patch)).await?;
    Ok(())
}

pub async fn add<K>(api: &KubeApi<K>, obj: &K, finalizer: &str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    let mut finalizers = obj.finalizers().to_vec();
    if finalizers.iter().any(|f| f == finalizer) {
	return Ok(());
    }
    finalizers.push(finalizer.to_string());

    log::debug!("Adding finalizer {} to {}", finalizer, obj.name_any());
    patch_finalizers(api, obj, finalizers).await
}

pub async fn remove<K>(api: &KubeApi<K>, obj: &K, finalizer: &str) -> Result<(), Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
{
    let finalizers: Vec<String> = obj.finalizers().iter().filter(|f| *f != finalizer).cloned().collect();
    if finalizers.len() == obj.finalizers().len() {
	return Ok(());
    }

    log::debug!("Removing finalizer {} from {}", finalizer, obj.name_any());
    patch_finalizers(api, obj, finalizers).await
}

/*
 * Moves the finalizer one step forward and returns the state the object is
 * left in. A failing cleanup leaves the finalizer in place.
 */
pub async fn drive<K, C, Fut>(api: &KubeApi<K>, obj: &K, finalizer: &str, wanted: bool, cleanup: C) -> Result<FinalizerState, Error>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    C: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    let state = FinalizerState::observe(obj.meta(), finalizer);

    match next_step(state, wanted) {
	Step::Nothing => Ok(state),
	Step::AddFinalizer => {
	    add(api, obj, finalizer).await?;
	    Ok(FinalizerState::FinalizerPresent)
	},
	Step::Cleanup => {
	    cleanup().await?;
	    remove(api, obj, finalizer).await?;

	    if state == FinalizerState::CleanupInFlight {
		Ok(FinalizerState::Removed)
	    } else {
		Ok(FinalizerState::NoFinalizer)
	    }
	},
    }
}
