/*
 * Follows child -> parent references (Shard -> RootShard,
 * FrontProxy -> RootShard, Kubeconfig/Bundle -> one of the three) and
 * reports each hop as a ReferenceValid condition.
 */
use crate::errors::Error;
use crate::naming;
use crate::store::ObjectStore;
use kcp_operator_api as api;
use api::{Condition, ConditionStatus, ObjectReference, TargetKind, TargetReference};

use kube::ResourceExt;
use std::future::Future;

/*
 * Resolves one reference hop.
 *
 * An unset reference is reported as invalid without any lookup. A missing
 * object and a failed lookup are both reported as not found, carrying the
 * underlying error text. A None parent means "stop this pass": the watch on
 * the parent kind re-triggers reconciliation once it shows up.
 */
pub async fn fetch_parent<K, F, Fut>(reference: Option<&ObjectReference>, kind: &str, fetch: F) -> (Condition, Option<K>)
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<Option<K>, Error>>,
{
    let name = match reference {
	Some(r) if !r.name.is_empty() => r.name.clone(),
	_ => {
	    let message = format!("no valid {} reference set", kind);
	    return (invalid(api::REASON_REFERENCE_INVALID, &message), None);
	}
    };

    match fetch(name.clone()).await {
	Ok(Some(parent)) => {
	    let message = format!("{} {} found", kind, name);
	    (Condition::new(api::CONDITION_REFERENCE_VALID, ConditionStatus::True, api::REASON_REFERENCE_VALID, &message), Some(parent))
	},
	Ok(None) => {
	    let message = format!("{} {} not found", kind, name);
	    (invalid(api::REASON_REFERENCE_NOT_FOUND, &message), None)
	},
	Err(err) => {
	    let message = format!("failed to get {} {}: {}", kind, name, err);
	    (invalid(api::REASON_REFERENCE_NOT_FOUND, &message), None)
	},
    }
}

fn invalid(reason: &str, message: &str) -> Condition {
    Condition::new(api::CONDITION_REFERENCE_VALID, ConditionStatus::False, reason, message)
}

pub async fn resolve_root_shard(store: &dyn ObjectStore, namespace: &str, config: &api::RootShardConfig) -> (Condition, Option<api::RootShard>) {
    fetch_parent(config.reference.as_ref(), "RootShard", |name| async move {
	store.get_root_shard(namespace, &name).await
    }).await
}

/*
 * A resolved Kubeconfig/Bundle target, together with the RootShard it
 * belongs to.
 */
#[derive(Clone, Debug)]
pub enum ResolvedTarget {
    RootShard(api::RootShard),
    Shard(api::Shard, api::RootShard),
    FrontProxy(api::FrontProxy, api::RootShard),
}

impl ResolvedTarget {

    pub fn kind(&self) -> TargetKind {
	match self {
	    ResolvedTarget::RootShard(_) => TargetKind::RootShard,
	    ResolvedTarget::Shard(_, _) => TargetKind::Shard,
	    ResolvedTarget::FrontProxy(_, _) => TargetKind::FrontProxy,
	}
    }

    pub fn name(&self) -> String {
	match self {
	    ResolvedTarget::RootShard(rs) => rs.name_any(),
	    ResolvedTarget::Shard(shard, _) => shard.name_any(),
	    ResolvedTarget::FrontProxy(fp, _) => fp.name_any(),
	}
    }

    pub fn namespace(&self) -> String {
	match self {
	    ResolvedTarget::RootShard(rs) => rs.namespace(),
	    ResolvedTarget::Shard(shard, _) => shard.namespace(),
	    ResolvedTarget::FrontProxy(fp, _) => fp.namespace(),
	}.unwrap_or_default()
    }

    pub fn root_shard(&self) -> &api::RootShard {
	match self {
	    ResolvedTarget::RootShard(rs) => rs,
	    ResolvedTarget::Shard(_, rs) => rs,
	    ResolvedTarget::FrontProxy(_, rs) => rs,
	}
    }

    pub fn ca_bundle_secret_ref(&self) -> Option<&ObjectReference> {
	match self {
	    ResolvedTarget::RootShard(rs) => rs.spec.ca_bundle_secret_ref.as_ref(),
	    ResolvedTarget::Shard(shard, _) => shard.spec.ca_bundle_secret_ref.as_ref(),
	    ResolvedTarget::FrontProxy(fp, _) => fp.spec.ca_bundle_secret_ref.as_ref(),
	}
    }

    /*
     * The URL clients of this target connect to: the service of a
     * (root) shard, or the public address of the front-proxy.
     */
    pub fn server_url(&self) -> String {
	let root = self.root_shard();
	let namespace = self.namespace();

	match self {
	    ResolvedTarget::RootShard(_) => naming::service_url(&naming::root_shard_workload(&self.name()), &namespace, root.cluster_domain()),
	    ResolvedTarget::Shard(_, _) => naming::service_url(&naming::shard_workload(&self.name()), &namespace, root.cluster_domain()),
	    ResolvedTarget::FrontProxy(_, _) => root.external_url(),
	}
    }

    pub fn display_name(&self) -> String {
	format!("{}/{}", self.kind(), self.name())
    }
}

/*
 * Resolves a Kubeconfig/Bundle target reference, including the grandparent
 * RootShard of a Shard or FrontProxy target.
 *
 * Zero or several references set is an invariant violation and returned as
 * an error; every other failure is reported through the condition.
 */
pub async fn resolve_target(store: &dyn ObjectStore, namespace: &str, target: &TargetReference) -> Result<(Condition, Option<ResolvedTarget>), Error> {
    let (kind, name) = match target.single() {
	Some(single) => single,
	None => {
	    return Err(Error::InvalidSpec(String::from("exactly one of rootShardRef, shardRef or frontProxyRef must be set")));
	}
    };
    let reference = ObjectReference::new(name);

    let resolved = match kind {
	TargetKind::RootShard => {
	    let (cond, root) = fetch_parent(Some(&reference), "RootShard", |name| async move {
		store.get_root_shard(namespace, &name).await
	    }).await;
	    (cond, root.map(ResolvedTarget::RootShard))
	},
	TargetKind::Shard => {
	    let (cond, shard) = fetch_parent(Some(&reference), "Shard", |name| async move {
		store.get_shard(namespace, &name).await
	    }).await;
	    match shard {
		None => (cond, None),
		Some(shard) => {
		    let (cond, root) = resolve_root_shard(store, namespace, &shard.spec.root_shard).await;
		    (cond, root.map(|root| ResolvedTarget::Shard(shard, root)))
		},
	    }
	},
	TargetKind::FrontProxy => {
	    let (cond, fp) = fetch_parent(Some(&reference), "FrontProxy", |name| async move {
		store.get_front_proxy(namespace, &name).await
	    }).await;
	    match fp {
		None => (cond, None),
		Some(fp) => {
		    let (cond, root) = resolve_root_shard(store, namespace, &fp.spec.root_shard).await;
		    (cond, root.map(|root| ResolvedTarget::FrontProxy(fp, root)))
		},
	    }
	},
    };

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;
    use api::{FrontProxy, FrontProxySpec, RootShard, RootShardConfig, RootShardSpec};
    use std::cell::Cell;

    #[tokio::test]
    async fn unset_reference_is_invalid_without_lookup() {
	let called = Cell::new(false);
	let (cond, parent): (Condition, Option<RootShard>) = fetch_parent(None, "RootShard", |_| {
	    called.set(true);
	    async { Ok(None) }
	}).await;

	assert!(!called.get());
	assert!(parent.is_none());
	assert_eq!(cond.status, ConditionStatus::False);
	assert_eq!(cond.reason, api::REASON_REFERENCE_INVALID);
    }

    #[tokio::test]
    async fn fetch_error_is_reported_as_not_found() {
	let reference = ObjectReference::new("r1");
	let (cond, parent): (Condition, Option<RootShard>) = fetch_parent(Some(&reference), "RootShard", |_| async {
	    Err(Error::Timeout(String::from("apiserver unreachable")))
	}).await;

	assert!(parent.is_none());
	assert_eq!(cond.reason, api::REASON_REFERENCE_NOT_FOUND);
	assert!(cond.message.contains("apiserver unreachable"));
    }

    #[tokio::test]
    async fn found_parent_is_valid() {
	let reference = ObjectReference::new("r1");
	let (cond, parent) = fetch_parent(Some(&reference), "RootShard", |name| async move {
	    Ok(Some(RootShard::new(&name, RootShardSpec::default())))
	}).await;

	assert!(cond.is_true());
	assert_eq!(cond.reason, api::REASON_REFERENCE_VALID);
	assert_eq!(parent.unwrap().name_any(), "r1");
    }

    #[tokio::test]
    async fn front_proxy_target_with_missing_root_shard() {
	let mut store = MockObjectStore::new();
	store.expect_get_front_proxy()
	    .withf(|ns, name| ns == "ns" && name == "fp1")
	    .returning(|_, name| {
		let spec = FrontProxySpec{
		    root_shard: RootShardConfig{ reference: Some(ObjectReference::new("gone")) },
		    ..Default::default()
		};
		Ok(Some(FrontProxy::new(name, spec)))
	    });
	store.expect_get_root_shard()
	    .withf(|ns, name| ns == "ns" && name == "gone")
	    .returning(|_, _| Ok(None));

	let target = TargetReference{
	    front_proxy_ref: Some(ObjectReference::new("fp1")),
	    ..Default::default()
	};
	let (cond, resolved) = resolve_target(&store, "ns", &target).await.unwrap();

	assert!(resolved.is_none());
	assert_eq!(cond.type_, api::CONDITION_REFERENCE_VALID);
	assert_eq!(cond.status, ConditionStatus::False);
	assert_eq!(cond.reason, api::REASON_REFERENCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn ambiguous_target_is_an_invariant_violation() {
	let store = MockObjectStore::new();
	let target = TargetReference{
	    root_shard_ref: Some(ObjectReference::new("r1")),
	    shard_ref: Some(ObjectReference::new("s1")),
	    ..Default::default()
	};

	let err = resolve_target(&store, "ns", &target).await.unwrap_err();
	assert!(err.is_invalid_spec());
    }

    #[test]
    fn server_urls_depend_on_target_kind() {
	let mut root = RootShard::new("r1", RootShardSpec::default());
	root.metadata.namespace = Some("ns".into());
	root.spec.external.hostname = "kcp.example.com".into();
	root.spec.external.port = 443;

	let mut fp = FrontProxy::new("fp1", FrontProxySpec::default());
	fp.metadata.namespace = Some("ns".into());

	assert_eq!(ResolvedTarget::RootShard(root.clone()).server_url(), "https://r1-kcp.ns.svc.cluster.local:6443");
	assert_eq!(ResolvedTarget::FrontProxy(fp, root).server_url(), "https://kcp.example.com:443");
    }
}
