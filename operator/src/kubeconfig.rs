/*
 * Kubeconfig controller: issues a client certificate for the requested
 * user, packages it into a kubeconfig file for the resolved target and,
 * when asked for, binds cluster roles to the user inside kcp.
 */
use crate::conditions;
use crate::context::{self, Context};
use crate::credentials::{self, KubeconfigDocument};
use crate::dependency::{self, ResolvedTarget};
use crate::errors::Error;
use crate::finalizer;
use crate::index;
use crate::naming::Authority;
use crate::pki;
use crate::reconciling::{self, controller_ref, ensure_owner_ref, link_to_parent};
use crate::remote::{self, RemoteConnector};
use crate::store::ObjectStore;
use crate::workload;
use kcp_operator_api as api;
use api::certmanager::Certificate;
use api::{Condition, ConditionStatus, KubeconfigStatus};

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use kube::Api as KubeApi;
use kube::ResourceExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use std::future::Future;
use std::sync::Arc;

const KIND: &str = "Kubeconfig";

/* Logical cluster the RBAC bindings should live in, if any */
fn wanted_rbac_cluster(kubeconfig: &api::Kubeconfig) -> Option<&str> {
    kubeconfig.spec.authorization.as_ref().map(|a| a.cluster_role_bindings.cluster.as_str())
}

/*
 * The cluster bindings were last written to, when it is no longer the
 * wanted one (or now lives behind another RootShard) and has to be emptied.
 */
fn stale_rbac_cluster(kubeconfig: &api::Kubeconfig, status: &KubeconfigStatus, root: &str) -> Option<String> {
    let moved = status.rbac_root_shard.as_deref().map_or(false, |old| old != root);

    match (status.rbac_cluster.as_deref(), wanted_rbac_cluster(kubeconfig)) {
	(Some(old), Some(new)) if old == new && !moved => None,
	(old, _) => old.map(String::from),
    }
}

/*
 * Empties `cluster` in the installation of RootShard `root`. The RootShard
 * is looked up by name, independent of whether the target still resolves.
 */
async fn cleanup_rbac(store: &dyn ObjectStore, connector: &dyn RemoteConnector, namespace: &str, root: Option<&str>, cluster: Option<&str>, selector: &str) -> Result<(), Error> {
    let cluster = match cluster {
	Some(cluster) => cluster,
	None => return Ok(()),
    };
    let root = match workload::cleanup_root_shard(store, namespace, root).await? {
	Some(root) => root,
	None => {
	    log::debug!("RootShard of {} is gone, skipping RBAC cleanup", selector);
	    return Ok(());
	},
    };

    let admin = workload::cleanup_admin(store, connector, &root, cluster).await?;
    remote::cleanup_bindings(admin.as_ref(), selector).await
}

/* RootShard holding the bindings: the recorded one, else the target's */
fn rbac_root_shard(status: &KubeconfigStatus, target: Option<&ResolvedTarget>) -> Option<String> {
    status.rbac_root_shard.clone().or_else(|| target.map(|t| t.root_shard().name_any()))
}

/* Target credentials are issued for: none while unresolved or deleting */
fn issuance_target(target: Option<&ResolvedTarget>, deleting: bool) -> Option<&ResolvedTarget> {
    target.filter(|_| !deleting)
}

async fn link_to_target(kubeconfigs: &KubeApi<api::Kubeconfig>, kubeconfig: &api::Kubeconfig, target: &ResolvedTarget) -> Result<(), Error> {
    match target {
	ResolvedTarget::RootShard(root) => link_to_parent(kubeconfigs, kubeconfig, root).await,
	ResolvedTarget::Shard(shard, _) => link_to_parent(kubeconfigs, kubeconfig, shard).await,
	ResolvedTarget::FrontProxy(fp, _) => link_to_parent(kubeconfigs, kubeconfig, fp).await,
    }
}

/*
 * Certificate and kubeconfig secret. Returns the Ready condition, False
 * while the certificate is still being issued.
 */
async fn reconcile_credentials(ctx: &Context, kubeconfig: &api::Kubeconfig, target: &ResolvedTarget) -> Result<Condition, Error> {
    let namespace = kubeconfig.namespace().unwrap_or_default();
    let root = target.root_shard();
    let owner = controller_ref(kubeconfig)?;

    let request = pki::kubeconfig_certificate(kubeconfig, root);
    reconciling::reconcile(&ctx.kube_client, &namespace, &request.name, |certificate: Certificate| {
	let mut certificate = request.apply(certificate);
	ensure_owner_ref(&mut certificate.metadata, owner.clone());
	certificate
    }).await?;

    let ca_secret = Authority::Server.secret_name(root);
    let credential = match credentials::load(ctx.store.as_ref(), &namespace, &request.spec.secret_name, &ca_secret).await? {
	Some(credential) => credential,
	None => {
	    let message = format!("waiting for certificate {} to be issued", request.name);
	    return Ok(Condition::new(api::CONDITION_READY, ConditionStatus::False, api::REASON_CREDENTIALS_PENDING, &message));
	},
    };

    let document = KubeconfigDocument::new(&target.name(), &target.server_url(), &kubeconfig.spec.username, &credential);
    let data = document.secret_data()?;
    reconciling::reconcile(&ctx.kube_client, &namespace, &kubeconfig.spec.secret_ref.name, |mut secret: KubeSecret| {
	secret.data = Some(data.clone());
	ensure_owner_ref(&mut secret.metadata, owner.clone());
	secret
    }).await?;

    let message = format!("kubeconfig for {} written to {}", target.display_name(), kubeconfig.spec.secret_ref.name);
    Ok(Condition::new(api::CONDITION_READY, ConditionStatus::True, api::REASON_KUBECONFIG_READY, &message))
}

/* Converges the remote bindings; a moved cluster is emptied first */
async fn reconcile_rbac(ctx: &Context, kubeconfig: &api::Kubeconfig, root: &api::RootShard, status: &mut KubeconfigStatus) -> Result<(), Error> {
    let namespace = kubeconfig.namespace().unwrap_or_default();
    let selector = remote::kubeconfig_selector(&namespace, &kubeconfig.name_any());
    let root_name = root.name_any();

    if let Some(stale) = stale_rbac_cluster(kubeconfig, status, &root_name) {
	let stale_root = status.rbac_root_shard.clone().unwrap_or_else(|| root_name.clone());
	cleanup_rbac(ctx.store.as_ref(), ctx.remote.as_ref(), &namespace, Some(stale_root.as_str()), Some(stale.as_str()), &selector).await?;
	status.rbac_cluster = None;
	status.rbac_root_shard = None;
    }

    let cluster = match wanted_rbac_cluster(kubeconfig) {
	Some(cluster) => cluster,
	None => return Ok(()),
    };
    if !workload::remote_reachable(ctx.store.as_ref(), Some(root)).await? {
	return Err(Error::MissingData(format!("operator credential of RootShard {} not issued yet", root.name_any())));
    }

    let admin = ctx.remote.connect(root, &workload::root_shard_url(root), cluster).await?;
    /* recorded before writing, so a partial sync is still cleaned up */
    status.rbac_cluster = Some(cluster.to_string());
    status.rbac_root_shard = Some(root_name);
    remote::sync_bindings(admin.as_ref(), remote::desired_bindings(kubeconfig), &selector).await
}

async fn reconcile(kubeconfig: Arc<api::Kubeconfig>, ctx: Arc<Context>) -> Result<KubeAction, Error> {
    let name = kubeconfig.name_any();
    let namespace = kubeconfig.namespace().unwrap_or_default();
    log::debug!("Reconciling Kubeconfig {}/{}", namespace, name);
    ctx.metrics.reconcile_started(KIND, &name);

    let kubeconfigs: KubeApi<api::Kubeconfig> = ctx.api(&namespace);
    let deleting = kubeconfig.metadata.deletion_timestamp.is_some();
    let generation = kubeconfig.metadata.generation;
    let mut status = kubeconfig.status.clone().unwrap_or_default();
    let mut errors = vec![];
    let mut pending = false;

    let target = match dependency::resolve_target(ctx.store.as_ref(), &namespace, &kubeconfig.spec.target).await {
	Ok((reference, target)) => {
	    conditions::update(&mut status.conditions, reference.with_generation(generation));
	    target
	},
	Err(err) => {
	    let invalid = Condition::new(api::CONDITION_REFERENCE_VALID, ConditionStatus::False, api::REASON_TARGET_INVALID, &err.to_string());
	    conditions::update(&mut status.conditions, invalid.with_generation(generation));
	    errors.push(err);
	    None
	},
    };
    status.target_name = target.as_ref().map(|t| t.display_name()).or(status.target_name);

    /* bindings exist as long as the status says so, whatever the spec says now */
    let selector = remote::kubeconfig_selector(&namespace, &name);
    let has_rbac = wanted_rbac_cluster(&kubeconfig).is_some() || status.rbac_cluster.is_some();
    let cleanup_root = rbac_root_shard(&status, target.as_ref());
    let cleanup_cluster = status.rbac_cluster.clone();

    let state = finalizer::drive(&kubeconfigs, kubeconfig.as_ref(), api::KUBECONFIG_RBAC_FINALIZER, has_rbac, || {
	cleanup_rbac(ctx.store.as_ref(), ctx.remote.as_ref(), &namespace, cleanup_root.as_deref(), cleanup_cluster.as_deref(), &selector)
    }).await;
    match state {
	Ok(finalizer::FinalizerState::Removed) | Ok(finalizer::FinalizerState::NoFinalizer) => {
	    if !has_rbac || deleting {
		status.rbac_cluster = None;
		status.rbac_root_shard = None;
	    }
	},
	Ok(_) => {},
	Err(err) => errors.push(err),
    }

    if let Some(target) = issuance_target(target.as_ref(), deleting) {
	if let Err(err) = link_to_target(&kubeconfigs, &kubeconfig, target).await {
	    errors.push(err);
	}

	match reconcile_credentials(&ctx, &kubeconfig, target).await {
	    Ok(ready) => {
		pending |= !ready.is_true();
		conditions::update(&mut status.conditions, ready.with_generation(generation));
	    },
	    Err(err) => {
		let failed = Condition::new(api::CONDITION_READY, ConditionStatus::False, api::REASON_CREDENTIALS_PENDING, &err.to_string());
		conditions::update(&mut status.conditions, failed.with_generation(generation));
		errors.push(err);
	    },
	}

	if has_rbac {
	    let synced = match reconcile_rbac(&ctx, &kubeconfig, target.root_shard(), &mut status).await {
		Ok(()) => Condition::new(api::CONDITION_RBAC_SYNCED, ConditionStatus::True, api::REASON_RBAC_SYNCED, "cluster role bindings are in sync"),
		Err(err) => {
		    let failed = Condition::new(api::CONDITION_RBAC_SYNCED, ConditionStatus::False, api::REASON_RBAC_FAILED, &err.to_string());
		    errors.push(err);
		    failed
		},
	    };
	    conditions::update(&mut status.conditions, synced.with_generation(generation));
	}
	if wanted_rbac_cluster(&kubeconfig).is_none() {
	    conditions::remove(&mut status.conditions, api::CONDITION_RBAC_SYNCED);
	}
    } else if target.is_none() && !deleting {
	let waiting = Condition::new(api::CONDITION_READY, ConditionStatus::False, api::REASON_TARGET_NOT_FOUND, "target is not available");
	conditions::update(&mut status.conditions, waiting.with_generation(generation));
    }

    status.phase = Some(conditions::kubeconfig_phase(&status.conditions, deleting));

    if let Err(err) = ctx.write_status(kubeconfig.as_ref(), kubeconfig.status.as_ref(), &status).await {
	errors.push(err);
    }
    Error::aggregate(errors)?;

    if pending {
	Ok(ctx.requeue())
    } else {
	Ok(KubeAction::await_change())
    }
}

/*
 * KubeconfigMgr runs the Kubeconfig controller. A Kubeconfig follows its
 * target: a change to any RootShard, Shard or FrontProxy re-triggers the
 * Kubeconfigs pointing at it.
 */
pub struct KubeconfigMgr {
    ctx: Arc<Context>,
}

impl KubeconfigMgr {

    pub fn new(ctx: Arc<Context>) -> Self {
	Self{ ctx: ctx }
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = self.ctx.clone();
	let controller = KubeController::new(ctx.watched_api::<api::Kubeconfig>(), ctx.watcher_config());
	let store = controller.store();

	controller
	    .owns(ctx.watched_api::<Certificate>(), ctx.watcher_config())
	    .owns(ctx.watched_api::<KubeSecret>(), ctx.watcher_config())
	    .watches(ctx.watched_api::<api::RootShard>(), ctx.watcher_config(), index::mapper::<api::RootShard, api::Kubeconfig>(store.clone()))
	    .watches(ctx.watched_api::<api::Shard>(), ctx.watcher_config(), index::mapper::<api::Shard, api::Kubeconfig>(store.clone()))
	    .watches(ctx.watched_api::<api::FrontProxy>(), ctx.watcher_config(), index::mapper::<api::FrontProxy, api::Kubeconfig>(store))
	    .shutdown_on_signal()
	    .run(reconcile, context::error_policy, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconciled Kubeconfig {}", obj.name),
		    Err(err) => log::error!("Failed to reconcile Kubeconfig: {:?}", err),
		}
	    })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::object::{BundleObjectKind, BundleObjectRef};
    use crate::remote::{MockRemoteAdmin, MockRemoteConnector, RemoteAdmin};
    use crate::store::MockObjectStore;
    use crate::test_support::FakeStore;
    use api::kubeconfig::{ClusterRoleBindings, KubeconfigAuthorization};
    use api::{FrontProxy, FrontProxySpec, KubeconfigSpec, ObjectReference, RootShard, RootShardConfig, RootShardSpec, TargetReference};
    use chrono::Utc;
    use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

    fn kubeconfig(cluster: Option<&str>) -> api::Kubeconfig {
	let mut kc = api::Kubeconfig::new("k1", KubeconfigSpec{
	    username: "alice".into(),
	    secret_ref: ObjectReference::new("k1-kubeconfig"),
	    authorization: cluster.map(|c| KubeconfigAuthorization{
		cluster_role_bindings: ClusterRoleBindings{ cluster: c.into(), cluster_roles: vec!["cluster-admin".into()] },
	    }),
	    ..Default::default()
	});
	kc.metadata.namespace = Some("ns".into());
	kc
    }

    fn status(cluster: Option<&str>) -> KubeconfigStatus {
	KubeconfigStatus{ rbac_cluster: cluster.map(String::from), ..Default::default() }
    }

    fn status_in(root: &str, cluster: &str) -> KubeconfigStatus {
	KubeconfigStatus{ rbac_root_shard: Some(root.into()), ..status(Some(cluster)) }
    }

    fn root_shard(deleting: bool) -> RootShard {
	let mut root = RootShard::new("r1", RootShardSpec::default());
	root.metadata.namespace = Some("ns".into());
	root.metadata.deletion_timestamp = deleting.then(|| Time(Utc::now()));
	root
    }

    fn operator_credential() -> BundleObjectRef {
	BundleObjectRef::new(BundleObjectKind::Secret, "ns", "r1-operator-client")
    }

    fn binding(name: &str) -> ClusterRoleBinding {
	ClusterRoleBinding{
	    metadata: ObjectMeta{ name: Some(name.into()), ..Default::default() },
	    ..Default::default()
	}
    }

    fn no_connect() -> MockRemoteConnector {
	let mut connector = MockRemoteConnector::new();
	connector.expect_connect().never();
	connector
    }

    #[test]
    fn unchanged_cluster_is_not_stale() {
	assert_eq!(stale_rbac_cluster(&kubeconfig(Some("root:team")), &status_in("r1", "root:team"), "r1"), None);
	assert_eq!(stale_rbac_cluster(&kubeconfig(Some("root:team")), &status(Some("root:team")), "r1"), None);
	assert_eq!(stale_rbac_cluster(&kubeconfig(Some("root:team")), &status(None), "r1"), None);
	assert_eq!(stale_rbac_cluster(&kubeconfig(None), &status(None), "r1"), None);
    }

    #[test]
    fn moved_or_dropped_cluster_is_stale() {
	assert_eq!(stale_rbac_cluster(&kubeconfig(Some("root:new")), &status(Some("root:old")), "r1").as_deref(), Some("root:old"));
	assert_eq!(stale_rbac_cluster(&kubeconfig(None), &status(Some("root:old")), "r1").as_deref(), Some("root:old"));
    }

    #[test]
    fn cluster_behind_another_root_shard_is_stale() {
	assert_eq!(stale_rbac_cluster(&kubeconfig(Some("root:team")), &status_in("r0", "root:team"), "r1").as_deref(), Some("root:team"));
    }

    #[test]
    fn recorded_root_shard_outlives_the_target() {
	assert_eq!(rbac_root_shard(&status_in("r1", "root:team"), None).as_deref(), Some("r1"));
	assert_eq!(rbac_root_shard(&status(None), None), None);

	let target = ResolvedTarget::RootShard(root_shard(false));
	assert_eq!(rbac_root_shard(&status(None), Some(&target)).as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn unresolved_front_proxy_root_blocks_issuance() {
	let mut store = MockObjectStore::new();
	store.expect_get_front_proxy().returning(|_, name| {
	    Ok(Some(FrontProxy::new(name, FrontProxySpec{
		root_shard: RootShardConfig{ reference: Some(ObjectReference::new("gone")) },
		..Default::default()
	    })))
	});
	store.expect_get_root_shard().returning(|_, _| Ok(None));

	let mut kc = kubeconfig(None);
	kc.spec.target = TargetReference{ front_proxy_ref: Some(ObjectReference::new("fp1")), ..Default::default() };

	let (_, target) = dependency::resolve_target(&store, "ns", &kc.spec.target).await.unwrap();
	assert!(issuance_target(target.as_ref(), false).is_none());

	let resolved = ResolvedTarget::RootShard(root_shard(false));
	assert!(issuance_target(Some(&resolved), false).is_some());
	assert!(issuance_target(Some(&resolved), true).is_none());
    }

    #[tokio::test]
    async fn cleanup_reaches_live_root_shard_after_target_is_gone() {
	let store = FakeStore::new();
	store.add_root_shard(root_shard(false));
	store.fill(&[operator_credential()]);

	/* the Shard the Kubeconfig pointed at no longer exists */
	let mut kc = kubeconfig(Some("root:team"));
	kc.spec.target = TargetReference{ shard_ref: Some(ObjectReference::new("s1")), ..Default::default() };
	let (_, target) = dependency::resolve_target(&store, "ns", &kc.spec.target).await.unwrap();
	assert!(target.is_none());

	let mut admin = MockRemoteAdmin::new();
	admin.expect_list_cluster_role_bindings()
	    .withf(|selector| selector == "operator.kcp.io/kubeconfig=ns.k1")
	    .returning(|_| Ok(vec![binding("kubeconfig:ns:k1:cluster-admin")]));
	admin.expect_delete_cluster_role_binding()
	    .withf(|name| name == "kubeconfig:ns:k1:cluster-admin")
	    .times(1)
	    .returning(|_| Ok(()));
	let admin: Arc<dyn RemoteAdmin> = Arc::new(admin);

	let mut connector = MockRemoteConnector::new();
	connector.expect_connect()
	    .withf(|root, _, cluster| root.name_any() == "r1" && cluster == "root:team")
	    .times(1)
	    .returning(move |_, _, _| Ok(admin.clone()));

	let root = rbac_root_shard(&status_in("r1", "root:team"), target.as_ref());
	let selector = remote::kubeconfig_selector("ns", "k1");
	cleanup_rbac(&store, &connector, "ns", root.as_deref(), Some("root:team"), &selector).await.unwrap();
    }

    #[tokio::test]
    async fn failed_root_shard_lookup_keeps_the_finalizer() {
	let mut store = MockObjectStore::new();
	store.expect_get_root_shard().returning(|_, _| Err(Error::Timeout(String::from("apiserver unreachable"))));

	let selector = remote::kubeconfig_selector("ns", "k1");
	let err = cleanup_rbac(&store, &no_connect(), "ns", Some("r1"), Some("root:team"), &selector).await.unwrap_err();
	assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn live_root_shard_without_credential_keeps_the_finalizer() {
	let store = FakeStore::new();
	store.add_root_shard(root_shard(false));

	let selector = remote::kubeconfig_selector("ns", "k1");
	let err = cleanup_rbac(&store, &no_connect(), "ns", Some("r1"), Some("root:team"), &selector).await.unwrap_err();
	assert!(matches!(err, Error::MissingData(_)));
    }

    #[tokio::test]
    async fn gone_or_deleting_root_shard_skips_cleanup() {
	let selector = remote::kubeconfig_selector("ns", "k1");

	let store = FakeStore::new();
	cleanup_rbac(&store, &no_connect(), "ns", Some("r1"), Some("root:team"), &selector).await.unwrap();

	store.add_root_shard(root_shard(true));
	store.fill(&[operator_credential()]);
	cleanup_rbac(&store, &no_connect(), "ns", Some("r1"), Some("root:team"), &selector).await.unwrap();
    }
}
