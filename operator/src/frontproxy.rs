use crate::conditions;
use crate::context::{self, Context};
use crate::credentials;
use crate::dependency;
use crate::errors::Error;
use crate::finalizer;
use crate::index;
use crate::naming;
use crate::naming::Authority;
use crate::pki;
use crate::reconciling::{controller_ref, link_to_parent};
use crate::remote::Access;
use crate::resources::{self, WorkloadTemplate};
use crate::workload;
use kcp_operator_api as api;
use api::certmanager::Certificate;
use api::Condition;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Api as KubeApi;
use kube::ResourceExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use std::future::Future;
use std::sync::Arc;

const KIND: &str = "FrontProxy";
const DYNAMIC_KUBECONFIG_USER: &str = "kcp-front-proxy";

pub fn template(fp: &api::FrontProxy, root: &api::RootShard) -> WorkloadTemplate {
    let name = fp.name_any();
    let client_ca = match fp.spec.ca_bundle_secret_ref {
	Some(_) => naming::merged_ca_bundle(&name),
	None => Authority::Client.secret_name(root),
    };

    let secrets = vec![
	(String::from("server"), naming::certificate(&name, naming::SERVER)),
	(String::from("requestheader"), naming::certificate(&name, naming::REQUESTHEADER)),
	(String::from("client"), naming::certificate(&name, naming::CLIENT)),
	(String::from("client-ca"), client_ca),
	(String::from("server-ca"), Authority::Server.secret_name(root)),
	(String::from("dynamic-kubeconfig"), naming::front_proxy_dynamic_kubeconfig(&name)),
    ];

    let args = vec![
	format!("--secure-port={}", naming::FRONT_PROXY_PORT),
	format!("--mapping-file={}", resources::config_path("path-mapping.yaml")),
	format!("--root-kubeconfig={}", resources::secret_path("dynamic-kubeconfig", credentials::KUBECONFIG_KEY)),
	format!("--shards-kubeconfig={}", resources::secret_path("dynamic-kubeconfig", credentials::KUBECONFIG_KEY)),
	format!("--tls-cert-file={}", resources::secret_path("server", credentials::TLS_CERT)),
	format!("--tls-private-key-file={}", resources::secret_path("server", credentials::TLS_KEY)),
	format!("--client-ca-file={}", resources::secret_path("client-ca", credentials::TLS_CERT)),
	String::from("--authentication-drop-groups=system:kcp:logical-cluster-admin"),
    ];

    WorkloadTemplate{
	name: naming::front_proxy_workload(&name),
	component: String::from("front-proxy"),
	instance: name.clone(),
	image: resources::image(fp.spec.image.as_ref()),
	command: vec![String::from("/kcp-front-proxy")],
	args: args,
	port: naming::FRONT_PROXY_PORT,
	secrets: secrets,
	config_map: Some(naming::front_proxy_config(&name)),
	replicas: fp.spec.replicas.unwrap_or(resources::DEFAULT_REPLICAS),
    }
}

/*
 * Everything the proxy runs on: certificates, path mapping, the dynamic
 * kubeconfig, the merged CA bundle and the workload itself. Returns the
 * Available condition and whether something is still being issued.
 */
async fn reconcile_children(ctx: &Context, fp: &api::FrontProxy, root: &api::RootShard, owner: &OwnerReference, errors: &mut Vec<Error>) -> (Condition, bool) {
    let name = fp.name_any();
    let namespace = fp.namespace().unwrap_or_default();
    let mut pending = false;

    workload::reconcile_certificates(ctx, &namespace, &pki::front_proxy_certificates(fp, root), owner, errors).await;

    if let Err(err) = workload::reconcile_config_map(ctx, &namespace, &naming::front_proxy_config(&name), root, owner).await {
	errors.push(err);
    }

    /* the proxy talks to the shards with its own client certificate */
    let root_url = workload::root_shard_url(root);
    let dynamic = workload::reconcile_kubeconfig_secret(
	ctx,
	&namespace,
	&naming::front_proxy_dynamic_kubeconfig(&name),
	&naming::certificate(&name, naming::CLIENT),
	root,
	&root_url,
	DYNAMIC_KUBECONFIG_USER,
	owner,
    ).await;
    match dynamic {
	Ok(waiting) => pending |= waiting,
	Err(err) => errors.push(err),
    }

    match workload::reconcile_merged_ca_bundle(ctx, &namespace, &name, root, fp.spec.ca_bundle_secret_ref.as_ref(), owner).await {
	Ok(waiting) => pending |= waiting,
	Err(err) => errors.push(err),
    }

    let deployment = workload::reconcile_workload(ctx, &namespace, &template(fp, root), &fp.metadata, owner, errors).await;
    (workload::available_condition(deployment.as_ref(), fp.metadata.generation), pending)
}

async fn reconcile(fp: Arc<api::FrontProxy>, ctx: Arc<Context>) -> Result<KubeAction, Error> {
    let name = fp.name_any();
    let namespace = fp.namespace().unwrap_or_default();
    log::debug!("Reconciling FrontProxy {}/{}", namespace, name);
    ctx.metrics.reconcile_started(KIND, &name);

    let proxies: KubeApi<api::FrontProxy> = ctx.api(&namespace);
    let deleting = fp.metadata.deletion_timestamp.is_some();
    let mut status = fp.status.clone().unwrap_or_default();
    let mut errors = vec![];
    let mut pending = false;

    let (reference, root) = dependency::resolve_root_shard(ctx.store.as_ref(), &namespace, &fp.spec.root_shard).await;
    conditions::update(&mut status.conditions, reference.with_generation(fp.metadata.generation));

    /* keyed on the configured RootShard, not on whether it resolved this pass */
    let root_name = workload::root_shard_name(&fp.spec.root_shard);
    let state = finalizer::drive(&proxies, fp.as_ref(), api::REMOTE_RBAC_FINALIZER, root_name.is_some(), || {
	workload::cleanup_remote_access(ctx.store.as_ref(), ctx.remote.as_ref(), root_name, Access::FrontProxy, &namespace, &name)
    }).await;
    if let Err(err) = state {
	errors.push(err);
    }

    if let (Some(root), false) = (root.as_ref(), deleting) {
	if let Err(err) = link_to_parent(&proxies, fp.as_ref(), root).await {
	    errors.push(err);
	}
	pending |= workload::provision_remote_access(&ctx, root, Access::FrontProxy, &namespace, &name, &mut errors).await;

	if let Some(owner) = Error::collect(controller_ref(fp.as_ref()), &mut errors) {
	    let (available, waiting) = reconcile_children(&ctx, &fp, root, &owner, &mut errors).await;
	    conditions::update(&mut status.conditions, available);
	    pending |= waiting;
	}
    }

    let bundle = workload::bundle_condition(ctx.store.as_ref(), &fp.metadata).await;
    pending |= bundle.as_ref().map_or(false, |c| !c.is_true());
    workload::finish_status(&mut status, bundle, deleting);

    if let Err(err) = ctx.write_status(fp.as_ref(), fp.status.as_ref(), &status).await {
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
 * FrontProxyMgr runs the FrontProxy controller
 */
pub struct FrontProxyMgr {
    ctx: Arc<Context>,
}

impl FrontProxyMgr {

    pub fn new(ctx: Arc<Context>) -> Self {
	Self{ ctx: ctx }
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = self.ctx.clone();
	let controller = KubeController::new(ctx.watched_api::<api::FrontProxy>(), ctx.watcher_config());
	let mapper = index::mapper::<api::RootShard, api::FrontProxy>(controller.store());

	controller
	    .owns(ctx.watched_api::<KubeDeployment>(), ctx.watcher_config())
	    .owns(ctx.watched_api::<Certificate>(), ctx.watcher_config())
	    .watches(ctx.watched_api::<api::RootShard>(), ctx.watcher_config(), mapper)
	    .shutdown_on_signal()
	    .run(reconcile, context::error_policy, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconciled FrontProxy {}", obj.name),
		    Err(err) => log::error!("Failed to reconcile FrontProxy: {:?}", err),
		}
	    })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{FrontProxySpec, ObjectReference, RootShardSpec};

    fn root_shard() -> api::RootShard {
	let mut root = api::RootShard::new("r1", RootShardSpec::default());
	root.metadata.namespace = Some("ns".into());
	root
    }

    #[test]
    fn front_proxy_mounts_its_routing_table() {
	let mut fp = api::FrontProxy::new("f1", FrontProxySpec::default());
	fp.metadata.namespace = Some("ns".into());

	let template = template(&fp, &root_shard());
	assert_eq!(template.name, "f1-front-proxy");
	assert_eq!(template.port, naming::FRONT_PROXY_PORT);
	assert_eq!(template.config_map.as_deref(), Some("f1-config"));
	assert!(template.secrets.contains(&(String::from("client-ca"), String::from("r1-client-ca"))));
	assert!(template.secrets.contains(&(String::from("dynamic-kubeconfig"), String::from("f1-dynamic-kubeconfig"))));
    }

    #[test]
    fn user_bundle_switches_client_authority() {
	let mut fp = api::FrontProxy::new("f1", FrontProxySpec{
	    ca_bundle_secret_ref: Some(ObjectReference::new("extra-ca")),
	    ..Default::default()
	});
	fp.metadata.namespace = Some("ns".into());

	let template = template(&fp, &root_shard());
	assert!(template.secrets.contains(&(String::from("client-ca"), String::from("f1-merged-ca-bundle"))));
    }
}
