use crate::conditions;
use crate::context::{self, Context};
use crate::dependency;
use crate::errors::Error;
use crate::finalizer;
use crate::index;
use crate::naming;
use crate::pki;
use crate::reconciling::{controller_ref, link_to_parent};
use crate::remote::Access;
use crate::resources::WorkloadTemplate;
use crate::workload;
use kcp_operator_api as api;
use api::certmanager::Certificate;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use kube::Api as KubeApi;
use kube::ResourceExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use std::future::Future;
use std::sync::Arc;

const KIND: &str = "Shard";

pub fn template(shard: &api::Shard, root: &api::RootShard) -> WorkloadTemplate {
    let name = shard.name_any();

    let mut template = workload::server_template(
	&name,
	&naming::shard_workload(&name),
	"shard",
	root,
	&shard.spec.etcd,
	shard.spec.image.as_ref(),
	shard.spec.replicas,
	shard.spec.ca_bundle_secret_ref.is_some(),
    );
    /* shards register with the root through its service */
    let namespace = root.namespace().unwrap_or_default();
    template.args.push(format!("--shard-base-url={}", naming::service_url(&template.name, &shard.namespace().unwrap_or_default(), root.cluster_domain())));
    template.args.push(format!("--root-shard-base-url={}", naming::service_url(&naming::root_shard_workload(&root.name_any()), &namespace, root.cluster_domain())));

    template
}

async fn reconcile(shard: Arc<api::Shard>, ctx: Arc<Context>) -> Result<KubeAction, Error> {
    let name = shard.name_any();
    let namespace = shard.namespace().unwrap_or_default();
    log::debug!("Reconciling Shard {}/{}", namespace, name);
    ctx.metrics.reconcile_started(KIND, &name);

    let shards: KubeApi<api::Shard> = ctx.api(&namespace);
    let deleting = shard.metadata.deletion_timestamp.is_some();
    let mut status = shard.status.clone().unwrap_or_default();
    let mut errors = vec![];
    let mut pending = false;

    let (reference, root) = dependency::resolve_root_shard(ctx.store.as_ref(), &namespace, &shard.spec.root_shard).await;
    conditions::update(&mut status.conditions, reference.with_generation(shard.metadata.generation));

    /* keyed on the configured RootShard, not on whether it resolved this pass */
    let root_name = workload::root_shard_name(&shard.spec.root_shard);
    let state = finalizer::drive(&shards, shard.as_ref(), api::REMOTE_RBAC_FINALIZER, root_name.is_some(), || {
	workload::cleanup_remote_access(ctx.store.as_ref(), ctx.remote.as_ref(), root_name, Access::Shard, &namespace, &name)
    }).await;
    if let Err(err) = state {
	errors.push(err);
    }

    match root.as_ref() {
	Some(root) if !deleting => {
	    if let Err(err) = link_to_parent(&shards, shard.as_ref(), root).await {
		errors.push(err);
	    }

	    pending |= workload::provision_remote_access(&ctx, root, Access::Shard, &namespace, &name, &mut errors).await;

	    if let Some(owner) = Error::collect(controller_ref(shard.as_ref()), &mut errors) {
		let (available, waiting) = workload::reconcile_server(
		    &ctx,
		    &shard.metadata,
		    &pki::shard_certificates(&shard, root),
		    &template(&shard, root),
		    root,
		    shard.spec.ca_bundle_secret_ref.as_ref(),
		    &owner,
		    &mut errors,
		).await;

		conditions::update(&mut status.conditions, available);
		pending |= waiting;
	    }
	},
	/* nothing to build until the RootShard resolves, its watch wakes us up */
	_ => {},
    }

    let bundle = workload::bundle_condition(ctx.store.as_ref(), &shard.metadata).await;
    pending |= bundle.as_ref().map_or(false, |c| !c.is_true());
    workload::finish_status(&mut status, bundle, deleting);

    if let Err(err) = ctx.write_status(shard.as_ref(), shard.status.as_ref(), &status).await {
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
 * ShardMgr runs the Shard controller. Shards are also reconciled when
 * their RootShard changes.
 */
pub struct ShardMgr {
    ctx: Arc<Context>,
}

impl ShardMgr {

    pub fn new(ctx: Arc<Context>) -> Self {
	Self{ ctx: ctx }
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = self.ctx.clone();
	let controller = KubeController::new(ctx.watched_api::<api::Shard>(), ctx.watcher_config());
	let mapper = index::mapper::<api::RootShard, api::Shard>(controller.store());

	controller
	    .owns(ctx.watched_api::<KubeDeployment>(), ctx.watcher_config())
	    .owns(ctx.watched_api::<Certificate>(), ctx.watcher_config())
	    .watches(ctx.watched_api::<api::RootShard>(), ctx.watcher_config(), mapper)
	    .shutdown_on_signal()
	    .run(reconcile, context::error_policy, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconciled Shard {}", obj.name),
		    Err(err) => log::error!("Failed to reconcile Shard: {:?}", err),
		}
	    })
    }
}
