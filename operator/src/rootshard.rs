use crate::conditions;
use crate::context::{self, Context};
use crate::errors::Error;
use crate::naming;
use crate::pki;
use crate::reconciling::controller_ref;
use crate::workload;
use kcp_operator_api as api;
use api::certmanager::{Certificate, Issuer};

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use kube::ResourceExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use std::future::Future;
use std::sync::Arc;

const KIND: &str = "RootShard";

async fn reconcile(root: Arc<api::RootShard>, ctx: Arc<Context>) -> Result<KubeAction, Error> {
    let name = root.name_any();
    let namespace = root.namespace().unwrap_or_default();
    log::debug!("Reconciling RootShard {}/{}", namespace, name);
    ctx.metrics.reconcile_started(KIND, &name);

    let deleting = root.metadata.deletion_timestamp.is_some();
    let mut status = root.status.clone().unwrap_or_default();
    let mut errors = vec![];
    let mut pending = false;

    /* owned objects go away with the RootShard itself */
    let owner = match deleting {
	true => None,
	false => Error::collect(controller_ref(root.as_ref()), &mut errors),
    };
    if let Some(owner) = owner {
	workload::reconcile_issuers(&ctx, &namespace, &pki::root_shard_issuers(&root), &owner, &mut errors).await;
	workload::reconcile_certificates(&ctx, &namespace, &pki::root_shard_authorities(&root), &owner, &mut errors).await;

	let template = workload::server_template(
	    &name,
	    &naming::root_shard_workload(&name),
	    "rootshard",
	    &root,
	    &root.spec.etcd,
	    root.spec.image.as_ref(),
	    root.spec.replicas,
	    root.spec.ca_bundle_secret_ref.is_some(),
	);
	let (available, waiting) = workload::reconcile_server(
	    &ctx,
	    &root.metadata,
	    &pki::root_shard_certificates(&root),
	    &template,
	    &root,
	    root.spec.ca_bundle_secret_ref.as_ref(),
	    &owner,
	    &mut errors,
	).await;

	conditions::update(&mut status.conditions, available);
	pending |= waiting;
    }

    let bundle = workload::bundle_condition(ctx.store.as_ref(), &root.metadata).await;
    pending |= bundle.as_ref().map_or(false, |c| !c.is_true());
    workload::finish_status(&mut status, bundle, deleting);

    if let Err(err) = ctx.write_status(root.as_ref(), root.status.as_ref(), &status).await {
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
 * RootShardMgr runs the RootShard controller
 */
pub struct RootShardMgr {
    ctx: Arc<Context>,
}

impl RootShardMgr {

    pub fn new(ctx: Arc<Context>) -> Self {
	Self{ ctx: ctx }
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = self.ctx.clone();

	KubeController::new(ctx.watched_api::<api::RootShard>(), ctx.watcher_config())
	    .owns(ctx.watched_api::<KubeDeployment>(), ctx.watcher_config())
	    .owns(ctx.watched_api::<Certificate>(), ctx.watcher_config())
	    .owns(ctx.watched_api::<Issuer>(), ctx.watcher_config())
	    .shutdown_on_signal()
	    .run(reconcile, context::error_policy, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconciled RootShard {}", obj.name),
		    Err(err) => log::error!("Failed to reconcile RootShard: {:?}", err),
		}
	    })
    }
}
