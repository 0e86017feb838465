use crate::bundle::engine::{self, Evaluation};
use crate::conditions;
use crate::context::{self, Context};
use crate::dependency::ResolvedTarget;
use crate::errors::Error;
use crate::index;
use crate::reconciling::{self, controller_ref, ensure_owner_ref, link_to_parent};
use kcp_operator_api as api;
use api::{BundleStatus, Condition, ConditionStatus};

use futures::StreamExt;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use kube::Api as KubeApi;
use kube::ResourceExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

const KIND: &str = "Bundle";

async fn link_to_target(bundles: &KubeApi<api::Bundle>, bundle: &api::Bundle, target: &ResolvedTarget) -> Result<(), Error> {
    match target {
	ResolvedTarget::RootShard(root) => link_to_parent(bundles, bundle, root).await,
	ResolvedTarget::Shard(shard, _) => link_to_parent(bundles, bundle, shard).await,
	ResolvedTarget::FrontProxy(fp, _) => link_to_parent(bundles, bundle, fp).await,
    }
}

/* Writes <bundle>-bundle; the reconciler skips the write when the data is unchanged */
async fn write_export(ctx: &Context, bundle: &api::Bundle, data: &BTreeMap<String, ByteString>) -> Result<(), Error> {
    let owner = controller_ref(bundle)?;
    let namespace = bundle.namespace().unwrap_or_default();

    reconciling::reconcile(&ctx.kube_client, &namespace, &bundle.export_secret_name(), |mut secret: KubeSecret| {
	secret.data = Some(data.clone());
	ensure_owner_ref(&mut secret.metadata, owner.clone());
	secret
    }).await?;

    Ok(())
}

/* Status of a bundle after an evaluation pass */
pub fn evaluated_status(old: Option<&BundleStatus>, evaluation: &Evaluation, generation: Option<i64>) -> BundleStatus {
    let mut status = old.cloned().unwrap_or_default();

    status.state = Some(conditions::bundle_state(evaluation.all_ready(), false));
    status.objects = evaluation.objects.clone();
    conditions::update(&mut status.conditions, evaluation.ready.clone().with_generation(generation));

    status
}

/* Status of a bundle whose evaluation failed outright */
pub fn failed_status(old: Option<&BundleStatus>, error: &Error, generation: Option<i64>) -> BundleStatus {
    let mut status = old.cloned().unwrap_or_default();

    let reason = if error.is_invalid_spec() {
	api::REASON_TARGET_INVALID
    } else {
	api::REASON_OBJECTS_NOT_READY
    };
    status.state = Some(conditions::bundle_state(false, false));
    let failed = Condition::new(api::CONDITION_READY, ConditionStatus::False, reason, &error.to_string());
    conditions::update(&mut status.conditions, failed.with_generation(generation));

    status
}

async fn reconcile(bundle: Arc<api::Bundle>, ctx: Arc<Context>) -> Result<KubeAction, Error> {
    let name = bundle.name_any();
    let namespace = bundle.namespace().unwrap_or_default();
    log::debug!("Reconciling Bundle {}/{}", namespace, name);
    ctx.metrics.reconcile_started(KIND, &name);

    /* the export secret is owned by the bundle and goes away with it */
    if bundle.metadata.deletion_timestamp.is_some() {
	let mut status = bundle.status.clone().unwrap_or_default();
	status.state = Some(conditions::bundle_state(false, true));
	ctx.write_status(bundle.as_ref(), bundle.status.as_ref(), &status).await?;
	return Ok(KubeAction::await_change());
    }

    let bundles: KubeApi<api::Bundle> = ctx.api(&namespace);
    let generation = bundle.metadata.generation;
    let mut errors = vec![];

    let (status, all_ready) = match engine::evaluate(ctx.store.as_ref(), &bundle).await {
	Ok(evaluation) => {
	    if let Some(target) = &evaluation.target {
		if let Err(err) = link_to_target(&bundles, &bundle, target).await {
		    errors.push(err);
		}
	    }

	    ctx.metrics.bundle_objects_pending(&name, evaluation.pending(), evaluation.objects.len());
	    if let Some(data) = &evaluation.export {
		match write_export(&ctx, &bundle, data).await {
		    Ok(()) => ctx.metrics.bundle_exported(&name, data.len()),
		    Err(err) => errors.push(err),
		}
	    }

	    (evaluated_status(bundle.status.as_ref(), &evaluation, generation), evaluation.all_ready())
	},
	Err(err) => {
	    let status = failed_status(bundle.status.as_ref(), &err, generation);
	    errors.push(err);
	    (status, false)
	},
    };

    if let Err(err) = ctx.write_status(bundle.as_ref(), bundle.status.as_ref(), &status).await {
	errors.push(err);
    }
    Error::aggregate(errors)?;

    if all_ready {
	Ok(KubeAction::await_change())
    } else {
	Ok(ctx.requeue())
    }
}

/*
 * BundleMgr runs the Bundle controller. Bundles are re-evaluated whenever
 * their target changes and, while not ready, on a fixed interval.
 */
pub struct BundleMgr {
    ctx: Arc<Context>,
}

impl BundleMgr {

    pub fn new(ctx: Arc<Context>) -> Self {
	Self{ ctx: ctx }
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = self.ctx.clone();
	let controller = KubeController::new(ctx.watched_api::<api::Bundle>(), ctx.watcher_config());
	let store = controller.store();

	controller
	    .owns(ctx.watched_api::<KubeSecret>(), ctx.watcher_config())
	    .watches(ctx.watched_api::<api::RootShard>(), ctx.watcher_config(), index::mapper::<api::RootShard, api::Bundle>(store.clone()))
	    .watches(ctx.watched_api::<api::Shard>(), ctx.watcher_config(), index::mapper::<api::Shard, api::Bundle>(store.clone()))
	    .watches(ctx.watched_api::<api::FrontProxy>(), ctx.watcher_config(), index::mapper::<api::FrontProxy, api::Bundle>(store))
	    .shutdown_on_signal()
	    .run(reconcile, context::error_policy, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconciled Bundle {}", obj.name),
		    Err(err) => log::error!("Failed to reconcile Bundle: {:?}", err),
		}
	    })
    }
}
