/*
 * One evaluation pass of a Bundle: resolve the target, poll every required
 * object, aggregate, and export once everything is ready.
 */
use crate::bundle::export;
use crate::bundle::object::{BundleObjectRef, BundledObject};
use crate::bundle::required::required_objects;
use crate::dependency::{self, ResolvedTarget};
use crate::errors::Error;
use crate::store::ObjectStore;
use kcp_operator_api as api;
use api::{BundleObjectState, BundleObjectStatus, Condition, ConditionStatus};

use k8s_openapi::ByteString;
use kube::ResourceExt;
use std::collections::BTreeMap;

#[derive(Debug)]
pub struct Evaluation {
    /* None when the target (or its RootShard) could not be resolved */
    pub target: Option<ResolvedTarget>,
    pub objects: Vec<BundleObjectStatus>,
    pub ready: Condition,
    /* Present only when every required object is ready */
    pub export: Option<BTreeMap<String, ByteString>>,
}

impl Evaluation {
    pub fn all_ready(&self) -> bool {
	self.export.is_some()
    }

    pub fn pending(&self) -> usize {
	self.objects.iter().filter(|o| o.state != BundleObjectState::Ready).count()
    }
}

fn ready_condition(status: ConditionStatus, reason: &str, message: &str) -> Condition {
    Condition::new(api::CONDITION_READY, status, reason, message)
}

/* Fetches one entry; failures only mark the entry as not ready */
async fn poll(store: &dyn ObjectStore, reference: &BundleObjectRef) -> (BundleObjectStatus, Option<BundledObject>) {
    let mut status = BundleObjectStatus{
	kind: reference.kind.to_string(),
	namespace: reference.namespace.clone(),
	name: reference.name.clone(),
	state: BundleObjectState::NotReady,
	message: None,
    };

    match store.get_object(reference.kind, &reference.namespace, &reference.name).await {
	Ok(Some(object)) => {
	    status.state = BundleObjectState::Ready;
	    (status, Some(object))
	},
	Ok(None) => {
	    status.message = Some(String::from("object not found"));
	    (status, None)
	},
	Err(err) => {
	    log::debug!("Unable to check {}: {}", reference, err);
	    status.message = Some(format!("error checking object: {}", err));
	    (status, None)
	},
    }
}

/*
 * Evaluates the bundle against the current state of the store.
 *
 * A target with zero or several references is returned as InvalidSpec.
 * Export failures are returned as errors too; everything else ends up in
 * the evaluation.
 */
pub async fn evaluate(store: &dyn ObjectStore, bundle: &api::Bundle) -> Result<Evaluation, Error> {
    let namespace = bundle.namespace().unwrap_or_default();

    let (reference, target) = dependency::resolve_target(store, &namespace, &bundle.spec.target).await?;
    let target = match target {
	Some(target) => target,
	None => {
	    return Ok(Evaluation{
		target: None,
		objects: vec![],
		ready: ready_condition(ConditionStatus::False, api::REASON_TARGET_NOT_FOUND, &reference.message),
		export: None,
	    });
	},
    };

    let required = required_objects(&target);
    let mut statuses = Vec::with_capacity(required.len());
    let mut fetched = Vec::with_capacity(required.len());

    for reference in required {
	let (status, object) = poll(store, &reference).await;
	statuses.push(status);
	if let Some(object) = object {
	    fetched.push((reference, object));
	}
    }

    let total = statuses.len();
    let pending = total - fetched.len();

    if pending > 0 {
	let message = format!("{} of {} objects are not ready", pending, total);
	return Ok(Evaluation{
	    target: Some(target),
	    objects: statuses,
	    ready: ready_condition(ConditionStatus::False, api::REASON_OBJECTS_NOT_READY, &message),
	    export: None,
	});
    }

    let data = export::export_all(fetched)?;
    let message = format!("all {} objects are ready", total);

    Ok(Evaluation{
	target: Some(target),
	objects: statuses,
	ready: ready_condition(ConditionStatus::True, api::REASON_ALL_OBJECTS_READY, &message),
	export: Some(data),
    })
}
