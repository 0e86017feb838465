/*
 * Turns live objects into their portable, exportable form.
 */
use crate::bundle::object::{BundleObjectRef, BundledObject};
use crate::errors::Error;
use kcp_operator_api as api;

use k8s_openapi::ByteString;
use std::collections::BTreeMap;

/*
 * Removes everything the source cluster assigned to the object, so the copy
 * can be created as-is in another cluster. Status is dropped as well.
 */
pub fn strip(object: &mut BundledObject) {
    let meta = object.metadata_mut();
    meta.resource_version = None;
    meta.uid = None;
    meta.self_link = None;
    meta.generation = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.owner_references = None;

    match object {
	BundledObject::Service(svc) => svc.status = None,
	BundledObject::Deployment(deployment) => deployment.status = None,
	BundledObject::Secret(_) | BundledObject::ConfigMap(_) => {},
    }
}

/*
 * A bundled workload runs with zero replicas locally while its intended
 * replica count sits in an annotation. The exported copy gets that count
 * back, without the annotation.
 */
pub fn restore_desired_replicas(object: &mut BundledObject) {
    let deployment = match object {
	BundledObject::Deployment(deployment) => deployment,
	_ => return,
    };

    let desired = deployment.metadata.annotations
	.as_mut()
	.and_then(|annotations| annotations.remove(api::BUNDLE_DESIRED_REPLICAS_ANNOTATION));

    if let Some(annotations) = &deployment.metadata.annotations {
	if annotations.is_empty() {
	    deployment.metadata.annotations = None;
	}
    }

    if let Some(replicas) = desired.and_then(|value| value.parse::<i32>().ok()).filter(|r| *r > 0) {
	if let Some(spec) = deployment.spec.as_mut() {
	    spec.replicas = Some(replicas);
	}
    }
}

/* Objects without any payload cannot be exported meaningfully */
fn ensure_has_data(reference: &BundleObjectRef, object: &BundledObject) -> Result<(), Error> {
    let empty = match object {
	BundledObject::Secret(secret) => secret.data.as_ref().map_or(true, |d| d.is_empty())
	    && secret.string_data.as_ref().map_or(true, |d| d.is_empty()),
	BundledObject::ConfigMap(cm) => cm.data.as_ref().map_or(true, |d| d.is_empty())
	    && cm.binary_data.as_ref().map_or(true, |d| d.is_empty()),
	BundledObject::Service(svc) => svc.spec.is_none(),
	BundledObject::Deployment(deployment) => deployment.spec.is_none(),
    };

    if empty {
	return Err(Error::MissingData(format!("{} has no data to export", reference)));
    }
    Ok(())
}

pub fn export_object(reference: &BundleObjectRef, mut object: BundledObject) -> Result<(String, ByteString), Error> {
    ensure_has_data(reference, &object)?;
    strip(&mut object);
    restore_desired_replicas(&mut object);

    Ok((reference.export_key(), ByteString(object.to_json()?)))
}

/*
 * Exports every object; any failure fails the whole export since a partial
 * bundle is useless.
 */
pub fn export_all(objects: Vec<(BundleObjectRef, BundledObject)>) -> Result<BTreeMap<String, ByteString>, Error> {
    let mut data = BTreeMap::new();

    for (reference, object) in objects {
	let (key, value) = export_object(&reference, object)?;
	data.insert(key, value);
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::object::BundleObjectKind;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn live_meta(name: &str) -> ObjectMeta {
	ObjectMeta{
	    name: Some(name.to_string()),
	    namespace: Some(String::from("ns")),
	    resource_version: Some(String::from("12345")),
	    uid: Some(String::from("d6c8b2a4")),
	    generation: Some(7),
	    owner_references: Some(vec![OwnerReference{
		api_version: String::from("operator.kcp.io/v1alpha1"),
		kind: String::from("Shard"),
		name: String::from("s1"),
		uid: String::from("aaaa"),
		..Default::default()
	    }]),
	    ..Default::default()
	}
    }

    fn bundled_deployment(replicas: i32, desired: Option<&str>) -> Deployment {
	let mut meta = live_meta("s1-shard-kcp");
	if let Some(desired) = desired {
	    meta.annotations = Some(BTreeMap::from([
		(String::from(api::BUNDLE_DESIRED_REPLICAS_ANNOTATION), desired.to_string()),
	    ]));
	}

	Deployment{
	    metadata: meta,
	    spec: Some(DeploymentSpec{ replicas: Some(replicas), ..Default::default() }),
	    status: Some(DeploymentStatus{ replicas: Some(replicas), ..Default::default() }),
	}
    }

    #[test]
    fn strip_removes_cluster_assigned_fields() {
	let mut object = BundledObject::Deployment(bundled_deployment(1, None));
	strip(&mut object);

	let BundledObject::Deployment(deployment) = object else { panic!("kind changed") };
	assert_eq!(deployment.metadata.name.as_deref(), Some("s1-shard-kcp"));
	assert_eq!(deployment.metadata.namespace.as_deref(), Some("ns"));
	assert!(deployment.metadata.resource_version.is_none());
	assert!(deployment.metadata.uid.is_none());
	assert!(deployment.metadata.generation.is_none());
	assert!(deployment.metadata.owner_references.is_none());
	assert!(deployment.status.is_none());
    }

    #[test]
    fn desired_replicas_round_trip() {
	let reference = BundleObjectRef::new(BundleObjectKind::Deployment, "ns", "s1-shard-kcp");
	let (key, value) = export_object(&reference, BundledObject::Deployment(bundled_deployment(0, Some("3")))).unwrap();

	assert_eq!(key, "apis_apps_v1_namespaces_ns_deployments_s1_shard_kcp");
	let exported: Deployment = serde_json::from_slice(&value.0).unwrap();
	assert_eq!(exported.spec.unwrap().replicas, Some(3));
	assert!(exported.metadata.annotations.is_none());
    }

    #[test]
    fn invalid_desired_replicas_leave_the_live_count() {
	let mut object = BundledObject::Deployment(bundled_deployment(0, Some("zero")));
	restore_desired_replicas(&mut object);

	let BundledObject::Deployment(deployment) = object else { panic!("kind changed") };
	assert_eq!(deployment.spec.unwrap().replicas, Some(0));
	assert!(deployment.metadata.annotations.is_none());
    }

    #[test]
    fn empty_secret_fails_the_export() {
	let reference = BundleObjectRef::new(BundleObjectKind::Secret, "ns", "s1-server");
	let secret = Secret{ metadata: live_meta("s1-server"), ..Default::default() };

	let err = export_all(vec![(reference, BundledObject::Secret(secret))]).unwrap_err();
	assert!(matches!(err, Error::MissingData(_)));
    }

    #[test]
    fn export_is_byte_stable() {
	let reference = BundleObjectRef::new(BundleObjectKind::Secret, "ns", "s1-server");
	let mut secret = Secret{ metadata: live_meta("s1-server"), ..Default::default() };
	secret.data = Some(BTreeMap::from([(String::from("tls.crt"), ByteString(b"cert".to_vec()))]));

	let first = export_all(vec![(reference.clone(), BundledObject::Secret(secret.clone()))]).unwrap();

	// a later resync only changes server-assigned fields
	secret.metadata.resource_version = Some(String::from("99999"));
	let second = export_all(vec![(reference, BundledObject::Secret(secret))]).unwrap();

	assert_eq!(first, second);
    }
}
