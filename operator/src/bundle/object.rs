/*
 * The closed set of object kinds a Bundle can contain, and the concrete
 * objects fetched for them.
 */
use crate::errors::Error;

use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BundleObjectKind {
    Secret,
    ConfigMap,
    Service,
    Deployment,
}

impl BundleObjectKind {

    /* (group, version, plural resource) */
    fn api_path(&self) -> (Option<&'static str>, &'static str, &'static str) {
	match self {
	    BundleObjectKind::Secret => (None, "v1", "secrets"),
	    BundleObjectKind::ConfigMap => (None, "v1", "configmaps"),
	    BundleObjectKind::Service => (None, "v1", "services"),
	    BundleObjectKind::Deployment => (Some("apps"), "v1", "deployments"),
	}
    }
}

impl fmt::Display for BundleObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    BundleObjectKind::Secret => write!(f, "Secret"),
	    BundleObjectKind::ConfigMap => write!(f, "ConfigMap"),
	    BundleObjectKind::Service => write!(f, "Service"),
	    BundleObjectKind::Deployment => write!(f, "Deployment"),
	}
    }
}

/* One entry of a Bundle's required-object set */
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BundleObjectRef {
    pub kind: BundleObjectKind,
    pub namespace: String,
    pub name: String,
}

fn segment(value: &str) -> String {
    value.replace('-', "_")
}

fn api_segment(value: &str) -> String {
    value.replace(['.', '/'], "_")
}

impl BundleObjectRef {

    pub fn new(kind: BundleObjectKind, namespace: &str, name: &str) -> Self {
	Self{
	    kind: kind,
	    namespace: namespace.to_string(),
	    name: name.to_string(),
	}
    }

    /*
     * The API path of the object flattened into a secret data key, e.g.
     *
     *   /api/v1/namespaces/kcp-system/secrets/r1-ca
     *     -> api_v1_namespaces_kcp_system_secrets_r1_ca
     *   /apis/apps/v1/namespaces/ns/deployments/s1-shard-kcp
     *     -> apis_apps_v1_namespaces_ns_deployments_s1_shard_kcp
     */
    pub fn export_key(&self) -> String {
	let (group, version, resource) = self.kind.api_path();

	let mut parts: Vec<String> = match group {
	    None => vec![String::from("api")],
	    Some(group) => vec![String::from("apis"), api_segment(group)],
	};
	parts.push(api_segment(version));
	if !self.namespace.is_empty() {
	    parts.push(String::from("namespaces"));
	    parts.push(segment(&self.namespace));
	}
	parts.push(resource.to_string());
	if !self.name.is_empty() {
	    parts.push(segment(&self.name));
	}

	parts.join("_")
    }
}

impl fmt::Display for BundleObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BundledObject {
    Secret(KubeSecret),
    ConfigMap(KubeConfigMap),
    Service(KubeService),
    Deployment(KubeDeployment),
}

impl BundledObject {

    pub fn kind(&self) -> BundleObjectKind {
	match self {
	    BundledObject::Secret(_) => BundleObjectKind::Secret,
	    BundledObject::ConfigMap(_) => BundleObjectKind::ConfigMap,
	    BundledObject::Service(_) => BundleObjectKind::Service,
	    BundledObject::Deployment(_) => BundleObjectKind::Deployment,
	}
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
	match self {
	    BundledObject::Secret(obj) => &mut obj.metadata,
	    BundledObject::ConfigMap(obj) => &mut obj.metadata,
	    BundledObject::Service(obj) => &mut obj.metadata,
	    BundledObject::Deployment(obj) => &mut obj.metadata,
	}
    }

    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
	let bytes = match self {
	    BundledObject::Secret(obj) => serde_json::to_vec(obj)?,
	    BundledObject::ConfigMap(obj) => serde_json::to_vec(obj)?,
	    BundledObject::Service(obj) => serde_json::to_vec(obj)?,
	    BundledObject::Deployment(obj) => serde_json::to_vec(obj)?,
	};

	Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_objects_use_the_api_prefix() {
	let secret = BundleObjectRef::new(BundleObjectKind::Secret, "kcp-system", "r1-server-ca");
	assert_eq!(secret.export_key(), "api_v1_namespaces_kcp_system_secrets_r1_server_ca");

	let cm = BundleObjectRef::new(BundleObjectKind::ConfigMap, "ns", "fp1-config");
	assert_eq!(cm.export_key(), "api_v1_namespaces_ns_configmaps_fp1_config");
    }

    #[test]
    fn grouped_objects_use_the_apis_prefix() {
	let deployment = BundleObjectRef::new(BundleObjectKind::Deployment, "ns", "s1-shard-kcp");
	assert_eq!(deployment.export_key(), "apis_apps_v1_namespaces_ns_deployments_s1_shard_kcp");
    }

    #[test]
    fn empty_segments_are_left_out() {
	let svc = BundleObjectRef::new(BundleObjectKind::Service, "", "");
	assert_eq!(svc.export_key(), "api_v1_services");
    }
}
