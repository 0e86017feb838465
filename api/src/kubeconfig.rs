use crate::common::{Condition, ObjectReference, TargetReference};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_VALIDITY: &str = "8766h";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBindings {

    /* Logical cluster (workspace path) the bindings are created in */
    pub cluster: String,

    pub cluster_roles: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigAuthorization {
    pub cluster_role_bindings: ClusterRoleBindings,
}

/*
 * Kubeconfig requests a client certificate for `username` and packages it
 * into a kubeconfig file pointing at one RootShard, Shard or FrontProxy.
 */
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.kcp.io", version = "v1alpha1", kind = "Kubeconfig", namespaced)]
#[kube(status = "KubeconfigStatus", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigSpec {

    pub target: TargetReference,

    pub username: String,

    #[serde(default)]
    pub groups: Vec<String>,

    // certificate duration, e.g. 8766h
    pub validity: Option<String>,

    /* Secret the kubeconfig file is written to */
    pub secret_ref: ObjectReference,

    pub authorization: Option<KubeconfigAuthorization>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum KubeconfigPhase {
    #[default]
    Provisioning,
    Ready,
    Deleting,
}

impl fmt::Display for KubeconfigPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    KubeconfigPhase::Provisioning => write!(f, "Provisioning"),
	    KubeconfigPhase::Ready => write!(f, "Ready"),
	    KubeconfigPhase::Deleting => write!(f, "Deleting"),
	}
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeconfigStatus {
    pub phase: Option<KubeconfigPhase>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /* Name of the resolved target, as "<Kind>/<name>" */
    pub target_name: Option<String>,

    /* Logical cluster the RBAC bindings were last created in */
    pub rbac_cluster: Option<String>,

    /* RootShard whose installation holds those bindings */
    pub rbac_root_shard: Option<String>,
}

impl Kubeconfig {
    pub fn validity(&self) -> &str {
	self.spec.validity.as_deref().unwrap_or(DEFAULT_VALIDITY)
    }
}
