use crate::common::{Condition, TargetReference};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/*
 * Bundle observes every object its target needs and, once all of them are
 * ready, exports them into a single secret (<name>-bundle) that can be
 * applied to another cluster.
 */
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.kcp.io", version = "v1alpha1", kind = "Bundle", namespaced)]
#[kube(status = "BundleStatus", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    pub target: TargetReference,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BundleState {
    #[default]
    Provisioning,
    Ready,
    Deleting,
}

impl fmt::Display for BundleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    BundleState::Provisioning => write!(f, "Provisioning"),
	    BundleState::Ready => write!(f, "Ready"),
	    BundleState::Deleting => write!(f, "Deleting"),
	}
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BundleObjectState {
    Ready,
    #[default]
    NotReady,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BundleObjectStatus {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub state: BundleObjectState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    pub state: Option<BundleState>,

    #[serde(default)]
    pub objects: Vec<BundleObjectStatus>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Bundle {

    pub fn export_secret_name(&self) -> String {
	format!("{}-bundle", self.metadata.name.clone().unwrap_or_default())
    }
}
