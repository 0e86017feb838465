use chrono::DateTime;
use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const GROUP: &str = "operator.kcp.io";

/*
 * Set on a RootShard, Shard or FrontProxy (value: the Bundle name) to mark it
 * as bundled. Bundled workloads are scaled to zero locally.
 */
pub const BUNDLE_ANNOTATION: &str = "operator.kcp.io/bundle";

/* Replica count a bundled workload should run with once restored elsewhere */
pub const BUNDLE_DESIRED_REPLICAS_ANNOTATION: &str = "operator.kcp.io/bundle-desired-replicas";

/* Marks remote role bindings created on behalf of a Kubeconfig */
pub const KUBECONFIG_OWNER_LABEL: &str = "operator.kcp.io/kubeconfig";

pub const KUBECONFIG_RBAC_FINALIZER: &str = "operator.kcp.io/cleanup-rbac";
pub const REMOTE_RBAC_FINALIZER: &str = "operator.kcp.io/cleanup-remote-rbac";

// condition types
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_REFERENCE_VALID: &str = "ReferenceValid";
pub const CONDITION_BUNDLE: &str = "Bundle";
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_RBAC_SYNCED: &str = "RBACSynced";

// condition reasons
pub const REASON_REFERENCE_VALID: &str = "ReferenceValid";
pub const REASON_REFERENCE_INVALID: &str = "ReferenceInvalid";
pub const REASON_REFERENCE_NOT_FOUND: &str = "ReferenceNotFound";
pub const REASON_TARGET_NOT_FOUND: &str = "TargetNotFound";
pub const REASON_TARGET_INVALID: &str = "TargetInvalid";
pub const REASON_OBJECTS_NOT_READY: &str = "ObjectsNotReady";
pub const REASON_ALL_OBJECTS_READY: &str = "AllObjectsReady";
pub const REASON_DEPLOYMENT_READY: &str = "DeploymentReady";
pub const REASON_DEPLOYMENT_UNAVAILABLE: &str = "DeploymentUnavailable";
pub const REASON_BUNDLE_READY: &str = "BundleReady";
pub const REASON_BUNDLE_NOT_READY: &str = "BundleNotReady";
pub const REASON_BUNDLE_NOT_FOUND: &str = "BundleNotFound";
pub const REASON_CREDENTIALS_PENDING: &str = "CredentialsPending";
pub const REASON_KUBECONFIG_READY: &str = "KubeconfigReady";
pub const REASON_RBAC_SYNCED: &str = "RBACSynced";
pub const REASON_RBAC_FAILED: &str = "RBACFailed";

/*
 * A by-name reference to an object living in the same namespace as the
 * referencing resource.
 */
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ObjectReference {
    pub name: String,
}

impl ObjectReference {
    pub fn new(name: &str) -> Self {
	Self{ name: name.to_string() }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RootShardConfig {
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ObjectReference>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageSpec {
    pub repository: Option<String>,
    pub tag: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerReference {
    pub name: String,

    /* Issuer or ClusterIssuer, defaults to Issuer */
    pub kind: Option<String>,

    pub group: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Certificates {

    /*
     * An externally managed issuer. When set, no root authority is generated
     * and the intermediate authorities are issued by this issuer directly.
     */
    pub issuer_ref: Option<IssuerReference>,

    /* A pre-existing secret holding the root authority's certificate and key */
    pub ca_secret_ref: Option<ObjectReference>,
}

/* The public address clients use to reach the front-proxy */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalConfig {
    pub hostname: String,
    pub port: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
}

/*
 * Exactly one of the references must be set. Shared by Kubeconfig and
 * Bundle.
 */
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetReference {
    pub root_shard_ref: Option<ObjectReference>,
    pub shard_ref: Option<ObjectReference>,
    pub front_proxy_ref: Option<ObjectReference>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum TargetKind {
    RootShard,
    Shard,
    FrontProxy,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    TargetKind::RootShard => write!(f, "RootShard"),
	    TargetKind::Shard => write!(f, "Shard"),
	    TargetKind::FrontProxy => write!(f, "FrontProxy"),
	}
    }
}

impl TargetReference {

    /*
     * Returns the single (kind, name) this reference points to, or None when
     * zero or more than one reference is set.
     */
    pub fn single(&self) -> Option<(TargetKind, &str)> {
	let set: Vec<(TargetKind, &str)> = [
	    (TargetKind::RootShard, &self.root_shard_ref),
	    (TargetKind::Shard, &self.shard_ref),
	    (TargetKind::FrontProxy, &self.front_proxy_ref),
	]
	    .into_iter()
	    .filter_map(|(kind, reference)| reference.as_ref().map(|r| (kind, r.name.as_str())))
	    .collect();

	match set.as_slice() {
	    [single] => Some(*single),
	    _ => None,
	}
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    ConditionStatus::True => write!(f, "True"),
	    ConditionStatus::False => write!(f, "False"),
	    ConditionStatus::Unknown => write!(f, "Unknown"),
	}
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    pub reason: String,

    pub message: String,

    pub observed_generation: Option<i64>,

    // only moves when status flips
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(type_: &str, status: ConditionStatus, reason: &str, message: &str) -> Self {
	Self{
	    type_: type_.to_string(),
	    status: status,
	    reason: reason.to_string(),
	    message: message.to_string(),
	    observed_generation: None,
	    last_transition_time: Utc::now(),
	}
    }

    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
	self.observed_generation = generation;
	self
    }

    pub fn is_true(&self) -> bool {
	self.status == ConditionStatus::True
    }
}

/*
 * Lifecycle phase shared by the three workload kinds
 * (RootShard, Shard and FrontProxy).
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum WorkloadPhase {
    #[default]
    Provisioning,
    Running,
    Bundled,
    Deleting,
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	match self {
	    WorkloadPhase::Provisioning => write!(f, "Provisioning"),
	    WorkloadPhase::Running => write!(f, "Running"),
	    WorkloadPhase::Bundled => write!(f, "Bundled"),
	    WorkloadPhase::Deleting => write!(f, "Deleting"),
	}
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct WorkloadStatus {
    pub phase: Option<WorkloadPhase>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
