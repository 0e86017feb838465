use crate::common::{Certificates, EtcdConfig, ExternalConfig, ImageSpec, ObjectReference, WorkloadStatus};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/*
 * RootShard is the top-level authority: it owns the root certificate
 * authority, the purpose-bound intermediate authorities and the root kcp
 * shard workload itself.
 */
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.kcp.io", version = "v1alpha1", kind = "RootShard", namespaced)]
#[kube(status = "WorkloadStatus", shortname = "rs", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct RootShardSpec {

    /* Where the front-proxy is reachable from outside the cluster */
    pub external: ExternalConfig,

    #[serde(default)]
    pub certificates: Certificates,

    pub cluster_domain: Option<String>,

    pub etcd: EtcdConfig,

    pub image: Option<ImageSpec>,

    pub replicas: Option<i32>,

    /*
     * Extra authorities to trust for client certificates, merged with the
     * client authority into <name>-merged-ca-bundle.
     */
    pub ca_bundle_secret_ref: Option<ObjectReference>,
}

impl RootShard {

    pub fn cluster_domain(&self) -> &str {
	self.spec.cluster_domain.as_deref().unwrap_or(DEFAULT_CLUSTER_DOMAIN)
    }

    /* Public URL of the kcp installation, as seen through the front-proxy */
    pub fn external_url(&self) -> String {
	format!("https://{}:{}", self.spec.external.hostname, self.spec.external.port)
    }
}
