use crate::common::{EtcdConfig, ImageSpec, ObjectReference, RootShardConfig, WorkloadStatus};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/*
 * Shard is an additional replica group of kcp, joined to exactly one
 * RootShard.
 */
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.kcp.io", version = "v1alpha1", kind = "Shard", namespaced)]
#[kube(status = "WorkloadStatus", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct ShardSpec {

    #[serde(default)]
    pub root_shard: RootShardConfig,

    pub etcd: EtcdConfig,

    pub image: Option<ImageSpec>,

    pub replicas: Option<i32>,

    pub ca_bundle_secret_ref: Option<ObjectReference>,
}
