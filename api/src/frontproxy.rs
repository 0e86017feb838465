use crate::common::{ImageSpec, ObjectReference, RootShardConfig, WorkloadStatus};
use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/*
 * FrontProxy is the edge gateway routing workspace requests to the shards of
 * one RootShard.
 */
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.kcp.io", version = "v1alpha1", kind = "FrontProxy", namespaced)]
#[kube(status = "WorkloadStatus", derive = "PartialEq")]
#[serde(rename_all = "camelCase")]
pub struct FrontProxySpec {

    #[serde(default)]
    pub root_shard: RootShardConfig,

    pub image: Option<ImageSpec>,

    pub replicas: Option<i32>,

    pub ca_bundle_secret_ref: Option<ObjectReference>,
}
