/*
 * kcp-operator/api - custom resources managed by the kcp operator, plus the
 * external certificate-issuer types it writes.
 */

pub mod common;
pub use common::*;

pub mod rootshard;
pub use rootshard::RootShard;
pub use rootshard::RootShardSpec;

pub mod shard;
pub use shard::Shard;
pub use shard::ShardSpec;

pub mod frontproxy;
pub use frontproxy::FrontProxy;
pub use frontproxy::FrontProxySpec;

pub mod kubeconfig;
pub use kubeconfig::Kubeconfig;
pub use kubeconfig::KubeconfigPhase;
pub use kubeconfig::KubeconfigSpec;
pub use kubeconfig::KubeconfigStatus;

pub mod bundle;
pub use bundle::Bundle;
pub use bundle::BundleObjectState;
pub use bundle::BundleObjectStatus;
pub use bundle::BundleSpec;
pub use bundle::BundleState;
pub use bundle::BundleStatus;

pub mod certmanager;
