mod bundle;
mod conditions;
mod config;
mod context;
mod credentials;
mod dependency;
mod errors;
mod finalizer;
mod frontproxy;
mod index;
mod kubeconfig;
mod metrics;
mod naming;
mod pki;
mod reconciling;
mod remote;
mod resources;
mod rootshard;
mod shard;
mod store;
mod workload;

#[cfg(test)]
mod test_support;

use bundle::controller::BundleMgr;
use config::{Args, OperatorConfig};
use context::Context;
use errors::Error;
use frontproxy::FrontProxyMgr;
use kubeconfig::KubeconfigMgr;
use rootshard::RootShardMgr;
use shard::ShardMgr;

use clap::Parser;
use kube::Client as KubeClient;
use kube::Config as KubeConfig;
use std::sync::Arc;
use std::time::Duration;

/*
 * Program design:
 *
 *  1. Read the configuration from flags and environment
 *  2. Connect to the cluster the operator runs in
 *  3. Run one controller per kind until interrupted
 */
#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    env_logger::init();

    let config = OperatorConfig::from_args(&args);
    let mut kube_config = KubeConfig::infer().await
	.map_err(|err| Error::Kubeconfig(err.to_string()))?;
    /* watches must time out on the server before the client gives up */
    kube_config.read_timeout = Some(Duration::from_secs(u64::from(config.watch_timeout) + 30));
    let kube_client = KubeClient::try_from(kube_config)?;

    log::info!("starting kcp-operator (namespace: {})", config.namespace.as_deref().unwrap_or("all"));
    let ctx = Arc::new(Context::new(kube_client, config));

    let root_shards = RootShardMgr::new(ctx.clone());
    let shards = ShardMgr::new(ctx.clone());
    let front_proxies = FrontProxyMgr::new(ctx.clone());
    let kubeconfigs = KubeconfigMgr::new(ctx.clone());
    let bundles = BundleMgr::new(ctx);

    tokio::select! {
	_ = root_shards.controller() => {},
	_ = shards.controller() => {},
	_ = front_proxies.controller() => {},
	_ = kubeconfigs.controller() => {},
	_ = bundles.controller() => {},

	// handle CTRL^C as gracefully as we can.
	_ = tokio::signal::ctrl_c() => {},
    }

    log::info!("kcp-operator stopped");
    Ok(())
}
