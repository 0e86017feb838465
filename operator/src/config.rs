use clap::Parser;
use std::time::Duration;

/*
 * Command line (and environment) configuration of the operator.
 */
#[derive(Parser, Clone, Debug)]
#[command(name = "kcp-operator", version, about = "Operates kcp root shards, shards and front-proxies")]
pub struct Args {

    /* Restrict all watches to a single namespace */
    #[arg(long, env = "KCP_OPERATOR_NAMESPACE")]
    pub namespace: Option<String>,

    /* Seconds before re-checking a dependency that is not ready yet */
    #[arg(long, env = "KCP_OPERATOR_REQUEUE_INTERVAL", default_value_t = 10)]
    pub requeue_interval: u64,

    /* Seconds before retrying a failed reconciliation */
    #[arg(long, env = "KCP_OPERATOR_ERROR_REQUEUE_INTERVAL", default_value_t = 30)]
    pub error_requeue_interval: u64,

    /* Deadline, in seconds, for calls into a shard's own admin surface */
    #[arg(long, env = "KCP_OPERATOR_REMOTE_TIMEOUT", default_value_t = 15)]
    pub remote_timeout: u64,

    /* Server side watch timeout; must stay below the client read timeout */
    #[arg(long, env = "KCP_OPERATOR_WATCH_TIMEOUT", default_value_t = 25)]
    pub watch_timeout: u32,
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub namespace: Option<String>,
    pub requeue_interval: Duration,
    pub error_requeue_interval: Duration,
    pub remote_timeout: Duration,
    pub watch_timeout: u32,
}

impl OperatorConfig {
    pub fn from_args(args: &Args) -> Self {
	Self{
	    namespace: args.namespace.clone(),
	    requeue_interval: Duration::from_secs(args.requeue_interval),
	    error_requeue_interval: Duration::from_secs(args.error_requeue_interval),
	    remote_timeout: Duration::from_secs(args.remote_timeout),
	    watch_timeout: args.watch_timeout,
	}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
	let args = Args::parse_from(["kcp-operator"]);
	let config = OperatorConfig::from_args(&args);

	assert_eq!(config.namespace, None);
	assert_eq!(config.requeue_interval, Duration::from_secs(10));
	assert_eq!(config.error_requeue_interval, Duration::from_secs(30));
	assert_eq!(config.remote_timeout, Duration::from_secs(15));
	assert_eq!(config.watch_timeout, 25);
    }

    #[test]
    fn namespace_flag_scopes_watches() {
	let args = Args::parse_from(["kcp-operator", "--namespace", "kcp", "--remote-timeout", "5"]);
	let config = OperatorConfig::from_args(&args);

	assert_eq!(config.namespace.as_deref(), Some("kcp"));
	assert_eq!(config.remote_timeout, Duration::from_secs(5));
    }
}
