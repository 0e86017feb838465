/*
 * Deterministic names of every object derived from a RootShard, Shard,
 * FrontProxy or Kubeconfig. Names only depend on (owner name, purpose).
 */
use kcp_operator_api as api;

pub const KCP_PORT: i32 = 6443;
pub const FRONT_PROXY_PORT: i32 = 8443;

/* Purpose-bound certificate authorities of a RootShard */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Authority {
    Root,
    Server,
    Client,
    ServiceAccount,
    RequestHeaderClient,
    FrontProxyClient,
}

impl Authority {

    /* The intermediate authorities, all chained to Root */
    pub const INTERMEDIATES: [Authority; 5] = [
	Authority::Server,
	Authority::Client,
	Authority::ServiceAccount,
	Authority::RequestHeaderClient,
	Authority::FrontProxyClient,
    ];

    pub fn suffix(&self) -> &'static str {
	match self {
	    Authority::Root => "ca",
	    Authority::Server => "server-ca",
	    Authority::Client => "client-ca",
	    Authority::ServiceAccount => "service-account-ca",
	    Authority::RequestHeaderClient => "requestheader-client-ca",
	    Authority::FrontProxyClient => "front-proxy-client-ca",
	}
    }

    /* Name of the authority's Issuer (and of its Certificate) */
    pub fn issuer_name(&self, root_shard: &str) -> String {
	format!("{}-{}", root_shard, self.suffix())
    }

    /*
     * Name of the secret holding the authority's certificate. A user
     * provided root authority keeps its own secret name.
     */
    pub fn secret_name(&self, root_shard: &api::RootShard) -> String {
	let name = root_shard.metadata.name.clone().unwrap_or_default();

	match (self, &root_shard.spec.certificates.ca_secret_ref) {
	    (Authority::Root, Some(ca)) => ca.name.clone(),
	    _ => self.issuer_name(&name),
	}
    }
}

pub fn self_signed_issuer(root_shard: &str) -> String {
    format!("{}-selfsigned", root_shard)
}

// leaf certificate purposes
pub const SERVER: &str = "server";
pub const SERVICE_ACCOUNT: &str = "service-account";
pub const VIRTUAL_WORKSPACES: &str = "virtual-workspaces";
pub const LOGICAL_CLUSTER_ADMIN: &str = "logical-cluster-admin";
pub const EXTERNAL_LOGICAL_CLUSTER_ADMIN: &str = "external-logical-cluster-admin";
pub const OPERATOR_CLIENT: &str = "operator-client";
pub const REQUESTHEADER: &str = "requestheader";
pub const CLIENT: &str = "client";

pub fn certificate(owner: &str, purpose: &str) -> String {
    format!("{}-{}", owner, purpose)
}

pub fn kubeconfig_secret(owner: &str, purpose: &str) -> String {
    format!("{}-{}-kubeconfig", owner, purpose)
}

pub fn merged_ca_bundle(owner: &str) -> String {
    format!("{}-merged-ca-bundle", owner)
}

pub fn root_shard_workload(name: &str) -> String {
    format!("{}-kcp", name)
}

pub fn shard_workload(name: &str) -> String {
    format!("{}-shard-kcp", name)
}

pub fn front_proxy_workload(name: &str) -> String {
    format!("{}-front-proxy", name)
}

pub fn front_proxy_config(name: &str) -> String {
    format!("{}-config", name)
}

pub fn front_proxy_dynamic_kubeconfig(name: &str) -> String {
    format!("{}-dynamic-kubeconfig", name)
}

/* Cluster-internal URL of a kcp service */
pub fn service_url(service: &str, namespace: &str, cluster_domain: &str) -> String {
    format!("https://{}.{}.svc.{}:{}", service, namespace, cluster_domain, KCP_PORT)
}

pub fn service_dns_names(service: &str, namespace: &str, cluster_domain: &str) -> Vec<String> {
    vec![
	service.to_string(),
	format!("{}.{}", service, namespace),
	format!("{}.{}.svc", service, namespace),
	format!("{}.{}.svc.{}", service, namespace, cluster_domain),
	String::from("localhost"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{ObjectReference, RootShard, RootShardSpec};

    #[test]
    fn authority_secret_names() {
	let mut rs = RootShard::new("r1", RootShardSpec::default());
	assert_eq!(Authority::Root.secret_name(&rs), "r1-ca");
	assert_eq!(Authority::FrontProxyClient.secret_name(&rs), "r1-front-proxy-client-ca");

	rs.spec.certificates.ca_secret_ref = Some(ObjectReference::new("my-ca"));
	assert_eq!(Authority::Root.secret_name(&rs), "my-ca");
	assert_eq!(Authority::Server.secret_name(&rs), "r1-server-ca");
    }

    #[test]
    fn derived_names() {
	assert_eq!(certificate("s1", SERVER), "s1-server");
	assert_eq!(kubeconfig_secret("s1", LOGICAL_CLUSTER_ADMIN), "s1-logical-cluster-admin-kubeconfig");
	assert_eq!(merged_ca_bundle("s1"), "s1-merged-ca-bundle");
	assert_eq!(shard_workload("s1"), "s1-shard-kcp");
	assert_eq!(service_url("r1-kcp", "ns", "cluster.local"), "https://r1-kcp.ns.svc.cluster.local:6443");
    }
}
