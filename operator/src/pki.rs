/*
 * Certificate authorities and leaf certificates requested from the
 * external issuer. Everything here is pure: the controllers reconcile the
 * returned objects and wait for the issuer to materialize their secrets.
 */
use crate::naming;
use crate::naming::Authority;
use kcp_operator_api as api;
use api::certmanager::{self, CaIssuer, Certificate, CertificateSpec, IssuerRef, IssuerSpec, PrivateKey, SelfSignedIssuer, X509Subject};

use kube::ResourceExt;

const CA_DURATION: &str = "87600h";
const CA_RENEW_BEFORE: &str = "8760h";
const LEAF_DURATION: &str = "8766h";
const LEAF_RENEW_BEFORE: &str = "360h";

// subject organizations
pub const ORG_ADMIN: &str = "system:kcp:admin";
pub const ORG_LOGICAL_CLUSTER_ADMIN: &str = "system:kcp:logical-cluster-admin";
pub const ORG_EXTERNAL_LOGICAL_CLUSTER_ADMIN: &str = "system:kcp:external-logical-cluster-admin";
pub const ORG_FRONT_PROXY: &str = "system:kcp:front-proxy";

/* A named Issuer to reconcile */
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerRequest {
    pub name: String,
    pub spec: IssuerSpec,
}

/* A named Certificate to reconcile; its secret carries the same name */
#[derive(Clone, Debug, PartialEq)]
pub struct CertificateRequest {
    pub name: String,
    pub spec: CertificateSpec,
}

fn issuer(name: &str) -> IssuerRef {
    IssuerRef{
	name: name.to_string(),
	kind: String::from("Issuer"),
	group: Some(String::from("cert-manager.io")),
    }
}

fn external_issuer(reference: &api::IssuerReference) -> IssuerRef {
    IssuerRef{
	name: reference.name.clone(),
	kind: reference.kind.clone().unwrap_or_else(|| String::from("Issuer")),
	group: Some(reference.group.clone().unwrap_or_else(|| String::from("cert-manager.io"))),
    }
}

fn private_key() -> Option<PrivateKey> {
    Some(PrivateKey{
	algorithm: String::from("RSA"),
	size: 4096,
	rotation_policy: Some(String::from("Always")),
    })
}

fn authority(name: &str, issuer_ref: IssuerRef) -> CertificateRequest {
    CertificateRequest{
	name: name.to_string(),
	spec: CertificateSpec{
	    secret_name: name.to_string(),
	    common_name: Some(name.to_string()),
	    is_ca: true,
	    usages: vec![
		String::from(certmanager::USAGE_CERT_SIGN),
		String::from(certmanager::USAGE_DIGITAL_SIGNATURE),
	    ],
	    duration: Some(String::from(CA_DURATION)),
	    renew_before: Some(String::from(CA_RENEW_BEFORE)),
	    private_key: private_key(),
	    issuer_ref: issuer_ref,
	    ..Default::default()
	},
    }
}

fn leaf(name: &str, issuer_ref: IssuerRef, common_name: &str, usages: &[&str]) -> CertificateRequest {
    let mut all_usages = vec![
	String::from(certmanager::USAGE_DIGITAL_SIGNATURE),
	String::from(certmanager::USAGE_KEY_ENCIPHERMENT),
    ];
    all_usages.extend(usages.iter().map(|u| u.to_string()));

    CertificateRequest{
	name: name.to_string(),
	spec: CertificateSpec{
	    secret_name: name.to_string(),
	    common_name: Some(common_name.to_string()),
	    usages: all_usages,
	    duration: Some(String::from(LEAF_DURATION)),
	    renew_before: Some(String::from(LEAF_RENEW_BEFORE)),
	    private_key: private_key(),
	    issuer_ref: issuer_ref,
	    ..Default::default()
	},
    }
}

fn with_dns(mut request: CertificateRequest, dns_names: Vec<String>) -> CertificateRequest {
    request.spec.dns_names = dns_names;
    request
}

fn with_orgs(mut request: CertificateRequest, organizations: &[&str]) -> CertificateRequest {
    request.spec.subject = Some(X509Subject{
	organizations: organizations.iter().map(|o| o.to_string()).collect(),
    });
    request
}

/* Issuer backed by one of the RootShard's authorities */
fn authority_issuer(root: &api::RootShard, authority: Authority) -> IssuerRef {
    issuer(&authority.issuer_name(&root.name_any()))
}

/*
 * Issuers of a RootShard: the self-signed bootstrap issuer and the root
 * authority issuer (unless an external issuer is configured), then one
 * issuer per intermediate authority.
 */
pub fn root_shard_issuers(root: &api::RootShard) -> Vec<IssuerRequest> {
    let name = root.name_any();
    let mut issuers = vec![];

    if root.spec.certificates.issuer_ref.is_none() {
	issuers.push(IssuerRequest{
	    name: naming::self_signed_issuer(&name),
	    spec: IssuerSpec{ self_signed: Some(SelfSignedIssuer{}), ..Default::default() },
	});
	issuers.push(IssuerRequest{
	    name: Authority::Root.issuer_name(&name),
	    spec: IssuerSpec{ ca: Some(CaIssuer{ secret_name: Authority::Root.secret_name(root) }), ..Default::default() },
	});
    }

    for authority in Authority::INTERMEDIATES {
	issuers.push(IssuerRequest{
	    name: authority.issuer_name(&name),
	    spec: IssuerSpec{ ca: Some(CaIssuer{ secret_name: authority.secret_name(root) }), ..Default::default() },
	});
    }

    issuers
}

/*
 * Authority certificates of a RootShard. A user supplied root authority
 * (caSecretRef) is used as is; with an external issuer there is no root
 * authority and the intermediates are signed by that issuer.
 */
pub fn root_shard_authorities(root: &api::RootShard) -> Vec<CertificateRequest> {
    let name = root.name_any();
    let mut authorities = vec![];

    let intermediate_issuer = match &root.spec.certificates.issuer_ref {
	Some(external) => external_issuer(external),
	None => {
	    if root.spec.certificates.ca_secret_ref.is_none() {
		authorities.push(authority(&Authority::Root.issuer_name(&name), issuer(&naming::self_signed_issuer(&name))));
	    }
	    authority_issuer(root, Authority::Root)
	},
    };

    for intermediate in Authority::INTERMEDIATES {
	authorities.push(authority(&intermediate.issuer_name(&name), intermediate_issuer.clone()));
    }

    authorities
}

/*
 * Certificates every kcp server (root shard or shard) runs with. `owner` is
 * the RootShard/Shard name and `service` the name of its Service.
 */
fn server_certificates(owner: &str, service: &str, namespace: &str, root: &api::RootShard) -> Vec<CertificateRequest> {
    let server_ca = authority_issuer(root, Authority::Server);
    let client_ca = authority_issuer(root, Authority::Client);
    let dns_names = naming::service_dns_names(service, namespace, root.cluster_domain());

    vec![
	with_dns(
	    leaf(&naming::certificate(owner, naming::SERVER), server_ca.clone(), owner, &[certmanager::USAGE_SERVER_AUTH]),
	    dns_names.clone(),
	),
	leaf(&naming::certificate(owner, naming::SERVICE_ACCOUNT), authority_issuer(root, Authority::ServiceAccount), owner, &[]),
	with_dns(
	    leaf(&naming::certificate(owner, naming::VIRTUAL_WORKSPACES), server_ca, owner, &[certmanager::USAGE_SERVER_AUTH, certmanager::USAGE_CLIENT_AUTH]),
	    dns_names,
	),
	with_orgs(
	    leaf(&naming::certificate(owner, naming::LOGICAL_CLUSTER_ADMIN), client_ca.clone(), "logical-cluster-admin", &[certmanager::USAGE_CLIENT_AUTH]),
	    &[ORG_LOGICAL_CLUSTER_ADMIN],
	),
	with_orgs(
	    leaf(&naming::certificate(owner, naming::EXTERNAL_LOGICAL_CLUSTER_ADMIN), client_ca, "external-logical-cluster-admin", &[certmanager::USAGE_CLIENT_AUTH]),
	    &[ORG_EXTERNAL_LOGICAL_CLUSTER_ADMIN],
	),
    ]
}

pub fn root_shard_certificates(root: &api::RootShard) -> Vec<CertificateRequest> {
    let name = root.name_any();
    let namespace = root.namespace().unwrap_or_default();

    let mut certificates = server_certificates(&name, &naming::root_shard_workload(&name), &namespace, root);
    certificates.push(with_orgs(
	leaf(&naming::certificate(&name, naming::OPERATOR_CLIENT), authority_issuer(root, Authority::Client), "kcp-operator", &[certmanager::USAGE_CLIENT_AUTH]),
	&[ORG_ADMIN],
    ));

    certificates
}

pub fn shard_certificates(shard: &api::Shard, root: &api::RootShard) -> Vec<CertificateRequest> {
    let name = shard.name_any();
    let namespace = shard.namespace().unwrap_or_default();

    server_certificates(&name, &naming::shard_workload(&name), &namespace, root)
}

pub fn front_proxy_certificates(fp: &api::FrontProxy, root: &api::RootShard) -> Vec<CertificateRequest> {
    let name = fp.name_any();
    let namespace = fp.namespace().unwrap_or_default();

    let mut dns_names = vec![root.spec.external.hostname.clone()];
    dns_names.extend(naming::service_dns_names(&naming::front_proxy_workload(&name), &namespace, root.cluster_domain()));

    vec![
	with_dns(
	    leaf(&naming::certificate(&name, naming::SERVER), authority_issuer(root, Authority::Server), &root.spec.external.hostname, &[certmanager::USAGE_SERVER_AUTH]),
	    dns_names,
	),
	leaf(&naming::certificate(&name, naming::REQUESTHEADER), authority_issuer(root, Authority::RequestHeaderClient), "kcp-front-proxy", &[certmanager::USAGE_CLIENT_AUTH]),
	with_orgs(
	    leaf(&naming::certificate(&name, naming::CLIENT), authority_issuer(root, Authority::Client), "kcp-front-proxy", &[certmanager::USAGE_CLIENT_AUTH]),
	    &[ORG_FRONT_PROXY],
	),
    ]
}

/* The client certificate packaged into a Kubeconfig's secret */
pub fn kubeconfig_certificate(kubeconfig: &api::Kubeconfig, root: &api::RootShard) -> CertificateRequest {
    let name = naming::certificate(&kubeconfig.name_any(), naming::CLIENT);
    let groups: Vec<&str> = kubeconfig.spec.groups.iter().map(|g| g.as_str()).collect();

    let mut request = with_orgs(
	leaf(&name, authority_issuer(root, Authority::Client), &kubeconfig.spec.username, &[certmanager::USAGE_CLIENT_AUTH]),
	&groups,
    );
    request.spec.duration = Some(kubeconfig.validity().to_string());
    if groups.is_empty() {
	request.spec.subject = None;
    }

    request
}

impl CertificateRequest {

    /* Copies the requested spec onto the live object */
    pub fn apply(&self, mut certificate: Certificate) -> Certificate {
	certificate.spec = self.spec.clone();
	certificate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::{ObjectReference, RootShard, RootShardSpec, Shard, ShardSpec, FrontProxy, FrontProxySpec, Kubeconfig, KubeconfigSpec};

    fn root() -> RootShard {
	let mut rs = RootShard::new("r1", RootShardSpec::default());
	rs.metadata.namespace = Some("ns".into());
	rs.spec.external.hostname = "kcp.example.com".into();
	rs.spec.external.port = 443;
	rs
    }

    fn names<T>(requests: &[T], name: impl Fn(&T) -> &str) -> Vec<String> {
	requests.iter().map(|r| name(r).to_string()).collect()
    }

    #[test]
    fn generated_authority_chain() {
	let rs = root();
	let authorities = root_shard_authorities(&rs);

	assert_eq!(names(&authorities, |c| c.name.as_str()), vec![
	    "r1-ca", "r1-server-ca", "r1-client-ca", "r1-service-account-ca",
	    "r1-requestheader-client-ca", "r1-front-proxy-client-ca",
	]);
	assert!(authorities.iter().all(|c| c.spec.is_ca));
	assert_eq!(authorities[0].spec.issuer_ref.name, "r1-selfsigned");
	assert!(authorities[1..].iter().all(|c| c.spec.issuer_ref.name == "r1-ca"));

	let issuers = root_shard_issuers(&rs);
	assert_eq!(issuers.len(), 7);
	assert!(issuers[0].spec.self_signed.is_some());
    }

    #[test]
    fn external_issuer_signs_intermediates_directly() {
	let mut rs = root();
	rs.spec.certificates.issuer_ref = Some(api::IssuerReference{
	    name: "corp-ca".into(),
	    kind: Some("ClusterIssuer".into()),
	    group: None,
	});

	let authorities = root_shard_authorities(&rs);
	assert_eq!(authorities.len(), 5);
	assert!(authorities.iter().all(|c| c.spec.issuer_ref.name == "corp-ca" && c.spec.issuer_ref.kind == "ClusterIssuer"));
	assert_eq!(root_shard_issuers(&rs).len(), 5);
    }

    #[test]
    fn user_root_authority_is_not_requested() {
	let mut rs = root();
	rs.spec.certificates.ca_secret_ref = Some(ObjectReference::new("my-ca"));

	let authorities = root_shard_authorities(&rs);
	assert_eq!(authorities.len(), 5);

	let issuers = root_shard_issuers(&rs);
	let root_issuer = issuers.iter().find(|i| i.name == "r1-ca").unwrap();
	assert_eq!(root_issuer.spec.ca.as_ref().unwrap().secret_name, "my-ca");
    }

    #[test]
    fn shard_certificates_chain_to_root_authorities() {
	let mut shard = Shard::new("s1", ShardSpec::default());
	shard.metadata.namespace = Some("ns".into());

	let certificates = shard_certificates(&shard, &root());
	assert_eq!(names(&certificates, |c| c.name.as_str()), vec![
	    "s1-server", "s1-service-account", "s1-virtual-workspaces",
	    "s1-logical-cluster-admin", "s1-external-logical-cluster-admin",
	]);
	assert_eq!(certificates[0].spec.issuer_ref.name, "r1-server-ca");
	assert!(certificates[0].spec.dns_names.contains(&String::from("s1-shard-kcp.ns.svc.cluster.local")));
	assert_eq!(certificates[1].spec.issuer_ref.name, "r1-service-account-ca");
	assert_eq!(certificates[3].spec.issuer_ref.name, "r1-client-ca");
	assert_eq!(certificates.iter().filter(|c| c.spec.secret_name == c.name).count(), 5);
    }

    #[test]
    fn root_shard_gets_an_operator_credential() {
	let certificates = root_shard_certificates(&root());
	let operator = certificates.last().unwrap();

	assert_eq!(operator.name, "r1-operator-client");
	assert_eq!(operator.spec.subject.as_ref().unwrap().organizations, vec![ORG_ADMIN]);
    }

    #[test]
    fn front_proxy_serves_the_external_hostname() {
	let mut fp = FrontProxy::new("fp1", FrontProxySpec::default());
	fp.metadata.namespace = Some("ns".into());

	let certificates = front_proxy_certificates(&fp, &root());
	assert_eq!(names(&certificates, |c| c.name.as_str()), vec!["fp1-server", "fp1-requestheader", "fp1-client"]);
	assert_eq!(certificates[0].spec.dns_names[0], "kcp.example.com");
	assert_eq!(certificates[1].spec.issuer_ref.name, "r1-requestheader-client-ca");
    }

    #[test]
    fn kubeconfig_certificate_carries_identity() {
	let mut kc = Kubeconfig::new("admin", KubeconfigSpec{
	    username: "alice".into(),
	    groups: vec!["system:kcp:admin".into()],
	    validity: Some("24h".into()),
	    ..Default::default()
	});
	kc.metadata.namespace = Some("ns".into());

	let request = kubeconfig_certificate(&kc, &root());
	assert_eq!(request.name, "admin-client");
	assert_eq!(request.spec.common_name.as_deref(), Some("alice"));
	assert_eq!(request.spec.duration.as_deref(), Some("24h"));
	assert_eq!(request.spec.subject.unwrap().organizations, vec!["system:kcp:admin"]);
    }
}
