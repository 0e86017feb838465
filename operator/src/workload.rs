/*
 * Reconcile steps shared by the RootShard, Shard and FrontProxy
 * controllers.
 *
 * Steps that are independent of each other report errors through a
 * collector instead of returning early, so one failing step never blocks
 * its siblings. Steps waiting on the issuer return `true` while pending.
 */
use crate::context::Context;
use crate::credentials::{self, KubeconfigDocument};
use crate::errors::Error;
use crate::naming;
use crate::naming::Authority;
use crate::pki::{CertificateRequest, IssuerRequest};
use crate::reconciling::{self, ensure_owner_ref};
use crate::remote::{self, Access, RemoteAdmin, RemoteConnector};
use crate::resources::{self, WorkloadTemplate};
use crate::store::ObjectStore;
use kcp_operator_api as api;
use api::certmanager::{Certificate, Issuer};
use api::{Condition, ConditionStatus, ObjectReference};

use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Secret as KubeSecret;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use std::sync::Arc;

pub async fn reconcile_issuers(ctx: &Context, namespace: &str, issuers: &[IssuerRequest], owner: &OwnerReference, errors: &mut Vec<Error>) {
    for request in issuers {
	let result = reconciling::reconcile(&ctx.kube_client, namespace, &request.name, |mut issuer: Issuer| {
	    issuer.spec = request.spec.clone();
	    ensure_owner_ref(&mut issuer.metadata, owner.clone());
	    issuer
	}).await;

	if let Err(err) = result {
	    errors.push(err);
	}
    }
}

pub async fn reconcile_certificates(ctx: &Context, namespace: &str, certificates: &[CertificateRequest], owner: &OwnerReference, errors: &mut Vec<Error>) {
    for request in certificates {
	let result = reconciling::reconcile(&ctx.kube_client, namespace, &request.name, |certificate: Certificate| {
	    let mut certificate = request.apply(certificate);
	    ensure_owner_ref(&mut certificate.metadata, owner.clone());
	    certificate
	}).await;

	if let Err(err) = result {
	    errors.push(err);
	}
    }
}

/*
 * Writes a kubeconfig document into `secret_name`, once both the client
 * certificate and the server authority are issued.
 */
pub async fn reconcile_kubeconfig_secret(ctx: &Context, namespace: &str, secret_name: &str, cert_secret: &str, root: &api::RootShard, server: &str, user: &str, owner: &OwnerReference) -> Result<bool, Error> {
    let ca_secret = Authority::Server.secret_name(root);
    let credential = match credentials::load(ctx.store.as_ref(), namespace, cert_secret, &ca_secret).await? {
	Some(credential) => credential,
	None => {
	    log::debug!("Waiting for {} and {} to be issued", cert_secret, ca_secret);
	    return Ok(true);
	},
    };

    let data = KubeconfigDocument::new(&root.name_any(), server, user, &credential).secret_data()?;
    reconciling::reconcile(&ctx.kube_client, namespace, secret_name, |mut secret: KubeSecret| {
	secret.data = Some(data.clone());
	ensure_owner_ref(&mut secret.metadata, owner.clone());
	secret
    }).await?;

    Ok(false)
}

/* The admin kubeconfigs a kcp server (root shard or shard) carries */
pub async fn reconcile_admin_kubeconfigs(ctx: &Context, namespace: &str, owner_name: &str, internal_url: &str, root: &api::RootShard, owner: &OwnerReference, errors: &mut Vec<Error>) -> bool {
    let mut pending = false;
    let targets = [
	(naming::LOGICAL_CLUSTER_ADMIN, internal_url.to_string()),
	(naming::EXTERNAL_LOGICAL_CLUSTER_ADMIN, root.external_url()),
    ];

    for (purpose, server) in targets {
	let secret_name = naming::kubeconfig_secret(owner_name, purpose);
	let cert_secret = naming::certificate(owner_name, purpose);

	match reconcile_kubeconfig_secret(ctx, namespace, &secret_name, &cert_secret, root, &server, purpose, owner).await {
	    Ok(waiting) => pending |= waiting,
	    Err(err) => errors.push(err),
	}
    }

    pending
}

/*
 * <owner>-merged-ca-bundle, only when a user bundle is configured: the
 * client authority followed by the user's certificates.
 */
pub async fn reconcile_merged_ca_bundle(ctx: &Context, namespace: &str, owner_name: &str, root: &api::RootShard, bundle: Option<&ObjectReference>, owner: &OwnerReference) -> Result<bool, Error> {
    let bundle = match bundle {
	Some(bundle) => bundle,
	None => return Ok(false),
    };

    let authority = ctx.store.get_secret(namespace, &Authority::Client.secret_name(root)).await?;
    let user_bundle = ctx.store.get_secret(namespace, &bundle.name).await?;
    let (authority, user_bundle) = match (authority, user_bundle) {
	(Some(authority), Some(user_bundle)) => (authority, user_bundle),
	_ => return Ok(true),
    };

    let data = credentials::merged_ca_bundle(&authority, &user_bundle)?;
    reconciling::reconcile(&ctx.kube_client, namespace, &naming::merged_ca_bundle(owner_name), |mut secret: KubeSecret| {
	secret.data = Some(data.clone());
	ensure_owner_ref(&mut secret.metadata, owner.clone());
	secret
    }).await?;

    Ok(false)
}

pub async fn reconcile_config_map(ctx: &Context, namespace: &str, name: &str, root: &api::RootShard, owner: &OwnerReference) -> Result<(), Error> {
    reconciling::reconcile(&ctx.kube_client, namespace, name, |cm: KubeConfigMap| {
	let mut cm = resources::front_proxy_config(cm, root);
	ensure_owner_ref(&mut cm.metadata, owner.clone());
	cm
    }).await?;

    Ok(())
}

/*
 * Service and Deployment of a workload; returns the live Deployment the
 * Available condition is computed from.
 */
pub async fn reconcile_workload(ctx: &Context, namespace: &str, template: &WorkloadTemplate, owner_meta: &ObjectMeta, owner: &OwnerReference, errors: &mut Vec<Error>) -> Option<KubeDeployment> {
    let service = reconciling::reconcile(&ctx.kube_client, namespace, &template.name, |svc: KubeService| {
	let mut svc = resources::service(svc, template);
	ensure_owner_ref(&mut svc.metadata, owner.clone());
	svc
    }).await;
    if let Err(err) = service {
	errors.push(err);
    }

    let deployment = reconciling::reconcile(&ctx.kube_client, namespace, &template.name, |d: KubeDeployment| {
	let mut d = resources::deployment(d, template, owner_meta);
	ensure_owner_ref(&mut d.metadata, owner.clone());
	d
    }).await;
    if let Err(err) = deployment {
	errors.push(err);
	return None;
    }

    match ctx.store.get_deployment(namespace, &template.name).await {
	Ok(deployment) => deployment,
	Err(err) => {
	    errors.push(err);
	    None
	},
    }
}

/*
 * Available is True once the Deployment runs all of its desired replicas.
 * A suspended (bundled) workload is never available.
 */
pub fn available_condition(deployment: Option<&KubeDeployment>, generation: Option<i64>) -> Condition {
    let (desired, ready) = match deployment {
	None => (0, 0),
	Some(d) => (
	    d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
	    d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0),
	),
    };

    let condition = if deployment.is_none() {
	Condition::new(api::CONDITION_AVAILABLE, ConditionStatus::False, api::REASON_DEPLOYMENT_UNAVAILABLE, "deployment does not exist yet")
    } else if desired > 0 && ready >= desired {
	Condition::new(api::CONDITION_AVAILABLE, ConditionStatus::True, api::REASON_DEPLOYMENT_READY, &format!("{} of {} replicas ready", ready, desired))
    } else {
	Condition::new(api::CONDITION_AVAILABLE, ConditionStatus::False, api::REASON_DEPLOYMENT_UNAVAILABLE, &format!("{} of {} replicas ready", ready, desired))
    };

    condition.with_generation(generation)
}

/*
 * Mirrors the Ready condition of the Bundle named by the bundle
 * annotation. None when the resource is not bundled.
 */
pub async fn bundle_condition(store: &dyn ObjectStore, meta: &ObjectMeta) -> Option<Condition> {
    let name = meta.annotations.as_ref()?.get(api::BUNDLE_ANNOTATION)?;
    let namespace = meta.namespace.clone().unwrap_or_default();

    let condition = match store.get_bundle(&namespace, name).await {
	Ok(Some(bundle)) => {
	    let ready = bundle.status.as_ref()
		.and_then(|s| crate::conditions::find(&s.conditions, api::CONDITION_READY).cloned());
	    match ready {
		Some(ready) if ready.is_true() => Condition::new(api::CONDITION_BUNDLE, ConditionStatus::True, api::REASON_BUNDLE_READY, &ready.message),
		Some(ready) => Condition::new(api::CONDITION_BUNDLE, ConditionStatus::False, api::REASON_BUNDLE_NOT_READY, &ready.message),
		None => Condition::new(api::CONDITION_BUNDLE, ConditionStatus::False, api::REASON_BUNDLE_NOT_READY, &format!("Bundle {} has not been evaluated yet", name)),
	    }
	},
	Ok(None) => Condition::new(api::CONDITION_BUNDLE, ConditionStatus::False, api::REASON_BUNDLE_NOT_FOUND, &format!("Bundle {} not found", name)),
	Err(err) => Condition::new(api::CONDITION_BUNDLE, ConditionStatus::Unknown, api::REASON_BUNDLE_NOT_FOUND, &format!("failed to get Bundle {}: {}", name, err)),
    };

    Some(condition.with_generation(meta.generation))
}

/* Applies (or drops) the Bundle condition and derives the phase */
pub fn finish_status(status: &mut api::WorkloadStatus, bundle: Option<Condition>, deleting: bool) {
    match bundle {
	Some(condition) => crate::conditions::update(&mut status.conditions, condition),
	None => crate::conditions::remove(&mut status.conditions, api::CONDITION_BUNDLE),
    }
    status.phase = Some(crate::conditions::workload_phase(&status.conditions, deleting, status.phase));
}

/*
 * Whether the RootShard can be reached for remote provisioning: it must
 * be live and its operator credential issued.
 */
pub async fn remote_reachable(store: &dyn ObjectStore, root: Option<&api::RootShard>) -> Result<bool, Error> {
    let root = match root {
	Some(root) if root.metadata.deletion_timestamp.is_none() => root,
	_ => return Ok(false),
    };

    let namespace = root.namespace().unwrap_or_default();
    let credential = naming::certificate(&root.name_any(), naming::OPERATOR_CLIENT);
    Ok(store.get_secret(&namespace, &credential).await?.is_some())
}

pub fn root_shard_url(root: &api::RootShard) -> String {
    let namespace = root.namespace().unwrap_or_default();
    naming::service_url(&naming::root_shard_workload(&root.name_any()), &namespace, root.cluster_domain())
}

pub async fn grant_remote_access(ctx: &Context, root: &api::RootShard, access: Access, namespace: &str, name: &str) -> Result<(), Error> {
    let admin = ctx.remote.connect(root, &root_shard_url(root), remote::ROOT_CLUSTER).await?;
    remote::ensure_access(admin.as_ref(), access, namespace, name).await
}

/* Name of the RootShard a workload is configured for, if any */
pub fn root_shard_name(config: &api::RootShardConfig) -> Option<&str> {
    config.reference.as_ref().map(|r| r.name.as_str()).filter(|name| !name.is_empty())
}

/*
 * Looks up the RootShard a finalizer cleanup has to reach. None means the
 * installation is gone or being deleted and there is nothing left to
 * clean up; a failed lookup is an error and keeps the finalizer.
 */
pub async fn cleanup_root_shard(store: &dyn ObjectStore, namespace: &str, name: Option<&str>) -> Result<Option<api::RootShard>, Error> {
    let name = match name {
	Some(name) => name,
	None => return Ok(None),
    };

    match store.get_root_shard(namespace, name).await? {
	Some(root) if root.metadata.deletion_timestamp.is_none() => Ok(Some(root)),
	_ => Ok(None),
    }
}

/* Admin client for cleanup in a live installation, which needs the operator credential */
pub async fn cleanup_admin(store: &dyn ObjectStore, connector: &dyn RemoteConnector, root: &api::RootShard, cluster: &str) -> Result<Arc<dyn RemoteAdmin>, Error> {
    if !remote_reachable(store, Some(root)).await? {
	return Err(Error::MissingData(format!("operator credential of RootShard {} is missing, cannot clean up", root.name_any())));
    }
    connector.connect(root, &root_shard_url(root), cluster).await
}

/*
 * Deployment template of a kcp server (root shard or shard). With a user
 * CA bundle the merged bundle replaces the client authority.
 */
pub fn server_template(owner: &str, workload: &str, component: &str, root: &api::RootShard, etcd: &api::EtcdConfig, image: Option<&api::ImageSpec>, replicas: Option<i32>, merged_bundle: bool) -> WorkloadTemplate {
    let client_ca = if merged_bundle {
	naming::merged_ca_bundle(owner)
    } else {
	Authority::Client.secret_name(root)
    };

    let secrets = vec![
	(String::from("server"), naming::certificate(owner, naming::SERVER)),
	(String::from("service-account"), naming::certificate(owner, naming::SERVICE_ACCOUNT)),
	(String::from("virtual-workspaces"), naming::certificate(owner, naming::VIRTUAL_WORKSPACES)),
	(String::from("client-ca"), client_ca),
	(String::from("service-account-ca"), Authority::ServiceAccount.secret_name(root)),
	(String::from("requestheader-client-ca"), Authority::RequestHeaderClient.secret_name(root)),
	(String::from("logical-cluster-admin"), naming::kubeconfig_secret(owner, naming::LOGICAL_CLUSTER_ADMIN)),
	(String::from("external-logical-cluster-admin"), naming::kubeconfig_secret(owner, naming::EXTERNAL_LOGICAL_CLUSTER_ADMIN)),
    ];

    let args = vec![
	format!("--etcd-servers={}", etcd.endpoints.join(",")),
	format!("--shard-name={}", owner),
	format!("--external-hostname={}", root.spec.external.hostname),
	format!("--tls-cert-file={}", resources::secret_path("server", credentials::TLS_CERT)),
	format!("--tls-private-key-file={}", resources::secret_path("server", credentials::TLS_KEY)),
	format!("--client-ca-file={}", resources::secret_path("client-ca", credentials::TLS_CERT)),
	format!("--service-account-key-file={}", resources::secret_path("service-account-ca", credentials::TLS_CERT)),
	format!("--service-account-private-key-file={}", resources::secret_path("service-account", credentials::TLS_KEY)),
	format!("--requestheader-client-ca-file={}", resources::secret_path("requestheader-client-ca", credentials::TLS_CERT)),
	String::from("--requestheader-username-headers=X-Remote-User"),
	String::from("--requestheader-group-headers=X-Remote-Group"),
	format!("--logical-cluster-admin-kubeconfig={}", resources::secret_path("logical-cluster-admin", credentials::KUBECONFIG_KEY)),
	format!("--external-logical-cluster-admin-kubeconfig={}", resources::secret_path("external-logical-cluster-admin", credentials::KUBECONFIG_KEY)),
	format!("--virtual-workspaces-tls-cert-file={}", resources::secret_path("virtual-workspaces", credentials::TLS_CERT)),
	format!("--virtual-workspaces-tls-private-key-file={}", resources::secret_path("virtual-workspaces", credentials::TLS_KEY)),
	String::from("--root-directory="),
    ];

    WorkloadTemplate{
	name: workload.to_string(),
	component: component.to_string(),
	instance: owner.to_string(),
	image: resources::image(image),
	command: vec![String::from("/kcp"), String::from("start")],
	args: args,
	port: naming::KCP_PORT,
	secrets: secrets,
	config_map: None,
	replicas: replicas.unwrap_or(resources::DEFAULT_REPLICAS),
    }
}

/*
 * Every step a kcp server shares: certificates, admin kubeconfigs, the
 * optional merged CA bundle and the workload. Returns the Available
 * condition and whether an issued credential is still pending.
 */
pub async fn reconcile_server(ctx: &Context, meta: &ObjectMeta, certificates: &[CertificateRequest], template: &WorkloadTemplate, root: &api::RootShard, ca_bundle: Option<&ObjectReference>, owner: &OwnerReference, errors: &mut Vec<Error>) -> (Condition, bool) {
    let namespace = meta.namespace.clone().unwrap_or_default();
    let owner_name = meta.name.clone().unwrap_or_default();
    let internal_url = naming::service_url(&template.name, &namespace, root.cluster_domain());

    reconcile_certificates(ctx, &namespace, certificates, owner, errors).await;
    let mut pending = reconcile_admin_kubeconfigs(ctx, &namespace, &owner_name, &internal_url, root, owner, errors).await;

    match reconcile_merged_ca_bundle(ctx, &namespace, &owner_name, root, ca_bundle, owner).await {
	Ok(waiting) => pending |= waiting,
	Err(err) => errors.push(err),
    }

    let deployment = reconcile_workload(ctx, &namespace, template, meta, owner, errors).await;
    (available_condition(deployment.as_ref(), meta.generation), pending)
}

/*
 * Grants `access` in the RootShard once its operator credential exists.
 * Returns true while still waiting for that credential.
 */
pub async fn provision_remote_access(ctx: &Context, root: &api::RootShard, access: Access, namespace: &str, name: &str, errors: &mut Vec<Error>) -> bool {
    match remote_reachable(ctx.store.as_ref(), Some(root)).await {
	Ok(true) => {
	    if let Err(err) = grant_remote_access(ctx, root, access, namespace, name).await {
		errors.push(err);
	    }
	    false
	},
	Ok(false) => {
	    log::debug!("Operator credential of RootShard {} not issued yet", root.name_any());
	    true
	},
	Err(err) => {
	    errors.push(err);
	    false
	},
    }
}

/*
 * Finalizer cleanup of `access` in the installation of RootShard `root`.
 * Skipped only when that RootShard is gone or being deleted.
 */
pub async fn cleanup_remote_access(store: &dyn ObjectStore, connector: &dyn RemoteConnector, root: Option<&str>, access: Access, namespace: &str, name: &str) -> Result<(), Error> {
    let root = match cleanup_root_shard(store, namespace, root).await? {
	Some(root) => root,
	None => {
	    log::debug!("RootShard of {}/{} is gone, skipping remote cleanup", namespace, name);
	    return Ok(());
	},
    };

    let admin = cleanup_admin(store, connector, &root, remote::ROOT_CLUSTER).await?;
    remote::revoke_access(admin.as_ref(), access, namespace, name).await
}
