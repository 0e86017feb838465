/*
 * Remote provisioning: RBAC objects written into a kcp installation's own
 * admin surface, through a client built from the operator's credential.
 */
use crate::credentials::{self, KubeconfigDocument};
use crate::errors::Error;
use crate::naming;
use crate::naming::Authority;
use crate::store::ObjectStore;
use kcp_operator_api as api;

use async_trait::async_trait;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Config as KubeConfig;
use kube::ResourceExt;
use kube::api::DeleteParams as KubeDeleteParams;
use kube::api::ListParams as KubeListParams;
use kube::api::PostParams as KubePostParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

/* The logical cluster operator-level RBAC lives in */
pub const ROOT_CLUSTER: &str = "root";

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/* Cluster-scoped RBAC operations against one remote logical cluster */
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteAdmin: Send + Sync {
    async fn apply_cluster_role(&self, role: ClusterRole) -> Result<(), Error>;

    async fn apply_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<(), Error>;

    async fn list_cluster_role_bindings(&self, label_selector: &str) -> Result<Vec<ClusterRoleBinding>, Error>;

    /* Deleting an absent binding succeeds */
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /*
     * Opens an admin client for logical cluster `cluster` of the kcp
     * installation `root`, reached through `server`.
     */
    async fn connect(&self, root: &api::RootShard, server: &str, cluster: &str) -> Result<Arc<dyn RemoteAdmin>, Error>;
}

/*
 * Access a Shard or FrontProxy needs on its RootShard: a fixed ClusterRole
 * bound to the identity the workload authenticates with.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Shard,
    FrontProxy,
}

impl Access {

    pub fn role_name(&self) -> &'static str {
	match self {
	    Access::Shard => "system:kcp:operator:shard-access",
	    Access::FrontProxy => "system:kcp:operator:front-proxy",
	}
    }

    pub fn binding_name(&self, namespace: &str, name: &str) -> String {
	format!("{}:{}:{}", self.role_name(), namespace, name)
    }

    fn user(&self, name: &str) -> String {
	match self {
	    Access::Shard => format!("system:kcp:external-logical-cluster-admin:{}", name),
	    Access::FrontProxy => format!("system:kcp:front-proxy:{}", name),
	}
    }

    pub fn role(&self) -> ClusterRole {
	ClusterRole{
	    metadata: ObjectMeta{ name: Some(self.role_name().to_string()), ..Default::default() },
	    rules: Some(vec![
		PolicyRule{
		    api_groups: Some(vec![String::from("core.kcp.io")]),
		    resources: Some(vec![String::from("logicalclusters"), String::from("shards")]),
		    verbs: vec![String::from("get"), String::from("list"), String::from("watch")],
		    ..Default::default()
		},
		PolicyRule{
		    api_groups: Some(vec![String::from("tenancy.kcp.io")]),
		    resources: Some(vec![String::from("workspaces")]),
		    verbs: vec![String::from("get"), String::from("list"), String::from("watch")],
		    ..Default::default()
		},
	    ]),
	    ..Default::default()
	}
    }

    pub fn binding(&self, namespace: &str, name: &str) -> ClusterRoleBinding {
	ClusterRoleBinding{
	    metadata: ObjectMeta{ name: Some(self.binding_name(namespace, name)), ..Default::default() },
	    role_ref: cluster_role_ref(self.role_name()),
	    subjects: Some(vec![user_subject(&self.user(name))]),
	}
    }
}

fn cluster_role_ref(name: &str) -> RoleRef {
    RoleRef{
	api_group: String::from(RBAC_GROUP),
	kind: String::from("ClusterRole"),
	name: name.to_string(),
    }
}

fn user_subject(name: &str) -> Subject {
    Subject{
	api_group: Some(String::from(RBAC_GROUP)),
	kind: String::from("User"),
	name: name.to_string(),
	..Default::default()
    }
}

/* Creates or refreshes the role and its binding for one workload */
pub async fn ensure_access(admin: &dyn RemoteAdmin, access: Access, namespace: &str, name: &str) -> Result<(), Error> {
    admin.apply_cluster_role(access.role()).await?;
    admin.apply_cluster_role_binding(access.binding(namespace, name)).await
}

/* Only the binding is removed; the role is shared by every workload */
pub async fn revoke_access(admin: &dyn RemoteAdmin, access: Access, namespace: &str, name: &str) -> Result<(), Error> {
    admin.delete_cluster_role_binding(&access.binding_name(namespace, name)).await
}

pub fn kubeconfig_owner(namespace: &str, name: &str) -> String {
    format!("{}.{}", namespace, name)
}

pub fn kubeconfig_selector(namespace: &str, name: &str) -> String {
    format!("{}={}", api::KUBECONFIG_OWNER_LABEL, kubeconfig_owner(namespace, name))
}

/* Bindings a Kubeconfig asks for, one per cluster role */
pub fn desired_bindings(kubeconfig: &api::Kubeconfig) -> Vec<ClusterRoleBinding> {
    let namespace = kubeconfig.namespace().unwrap_or_default();
    let name = kubeconfig.name_any();

    let roles = match &kubeconfig.spec.authorization {
	Some(authorization) => &authorization.cluster_role_bindings.cluster_roles,
	None => return vec![],
    };

    roles.iter()
	.collect::<BTreeSet<&String>>()
	.into_iter()
	.map(|role| ClusterRoleBinding{
	    metadata: ObjectMeta{
		name: Some(format!("kubeconfig:{}:{}:{}", namespace, name, role)),
		labels: Some(BTreeMap::from([
		    (String::from(api::KUBECONFIG_OWNER_LABEL), kubeconfig_owner(&namespace, &name)),
		])),
		..Default::default()
	    },
	    role_ref: cluster_role_ref(role),
	    subjects: Some(vec![user_subject(&kubeconfig.spec.username)]),
	})
	.collect()
}

/*
 * Splits the work of converging `existing` to `desired`: names of bindings
 * to delete, and bindings to create or update.
 */
pub fn plan_bindings(desired: Vec<ClusterRoleBinding>, existing: &[ClusterRoleBinding]) -> (Vec<String>, Vec<ClusterRoleBinding>) {
    let wanted: BTreeSet<String> = desired.iter().map(|b| b.name_any()).collect();

    let to_delete = existing.iter()
	.map(|b| b.name_any())
	.filter(|name| !wanted.contains(name))
	.collect();

    (to_delete, desired)
}

/* Every binding is attempted; failures are reported together */
pub async fn sync_bindings(admin: &dyn RemoteAdmin, desired: Vec<ClusterRoleBinding>, selector: &str) -> Result<(), Error> {
    let existing = admin.list_cluster_role_bindings(selector).await?;
    let (to_delete, to_apply) = plan_bindings(desired, &existing);
    let mut errors = vec![];

    for name in to_delete {
	log::debug!("Deleting stale remote binding {}", name);
	if let Err(err) = admin.delete_cluster_role_binding(&name).await {
	    errors.push(err);
	}
    }
    for binding in to_apply {
	if let Err(err) = admin.apply_cluster_role_binding(binding).await {
	    errors.push(err);
	}
    }

    Error::aggregate(errors)
}

pub async fn cleanup_bindings(admin: &dyn RemoteAdmin, selector: &str) -> Result<(), Error> {
    sync_bindings(admin, vec![], selector).await
}

/*
 * RemoteAdmin backed by a kube client. Every call is bounded by `timeout`
 * on top of the client's own connect/read timeouts.
 */
pub struct KubeRemoteAdmin {
    kube_client: KubeClient,
    timeout: Duration,
}

impl KubeRemoteAdmin {

    async fn bounded<T, F>(&self, what: &str, call: F) -> Result<T, Error>
    where
	F: Future<Output = Result<T, kube::Error>>,
    {
	match tokio::time::timeout(self.timeout, call).await {
	    Ok(result) => Ok(result?),
	    Err(_) => Err(Error::Timeout(format!("{} did not finish within {:?}", what, self.timeout))),
	}
    }
}

#[async_trait]
impl RemoteAdmin for KubeRemoteAdmin {
    async fn apply_cluster_role(&self, role: ClusterRole) -> Result<(), Error> {
	let api: KubeApi<ClusterRole> = KubeApi::all(self.kube_client.clone());
	let name = role.name_any();

	match self.bounded("get cluster role", api.get_opt(&name)).await? {
	    None => {
		self.bounded("create cluster role", api.create(&KubePostParams::default(), &role)).await?;
	    },
	    Some(existing) if existing.rules != role.rules => {
		let mut updated = existing.clone();
		updated.rules = role.rules;
		self.bounded("update cluster role", api.replace(&name, &KubePostParams::default(), &updated)).await?;
	    },
	    Some(_) => {},
	}
	Ok(())
    }

    async fn apply_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<(), Error> {
	let api: KubeApi<ClusterRoleBinding> = KubeApi::all(self.kube_client.clone());
	let name = binding.name_any();

	match self.bounded("get cluster role binding", api.get_opt(&name)).await? {
	    None => {
		self.bounded("create cluster role binding", api.create(&KubePostParams::default(), &binding)).await?;
	    },
	    /* roleRef is immutable */
	    Some(existing) if existing.role_ref != binding.role_ref => {
		self.delete_cluster_role_binding(&name).await?;
		self.bounded("create cluster role binding", api.create(&KubePostParams::default(), &binding)).await?;
	    },
	    Some(existing) if existing.subjects != binding.subjects || existing.metadata.labels != binding.metadata.labels => {
		let mut updated = existing.clone();
		updated.subjects = binding.subjects;
		updated.metadata.labels = binding.metadata.labels;
		self.bounded("update cluster role binding", api.replace(&name, &KubePostParams::default(), &updated)).await?;
	    },
	    Some(_) => {},
	}
	Ok(())
    }

    async fn list_cluster_role_bindings(&self, label_selector: &str) -> Result<Vec<ClusterRoleBinding>, Error> {
	let api: KubeApi<ClusterRoleBinding> = KubeApi::all(self.kube_client.clone());
	let params = KubeListParams::default().labels(label_selector);

	let list = self.bounded("list cluster role bindings", api.list(&params)).await?;
	Ok(list.items)
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<(), Error> {
	let api: KubeApi<ClusterRoleBinding> = KubeApi::all(self.kube_client.clone());

	match self.bounded("delete cluster role binding", api.delete(name, &KubeDeleteParams::default())).await {
	    Ok(_) => Ok(()),
	    Err(Error::Kube(kube::Error::Api(resp))) if resp.code == 404 => Ok(()),
	    Err(err) => Err(err),
	}
    }
}

/*
 * Connects with the RootShard's pre-minted operator client certificate,
 * trusting the RootShard's server authority.
 */
pub struct KubeRemoteConnector {
    store: Arc<dyn ObjectStore>,
    timeout: Duration,
}

impl KubeRemoteConnector {
    pub fn new(store: Arc<dyn ObjectStore>, timeout: Duration) -> Self {
	Self{
	    store: store,
	    timeout: timeout,
	}
    }
}

#[async_trait]
impl RemoteConnector for KubeRemoteConnector {
    async fn connect(&self, root: &api::RootShard, server: &str, cluster: &str) -> Result<Arc<dyn RemoteAdmin>, Error> {
	let namespace = root.namespace().unwrap_or_default();
	let root_name = root.name_any();
	let cert_secret = naming::certificate(&root_name, naming::OPERATOR_CLIENT);

	let credential = credentials::load(self.store.as_ref(), &namespace, &cert_secret, &Authority::Server.secret_name(root)).await?
	    .ok_or_else(|| Error::MissingData(format!("operator credential {} of RootShard {} is not issued yet", cert_secret, root_name)))?;

	let url = format!("{}/clusters/{}", server, cluster);
	let document = KubeconfigDocument::new(&root_name, &url, "kcp-operator", &credential);
	let kubeconfig = Kubeconfig::from_yaml(&document.to_yaml()?)
	    .map_err(|e| Error::Kubeconfig(e.to_string()))?;

	let mut config = KubeConfig::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
	    .await
	    .map_err(|e| Error::Kubeconfig(e.to_string()))?;
	config.connect_timeout = Some(self.timeout);
	config.read_timeout = Some(self.timeout);

	let kube_client = KubeClient::try_from(config)?;
	Ok(Arc::new(KubeRemoteAdmin{
	    kube_client: kube_client,
	    timeout: self.timeout,
	}))
    }
}
