/*
 * The required-object set of a bundle target: a pure function of the
 * target (and its RootShard) returning every object the target needs, in a
 * stable order.
 */
use crate::bundle::object::{BundleObjectKind, BundleObjectRef};
use crate::dependency::ResolvedTarget;
use crate::naming;
use crate::naming::Authority;
use kcp_operator_api as api;

/* Certificate secrets of a kcp server (root shard or shard) */
const SERVER_CERTIFICATES: [&str; 5] = [
    naming::SERVER,
    naming::SERVICE_ACCOUNT,
    naming::VIRTUAL_WORKSPACES,
    naming::LOGICAL_CLUSTER_ADMIN,
    naming::EXTERNAL_LOGICAL_CLUSTER_ADMIN,
];

const SERVER_KUBECONFIGS: [&str; 2] = [
    naming::LOGICAL_CLUSTER_ADMIN,
    naming::EXTERNAL_LOGICAL_CLUSTER_ADMIN,
];

const FRONT_PROXY_CERTIFICATES: [&str; 3] = [
    naming::SERVER,
    naming::REQUESTHEADER,
    naming::CLIENT,
];

/*
 * Authority secrets every target depends on. The root authority is left
 * out when an external issuer signs the intermediates directly.
 */
fn authority_objects(root: &api::RootShard, namespace: &str) -> Vec<BundleObjectRef> {
    let mut objects = vec![];

    if root.spec.certificates.issuer_ref.is_none() {
	objects.push(BundleObjectRef::new(BundleObjectKind::Secret, namespace, &Authority::Root.secret_name(root)));
    }
    for authority in Authority::INTERMEDIATES {
	objects.push(BundleObjectRef::new(BundleObjectKind::Secret, namespace, &authority.secret_name(root)));
    }

    objects
}

fn server_objects(name: &str, workload: &str, namespace: &str) -> Vec<BundleObjectRef> {
    let mut objects = vec![];

    for purpose in SERVER_CERTIFICATES {
	objects.push(BundleObjectRef::new(BundleObjectKind::Secret, namespace, &naming::certificate(name, purpose)));
    }
    for purpose in SERVER_KUBECONFIGS {
	objects.push(BundleObjectRef::new(BundleObjectKind::Secret, namespace, &naming::kubeconfig_secret(name, purpose)));
    }
    objects.push(BundleObjectRef::new(BundleObjectKind::Service, namespace, workload));
    objects.push(BundleObjectRef::new(BundleObjectKind::Deployment, namespace, workload));

    objects
}

fn front_proxy_objects(name: &str, namespace: &str) -> Vec<BundleObjectRef> {
    let mut objects = vec![];
    let workload = naming::front_proxy_workload(name);

    for purpose in FRONT_PROXY_CERTIFICATES {
	objects.push(BundleObjectRef::new(BundleObjectKind::Secret, namespace, &naming::certificate(name, purpose)));
    }
    objects.push(BundleObjectRef::new(BundleObjectKind::Secret, namespace, &naming::front_proxy_dynamic_kubeconfig(name)));
    objects.push(BundleObjectRef::new(BundleObjectKind::ConfigMap, namespace, &naming::front_proxy_config(name)));
    objects.push(BundleObjectRef::new(BundleObjectKind::Service, namespace, &workload));
    objects.push(BundleObjectRef::new(BundleObjectKind::Deployment, namespace, &workload));

    objects
}

pub fn required_objects(target: &ResolvedTarget) -> Vec<BundleObjectRef> {
    let namespace = target.namespace();
    let name = target.name();

    let mut objects = authority_objects(target.root_shard(), &namespace);

    match target {
	ResolvedTarget::RootShard(_) => {
	    objects.extend(server_objects(&name, &naming::root_shard_workload(&name), &namespace));
	},
	ResolvedTarget::Shard(_, _) => {
	    objects.extend(server_objects(&name, &naming::shard_workload(&name), &namespace));
	},
	ResolvedTarget::FrontProxy(_, _) => {
	    objects.extend(front_proxy_objects(&name, &namespace));
	},
    }

    // only materialized when the user supplied an extra CA bundle
    if target.ca_bundle_secret_ref().is_some() {
	objects.push(BundleObjectRef::new(BundleObjectKind::Secret, &namespace, &naming::merged_ca_bundle(&name)));
    }

    objects
}
