/*
 * Deployment, Service and ConfigMap templates of the kcp workloads.
 *
 * Templates only set the fields they own; everything else on the live
 * object is kept, so they can be handed to the object reconciler as-is.
 */
use crate::naming;
use kcp_operator_api as api;

use k8s_openapi::api::apps::v1::{Deployment as KubeDeployment, DeploymentSpec};
use k8s_openapi::api::core::v1::ConfigMap as KubeConfigMap;
use k8s_openapi::api::core::v1::Service as KubeService;
use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, Container, ContainerPort, PodSpec, SecretVolumeSource, ServicePort, ServiceSpec, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const DEFAULT_IMAGE_REPOSITORY: &str = "ghcr.io/kcp-dev/kcp";
pub const DEFAULT_IMAGE_TAG: &str = "v0.27.1";
pub const DEFAULT_REPLICAS: i32 = 1;

const CERTS_DIR: &str = "/etc/kcp/tls";
const CONFIG_DIR: &str = "/etc/kcp/config";

pub fn image(spec: Option<&api::ImageSpec>) -> String {
    let repository = spec.and_then(|s| s.repository.clone()).unwrap_or_else(|| DEFAULT_IMAGE_REPOSITORY.to_string());
    let tag = spec.and_then(|s| s.tag.clone()).unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string());

    format!("{}:{}", repository, tag)
}

/* Everything that differs between the three workload kinds */
#[derive(Clone, Debug, PartialEq)]
pub struct WorkloadTemplate {
    /* name of both the Deployment and the Service */
    pub name: String,
    pub component: String,
    pub instance: String,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub port: i32,
    /* (volume name, secret name); each mounted below the certs directory */
    pub secrets: Vec<(String, String)>,
    pub config_map: Option<String>,
    pub replicas: i32,
}

impl WorkloadTemplate {

    pub fn labels(&self) -> BTreeMap<String, String> {
	BTreeMap::from([
	    (String::from("app.kubernetes.io/name"), String::from("kcp")),
	    (String::from("app.kubernetes.io/component"), self.component.clone()),
	    (String::from("app.kubernetes.io/instance"), self.instance.clone()),
	])
    }

    fn volumes(&self) -> (Vec<Volume>, Vec<VolumeMount>) {
	let mut volumes = vec![];
	let mut mounts = vec![];

	for (volume, secret) in &self.secrets {
	    volumes.push(Volume{
		name: volume.clone(),
		secret: Some(SecretVolumeSource{ secret_name: Some(secret.clone()), ..Default::default() }),
		..Default::default()
	    });
	    mounts.push(VolumeMount{
		name: volume.clone(),
		mount_path: format!("{}/{}", CERTS_DIR, volume),
		read_only: Some(true),
		..Default::default()
	    });
	}

	if let Some(cm) = &self.config_map {
	    volumes.push(Volume{
		name: String::from("config"),
		config_map: Some(ConfigMapVolumeSource{ name: cm.clone(), ..Default::default() }),
		..Default::default()
	    });
	    mounts.push(VolumeMount{
		name: String::from("config"),
		mount_path: String::from(CONFIG_DIR),
		read_only: Some(true),
		..Default::default()
	    });
	}

	(volumes, mounts)
    }
}

fn same_source(live: &Volume, volume: &Volume) -> bool {
    match (&live.secret, &volume.secret, &live.config_map, &volume.config_map) {
	(Some(live), Some(wanted), None, None) => live.secret_name == wanted.secret_name,
	(None, None, Some(live), Some(wanted)) => live.name == wanted.name,
	_ => false,
    }
}

/*
 * Volumes in template order. A live volume already pointing at the right
 * source is kept as it is, with the fields the API server defaulted.
 */
fn merge_volumes(live: Option<Vec<Volume>>, volumes: Vec<Volume>) -> Vec<Volume> {
    let live = live.unwrap_or_default();

    volumes.into_iter()
	.map(|volume| {
	    match live.iter().find(|v| v.name == volume.name && same_source(v, &volume)) {
		Some(existing) => existing.clone(),
		None => volume,
	    }
	})
	.collect()
}

pub fn secret_path(volume: &str, file: &str) -> String {
    format!("{}/{}/{}", CERTS_DIR, volume, file)
}

pub fn config_path(file: &str) -> String {
    format!("{}/{}", CONFIG_DIR, file)
}

/*
 * The scale-to-zero side channel. A workload whose owner carries the bundle
 * annotation records its desired replicas on the Deployment and runs with
 * zero locally; otherwise the record is dropped and the desired count runs.
 */
pub fn apply_bundle_scale(deployment: &mut KubeDeployment, owner: &ObjectMeta, desired: i32) {
    let bundled = owner.annotations.as_ref().map_or(false, |a| a.contains_key(api::BUNDLE_ANNOTATION));
    let annotations = deployment.metadata.annotations.get_or_insert_with(BTreeMap::new);

    let replicas = if bundled && desired > 0 {
	annotations.insert(String::from(api::BUNDLE_DESIRED_REPLICAS_ANNOTATION), desired.to_string());
	0
    } else {
	annotations.remove(api::BUNDLE_DESIRED_REPLICAS_ANNOTATION);
	desired
    };

    if annotations.is_empty() {
	deployment.metadata.annotations = None;
    }
    deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
}

pub fn deployment(mut deployment: KubeDeployment, template: &WorkloadTemplate, owner: &ObjectMeta) -> KubeDeployment {
    let labels = template.labels();
    let (volumes, mounts) = template.volumes();

    deployment.metadata.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());

    let spec = deployment.spec.get_or_insert_with(DeploymentSpec::default);
    spec.selector = LabelSelector{ match_labels: Some(labels.clone()), ..Default::default() };

    let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
    pod.volumes = Some(merge_volumes(pod.volumes.take(), volumes));

    let container = Container{
	name: template.component.clone(),
	image: Some(template.image.clone()),
	command: Some(template.command.clone()),
	args: Some(template.args.clone()),
	ports: Some(vec![ContainerPort{
	    name: Some(String::from("https")),
	    container_port: template.port,
	    protocol: Some(String::from("TCP")),
	    ..Default::default()
	}]),
	volume_mounts: Some(mounts),
	..Default::default()
    };
    match pod.containers.iter_mut().find(|c| c.name == container.name) {
	Some(existing) => {
	    existing.image = container.image;
	    existing.command = container.command;
	    existing.args = container.args;
	    existing.ports = container.ports;
	    existing.volume_mounts = container.volume_mounts;
	},
	None => pod.containers.push(container),
    }

    spec.template.metadata.get_or_insert_with(ObjectMeta::default).labels = Some(labels);

    apply_bundle_scale(&mut deployment, owner, template.replicas);
    deployment
}

pub fn service(mut service: KubeService, template: &WorkloadTemplate) -> KubeService {
    service.metadata.labels.get_or_insert_with(BTreeMap::new).extend(template.labels());

    let spec = service.spec.get_or_insert_with(ServiceSpec::default);
    spec.selector = Some(template.labels());
    spec.type_ = Some(spec.type_.clone().unwrap_or_else(|| String::from("ClusterIP")));
    spec.ports = Some(vec![ServicePort{
	name: Some(String::from("https")),
	port: template.port,
	target_port: Some(IntOrString::Int(template.port)),
	protocol: Some(String::from("TCP")),
	..Default::default()
    }]);

    service
}

/*
 * Routing table of the front-proxy: every workspace path goes to the root
 * shard.
 */
pub fn front_proxy_config(mut cm: KubeConfigMap, root: &api::RootShard) -> KubeConfigMap {
    let namespace = root.metadata.namespace.clone().unwrap_or_default();
    let name = root.metadata.name.clone().unwrap_or_default();
    let backend = naming::service_url(&naming::root_shard_workload(&name), &namespace, root.cluster_domain());

    let mapping = format!(
	"- path: /clusters/\n  backend: {}\n  backend_server_ca: {}\n  proxy_client_cert: {}\n  proxy_client_key: {}\n",
	backend,
	secret_path("server-ca", "tls.crt"),
	secret_path("requestheader", "tls.crt"),
	secret_path("requestheader", "tls.key"),
    );

    cm.data.get_or_insert_with(BTreeMap::new).insert(String::from("path-mapping.yaml"), mapping);
    cm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciling::{plan, Plan};

    fn template(replicas: i32) -> WorkloadTemplate {
	WorkloadTemplate{
	    name: "s1-shard-kcp".into(),
	    component: "shard".into(),
	    instance: "s1".into(),
	    image: image(None),
	    command: vec!["/kcp".into()],
	    args: vec!["start".into()],
	    port: naming::KCP_PORT,
	    secrets: vec![("server".into(), "s1-server".into())],
	    config_map: None,
	    replicas: replicas,
	}
    }

    fn owner(bundled: bool) -> ObjectMeta {
	ObjectMeta{
	    name: Some("s1".into()),
	    annotations: bundled.then(|| BTreeMap::from([(String::from(api::BUNDLE_ANNOTATION), String::from("b1"))])),
	    ..Default::default()
	}
    }

    fn desired_annotation(deployment: &KubeDeployment) -> Option<String> {
	deployment.metadata.annotations.as_ref().and_then(|a| a.get(api::BUNDLE_DESIRED_REPLICAS_ANNOTATION).cloned())
    }

    #[test]
    fn default_image() {
	assert_eq!(image(None), "ghcr.io/kcp-dev/kcp:v0.27.1");
	let custom = api::ImageSpec{ repository: Some("registry.local/kcp".into()), tag: None };
	assert_eq!(image(Some(&custom)), "registry.local/kcp:v0.27.1");
    }

    #[test]
    fn bundled_workload_is_suspended() {
	let d = deployment(KubeDeployment::default(), &template(3), &owner(true));

	assert_eq!(d.spec.as_ref().unwrap().replicas, Some(0));
	assert_eq!(desired_annotation(&d).as_deref(), Some("3"));
    }

    #[test]
    fn unbundling_restores_the_replicas() {
	let suspended = deployment(KubeDeployment::default(), &template(3), &owner(true));
	let d = deployment(suspended, &template(3), &owner(false));

	assert_eq!(d.spec.as_ref().unwrap().replicas, Some(3));
	assert_eq!(desired_annotation(&d), None);
	assert!(d.metadata.annotations.is_none());
    }

    #[test]
    fn template_is_idempotent() {
	let once = deployment(KubeDeployment::default(), &template(2), &owner(true));
	let twice = deployment(once.clone(), &template(2), &owner(true));
	assert_eq!(once, twice);
    }

    #[test]
    fn unrelated_containers_are_kept() {
	let mut live = deployment(KubeDeployment::default(), &template(1), &owner(false));
	if let Some(pod) = live.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
	    pod.containers.push(Container{ name: "sidecar".into(), ..Default::default() });
	}

	let d = deployment(live, &template(1), &owner(false));
	assert_eq!(d.spec.unwrap().template.spec.unwrap().containers.len(), 2);
    }

    /* What the API server hands back: volume modes filled in */
    fn server_defaulted(mut d: KubeDeployment) -> KubeDeployment {
	let pod = d.spec.as_mut().and_then(|s| s.template.spec.as_mut()).unwrap();
	for volume in pod.volumes.iter_mut().flatten() {
	    if let Some(secret) = volume.secret.as_mut() {
		secret.default_mode = Some(420);
	    }
	    if let Some(cm) = volume.config_map.as_mut() {
		cm.default_mode = Some(420);
	    }
	}
	d
    }

    fn with_config(mut t: WorkloadTemplate) -> WorkloadTemplate {
	t.config_map = Some("f1-config".into());
	t
    }

    #[test]
    fn server_defaults_do_not_trigger_a_write() {
	let t = with_config(template(2));
	let live = server_defaulted(deployment(KubeDeployment::default(), &t, &owner(false)));

	let planned = plan(Some(&live), "ns", "s1-shard-kcp", |d| deployment(d, &t, &owner(false)));
	assert_eq!(planned, Plan::Nothing);
    }

    #[test]
    fn changed_volume_source_is_rewritten() {
	let live = server_defaulted(deployment(KubeDeployment::default(), &template(1), &owner(false)));

	let mut t = template(1);
	t.secrets = vec![("server".into(), "s1-server-rotated".into())];
	let d = deployment(live, &t, &owner(false));

	let volumes = d.spec.unwrap().template.spec.unwrap().volumes.unwrap();
	assert_eq!(volumes.len(), 1);
	let secret = volumes[0].secret.as_ref().unwrap();
	assert_eq!(secret.secret_name.as_deref(), Some("s1-server-rotated"));
	assert_eq!(secret.default_mode, None);
    }

    #[test]
    fn service_selects_the_workload() {
	let svc = service(KubeService::default(), &template(1));
	let spec = svc.spec.unwrap();

	assert_eq!(spec.selector.unwrap()["app.kubernetes.io/instance"], "s1");
	assert_eq!(spec.ports.unwrap()[0].port, 6443);
    }
}
