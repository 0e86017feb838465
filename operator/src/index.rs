/*
 * Which resources depend on which parent.
 *
 * Every dependent kind lists the parents it references; a change to a
 * parent is turned into reconcile requests for the dependents found in the
 * controller's own cache.
 */
use kcp_operator_api as api;
use api::{TargetKind, TargetReference};

use kube::Resource;
use kube::ResourceExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::reflector::Store as ReflectorStore;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    pub kind: TargetKind,
    pub namespace: String,
    pub name: String,
}

impl ParentRef {
    pub fn new(kind: TargetKind, namespace: &str, name: &str) -> Self {
	Self{
	    kind: kind,
	    namespace: namespace.to_string(),
	    name: name.to_string(),
	}
    }

    pub fn of<P: ParentKind>(parent: &P) -> Self {
	Self::new(P::KIND, &parent.namespace().unwrap_or_default(), &parent.name_any())
    }
}

/* A kind other resources can point at */
pub trait ParentKind: Resource + ResourceExt {
    const KIND: TargetKind;
}

impl ParentKind for api::RootShard {
    const KIND: TargetKind = TargetKind::RootShard;
}

impl ParentKind for api::Shard {
    const KIND: TargetKind = TargetKind::Shard;
}

impl ParentKind for api::FrontProxy {
    const KIND: TargetKind = TargetKind::FrontProxy;
}

pub trait HasParents {
    fn parents(&self) -> Vec<ParentRef>;
}

fn root_shard_parent<K: ResourceExt>(obj: &K, config: &api::RootShardConfig) -> Vec<ParentRef> {
    let namespace = obj.namespace().unwrap_or_default();

    config.reference.iter()
	.map(|r| ParentRef::new(TargetKind::RootShard, &namespace, &r.name))
	.collect()
}

/* A malformed target has no parents: nothing upstream can fix it */
fn target_parent<K: ResourceExt>(obj: &K, target: &TargetReference) -> Vec<ParentRef> {
    let namespace = obj.namespace().unwrap_or_default();

    target.single()
	.map(|(kind, name)| vec![ParentRef::new(kind, &namespace, name)])
	.unwrap_or_default()
}

impl HasParents for api::Shard {
    fn parents(&self) -> Vec<ParentRef> {
	root_shard_parent(self, &self.spec.root_shard)
    }
}

impl HasParents for api::FrontProxy {
    fn parents(&self) -> Vec<ParentRef> {
	root_shard_parent(self, &self.spec.root_shard)
    }
}

impl HasParents for api::Kubeconfig {
    fn parents(&self) -> Vec<ParentRef> {
	target_parent(self, &self.spec.target)
    }
}

impl HasParents for api::Bundle {
    fn parents(&self) -> Vec<ParentRef> {
	target_parent(self, &self.spec.target)
    }
}

pub fn dependents<K>(parent: &ParentRef, children: &[Arc<K>]) -> Vec<ObjectRef<K>>
where
    K: HasParents + Resource<DynamicType = ()>,
{
    children.iter()
	.filter(|child| child.parents().contains(parent))
	.map(|child| ObjectRef::from_obj(child.as_ref()))
	.collect()
}

/*
 * Watch mapper for `Controller::watches`: maps a changed parent to the
 * dependents currently known to `reader`.
 */
pub fn mapper<P, K>(reader: ReflectorStore<K>) -> impl Fn(P) -> Vec<ObjectRef<K>> + Send + Sync + 'static
where
    P: ParentKind,
    K: HasParents + Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    move |parent: P| {
	let parent = ParentRef::of(&parent);
	let found = dependents(&parent, &reader.state());

	if !found.is_empty() {
	    log::debug!("{} {}/{} changed, requeueing {} dependents", parent.kind, parent.namespace, parent.name, found.len());
	}
	found
    }
}
