use kubert::index::{
    ClusterRemoved, IndexClusterResource, IndexNamespacedResource, NamespacedRemoved,
};
use parking_lot::RwLock;
use std::sync::Arc;

/// Fans a single watch out to several indexes, e.g. so that each binding reaches both the user and
/// the group index.
pub struct IndexList<A, T> {
    index: Arc<RwLock<A>>,
    tail: Option<T>,
}

impl<A> IndexList<A, A> {
    pub fn new(index: Arc<RwLock<A>>) -> IndexList<A, A> {
        IndexList { index, tail: None }
    }
}

impl<A, T> IndexList<A, T> {
    pub fn push<B>(self, index: Arc<RwLock<B>>) -> IndexList<B, IndexList<A, T>> {
        IndexList {
            index,
            tail: Some(self),
        }
    }

    pub fn shared(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }
}

impl<A, T, R> IndexNamespacedResource<R> for IndexList<A, T>
where
    A: IndexNamespacedResource<R>,
    T: IndexNamespacedResource<R>,
    R: Clone,
{
    fn apply(&mut self, resource: R) {
        if let Some(tail) = &mut self.tail {
            tail.apply(resource.clone());
        }
        self.index.write().apply(resource);
    }

    fn delete(&mut self, namespace: String, name: String) {
        if let Some(tail) = &mut self.tail {
            tail.delete(namespace.clone(), name.clone());
        }
        self.index.write().delete(namespace, name);
    }

    fn reset(&mut self, resources: Vec<R>, removed: NamespacedRemoved) {
        if let Some(tail) = &mut self.tail {
            tail.reset(resources.clone(), removed.clone());
        }
        self.index.write().reset(resources, removed);
    }
}

impl<A, T, R> IndexClusterResource<R> for IndexList<A, T>
where
    A: IndexClusterResource<R>,
    T: IndexClusterResource<R>,
    R: Clone,
{
    fn apply(&mut self, resource: R) {
        if let Some(tail) = &mut self.tail {
            tail.apply(resource.clone());
        }
        self.index.write().apply(resource);
    }

    fn delete(&mut self, name: String) {
        if let Some(tail) = &mut self.tail {
            tail.delete(name.clone());
        }
        self.index.write().delete(name);
    }

    fn reset(&mut self, resources: Vec<R>, removed: ClusterRemoved) {
        if let Some(tail) = &mut self.tail {
            tail.reset(resources.clone(), removed.clone());
        }
        self.index.write().reset(resources, removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::rbac::v1::RoleRef;
    use pretty_assertions::assert_eq;
    use vantage_core::{GroupResource, SubjectKind};
    use vantage_k8s_api::{ClusterRole, ClusterRoleBinding, ObjectMeta, PolicyRule, Subject};
    use vantage_k8s_index::{PolicyRuleIndex, RoleIndex};

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl IndexNamespacedResource<String> for Recorder {
        fn apply(&mut self, resource: String) {
            self.0.push(format!("apply {resource}"));
        }

        fn delete(&mut self, namespace: String, name: String) {
            self.0.push(format!("delete {namespace}/{name}"));
        }
    }

    impl IndexClusterResource<String> for Recorder {
        fn apply(&mut self, resource: String) {
            self.0.push(format!("apply {resource}"));
        }

        fn delete(&mut self, name: String) {
            self.0.push(format!("delete {name}"));
        }
    }

    #[test]
    fn forwards_to_every_index() {
        let a = Arc::new(RwLock::new(Recorder::default()));
        let b = Arc::new(RwLock::new(Recorder::default()));
        let c = Arc::new(RwLock::new(Recorder::default()));
        let list = IndexList::new(a.clone()).push(b.clone()).push(c.clone()).shared();

        IndexNamespacedResource::apply(&mut *list.write(), "one".to_string());
        IndexNamespacedResource::<String>::delete(
            &mut *list.write(),
            "ns".to_string(),
            "one".to_string(),
        );
        IndexClusterResource::apply(&mut *list.write(), "two".to_string());
        IndexClusterResource::<String>::delete(&mut *list.write(), "two".to_string());

        let expected = vec!["apply one", "delete ns/one", "apply two", "delete two"];
        for index in [a, b, c] {
            assert_eq!(index.read().0, expected);
        }
    }

    #[test]
    fn bindings_reach_user_and_group_indexes() {
        let roles = RoleIndex::shared();
        IndexClusterResource::apply(
            &mut *roles.write(),
            ClusterRole {
                metadata: ObjectMeta {
                    name: Some("view".to_string()),
                    resource_version: Some("1".to_string()),
                    ..Default::default()
                },
                rules: Some(vec![PolicyRule {
                    api_groups: Some(vec!["".to_string()]),
                    resources: Some(vec!["pods".to_string()]),
                    verbs: vec!["list".to_string()],
                    ..Default::default()
                }]),
                ..Default::default()
            },
        );
        let users = PolicyRuleIndex::shared(SubjectKind::User, roles.clone());
        let groups = PolicyRuleIndex::shared(SubjectKind::Group, roles);
        let bindings = IndexList::new(users.clone()).push(groups.clone()).shared();

        let binding = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some("view".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: "view".to_string(),
            },
            subjects: Some(vec![
                Subject {
                    kind: "User".to_string(),
                    name: "alice".to_string(),
                    ..Default::default()
                },
                Subject {
                    kind: "Group".to_string(),
                    name: "ops".to_string(),
                    ..Default::default()
                },
            ]),
        };
        IndexClusterResource::apply(&mut *bindings.write(), binding);

        let pods = GroupResource::new("", "pods");
        assert!(users.read().get("alice").grants("list", &pods, "ns-a", "web"));
        assert!(users.read().get("ops").is_empty());
        assert!(groups.read().get("ops").grants("list", &pods, "ns-a", "web"));
        assert!(groups.read().get("alice").is_empty());

        IndexClusterResource::<ClusterRoleBinding>::delete(
            &mut *bindings.write(),
            "view".to_string(),
        );
        assert!(users.read().get("alice").is_empty());
        assert!(groups.read().get("ops").is_empty());
    }
}
