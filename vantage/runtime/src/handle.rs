use crate::{
    core::{AccessSet, AccessSetLookup, Subject},
    index::AccessStore,
    partition::{NamespacePartitioner, Request, Store},
};
use std::sync::Arc;

/// A cloneable handle through which requests reach the store with their subject's grants.
#[derive(Clone)]
pub struct Vantage {
    access: Arc<AccessStore>,
    store: Arc<Store<NamespacePartitioner>>,
}

// === impl Vantage ===

impl Vantage {
    pub fn new(access: AccessStore, store: Store<NamespacePartitioner>) -> Self {
        Self {
            access: Arc::new(access),
            store: Arc::new(store),
        }
    }

    pub fn access_for(&self, subject: &Subject) -> AccessSet {
        self.access.access_for(subject)
    }

    /// Starts a request on behalf of `subject`, carrying its current grants.
    pub fn request(&self, subject: &Subject) -> Request {
        Request::new(self.access_for(subject))
    }

    pub fn store(&self) -> &Store<NamespacePartitioner> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::{PolicyRuleIndex, RoleIndex},
        k8s::{
            api::core::v1::Pod, ApiResource, ClusterRole, ClusterRoleBinding, DynamicObject,
            ObjectMeta, PolicyRule,
        },
        partition::{DataStore, EventStream, Page, PageRequest, Schema, WatchRequest},
    };
    use anyhow::{bail, Result};
    use k8s_openapi::api::rbac::v1::{RoleRef, Subject as BindingSubject};
    use kubert::index::IndexClusterResource;
    use pretty_assertions::assert_eq;
    use vantage_core::{GroupResource, SubjectKind};

    /// Fails every operation, so tests observe only authorization decisions.
    struct Unreachable;

    #[async_trait::async_trait]
    impl DataStore for Unreachable {
        async fn by_id(&self, _: &Request, _: &Schema, _: &str) -> Result<DynamicObject> {
            bail!("unreachable")
        }

        async fn list(
            &self,
            _: &Request,
            _: &Schema,
            _: PageRequest,
        ) -> Result<Page<DynamicObject>> {
            bail!("unreachable")
        }

        async fn create(
            &self,
            _: &Request,
            _: &Schema,
            _: DynamicObject,
        ) -> Result<DynamicObject> {
            bail!("unreachable")
        }

        async fn update(
            &self,
            _: &Request,
            _: &Schema,
            _: &str,
            _: DynamicObject,
        ) -> Result<DynamicObject> {
            bail!("unreachable")
        }

        async fn delete(&self, _: &Request, _: &Schema, _: &str) -> Result<Option<DynamicObject>> {
            bail!("unreachable")
        }

        async fn watch(&self, _: &Request, _: &Schema, _: &WatchRequest) -> Result<EventStream> {
            bail!("unreachable")
        }
    }

    fn vantage() -> Vantage {
        let roles = RoleIndex::shared();
        IndexClusterResource::apply(
            &mut *roles.write(),
            ClusterRole {
                metadata: ObjectMeta {
                    name: Some("pod-reader".to_string()),
                    resource_version: Some("1".to_string()),
                    ..Default::default()
                },
                rules: Some(vec![PolicyRule {
                    api_groups: Some(vec!["".to_string()]),
                    resources: Some(vec!["pods".to_string()]),
                    verbs: vec!["get".to_string(), "list".to_string()],
                    ..Default::default()
                }]),
                ..Default::default()
            },
        );
        let users = PolicyRuleIndex::shared(SubjectKind::User, roles.clone());
        let groups = PolicyRuleIndex::shared(SubjectKind::Group, roles);
        IndexClusterResource::apply(
            &mut *groups.write(),
            ClusterRoleBinding {
                metadata: ObjectMeta {
                    name: Some("readers".to_string()),
                    resource_version: Some("1".to_string()),
                    ..Default::default()
                },
                role_ref: RoleRef {
                    api_group: "rbac.authorization.k8s.io".to_string(),
                    kind: "ClusterRole".to_string(),
                    name: "pod-reader".to_string(),
                },
                subjects: Some(vec![BindingSubject {
                    kind: "Group".to_string(),
                    name: "readers".to_string(),
                    ..Default::default()
                }]),
            },
        );

        let access = AccessStore::new(users, groups).with_cache(4);
        let store = Store::new(NamespacePartitioner::new(Arc::new(Unreachable)));
        Vantage::new(access, store)
    }

    #[test]
    fn requests_carry_the_subjects_grants() {
        let vantage = vantage();
        let pods = GroupResource::new("", "pods");

        let reader = Subject::new("alice").with_groups(["readers"]);
        let req = vantage.request(&reader);
        assert!(req.access.grants("list", &pods, "ns-a", "web"));
        assert!(!req.access.grants("delete", &pods, "ns-a", "web"));
        assert_eq!(
            req.access.id(),
            Some(vantage.access.cache_key(&reader).as_str())
        );

        let req = vantage.request(&Subject::new("bob"));
        assert!(req.access.is_empty());
    }

    #[tokio::test]
    async fn subjects_without_grants_list_nothing() {
        let vantage = vantage();
        let schema = Schema::new(ApiResource::erase::<Pod>(&()), true);
        let result = vantage
            .store()
            .list(&vantage.request(&Subject::new("bob")), &schema)
            .await
            .expect("an empty listing must succeed");
        assert!(result.items.is_empty());
        assert_eq!(result.continue_token, None);
    }

    #[tokio::test]
    async fn readers_reach_the_backing_store() {
        let vantage = vantage();
        let schema = Schema::new(ApiResource::erase::<Pod>(&()), true);
        let req = vantage.request(&Subject::new("alice").with_groups(["readers"]));
        let err = vantage
            .store()
            .list(&req, &schema)
            .await
            .expect_err("the backing store fails every list");
        assert!(
            matches!(err, crate::partition::Error::Fetch { .. }),
            "unexpected error: {err:?}"
        );
    }
}
