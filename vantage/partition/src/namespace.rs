use crate::{
    error::{Error, Result},
    lister::{Page, PageRequest},
    DataStore, EventStream, Partition, Partitioner, Request, Schema, Verb, WatchRequest,
};
use futures::{future, prelude::*};
use std::{collections::BTreeMap, sync::Arc};
use vantage_core::{Access, AccessList, WILDCARD};
use vantage_k8s_api::{DynamicObject, ResourceExt};

/// Partitions a resource by the namespaces a request's grants cover.
///
/// A request with unrestricted access is served by a single pass-through partition. Otherwise
/// each readable namespace becomes a partition, in name order, whose objects are filtered down to
/// the names the request may read.
pub struct NamespacePartitioner {
    backend: Arc<dyn DataStore>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespacePartition {
    name: String,

    /// Unset for partitions spanning every namespace or holding cluster-scoped objects.
    namespace: Option<String>,

    /// The grants each object must satisfy. Unset when every object in scope is visible.
    filter: Option<AccessList>,
}

/// Serves a single partition from the backing store.
struct ScopedStore {
    inner: Arc<dyn DataStore>,
    partition: NamespacePartition,
}

const ALL: &str = "all";

// === impl NamespacePartitioner ===

impl NamespacePartitioner {
    pub fn new(backend: Arc<dyn DataStore>) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl Partitioner for NamespacePartitioner {
    type Partition = NamespacePartition;

    async fn lookup(
        &self,
        req: &Request,
        schema: &Schema,
        verb: Verb,
        id: Option<&str>,
    ) -> Result<NamespacePartition> {
        let gr = schema.group_resource();
        let namespace = if schema.namespaced {
            let Some(ns) = req.namespace.as_deref() else {
                return Err(Error::InvalidRequest(format!(
                    "{gr} is namespaced; {verb} requires a namespace"
                )));
            };
            ns
        } else {
            ""
        };

        let name = id.unwrap_or_default();
        if !req.access.grants(verb.as_str(), &gr, namespace, name) {
            let target = match (namespace, name) {
                ("", "") => String::new(),
                ("", name) => format!(" {name}"),
                (ns, "") => format!(" in namespace {ns}"),
                (ns, name) => format!(" {ns}/{name}"),
            };
            return Err(Error::PermissionDenied(format!(
                "cannot {verb} {gr}{target}"
            )));
        }

        Ok(match namespace {
            "" => NamespacePartition::passthrough(),
            ns => NamespacePartition::scoped(ns, None),
        })
    }

    async fn all(
        &self,
        req: &Request,
        schema: &Schema,
        verb: Verb,
        _: Option<&str>,
    ) -> Result<Vec<NamespacePartition>> {
        let access = req
            .access
            .access_list_for(verb.as_str(), &schema.group_resource());

        if let Some(ns) = req.namespace.as_deref().filter(|_| schema.namespaced) {
            let scoped = access
                .iter()
                .filter(|a| a.namespace == WILDCARD || a.namespace == ns)
                .cloned()
                .collect::<AccessList>();
            if scoped.is_empty() {
                return Ok(vec![]);
            }
            let filter = (!scoped.grants(ns, WILDCARD)).then_some(scoped);
            return Ok(vec![NamespacePartition::scoped(ns, filter)]);
        }

        if access.grants(WILDCARD, WILDCARD) {
            return Ok(vec![NamespacePartition::passthrough()]);
        }

        if !schema.namespaced {
            // Only cluster-wide grants reach cluster-scoped objects.
            let cluster = access
                .iter()
                .filter(|a| a.namespace == WILDCARD)
                .cloned()
                .collect::<AccessList>();
            if cluster.is_empty() {
                return Ok(vec![]);
            }
            return Ok(vec![NamespacePartition::filtered(cluster)]);
        }

        if access.iter().any(|a| a.namespace == WILDCARD) {
            // Some names are readable in every namespace.
            return Ok(vec![NamespacePartition::filtered(access)]);
        }

        let mut by_ns = BTreeMap::<String, Vec<Access>>::new();
        for a in access {
            by_ns.entry(a.namespace.clone()).or_default().push(a);
        }
        Ok(by_ns
            .into_iter()
            .map(|(ns, grants)| {
                let grants = grants.into_iter().collect::<AccessList>();
                let filter = (!grants.grants(&ns, WILDCARD)).then_some(grants);
                NamespacePartition::scoped(ns, filter)
            })
            .collect())
    }

    fn store(&self, _: &Request, partition: &NamespacePartition) -> Result<Arc<dyn DataStore>> {
        Ok(Arc::new(ScopedStore {
            inner: self.backend.clone(),
            partition: partition.clone(),
        }))
    }
}

// === impl NamespacePartition ===

impl NamespacePartition {
    /// A partition that sees every object.
    pub fn passthrough() -> Self {
        Self {
            name: ALL.to_string(),
            namespace: None,
            filter: None,
        }
    }

    fn filtered(filter: AccessList) -> Self {
        Self {
            name: ALL.to_string(),
            namespace: None,
            filter: Some(filter),
        }
    }

    fn scoped(ns: impl Into<String>, filter: Option<AccessList>) -> Self {
        let ns = ns.into();
        Self {
            name: ns.clone(),
            namespace: Some(ns),
            filter,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn is_passthrough(&self) -> bool {
        self.namespace.is_none() && self.filter.is_none()
    }

    /// Returns true if the object is visible through this partition.
    pub fn admits(&self, obj: &DynamicObject) -> bool {
        let Some(filter) = self.filter.as_ref() else {
            return true;
        };
        let ns = obj.namespace().unwrap_or_default();
        filter.grants(&ns, &obj.name_any())
    }
}

impl Partition for NamespacePartition {
    fn name(&self) -> &str {
        &self.name
    }
}

// === impl ScopedStore ===

impl ScopedStore {
    fn scope(&self, req: &Request) -> Request {
        Request {
            namespace: self.partition.namespace.clone(),
            ..req.clone()
        }
    }
}

#[async_trait::async_trait]
impl DataStore for ScopedStore {
    async fn by_id(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
    ) -> anyhow::Result<DynamicObject> {
        self.inner.by_id(&self.scope(req), schema, id).await
    }

    async fn list(
        &self,
        req: &Request,
        schema: &Schema,
        page: PageRequest,
    ) -> anyhow::Result<Page<DynamicObject>> {
        let mut page = self.inner.list(&self.scope(req), schema, page).await?;
        page.items.retain(|obj| self.partition.admits(obj));
        Ok(page)
    }

    async fn create(
        &self,
        req: &Request,
        schema: &Schema,
        obj: DynamicObject,
    ) -> anyhow::Result<DynamicObject> {
        self.inner.create(&self.scope(req), schema, obj).await
    }

    async fn update(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
        obj: DynamicObject,
    ) -> anyhow::Result<DynamicObject> {
        self.inner.update(&self.scope(req), schema, id, obj).await
    }

    async fn delete(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
    ) -> anyhow::Result<Option<DynamicObject>> {
        self.inner.delete(&self.scope(req), schema, id).await
    }

    async fn watch(
        &self,
        req: &Request,
        schema: &Schema,
        watch: &WatchRequest,
    ) -> anyhow::Result<EventStream> {
        let events = self.inner.watch(&self.scope(req), schema, watch).await?;
        if self.partition.filter.is_none() {
            return Ok(events);
        }
        let partition = self.partition.clone();
        Ok(Box::pin(events.try_filter(move |event| {
            future::ready(event.object().map_or(true, |obj| partition.admits(obj)))
        })))
    }
}
