
use crate::{
    lister::{Page, PageRequest},
    DataStore, Event, EventStream, Request, Schema, WatchRequest,
};
use anyhow::{bail, Result};
use futures::prelude::*;
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use vantage_core::{Access, AccessSet, GroupResource};
use vantage_k8s_api::{api::core::v1::Pod, ApiResource, DynamicObject, ResourceExt};

fn pods() -> Schema {
    Schema::new(ApiResource::erase::<Pod>(&()), true)
}

fn nodes() -> Schema {
    let mut resource = ApiResource::erase::<Pod>(&());
    resource.kind = "Node".to_string();
    resource.plural = "nodes".to_string();
    Schema::new(resource, false)
}

fn mk_pod(ns: &str, name: &str) -> DynamicObject {
    DynamicObject::new(name, &pods().resource).within(ns)
}

fn mk_node(name: &str) -> DynamicObject {
    DynamicObject::new(name, &nodes().resource)
}

/// Builds an access set from `(verb, resource, namespace, name)` grants in the core group.
fn mk_access(grants: &[(&str, &str, &str, &str)]) -> AccessSet {
    let mut access = AccessSet::new();
    for (verb, resource, ns, name) in grants {
        access.add(
            *verb,
            GroupResource::new("", *resource),
            Access::new(*ns, *name),
        );
    }
    access
}

fn names(objects: &[DynamicObject]) -> Vec<String> {
    objects
        .iter()
        .map(|o| format!("{}/{}", o.namespace().unwrap_or_default(), o.name_any()))
        .collect()
}

/// An in-memory object store that pages through objects in namespace and name order.
#[derive(Default)]
struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), DynamicObject>>,

    /// Scripted watch events by namespace. Unscoped watches see every namespace's events.
    events: BTreeMap<String, Vec<Event>>,

    /// Namespaces whose watch fails after delivering its events.
    failing_watches: Vec<String>,

    requests: Mutex<Vec<Option<String>>>,

    /// Counts watch streams that have not yet been dropped.
    open_watches: Arc<AtomicUsize>,
}

/// Decrements a counter when the stream holding it is dropped.
struct OpenWatch(Arc<AtomicUsize>);

impl OpenWatch {
    fn new(count: &Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count.clone())
    }
}

impl Drop for OpenWatch {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryStore {
    fn with_objects(objects: impl IntoIterator<Item = DynamicObject>) -> Self {
        let store = Self::default();
        for obj in objects {
            store.insert(obj);
        }
        store
    }

    fn insert(&self, obj: DynamicObject) {
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects.lock().unwrap().insert(key, obj);
    }

    fn in_scope(&self, req: &Request) -> Vec<DynamicObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| req.namespace.as_deref().map_or(true, |r| r == ns))
            .map(|(_, obj)| obj.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl DataStore for MemoryStore {
    async fn by_id(&self, req: &Request, _: &Schema, id: &str) -> Result<DynamicObject> {
        self.requests.lock().unwrap().push(req.namespace.clone());
        let key = (req.namespace.clone().unwrap_or_default(), id.to_string());
        match self.objects.lock().unwrap().get(&key) {
            Some(obj) => Ok(obj.clone()),
            None => bail!("{id} not found"),
        }
    }

    async fn list(
        &self,
        req: &Request,
        _: &Schema,
        page: PageRequest,
    ) -> Result<Page<DynamicObject>> {
        self.requests.lock().unwrap().push(req.namespace.clone());
        let objects = self.in_scope(req);
        let start = match page.continue_token {
            Some(token) => token.parse::<usize>()?,
            None => 0,
        };
        let end = start.saturating_add(page.limit).min(objects.len());
        Ok(Page {
            items: objects[start..end].to_vec(),
            continue_token: (end < objects.len()).then(|| end.to_string()),
            revision: page.revision.unwrap_or_else(|| "7".to_string()),
        })
    }

    async fn create(&self, req: &Request, _: &Schema, obj: DynamicObject) -> Result<DynamicObject> {
        let obj = match req.namespace.as_deref() {
            Some(ns) => obj.within(ns),
            None => obj,
        };
        self.insert(obj.clone());
        Ok(obj)
    }

    async fn update(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
        obj: DynamicObject,
    ) -> Result<DynamicObject> {
        self.by_id(req, schema, id).await?;
        self.create(req, schema, obj).await
    }

    async fn delete(&self, req: &Request, _: &Schema, id: &str) -> Result<Option<DynamicObject>> {
        let key = (req.namespace.clone().unwrap_or_default(), id.to_string());
        match self.objects.lock().unwrap().remove(&key) {
            Some(_) => Ok(None),
            None => bail!("{id} not found"),
        }
    }

    async fn watch(&self, req: &Request, _: &Schema, _: &WatchRequest) -> Result<EventStream> {
        self.requests.lock().unwrap().push(req.namespace.clone());
        let mut events = Vec::new();
        let mut fails = false;
        for (ns, evs) in &self.events {
            if req.namespace.as_deref().map_or(true, |r| r == ns) {
                events.extend(evs.iter().cloned().map(Ok));
                fails |= self.failing_watches.contains(ns);
            }
        }
        let open = OpenWatch::new(&self.open_watches);
        let events = stream::iter(events).map(move |event| {
            let _open = &open;
            event
        });
        if fails {
            let failure = stream::once(future::ready(Err(anyhow::anyhow!("watch expired"))));
            return Ok(Box::pin(events.chain(failure)));
        }
        Ok(Box::pin(events.chain(stream::pending())))
    }
}

impl MemoryStore {
    fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}
