use crate::{
    lister::{Page, PageRequest},
    DataStore, Event, EventStream, Request, Schema, WatchRequest,
};
use anyhow::{anyhow, Result};
use futures::prelude::*;
use vantage_k8s_api::{
    Api, Client, DeleteParams, DynamicObject, ListParams, PostParams, VersionMatch, WatchEvent,
    WatchParams,
};

/// Serves objects directly from the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

// === impl KubeStore ===

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, req: &Request, schema: &Schema) -> Api<DynamicObject> {
        match req.namespace.as_deref() {
            Some(ns) if schema.namespaced => {
                Api::namespaced_with(self.client.clone(), ns, &schema.resource)
            }
            _ => Api::all_with(self.client.clone(), &schema.resource),
        }
    }
}

#[async_trait::async_trait]
impl DataStore for KubeStore {
    async fn by_id(&self, req: &Request, schema: &Schema, id: &str) -> Result<DynamicObject> {
        Ok(self.api(req, schema).get(id).await?)
    }

    async fn list(
        &self,
        req: &Request,
        schema: &Schema,
        page: PageRequest,
    ) -> Result<Page<DynamicObject>> {
        let mut params = ListParams::default();
        if let Ok(limit) = u32::try_from(page.limit) {
            params = params.limit(limit);
        }
        if let Some(selector) = req.label_selector.as_deref() {
            params = params.labels(selector);
        }
        // The API server rejects a resource version alongside a continue token; the token already
        // carries the snapshot.
        match (page.continue_token, page.revision) {
            (Some(token), _) => params = params.continue_token(&token),
            (None, Some(revision)) => params = params.at(&revision).matching(VersionMatch::Exact),
            (None, None) => {}
        }

        let list = self.api(req, schema).list(&params).await?;
        Ok(Page {
            continue_token: list.metadata.continue_.filter(|c| !c.is_empty()),
            revision: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn create(
        &self,
        req: &Request,
        schema: &Schema,
        obj: DynamicObject,
    ) -> Result<DynamicObject> {
        let api = self.api(req, schema);
        Ok(api.create(&PostParams::default(), &obj).await?)
    }

    async fn update(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
        obj: DynamicObject,
    ) -> Result<DynamicObject> {
        let api = self.api(req, schema);
        Ok(api.replace(id, &PostParams::default(), &obj).await?)
    }

    async fn delete(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = self.api(req, schema);
        let deleted = api.delete(id, &DeleteParams::default()).await?;
        Ok(deleted.left())
    }

    async fn watch(
        &self,
        req: &Request,
        schema: &Schema,
        watch: &WatchRequest,
    ) -> Result<EventStream> {
        let api = self.api(req, schema);
        let mut params = WatchParams::default();
        if let Some(selector) = req.label_selector.as_deref() {
            params = params.labels(selector);
        }
        let version = watch.resource_version().to_string();

        let events: EventStream = Box::pin(async_stream::try_stream! {
            let stream = api.watch(&params, &version).await.map_err(anyhow::Error::from)?;
            futures::pin_mut!(stream);
            while let Some(event) = stream.next().await {
                let event = event.map_err(anyhow::Error::from)?;
                yield convert(event)?;
            }
        });
        Ok(events)
    }
}

fn convert(event: WatchEvent<DynamicObject>) -> Result<Event> {
    match event {
        WatchEvent::Added(obj) => Ok(Event::Added(obj)),
        WatchEvent::Modified(obj) => Ok(Event::Modified(obj)),
        WatchEvent::Deleted(obj) => Ok(Event::Deleted(obj)),
        WatchEvent::Bookmark(bookmark) => Ok(Event::Bookmark(bookmark.metadata.resource_version)),
        WatchEvent::Error(error) => Err(anyhow!("watch failed: {error:?}")),
    }
}
