#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Serves list, watch and single-object operations over a resource whose objects are split across
//! independently-fetchable partitions.
//!
//! A [`Partitioner`] decides which partitions a request may see. Lists are assembled by the
//! [`ParallelPartitionLister`], which fetches partitions concurrently but emits their objects
//! strictly in partition order, so a page boundary can be captured as an opaque, resumable
//! [`ListState`] cursor. Watches fan every partition's event stream into a single channel.

mod cursor;
mod error;
mod lister;
mod namespace;
mod proxy;
mod store;

#[cfg(test)]
mod tests;

pub use self::{
    cursor::ListState,
    error::{CursorError, Error, Result},
    lister::{ListResult, Listing, Page, PageRequest, ParallelPartitionLister, PartitionLister},
    namespace::{NamespacePartition, NamespacePartitioner},
    proxy::KubeStore,
    store::Store,
};

use futures::prelude::*;
use std::{fmt, pin::Pin, sync::Arc};
use vantage_core::{AccessSet, GroupResource};
use vantage_k8s_api::{ApiResource, DynamicObject};

/// The number of partitions fetched concurrently unless configured otherwise.
pub const DEFAULT_CONCURRENCY: usize = 3;

/// The page budget of a list request that does not name a limit.
pub const DEFAULT_LIST_LIMIT: usize = 100_000;

/// An addressable, independently-fetchable slice of a resource listing.
///
/// Names must be unique within a partitioner's output; list cursors refer to partitions by name.
pub trait Partition: Clone + fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;
}

/// Splits the objects a request may access into partitions.
#[async_trait::async_trait]
pub trait Partitioner: Send + Sync + 'static {
    type Partition: Partition;

    /// Resolves the single partition holding the object targeted by a get, create, update or
    /// delete.
    async fn lookup(
        &self,
        req: &Request,
        schema: &Schema,
        verb: Verb,
        id: Option<&str>,
    ) -> Result<Self::Partition>;

    /// Returns every partition relevant to a list or watch, in the order results are emitted.
    async fn all(
        &self,
        req: &Request,
        schema: &Schema,
        verb: Verb,
        id: Option<&str>,
    ) -> Result<Vec<Self::Partition>>;

    /// Resolves a partition to the store that serves it.
    fn store(&self, req: &Request, partition: &Self::Partition) -> Result<Arc<dyn DataStore>>;
}

/// A source of objects for one partition.
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    async fn by_id(&self, req: &Request, schema: &Schema, id: &str)
        -> anyhow::Result<DynamicObject>;

    /// Fetches one page. When `page.revision` is set, the page must be served from that snapshot
    /// or fail.
    async fn list(
        &self,
        req: &Request,
        schema: &Schema,
        page: PageRequest,
    ) -> anyhow::Result<Page<DynamicObject>>;

    async fn create(
        &self,
        req: &Request,
        schema: &Schema,
        obj: DynamicObject,
    ) -> anyhow::Result<DynamicObject>;

    async fn update(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
        obj: DynamicObject,
    ) -> anyhow::Result<DynamicObject>;

    /// Deletes an object, returning it if the deletion is still in progress.
    async fn delete(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
    ) -> anyhow::Result<Option<DynamicObject>>;

    async fn watch(
        &self,
        req: &Request,
        schema: &Schema,
        watch: &WatchRequest,
    ) -> anyhow::Result<EventStream>;
}

pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<Event>> + Send + 'static>>;

/// An authorized request against a single resource type.
#[derive(Clone, Debug, Default)]
pub struct Request {
    /// The requester's effective grants.
    pub access: Arc<AccessSet>,

    /// Narrows the operation to a namespace.
    pub namespace: Option<String>,

    /// The page budget of a list.
    pub limit: Option<usize>,

    /// A cursor returned by a previous list.
    pub continue_token: Option<String>,

    pub label_selector: Option<String>,
}

/// Describes the resource type an operation targets.
#[derive(Clone, Debug)]
pub struct Schema {
    pub resource: ApiResource,
    pub namespaced: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Update,
    Delete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchRequest {
    /// The revision after which events are delivered. When unset, the watch starts from
    /// resourceVersion "0": every existing object is replayed as an `Added` event before live
    /// changes follow.
    pub revision: Option<String>,
}

impl WatchRequest {
    /// The resourceVersion the watch is opened at.
    pub fn resource_version(&self) -> &str {
        self.revision.as_deref().unwrap_or("0")
    }
}

#[derive(Clone, Debug)]
pub enum Event {
    Added(DynamicObject),
    Modified(DynamicObject),
    Deleted(DynamicObject),

    /// Marks the revision a stream has caught up to.
    Bookmark(String),
}

// === impl Request ===

impl Request {
    pub fn new(access: impl Into<Arc<AccessSet>>) -> Self {
        Self {
            access: access.into(),
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn resume(mut self, continue_token: impl Into<String>) -> Self {
        self.continue_token = Some(continue_token.into());
        self
    }
}

// === impl Schema ===

impl Schema {
    pub fn new(resource: ApiResource, namespaced: bool) -> Self {
        Self {
            resource,
            namespaced,
        }
    }

    pub fn group_resource(&self) -> GroupResource {
        GroupResource::new(&self.resource.group, &self.resource.plural)
    }
}

// === impl Verb ===

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Watch => "watch",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Event ===

impl Event {
    pub fn object(&self) -> Option<&DynamicObject> {
        match self {
            Self::Added(obj) | Self::Modified(obj) | Self::Deleted(obj) => Some(obj),
            Self::Bookmark(_) => None,
        }
    }
}
