use crate::{
    error::{Error, Result},
    lister::{ListResult, Page, PageRequest, ParallelPartitionLister, PartitionLister},
    DataStore, Event, EventStream, Partition, Partitioner, Request, Schema, Verb, WatchRequest,
    DEFAULT_CONCURRENCY, DEFAULT_LIST_LIMIT,
};
use futures::{future, prelude::*};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};
use vantage_k8s_api::DynamicObject;

/// The number of events buffered between partition watches and the consumer.
const WATCH_BUFFER: usize = 100;

/// Serves operations on a partitioned resource.
///
/// Single-object operations are routed to the one partition that holds the object. Lists are
/// assembled from every partition by a [`ParallelPartitionLister`]; watches merge every
/// partition's events into one channel.
#[derive(Debug)]
pub struct Store<P> {
    partitioner: Arc<P>,
    concurrency: usize,
    default_limit: usize,
}

/// Lists a partition through the store the partitioner resolves it to.
struct StoreLister<P> {
    partitioner: Arc<P>,
    req: Request,
    schema: Schema,
}

// === impl Store ===

impl<P: Partitioner> Store<P> {
    pub fn new(partitioner: P) -> Self {
        Self {
            partitioner: Arc::new(partitioner),
            concurrency: DEFAULT_CONCURRENCY,
            default_limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the page budget of lists that do not name a limit.
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn partitioner(&self) -> &P {
        &self.partitioner
    }

    #[tracing::instrument(skip_all, fields(resource = %schema.group_resource(), %id))]
    pub async fn by_id(&self, req: &Request, schema: &Schema, id: &str) -> Result<DynamicObject> {
        let store = self.lookup(req, schema, Verb::Get, Some(id)).await?;
        store.by_id(req, schema, id).await.map_err(Error::Store)
    }

    /// Lists one page of the resource. The request's continue token, if any, resumes a previous
    /// listing.
    #[tracing::instrument(skip_all, fields(resource = %schema.group_resource()))]
    pub async fn list(&self, req: &Request, schema: &Schema) -> Result<ListResult<DynamicObject>> {
        let partitions = self
            .partitioner
            .all(req, schema, Verb::List, None)
            .await?;
        tracing::debug!(partitions = partitions.len(), "Listing");

        let lister = StoreLister {
            partitioner: self.partitioner.clone(),
            req: req.clone(),
            schema: schema.clone(),
        };
        let limit = req.limit.unwrap_or(self.default_limit);
        ParallelPartitionLister::new(lister, partitions, self.concurrency)
            .list(limit, req.continue_token.as_deref())?
            .collect()
            .await
    }

    #[tracing::instrument(skip_all, fields(resource = %schema.group_resource()))]
    pub async fn create(
        &self,
        req: &Request,
        schema: &Schema,
        obj: DynamicObject,
    ) -> Result<DynamicObject> {
        let id = obj.metadata.name.clone();
        let store = self
            .lookup(req, schema, Verb::Create, id.as_deref())
            .await?;
        store.create(req, schema, obj).await.map_err(Error::Store)
    }

    #[tracing::instrument(skip_all, fields(resource = %schema.group_resource(), %id))]
    pub async fn update(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
        obj: DynamicObject,
    ) -> Result<DynamicObject> {
        let store = self.lookup(req, schema, Verb::Update, Some(id)).await?;
        store
            .update(req, schema, id, obj)
            .await
            .map_err(Error::Store)
    }

    #[tracing::instrument(skip_all, fields(resource = %schema.group_resource(), %id))]
    pub async fn delete(
        &self,
        req: &Request,
        schema: &Schema,
        id: &str,
    ) -> Result<Option<DynamicObject>> {
        let store = self.lookup(req, schema, Verb::Delete, Some(id)).await?;
        store.delete(req, schema, id).await.map_err(Error::Store)
    }

    /// Opens a watch on every partition and merges their events.
    ///
    /// The first failure of any partition's stream is delivered as the watch's last item and ends
    /// the whole watch; failures racing it are dropped. Dropping the receiver stops every
    /// partition's stream.
    #[tracing::instrument(skip_all, fields(resource = %schema.group_resource()))]
    pub async fn watch(
        &self,
        req: &Request,
        schema: &Schema,
        watch: WatchRequest,
    ) -> Result<mpsc::Receiver<Result<Event>>> {
        let partitions = self
            .partitioner
            .all(req, schema, Verb::Watch, None)
            .await?;

        let streams = future::try_join_all(partitions.iter().map(|partition| {
            let watch = &watch;
            async move {
                let store = self.partitioner.store(req, partition)?;
                let events = store
                    .watch(req, schema, watch)
                    .await
                    .map_err(|error| Error::fetch(partition.name(), error))?;
                Ok::<_, Error>((partition.name().to_string(), events))
            }
        }))
        .await?;
        tracing::debug!(partitions = streams.len(), "Watching");

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let cancel = CancellationToken::new();
        let failed = Arc::new(AtomicBool::new(false));
        for (name, events) in streams {
            let span = info_span!("watch", partition = %name);
            let forward = forward(name, events, tx.clone(), cancel.clone(), failed.clone());
            tokio::spawn(forward.instrument(span));
        }
        Ok(rx)
    }

    async fn lookup(
        &self,
        req: &Request,
        schema: &Schema,
        verb: Verb,
        id: Option<&str>,
    ) -> Result<Arc<dyn DataStore>> {
        let partition = self.partitioner.lookup(req, schema, verb, id).await?;
        tracing::debug!(partition = %partition.name(), %verb, "Resolved");
        self.partitioner.store(req, &partition)
    }
}

/// Relays a partition's events until it ends, fails, the consumer goes away, or another partition
/// fails. Only the first partition to fail reports its error.
async fn forward(
    partition: String,
    mut events: EventStream,
    tx: mpsc::Sender<Result<Event>>,
    cancel: CancellationToken,
    failed: Arc<AtomicBool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = tx.closed() => {
                tracing::debug!("Watch receiver dropped");
                cancel.cancel();
                return;
            }
            event = events.next() => event,
        };

        match event {
            Some(Ok(event)) => {
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = tx.send(Ok(event)) => sent,
                };
                if sent.is_err() {
                    cancel.cancel();
                    return;
                }
            }
            Some(Err(error)) => {
                tracing::debug!(%error, "Watch failed");
                if failed.swap(true, Ordering::SeqCst) {
                    return;
                }
                cancel.cancel();
                let _ = tx.send(Err(Error::fetch(partition, error))).await;
                return;
            }
            None => {
                tracing::debug!("Watch ended");
                return;
            }
        }
    }
}

// === impl StoreLister ===

#[async_trait::async_trait]
impl<P: Partitioner> PartitionLister<P::Partition> for StoreLister<P> {
    type Item = DynamicObject;

    async fn list(
        &self,
        partition: &P::Partition,
        page: PageRequest,
    ) -> anyhow::Result<Page<DynamicObject>> {
        let store = self.partitioner.store(&self.req, partition)?;
        store.list(&self.req, &self.schema, page).await
    }
}
