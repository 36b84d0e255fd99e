use crate::{
    cursor::ListState,
    error::{Error, Result},
    Partition,
};
use std::sync::{Arc, OnceLock};
use tokio::{
    sync::{mpsc, oneshot, Semaphore},
    task::{JoinHandle, JoinSet},
};
use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

/// The semaphore weight taken by a partition task spawned before the listing's revision is known.
const UNPINNED_FETCH_WEIGHT: usize = 3;

/// Fetches one page of a single partition.
#[async_trait::async_trait]
pub trait PartitionLister<P>: Send + Sync + 'static {
    type Item: Send + 'static;

    async fn list(&self, partition: &P, page: PageRequest) -> anyhow::Result<Page<Self::Item>>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Continues a partition's listing where its previous page ended.
    pub continue_token: Option<String>,

    /// The snapshot the page must be served from.
    pub revision: Option<String>,

    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continue_token: Option<String>,
    pub revision: String,
}

/// A page of a multi-partition listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub revision: String,

    /// Resumes the listing after this page. Unset once every partition has been exhausted.
    pub continue_token: Option<String>,
}

/// Lists an ordered set of partitions as a single, resumable sequence.
///
/// Partitions are fetched concurrently, up to `concurrency` at a time, but their items are emitted
/// strictly in partition order: each partition task waits for a turn token handed down from its
/// predecessor before emitting, pinning the revision, or recording a checkpoint. The output is
/// therefore identical regardless of how fetches are scheduled.
#[derive(Debug)]
pub struct ParallelPartitionLister<P, L> {
    partitions: Arc<[P]>,
    lister: Arc<L>,
    concurrency: usize,
}

/// The output of a single [`ParallelPartitionLister::list`] call.
///
/// Batches are yielded in order as partitions take their turn. Once the batches are exhausted, the
/// listing's revision and continue token (or its error) are available. Dropping a listing cancels
/// all of its in-flight fetches.
#[derive(Debug)]
pub struct Listing<T> {
    batches: mpsc::Receiver<Vec<T>>,
    task: Option<JoinHandle<Result<Outcome>>>,
    outcome: Option<Result<Outcome>>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Outcome {
    revision: String,
    continue_token: Option<String>,
}

/// Passed from each partition task to the next. Whoever holds it owns the remaining capacity and
/// the checkpoint.
#[derive(Debug)]
struct Turn {
    capacity: usize,
    checkpoint: Option<ListState>,
}

struct Feed<P, L: PartitionLister<P>> {
    partitions: Arc<[P]>,
    lister: Arc<L>,
    concurrency: usize,
    limit: usize,
    start: usize,
    state: ListState,
    revision: Arc<OnceLock<String>>,
    batches: mpsc::Sender<Vec<L::Item>>,
    cancel: CancellationToken,
}

struct Worker<P, L: PartitionLister<P>> {
    partition: P,
    successor: Option<String>,
    continue_token: Option<String>,
    offset: usize,
    limit: usize,
    lister: Arc<L>,
    revision: Arc<OnceLock<String>>,
    batches: mpsc::Sender<Vec<L::Item>>,
    cancel: CancellationToken,
    halt: CancellationToken,
}

// === impl ParallelPartitionLister ===

impl<P, L> ParallelPartitionLister<P, L>
where
    P: Partition,
    L: PartitionLister<P>,
{
    pub fn new(lister: L, partitions: impl Into<Arc<[P]>>, concurrency: usize) -> Self {
        Self {
            partitions: partitions.into(),
            lister: Arc::new(lister),
            concurrency: concurrency.max(1),
        }
    }

    /// Starts listing up to `limit` items, resuming from a cursor returned by a previous call.
    ///
    /// A zero limit lists everything. A cursor's own limit takes precedence over `limit` so that
    /// resumed pages re-fetch exactly the pages the cursor was captured against. Malformed cursors
    /// are rejected before any partition is fetched.
    pub fn list(&self, limit: usize, resume: Option<&str>) -> Result<Listing<L::Item>> {
        let mut state = match resume.filter(|c| !c.is_empty()) {
            Some(cursor) => ListState::decode(cursor)?,
            None => ListState::default(),
        };
        if state.limit == 0 {
            state.limit = limit;
        }
        let limit = match state.limit {
            0 => usize::MAX,
            n => n,
        };
        let start = self.start(&mut state);

        let revision = Arc::new(OnceLock::new());
        if !state.revision.is_empty() {
            let _ = revision.set(state.revision.clone());
        }

        let (tx, rx) = mpsc::channel(self.concurrency);
        let cancel = CancellationToken::new();
        let span = info_span!("list", limit = state.limit, %start);
        let feed = Feed {
            partitions: self.partitions.clone(),
            lister: self.lister.clone(),
            concurrency: self.concurrency,
            limit,
            start,
            state,
            revision,
            batches: tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(feed.run().instrument(span));

        Ok(Listing {
            batches: rx,
            task: Some(task),
            outcome: None,
            cancel,
        })
    }

    /// Finds the partition a cursor resumes from. If it no longer exists, the listing restarts
    /// from the first partition at the cursor's revision.
    fn start(&self, state: &mut ListState) -> usize {
        if state.partition_name.is_empty() {
            return 0;
        }
        if let Some(i) = self
            .partitions
            .iter()
            .position(|p| p.name() == state.partition_name)
        {
            return i;
        }

        tracing::debug!(partition = %state.partition_name, "Resumed partition no longer exists");
        state.partition_name.clear();
        state.continue_token.clear();
        state.offset = 0;
        0
    }
}

// === impl Listing ===

impl<T> Listing<T> {
    /// Returns the next batch, in partition order, or `None` once the listing has completed.
    pub async fn next(&mut self) -> Option<Vec<T>> {
        if let Some(batch) = self.batches.recv().await {
            return Some(batch);
        }
        if let Some(task) = self.task.take() {
            self.outcome = Some(task.await.map_err(Error::from).and_then(|r| r));
        }
        None
    }

    /// Drains the listing. Any error discards the items already received.
    pub async fn collect(mut self) -> Result<ListResult<T>> {
        let mut items = Vec::new();
        while let Some(batch) = self.next().await {
            items.extend(batch);
        }
        match self.outcome.take() {
            Some(Ok(Outcome {
                revision,
                continue_token,
            })) => Ok(ListResult {
                items,
                revision,
                continue_token,
            }),
            Some(Err(error)) => Err(error),
            None => Err(Error::Cancelled),
        }
    }

    /// The error that ended the listing, if any.
    pub fn err(&self) -> Option<&Error> {
        self.outcome.as_ref()?.as_ref().err()
    }

    /// The revision every partition was listed at. Available once the listing has completed.
    pub fn revision(&self) -> Option<&str> {
        let outcome = self.outcome.as_ref()?.as_ref().ok()?;
        Some(outcome.revision.as_str())
    }

    /// The cursor resuming after this page, if the listing completed with items left over.
    pub fn continue_token(&self) -> Option<&str> {
        self.outcome.as_ref()?.as_ref().ok()?.continue_token.as_deref()
    }
}

impl<T> Drop for Listing<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// === impl Feed ===

impl<P, L> Feed<P, L>
where
    P: Partition,
    L: PartitionLister<P>,
{
    async fn run(self) -> Result<Outcome> {
        let Self {
            partitions,
            lister,
            concurrency,
            limit,
            start,
            state,
            revision,
            batches,
            cancel,
        } = self;

        // Fired by the task that exhausts the capacity; no further partitions are needed.
        let halt = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        let (head, mut tail) = oneshot::channel();
        let _ = head.send(Turn {
            capacity: limit,
            checkpoint: None,
        });

        let mut resume = Some((state.continue_token, state.offset));
        for (i, partition) in partitions.iter().enumerate().skip(start) {
            let weight = if revision.get().is_none() {
                UNPINNED_FETCH_WEIGHT.min(concurrency)
            } else {
                1
            };
            let permit = tokio::select! {
                biased;
                _ = halt.cancelled() => break,
                permit = semaphore.clone().acquire_many_owned(weight as u32) => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (continue_token, offset) = resume.take().unwrap_or_default();
            let worker = Worker {
                partition: partition.clone(),
                successor: partitions.get(i + 1).map(|p| p.name().to_string()),
                continue_token: Some(continue_token).filter(|c| !c.is_empty()),
                offset,
                limit,
                lister: lister.clone(),
                revision: revision.clone(),
                batches: batches.clone(),
                cancel: cancel.clone(),
                halt: halt.clone(),
            };
            let (next, rx) = oneshot::channel();
            let turn = std::mem::replace(&mut tail, rx);
            let span = info_span!("partition", name = %partition.name(), %weight);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    worker.run(turn, next).await
                }
                .instrument(span),
            );
        }
        drop(batches);

        let mut failure: Option<Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let Err(error) = joined.map_err(Error::from).and_then(|r| r) else {
                continue;
            };
            cancel.cancel();
            // Cancellations are fallout; keep the failure that caused them.
            let replace = match &failure {
                None => true,
                Some(f) => f.is_cancelled() && !error.is_cancelled(),
            };
            if replace {
                tracing::debug!(%error, "Listing failed");
                failure = Some(error);
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let turn = tail.await.map_err(|_| Error::Cancelled)?;
        let continue_token = turn.checkpoint.map(|s| s.encode()).transpose()?;
        Ok(Outcome {
            revision: revision.get().cloned().unwrap_or_default(),
            continue_token,
        })
    }
}

// === impl Worker ===

impl<P, L> Worker<P, L>
where
    P: Partition,
    L: PartitionLister<P>,
{
    async fn run(
        mut self,
        mut turn_rx: oneshot::Receiver<Turn>,
        next: oneshot::Sender<Turn>,
    ) -> Result<()> {
        let mut held: Option<Turn> = None;
        loop {
            // Fetch ahead of our turn unless an earlier partition has already filled the page.
            let page = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = self.halt.cancelled(), if held.is_none() => None,
                page = self.fetch() => Some(page?),
            };

            let mut turn = match held.take() {
                Some(turn) => turn,
                None => self.wait_turn(&mut turn_rx).await?,
            };
            let Some(page) = page.filter(|_| turn.capacity > 0) else {
                let _ = next.send(turn);
                return Ok(());
            };

            // The first partition in order to be fetched decides the revision.
            let revision = self.revision.get_or_init(|| page.revision.clone());
            if *revision != page.revision {
                tracing::debug!(
                    %revision,
                    page = %page.revision,
                    "Page served at a different revision",
                );
            }

            let fetched_with = self.continue_token.take();
            let next_token = page.continue_token.filter(|c| !c.is_empty());
            let mut items = page.items;
            let skipped = self.offset.min(items.len());
            self.offset -= skipped;
            items.drain(..skipped);

            if items.len() > turn.capacity {
                let emitted = turn.capacity;
                items.truncate(emitted);
                self.emit(items).await?;
                let checkpoint =
                    self.checkpoint(self.partition.name(), fetched_with, skipped + emitted);
                self.finish(turn, Some(checkpoint), next);
                return Ok(());
            }

            turn.capacity -= items.len();
            if !items.is_empty() {
                self.emit(items).await?;
            }

            match next_token {
                Some(token) if turn.capacity == 0 => {
                    let checkpoint =
                        self.checkpoint(self.partition.name(), Some(token), self.offset);
                    self.finish(turn, Some(checkpoint), next);
                    return Ok(());
                }
                Some(token) => {
                    self.continue_token = Some(token);
                    held = Some(turn);
                }
                None if turn.capacity == 0 => {
                    // The page ends exactly at this partition's end; resume at the next one.
                    let checkpoint = self
                        .successor
                        .as_deref()
                        .map(|name| self.checkpoint(name, None, 0));
                    self.finish(turn, checkpoint, next);
                    return Ok(());
                }
                None => {
                    let _ = next.send(turn);
                    return Ok(());
                }
            }
        }
    }

    async fn fetch(&self) -> Result<Page<L::Item>> {
        let page = PageRequest {
            continue_token: self.continue_token.clone(),
            revision: self.revision.get().cloned(),
            limit: self.limit,
        };
        tracing::trace!(?page, "Fetching");
        self.lister
            .list(&self.partition, page)
            .await
            .map_err(|error| {
                self.cancel.cancel();
                Error::fetch(self.partition.name(), error)
            })
    }

    async fn wait_turn(&self, turn: &mut oneshot::Receiver<Turn>) -> Result<Turn> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            turn = turn => turn.map_err(|_| Error::Cancelled),
        }
    }

    async fn emit(&self, items: Vec<L::Item>) -> Result<()> {
        tracing::trace!(items = items.len(), "Emitting");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = self.batches.send(items) => sent.map_err(|_| {
                self.cancel.cancel();
                Error::Cancelled
            }),
        }
    }

    fn checkpoint(
        &self,
        partition: &str,
        continue_token: Option<String>,
        offset: usize,
    ) -> ListState {
        ListState {
            revision: self.revision.get().cloned().unwrap_or_default(),
            partition_name: partition.to_string(),
            continue_token: continue_token.unwrap_or_default(),
            offset,
            limit: self.limit,
        }
    }

    /// Records the page's final checkpoint and stops the scheduling of further partitions.
    fn finish(&self, mut turn: Turn, checkpoint: Option<ListState>, next: oneshot::Sender<Turn>) {
        tracing::debug!(?checkpoint, "Page complete");
        turn.capacity = 0;
        turn.checkpoint = checkpoint;
        self.halt.cancel();
        let _ = next.send(turn);
    }
}
