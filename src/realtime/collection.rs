use super::reducer::{apply_event, apply_events, SAFETY_CEILING};
use super::store::{OrderBy, Query, RemoteStore, Subscription};
use crate::models::{ChangeEvent, Record};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Caller-selectable subscription behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Field the initial fetch is sorted by
    pub sort_field: Option<String>,
    /// Sort direction for the initial fetch (default descending)
    pub sort_ascending: bool,
    /// Bounds both the initial fetch and the maintained snapshot
    pub max_size: Option<NonZeroUsize>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, field: impl Into<String>, ascending: bool) -> Self {
        self.sort_field = Some(field.into());
        self.sort_ascending = ascending;
        self
    }

    /// A limit of zero means "no limit"
    pub fn limit(mut self, max_size: usize) -> Self {
        self.max_size = NonZeroUsize::new(max_size);
        self
    }

    /// Snapshot bound actually enforced
    pub fn effective_limit(&self) -> usize {
        self.max_size.map(NonZeroUsize::get).unwrap_or(SAFETY_CEILING)
    }

    fn query(&self, table: &str) -> Query {
        Query {
            table: table.to_string(),
            order_by: self.sort_field.as_ref().map(|field| OrderBy {
                field: field.clone(),
                ascending: self.sort_ascending,
            }),
            limit: self.effective_limit(),
            filters: Vec::new(),
        }
    }
}

/// What a consumer of the collection sees
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState {
    pub records: Vec<Record>,
    /// True until the initial fetch settles
    pub loading: bool,
    /// Set when the initial fetch failed
    pub error: Option<String>,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            loading: true,
            error: None,
        }
    }
}

// Taken (set to None) on release so the background task can never publish again
type SharedSender = Arc<Mutex<Option<watch::Sender<CollectionState>>>>;

/// Live, locally cached view of one remote table
///
/// Created by [`RealtimeCollection::subscribe`]. The snapshot is loaded by an
/// initial bulk fetch and then kept current from the table's change feed.
/// Releasing (or dropping) the handle closes the feed; nothing is applied
/// afterwards, including a fetch that was still in flight.
pub struct RealtimeCollection {
    table: String,
    state: watch::Receiver<CollectionState>,
    sender: SharedSender,
    task: Option<JoinHandle<()>>,
}

impl RealtimeCollection {
    /// Start the initial fetch and the change feed for `table`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(store: Arc<dyn RemoteStore>, table: &str, options: SubscribeOptions) -> Self {
        let (tx, rx) = watch::channel(CollectionState::default());
        let sender: SharedSender = Arc::new(Mutex::new(Some(tx)));

        let task = tokio::spawn(run_collection(
            store,
            table.to_string(),
            options,
            sender.clone(),
        ));

        Self {
            table: table.to_string(),
            state: rx,
            sender,
            task: Some(task),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn state(&self) -> CollectionState {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> Vec<Record> {
        self.state.borrow().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.borrow().records.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Independent receiver for consumers that render reactively
    pub fn watch(&self) -> watch::Receiver<CollectionState> {
        self.state.clone()
    }

    /// Wait for the next change; returns false once the collection has stopped
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Wait until the state satisfies `predicate`
    ///
    /// Returns `None` if the collection stops before that happens.
    pub async fn wait_for(
        &mut self,
        predicate: impl FnMut(&CollectionState) -> bool,
    ) -> Option<CollectionState> {
        self.state.wait_for(predicate).await.ok().map(|state| state.clone())
    }

    /// Close the change feed and stop applying updates. Safe to call repeatedly.
    pub fn release(&mut self) {
        let released = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some();

        if let Some(task) = self.task.take() {
            task.abort();
        }

        if released {
            tracing::debug!(table = %self.table, "Released realtime collection");
        }
    }

    pub fn is_released(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl Drop for RealtimeCollection {
    fn drop(&mut self) {
        self.release();
    }
}

/// Apply `update` unless the handle has been released. Returns false when released.
fn publish(sender: &SharedSender, update: impl FnOnce(&mut CollectionState)) -> bool {
    let guard = sender.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.as_ref() {
        Some(tx) => {
            tx.send_modify(update);
            true
        }
        None => false,
    }
}

async fn next_event(feed: &mut Option<Subscription>) -> Option<ChangeEvent> {
    match feed {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn run_collection(
    store: Arc<dyn RemoteStore>,
    table: String,
    options: SubscribeOptions,
    sender: SharedSender,
) {
    let max_size = options.effective_limit();
    let query = options.query(&table);

    let mut feed = match store.subscribe(&table).await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            tracing::error!(table = %table, error = %e, "Failed to open change feed");
            None
        }
    };

    let fetch = store.query(&query);
    tokio::pin!(fetch);

    // Events that arrive before the initial fetch settles
    let mut pending: Vec<ChangeEvent> = Vec::new();
    let mut loaded = false;

    while !loaded || feed.is_some() {
        tokio::select! {
            result = &mut fetch, if !loaded => {
                loaded = true;
                let queued = std::mem::take(&mut pending);

                let (base, error) = match result {
                    Ok(mut records) => {
                        records.truncate(max_size);
                        tracing::info!(
                            table = %table,
                            rows = records.len(),
                            replayed = queued.len(),
                            "Initial fetch complete"
                        );
                        (records, None)
                    }
                    Err(e) => {
                        tracing::error!(table = %table, error = %e, "Initial fetch failed");
                        (Vec::new(), Some(e.to_string()))
                    }
                };
                let records = apply_events(base, &queued, max_size);

                let applied = publish(&sender, |state| {
                    state.records = records;
                    state.loading = false;
                    state.error = error;
                });
                if !applied {
                    return;
                }
            }
            event = next_event(&mut feed) => {
                match event {
                    Some(event) if loaded => {
                        let applied = publish(&sender, |state| {
                            let current = std::mem::take(&mut state.records);
                            state.records = apply_event(current, &event, max_size);
                        });
                        if !applied {
                            return;
                        }
                    }
                    Some(event) => pending.push(event),
                    None => {
                        tracing::warn!(table = %table, "Change feed closed by store");
                        feed = None;
                    }
                }
            }
        }
    }
}
