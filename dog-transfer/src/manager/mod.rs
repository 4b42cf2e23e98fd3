mod sink;
pub(crate) mod table;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    client::TransferClient,
    coordinator::{CoordinatorOutcome, RunTicket, TransferCoordinator},
    observer::{Notifier, ObserverSubscription, TransferObserver},
    registry::ClientRegistry,
    store::{MemoryTransferStore, TransferStore},
    ConcurrencyLimit, ConnectivityMonitor, Location, PauseReason, TransferConfig, TransferError,
    TransferEvent, TransferFilter, TransferHandle, TransferKind, TransferRecord, TransferRequest,
    TransferResult, TransferState,
};

use table::{ActiveRun, Change, TransferTable};

/// Managed transfer engine.
///
/// Owns every transfer record, admits queued records under the global
/// concurrency cap and drives them through coordinator tasks. Every record
/// mutation is serialized: the table is updated, the record is persisted,
/// then observers are notified, in that order.
///
/// The manager is a cheap cloneable handle; construct it once and pass it
/// around.
#[derive(Clone)]
pub struct TransferManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    config: RwLock<TransferConfig>,
    store: Arc<dyn TransferStore>,
    registry: ClientRegistry,
    connectivity: ConnectivityMonitor,
    notifier: Notifier,
    table: Mutex<TransferTable>,
    /// Single-writer gate around mutate, persist, notify
    gate: tokio::sync::Mutex<()>,
    last_sequence: Mutex<u64>,
    generation: AtomicU64,
    managing: AtomicBool,
    suspended: AtomicBool,
    watcher: Mutex<Option<JoinHandle<()>>>,
    drained: Notify,
}

impl TransferManager {
    /// Create a manager over `store` with its own connectivity monitor (online)
    pub fn new(store: Arc<dyn TransferStore>, config: TransferConfig) -> TransferResult<Self> {
        Self::with_connectivity(store, config, ConnectivityMonitor::default())
    }

    /// Create a manager that follows an existing connectivity monitor
    pub fn with_connectivity(
        store: Arc<dyn TransferStore>,
        config: TransferConfig,
        connectivity: ConnectivityMonitor,
    ) -> TransferResult<Self> {
        config.validate()?;
        let notifier = Notifier::new(config.event_capacity);
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config: RwLock::new(config),
                store,
                registry: ClientRegistry::new(),
                connectivity,
                notifier,
                table: Mutex::new(TransferTable::default()),
                gate: tokio::sync::Mutex::new(()),
                last_sequence: Mutex::new(0),
                generation: AtomicU64::new(0),
                managing: AtomicBool::new(false),
                suspended: AtomicBool::new(false),
                watcher: Mutex::new(None),
                drained: Notify::new(),
            }),
        })
    }

    /// Create a manager backed by a non-durable in-memory store
    pub fn in_memory(config: TransferConfig) -> TransferResult<Self> {
        Self::new(Arc::new(MemoryTransferStore::new()), config)
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn config(&self) -> TransferConfig {
        self.inner.config.read().clone()
    }

    pub fn is_managing(&self) -> bool {
        self.inner.managing.load(Ordering::SeqCst)
    }

    /// Register the client allowed to run `owner_id`'s transfers.
    ///
    /// Re-registering a client with the same fingerprint replaces it; a
    /// different fingerprint fails with `OwnerConflict`. When managing, the
    /// owner's records paused for connectivity or suspension are re-queued.
    #[instrument(skip(self, client))]
    pub async fn register(
        &self,
        owner_id: &str,
        client: Arc<dyn TransferClient>,
    ) -> TransferResult<()> {
        self.inner.registry.register(owner_id, client)?;
        if self.is_managing() {
            let requeued = self
                .inner
                .mutate(|table, changes| {
                    Ok(table.requeue(
                        PauseReason::is_automatic,
                        |r| r.owner_id == owner_id,
                        changes,
                    ))
                })
                .await?;
            if requeued > 0 {
                debug!("Re-queued {} transfers for owner {}", requeued, owner_id);
            }
            self.inner.schedule().await;
        }
        Ok(())
    }

    /// Forget the client for `owner_id`. Running transfers finish their run;
    /// queued ones wait until a client is registered again.
    pub fn unregister(&self, owner_id: &str) -> bool {
        self.inner.registry.unregister(owner_id).is_some()
    }

    pub fn registered_owners(&self) -> Vec<String> {
        self.inner.registry.owners()
    }

    /// Validate, persist and queue a transfer
    #[instrument(skip(self, request), fields(owner_id = %request.owner_id, kind = ?request.kind))]
    pub async fn add(&self, request: TransferRequest) -> TransferResult<TransferHandle> {
        let request = validate_request(request).await?;
        let record = TransferRecord::from_request(request, self.inner.next_sequence());
        let handle = TransferHandle::from(&record);

        {
            let _gate = self.inner.gate.lock().await;
            self.inner.store.upsert(&record).await?;
            self.inner
                .table
                .lock()
                .records
                .insert(record.id.clone(), record.clone());
            self.inner.notifier.added(&record);
        }
        info!("Added {:?} transfer {}", record.kind, record.id);

        self.inner.schedule().await;
        Ok(handle)
    }

    /// Load persisted records and start admitting.
    ///
    /// Records found InProgress were interrupted by a process exit and come
    /// back Paused; they wait for an explicit resume.
    #[instrument(skip(self))]
    pub async fn start_managing(&self) -> TransferResult<()> {
        if self.inner.managing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let loaded = match self.inner.store.load_all().await {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load transfer records, continuing without them: {}", e);
                Vec::new()
            }
        };
        let count = loaded.len();

        let inner = &self.inner;
        inner
            .mutate(|table, changes| {
                for mut record in loaded {
                    inner.observe_sequence(record.sequence);
                    if table.records.contains_key(&record.id) {
                        continue;
                    }
                    if record.state == TransferState::InProgress {
                        let from = record.pause(PauseReason::Shutdown)?;
                        changes.push(Change::State {
                            record: record.clone(),
                            from,
                        });
                    }
                    table.records.insert(record.id.clone(), record);
                }
                table.requeue(
                    PauseReason::is_automatic,
                    |r| inner.registry.contains(&r.owner_id),
                    changes,
                );
                Ok(())
            })
            .await?;

        inner.spawn_watcher();
        info!("Transfer manager started with {} persisted records", count);
        inner.schedule().await;
        Ok(())
    }

    /// Stop admitting, pause running transfers and wait for their runs to drain
    #[instrument(skip(self))]
    pub async fn stop_managing(&self) -> TransferResult<()> {
        if !self.inner.managing.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(watcher) = self.inner.watcher.lock().take() {
            watcher.abort();
        }

        let paused = self
            .inner
            .mutate(|table, changes| Ok(table.pause_running(PauseReason::Shutdown, changes)))
            .await?;
        self.inner.wait_drained().await;
        info!("Transfer manager stopped, {} transfers paused", paused);
        Ok(())
    }

    #[instrument(skip(self), fields(id = %handle.id))]
    pub async fn pause(&self, handle: &TransferHandle) -> TransferResult<()> {
        self.inner
            .mutate(|table, changes| table.pause(&handle.id, PauseReason::User, changes))
            .await?;
        self.inner.schedule().await;
        Ok(())
    }

    /// Re-queue a paused or failed transfer. Fails with `OwnerUnavailable`
    /// (leaving the record as it is) when no client is registered for it.
    #[instrument(skip(self), fields(id = %handle.id))]
    pub async fn resume(&self, handle: &TransferHandle) -> TransferResult<()> {
        let inner = &self.inner;
        inner
            .mutate(|table, changes| {
                let owner_id = table.top_level(&handle.id)?.owner_id.clone();
                if !inner.registry.contains(&owner_id) {
                    return Err(TransferError::owner_unavailable(owner_id));
                }
                table.resume(&handle.id, changes)
            })
            .await?;
        inner.schedule().await;
        Ok(())
    }

    #[instrument(skip(self), fields(id = %handle.id))]
    pub async fn cancel(&self, handle: &TransferHandle) -> TransferResult<()> {
        self.inner
            .mutate(|table, changes| table.cancel(&handle.id, changes))
            .await?;
        self.inner.schedule().await;
        Ok(())
    }

    /// Cancel if needed, then delete the transfer and its block records
    #[instrument(skip(self), fields(id = %handle.id))]
    pub async fn remove(&self, handle: &TransferHandle) -> TransferResult<()> {
        self.inner
            .mutate(|table, changes| table.remove(&handle.id, changes))
            .await?;
        self.inner.schedule().await;
        Ok(())
    }

    /// Pause every queued or running transfer of `owner_id`
    #[instrument(skip(self))]
    pub async fn pause_all(&self, owner_id: &str) -> TransferResult<usize> {
        let paused = self
            .inner
            .mutate(|table, changes| {
                let mut paused = 0;
                for id in table.owner_ids(owner_id) {
                    let state = table.top_level(&id)?.state;
                    if matches!(state, TransferState::Pending | TransferState::InProgress)
                        && table.pause(&id, PauseReason::User, changes)?
                    {
                        paused += 1;
                    }
                }
                Ok(paused)
            })
            .await?;
        self.inner.schedule().await;
        Ok(paused)
    }

    /// Re-queue every paused transfer of `owner_id`
    #[instrument(skip(self))]
    pub async fn resume_all(&self, owner_id: &str) -> TransferResult<usize> {
        let inner = &self.inner;
        let resumed = inner
            .mutate(|table, changes| {
                let paused: Vec<_> = table
                    .owner_ids(owner_id)
                    .into_iter()
                    .filter(|id| {
                        table.records.get(id).map(|r| r.state) == Some(TransferState::Paused)
                    })
                    .collect();
                if !paused.is_empty() && !inner.registry.contains(owner_id) {
                    return Err(TransferError::owner_unavailable(owner_id));
                }
                let mut resumed = 0;
                for id in paused {
                    if table.resume(&id, changes)? {
                        resumed += 1;
                    }
                }
                Ok(resumed)
            })
            .await?;
        inner.schedule().await;
        Ok(resumed)
    }

    /// Cancel every transfer of `owner_id` that is still owed work
    #[instrument(skip(self))]
    pub async fn cancel_all(&self, owner_id: &str) -> TransferResult<usize> {
        let cancelled = self
            .inner
            .mutate(|table, changes| {
                let mut cancelled = 0;
                for id in table.owner_ids(owner_id) {
                    let state = table.top_level(&id)?.state;
                    if !state.is_terminal() && table.cancel(&id, changes)? {
                        cancelled += 1;
                    }
                }
                Ok(cancelled)
            })
            .await?;
        self.inner.schedule().await;
        Ok(cancelled)
    }

    /// Delete every transfer of `owner_id`, cancelling unfinished ones first
    #[instrument(skip(self))]
    pub async fn remove_all(&self, owner_id: &str) -> TransferResult<usize> {
        let removed = self
            .inner
            .mutate(|table, changes| {
                let ids = table.owner_ids(owner_id);
                for id in &ids {
                    table.remove(id, changes)?;
                }
                Ok(ids.len())
            })
            .await?;
        self.inner.schedule().await;
        Ok(removed)
    }

    /// The host application moved to the background
    #[instrument(skip(self))]
    pub async fn suspend(&self) -> TransferResult<()> {
        self.inner.suspended.store(true, Ordering::SeqCst);
        let paused = self
            .inner
            .mutate(|table, changes| Ok(table.pause_running(PauseReason::Suspended, changes)))
            .await?;
        debug!("Suspended, {} transfers paused", paused);
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn unsuspend(&self) -> TransferResult<()> {
        self.inner.suspended.store(false, Ordering::SeqCst);
        let inner = &self.inner;
        inner
            .mutate(|table, changes| {
                Ok(table.requeue(
                    |reason| reason == PauseReason::Suspended,
                    |r| inner.registry.contains(&r.owner_id),
                    changes,
                ))
            })
            .await?;
        inner.schedule().await;
        Ok(())
    }

    pub fn get(&self, handle: &TransferHandle) -> Option<TransferRecord> {
        self.inner.table.lock().records.get(&handle.id).cloned()
    }

    /// List records matching `filter`, oldest first
    pub fn transfers(&self, filter: &TransferFilter) -> Vec<TransferRecord> {
        let mut records: Vec<TransferRecord> = self
            .inner
            .table
            .lock()
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.sequence
                .cmp(&b.sequence)
                .then_with(|| a.block_index.cmp(&b.block_index))
        });
        records
    }

    /// Block records of a transfer, by index
    pub fn children(&self, handle: &TransferHandle) -> Vec<TransferRecord> {
        self.inner
            .table
            .lock()
            .children(&handle.id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of transfers currently holding a concurrency slot
    pub fn active_runs(&self) -> usize {
        self.inner.table.lock().runs.len()
    }

    /// Register an observer; it stays subscribed until the returned value is dropped
    pub fn subscribe(&self, observer: Arc<dyn TransferObserver>) -> ObserverSubscription {
        self.inner.notifier.subscribe(observer)
    }

    /// Broadcast stream of transfer events
    pub fn events(&self) -> broadcast::Receiver<TransferEvent> {
        self.inner.notifier.events()
    }

    /// Change the global cap; running transfers are never preempted
    pub async fn set_concurrency(&self, limit: ConcurrencyLimit) {
        debug!("Concurrency limit set to {:?}", limit);
        self.inner.config.write().concurrency = limit;
        self.inner.schedule().await;
    }
}

impl ManagerInner {
    /// Apply `f` to the table under the write gate, then persist and notify
    pub(crate) async fn mutate<T, F>(&self, f: F) -> TransferResult<T>
    where
        F: FnOnce(&mut TransferTable, &mut Vec<Change>) -> TransferResult<T>,
    {
        let _gate = self.gate.lock().await;
        let mut changes = Vec::new();
        let result = {
            let mut table = self.table.lock();
            f(&mut table, &mut changes)
        };
        self.commit(changes).await;
        result
    }

    async fn commit(&self, changes: Vec<Change>) {
        for change in changes {
            match change {
                Change::State { record, from } => {
                    self.persist(&record).await;
                    self.notifier.state_changed(&record, from);
                }
                Change::Failed {
                    record,
                    from,
                    error,
                } => {
                    self.persist(&record).await;
                    self.notifier.state_changed(&record, from);
                    self.notifier.failed(&record, &error);
                }
                Change::Progress(record) => {
                    self.persist(&record).await;
                    self.notifier.progress(&record);
                }
                Change::Saved(record) => self.persist(&record).await,
                Change::Deleted(id) => self.unpersist(&id).await,
                Change::Removed(id) => {
                    self.unpersist(&id).await;
                    self.notifier.removed(&id);
                }
            }
        }
    }

    async fn persist(&self, record: &TransferRecord) {
        if let Err(e) = self.store.upsert(record).await {
            error!("Failed to persist transfer {}: {}", record.id, e);
        }
    }

    async fn unpersist(&self, id: &crate::TransferId) {
        if let Err(e) = self.store.remove(id).await {
            error!("Failed to delete transfer {}: {}", id, e);
        }
    }

    /// Admission keys are microsecond timestamps, forced strictly increasing
    fn next_sequence(&self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut last = self.last_sequence.lock();
        *last = now.max(*last + 1);
        *last
    }

    fn observe_sequence(&self, sequence: u64) {
        let mut last = self.last_sequence.lock();
        *last = (*last).max(sequence);
    }

    fn can_admit(&self) -> bool {
        self.managing.load(Ordering::SeqCst)
            && !self.suspended.load(Ordering::SeqCst)
            && self.connectivity.is_reachable()
    }

    /// Admit queued records while slots are free
    pub(crate) fn schedule(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let inner = self.clone();
        async move { inner.admit().await }.boxed()
    }

    async fn admit(self: &Arc<Self>) {
        let _gate = self.gate.lock().await;
        if !self.can_admit() {
            return;
        }

        let mut changes = Vec::new();
        let mut launches = Vec::new();
        {
            let mut table = self.table.lock();
            loop {
                let (cap, max_blocks) = {
                    let config = self.config.read();
                    (config.concurrency.resolve(), config.max_blocks_per_transfer)
                };
                if table.runs.len() >= cap {
                    break;
                }
                let Some(id) = table.next_admissible(|owner| self.registry.contains(owner)) else {
                    break;
                };
                let Some(record) = table.records.get_mut(&id) else {
                    break;
                };
                let Some(client) = self.registry.get(&record.owner_id) else {
                    break;
                };
                let from = match record.transition(TransferState::InProgress) {
                    Ok(from) => from,
                    Err(e) => {
                        warn!("Cannot admit transfer {}: {}", id, e);
                        break;
                    }
                };
                changes.push(Change::State {
                    record: record.clone(),
                    from,
                });

                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                let cancel = CancellationToken::new();
                launches.push((
                    record.clone(),
                    RunTicket {
                        id: id.clone(),
                        generation,
                    },
                    client,
                    cancel.clone(),
                    max_blocks.min(cap),
                ));
                table.runs.insert(id, ActiveRun { generation, cancel });
            }
        }

        self.commit(changes).await;
        for (record, ticket, client, cancel, parallelism) in launches {
            debug!("Admitted transfer {} (generation {})", ticket.id, ticket.generation);
            self.spawn_run(record, ticket, client, cancel, parallelism);
        }
    }

    fn spawn_run(
        self: &Arc<Self>,
        record: TransferRecord,
        ticket: RunTicket,
        client: Arc<dyn TransferClient>,
        cancel: CancellationToken,
        parallelism: usize,
    ) {
        let inner = self.clone();
        let config = self.config.read().clone();
        tokio::spawn(async move {
            let coordinator = TransferCoordinator::new(
                record,
                ticket.clone(),
                client,
                inner.clone(),
                config,
                cancel,
            )
            .with_parallelism(parallelism);
            let outcome = coordinator.run().await;
            inner.finish(&ticket, outcome).await;
            inner.schedule().await;
        });
    }

    /// Release the run's slot and apply its outcome if the record still belongs to it
    async fn finish(&self, ticket: &RunTicket, outcome: CoordinatorOutcome) {
        let _gate = self.gate.lock().await;
        let mut changes = Vec::new();
        {
            let mut table = self.table.lock();
            let current = table
                .runs
                .get(&ticket.id)
                .map(|run| run.generation == ticket.generation)
                .unwrap_or(false);
            if current {
                table.runs.remove(&ticket.id);
            }

            match table.records.get_mut(&ticket.id) {
                Some(record) if current && record.state == TransferState::InProgress => {
                    settle(record, outcome, &mut changes);
                }
                _ => debug!("Run {} of {} drained", ticket.generation, ticket.id),
            }
        }
        self.commit(changes).await;
        self.drained.notify_waiters();
    }

    async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.table.lock().runs.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn spawn_watcher(self: &Arc<Self>) {
        let mut reachability = self.connectivity.subscribe();
        let weak: Weak<ManagerInner> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while reachability.changed().await.is_ok() {
                let reachable = *reachability.borrow_and_update();
                let Some(inner) = weak.upgrade() else { break };
                let result = if reachable {
                    inner
                        .mutate(|table, changes| {
                            Ok(table.requeue(
                                |reason| reason == PauseReason::Connectivity,
                                |r| inner.registry.contains(&r.owner_id),
                                changes,
                            ))
                        })
                        .await
                } else {
                    inner
                        .mutate(|table, changes| {
                            Ok(table.pause_running(PauseReason::Connectivity, changes))
                        })
                        .await
                };
                match result {
                    Ok(n) => info!("Network reachable={}, {} transfers affected", reachable, n),
                    Err(e) => warn!("Reachability change not applied: {}", e),
                }
                if reachable {
                    inner.schedule().await;
                }
            }
        });
        if let Some(previous) = self.watcher.lock().replace(handle) {
            previous.abort();
        }
    }
}

/// Apply a finished run's outcome to its record
fn settle(record: &mut TransferRecord, outcome: CoordinatorOutcome, changes: &mut Vec<Change>) {
    let error = match outcome {
        CoordinatorOutcome::Completed => match record.total_bytes() {
            Some(total) if total == record.progress_bytes => {
                if let Ok(from) = record.transition(TransferState::Complete) {
                    info!("Transfer {} complete ({} bytes)", record.id, total);
                    changes.push(Change::State {
                        record: record.clone(),
                        from,
                    });
                }
                return;
            }
            total => TransferError::integrity(format!(
                "transfer {} finished with {} bytes of {:?}",
                record.id, record.progress_bytes, total
            )),
        },
        CoordinatorOutcome::Failed(error) => error,
        CoordinatorOutcome::Interrupted => {
            // the run stopped without a pause or cancel; wait for a resume
            if let Ok(from) = record.pause(PauseReason::Shutdown) {
                changes.push(Change::State {
                    record: record.clone(),
                    from,
                });
            }
            return;
        }
    };

    if let Ok(from) = record.fail(&error) {
        changes.push(Change::Failed {
            record: record.clone(),
            from,
            error,
        });
    }
}

async fn validate_request(mut request: TransferRequest) -> TransferResult<TransferRequest> {
    if request.owner_id.trim().is_empty() {
        return Err(TransferError::invalid("owner id must not be empty"));
    }
    if let Some(range) = request.byte_range {
        if !range.is_valid() {
            return Err(TransferError::invalid(format!("invalid byte range {}", range)));
        }
    }

    match (&request.kind, &request.source, &request.destination) {
        (TransferKind::Upload, Location::Local(path), Location::Remote(remote)) => {
            if remote.is_empty() {
                return Err(TransferError::invalid("upload destination must not be empty"));
            }
            let metadata = tokio::fs::metadata(path).await.map_err(|e| {
                TransferError::invalid(format!("cannot read upload source {}: {}", path.display(), e))
            })?;
            if !metadata.is_file() {
                return Err(TransferError::invalid(format!(
                    "upload source {} is not a file",
                    path.display()
                )));
            }
            let size = metadata.len();
            match request.byte_range {
                Some(range) if !range.fits(size) => {
                    return Err(TransferError::invalid(format!(
                        "range {} exceeds {} bytes of {}",
                        range,
                        size,
                        path.display()
                    )))
                }
                Some(_) => {}
                None => request.byte_range = Some(crate::ByteRange::whole(size)),
            }
        }
        (TransferKind::Download, Location::Remote(remote), Location::Local(path)) => {
            if remote.is_empty() {
                return Err(TransferError::invalid("download source must not be empty"));
            }
            match tokio::fs::metadata(path).await {
                Ok(metadata) if metadata.is_dir() => {
                    return Err(TransferError::invalid(format!(
                        "download destination {} is a directory",
                        path.display()
                    )));
                }
                Ok(metadata) => {
                    let writable = !metadata.permissions().readonly()
                        && tokio::fs::OpenOptions::new().write(true).open(path).await.is_ok();
                    if !writable {
                        return Err(TransferError::invalid(format!(
                            "download destination {} is not writable",
                            path.display()
                        )));
                    }
                }
                Err(_) => {
                    let parent = path
                        .parent()
                        .filter(|p| !p.as_os_str().is_empty())
                        .unwrap_or_else(|| std::path::Path::new("."));
                    match tokio::fs::metadata(parent).await {
                        Ok(metadata) if metadata.is_dir() && !metadata.permissions().readonly() => {}
                        Ok(_) => {
                            return Err(TransferError::invalid(format!(
                                "download directory {} is not writable",
                                parent.display()
                            )));
                        }
                        Err(_) => {
                            return Err(TransferError::invalid(format!(
                                "download directory {} does not exist",
                                parent.display()
                            )));
                        }
                    }
                }
            }
        }
        _ => return Err(TransferError::invalid("transfer locations do not match its kind")),
    }
    Ok(request)
}
