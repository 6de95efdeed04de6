use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use meno_core::{Cookbook, ItemId, OperationKind, OutboxOperation, OutboxQueue, Recipe};
use meno_logging::{meno_debug, meno_error, meno_info, meno_warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::collaborators::RemoteCollection;
use crate::settings::{Clock, OutboxSettings};
use crate::store::{KeyValueStore, StoreError};
use crate::{FlushOutcome, OutboxError, TransportError};

pub const COLLECTION_KEY: &str = "meno:cookbook";
pub const QUEUE_KEY: &str = "meno:cookbook:outbox";
pub const SYNC_ERROR_KEY: &str = "meno:cookbook:sync-error";
pub const ACKNOWLEDGED_KEY: &str = "meno:cookbook:acknowledged";
pub const DEAD_LETTER_KEY: &str = "meno:cookbook:dead-letters";

/// Typed access to the outbox keys of a [`KeyValueStore`].
struct OutboxStore {
    store: Arc<dyn KeyValueStore>,
}

impl OutboxStore {
    /// Missing keys read as the default. Unparseable values are logged and
    /// read as the default too.
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StoreError> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(T::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(value),
            Err(err) => {
                meno_warn!("Ignoring unreadable value under {}: {}", key, err);
                Ok(T::default())
            }
        }
    }

    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, &bytes)
    }

    fn load_sync_error(&self) -> Result<Option<String>, StoreError> {
        Ok(self
            .store
            .get(SYNC_ERROR_KEY)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    fn save_sync_error(&self, message: Option<&str>) -> Result<(), StoreError> {
        match message {
            Some(message) => self.store.set(SYNC_ERROR_KEY, message.as_bytes()),
            None => self.store.delete(SYNC_ERROR_KEY),
        }
    }

    fn load_state(&self) -> Result<OutboxState, StoreError> {
        Ok(OutboxState {
            cookbook: self.load(COLLECTION_KEY)?,
            queue: self.load(QUEUE_KEY)?,
            acknowledged: self.load(ACKNOWLEDGED_KEY)?,
            sync_error: self.load_sync_error()?,
            dead_letters: self.load(DEAD_LETTER_KEY)?,
        })
    }

    fn save_state(&self, state: &OutboxState) -> Result<(), StoreError> {
        self.save(COLLECTION_KEY, &state.cookbook)?;
        self.save(QUEUE_KEY, &state.queue)?;
        self.save(ACKNOWLEDGED_KEY, &state.acknowledged)?;
        self.save(DEAD_LETTER_KEY, &state.dead_letters)?;
        self.save_sync_error(state.sync_error.as_deref())
    }
}

#[derive(Debug, Default)]
struct OutboxState {
    cookbook: Cookbook,
    queue: OutboxQueue,
    /// Ids the remote is known to hold.
    acknowledged: BTreeSet<ItemId>,
    sync_error: Option<String>,
    dead_letters: Vec<OutboxOperation>,
}

impl OutboxState {
    fn enqueue(&mut self, kind: OperationKind, clock: &Clock) {
        let operation = OutboxOperation::new(Uuid::new_v4().to_string(), kind, clock());
        meno_debug!(
            "Queued {} operation {} ({} pending)",
            operation.kind.label(),
            operation.id,
            self.queue.len() + 1
        );
        self.queue.push(operation);
    }
}

/// Local-first cookbook whose remote mutations go through a durable queue.
///
/// Local state is updated and persisted before any network call. Queued
/// operations reach the remote strictly in the order they were enqueued.
#[derive(Clone)]
pub struct MutationOutbox {
    inner: Arc<OutboxInner>,
}

struct OutboxInner {
    store: OutboxStore,
    remote: Option<Arc<dyn RemoteCollection>>,
    settings: OutboxSettings,
    clock: Clock,
    state: Mutex<OutboxState>,
    flushing: AtomicBool,
}

/// Releases the flush flag when the flush ends, however it ends.
struct FlushGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlushGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// One queued operation, prepared for sending outside the lock.
enum Dispatch {
    Create(Recipe),
    Delete(ItemId),
    SetOrder(Vec<ItemId>),
}

impl MutationOutbox {
    /// Load the persisted collection, queue and flags from `store`.
    ///
    /// Without a remote the outbox only keeps the local collection.
    pub fn open(
        store: Arc<dyn KeyValueStore>,
        remote: Option<Arc<dyn RemoteCollection>>,
        settings: OutboxSettings,
        clock: Clock,
    ) -> Result<Self, OutboxError> {
        let store = OutboxStore { store };
        let state = store.load_state()?;
        meno_info!(
            "Outbox opened: {} item(s), {} pending operation(s), {} dead letter(s)",
            state.cookbook.len(),
            state.queue.len(),
            state.dead_letters.len()
        );
        Ok(Self {
            inner: Arc::new(OutboxInner {
                store,
                remote,
                settings,
                clock,
                state: Mutex::new(state),
                flushing: AtomicBool::new(false),
            }),
        })
    }

    /// Save a new item at the front. Returns false if its id is already saved.
    pub async fn save(&self, item: Recipe) -> bool {
        let inserted = self.mutate(|state, clock, remote| {
            let now = clock();
            let id = item.id.clone();
            if !state.cookbook.add(item, now) {
                meno_debug!("Item {} already saved", id);
                return false;
            }
            if remote {
                if let Some(saved) = state.cookbook.get(&id).cloned() {
                    state.enqueue(OperationKind::Save { item: saved }, clock);
                }
            }
            true
        });
        if inserted {
            self.flush_after_mutation().await;
        }
        inserted
    }

    /// Save `revised` as the next version of `base_id` and return it.
    ///
    /// With `replace_base` the base is removed locally and remotely, after the
    /// revision is saved.
    pub async fn save_revision(
        &self,
        base_id: &str,
        revised: Recipe,
        replace_base: bool,
        change_note: Option<String>,
    ) -> Recipe {
        let outcome = self.mutate(|state, clock, remote| {
            let outcome = state.cookbook.add_revision(
                base_id,
                revised,
                replace_base,
                change_note,
                Uuid::new_v4().to_string(),
                clock(),
            );
            if remote {
                if outcome.inserted {
                    state.enqueue(
                        OperationKind::Save {
                            item: outcome.revision.clone(),
                        },
                        clock,
                    );
                }
                if let Some(base_id) = outcome.replaced.clone() {
                    state.enqueue(OperationKind::Remove { item_id: base_id }, clock);
                }
            }
            outcome
        });
        meno_info!(
            "Saved revision {} of {} (replaced: {})",
            outcome.revision.id,
            base_id,
            outcome.replaced.is_some()
        );
        if outcome.inserted || outcome.replaced.is_some() {
            self.flush_after_mutation().await;
        }
        outcome.revision
    }

    pub async fn remove(&self, item_id: &str) -> bool {
        !self.remove_many(&[item_id.to_string()]).await.is_empty()
    }

    /// Remove every listed id locally and queue one remote removal per id.
    /// Returns the ids that were saved locally.
    pub async fn remove_many(&self, item_ids: &[ItemId]) -> Vec<ItemId> {
        if item_ids.is_empty() {
            return Vec::new();
        }
        let removed = self.mutate(|state, clock, remote| {
            let removed = state.cookbook.remove_many(item_ids);
            if remote {
                for item_id in item_ids {
                    state.enqueue(
                        OperationKind::Remove {
                            item_id: item_id.clone(),
                        },
                        clock,
                    );
                }
            }
            removed
        });
        self.flush_after_mutation().await;
        removed
    }

    /// Listed ids first in the given order, the rest behind. Returns the full
    /// resulting order.
    pub async fn reorder(&self, ordered_ids: &[ItemId]) -> Vec<ItemId> {
        let order = self.mutate(|state, clock, remote| {
            let order = state.cookbook.reorder(ordered_ids);
            if remote {
                state.enqueue(
                    OperationKind::Reorder {
                        item_ids: order.clone(),
                    },
                    clock,
                );
            }
            order
        });
        self.flush_after_mutation().await;
        order
    }

    /// Selected items first, keeping their relative order.
    pub async fn move_to_top(&self, item_ids: &[ItemId]) -> Vec<ItemId> {
        let order = self.mutate(|state, clock, remote| {
            let order = state.cookbook.move_to_top(item_ids);
            if remote {
                state.enqueue(
                    OperationKind::Reorder {
                        item_ids: order.clone(),
                    },
                    clock,
                );
            }
            order
        });
        self.flush_after_mutation().await;
        order
    }

    /// Reconciled collection.
    ///
    /// Drains the queue first; only an empty queue lets the remote snapshot
    /// replace local state. Any other case returns local state.
    pub async fn get(&self) -> Vec<Recipe> {
        let Some(remote) = self.inner.remote.clone() else {
            return self.items();
        };

        match self.flush().await {
            FlushOutcome::Drained => {}
            outcome => {
                meno_debug!("Serving local collection: {:?}", outcome);
                return self.items();
            }
        }

        match remote.list().await {
            Ok(items) => {
                let mut state = self.lock_state();
                if !state.queue.is_empty() {
                    // A mutation landed while the snapshot was in flight.
                    return state.cookbook.items().to_vec();
                }
                meno_info!("Remote snapshot applied: {} item(s)", items.len());
                state.acknowledged = items.iter().map(|item| item.id.clone()).collect();
                state.cookbook.replace_all(items);
                state.sync_error = None;
                self.persist(&state);
                state.cookbook.items().to_vec()
            }
            Err(err) => {
                meno_warn!("Remote list failed: {}", err);
                let mut state = self.lock_state();
                state.sync_error = Some(err.to_string());
                self.persist(&state);
                state.cookbook.items().to_vec()
            }
        }
    }

    /// Send due operations in order, stopping at the first failure or at a
    /// head that is still backing off.
    pub async fn flush(&self) -> FlushOutcome {
        self.flush_with(false).await
    }

    /// Flush immediately, ignoring backoff deadlines.
    pub async fn retry_sync(&self) -> FlushOutcome {
        meno_info!("Manual sync requested");
        self.flush_with(true).await
    }

    /// Local collection as it stands, without contacting the remote.
    pub fn items(&self) -> Vec<Recipe> {
        self.lock_state().cookbook.items().to_vec()
    }

    pub fn sync_error(&self) -> Option<String> {
        self.lock_state().sync_error.clone()
    }

    pub fn pending_operations(&self) -> usize {
        self.lock_state().queue.len()
    }

    /// Queued operations in send order.
    pub fn operations(&self) -> Vec<OutboxOperation> {
        self.lock_state().queue.operations().to_vec()
    }

    pub fn dead_letters(&self) -> Vec<OutboxOperation> {
        self.lock_state().dead_letters.clone()
    }

    pub fn clear_dead_letters(&self) -> usize {
        let mut state = self.lock_state();
        let cleared = std::mem::take(&mut state.dead_letters).len();
        if cleared > 0 {
            self.persist(&state);
        }
        cleared
    }

    fn mutate<T>(&self, apply: impl FnOnce(&mut OutboxState, &Clock, bool) -> T) -> T {
        let mut state = self.lock_state();
        let result = apply(&mut state, &self.inner.clock, self.inner.remote.is_some());
        self.persist(&state);
        result
    }

    async fn flush_after_mutation(&self) {
        if self.inner.settings.flush_on_mutation && self.inner.remote.is_some() {
            let outcome = self.flush().await;
            meno_debug!("Flush after mutation: {:?}", outcome);
        }
    }

    async fn flush_with(&self, force: bool) -> FlushOutcome {
        let Some(remote) = self.inner.remote.clone() else {
            return FlushOutcome::NoRemote;
        };
        let Some(_guard) = FlushGuard::acquire(&self.inner.flushing) else {
            return FlushOutcome::AlreadyRunning;
        };

        loop {
            let (operation_id, dispatch) = {
                let mut state = self.lock_state();
                let Some(head) = state.queue.head() else {
                    if state.sync_error.take().is_some() {
                        meno_info!("Outbox drained; sync error cleared");
                        self.persist(&state);
                    }
                    return FlushOutcome::Drained;
                };
                // A head that is not due has failed before. Nothing behind it
                // may be sent until it succeeds, so the walk halts here.
                if !force && !head.is_due((self.inner.clock)()) {
                    meno_debug!(
                        "Head operation {} is backing off until {}",
                        head.id,
                        head.next_attempt_at
                    );
                    return FlushOutcome::Pending {
                        remaining: state.queue.len(),
                    };
                }
                let dispatch = prepare(&head.kind, &state.acknowledged);
                (head.id.clone(), dispatch)
            };

            let result = send(remote.as_ref(), &dispatch).await;

            let mut state = self.lock_state();
            match result {
                Ok(()) => {
                    state.queue.remove(&operation_id);
                    match dispatch {
                        Dispatch::Create(item) => {
                            state.acknowledged.insert(item.id);
                        }
                        Dispatch::Delete(item_id) => {
                            state.acknowledged.remove(&item_id);
                        }
                        Dispatch::SetOrder(_) => {}
                    }
                    meno_debug!("Operation {} acknowledged", operation_id);
                    self.persist(&state);
                }
                Err(err) => {
                    if !self.record_failure(&mut state, &operation_id, &err) {
                        let remaining = state.queue.len();
                        self.persist(&state);
                        return FlushOutcome::Pending { remaining };
                    }
                    self.persist(&state);
                }
            }
        }
    }

    /// Count a failed attempt on the operation. Returns true when the
    /// operation was dead-lettered and the walk may continue.
    fn record_failure(
        &self,
        state: &mut OutboxState,
        operation_id: &str,
        err: &TransportError,
    ) -> bool {
        state.sync_error = Some(err.to_string());
        let policy = self.inner.settings.backoff_policy();
        let now = (self.inner.clock)();
        let Some(operation) = state.queue.get_mut(operation_id) else {
            return true;
        };
        operation.record_failure(now, &policy);
        meno_warn!(
            "{} operation {} failed (attempt {}): {}; next attempt at {}",
            operation.kind.label(),
            operation.id,
            operation.attempts,
            err,
            operation.next_attempt_at
        );

        let exhausted = self
            .inner
            .settings
            .dead_letter_after
            .is_some_and(|budget| operation.attempts >= budget);
        if !exhausted {
            return false;
        }
        if let Some(operation) = state.queue.remove(operation_id) {
            meno_warn!(
                "Giving up on {} operation {} after {} attempt(s)",
                operation.kind.label(),
                operation.id,
                operation.attempts
            );
            state.dead_letters.push(operation);
        }
        true
    }

    fn persist(&self, state: &OutboxState) {
        if let Err(err) = self.inner.store.save_state(state) {
            meno_error!("Failed to persist outbox state: {}", err);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, OutboxState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reorders only mention ids the remote is known to hold.
fn prepare(kind: &OperationKind, acknowledged: &BTreeSet<ItemId>) -> Dispatch {
    match kind {
        OperationKind::Save { item } => Dispatch::Create(item.clone()),
        OperationKind::Remove { item_id } => Dispatch::Delete(item_id.clone()),
        OperationKind::Reorder { item_ids } => Dispatch::SetOrder(
            item_ids
                .iter()
                .filter(|id| acknowledged.contains(*id))
                .cloned()
                .collect(),
        ),
    }
}

async fn send(remote: &dyn RemoteCollection, dispatch: &Dispatch) -> Result<(), TransportError> {
    match dispatch {
        Dispatch::Create(item) => remote.create(item).await,
        Dispatch::Delete(item_id) => remote.delete(item_id).await,
        Dispatch::SetOrder(item_ids) if item_ids.is_empty() => Ok(()),
        Dispatch::SetOrder(item_ids) => remote.set_order(item_ids).await,
    }
}
