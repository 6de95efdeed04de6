use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use meno_core::{ItemId, OperationKind, Recipe};
use meno_engine::{
    Clock, FlushOutcome, KeyValueStore, MemoryKeyValueStore, MutationOutbox, OutboxSettings,
    RemoteCollection, TransportError, TransportKind, QUEUE_KEY, SYNC_ERROR_KEY,
};
use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;

fn recipe(id: &str) -> Recipe {
    Recipe {
        id: id.to_string(),
        title: format!("Recipe {id}"),
        ..Recipe::default()
    }
}

fn item_ids(items: &[Recipe]) -> Vec<String> {
    items.iter().map(|item| item.id.clone()).collect()
}

/// In-memory server that records every call, including failed ones.
#[derive(Default)]
struct FakeRemote {
    calls: Mutex<Vec<String>>,
    items: Mutex<Vec<Recipe>>,
    down: AtomicBool,
    list_down: AtomicBool,
    rejected: Mutex<HashSet<String>>,
}

impl FakeRemote {
    fn with_items(items: Vec<Recipe>) -> Self {
        Self {
            items: Mutex::new(items),
            ..Self::default()
        }
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail only `list`; mutations still go through.
    fn set_list_down(&self, down: bool) {
        self.list_down.store(down, Ordering::SeqCst);
    }

    fn reject(&self, id: &str) {
        self.rejected.lock().unwrap().insert(id.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(call);
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::new(TransportKind::Network, "offline"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteCollection for FakeRemote {
    async fn list(&self) -> Result<Vec<Recipe>, TransportError> {
        self.record("list".to_string())?;
        if self.list_down.load(Ordering::SeqCst) {
            return Err(TransportError::new(TransportKind::Network, "list unavailable"));
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn create(&self, item: &Recipe) -> Result<(), TransportError> {
        self.record(format!("create:{}", item.id))?;
        if self.rejected.lock().unwrap().contains(&item.id) {
            return Err(TransportError::new(TransportKind::HttpStatus(422), "invalid"));
        }
        self.items.lock().unwrap().insert(0, item.clone());
        Ok(())
    }

    async fn delete(&self, item_id: &str) -> Result<(), TransportError> {
        self.record(format!("delete:{item_id}"))?;
        self.items.lock().unwrap().retain(|item| item.id != item_id);
        Ok(())
    }

    async fn set_order(&self, item_ids: &[ItemId]) -> Result<(), TransportError> {
        self.record(format!("order:{}", item_ids.join(",")))?;
        Ok(())
    }
}

/// Create calls wait for a permit from the test.
struct SlowRemote {
    gate: Semaphore,
    started: AtomicBool,
}

#[async_trait::async_trait]
impl RemoteCollection for SlowRemote {
    async fn list(&self) -> Result<Vec<Recipe>, TransportError> {
        Ok(Vec::new())
    }

    async fn create(&self, _item: &Recipe) -> Result<(), TransportError> {
        self.started.store(true, Ordering::SeqCst);
        self.gate.acquire().await.expect("gate closed").forget();
        Ok(())
    }

    async fn delete(&self, _item_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_order(&self, _item_ids: &[ItemId]) -> Result<(), TransportError> {
        Ok(())
    }
}

/// `list` waits for a permit from the test, then answers `items`.
struct GatedListRemote {
    gate: Semaphore,
    listing: AtomicBool,
    items: Vec<Recipe>,
}

#[async_trait::async_trait]
impl RemoteCollection for GatedListRemote {
    async fn list(&self) -> Result<Vec<Recipe>, TransportError> {
        self.listing.store(true, Ordering::SeqCst);
        self.gate.acquire().await.expect("gate closed").forget();
        Ok(self.items.clone())
    }

    async fn create(&self, _item: &Recipe) -> Result<(), TransportError> {
        Ok(())
    }

    async fn delete(&self, _item_id: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn set_order(&self, _item_ids: &[ItemId]) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone)]
struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap())),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += TimeDelta::from_std(by).unwrap();
    }

    fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}

fn manual_settings() -> OutboxSettings {
    OutboxSettings {
        flush_on_mutation: false,
        ..OutboxSettings::default()
    }
}

fn open(
    store: &Arc<MemoryKeyValueStore>,
    remote: Option<Arc<dyn RemoteCollection>>,
    settings: OutboxSettings,
    clock: &ManualClock,
) -> MutationOutbox {
    MutationOutbox::open(store.clone(), remote, settings, clock.clock()).unwrap()
}

#[tokio::test]
async fn operations_reach_the_remote_in_enqueue_order() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);

    assert!(outbox.save(recipe("a")).await);
    assert!(outbox.save(recipe("b")).await);
    assert!(outbox.remove("a").await);
    assert_eq!(outbox.reorder(&["b".to_string()]).await, vec!["b".to_string()]);
    assert!(remote.calls().is_empty());

    assert_eq!(outbox.flush().await, FlushOutcome::Drained);
    assert_eq!(
        remote.calls(),
        vec!["create:a", "create:b", "delete:a", "order:b"]
    );
    assert_eq!(outbox.pending_operations(), 0);
    assert_eq!(outbox.sync_error(), None);
}

#[tokio::test]
async fn a_failed_operation_holds_back_everything_behind_it() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);

    outbox.save(recipe("a")).await;
    outbox.save(recipe("b")).await;
    remote.set_down(true);

    assert_eq!(outbox.flush().await, FlushOutcome::Pending { remaining: 2 });
    assert_eq!(remote.calls(), vec!["create:a"]);
    let head = &outbox.operations()[0];
    assert_eq!(head.attempts, 1);
    assert_eq!(head.next_attempt_at, clock.now() + TimeDelta::seconds(4));
    assert_eq!(outbox.sync_error().as_deref(), Some("network error: offline"));

    // Still backing off: nothing is attempted, not even later operations.
    remote.set_down(false);
    assert_eq!(outbox.flush().await, FlushOutcome::Pending { remaining: 2 });
    assert_eq!(remote.calls(), vec!["create:a"]);

    clock.advance(Duration::from_secs(4));
    assert_eq!(outbox.flush().await, FlushOutcome::Drained);
    assert_eq!(remote.calls(), vec!["create:a", "create:a", "create:b"]);
    assert_eq!(outbox.sync_error(), None);
}

#[tokio::test]
async fn consecutive_failures_back_off_exponentially() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    remote.set_down(true);
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);
    outbox.save(recipe("a")).await;

    let mut delays = Vec::new();
    for _ in 0..6 {
        outbox.retry_sync().await;
        let head = outbox.operations()[0].clone();
        delays.push((head.next_attempt_at - clock.now()).num_seconds());
    }

    assert_eq!(delays, vec![4, 8, 16, 32, 60, 60]);
    assert_eq!(outbox.operations()[0].attempts, 6);
}

#[tokio::test]
async fn retry_sync_ignores_the_backoff_deadline() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);

    outbox.save(recipe("a")).await;
    remote.set_down(true);
    outbox.flush().await;
    remote.set_down(false);

    assert_eq!(outbox.flush().await, FlushOutcome::Pending { remaining: 1 });
    assert_eq!(outbox.retry_sync().await, FlushOutcome::Drained);
    assert_eq!(remote.calls(), vec!["create:a", "create:a"]);
}

#[tokio::test]
async fn saving_the_same_item_twice_is_a_no_op() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote), manual_settings(), &clock);

    assert!(outbox.save(recipe("a")).await);
    assert!(!outbox.save(recipe("a")).await);

    assert_eq!(item_ids(&outbox.items()), vec!["a"]);
    assert_eq!(outbox.pending_operations(), 1);
    let saved = &outbox.items()[0];
    assert_eq!(saved.family_id.as_deref(), Some("a"));
    assert_eq!(saved.version_number, Some(1));
    assert_eq!(saved.created_at, Some(clock.now()));
}

#[tokio::test]
async fn replacing_revision_takes_the_base_slot_and_removes_the_base() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote), manual_settings(), &clock);

    outbox.save(recipe("r1")).await;
    outbox.save(recipe("other")).await;
    outbox.reorder(&["r1".to_string()]).await;
    assert_eq!(outbox.flush().await, FlushOutcome::Drained);

    let revised = Recipe {
        title: "Spicier".to_string(),
        ..recipe("r1")
    };
    let revision = outbox
        .save_revision("r1", revised, true, Some("more chili".to_string()))
        .await;

    assert_ne!(revision.id, "r1");
    assert_eq!(revision.version_number, Some(2));
    assert_eq!(revision.based_on_id.as_deref(), Some("r1"));
    assert_eq!(revision.family_id.as_deref(), Some("r1"));
    assert_eq!(revision.change_note.as_deref(), Some("more chili"));
    assert_eq!(item_ids(&outbox.items()), vec![revision.id.clone(), "other".to_string()]);

    let queued: Vec<OperationKind> = outbox
        .operations()
        .into_iter()
        .map(|operation| operation.kind)
        .collect();
    assert_eq!(
        queued,
        vec![
            OperationKind::Save {
                item: revision.clone()
            },
            OperationKind::Remove {
                item_id: "r1".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn revision_without_a_saved_base_is_a_plain_save() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let clock = ManualClock::new();
    let outbox = open(&store, None, manual_settings(), &clock);

    let revision = outbox
        .save_revision("missing", recipe("fresh"), true, None)
        .await;

    assert_eq!(revision.id, "fresh");
    assert_eq!(revision.version_number, Some(1));
    assert_eq!(revision.based_on_id, None);
    assert_eq!(item_ids(&outbox.items()), vec!["fresh"]);
}

#[tokio::test]
async fn get_serves_local_state_while_the_remote_is_down() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::with_items(vec![recipe("server")]));
    remote.set_down(true);
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), OutboxSettings::default(), &clock);

    outbox.save(recipe("a")).await;
    let items = outbox.get().await;

    assert_eq!(item_ids(&items), vec!["a"]);
    assert!(outbox.sync_error().is_some());
    assert_eq!(outbox.pending_operations(), 1);
    assert!(!remote.calls().contains(&"list".to_string()));
}

#[tokio::test]
async fn get_adopts_the_remote_snapshot_once_drained() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::with_items(vec![recipe("server")]));
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), OutboxSettings::default(), &clock);

    outbox.save(recipe("a")).await;
    let items = outbox.get().await;

    assert_eq!(item_ids(&items), vec!["a", "server"]);
    assert_eq!(item_ids(&outbox.items()), vec!["a", "server"]);
    assert_eq!(outbox.sync_error(), None);
}

#[tokio::test]
async fn get_keeps_local_state_when_the_snapshot_fails_after_draining() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::with_items(vec![recipe("server")]));
    remote.set_list_down(true);
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);

    outbox.save(recipe("a")).await;
    let items = outbox.get().await;

    assert_eq!(item_ids(&items), vec!["a"]);
    assert_eq!(outbox.pending_operations(), 0);
    assert_eq!(remote.calls(), vec!["create:a", "list"]);
    let error = outbox.sync_error().expect("sync error recorded");
    assert!(error.contains("list unavailable"), "{error}");
    assert!(store.get(SYNC_ERROR_KEY).unwrap().is_some());

    remote.set_list_down(false);
    let items = outbox.get().await;
    assert_eq!(item_ids(&items), vec!["a", "server"]);
    assert_eq!(outbox.sync_error(), None);
}

#[tokio::test]
async fn a_mutation_during_the_snapshot_keeps_local_state() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(GatedListRemote {
        gate: Semaphore::new(0),
        listing: AtomicBool::new(false),
        items: vec![recipe("server")],
    });
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);

    let reading = {
        let outbox = outbox.clone();
        tokio::spawn(async move { outbox.get().await })
    };
    for _ in 0..500 {
        if remote.listing.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(remote.listing.load(Ordering::SeqCst));

    assert!(outbox.save(recipe("local")).await);
    remote.gate.add_permits(1);
    let items = reading.await.unwrap();

    assert_eq!(item_ids(&items), vec!["local"]);
    assert_eq!(item_ids(&outbox.items()), vec!["local"]);
    assert_eq!(outbox.pending_operations(), 1);
}

#[tokio::test]
async fn queue_and_collection_survive_reopening() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    remote.set_down(true);
    let clock = ManualClock::new();

    {
        let outbox = open(&store, Some(remote.clone()), OutboxSettings::default(), &clock);
        outbox.save(recipe("a")).await;
        outbox.save(recipe("b")).await;
    }
    assert!(store.get(QUEUE_KEY).unwrap().is_some());
    assert!(store.get(SYNC_ERROR_KEY).unwrap().is_some());

    let reopened = open(&store, Some(remote.clone()), manual_settings(), &clock);
    assert_eq!(item_ids(&reopened.items()), vec!["b", "a"]);
    assert_eq!(reopened.pending_operations(), 2);
    assert!(reopened.sync_error().is_some());

    remote.set_down(false);
    assert_eq!(reopened.retry_sync().await, FlushOutcome::Drained);
    assert!(store.get(SYNC_ERROR_KEY).unwrap().is_none());
}

#[tokio::test]
async fn unreadable_values_open_as_empty() {
    let store = Arc::new(MemoryKeyValueStore::new());
    store.set(QUEUE_KEY, b"not json").unwrap();
    let clock = ManualClock::new();

    let outbox = open(&store, None, manual_settings(), &clock);
    assert_eq!(outbox.pending_operations(), 0);
}

#[tokio::test]
async fn exhausted_operations_move_to_dead_letters() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    remote.reject("bad");
    let clock = ManualClock::new();
    let settings = OutboxSettings {
        dead_letter_after: Some(2),
        ..manual_settings()
    };
    let outbox = open(&store, Some(remote.clone()), settings, &clock);

    outbox.save(recipe("bad")).await;
    outbox.save(recipe("good")).await;

    assert_eq!(outbox.retry_sync().await, FlushOutcome::Pending { remaining: 2 });
    assert_eq!(outbox.retry_sync().await, FlushOutcome::Drained);

    assert_eq!(
        remote.calls(),
        vec!["create:bad", "create:bad", "create:good"]
    );
    let dead = outbox.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].attempts, 2);
    assert_eq!(item_ids(&outbox.items()), vec!["good", "bad"]);

    assert_eq!(outbox.clear_dead_letters(), 1);
    assert!(outbox.dead_letters().is_empty());
}

#[tokio::test]
async fn reorder_only_sends_ids_the_remote_holds() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    remote.reject("local-only");
    let clock = ManualClock::new();
    let settings = OutboxSettings {
        dead_letter_after: Some(1),
        ..manual_settings()
    };
    let outbox = open(&store, Some(remote.clone()), settings, &clock);

    outbox.save(recipe("a")).await;
    outbox.save(recipe("local-only")).await;
    outbox.flush().await;
    outbox
        .reorder(&["local-only".to_string(), "a".to_string()])
        .await;
    assert_eq!(outbox.flush().await, FlushOutcome::Drained);

    assert_eq!(remote.calls().last().map(String::as_str), Some("order:a"));
}

#[tokio::test]
async fn move_to_top_is_sent_as_a_reorder() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);

    for id in ["a", "b", "c"] {
        outbox.save(recipe(id)).await;
    }
    let order = outbox
        .move_to_top(&["a".to_string(), "b".to_string()])
        .await;
    assert_eq!(order, vec!["b", "a", "c"]);

    outbox.flush().await;
    assert_eq!(remote.calls().last().map(String::as_str), Some("order:b,a,c"));
}

#[tokio::test]
async fn removing_many_queues_one_remove_per_id() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(FakeRemote::default());
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote), manual_settings(), &clock);

    outbox.save(recipe("a")).await;
    outbox.save(recipe("b")).await;
    let removed = outbox
        .remove_many(&["a".to_string(), "b".to_string(), "ghost".to_string()])
        .await;

    assert_eq!(removed, vec!["b", "a"]);
    assert!(outbox.items().is_empty());
    let removes = outbox
        .operations()
        .into_iter()
        .filter(|operation| matches!(operation.kind, OperationKind::Remove { .. }))
        .count();
    assert_eq!(removes, 3);
}

#[tokio::test]
async fn local_only_outbox_never_queues() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let clock = ManualClock::new();
    let outbox = open(&store, None, OutboxSettings::default(), &clock);

    outbox.save(recipe("a")).await;
    outbox.remove("missing").await;

    assert_eq!(outbox.pending_operations(), 0);
    assert_eq!(outbox.flush().await, FlushOutcome::NoRemote);
    assert_eq!(item_ids(&outbox.get().await), vec!["a"]);
}

#[tokio::test]
async fn a_second_flush_while_one_runs_reports_already_running() {
    let store = Arc::new(MemoryKeyValueStore::new());
    let remote = Arc::new(SlowRemote {
        gate: Semaphore::new(0),
        started: AtomicBool::new(false),
    });
    let clock = ManualClock::new();
    let outbox = open(&store, Some(remote.clone()), manual_settings(), &clock);
    outbox.save(recipe("a")).await;

    let running = {
        let outbox = outbox.clone();
        tokio::spawn(async move { outbox.flush().await })
    };
    for _ in 0..500 {
        if remote.started.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(remote.started.load(Ordering::SeqCst));

    assert_eq!(outbox.flush().await, FlushOutcome::AlreadyRunning);
    remote.gate.add_permits(1);
    assert_eq!(running.await.unwrap(), FlushOutcome::Drained);
}
