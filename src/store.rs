//! Client-held cache of one remote row per user.
//!
//! Every mutation is applied to the local value first and then upserted. While a local
//! write is in flight, and for `echo_settle` after it lands, push notifications for the
//! row are dropped so our own write cannot be clobbered by its echo. This is a wall-clock
//! heuristic, not causal ordering; the remote row stays the source of truth.

use crate::config::SyncConfig;
use crate::remote::{ChangeEvent, ChangeKind, RemoteStore, Table, UserId, encode_columns};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A row shape that lives in exactly one table.
pub trait Entity: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: Table;

    /// Value written the first time a user has no row.
    fn seed() -> Self {
        Self::default()
    }

    /// Collection-valued rows report emptiness so accidental wipes can be refused.
    fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// The caller means to store an empty collection (e.g. the last item was deleted).
    pub allow_empty: bool,
    /// Write even though the store has not been hydrated from the remote yet.
    pub allow_before_init: bool,
}

impl SaveOptions {
    pub fn allow_empty() -> Self {
        Self {
            allow_empty: true,
            allow_before_init: false,
        }
    }

    pub(crate) fn seeding() -> Self {
        Self {
            allow_empty: true,
            allow_before_init: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// No authenticated user; local state reset to defaults.
    Anonymous,
    /// Another fetch is already running; this call did nothing.
    InFlight,
    /// No remote row existed; the seed value was written.
    Seeded,
    Loaded,
    /// A local write overlapped the read; the fetched row was discarded.
    Superseded,
    /// Remote or decode failure; local state left untouched.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Failed,
    Anonymous,
    NotInitialized,
    EmptyCollection,
}

impl SaveOutcome {
    pub fn is_saved(self) -> bool {
        matches!(self, SaveOutcome::Saved)
    }
}

struct StoreState<E> {
    value: E,
    initialized: bool,
    loading: bool,
    last_error: Option<String>,
    writes_in_flight: u32,
    /// Bumped when a write starts and again when it lands.
    write_epoch: u64,
    quiet_until: Option<Instant>,
}

impl<E> StoreState<E> {
    /// True when a write began, landed, or is still pending since `epoch` was read.
    fn overtaken_since(&self, epoch: u64) -> bool {
        self.write_epoch != epoch || self.writes_in_flight > 0
    }
}

struct Inner<E, R> {
    remote: Arc<R>,
    user_id: Option<UserId>,
    echo_settle: Duration,
    state: Mutex<StoreState<E>>,
    fetching: AtomicBool,
}

pub struct EntityStore<E, R> {
    inner: Arc<Inner<E, R>>,
}

impl<E, R> Clone for EntityStore<E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Clears the in-flight flag even if the fetch future is dropped mid-way.
struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Push-channel listener. Dropping it unsubscribes.
pub struct Subscription {
    table: Table,
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(table: Table, handle: JoinHandle<()>) -> Self {
        Self { table, handle }
    }

    pub fn table(&self) -> Table {
        self.table
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl<E: Entity, R: RemoteStore> EntityStore<E, R> {
    pub fn new(remote: Arc<R>, user_id: Option<UserId>, config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                user_id,
                echo_settle: config.echo_settle,
                state: Mutex::new(StoreState {
                    value: E::default(),
                    initialized: false,
                    loading: true,
                    last_error: None,
                    writes_in_flight: 0,
                    write_epoch: 0,
                    quiet_until: None,
                }),
                fetching: AtomicBool::new(false),
            }),
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.inner.user_id.as_ref()
    }

    pub async fn snapshot(&self) -> E {
        self.inner.state.lock().await.value.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state.lock().await.initialized
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.lock().await.loading
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.state.lock().await.last_error.clone()
    }

    /// Loads the row, or seeds it exactly once when the user has none. Concurrent calls
    /// while one is running are dropped, not queued. A read that overlaps a local write
    /// is thrown away so it cannot roll back the newer local value.
    pub async fn fetch(&self) -> FetchOutcome {
        let Some(user_id) = self.inner.user_id.clone() else {
            let mut state = self.inner.state.lock().await;
            state.value = E::default();
            state.loading = false;
            return FetchOutcome::Anonymous;
        };

        if self.inner.fetching.swap(true, Ordering::AcqRel) {
            debug!(table = %E::TABLE, user = %user_id, "fetch already in flight, skipping");
            return FetchOutcome::InFlight;
        }
        let _guard = FetchGuard(&self.inner.fetching);
        let epoch = self.inner.state.lock().await.write_epoch;

        match self.inner.remote.select(E::TABLE, user_id.as_str()).await {
            Ok(Some(row)) => match row.decode::<E>() {
                Ok(value) => {
                    let mut state = self.inner.state.lock().await;
                    if state.overtaken_since(epoch) {
                        debug!(table = %E::TABLE, user = %user_id, "local write overlapped fetch, keeping local value");
                        state.loading = false;
                        return FetchOutcome::Superseded;
                    }
                    state.value = value;
                    state.initialized = true;
                    state.loading = false;
                    state.last_error = None;
                    FetchOutcome::Loaded
                }
                Err(err) => {
                    error!(table = %E::TABLE, user = %user_id, "failed to decode row: {err}");
                    self.record_failure(err.to_string()).await;
                    FetchOutcome::Failed
                }
            },
            Ok(None) => {
                info!(table = %E::TABLE, user = %user_id, "no remote row, seeding defaults");
                let columns = {
                    let mut state = self.inner.state.lock().await;
                    if state.overtaken_since(epoch) {
                        debug!(table = %E::TABLE, user = %user_id, "local write overlapped fetch, not seeding");
                        state.loading = false;
                        return FetchOutcome::Superseded;
                    }
                    let reserved = Self::begin_write(&mut state, E::seed(), SaveOptions::seeding());
                    state.initialized = true;
                    state.loading = false;
                    reserved
                };
                if let Ok(columns) = columns {
                    self.persist(&user_id, columns).await;
                }
                FetchOutcome::Seeded
            }
            Err(err) => {
                error!(table = %E::TABLE, user = %user_id, "failed to fetch row: {err}");
                self.record_failure(err.to_string()).await;
                FetchOutcome::Failed
            }
        }
    }

    /// Replaces the whole value and upserts it.
    pub async fn save(&self, value: E, options: SaveOptions) -> SaveOutcome {
        let Some(user_id) = self.inner.user_id.clone() else {
            return SaveOutcome::Anonymous;
        };
        let reserved = {
            let mut state = self.inner.state.lock().await;
            Self::begin_write(&mut state, value, options)
        };
        match reserved {
            Ok(columns) => self.persist(&user_id, columns).await,
            Err(rejected) => rejected,
        }
    }

    /// Read-modify-write. Returning `None` from `operation` means nothing changed: no
    /// local update, no remote write. Guard rejections also yield `None`.
    pub async fn mutate<T, F>(&self, options: SaveOptions, operation: F) -> Option<T>
    where
        F: FnOnce(&mut E) -> Option<T>,
    {
        let user_id = self.inner.user_id.clone()?;
        let (reserved, output) = {
            let mut state = self.inner.state.lock().await;
            if !state.initialized && !options.allow_before_init {
                warn!(table = %E::TABLE, "refusing to mutate before the store is hydrated");
                return None;
            }
            let mut next = state.value.clone();
            let output = operation(&mut next)?;
            match Self::begin_write(&mut state, next, options) {
                Err(SaveOutcome::Failed) => (None, output),
                Err(rejected) => {
                    debug!(table = %E::TABLE, ?rejected, "mutation rejected by safety guard");
                    return None;
                }
                Ok(columns) => (Some(columns), output),
            }
        };
        if let Some(columns) = reserved {
            self.persist(&user_id, columns).await;
        }
        Some(output)
    }

    /// Partial update that always counts as a change.
    pub async fn update<F>(&self, operation: F) -> bool
    where
        F: FnOnce(&mut E),
    {
        self.mutate(SaveOptions::default(), |value| {
            operation(value);
            Some(())
        })
        .await
        .is_some()
    }

    /// Applies one push notification unless it is likely the echo of our own write.
    pub async fn apply_remote(&self, event: ChangeEvent) -> bool {
        let Some(user_id) = self.inner.user_id.as_ref() else {
            return false;
        };
        if event.table != E::TABLE || event.key != user_id.as_str() {
            return false;
        }

        let mut state = self.inner.state.lock().await;
        let settling = state
            .quiet_until
            .is_some_and(|until| Instant::now() < until);
        if state.writes_in_flight > 0 || settling {
            debug!(table = %E::TABLE, "ignoring push update, local write pending");
            return false;
        }

        match (event.kind, event.row) {
            (ChangeKind::Delete, _) | (_, None) => {
                debug!(table = %E::TABLE, "ignoring push without a row, keeping local cache");
                false
            }
            (ChangeKind::Insert | ChangeKind::Update, Some(row)) => match row.decode::<E>() {
                Ok(value) => {
                    info!(table = %E::TABLE, user = %user_id, "row updated from another device");
                    state.value = value;
                    state.initialized = true;
                    state.loading = false;
                    true
                }
                Err(err) => {
                    warn!(table = %E::TABLE, "ignoring undecodable push payload: {err}");
                    false
                }
            },
        }
    }

    /// Spawns the push-channel consumer for this user's row.
    pub fn listen(&self) -> Option<Subscription> {
        let user_id = self.inner.user_id.clone()?;
        let mut receiver = self.inner.remote.subscribe(E::TABLE, user_id.as_str());
        let store = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        store.apply_remote(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(table = %E::TABLE, skipped, "push channel lagged, refetching");
                        store.fetch().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Some(Subscription {
            table: E::TABLE,
            handle,
        })
    }

    fn check_guards(state: &StoreState<E>, value: &E, options: SaveOptions) -> Option<SaveOutcome> {
        if !state.initialized && !options.allow_before_init {
            warn!(table = %E::TABLE, "blocked save before the store was hydrated");
            return Some(SaveOutcome::NotInitialized);
        }
        if value.is_empty() && !options.allow_empty {
            warn!(table = %E::TABLE, "blocked save of an empty collection");
            return Some(SaveOutcome::EmptyCollection);
        }
        None
    }

    /// Applies `value` locally and marks a write in flight under the caller's lock, so
    /// pushes and fetches racing the upsert already see it pending.
    fn begin_write(
        state: &mut StoreState<E>,
        value: E,
        options: SaveOptions,
    ) -> Result<Map<String, Value>, SaveOutcome> {
        if let Some(rejected) = Self::check_guards(state, &value, options) {
            return Err(rejected);
        }
        let encoded = encode_columns(E::TABLE, &value);
        state.value = value;
        match encoded {
            Ok(columns) => {
                state.writes_in_flight += 1;
                state.write_epoch += 1;
                Ok(columns)
            }
            Err(err) => {
                error!(table = %E::TABLE, "failed to encode row: {err}");
                state.last_error = Some(err.to_string());
                Err(SaveOutcome::Failed)
            }
        }
    }

    /// Upserts a write reserved by `begin_write` and releases its slot.
    async fn persist(&self, user_id: &UserId, columns: Map<String, Value>) -> SaveOutcome {
        let result = self
            .inner
            .remote
            .upsert(E::TABLE, user_id.as_str(), columns)
            .await;

        let mut state = self.inner.state.lock().await;
        state.writes_in_flight = state.writes_in_flight.saturating_sub(1);
        state.write_epoch += 1;
        match result {
            Ok(_) => {
                state.quiet_until = Some(Instant::now() + self.inner.echo_settle);
                state.last_error = None;
                SaveOutcome::Saved
            }
            Err(err) => {
                error!(table = %E::TABLE, user = %user_id, "failed to save row: {err}");
                state.last_error = Some(err.to_string());
                SaveOutcome::Failed
            }
        }
    }

    async fn record_failure(&self, message: String) {
        let mut state = self.inner.state.lock().await;
        state.loading = false;
        state.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Notes {
        items: Vec<String>,
    }

    impl Entity for Notes {
        const TABLE: Table = Table::Habits;

        fn seed() -> Self {
            Notes {
                items: vec!["first".to_string()],
            }
        }

        fn is_empty(&self) -> bool {
            self.items.is_empty()
        }
    }

    fn store(remote: &MemoryRemote) -> EntityStore<Notes, MemoryRemote> {
        EntityStore::new(
            Arc::new(remote.clone()),
            Some(UserId::new("u1")),
            &SyncConfig::default(),
        )
    }

    fn columns(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        match value {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn first_fetch_seeds_then_loads() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);

        assert_eq!(notes.fetch().await, FetchOutcome::Seeded);
        assert!(notes.is_initialized().await);
        assert_eq!(remote.write_count(Table::Habits), 1);

        assert_eq!(notes.fetch().await, FetchOutcome::Loaded);
        assert_eq!(remote.write_count(Table::Habits), 1);
    }

    #[tokio::test]
    async fn legitimately_empty_row_is_not_reseeded() {
        let remote = MemoryRemote::new();
        remote
            .upsert(Table::Habits, "u1", columns(json!({ "items": [] })))
            .await
            .unwrap();
        let notes = store(&remote);

        assert_eq!(notes.fetch().await, FetchOutcome::Loaded);
        assert!(notes.snapshot().await.items.is_empty());
        assert_eq!(remote.write_count(Table::Habits), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetch_is_suppressed() {
        let remote = MemoryRemote::with_latency(Duration::from_millis(50));
        let notes = store(&remote);

        let (first, second) = tokio::join!(notes.fetch(), notes.fetch());
        assert_eq!(first, FetchOutcome::Seeded);
        assert_eq!(second, FetchOutcome::InFlight);
        assert_eq!(remote.write_count(Table::Habits), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refetch_overlapping_a_write_keeps_the_newer_local_value() {
        let remote = MemoryRemote::with_latency(Duration::from_millis(50));
        let notes = store(&remote);
        notes.fetch().await;
        tokio::time::advance(Duration::from_millis(1001)).await;

        let refetch = tokio::spawn({
            let notes = notes.clone();
            async move { notes.fetch().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(notes.update(|value| value.items.push("second".to_string())).await);

        assert_eq!(refetch.await.unwrap(), FetchOutcome::Superseded);
        assert_eq!(notes.snapshot().await.items, vec!["first", "second"]);
        let row = remote.select(Table::Habits, "u1").await.unwrap().unwrap();
        assert_eq!(row.decode::<Notes>().unwrap(), notes.snapshot().await);

        assert_eq!(notes.fetch().await, FetchOutcome::Loaded);
        assert_eq!(notes.snapshot().await.items, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn push_racing_a_pending_write_is_dropped() {
        let remote = MemoryRemote::with_latency(Duration::from_millis(50));
        let notes = store(&remote);
        notes.fetch().await;
        tokio::time::advance(Duration::from_millis(1001)).await;

        let writer = tokio::spawn({
            let notes = notes.clone();
            async move { notes.update(|value| value.items.push("mine".to_string())).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let stale = ChangeEvent {
            table: Table::Habits,
            key: "u1".to_string(),
            kind: ChangeKind::Update,
            row: Some(crate::remote::Row {
                key: "u1".to_string(),
                columns: columns(json!({ "items": ["first"] })),
                updated_at: chrono::Utc::now(),
            }),
        };
        assert!(!notes.apply_remote(stale).await);
        assert!(writer.await.unwrap());
        assert_eq!(notes.snapshot().await.items, vec!["first", "mine"]);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_local_state() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);
        notes.fetch().await;
        notes
            .update(|value| value.items.push("second".to_string()))
            .await;

        remote.fail_next_selects(1);
        assert_eq!(notes.fetch().await, FetchOutcome::Failed);
        assert_eq!(notes.snapshot().await.items, vec!["first", "second"]);
        assert!(notes.last_error().await.is_some());
    }

    #[tokio::test]
    async fn mutations_are_refused_before_hydration() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);

        assert!(!notes.update(|value| value.items.push("x".to_string())).await);
        assert_eq!(
            notes.save(Notes::default(), SaveOptions::default()).await,
            SaveOutcome::NotInitialized
        );
        assert_eq!(remote.write_count(Table::Habits), 0);
    }

    #[tokio::test]
    async fn empty_collection_needs_explicit_intent() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);
        notes.fetch().await;

        let cleared = notes
            .mutate(SaveOptions::default(), |value| {
                value.items.clear();
                Some(())
            })
            .await;
        assert!(cleared.is_none());
        assert_eq!(notes.snapshot().await.items, vec!["first"]);

        let cleared = notes
            .mutate(SaveOptions::allow_empty(), |value| {
                value.items.clear();
                Some(())
            })
            .await;
        assert!(cleared.is_some());
        let row = remote.select(Table::Habits, "u1").await.unwrap().unwrap();
        assert_eq!(row.columns.get("items"), Some(&json!([])));
    }

    #[tokio::test]
    async fn no_change_means_no_write() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);
        notes.fetch().await;

        let result: Option<()> = notes.mutate(SaveOptions::default(), |_| None).await;
        assert!(result.is_none());
        assert_eq!(remote.write_count(Table::Habits), 1);
    }

    #[tokio::test]
    async fn failed_save_keeps_optimistic_value_and_flags_error() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);
        notes.fetch().await;

        remote.fail_next_upserts(1);
        assert!(notes.update(|value| value.items.push("offline".to_string())).await);
        assert_eq!(notes.snapshot().await.items, vec!["first", "offline"]);
        assert!(notes.last_error().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn echo_window_drops_pushes_then_reopens() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);
        notes.fetch().await;
        notes
            .update(|value| value.items.push("mine".to_string()))
            .await;

        let foreign = remote
            .upsert(Table::Habits, "u1", columns(json!({ "items": ["theirs"] })))
            .await
            .unwrap();
        let event = ChangeEvent {
            table: Table::Habits,
            key: "u1".to_string(),
            kind: ChangeKind::Update,
            row: Some(foreign),
        };

        assert!(!notes.apply_remote(event.clone()).await);
        assert_eq!(notes.snapshot().await.items, vec!["first", "mine"]);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(notes.apply_remote(event).await);
        assert_eq!(notes.snapshot().await.items, vec!["theirs"]);
    }

    #[tokio::test]
    async fn deletes_and_foreign_rows_are_ignored() {
        let remote = MemoryRemote::new();
        let notes = store(&remote);
        notes.fetch().await;

        let delete = ChangeEvent {
            table: Table::Habits,
            key: "u1".to_string(),
            kind: ChangeKind::Delete,
            row: None,
        };
        assert!(!notes.apply_remote(delete).await);

        let other_user = ChangeEvent {
            table: Table::Habits,
            key: "u2".to_string(),
            kind: ChangeKind::Insert,
            row: None,
        };
        assert!(!notes.apply_remote(other_user).await);
        assert_eq!(notes.snapshot().await.items, vec!["first"]);
    }

    #[tokio::test]
    async fn anonymous_store_is_inert() {
        let remote = MemoryRemote::new();
        let notes: EntityStore<Notes, MemoryRemote> =
            EntityStore::new(Arc::new(remote.clone()), None, &SyncConfig::default());

        assert_eq!(notes.fetch().await, FetchOutcome::Anonymous);
        assert_eq!(notes.snapshot().await, Notes::default());
        assert!(!notes.update(|value| value.items.push("x".to_string())).await);
        assert!(notes.listen().is_none());
        assert_eq!(remote.write_count(Table::Habits), 0);
    }
}
