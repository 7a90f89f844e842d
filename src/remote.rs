//! Remote row store: one JSON row per (table, key), upserts keyed by user id, and a
//! push channel per (table, key) delivering full-row change events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Table {
    #[serde(rename = "player_stats")]
    PlayerStats,
    #[serde(rename = "profiles")]
    Profiles,
    #[serde(rename = "user_quests")]
    Quests,
    #[serde(rename = "user_habits")]
    Habits,
    #[serde(rename = "user_gates")]
    Gates,
    #[serde(rename = "user_streaks")]
    Streaks,
    #[serde(rename = "user_challenges")]
    Challenges,
    #[serde(rename = "user_achievements")]
    Achievements,
    #[serde(rename = "guild_invites")]
    GuildInvites,
    #[serde(rename = "friendships")]
    Friendships,
    #[serde(rename = "streak_duels")]
    StreakDuels,
    #[serde(rename = "redemption_codes")]
    RedemptionCodes,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::PlayerStats => "player_stats",
            Table::Profiles => "profiles",
            Table::Quests => "user_quests",
            Table::Habits => "user_habits",
            Table::Gates => "user_gates",
            Table::Streaks => "user_streaks",
            Table::Challenges => "user_challenges",
            Table::Achievements => "user_achievements",
            Table::GuildInvites => "guild_invites",
            Table::Friendships => "friendships",
            Table::StreakDuels => "streak_duels",
            Table::RedemptionCodes => "redemption_codes",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Owning user id; the code itself for `redemption_codes`.
    pub key: String,
    #[serde(flatten)]
    pub columns: Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

impl Row {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.columns.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub key: String,
    pub kind: ChangeKind,
    pub row: Option<Row>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Unavailable(String),
    #[error("row payload for {table} must be a JSON object")]
    NotAnObject { table: Table },
    #[error("failed to encode row: {0}")]
    Encode(String),
    #[error("failed to persist rows: {0}")]
    Persistence(String),
}

pub fn encode_columns<T: Serialize>(table: Table, value: &T) -> Result<Map<String, Value>, RemoteError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(columns)) => Ok(columns),
        Ok(_) => Err(RemoteError::NotAnObject { table }),
        Err(err) => Err(RemoteError::Encode(err.to_string())),
    }
}

/// The remote surface the core consumes: select by key, upsert by key, subscribe by key.
pub trait RemoteStore: Send + Sync + 'static {
    fn select(
        &self,
        table: Table,
        key: &str,
    ) -> impl Future<Output = Result<Option<Row>, RemoteError>> + Send;

    fn upsert(
        &self,
        table: Table,
        key: &str,
        columns: Map<String, Value>,
    ) -> impl Future<Output = Result<Row, RemoteError>> + Send;

    fn subscribe(&self, table: Table, key: &str) -> broadcast::Receiver<ChangeEvent>;
}

#[derive(Debug, Default)]
struct FailurePlan {
    selects: usize,
    upserts: usize,
}

#[derive(Default)]
struct MemoryInner {
    rows: Mutex<BTreeMap<(Table, String), Row>>,
    channels: StdMutex<HashMap<(Table, String), broadcast::Sender<ChangeEvent>>>,
    failures: StdMutex<FailurePlan>,
    writes: StdMutex<HashMap<Table, usize>>,
    selects: AtomicUsize,
    latency: Duration,
}

/// In-process backend. Clones share the same rows and channels, so two sessions built on
/// clones behave like two devices talking to one hosted database.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<MemoryInner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request sleeps for `latency` before touching the rows.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                latency,
                ..MemoryInner::default()
            }),
        }
    }

    pub fn from_rows(rows: impl IntoIterator<Item = (Table, Row)>) -> Self {
        let map = rows
            .into_iter()
            .map(|(table, row)| ((table, row.key.clone()), row))
            .collect();
        Self {
            inner: Arc::new(MemoryInner {
                rows: Mutex::new(map),
                ..MemoryInner::default()
            }),
        }
    }

    pub async fn snapshot(&self) -> BTreeMap<Table, Vec<Row>> {
        let rows = self.inner.rows.lock().await;
        let mut tables: BTreeMap<Table, Vec<Row>> = BTreeMap::new();
        for ((table, _), row) in rows.iter() {
            tables.entry(*table).or_default().push(row.clone());
        }
        tables
    }

    pub fn fail_next_selects(&self, count: usize) {
        if let Ok(mut plan) = self.inner.failures.lock() {
            plan.selects = count;
        }
    }

    pub fn fail_next_upserts(&self, count: usize) {
        if let Ok(mut plan) = self.inner.failures.lock() {
            plan.upserts = count;
        }
    }

    pub fn write_count(&self, table: Table) -> usize {
        self.inner
            .writes
            .lock()
            .map(|writes| writes.get(&table).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn select_count(&self) -> usize {
        self.inner.selects.load(Ordering::SeqCst)
    }

    /// Deletes a row and notifies subscribers.
    pub async fn delete(&self, table: Table, key: &str) {
        let removed = self.inner.rows.lock().await.remove(&(table, key.to_string()));
        if removed.is_some() {
            self.publish(ChangeEvent {
                table,
                key: key.to_string(),
                kind: ChangeKind::Delete,
                row: None,
            });
        }
    }

    fn take_failure(&self, select: bool) -> bool {
        let Ok(mut plan) = self.inner.failures.lock() else {
            return false;
        };
        let counter = if select { &mut plan.selects } else { &mut plan.upserts };
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }

    fn sender(&self, table: Table, key: &str) -> Option<broadcast::Sender<ChangeEvent>> {
        let mut channels = self.inner.channels.lock().ok()?;
        Some(
            channels
                .entry((table, key.to_string()))
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
                .clone(),
        )
    }

    fn publish(&self, event: ChangeEvent) {
        if let Some(sender) = self.sender(event.table, &event.key) {
            if sender.send(event).is_err() {
                debug!("change event dropped, no subscribers");
            }
        }
    }

    async fn simulate_latency(&self) {
        if !self.inner.latency.is_zero() {
            tokio::time::sleep(self.inner.latency).await;
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn select(&self, table: Table, key: &str) -> Result<Option<Row>, RemoteError> {
        self.simulate_latency().await;
        self.inner.selects.fetch_add(1, Ordering::SeqCst);
        if self.take_failure(true) {
            return Err(RemoteError::Unavailable(format!("select on {table} failed")));
        }
        let rows = self.inner.rows.lock().await;
        Ok(rows.get(&(table, key.to_string())).cloned())
    }

    async fn upsert(
        &self,
        table: Table,
        key: &str,
        columns: Map<String, Value>,
    ) -> Result<Row, RemoteError> {
        self.simulate_latency().await;
        if self.take_failure(false) {
            return Err(RemoteError::Unavailable(format!("upsert on {table} failed")));
        }

        let row = Row {
            key: key.to_string(),
            columns,
            updated_at: Utc::now(),
        };
        let existed = {
            let mut rows = self.inner.rows.lock().await;
            rows.insert((table, key.to_string()), row.clone()).is_some()
        };
        if let Ok(mut writes) = self.inner.writes.lock() {
            *writes.entry(table).or_default() += 1;
        }

        self.publish(ChangeEvent {
            table,
            key: key.to_string(),
            kind: if existed {
                ChangeKind::Update
            } else {
                ChangeKind::Insert
            },
            row: Some(row.clone()),
        });
        Ok(row)
    }

    fn subscribe(&self, table: Table, key: &str) -> broadcast::Receiver<ChangeEvent> {
        match self.sender(table, key) {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn select_missing_row_is_none() {
        let remote = MemoryRemote::new();
        assert_eq!(remote.select(Table::Quests, "u1").await, Ok(None));
    }

    #[tokio::test]
    async fn upsert_replaces_and_notifies() {
        let remote = MemoryRemote::new();
        let mut receiver = remote.subscribe(Table::Streaks, "u1");

        remote
            .upsert(Table::Streaks, "u1", columns(json!({ "current_streak": 1 })))
            .await
            .unwrap();
        remote
            .upsert(Table::Streaks, "u1", columns(json!({ "current_streak": 2 })))
            .await
            .unwrap();

        let first = receiver.recv().await.unwrap();
        let second = receiver.recv().await.unwrap();
        assert_eq!(first.kind, ChangeKind::Insert);
        assert_eq!(second.kind, ChangeKind::Update);

        let row = remote.select(Table::Streaks, "u1").await.unwrap().unwrap();
        assert_eq!(row.columns.get("current_streak"), Some(&json!(2)));
        assert_eq!(remote.write_count(Table::Streaks), 2);
    }

    #[tokio::test]
    async fn channels_are_scoped_per_user() {
        let remote = MemoryRemote::new();
        let mut other = remote.subscribe(Table::Quests, "someone-else");

        remote
            .upsert(Table::Quests, "u1", columns(json!({ "quests": [] })))
            .await
            .unwrap();

        assert!(matches!(
            other.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let remote = MemoryRemote::new();
        remote.fail_next_selects(1);
        assert!(remote.select(Table::Gates, "u1").await.is_err());
        assert!(remote.select(Table::Gates, "u1").await.is_ok());
    }

    #[test]
    fn rows_flatten_their_columns() {
        let row = Row {
            key: "u1".to_string(),
            columns: columns(json!({ "gold": 5 })),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["gold"], json!(5));
        assert_eq!(value["key"], json!("u1"));
    }
}
