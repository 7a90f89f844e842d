use crate::remote::{ChangeEvent, MemoryRemote, RemoteError, RemoteStore, Row, Table};
use crate::sync::LocalSnapshot;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};

type Tables = BTreeMap<Table, Vec<Row>>;

/// Remote backend for the local daemon: rows live in memory and every upsert rewrites
/// a pretty-printed JSON snapshot of all tables.
#[derive(Clone)]
pub struct FileRemote {
    rows: MemoryRemote,
    path: PathBuf,
    /// Top-level keys this build does not know, written back untouched.
    foreign: Arc<Map<String, Value>>,
    write_lock: Arc<Mutex<()>>,
}

impl FileRemote {
    /// Boots from `path`. A missing file starts empty. A file that cannot be read or
    /// parsed is an error and is left as it is on disk.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, RemoteError> {
        let path = path.into();
        let (tables, foreign) = load_tables(&path).await?;
        let count: usize = tables.values().map(Vec::len).sum();
        info!(path = %path.display(), rows = count, "loaded remote rows");

        let rows = tables
            .into_iter()
            .flat_map(|(table, rows)| rows.into_iter().map(move |row| (table, row)));
        Ok(Self {
            rows: MemoryRemote::from_rows(rows),
            path,
            foreign: Arc::new(foreign),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shared handle to the in-memory rows, e.g. to seed collaborator tables.
    pub fn memory(&self) -> &MemoryRemote {
        &self.rows
    }

    async fn persist(&self) -> Result<(), RemoteError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.rows.snapshot().await;
        persist_tables(&self.path, &snapshot, &self.foreign).await
    }
}

impl RemoteStore for FileRemote {
    async fn select(&self, table: Table, key: &str) -> Result<Option<Row>, RemoteError> {
        self.rows.select(table, key).await
    }

    async fn upsert(
        &self,
        table: Table,
        key: &str,
        columns: Map<String, Value>,
    ) -> Result<Row, RemoteError> {
        let row = self.rows.upsert(table, key, columns).await?;
        self.persist().await?;
        Ok(row)
    }

    fn subscribe(&self, table: Table, key: &str) -> broadcast::Receiver<ChangeEvent> {
        self.rows.subscribe(table, key)
    }
}

async fn load_tables(path: &Path) -> Result<(Tables, Map<String, Value>), RemoteError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok((Tables::default(), Map::new()));
        }
        Err(err) => {
            error!(path = %path.display(), "failed to read data file: {err}");
            return Err(RemoteError::Persistence(err.to_string()));
        }
    };
    let document: Map<String, Value> = serde_json::from_slice(&bytes).map_err(|err| {
        error!(path = %path.display(), "refusing to start from an unparseable data file: {err}");
        RemoteError::Persistence(err.to_string())
    })?;

    let mut tables = Tables::default();
    let mut foreign = Map::new();
    for (name, rows) in document {
        match serde_json::from_value::<Table>(Value::String(name.clone())) {
            Ok(table) => {
                let rows: Vec<Row> = serde_json::from_value(rows).map_err(|err| {
                    error!(table = %table, "refusing to start from malformed rows: {err}");
                    RemoteError::Persistence(format!("{table}: {err}"))
                })?;
                tables.insert(table, rows);
            }
            Err(_) => {
                warn!(table = %name, "keeping unknown table as-is");
                foreign.insert(name, rows);
            }
        }
    }
    Ok((tables, foreign))
}

/// Writes next to the target and renames over it so a crash never leaves a torn file.
async fn persist_tables(
    path: &Path,
    tables: &Tables,
    foreign: &Map<String, Value>,
) -> Result<(), RemoteError> {
    let mut document = foreign.clone();
    for (table, rows) in tables {
        let rows = serde_json::to_value(rows).map_err(|err| RemoteError::Persistence(err.to_string()))?;
        document.insert(table.as_str().to_string(), rows);
    }
    let payload = serde_json::to_vec_pretty(&document)
        .map_err(|err| RemoteError::Persistence(err.to_string()))?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|err| RemoteError::Persistence(err.to_string()))?;
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);
    fs::write(&staging, payload)
        .await
        .map_err(|err| RemoteError::Persistence(err.to_string()))?;
    fs::rename(&staging, path)
        .await
        .map_err(|err| RemoteError::Persistence(err.to_string()))?;
    Ok(())
}

/// Reads a signed-out export for first sign-in migration. Any failure means there is
/// nothing to migrate.
pub async fn read_local_snapshot(path: &Path) -> Option<LocalSnapshot> {
    match fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                error!("failed to parse local snapshot: {err}");
                None
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            error!("failed to read local snapshot: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("hunter_storage_{name}_{}_{nanos}.json", std::process::id()))
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn rows_survive_a_restart() {
        let path = temp_path("restart");
        let remote = FileRemote::open(&path).await.unwrap();
        remote
            .upsert(Table::Streaks, "u1", object(json!({ "current_streak": 4 })))
            .await
            .unwrap();

        let reopened = FileRemote::open(&path).await.unwrap();
        let row = reopened.select(Table::Streaks, "u1").await.unwrap().unwrap();
        assert_eq!(row.columns.get("current_streak"), Some(&json!(4)));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn corrupt_file_is_refused_and_left_intact() {
        let path = temp_path("corrupt");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            FileRemote::open(&path).await,
            Err(RemoteError::Persistence(_))
        ));
        assert_eq!(std::fs::read(&path).unwrap(), b"{ not json");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn unknown_tables_do_not_cost_existing_progress() {
        let path = temp_path("unknown_table");
        let stats = Row {
            key: "u1".to_string(),
            columns: crate::remote::encode_columns(
                Table::PlayerStats,
                &crate::models::PlayerStats {
                    total_xp: 5000,
                    ..Default::default()
                },
            )
            .unwrap(),
            updated_at: chrono::Utc::now(),
        };
        let document = json!({
            "player_stats": [stats],
            "user_guilds": [{ "key": "u1", "guild": "night-raid" }],
        });
        std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

        let remote = FileRemote::open(&path).await.unwrap();
        let hunter = crate::hunter::Hunter::new(
            Arc::new(remote.clone()),
            Some(crate::remote::UserId::new("u1")),
            crate::config::SyncConfig::default(),
            crate::events::EventBus::new(),
        );
        hunter.hydrate().await;
        assert_eq!(hunter.player.snapshot().await.total_xp, 5000);

        remote
            .upsert(Table::Streaks, "u1", object(json!({ "current_streak": 1 })))
            .await
            .unwrap();
        let written: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["user_guilds"][0]["guild"], json!("night-raid"));
        assert_eq!(written["player_stats"][0]["total_xp"], json!(5000));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn malformed_rows_in_a_known_table_are_refused() {
        let path = temp_path("malformed");
        std::fs::write(&path, br#"{ "player_stats": "oops" }"#).unwrap();

        assert!(FileRemote::open(&path).await.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), br#"{ "player_stats": "oops" }"#);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn missing_snapshot_means_nothing_to_migrate() {
        assert!(read_local_snapshot(&temp_path("absent")).await.is_none());
    }
}
