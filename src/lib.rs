pub mod achievements;
pub mod app;
pub mod challenges;
pub mod config;
pub mod dates;
pub mod errors;
pub mod events;
pub mod gates;
pub mod habits;
pub mod handlers;
pub mod hunter;
pub mod leveling;
pub mod models;
pub mod notifications;
pub mod player;
pub mod profile;
pub mod quests;
pub mod redemption;
pub mod remote;
pub mod state;
pub mod storage;
pub mod store;
pub mod streaks;
pub mod sync;

pub use app::router;
pub use config::{AppConfig, SyncConfig};
pub use events::{EventBus, HunterEvent};
pub use hunter::Hunter;
pub use remote::{MemoryRemote, RemoteStore, Table, UserId};
pub use state::AppState;
pub use storage::{FileRemote, read_local_snapshot};
pub use store::{Entity, EntityStore, FetchOutcome, SaveOutcome};
