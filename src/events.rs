use crate::leveling::Rank;
use serde::Serialize;
use std::sync::OnceLock;
use tokio::sync::broadcast;
use tracing::debug;

const EVENT_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HunterEvent {
    LevelUp {
        old_level: u32,
        new_level: u32,
        points_gained: u32,
    },
    RankUp {
        old_rank: Rank,
        new_rank: Rank,
    },
    QuestsReset {
        date: String,
    },
    StreakAdvanced {
        streak: u32,
        reward: u64,
        is_new_record: bool,
    },
    HabitFinalized {
        habit_id: String,
        name: String,
        won: bool,
        xp: u32,
    },
    GateUnlocked {
        gate_id: String,
        name: String,
        rank: Rank,
    },
    AchievementUnlocked {
        id: String,
        name: String,
        points: u32,
    },
    Notification {
        id: String,
        title: String,
        description: String,
    },
}

/// Typed publish/subscribe for session events. Subscribing hands out a receiver;
/// dropping the receiver is the unsubscribe.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HunterEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Process-wide bus for binaries that want a single event stream.
    pub fn global() -> &'static EventBus {
        static GLOBAL: OnceLock<EventBus> = OnceLock::new();
        GLOBAL.get_or_init(EventBus::new)
    }

    pub fn publish(&self, event: HunterEvent) {
        if self.sender.send(event).is_err() {
            debug!("event dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HunterEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
