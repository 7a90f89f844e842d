use crate::dates::{self, DateError};
use crate::models::{ChallengeData, UserSettings, XpHistoryEntry, XpSource};
use crate::player::XpAward;
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

pub type ChallengeStore<R> = EntityStore<ChallengeData, R>;

impl Entity for ChallengeData {
    const TABLE: Table = Table::Challenges;
}

impl XpHistoryEntry {
    pub fn from_award(
        award: &XpAward,
        source: XpSource,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            source,
            amount: award.amount,
            description: description.into(),
            levels_gained: award.levels_gained(),
            old_level: award.old_level,
            new_level: award.new_level,
            old_total_xp: award.old_total_xp,
            new_total_xp: award.new_total_xp,
        }
    }
}

impl ChallengeData {
    /// Newest first; anything past `limit` is evicted.
    pub fn push_history(&mut self, entry: XpHistoryEntry, limit: usize) {
        self.xp_history.insert(0, entry);
        self.xp_history.truncate(limit);
    }
}

impl<R: RemoteStore> EntityStore<ChallengeData, R> {
    pub async fn settings(&self) -> UserSettings {
        self.snapshot().await.user_settings
    }

    pub async fn update_challenges(&self, challenges: Vec<Value>) -> bool {
        self.mutate(SaveOptions::default(), |data| {
            data.challenges = challenges;
            Some(())
        })
        .await
        .is_some()
    }

    pub async fn update_necro_challenge(&self, challenge: Option<Value>) -> bool {
        self.mutate(SaveOptions::default(), |data| {
            data.necro_challenge = challenge;
            Some(())
        })
        .await
        .is_some()
    }

    /// Claims a challenge reward once. A second claim returns `false`.
    pub async fn claim_challenge(&self, id: &str) -> bool {
        self.mutate(SaveOptions::default(), |data| {
            if data.claimed_challenges.get(id) == Some(&true) {
                return None;
            }
            data.claimed_challenges.insert(id.to_string(), true);
            Some(())
        })
        .await
        .is_some()
    }

    pub async fn add_xp_history_entry(&self, entry: XpHistoryEntry, limit: usize) -> bool {
        self.mutate(SaveOptions::default(), |data| {
            data.push_history(entry, limit);
            Some(())
        })
        .await
        .is_some()
    }

    /// Stores a new timezone preference. Unknown zones are rejected before any write.
    pub async fn update_settings(&self, timezone: &str) -> Result<bool, DateError> {
        let tz = dates::parse_timezone(timezone)?;
        Ok(self
            .mutate(SaveOptions::default(), |data| {
                if data.user_settings.timezone == tz.name() {
                    return None;
                }
                data.user_settings.timezone = tz.name().to_string();
                Some(())
            })
            .await
            .is_some())
    }

    pub async fn update_active_boost(&self, boost: Option<Value>) -> bool {
        self.mutate(SaveOptions::default(), |data| {
            data.active_boost = boost;
            Some(())
        })
        .await
        .is_some()
    }
}
