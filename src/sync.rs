//! First sign-in migration of data recorded before the user had an account.
//!
//! For every entity the local copy is uploaded when the user has no remote row, and
//! replaces the remote row only when it shows strictly more progress. Everything else
//! keeps the remote row, which stays the source of truth.

use crate::models::{
    ChallengeData, GateBook, GateStatus, HabitBook, HabitStatus, PlayerStats, Profile, QuestBook,
    StreakData,
};
use crate::remote::{RemoteStore, Table, UserId, encode_columns};
use crate::store::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Comparable amount of progress held by one copy of an entity.
pub trait Progress {
    fn progress_score(&self) -> u64;
}

impl Progress for PlayerStats {
    fn progress_score(&self) -> u64 {
        self.total_xp
    }
}

impl Progress for Profile {
    fn progress_score(&self) -> u64 {
        0
    }
}

impl Progress for QuestBook {
    fn progress_score(&self) -> u64 {
        0
    }
}

impl Progress for HabitBook {
    fn progress_score(&self) -> u64 {
        self.habits
            .iter()
            .map(|habit| {
                let won = u64::from(habit.status == HabitStatus::Won);
                u64::from(habit.completed_days()) + won
            })
            .sum()
    }
}

impl Progress for GateBook {
    fn progress_score(&self) -> u64 {
        self.gates
            .iter()
            .map(|gate| {
                let cleared = if gate.status == GateStatus::Completed {
                    u64::from(gate.required_days)
                } else {
                    0
                };
                cleared + u64::from(gate.completed_days()) + u64::from(gate.losses)
            })
            .sum()
    }
}

impl Progress for StreakData {
    fn progress_score(&self) -> u64 {
        u64::from(self.longest_streak)
    }
}

impl Progress for ChallengeData {
    fn progress_score(&self) -> u64 {
        let claimed = self.claimed_challenges.values().filter(|claimed| **claimed).count();
        u64::try_from(self.xp_history.len() + claimed).unwrap_or(u64::MAX)
    }
}

/// Everything a device recorded while signed out. Missing parts are skipped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSnapshot {
    #[serde(default)]
    pub stats: Option<PlayerStats>,
    #[serde(default)]
    pub profile: Option<Profile>,
    #[serde(default)]
    pub quests: Option<QuestBook>,
    #[serde(default)]
    pub habits: Option<HabitBook>,
    #[serde(default)]
    pub gates: Option<GateBook>,
    #[serde(default)]
    pub streak: Option<StreakData>,
    #[serde(default)]
    pub challenges: Option<ChallengeData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationAction {
    /// No local copy.
    Skipped,
    /// No remote row existed.
    Uploaded,
    /// Local copy had strictly more progress.
    Replaced,
    KeptRemote,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub actions: BTreeMap<Table, MigrationAction>,
}

impl MigrationReport {
    pub fn action(&self, table: Table) -> Option<MigrationAction> {
        self.actions.get(&table).copied()
    }

    pub fn wrote_anything(&self) -> bool {
        self.actions.values().any(|action| {
            matches!(action, MigrationAction::Uploaded | MigrationAction::Replaced)
        })
    }
}

pub struct SyncCoordinator<R> {
    remote: Arc<R>,
    user_id: Option<UserId>,
}

impl<R: RemoteStore> SyncCoordinator<R> {
    pub fn new(remote: Arc<R>, user_id: Option<UserId>) -> Self {
        Self { remote, user_id }
    }

    pub async fn migrate(&self, local: &LocalSnapshot) -> MigrationReport {
        let mut report = MigrationReport::default();
        let Some(user_id) = &self.user_id else {
            return report;
        };

        let actions = [
            (Table::PlayerStats, self.reconcile(user_id, local.stats.as_ref()).await),
            (Table::Profiles, self.reconcile(user_id, local.profile.as_ref()).await),
            (Table::Quests, self.reconcile(user_id, local.quests.as_ref()).await),
            (Table::Habits, self.reconcile(user_id, local.habits.as_ref()).await),
            (Table::Gates, self.reconcile(user_id, local.gates.as_ref()).await),
            (Table::Streaks, self.reconcile(user_id, local.streak.as_ref()).await),
            (Table::Challenges, self.reconcile(user_id, local.challenges.as_ref()).await),
        ];
        report.actions.extend(actions);

        if report.wrote_anything() {
            info!(user = %user_id, ?report, "local data migrated");
        }
        report
    }

    async fn reconcile<E>(&self, user_id: &UserId, local: Option<&E>) -> MigrationAction
    where
        E: Entity + Progress,
    {
        let Some(local) = local else {
            return MigrationAction::Skipped;
        };

        let remote_score = match self.remote.select(E::TABLE, user_id.as_str()).await {
            Ok(None) => None,
            Ok(Some(row)) => match row.decode::<E>() {
                Ok(remote) => Some(remote.progress_score()),
                Err(err) => {
                    warn!(table = %E::TABLE, "remote row unreadable, keeping it: {err}");
                    return MigrationAction::KeptRemote;
                }
            },
            Err(err) => {
                error!(table = %E::TABLE, user = %user_id, "migration fetch failed: {err}");
                return MigrationAction::Failed;
            }
        };

        let action = match remote_score {
            None => MigrationAction::Uploaded,
            Some(score) if local.progress_score() > score => MigrationAction::Replaced,
            Some(_) => return MigrationAction::KeptRemote,
        };

        let columns = match encode_columns(E::TABLE, local) {
            Ok(columns) => columns,
            Err(err) => {
                error!(table = %E::TABLE, "failed to encode local copy: {err}");
                return MigrationAction::Failed;
            }
        };
        match self.remote.upsert(E::TABLE, user_id.as_str(), columns).await {
            Ok(_) => action,
            Err(err) => {
                error!(table = %E::TABLE, user = %user_id, "migration write failed: {err}");
                MigrationAction::Failed
            }
        }
    }
}
