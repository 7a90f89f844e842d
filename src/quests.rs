use crate::dates;
use crate::errors::{ValidationError, require_non_empty};
use crate::models::{Attribute, DailyQuest, QuestBook, StatBoost};
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::{debug, info};
use uuid::Uuid;

pub type QuestStore<R> = EntityStore<QuestBook, R>;

impl Entity for QuestBook {
    const TABLE: Table = Table::Quests;

    fn seed() -> Self {
        QuestBook {
            quests: default_quests(),
            last_reset_date: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.quests.is_empty()
    }
}

pub fn default_quests() -> Vec<DailyQuest> {
    let quest = |id: &str, name: &str, xp_reward: u32, stat: Attribute, amount: u32| DailyQuest {
        id: id.to_string(),
        name: name.to_string(),
        xp_reward,
        stat_boost: StatBoost { stat, amount },
        completed: false,
    };

    vec![
        quest("1", "Study Programming", 50, Attribute::Intelligence, 1),
        quest("2", "Workout", 50, Attribute::Strength, 1),
        quest("3", "Read 1 Page", 30, Attribute::Intelligence, 1),
        quest("4", "Meditation", 40, Attribute::Sense, 1),
        quest("5", "Learn JavaScript", 60, Attribute::Intelligence, 2),
    ]
}

/// Fields accepted when creating or editing a quest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestDraft {
    pub name: String,
    pub xp_reward: u32,
    pub stat_boost: StatBoost,
}

impl QuestDraft {
    pub fn validate(self) -> Result<Self, ValidationError> {
        let name = require_non_empty(&self.name, "name")?;
        if self.xp_reward == 0 {
            return Err(ValidationError::NotPositive { field: "xp_reward" });
        }
        if self.stat_boost.amount == 0 {
            return Err(ValidationError::NotPositive { field: "stat_boost.amount" });
        }
        Ok(Self { name, ..self })
    }
}

impl QuestBook {
    pub fn all_completed(&self) -> bool {
        !self.quests.is_empty() && self.quests.iter().all(|quest| quest.completed)
    }

    /// Flips a pending quest to completed. Already-completed or unknown ids yield `None`.
    pub fn complete(&mut self, id: &str) -> Option<DailyQuest> {
        let quest = self.quests.iter_mut().find(|quest| quest.id == id)?;
        if quest.completed {
            return None;
        }
        quest.completed = true;
        Some(quest.clone())
    }

    /// Returns `false` when the book already saw `today`.
    pub fn reset_for(&mut self, today: &str) -> bool {
        if self.last_reset_date.as_deref() == Some(today) {
            return false;
        }
        for quest in &mut self.quests {
            quest.completed = false;
        }
        self.last_reset_date = Some(today.to_string());
        true
    }

    /// Reorders by the given ids. Ids not listed keep their relative order at the end.
    pub fn reorder(&mut self, ids: &[String]) -> bool {
        let mut ordered = Vec::with_capacity(self.quests.len());
        for id in ids {
            if let Some(position) = self.quests.iter().position(|quest| &quest.id == id) {
                ordered.push(self.quests.remove(position));
            }
        }
        if ordered.is_empty() {
            return false;
        }
        ordered.append(&mut self.quests);
        self.quests = ordered;
        true
    }
}

impl<R: RemoteStore> EntityStore<QuestBook, R> {
    /// Completes a quest at most once per reset cycle. Returns the quest only when this
    /// call flipped it, so callers grant rewards exactly once.
    pub async fn complete_quest(&self, id: &str) -> Option<DailyQuest> {
        let completed = self
            .mutate(SaveOptions::default(), |book| book.complete(id))
            .await;
        if completed.is_none() {
            debug!(quest = id, "quest already completed or unknown, skipping");
        }
        completed
    }

    pub async fn add_quest(&self, draft: QuestDraft) -> Result<Option<DailyQuest>, ValidationError> {
        let draft = draft.validate()?;
        let quest = DailyQuest {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            xp_reward: draft.xp_reward,
            stat_boost: draft.stat_boost,
            completed: false,
        };
        Ok(self
            .mutate(SaveOptions::default(), |book| {
                book.quests.push(quest.clone());
                Some(quest)
            })
            .await)
    }

    pub async fn edit_quest(&self, id: &str, draft: QuestDraft) -> Result<bool, ValidationError> {
        let draft = draft.validate()?;
        Ok(self
            .mutate(SaveOptions::default(), |book| {
                let quest = book.quests.iter_mut().find(|quest| quest.id == id)?;
                quest.name = draft.name;
                quest.xp_reward = draft.xp_reward;
                quest.stat_boost = draft.stat_boost;
                Some(())
            })
            .await
            .is_some())
    }

    /// Deleting the last quest is an intended empty save.
    pub async fn delete_quest(&self, id: &str) -> bool {
        self.mutate(SaveOptions::allow_empty(), |book| {
            let before = book.quests.len();
            book.quests.retain(|quest| quest.id != id);
            (book.quests.len() != before).then_some(())
        })
        .await
        .is_some()
    }

    pub async fn reorder_quests(&self, ids: &[String]) -> bool {
        self.mutate(SaveOptions::default(), |book| book.reorder(ids).then_some(()))
            .await
            .is_some()
    }

    pub async fn reset_quests(&self, today: &str) -> bool {
        let reset = self
            .mutate(SaveOptions::default(), |book| book.reset_for(today).then_some(()))
            .await
            .is_some();
        if reset {
            info!(date = today, "daily quests reset");
        }
        reset
    }

    /// Resets when the local date moved past `last_reset_date`. Never fires before the
    /// store is hydrated, where a missing reset date would look like a new day.
    pub async fn check_auto_reset_at(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        if !self.is_initialized().await {
            debug!("quest store not hydrated, skipping auto reset");
            return false;
        }
        self.reset_quests(&dates::today_at(now, tz)).await
    }

    pub async fn all_completed(&self) -> bool {
        self.snapshot().await.all_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::{MemoryRemote, UserId};
    use chrono::TimeZone;
    use std::sync::Arc;

    fn store(remote: &MemoryRemote) -> QuestStore<MemoryRemote> {
        EntityStore::new(
            Arc::new(remote.clone()),
            Some(UserId::new("hunter-1")),
            &SyncConfig::default(),
        )
    }

    fn draft(name: &str, xp_reward: u32) -> QuestDraft {
        QuestDraft {
            name: name.to_string(),
            xp_reward,
            stat_boost: StatBoost {
                stat: Attribute::Agility,
                amount: 1,
            },
        }
    }

    #[tokio::test]
    async fn new_user_gets_the_five_default_quests() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        quests.fetch().await;

        let book = quests.snapshot().await;
        let names: Vec<_> = book.quests.iter().map(|quest| quest.name.as_str()).collect();
        assert_eq!(
            names,
            ["Study Programming", "Workout", "Read 1 Page", "Meditation", "Learn JavaScript"]
        );
        assert!(quests.is_initialized().await);
        assert_eq!(remote.write_count(Table::Quests), 1);
    }

    #[tokio::test]
    async fn completing_twice_is_a_no_op() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        quests.fetch().await;

        assert!(quests.complete_quest("2").await.is_some());
        let after_first = quests.snapshot().await;
        assert!(quests.complete_quest("2").await.is_none());
        assert_eq!(quests.snapshot().await, after_first);
        assert_eq!(remote.write_count(Table::Quests), 2);
    }

    #[tokio::test]
    async fn auto_reset_runs_once_per_local_day() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        quests.fetch().await;
        quests.complete_quest("1").await;

        let tz = dates::parse_timezone("Europe/Paris").unwrap();
        let morning = Utc.with_ymd_and_hms(2026, 4, 2, 6, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 4, 2, 20, 0, 0).unwrap();

        assert!(quests.check_auto_reset_at(morning, tz).await);
        let after_reset = quests.snapshot().await;
        assert!(after_reset.quests.iter().all(|quest| !quest.completed));
        assert_eq!(after_reset.last_reset_date.as_deref(), Some("2026-04-02"));

        assert!(!quests.check_auto_reset_at(evening, tz).await);
        assert_eq!(quests.snapshot().await, after_reset);
    }

    #[tokio::test]
    async fn auto_reset_waits_for_hydration() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        assert!(!quests.check_auto_reset_at(Utc::now(), Tz::UTC).await);
        assert_eq!(remote.write_count(Table::Quests), 0);
    }

    #[tokio::test]
    async fn add_validates_before_touching_state() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        quests.fetch().await;

        assert_eq!(
            quests.add_quest(draft("  ", 10)).await,
            Err(ValidationError::Empty { field: "name" })
        );
        assert_eq!(
            quests.add_quest(draft("Stretch", 0)).await,
            Err(ValidationError::NotPositive { field: "xp_reward" })
        );
        let added = quests.add_quest(draft(" Stretch ", 20)).await.unwrap().unwrap();
        assert_eq!(added.name, "Stretch");
        assert_eq!(quests.snapshot().await.quests.len(), 6);
    }

    #[tokio::test]
    async fn deleting_every_quest_persists_an_empty_list() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        quests.fetch().await;

        for id in ["1", "2", "3", "4", "5"] {
            assert!(quests.delete_quest(id).await);
        }
        assert!(quests.snapshot().await.quests.is_empty());

        let reloaded = store(&remote);
        reloaded.fetch().await;
        assert!(reloaded.snapshot().await.quests.is_empty());
    }

    #[tokio::test]
    async fn edit_and_reorder() {
        let remote = MemoryRemote::new();
        let quests = store(&remote);
        quests.fetch().await;

        assert!(quests.edit_quest("3", draft("Read 10 Pages", 45)).await.unwrap());
        assert!(!quests.edit_quest("missing", draft("x", 1)).await.unwrap());
        assert!(
            quests
                .reorder_quests(&["5".to_string(), "3".to_string()])
                .await
        );

        let ids: Vec<_> = quests
            .snapshot()
            .await
            .quests
            .into_iter()
            .map(|quest| quest.id)
            .collect();
        assert_eq!(ids, ["5", "3", "1", "2", "4"]);
    }

    #[test]
    fn all_completed_requires_at_least_one_quest() {
        let mut book = QuestBook::default();
        assert!(!book.all_completed());
        book.quests = default_quests();
        for id in ["1", "2", "3", "4", "5"] {
            book.complete(id);
        }
        assert!(book.all_completed());
    }
}
