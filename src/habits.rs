use crate::dates::{self, DateError};
use crate::errors::{ValidationError, require_non_empty};
use crate::models::{Habit, HabitBook, HabitStatus};
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Completion ratio at or above which an elapsed habit counts as won.
pub const HABIT_WIN_THRESHOLD: f64 = 0.95;

pub type HabitStore<R> = EntityStore<HabitBook, R>;

impl Entity for HabitBook {
    const TABLE: Table = Table::Habits;

    fn is_empty(&self) -> bool {
        self.habits.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HabitDraft {
    pub name: String,
    pub icon: String,
    pub color: String,
    pub goal_days: u32,
    pub win_xp: u32,
    pub lose_xp: u32,
}

impl HabitDraft {
    fn validate(self) -> Result<Self, ValidationError> {
        let name = require_non_empty(&self.name, "name")?;
        if self.goal_days == 0 {
            return Err(ValidationError::NotPositive { field: "goal_days" });
        }
        Ok(Self { name, ..self })
    }
}

/// A habit that just left `active`, with the XP its outcome grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finalization {
    pub habit: Habit,
    pub won: bool,
    pub xp: u32,
}

/// Outcome for an active habit on `today`, or `None` while it should stay active.
pub fn evaluate(habit: &Habit, today: NaiveDate) -> Option<bool> {
    if habit.status != HabitStatus::Active {
        return None;
    }
    let completed = habit.completed_days();
    if completed >= habit.goal_days {
        return Some(true);
    }

    let start = match dates::parse_date_key(&habit.start_date) {
        Ok(start) => start,
        Err(err) => {
            warn!(habit = %habit.id, "cannot evaluate habit: {err}");
            return None;
        }
    };
    let last_day = start + Duration::days(i64::from(habit.goal_days) - 1);
    if today <= last_day {
        return None;
    }

    let ratio = f64::from(completed) / f64::from(habit.goal_days);
    Some(ratio >= HABIT_WIN_THRESHOLD)
}

impl HabitBook {
    pub fn finalize(&mut self, today: NaiveDate) -> Vec<Finalization> {
        let mut finalized = Vec::new();
        for habit in &mut self.habits {
            let Some(won) = evaluate(habit, today) else {
                continue;
            };
            habit.status = if won { HabitStatus::Won } else { HabitStatus::Lost };
            habit.end_date = Some(dates::date_key(today));
            finalized.push(Finalization {
                xp: if won { habit.win_xp } else { habit.lose_xp },
                habit: habit.clone(),
                won,
            });
        }
        finalized
    }
}

impl<R: RemoteStore> EntityStore<HabitBook, R> {
    pub async fn create_habit(
        &self,
        draft: HabitDraft,
        today: &str,
    ) -> Result<Option<Habit>, ValidationError> {
        let draft = draft.validate()?;
        dates::parse_date_key(today)?;
        let habit = Habit {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            icon: draft.icon,
            color: draft.color,
            completion_grid: Default::default(),
            goal_days: draft.goal_days,
            win_xp: draft.win_xp,
            lose_xp: draft.lose_xp,
            start_date: today.to_string(),
            end_date: None,
            status: HabitStatus::Active,
        };
        Ok(self
            .mutate(SaveOptions::default(), |book| {
                book.habits.push(habit.clone());
                Some(habit)
            })
            .await)
    }

    /// Flips one grid cell of an active habit and returns the new value.
    pub async fn toggle_day(&self, id: &str, date: &str) -> Result<Option<bool>, DateError> {
        let key = dates::date_key(dates::parse_date_key(date)?);
        Ok(self
            .mutate(SaveOptions::default(), |book| {
                let habit = book.habits.iter_mut().find(|habit| habit.id == id)?;
                if habit.status != HabitStatus::Active {
                    return None;
                }
                let cell = habit.completion_grid.entry(key).or_insert(false);
                *cell = !*cell;
                Some(*cell)
            })
            .await)
    }

    /// Manual finalization. Only active habits move.
    pub async fn complete_habit(&self, id: &str, won: bool, today: &str) -> Option<Finalization> {
        self.mutate(SaveOptions::default(), |book| {
            let habit = book.habits.iter_mut().find(|habit| habit.id == id)?;
            if habit.status != HabitStatus::Active {
                return None;
            }
            habit.status = if won { HabitStatus::Won } else { HabitStatus::Lost };
            habit.end_date = Some(today.to_string());
            Some(Finalization {
                xp: if won { habit.win_xp } else { habit.lose_xp },
                habit: habit.clone(),
                won,
            })
        })
        .await
    }

    pub async fn delete_habit(&self, id: &str) -> bool {
        self.mutate(SaveOptions::allow_empty(), |book| {
            let before = book.habits.len();
            book.habits.retain(|habit| habit.id != id);
            (book.habits.len() != before).then_some(())
        })
        .await
        .is_some()
    }

    /// Finalizes every active habit whose goal is met or whose period has elapsed in `tz`.
    pub async fn finalize_habits_at(&self, now: DateTime<Utc>, tz: Tz) -> Vec<Finalization> {
        let today = dates::date_at(now, tz);
        let finalized = self
            .mutate(SaveOptions::default(), |book| {
                let finalized = book.finalize(today);
                (!finalized.is_empty()).then_some(finalized)
            })
            .await
            .unwrap_or_default();
        for item in &finalized {
            info!(habit = %item.habit.id, won = item.won, "habit finalized");
        }
        finalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::{MemoryRemote, UserId};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn date(value: &str) -> NaiveDate {
        dates::parse_date_key(value).unwrap()
    }

    fn habit(goal_days: u32, done: &[&str]) -> Habit {
        Habit {
            id: "h1".to_string(),
            name: "Run".to_string(),
            icon: "run".to_string(),
            color: "#00f".to_string(),
            completion_grid: done.iter().map(|day| (day.to_string(), true)).collect::<BTreeMap<_, _>>(),
            goal_days,
            win_xp: 300,
            lose_xp: 25,
            start_date: "2026-03-01".to_string(),
            end_date: None,
            status: HabitStatus::Active,
        }
    }

    fn days(count: u32) -> Vec<String> {
        (1..=count).map(|day| format!("2026-03-{day:02}")).collect()
    }

    #[test]
    fn reaching_the_goal_wins_early() {
        let done = days(10);
        let refs: Vec<&str> = done.iter().map(String::as_str).collect();
        assert_eq!(evaluate(&habit(10, &refs), date("2026-03-10")), Some(true));
    }

    #[test]
    fn running_period_stays_active() {
        assert_eq!(evaluate(&habit(10, &["2026-03-01"]), date("2026-03-10")), None);
    }

    #[test]
    fn elapsed_period_uses_threshold() {
        let done = days(19);
        let refs: Vec<&str> = done.iter().map(String::as_str).collect();
        // 19 of 20 is exactly 95%.
        assert_eq!(evaluate(&habit(20, &refs), date("2026-03-21")), Some(true));
        assert_eq!(evaluate(&habit(20, &refs[..18]), date("2026-03-21")), Some(false));
    }

    #[test]
    fn finalized_habits_never_revert() {
        let mut finished = habit(10, &[]);
        finished.status = HabitStatus::Lost;
        assert_eq!(evaluate(&finished, date("2027-01-01")), None);
    }

    #[test]
    fn false_cells_do_not_count() {
        let mut sparse = habit(2, &["2026-03-01"]);
        sparse.completion_grid.insert("2026-03-02".to_string(), false);
        assert_eq!(evaluate(&sparse, date("2026-03-03")), Some(false));
    }

    fn store(remote: &MemoryRemote) -> HabitStore<MemoryRemote> {
        EntityStore::new(
            Arc::new(remote.clone()),
            Some(UserId::new("hunter-1")),
            &SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn finalization_is_stored_with_outcome_xp() {
        let remote = MemoryRemote::new();
        let habits = store(&remote);
        habits.fetch().await;
        habits
            .save(
                HabitBook {
                    habits: vec![habit(3, &["2026-03-01"])],
                },
                SaveOptions::default(),
            )
            .await;

        let tz = dates::parse_timezone("Asia/Tokyo").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 1, 0, 0).unwrap();
        let finalized = habits.finalize_habits_at(now, tz).await;

        assert_eq!(finalized.len(), 1);
        assert!(!finalized[0].won);
        assert_eq!(finalized[0].xp, 25);
        let stored = habits.snapshot().await;
        assert_eq!(stored.habits[0].status, HabitStatus::Lost);
        assert_eq!(stored.habits[0].end_date.as_deref(), Some("2026-03-04"));

        assert!(habits.finalize_habits_at(now, tz).await.is_empty());
    }

    #[tokio::test]
    async fn create_toggle_and_delete() {
        let remote = MemoryRemote::new();
        let habits = store(&remote);
        assert_eq!(habits.fetch().await, crate::store::FetchOutcome::Seeded);

        let draft = HabitDraft {
            name: "Cold shower".to_string(),
            icon: "snow".to_string(),
            color: "#0ff".to_string(),
            goal_days: 30,
            win_xp: 500,
            lose_xp: 0,
        };
        let created = habits
            .create_habit(draft, "2026-05-01")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(habits.toggle_day(&created.id, "2026-05-01").await, Ok(Some(true)));
        assert_eq!(habits.toggle_day(&created.id, "2026-05-01").await, Ok(Some(false)));
        assert!(habits.toggle_day(&created.id, "May 1st").await.is_err());

        assert!(habits.delete_habit(&created.id).await);
        assert!(habits.snapshot().await.habits.is_empty());
    }

    #[tokio::test]
    async fn manual_completion_only_moves_active_habits() {
        let remote = MemoryRemote::new();
        let habits = store(&remote);
        habits.fetch().await;
        habits
            .save(
                HabitBook {
                    habits: vec![habit(10, &[])],
                },
                SaveOptions::default(),
            )
            .await;

        let won = habits.complete_habit("h1", true, "2026-03-05").await.unwrap();
        assert_eq!(won.xp, 300);
        assert!(habits.complete_habit("h1", false, "2026-03-06").await.is_none());
    }
}
