use crate::dates;
use crate::models::StreakData;
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::info;

/// Bonus XP per full week of streak.
pub const WEEKLY_STREAK_BONUS: u64 = 100;

pub type StreakStore<R> = EntityStore<StreakData, R>;

impl Entity for StreakData {
    const TABLE: Table = Table::Streaks;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreakAdvance {
    pub new_streak: u32,
    pub reward: u64,
    pub is_new_record: bool,
}

pub fn streak_reward(streak: u32) -> u64 {
    u64::from(streak / 7) * WEEKLY_STREAK_BONUS
}

impl StreakData {
    /// Records today's full completion. Returns `None` when today was already counted.
    pub fn advance(&mut self, today: &str, yesterday: &str) -> Option<StreakAdvance> {
        match self.last_completion_date.as_deref() {
            Some(last) if last == today => return None,
            Some(last) if last == yesterday => {
                self.current_streak = self.current_streak.saturating_add(1)
            }
            _ => self.current_streak = 1,
        }

        let is_new_record = self.current_streak > self.longest_streak;
        self.longest_streak = self.longest_streak.max(self.current_streak);
        self.last_completion_date = Some(today.to_string());

        let reward = streak_reward(self.current_streak);
        self.total_rewards = self.total_rewards.saturating_add(reward);

        Some(StreakAdvance {
            new_streak: self.current_streak,
            reward,
            is_new_record,
        })
    }
}

impl<R: RemoteStore> EntityStore<StreakData, R> {
    /// Called once all of today's quests are done.
    pub async fn advance_streak_at(&self, now: DateTime<Utc>, tz: Tz) -> Option<StreakAdvance> {
        let today = dates::today_at(now, tz);
        let yesterday = dates::yesterday_at(now, tz);
        let advance = self
            .mutate(SaveOptions::default(), |streak| streak.advance(&today, &yesterday))
            .await?;
        info!(
            streak = advance.new_streak,
            reward = advance.reward,
            record = advance.is_new_record,
            "streak advanced"
        );
        Some(advance)
    }

    /// Breaks the current streak. The longest streak is kept.
    pub async fn reset_streak(&self) -> bool {
        self.mutate(SaveOptions::default(), |streak| {
            if streak.current_streak == 0 {
                return None;
            }
            streak.current_streak = 0;
            Some(())
        })
        .await
        .is_some()
    }
}
