use crate::leveling::{self, Rank};
use crate::models::{Attribute, PlayerStats};
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use serde::Serialize;
use tracing::{debug, info};

pub type PlayerStore<R> = EntityStore<PlayerStats, R>;

impl Entity for PlayerStats {
    const TABLE: Table = Table::PlayerStats;
}

/// Before/after picture of one XP award.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct XpAward {
    pub amount: u64,
    pub old_level: u32,
    pub new_level: u32,
    pub old_total_xp: u64,
    pub new_total_xp: u64,
    pub points_gained: u32,
    pub old_rank: Rank,
    pub new_rank: Rank,
}

impl XpAward {
    pub fn levels_gained(&self) -> u32 {
        self.new_level.saturating_sub(self.old_level)
    }

    pub fn ranked_up(&self) -> bool {
        self.new_rank > self.old_rank
    }
}

impl PlayerStats {
    /// Adds XP and re-derives level and rank from the new total. Level never moves
    /// backwards, even if the stored level was ahead of the formula.
    pub fn add_xp(&mut self, amount: u64) -> Option<XpAward> {
        if amount == 0 {
            return None;
        }
        let old_level = self.level.max(1);
        let old_total_xp = self.total_xp;
        let old_rank = self.rank;

        self.total_xp = self.total_xp.saturating_add(amount);
        self.weekly_xp = self.weekly_xp.saturating_add(amount);
        let new_level = leveling::level_for_total_xp(self.total_xp).max(old_level);
        let points_gained = leveling::points_for_levels(old_level, new_level);

        self.level = new_level;
        self.rank = Rank::for_level(new_level);
        self.available_points = self.available_points.saturating_add(points_gained);

        Some(XpAward {
            amount,
            old_level,
            new_level,
            old_total_xp,
            new_total_xp: self.total_xp,
            points_gained,
            old_rank,
            new_rank: self.rank,
        })
    }

    pub fn allocate(&mut self, attribute: Attribute) -> Option<u32> {
        if self.available_points == 0 {
            return None;
        }
        self.available_points -= 1;
        let value = self.attribute_mut(attribute);
        *value = value.saturating_add(1);
        Some(*value)
    }

    /// Raises an attribute outside the point budget, as quest rewards do.
    pub fn boost(&mut self, attribute: Attribute, amount: u32) -> Option<u32> {
        if amount == 0 {
            return None;
        }
        let value = self.attribute_mut(attribute);
        *value = value.saturating_add(amount);
        Some(*value)
    }

    /// Merges frames into the unlock set and returns the ones that were new.
    pub fn unlock_frames<I>(&mut self, frames: I) -> Vec<String>
    where
        I: IntoIterator<Item = String>,
    {
        frames
            .into_iter()
            .filter(|frame| self.unlocked_card_frames.insert(frame.clone()))
            .collect()
    }
}

impl<R: RemoteStore> EntityStore<PlayerStats, R> {
    pub async fn add_xp(&self, amount: u64) -> Option<XpAward> {
        let award = self
            .mutate(SaveOptions::default(), |stats| stats.add_xp(amount))
            .await?;
        if award.levels_gained() > 0 {
            info!(
                from = award.old_level,
                to = award.new_level,
                points = award.points_gained,
                "level up"
            );
        }
        Some(award)
    }

    /// Spends one available point on `attribute`; returns the new score.
    pub async fn allocate_stat(&self, attribute: Attribute) -> Option<u32> {
        let value = self
            .mutate(SaveOptions::default(), |stats| stats.allocate(attribute))
            .await;
        if value.is_none() {
            debug!(stat = %attribute, "no attribute points to allocate");
        }
        value
    }

    pub async fn boost_stat(&self, attribute: Attribute, amount: u32) -> Option<u32> {
        self.mutate(SaveOptions::default(), |stats| stats.boost(attribute, amount))
            .await
    }

    pub async fn add_gold(&self, amount: u64) -> Option<u64> {
        self.add_currency(amount, |stats| &mut stats.gold).await
    }

    pub async fn add_gems(&self, amount: u64) -> Option<u64> {
        self.add_currency(amount, |stats| &mut stats.gems).await
    }

    pub async fn add_credits(&self, amount: u64) -> Option<u64> {
        self.add_currency(amount, |stats| &mut stats.credits).await
    }

    /// Returns the remaining balance, or `None` when the balance cannot cover `amount`.
    pub async fn spend_credits(&self, amount: u64) -> Option<u64> {
        self.mutate(SaveOptions::default(), |stats| {
            if amount == 0 || stats.credits < amount {
                return None;
            }
            stats.credits -= amount;
            Some(stats.credits)
        })
        .await
    }

    pub async fn unlock_card_frames(&self, frames: Vec<String>) -> Vec<String> {
        self.mutate(SaveOptions::default(), |stats| {
            let added = stats.unlock_frames(frames);
            (!added.is_empty()).then_some(added)
        })
        .await
        .unwrap_or_default()
    }

    /// Only frames already unlocked can be selected.
    pub async fn select_card_frame(&self, frame: &str) -> bool {
        self.mutate(SaveOptions::default(), |stats| {
            if !stats.unlocked_card_frames.contains(frame)
                || stats.selected_card_frame.as_deref() == Some(frame)
            {
                return None;
            }
            stats.selected_card_frame = Some(frame.to_string());
            Some(())
        })
        .await
        .is_some()
    }

    pub async fn unlock_class(&self, class: &str) -> bool {
        self.mutate(SaveOptions::default(), |stats| {
            stats.unlocked_classes.insert(class.to_string()).then_some(())
        })
        .await
        .is_some()
    }

    async fn add_currency<F>(&self, amount: u64, field: F) -> Option<u64>
    where
        F: FnOnce(&mut PlayerStats) -> &mut u64,
    {
        if amount == 0 {
            return None;
        }
        self.mutate(SaveOptions::default(), |stats| {
            let balance = field(stats);
            *balance = balance.saturating_add(amount);
            Some(*balance)
        })
        .await
    }
}
