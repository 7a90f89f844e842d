//! One signed-in hunter: every entity store for the user plus the flows that cross
//! stores (quest → XP → streak → gates) and the periodic daily tick.

use crate::achievements::{Achievement, AchievementCheck, AchievementStore};
use crate::challenges::ChallengeStore;
use crate::config::SyncConfig;
use crate::dates;
use crate::events::{EventBus, HunterEvent};
use crate::gates::GateStore;
use crate::habits::{Finalization, HabitStore};
use crate::models::{DailyQuest, Gate, XpHistoryEntry, XpSource};
use crate::notifications::NotificationCenter;
use crate::player::{PlayerStore, XpAward};
use crate::profile::{LinkOutcome, ProfileStore};
use crate::quests::QuestStore;
use crate::redemption::{self, Redemption, RedemptionError};
use crate::remote::{RemoteStore, UserId};
use crate::store::{EntityStore, FetchOutcome, Subscription};
use crate::streaks::{StreakAdvance, StreakStore};
use crate::sync::{LocalSnapshot, MigrationReport, SyncCoordinator};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HydrationReport {
    pub player: FetchOutcome,
    pub profile: FetchOutcome,
    pub quests: FetchOutcome,
    pub habits: FetchOutcome,
    pub gates: FetchOutcome,
    pub streak: FetchOutcome,
    pub challenges: FetchOutcome,
    pub achievements: FetchOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInReport {
    pub migration: Option<MigrationReport>,
    pub hydration: HydrationReport,
    pub link: Option<LinkOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestCompletion {
    pub quest: DailyQuest,
    pub award: Option<XpAward>,
    pub credits: u64,
    pub streak: Option<StreakAdvance>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub date: String,
    pub quests_reset: bool,
    pub finalized_habits: Vec<String>,
    pub unlocked_gates: Vec<String>,
    pub achievements: Vec<String>,
}

pub struct Hunter<R> {
    remote: Arc<R>,
    user_id: Option<UserId>,
    config: SyncConfig,
    events: EventBus,
    pub player: PlayerStore<R>,
    pub profile: ProfileStore<R>,
    pub quests: QuestStore<R>,
    pub habits: HabitStore<R>,
    pub gates: GateStore<R>,
    pub streak: StreakStore<R>,
    pub challenges: ChallengeStore<R>,
    pub achievements: AchievementStore<R>,
    pub notifications: NotificationCenter<R>,
}

impl<R> Clone for Hunter<R> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            user_id: self.user_id.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            player: self.player.clone(),
            profile: self.profile.clone(),
            quests: self.quests.clone(),
            habits: self.habits.clone(),
            gates: self.gates.clone(),
            streak: self.streak.clone(),
            challenges: self.challenges.clone(),
            achievements: self.achievements.clone(),
            notifications: self.notifications.clone(),
        }
    }
}

impl<R: RemoteStore> Hunter<R> {
    pub fn new(remote: Arc<R>, user_id: Option<UserId>, config: SyncConfig, events: EventBus) -> Self {
        Self {
            player: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            profile: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            quests: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            habits: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            gates: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            streak: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            challenges: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            achievements: EntityStore::new(Arc::clone(&remote), user_id.clone(), &config),
            notifications: NotificationCenter::new(
                Arc::clone(&remote),
                user_id.clone(),
                events.clone(),
            ),
            remote,
            user_id,
            config,
            events,
        }
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Loads every store concurrently. Each store seeds itself if the user has no row.
    pub async fn hydrate(&self) -> HydrationReport {
        let (player, profile, quests, habits, gates, streak, challenges, achievements) = tokio::join!(
            self.player.fetch(),
            self.profile.fetch(),
            self.quests.fetch(),
            self.habits.fetch(),
            self.gates.fetch(),
            self.streak.fetch(),
            self.challenges.fetch(),
            self.achievements.fetch(),
        );
        if challenges == FetchOutcome::Seeded {
            if let Some(zone) = &self.config.default_timezone {
                if let Err(err) = self.challenges.update_settings(zone).await {
                    warn!("configured default timezone rejected: {err}");
                }
            }
        }
        self.notifications.refresh().await;
        HydrationReport {
            player,
            profile,
            quests,
            habits,
            gates,
            streak,
            challenges,
            achievements,
        }
    }

    /// Migrates signed-out data, hydrates, then links the chat account if one is known.
    pub async fn sign_in(&self, local: Option<LocalSnapshot>, discord_id: Option<&str>) -> SignInReport {
        let migration = match local {
            Some(local) => Some(
                SyncCoordinator::new(Arc::clone(&self.remote), self.user_id.clone())
                    .migrate(&local)
                    .await,
            ),
            None => None,
        };
        let hydration = self.hydrate().await;
        let link = match discord_id {
            Some(id) => Some(self.profile.link_discord_id(id, self.config.link_timeout).await),
            None => None,
        };
        if let Some(user_id) = &self.user_id {
            info!(user = %user_id, "hunter signed in");
        }
        SignInReport {
            migration,
            hydration,
            link,
        }
    }

    /// Push listeners for every store. Dropping the returned handles unsubscribes.
    pub fn listen(&self) -> Vec<Subscription> {
        let mut subscriptions: Vec<Subscription> = [
            self.player.listen(),
            self.profile.listen(),
            self.quests.listen(),
            self.habits.listen(),
            self.gates.listen(),
            self.streak.listen(),
            self.challenges.listen(),
            self.achievements.listen(),
        ]
        .into_iter()
        .flatten()
        .collect();
        subscriptions.extend(self.notifications.listen());
        subscriptions
    }

    /// The user's stored zone, else the configured fallback, else the host zone.
    pub async fn timezone(&self) -> Tz {
        if !self.challenges.is_initialized().await {
            return self
                .config
                .fallback_timezone()
                .unwrap_or_else(|_| dates::host_timezone());
        }
        let stored = self.challenges.snapshot().await.user_settings.timezone;
        match dates::parse_timezone(&stored) {
            Ok(tz) => tz,
            Err(err) => {
                warn!("stored timezone unusable: {err}");
                self.config
                    .fallback_timezone()
                    .unwrap_or_else(|_| dates::host_timezone())
            }
        }
    }

    pub async fn today(&self) -> (String, Tz) {
        let tz = self.timezone().await;
        (dates::today(tz), tz)
    }

    /// The single XP path: updates stats, logs history, announces level and rank changes
    /// and opens gates the new level qualifies for.
    pub async fn award_xp_at(
        &self,
        amount: u64,
        source: XpSource,
        description: &str,
        now: DateTime<Utc>,
    ) -> Option<XpAward> {
        let award = self.player.add_xp(amount).await?;
        self.challenges
            .add_xp_history_entry(
                XpHistoryEntry::from_award(&award, source, description, now),
                self.config.xp_history_limit,
            )
            .await;

        if award.levels_gained() > 0 {
            self.events.publish(HunterEvent::LevelUp {
                old_level: award.old_level,
                new_level: award.new_level,
                points_gained: award.points_gained,
            });
            self.unlock_gates(award.new_level, award.new_total_xp).await;
        }
        if award.ranked_up() {
            self.events.publish(HunterEvent::RankUp {
                old_rank: award.old_rank,
                new_rank: award.new_rank,
            });
        }
        Some(award)
    }

    pub async fn award_xp(&self, amount: u64, source: XpSource, description: &str) -> Option<XpAward> {
        self.award_xp_at(amount, source, description, Utc::now()).await
    }

    /// Completes a quest once and pays it out: XP, credits, the stat boost, and the
    /// streak once every quest of the day is done.
    pub async fn complete_quest_at(&self, id: &str, now: DateTime<Utc>) -> Option<QuestCompletion> {
        let quest = self.quests.complete_quest(id).await?;
        let xp = u64::from(quest.xp_reward);
        let award = self.award_xp_at(xp, XpSource::Quest, &quest.name, now).await;
        let credits = match self.player.add_credits(xp / 10).await {
            Some(_) => xp / 10,
            None => 0,
        };
        self.player
            .boost_stat(quest.stat_boost.stat, quest.stat_boost.amount)
            .await;

        let streak = if self.quests.all_completed().await {
            self.advance_streak_at(now).await
        } else {
            None
        };

        Some(QuestCompletion {
            quest,
            award,
            credits,
            streak,
        })
    }

    pub async fn complete_quest(&self, id: &str) -> Option<QuestCompletion> {
        self.complete_quest_at(id, Utc::now()).await
    }

    async fn advance_streak_at(&self, now: DateTime<Utc>) -> Option<StreakAdvance> {
        let tz = self.timezone().await;
        let advance = self.streak.advance_streak_at(now, tz).await?;
        self.events.publish(HunterEvent::StreakAdvanced {
            streak: advance.new_streak,
            reward: advance.reward,
            is_new_record: advance.is_new_record,
        });
        if advance.reward > 0 {
            let description = format!("{}-day streak bonus", advance.new_streak);
            self.award_xp_at(advance.reward, XpSource::Streak, &description, now)
                .await;
        }
        Some(advance)
    }

    /// Completes an active gate and pays its XP and gold.
    pub async fn complete_gate_at(&self, id: &str, now: DateTime<Utc>) -> Option<Gate> {
        let tz = self.timezone().await;
        let gate = self
            .gates
            .complete_gate(id, &dates::today_at(now, tz))
            .await?;
        let description = format!("Cleared {}", gate.name);
        self.award_xp_at(gate.rewards.xp, XpSource::Gate, &description, now)
            .await;
        self.player.add_gold(gate.rewards.gold).await;
        Some(gate)
    }

    pub async fn complete_habit_at(&self, id: &str, won: bool, now: DateTime<Utc>) -> Option<Finalization> {
        let tz = self.timezone().await;
        let finalization = self
            .habits
            .complete_habit(id, won, &dates::today_at(now, tz))
            .await?;
        self.pay_finalization(&finalization, now).await;
        Some(finalization)
    }

    async fn pay_finalization(&self, finalization: &Finalization, now: DateTime<Utc>) {
        self.events.publish(HunterEvent::HabitFinalized {
            habit_id: finalization.habit.id.clone(),
            name: finalization.habit.name.clone(),
            won: finalization.won,
            xp: finalization.xp,
        });
        let outcome = if finalization.won { "Won" } else { "Finished" };
        let description = format!("{outcome} habit {}", finalization.habit.name);
        self.award_xp_at(u64::from(finalization.xp), XpSource::Habit, &description, now)
            .await;
    }

    async fn unlock_gates(&self, level: u32, total_xp: u64) -> Vec<Gate> {
        let unlocked = self.gates.check_unlocks(level, total_xp).await;
        for gate in &unlocked {
            self.events.publish(HunterEvent::GateUnlocked {
                gate_id: gate.id.clone(),
                name: gate.name.clone(),
                rank: gate.rank,
            });
        }
        unlocked
    }

    pub async fn check_achievements_at(&self, now: DateTime<Utc>) -> Vec<&'static Achievement> {
        let check = AchievementCheck::gather(
            &self.player.snapshot().await,
            &self.streak.snapshot().await,
            &self.habits.snapshot().await,
            &self.gates.snapshot().await,
            &self.challenges.snapshot().await,
        );
        let unlocked = self.achievements.check_all(&check, now).await;
        for achievement in &unlocked {
            self.events.publish(HunterEvent::AchievementUnlocked {
                id: achievement.id.to_string(),
                name: achievement.name.to_string(),
                points: achievement.points,
            });
        }
        unlocked
    }

    /// One pass of the periodic check: quest reset at local midnight, habit
    /// finalization, gate unlocks and achievements.
    pub async fn daily_tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let tz = self.timezone().await;
        let date = dates::today_at(now, tz);

        let quests_reset = self.quests.check_auto_reset_at(now, tz).await;
        if quests_reset {
            self.events.publish(HunterEvent::QuestsReset { date: date.clone() });
        }

        let finalized = self.habits.finalize_habits_at(now, tz).await;
        for finalization in &finalized {
            self.pay_finalization(finalization, now).await;
        }

        let stats = self.player.snapshot().await;
        let unlocked_gates = if self.player.is_initialized().await {
            self.unlock_gates(stats.level, stats.total_xp).await
        } else {
            Vec::new()
        };
        let achievements = self.check_achievements_at(now).await;

        TickReport {
            date,
            quests_reset,
            finalized_habits: finalized.into_iter().map(|item| item.habit.id).collect(),
            unlocked_gates: unlocked_gates.into_iter().map(|gate| gate.id).collect(),
            achievements: achievements
                .into_iter()
                .map(|achievement| achievement.id.to_string())
                .collect(),
        }
    }

    /// Runs the daily tick every `reset_poll_interval` until the handle is aborted.
    pub fn spawn_scheduler(&self) -> JoinHandle<()> {
        let hunter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(hunter.config.reset_poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                hunter.daily_tick_at(Utc::now()).await;
            }
        })
    }

    pub async fn redeem_code_at(&self, code: &str, now: DateTime<Utc>) -> Result<Redemption, RedemptionError> {
        redemption::redeem(self.remote.as_ref(), &self.player, code, now).await
    }

    /// Snapshot of every store, e.g. for export or a signed-out device.
    pub async fn export(&self) -> LocalSnapshot {
        LocalSnapshot {
            stats: Some(self.player.snapshot().await),
            profile: Some(self.profile.snapshot().await),
            quests: Some(self.quests.snapshot().await),
            habits: Some(self.habits.snapshot().await),
            gates: Some(self.gates.snapshot().await),
            streak: Some(self.streak.snapshot().await),
            challenges: Some(self.challenges.snapshot().await),
        }
    }
}
