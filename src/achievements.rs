use crate::leveling::Rank;
use crate::models::{
    ChallengeData, GateBook, GateStatus, HabitBook, HabitStatus, PlayerStats, StreakData, XpSource,
};
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const NECROMANCER_CLASS: &str = "necromancer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Requirement {
    Streak(u32),
    PowerLevel(u32),
    Level(u32),
    TotalXp(u64),
    QuestCount(usize),
    GateClear(usize),
    GateRank(Rank),
    HabitCount(usize),
    HabitWin(usize),
    ClassUnlock(&'static str),
    /// Granted by hand, never by evaluation.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Achievement {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub points: u32,
    pub requirement: Requirement,
}

const fn achievement(
    id: &'static str,
    name: &'static str,
    description: &'static str,
    category: &'static str,
    points: u32,
    requirement: Requirement,
) -> Achievement {
    Achievement {
        id,
        name,
        description,
        category,
        points,
        requirement,
    }
}

pub static ACHIEVEMENTS: [Achievement; 18] = [
    achievement("streak_3", "Getting Started", "Reach a 3 day streak", "streak", 10, Requirement::Streak(3)),
    achievement("streak_7", "Week Warrior", "Reach a 7 day streak", "streak", 25, Requirement::Streak(7)),
    achievement("streak_30", "Unbroken", "Reach a 30 day streak", "streak", 100, Requirement::Streak(30)),
    achievement("power_75", "Growing Stronger", "Reach 75 power level", "power", 20, Requirement::PowerLevel(75)),
    achievement("power_150", "Powerhouse", "Reach 150 power level", "power", 50, Requirement::PowerLevel(150)),
    achievement("level_10", "Rising Hunter", "Reach level 10", "level", 20, Requirement::Level(10)),
    achievement("level_25", "C-Rank Hunter", "Reach level 25", "level", 50, Requirement::Level(25)),
    achievement("level_50", "Elite Hunter", "Reach level 50", "level", 100, Requirement::Level(50)),
    achievement("xp_10000", "Experienced", "Earn 10,000 total XP", "level", 30, Requirement::TotalXp(10_000)),
    achievement("xp_100000", "Veteran", "Earn 100,000 total XP", "level", 100, Requirement::TotalXp(100_000)),
    achievement("quests_10", "Quest Beginner", "Complete 10 quests", "quests", 10, Requirement::QuestCount(10)),
    achievement("quests_50", "Quest Master", "Complete 50 quests", "quests", 50, Requirement::QuestCount(50)),
    achievement("first_gate", "Gate Breaker", "Clear your first gate", "gates", 25, Requirement::GateClear(1)),
    achievement("monarch_slayer", "Monarch Slayer", "Clear an S-Rank gate", "gates", 200, Requirement::GateRank(Rank::S)),
    achievement("habits_3", "Habit Builder", "Track 3 active habits", "habits", 15, Requirement::HabitCount(3)),
    achievement("habit_win", "Discipline", "Win a habit challenge", "habits", 25, Requirement::HabitWin(1)),
    achievement("necromancer", "Shadow Army", "Unlock the Necromancer class", "special", 100, Requirement::ClassUnlock(NECROMANCER_CLASS)),
    achievement("early_adopter", "Early Adopter", "Joined during the first season", "special", 50, Requirement::Manual),
];

pub fn find(id: &str) -> Option<&'static Achievement> {
    ACHIEVEMENTS.iter().find(|achievement| achievement.id == id)
}

/// Facts the catalog is evaluated against, gathered from the entity stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AchievementCheck {
    pub streak: u32,
    pub longest_streak: u32,
    pub power_level: u32,
    pub level: u32,
    pub total_xp: u64,
    pub quests_completed: usize,
    pub gates_cleared: usize,
    pub cleared_gate_ranks: Vec<Rank>,
    pub active_habits: usize,
    pub habits_won: usize,
    pub classes: Vec<String>,
}

impl AchievementCheck {
    pub fn gather(
        stats: &PlayerStats,
        streak: &StreakData,
        habits: &HabitBook,
        gates: &GateBook,
        challenges: &ChallengeData,
    ) -> Self {
        let cleared: Vec<Rank> = gates
            .gates
            .iter()
            .filter(|gate| gate.status == GateStatus::Completed)
            .map(|gate| gate.rank)
            .collect();
        let habits_with = |status: HabitStatus| habits.habits.iter().filter(|habit| habit.status == status).count();

        Self {
            streak: streak.current_streak,
            longest_streak: streak.longest_streak,
            power_level: stats.power_level(),
            level: stats.level,
            total_xp: stats.total_xp,
            quests_completed: challenges
                .xp_history
                .iter()
                .filter(|entry| entry.source == XpSource::Quest)
                .count(),
            gates_cleared: cleared.len(),
            cleared_gate_ranks: cleared,
            active_habits: habits_with(HabitStatus::Active),
            habits_won: habits_with(HabitStatus::Won),
            classes: stats.unlocked_classes.iter().cloned().collect(),
        }
    }

    pub fn satisfies(&self, requirement: Requirement) -> bool {
        match requirement {
            Requirement::Streak(days) => self.streak.max(self.longest_streak) >= days,
            Requirement::PowerLevel(power) => self.power_level >= power,
            Requirement::Level(level) => self.level >= level,
            Requirement::TotalXp(xp) => self.total_xp >= xp,
            Requirement::QuestCount(count) => self.quests_completed >= count,
            Requirement::GateClear(count) => self.gates_cleared >= count,
            Requirement::GateRank(rank) => self.cleared_gate_ranks.contains(&rank),
            Requirement::HabitCount(count) => self.active_habits >= count,
            Requirement::HabitWin(count) => self.habits_won >= count,
            Requirement::ClassUnlock(class) => self.classes.iter().any(|owned| owned == class),
            Requirement::Manual => false,
        }
    }
}

/// `user_achievements` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementLedger {
    #[serde(default)]
    pub unlocked_achievements: Vec<String>,
    #[serde(default)]
    pub total_points: u32,
    #[serde(default)]
    pub last_checked: Option<DateTime<Utc>>,
}

impl Entity for AchievementLedger {
    const TABLE: Table = Table::Achievements;
}

impl AchievementLedger {
    pub fn is_unlocked(&self, id: &str) -> bool {
        self.unlocked_achievements.iter().any(|unlocked| unlocked == id)
    }

    fn record(&mut self, achievement: &Achievement, now: DateTime<Utc>) {
        self.unlocked_achievements.push(achievement.id.to_string());
        self.total_points = self.total_points.saturating_add(achievement.points);
        self.last_checked = Some(now);
    }

    /// Records every catalog entry `check` satisfies that is not yet in the ledger.
    pub fn unlock_satisfied(
        &mut self,
        check: &AchievementCheck,
        now: DateTime<Utc>,
    ) -> Vec<&'static Achievement> {
        let mut unlocked = Vec::new();
        for achievement in &ACHIEVEMENTS {
            if self.is_unlocked(achievement.id) || !check.satisfies(achievement.requirement) {
                continue;
            }
            self.record(achievement, now);
            unlocked.push(achievement);
        }
        unlocked
    }

    pub fn unlocked(&self) -> Vec<&'static Achievement> {
        ACHIEVEMENTS
            .iter()
            .filter(|achievement| self.is_unlocked(achievement.id))
            .collect()
    }
}

pub type AchievementStore<R> = EntityStore<AchievementLedger, R>;

impl<R: RemoteStore> EntityStore<AchievementLedger, R> {
    pub async fn check_all(
        &self,
        check: &AchievementCheck,
        now: DateTime<Utc>,
    ) -> Vec<&'static Achievement> {
        let unlocked = self
            .mutate(SaveOptions::default(), |ledger| {
                let unlocked = ledger.unlock_satisfied(check, now);
                (!unlocked.is_empty()).then_some(unlocked)
            })
            .await
            .unwrap_or_default();
        for achievement in &unlocked {
            info!(achievement = achievement.id, "achievement unlocked");
        }
        unlocked
    }

    /// Grants an achievement by id regardless of its requirement.
    pub async fn grant(&self, id: &str, now: DateTime<Utc>) -> Option<&'static Achievement> {
        let achievement = find(id)?;
        self.mutate(SaveOptions::default(), |ledger| {
            if ledger.is_unlocked(id) {
                return None;
            }
            ledger.record(achievement, now);
            Some(achievement)
        })
        .await
    }
}
