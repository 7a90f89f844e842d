use crate::dates;
use crate::leveling::{LevelProgress, Rank};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub const BASE_ATTRIBUTE: u32 = 10;
pub const DEFAULT_CARD_FRAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Strength,
    Agility,
    Intelligence,
    Vitality,
    Sense,
}

impl Attribute {
    pub const ALL: [Attribute; 5] = [
        Attribute::Strength,
        Attribute::Agility,
        Attribute::Intelligence,
        Attribute::Vitality,
        Attribute::Sense,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Attribute::Strength => "strength",
            Attribute::Agility => "agility",
            Attribute::Intelligence => "intelligence",
            Attribute::Vitality => "vitality",
            Attribute::Sense => "sense",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `player_stats` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub level: u32,
    pub total_xp: u64,
    #[serde(default)]
    pub weekly_xp: u64,
    pub rank: Rank,
    pub strength: u32,
    pub agility: u32,
    pub intelligence: u32,
    pub vitality: u32,
    pub sense: u32,
    pub available_points: u32,
    pub gold: u64,
    pub gems: u64,
    pub credits: u64,
    #[serde(default)]
    pub selected_card_frame: Option<String>,
    #[serde(default)]
    pub unlocked_card_frames: BTreeSet<String>,
    #[serde(default)]
    pub unlocked_classes: BTreeSet<String>,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            level: 1,
            total_xp: 0,
            weekly_xp: 0,
            rank: Rank::E,
            strength: BASE_ATTRIBUTE,
            agility: BASE_ATTRIBUTE,
            intelligence: BASE_ATTRIBUTE,
            vitality: BASE_ATTRIBUTE,
            sense: BASE_ATTRIBUTE,
            available_points: 0,
            gold: 0,
            gems: 0,
            credits: 0,
            selected_card_frame: Some(DEFAULT_CARD_FRAME.to_string()),
            unlocked_card_frames: BTreeSet::from([DEFAULT_CARD_FRAME.to_string()]),
            unlocked_classes: BTreeSet::new(),
        }
    }
}

impl PlayerStats {
    pub fn attribute(&self, attribute: Attribute) -> u32 {
        match attribute {
            Attribute::Strength => self.strength,
            Attribute::Agility => self.agility,
            Attribute::Intelligence => self.intelligence,
            Attribute::Vitality => self.vitality,
            Attribute::Sense => self.sense,
        }
    }

    pub fn attribute_mut(&mut self, attribute: Attribute) -> &mut u32 {
        match attribute {
            Attribute::Strength => &mut self.strength,
            Attribute::Agility => &mut self.agility,
            Attribute::Intelligence => &mut self.intelligence,
            Attribute::Vitality => &mut self.vitality,
            Attribute::Sense => &mut self.sense,
        }
    }

    pub fn power_level(&self) -> u32 {
        Attribute::ALL
            .iter()
            .map(|attribute| self.attribute(*attribute))
            .sum()
    }

    pub fn progress(&self) -> LevelProgress {
        LevelProgress::from_total_xp(self.total_xp)
    }
}

/// `profiles` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub hunter_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub discord_id: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            hunter_name: "Hunter".to_string(),
            avatar: Some("default".to_string()),
            title: Some("Awakened Hunter".to_string()),
            discord_id: None,
            is_public: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBoost {
    pub stat: Attribute,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyQuest {
    pub id: String,
    pub name: String,
    pub xp_reward: u32,
    pub stat_boost: StatBoost,
    #[serde(default)]
    pub completed: bool,
}

/// `user_quests` row: the whole quest list plus the last local-midnight reset it saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestBook {
    #[serde(default)]
    pub quests: Vec<DailyQuest>,
    #[serde(default)]
    pub last_reset_date: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HabitStatus {
    Active,
    Won,
    Lost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub completion_grid: BTreeMap<String, bool>,
    pub goal_days: u32,
    #[serde(rename = "winXP")]
    pub win_xp: u32,
    #[serde(rename = "loseXP")]
    pub lose_xp: u32,
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    pub status: HabitStatus,
}

impl Habit {
    pub fn completed_days(&self) -> u32 {
        let count = self.completion_grid.values().filter(|done| **done).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// `user_habits` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitBook {
    #[serde(default)]
    pub habits: Vec<Habit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Locked,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateRewards {
    pub xp: u64,
    pub gold: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    #[serde(default, rename = "totalXP", skip_serializing_if = "Option::is_none")]
    pub total_xp: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub id: String,
    pub name: String,
    pub rank: Rank,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lore_text: String,
    #[serde(default)]
    pub daily_challenge: String,
    pub required_days: u32,
    pub required_habits: u32,
    #[serde(default)]
    pub progress: BTreeMap<String, bool>,
    #[serde(default)]
    pub losses: u32,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    pub status: GateStatus,
    pub rewards: GateRewards,
    #[serde(default)]
    pub unlock_requirement: UnlockRequirement,
}

impl Gate {
    pub fn completed_days(&self) -> u32 {
        let count = self.progress.values().filter(|done| **done).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }
}

/// `user_gates` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateBook {
    #[serde(default)]
    pub gates: Vec<Gate>,
}

/// `user_streaks` row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakData {
    pub current_streak: u32,
    pub longest_streak: u32,
    #[serde(default)]
    pub last_completion_date: Option<String>,
    pub total_rewards: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XpSource {
    Quest,
    Habit,
    Gate,
    Streak,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpHistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: XpSource,
    pub amount: u64,
    pub description: String,
    pub levels_gained: u32,
    pub old_level: u32,
    pub new_level: u32,
    #[serde(rename = "oldTotalXP")]
    pub old_total_xp: u64,
    #[serde(rename = "newTotalXP")]
    pub new_total_xp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSettings {
    pub timezone: String,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            timezone: dates::host_timezone().name().to_string(),
        }
    }
}

/// `user_challenges` row. Challenge payloads belong to pages outside this crate and are
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChallengeData {
    #[serde(default)]
    pub challenges: Vec<Value>,
    #[serde(default)]
    pub necro_challenge: Option<Value>,
    #[serde(default)]
    pub claimed_challenges: BTreeMap<String, bool>,
    #[serde(default)]
    pub xp_history: Vec<XpHistoryEntry>,
    #[serde(default)]
    pub user_settings: UserSettings,
    #[serde(default)]
    pub active_boost: Option<Value>,
}

// HTTP payloads of the daemon.

#[derive(Debug, Serialize, Deserialize)]
pub struct TodayResponse {
    pub date: String,
    pub timezone: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub stats: PlayerStats,
    pub progress: LevelProgress,
}

#[derive(Debug, Deserialize)]
pub struct AwardXpRequest {
    pub amount: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AllocateRequest {
    pub stat: Attribute,
}

#[derive(Debug, Deserialize)]
pub struct NewQuestRequest {
    pub name: String,
    pub xp_reward: u32,
    pub stat: Attribute,
    #[serde(default = "default_boost")]
    pub amount: u32,
}

fn default_boost() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct NewHabitRequest {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    pub goal_days: u32,
    pub win_xp: u32,
    #[serde(default)]
    pub lose_xp: u32,
}

#[derive(Debug, Deserialize)]
pub struct ToggleDayRequest {
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TimezoneRequest {
    pub timezone: String,
}

#[derive(Debug, Deserialize)]
pub struct RedeemRequest {
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn quest_uses_camel_case_inside_the_json_column() {
        let quest: DailyQuest = serde_json::from_value(json!({
            "id": "1",
            "name": "Workout",
            "xpReward": 50,
            "statBoost": { "stat": "strength", "amount": 1 },
            "completed": false,
            "source": "discord"
        }))
        .unwrap();
        assert_eq!(quest.xp_reward, 50);
        assert_eq!(quest.stat_boost.stat, Attribute::Strength);
    }

    #[test]
    fn history_entry_keeps_upper_case_xp_keys() {
        let entry = XpHistoryEntry {
            id: "a".to_string(),
            timestamp: Utc::now(),
            source: XpSource::Quest,
            amount: 10,
            description: "Read".to_string(),
            levels_gained: 0,
            old_level: 1,
            new_level: 1,
            old_total_xp: 0,
            new_total_xp: 10,
        };
        let value = serde_json::to_value(entry).unwrap();
        assert_eq!(value["oldTotalXP"], json!(0));
        assert_eq!(value["newTotalXP"], json!(10));
        assert_eq!(value["levelsGained"], json!(0));
    }

    #[test]
    fn new_player_starts_at_level_one_with_base_attributes() {
        let stats = PlayerStats::default();
        assert_eq!(stats.level, 1);
        assert_eq!(stats.power_level(), 5 * BASE_ATTRIBUTE);
        assert!(stats.unlocked_card_frames.contains(DEFAULT_CARD_FRAME));
    }

    #[test]
    fn habit_counts_only_true_cells() {
        let habit = Habit {
            id: "h".to_string(),
            name: "Run".to_string(),
            icon: String::new(),
            color: String::new(),
            completion_grid: BTreeMap::from([
                ("2026-01-01".to_string(), true),
                ("2026-01-02".to_string(), false),
                ("2026-01-03".to_string(), true),
            ]),
            goal_days: 10,
            win_xp: 100,
            lose_xp: 0,
            start_date: "2026-01-01".to_string(),
            end_date: None,
            status: HabitStatus::Active,
        };
        assert_eq!(habit.completed_days(), 2);
    }
}
