use crate::leveling::Rank;
use crate::models::{Gate, GateBook, GateRewards, GateStatus, UnlockRequirement};
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

pub type GateStore<R> = EntityStore<GateBook, R>;

impl Entity for GateBook {
    const TABLE: Table = Table::Gates;

    fn seed() -> Self {
        GateBook {
            gates: default_gates(),
        }
    }

    fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}

struct GateSeed {
    name: &'static str,
    rank: Rank,
    description: &'static str,
    lore_text: &'static str,
    daily_challenge: &'static str,
    required_days: u32,
    required_habits: u32,
    xp: u64,
    gold: u64,
    title: &'static str,
    level: u32,
}

const GATE_SEEDS: [GateSeed; 6] = [
    GateSeed {
        name: "Goblin Cave",
        rank: Rank::E,
        description: "A beginner's trial. Face the Goblin Chieftain.",
        lore_text: "Even E-Rank gates can be deadly for the unprepared.",
        daily_challenge: "Complete all daily quests",
        required_days: 7,
        required_habits: 0,
        xp: 500,
        gold: 100,
        title: "Goblin Slayer",
        level: 1,
    },
    GateSeed {
        name: "Shadow Dungeon",
        rank: Rank::D,
        description: "Darkness awaits. Defeat the Shadow Beast.",
        lore_text: "The System has detected a D-Rank gate.",
        daily_challenge: "Complete all quests + 1 habit daily",
        required_days: 7,
        required_habits: 1,
        xp: 800,
        gold: 200,
        title: "Shadow Walker",
        level: 6,
    },
    GateSeed {
        name: "Temple of Chaos",
        rank: Rank::C,
        description: "Ancient evil stirs. Challenge the Chaos Knight.",
        lore_text: "WARNING: C-Rank threat detected.",
        daily_challenge: "Complete all quests + 2 habits daily for 10 days",
        required_days: 10,
        required_habits: 2,
        xp: 1500,
        gold: 400,
        title: "Chaos Breaker",
        level: 10,
    },
    GateSeed {
        name: "Frozen Citadel",
        rank: Rank::B,
        description: "Eternal winter reigns. Face the Ice Monarch.",
        lore_text: "SYSTEM ALERT: B-Rank gate emergence.",
        daily_challenge: "Complete all quests + 3 habits daily for 10 days",
        required_days: 10,
        required_habits: 3,
        xp: 3000,
        gold: 800,
        title: "Frostborn",
        level: 25,
    },
    GateSeed {
        name: "Dragon's Lair",
        rank: Rank::A,
        description: "The apex predator awakens. Challenge the Red Dragon.",
        lore_text: "EMERGENCY ALERT: A-Rank Dragon Gate.",
        daily_challenge: "Complete all quests + 4 habits daily for 12 days",
        required_days: 12,
        required_habits: 4,
        xp: 5000,
        gold: 1500,
        title: "Dragonslayer",
        level: 50,
    },
    GateSeed {
        name: "Monarch's Domain",
        rank: Rank::S,
        description: "The final trial. Confront the Shadow Monarch.",
        lore_text: "NATIONAL EMERGENCY: S-Rank Gate.",
        daily_challenge: "Complete all quests + 5 habits daily for 14 days",
        required_days: 14,
        required_habits: 5,
        xp: 10000,
        gold: 5000,
        title: "Shadow Monarch",
        level: 100,
    },
];

/// The six seeded gates. Only the first starts open.
pub fn default_gates() -> Vec<Gate> {
    GATE_SEEDS
        .iter()
        .enumerate()
        .map(|(index, seed)| Gate {
            id: (index + 1).to_string(),
            name: seed.name.to_string(),
            rank: seed.rank,
            description: seed.description.to_string(),
            lore_text: seed.lore_text.to_string(),
            daily_challenge: seed.daily_challenge.to_string(),
            required_days: seed.required_days,
            required_habits: seed.required_habits,
            progress: BTreeMap::new(),
            losses: 0,
            start_date: None,
            end_date: None,
            status: if index == 0 {
                GateStatus::Active
            } else {
                GateStatus::Locked
            },
            rewards: GateRewards {
                xp: seed.xp,
                gold: seed.gold,
                title: Some(seed.title.to_string()),
            },
            unlock_requirement: UnlockRequirement {
                level: Some(seed.level),
                total_xp: None,
            },
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DayProgress {
    pub completed_days: u32,
    pub required_days: u32,
}

impl DayProgress {
    pub fn is_cleared(&self) -> bool {
        self.completed_days >= self.required_days
    }
}

impl UnlockRequirement {
    /// Met when any stated threshold is reached. A requirement with no threshold never is.
    pub fn is_met(&self, level: u32, total_xp: u64) -> bool {
        self.level.is_some_and(|required| level >= required)
            || self.total_xp.is_some_and(|required| total_xp >= required)
    }
}

impl GateBook {
    fn gate_mut(&mut self, id: &str) -> Option<&mut Gate> {
        self.gates.iter_mut().find(|gate| gate.id == id)
    }

    /// Opens every locked gate whose requirement is met. Returns the opened gates.
    pub fn unlock_for(&mut self, level: u32, total_xp: u64) -> Vec<Gate> {
        let mut unlocked = Vec::new();
        for gate in &mut self.gates {
            if gate.status == GateStatus::Locked && gate.unlock_requirement.is_met(level, total_xp) {
                gate.status = GateStatus::Active;
                unlocked.push(gate.clone());
            }
        }
        unlocked
    }

    pub fn enter(&mut self, id: &str, today: &str) -> Option<()> {
        let gate = self.gate_mut(id)?;
        if gate.status != GateStatus::Active || gate.start_date.is_some() {
            return None;
        }
        gate.start_date = Some(today.to_string());
        gate.end_date = None;
        gate.progress = BTreeMap::from([(today.to_string(), false)]);
        Some(())
    }

    pub fn mark_day(&mut self, id: &str, today: &str) -> Option<DayProgress> {
        let gate = self.gate_mut(id)?;
        if gate.status != GateStatus::Active || gate.progress.get(today) == Some(&true) {
            return None;
        }
        gate.progress.insert(today.to_string(), true);
        Some(DayProgress {
            completed_days: gate.completed_days(),
            required_days: gate.required_days,
        })
    }

    pub fn complete(&mut self, id: &str, today: &str) -> Option<Gate> {
        let gate = self.gate_mut(id)?;
        if gate.status != GateStatus::Active {
            return None;
        }
        gate.status = GateStatus::Completed;
        gate.end_date = Some(today.to_string());
        Some(gate.clone())
    }

    pub fn fail(&mut self, id: &str, today: &str) -> Option<u32> {
        let gate = self.gate_mut(id)?;
        if gate.status != GateStatus::Active {
            return None;
        }
        gate.losses = gate.losses.saturating_add(1);
        gate.status = GateStatus::Failed;
        gate.progress.clear();
        gate.end_date = Some(today.to_string());
        Some(gate.losses)
    }

    /// Reopens a gate for a fresh attempt. Losses carry over.
    pub fn rechallenge(&mut self, id: &str) -> Option<()> {
        let gate = self.gate_mut(id)?;
        if gate.status == GateStatus::Locked {
            return None;
        }
        gate.status = GateStatus::Active;
        gate.start_date = None;
        gate.end_date = None;
        gate.progress.clear();
        Some(())
    }
}

impl<R: RemoteStore> EntityStore<GateBook, R> {
    /// Batch unlock after any level or XP change. Re-checking opened gates is a no-op.
    pub async fn check_unlocks(&self, level: u32, total_xp: u64) -> Vec<Gate> {
        let unlocked = self
            .mutate(SaveOptions::default(), |book| {
                let unlocked = book.unlock_for(level, total_xp);
                (!unlocked.is_empty()).then_some(unlocked)
            })
            .await
            .unwrap_or_default();
        for gate in &unlocked {
            info!(gate = %gate.id, rank = %gate.rank, "gate unlocked");
        }
        unlocked
    }

    pub async fn enter_gate(&self, id: &str, today: &str) -> bool {
        self.mutate(SaveOptions::default(), |book| book.enter(id, today))
            .await
            .is_some()
    }

    /// Marks today once. The caller decides whether the returned progress clears the gate.
    pub async fn mark_day_complete(&self, id: &str, today: &str) -> Option<DayProgress> {
        self.mutate(SaveOptions::default(), |book| book.mark_day(id, today))
            .await
    }

    pub async fn complete_gate(&self, id: &str, today: &str) -> Option<Gate> {
        self.mutate(SaveOptions::default(), |book| book.complete(id, today))
            .await
    }

    /// Records a failure decided by the caller and returns the cumulative loss count.
    pub async fn fail_gate(&self, id: &str, today: &str) -> Option<u32> {
        self.mutate(SaveOptions::default(), |book| book.fail(id, today))
            .await
    }

    pub async fn rechallenge_gate(&self, id: &str) -> bool {
        self.mutate(SaveOptions::default(), |book| book.rechallenge(id))
            .await
            .is_some()
    }
}
