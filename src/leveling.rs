//! Experience, level and rank arithmetic.
//!
//! Total XP needed to stand at level `L` is the triangular series
//! `100 * L * (L - 1) / 2`; reaching the next level from `L` costs `L * 100`.
//! The chat-bot collaborator writes the same rows, so these formulas must not drift.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const XP_STEP: u64 = 100;
pub const POINTS_PER_LEVEL: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    #[default]
    #[serde(rename = "E-Rank")]
    E,
    #[serde(rename = "D-Rank")]
    D,
    #[serde(rename = "C-Rank")]
    C,
    #[serde(rename = "B-Rank")]
    B,
    #[serde(rename = "A-Rank")]
    A,
    #[serde(rename = "S-Rank")]
    S,
}

const RANK_THRESHOLDS: [(u32, Rank); 5] = [
    (100, Rank::S),
    (75, Rank::A),
    (50, Rank::B),
    (25, Rank::C),
    (6, Rank::D),
];

impl Rank {
    pub fn for_level(level: u32) -> Self {
        RANK_THRESHOLDS
            .iter()
            .find(|(min, _)| level >= *min)
            .map(|(_, rank)| *rank)
            .unwrap_or(Rank::E)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::E => "E-Rank",
            Rank::D => "D-Rank",
            Rank::C => "C-Rank",
            Rank::B => "B-Rank",
            Rank::A => "A-Rank",
            Rank::S => "S-Rank",
        }
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn total_xp_for_level(level: u32) -> u64 {
    if level <= 1 {
        return 0;
    }
    let level = u128::from(level);
    let total = u128::from(XP_STEP) * level * (level - 1) / 2;
    u64::try_from(total).unwrap_or(u64::MAX)
}

/// Largest level whose cumulative requirement does not exceed `xp`.
pub fn level_for_total_xp(xp: u64) -> u32 {
    // Closed-form inverse of 50 * L * (L - 1) <= xp, then nudged onto the exact boundary.
    let discriminant = 2_500u128 + 200u128 * u128::from(xp);
    let estimate = (50 + discriminant.isqrt()) / 100;
    let mut level = u32::try_from(estimate).unwrap_or(u32::MAX).max(1);
    while level < u32::MAX && total_xp_for_level(level + 1) <= xp {
        level += 1;
    }
    while level > 1 && total_xp_for_level(level) > xp {
        level -= 1;
    }
    level
}

pub fn xp_into_current_level(xp: u64) -> u64 {
    xp - total_xp_for_level(level_for_total_xp(xp))
}

pub fn xp_for_next_level(level: u32) -> u64 {
    u64::from(level) * XP_STEP
}

/// Attribute points granted for moving from `old_level` to `new_level`.
pub fn points_for_levels(old_level: u32, new_level: u32) -> u32 {
    new_level.saturating_sub(old_level) * POINTS_PER_LEVEL
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgress {
    pub level: u32,
    pub rank: Rank,
    pub total_xp: u64,
    pub xp_into_level: u64,
    pub xp_for_next_level: u64,
}

impl LevelProgress {
    pub fn from_total_xp(total_xp: u64) -> Self {
        let level = level_for_total_xp(total_xp);
        Self {
            level,
            rank: Rank::for_level(level),
            total_xp,
            xp_into_level: total_xp - total_xp_for_level(level),
            xp_for_next_level: xp_for_next_level(level),
        }
    }
}
