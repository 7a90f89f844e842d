use crate::player::PlayerStore;
use crate::remote::{RemoteError, RemoteStore, Table, encode_columns};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

const MAX_CODE_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedemptionError {
    #[error("redemption code must be 1-32 characters of A-Z, 0-9 or '-'")]
    Malformed,
    #[error("this code is invalid or has already been used")]
    Invalid,
    #[error("this code has reached its maximum number of uses")]
    Exhausted,
    #[error("this code has expired")]
    Expired,
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupporterTier {
    ERank,
    DRank,
    CRank,
    BRank,
    ARank,
    SRank,
}

const TIER_FRAMES: [(SupporterTier, &str); 6] = [
    (SupporterTier::ERank, "supporter-e"),
    (SupporterTier::DRank, "supporter-d"),
    (SupporterTier::CRank, "supporter-c"),
    (SupporterTier::BRank, "supporter-b"),
    (SupporterTier::ARank, "supporter-a"),
    (SupporterTier::SRank, "supporter-s"),
];

/// A tier unlocks its own frame and every frame of the tiers below it.
pub fn frames_for_tier(tier: SupporterTier) -> Vec<String> {
    TIER_FRAMES
        .iter()
        .filter(|(frame_tier, _)| *frame_tier <= tier)
        .map(|(_, frame)| frame.to_string())
        .collect()
}

/// `redemption_codes` row, keyed by the normalized code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionCode {
    pub code: String,
    pub tier: SupporterTier,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default = "default_max_uses")]
    pub max_uses: u32,
    #[serde(default)]
    pub current_uses: u32,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unlocks_badge: bool,
    #[serde(default)]
    pub unlocks_frame: Option<String>,
    #[serde(default)]
    pub unlocks_title: Option<String>,
    #[serde(default)]
    pub supporter_name: Option<String>,
}

fn default_max_uses() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub tier: SupporterTier,
    pub badge: bool,
    pub title: Option<String>,
    pub hunter_name: Option<String>,
    pub unlocked_frames: Vec<String>,
    pub redeemed_at: DateTime<Utc>,
}

pub fn normalize_code(raw: &str) -> Result<String, RedemptionError> {
    let code = raw.trim().to_uppercase();
    let well_formed = !code.is_empty()
        && code.len() <= MAX_CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');
    if well_formed {
        Ok(code)
    } else {
        Err(RedemptionError::Malformed)
    }
}

impl RedemptionCode {
    fn check_usable(&self, now: DateTime<Utc>) -> Result<(), RedemptionError> {
        if !self.is_active {
            return Err(RedemptionError::Invalid);
        }
        if self.current_uses >= self.max_uses {
            return Err(RedemptionError::Exhausted);
        }
        if self.expires_at.is_some_and(|expires| expires < now) {
            return Err(RedemptionError::Expired);
        }
        Ok(())
    }
}

/// Redeems a supporter code: validates it, counts the use, then merges the tier's
/// frames into the player's unlocks.
pub async fn redeem<R: RemoteStore>(
    remote: &R,
    player: &PlayerStore<R>,
    raw_code: &str,
    now: DateTime<Utc>,
) -> Result<Redemption, RedemptionError> {
    let code = normalize_code(raw_code)?;
    let row = remote
        .select(Table::RedemptionCodes, &code)
        .await?
        .ok_or(RedemptionError::Invalid)?;
    let mut entry: RedemptionCode = row.decode().map_err(|err| {
        warn!(code = %code, "unreadable redemption code row: {err}");
        RedemptionError::Invalid
    })?;
    entry.check_usable(now)?;

    entry.current_uses += 1;
    remote
        .upsert(
            Table::RedemptionCodes,
            &code,
            encode_columns(Table::RedemptionCodes, &entry)?,
        )
        .await?;

    let mut frames = frames_for_tier(entry.tier);
    if let Some(frame) = &entry.unlocks_frame {
        if !frames.contains(frame) {
            frames.push(frame.clone());
        }
    }
    let added = player.unlock_card_frames(frames.clone()).await;
    info!(tier = ?entry.tier, new_frames = added.len(), "supporter code redeemed");

    Ok(Redemption {
        tier: entry.tier,
        badge: entry.unlocks_badge,
        title: entry.unlocks_title,
        hunter_name: entry.supporter_name,
        unlocked_frames: frames,
        redeemed_at: now,
    })
}
