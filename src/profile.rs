use crate::errors::{ValidationError, require_non_empty};
use crate::models::Profile;
use crate::remote::{RemoteStore, Table};
use crate::store::{Entity, EntityStore, SaveOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

pub type ProfileStore<R> = EntityStore<Profile, R>;

impl Entity for Profile {
    const TABLE: Table = Table::Profiles;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
    /// The profile could not be loaded or written.
    Skipped,
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub hunter_name: Option<String>,
    pub avatar: Option<String>,
    pub title: Option<String>,
}

impl<R: RemoteStore> EntityStore<Profile, R> {
    pub async fn set_public(&self, is_public: bool) -> bool {
        self.mutate(SaveOptions::default(), |profile| {
            if profile.is_public == is_public {
                return None;
            }
            profile.is_public = is_public;
            Some(())
        })
        .await
        .is_some()
    }

    pub async fn update_identity(&self, update: IdentityUpdate) -> Result<bool, ValidationError> {
        let hunter_name = update
            .hunter_name
            .as_deref()
            .map(|name| require_non_empty(name, "hunter_name"))
            .transpose()?;

        Ok(self
            .mutate(SaveOptions::default(), |profile| {
                let before = profile.clone();
                if let Some(name) = hunter_name {
                    profile.hunter_name = name;
                }
                if let Some(avatar) = update.avatar {
                    profile.avatar = Some(avatar);
                }
                if let Some(title) = update.title {
                    profile.title = Some(title);
                }
                (*profile != before).then_some(())
            })
            .await
            .is_some())
    }

    /// Stores the chat account id when the profile has none. Gives up quietly after
    /// `timeout` so sign-in never hangs on it.
    pub async fn link_discord_id(&self, discord_id: &str, timeout: Duration) -> LinkOutcome {
        let discord_id = discord_id.trim();
        if discord_id.is_empty() {
            return LinkOutcome::Skipped;
        }

        let attempt = async {
            if !self.is_initialized().await {
                self.fetch().await;
            }
            if !self.is_initialized().await {
                return LinkOutcome::Skipped;
            }
            let current = self.snapshot().await.discord_id;
            if current.as_deref().is_some_and(|id| !id.is_empty()) {
                debug!("chat account already linked");
                return LinkOutcome::AlreadyLinked;
            }
            let linked = self
                .mutate(SaveOptions::default(), |profile| {
                    profile.discord_id = Some(discord_id.to_string());
                    Some(())
                })
                .await;
            match linked {
                Some(()) if self.last_error().await.is_none() => LinkOutcome::Linked,
                _ => LinkOutcome::Skipped,
            }
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(outcome) => {
                if outcome == LinkOutcome::Linked {
                    info!("chat account linked to profile");
                }
                outcome
            }
            Err(_) => {
                warn!("chat account linking timed out, continuing");
                LinkOutcome::TimedOut
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::remote::{MemoryRemote, UserId};
    use std::sync::Arc;

    fn store(remote: MemoryRemote) -> ProfileStore<MemoryRemote> {
        EntityStore::new(
            Arc::new(remote),
            Some(UserId::new("hunter-1")),
            &SyncConfig::default(),
        )
    }

    #[tokio::test]
    async fn links_once() {
        let profile = store(MemoryRemote::new());
        let timeout = Duration::from_secs(5);

        assert_eq!(profile.link_discord_id("1234", timeout).await, LinkOutcome::Linked);
        assert_eq!(
            profile.link_discord_id("9999", timeout).await,
            LinkOutcome::AlreadyLinked
        );
        assert_eq!(profile.snapshot().await.discord_id.as_deref(), Some("1234"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out_without_error() {
        let profile = store(MemoryRemote::with_latency(Duration::from_secs(30)));
        assert_eq!(
            profile.link_discord_id("1234", Duration::from_secs(5)).await,
            LinkOutcome::TimedOut
        );
    }

    #[tokio::test]
    async fn identity_requires_a_name() {
        let profile = store(MemoryRemote::new());
        profile.fetch().await;

        let blank = IdentityUpdate {
            hunter_name: Some("   ".to_string()),
            ..IdentityUpdate::default()
        };
        assert!(profile.update_identity(blank).await.is_err());

        let rename = IdentityUpdate {
            hunter_name: Some("Sung".to_string()),
            title: Some("Shadow Monarch".to_string()),
            ..IdentityUpdate::default()
        };
        assert_eq!(profile.update_identity(rename.clone()).await, Ok(true));
        assert_eq!(profile.update_identity(rename).await, Ok(false));
        assert!(profile.set_public(true).await);
        assert!(!profile.set_public(true).await);
    }
}
