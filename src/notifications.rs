//! Read-only view over pending social requests addressed to the user. The rows belong
//! to collaborator tables keyed by the recipient; nothing here writes them.

use crate::events::{EventBus, HunterEvent};
use crate::models::Profile;
use crate::remote::{RemoteError, RemoteStore, Table, UserId};
use crate::store::Subscription;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error};

const PENDING: &str = "pending";
const SOMEONE: &str = "Someone";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInvite {
    pub id: String,
    pub guild_id: String,
    #[serde(default)]
    pub guild_name: Option<String>,
    pub inviter_id: String,
    pub status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub id: String,
    pub requester_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuelChallenge {
    pub id: String,
    pub challenger_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct GuildInviteRow {
    #[serde(default)]
    invites: Vec<GuildInvite>,
}

#[derive(Debug, Default, Deserialize)]
struct FriendshipRow {
    #[serde(default)]
    requests: Vec<FriendRequest>,
}

#[derive(Debug, Default, Deserialize)]
struct DuelRow {
    #[serde(default)]
    duels: Vec<DuelChallenge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    GuildInvite,
    FriendRequest,
    DuelChallenge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationCounts {
    pub guilds: usize,
    pub friends: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotificationFeed {
    pub notifications: Vec<Notification>,
    pub counts: NotificationCounts,
    /// Ids that appeared since the previous refresh. Empty on the first load.
    pub new_ids: Vec<String>,
}

impl NotificationCounts {
    fn tally(notifications: &[Notification]) -> Self {
        let guilds = notifications
            .iter()
            .filter(|notification| notification.kind == NotificationKind::GuildInvite)
            .count();
        Self {
            guilds,
            friends: notifications.len() - guilds,
            total: notifications.len(),
        }
    }
}

#[derive(Default)]
struct FeedState {
    loaded: bool,
    known: HashSet<String>,
    feed: NotificationFeed,
}

struct Inner<R> {
    remote: Arc<R>,
    user_id: Option<UserId>,
    events: EventBus,
    state: Mutex<FeedState>,
}

pub struct NotificationCenter<R> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for NotificationCenter<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: RemoteStore> NotificationCenter<R> {
    pub fn new(remote: Arc<R>, user_id: Option<UserId>, events: EventBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                remote,
                user_id,
                events,
                state: Mutex::new(FeedState::default()),
            }),
        }
    }

    pub async fn feed(&self) -> NotificationFeed {
        self.inner.state.lock().await.feed.clone()
    }

    pub async fn refresh(&self) -> NotificationFeed {
        self.refresh_at(Utc::now()).await
    }

    /// Rebuilds the feed. On remote failure the previous feed is kept.
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> NotificationFeed {
        let Some(user_id) = self.inner.user_id.clone() else {
            return NotificationFeed::default();
        };

        let mut notifications = match self.collect(&user_id, now).await {
            Ok(notifications) => notifications,
            Err(err) => {
                error!(user = %user_id, "failed to load notifications: {err}");
                return self.feed().await;
            }
        };
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut state = self.inner.state.lock().await;
        let new: Vec<Notification> = if state.loaded {
            notifications
                .iter()
                .filter(|notification| !state.known.contains(&notification.id))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        state.loaded = true;
        state.known = notifications
            .iter()
            .map(|notification| notification.id.clone())
            .collect();
        state.feed = NotificationFeed {
            counts: NotificationCounts::tally(&notifications),
            notifications,
            new_ids: new.iter().map(|notification| notification.id.clone()).collect(),
        };
        let feed = state.feed.clone();
        drop(state);

        for notification in new {
            self.inner.events.publish(HunterEvent::Notification {
                id: notification.id,
                title: notification.title,
                description: notification.description,
            });
        }
        feed
    }

    /// Refreshes whenever one of the collaborator rows changes.
    pub fn listen(&self) -> Vec<Subscription> {
        let Some(user_id) = self.inner.user_id.clone() else {
            return Vec::new();
        };
        [Table::GuildInvites, Table::Friendships, Table::StreakDuels]
            .into_iter()
            .map(|table| {
                let mut receiver = self.inner.remote.subscribe(table, user_id.as_str());
                let center = self.clone();
                let handle = tokio::spawn(async move {
                    // Lagged receivers just refresh; the feed is rebuilt from scratch anyway.
                    while let Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) =
                        receiver.recv().await
                    {
                        debug!(table = %table, "collaborator row changed");
                        center.refresh().await;
                    }
                });
                Subscription::new(table, handle)
            })
            .collect()
    }

    async fn collect(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, RemoteError> {
        let invites: GuildInviteRow = self.load(Table::GuildInvites, user_id.as_str()).await?;
        let requests: FriendshipRow = self.load(Table::Friendships, user_id.as_str()).await?;
        let duels: DuelRow = self.load(Table::StreakDuels, user_id.as_str()).await?;

        let mut notifications = Vec::new();
        for invite in invites
            .invites
            .into_iter()
            .filter(|invite| invite.status == PENDING && invite.expires_at > now)
        {
            let inviter = self.hunter_name(&invite.inviter_id).await?;
            let guild = invite.guild_name.as_deref().unwrap_or("a guild");
            notifications.push(Notification {
                id: format!("guild_invite_{}", invite.id),
                kind: NotificationKind::GuildInvite,
                title: "Guild Invite".to_string(),
                description: format!("{inviter} invited you to join {guild}"),
                created_at: invite.created_at,
            });
        }
        for request in requests
            .requests
            .into_iter()
            .filter(|request| request.status == PENDING)
        {
            let requester = self.hunter_name(&request.requester_id).await?;
            notifications.push(Notification {
                id: format!("friend_request_{}", request.id),
                kind: NotificationKind::FriendRequest,
                title: "Friend Request".to_string(),
                description: format!("{requester} wants to be your friend"),
                created_at: request.created_at,
            });
        }
        for duel in duels.duels.into_iter().filter(|duel| duel.status == PENDING) {
            let challenger = self.hunter_name(&duel.challenger_id).await?;
            notifications.push(Notification {
                id: format!("duel_challenge_{}", duel.id),
                kind: NotificationKind::DuelChallenge,
                title: "Duel Challenge".to_string(),
                description: format!("{challenger} challenged you to a streak duel"),
                created_at: duel.created_at,
            });
        }
        Ok(notifications)
    }

    async fn load<T: DeserializeOwned + Default>(&self, table: Table, key: &str) -> Result<T, RemoteError> {
        let Some(row) = self.inner.remote.select(table, key).await? else {
            return Ok(T::default());
        };
        match row.decode() {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(table = %table, "ignoring unreadable collaborator row: {err}");
                Ok(T::default())
            }
        }
    }

    async fn hunter_name(&self, user_id: &str) -> Result<String, RemoteError> {
        let name = self
            .inner
            .remote
            .select(Table::Profiles, user_id)
            .await?
            .and_then(|row| row.decode::<Profile>().ok())
            .map(|profile| profile.hunter_name);
        Ok(name.unwrap_or_else(|| SOMEONE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::{Map, Value, json};

    fn columns(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 1, hour, 0, 0).unwrap()
    }

    async fn seed(remote: &crate::remote::MemoryRemote) {
        remote
            .upsert(
                Table::Profiles,
                "friend-1",
                columns(json!({ "hunter_name": "Cha Hae-In" })),
            )
            .await
            .unwrap();
        remote
            .upsert(
                Table::GuildInvites,
                "hunter-1",
                columns(json!({ "invites": [
                    {
                        "id": "g1", "guild_id": "hunters", "guild_name": "Hunters Guild",
                        "inviter_id": "friend-1", "status": "pending",
                        "expires_at": at(20), "created_at": at(1)
                    },
                    {
                        "id": "g2", "guild_id": "old", "inviter_id": "friend-1",
                        "status": "pending", "expires_at": at(2), "created_at": at(0)
                    }
                ]})),
            )
            .await
            .unwrap();
        remote
            .upsert(
                Table::Friendships,
                "hunter-1",
                columns(json!({ "requests": [
                    { "id": "f1", "requester_id": "stranger", "status": "pending", "created_at": at(3) },
                    { "id": "f2", "requester_id": "friend-1", "status": "accepted", "created_at": at(4) }
                ]})),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn builds_sorted_feed_with_names_and_counts() {
        let remote = crate::remote::MemoryRemote::new();
        seed(&remote).await;
        let center = NotificationCenter::new(
            Arc::new(remote.clone()),
            Some(UserId::new("hunter-1")),
            EventBus::new(),
        );

        let feed = center.refresh_at(at(5)).await;
        let ids: Vec<_> = feed.notifications.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, ["friend_request_f1", "guild_invite_g1"]);
        assert_eq!(feed.notifications[0].description, "Someone wants to be your friend");
        assert_eq!(
            feed.notifications[1].description,
            "Cha Hae-In invited you to join Hunters Guild"
        );
        assert_eq!(
            feed.counts,
            NotificationCounts {
                guilds: 1,
                friends: 1,
                total: 2
            }
        );
        assert!(feed.new_ids.is_empty());
    }

    #[tokio::test]
    async fn new_entries_are_detected_after_first_load() {
        let remote = crate::remote::MemoryRemote::new();
        seed(&remote).await;
        let events = EventBus::new();
        let mut receiver = events.subscribe();
        let center = NotificationCenter::new(
            Arc::new(remote.clone()),
            Some(UserId::new("hunter-1")),
            events,
        );
        center.refresh_at(at(5)).await;

        remote
            .upsert(
                Table::StreakDuels,
                "hunter-1",
                columns(json!({ "duels": [
                    { "id": "d1", "challenger_id": "friend-1", "status": "pending",
                      "created_at": at(5) + Duration::minutes(1) }
                ]})),
            )
            .await
            .unwrap();

        let feed = center.refresh_at(at(6)).await;
        assert_eq!(feed.new_ids, ["duel_challenge_d1"]);
        assert_eq!(feed.counts.friends, 2);
        assert!(matches!(
            receiver.recv().await.unwrap(),
            HunterEvent::Notification { id, .. } if id == "duel_challenge_d1"
        ));
    }

    #[tokio::test]
    async fn remote_failure_keeps_previous_feed() {
        let remote = crate::remote::MemoryRemote::new();
        seed(&remote).await;
        let center = NotificationCenter::new(
            Arc::new(remote.clone()),
            Some(UserId::new("hunter-1")),
            EventBus::new(),
        );
        let first = center.refresh_at(at(5)).await;

        remote.fail_next_selects(1);
        assert_eq!(center.refresh_at(at(5)).await, first);
    }
}
