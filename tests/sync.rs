use hunter_sync::models::{PlayerStats, QuestBook, StreakData, XpSource};
use hunter_sync::quests::QuestStore;
use hunter_sync::remote::encode_columns;
use hunter_sync::sync::{LocalSnapshot, MigrationAction};
use hunter_sync::{EntityStore, EventBus, FetchOutcome, Hunter, MemoryRemote, RemoteStore, SyncConfig, Table, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const USER: &str = "hunter-sync";

fn device(remote: &MemoryRemote) -> QuestStore<MemoryRemote> {
    EntityStore::new(
        Arc::new(remote.clone()),
        Some(UserId::new(USER)),
        &SyncConfig::default(),
    )
}

fn hunter(remote: &MemoryRemote) -> Hunter<MemoryRemote> {
    Hunter::new(
        Arc::new(remote.clone()),
        Some(UserId::new(USER)),
        SyncConfig::default(),
        EventBus::new(),
    )
}

async fn completed(store: &QuestStore<MemoryRemote>) -> Vec<String> {
    store
        .snapshot()
        .await
        .quests
        .into_iter()
        .filter(|quest| quest.completed)
        .map(|quest| quest.id)
        .collect()
}

async fn wait_for_completed(store: &QuestStore<MemoryRemote>, expected: &[&str]) {
    for _ in 0..100 {
        if completed(store).await == expected {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(completed(store).await, expected);
}

#[tokio::test(start_paused = true)]
async fn concurrent_hydration_seeds_each_row_once() {
    let remote = MemoryRemote::with_latency(Duration::from_millis(50));
    let hunter = hunter(&remote);

    let (first, second) = tokio::join!(hunter.hydrate(), hunter.hydrate());

    assert_eq!(first.quests, FetchOutcome::Seeded);
    assert_eq!(second.quests, FetchOutcome::InFlight);
    for table in [
        Table::PlayerStats,
        Table::Profiles,
        Table::Quests,
        Table::Habits,
        Table::Gates,
        Table::Streaks,
        Table::Challenges,
        Table::Achievements,
    ] {
        assert_eq!(remote.write_count(table), 1, "{table} seeded more than once");
    }

    let again = hunter.hydrate().await;
    assert_eq!(again.quests, FetchOutcome::Loaded);
    assert_eq!(remote.write_count(Table::Quests), 1);
}

#[tokio::test(start_paused = true)]
async fn second_device_follows_pushes_outside_the_echo_window() {
    let remote = MemoryRemote::new();
    let phone = device(&remote);
    let laptop = device(&remote);
    phone.fetch().await;
    laptop.fetch().await;
    let _phone_push = phone.listen();
    let _laptop_push = laptop.listen();

    assert!(phone.complete_quest("1").await.is_some());
    wait_for_completed(&laptop, &["1"]).await;

    // The phone just wrote, so the laptop's follow-up lands inside its echo window.
    assert!(laptop.complete_quest("2").await.is_some());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(completed(&phone).await, ["1"]);

    sleep(Duration::from_millis(1001)).await;
    assert!(laptop.complete_quest("3").await.is_some());
    wait_for_completed(&phone, &["1", "2", "3"]).await;

    let row = remote.select(Table::Quests, USER).await.unwrap().unwrap();
    let stored: QuestBook = row.decode().unwrap();
    assert_eq!(stored, laptop.snapshot().await);
}

#[tokio::test]
async fn sign_in_migrates_only_stronger_local_progress() {
    let remote = MemoryRemote::new();
    let weaker_remote = PlayerStats {
        total_xp: 100,
        ..PlayerStats::default()
    };
    let stronger_remote = StreakData {
        current_streak: 4,
        longest_streak: 9,
        ..StreakData::default()
    };
    remote
        .upsert(
            Table::PlayerStats,
            USER,
            encode_columns(Table::PlayerStats, &weaker_remote).unwrap(),
        )
        .await
        .unwrap();
    remote
        .upsert(
            Table::Streaks,
            USER,
            encode_columns(Table::Streaks, &stronger_remote).unwrap(),
        )
        .await
        .unwrap();

    let local = LocalSnapshot {
        stats: Some(PlayerStats {
            total_xp: 500,
            ..PlayerStats::default()
        }),
        streak: Some(StreakData {
            current_streak: 2,
            longest_streak: 3,
            ..StreakData::default()
        }),
        quests: Some(QuestBook::default()),
        ..LocalSnapshot::default()
    };

    let hunter = hunter(&remote);
    let report = hunter.sign_in(Some(local), None).await;
    let migration = report.migration.unwrap();

    assert_eq!(migration.action(Table::PlayerStats), Some(MigrationAction::Replaced));
    assert_eq!(migration.action(Table::Streaks), Some(MigrationAction::KeptRemote));
    assert_eq!(migration.action(Table::Quests), Some(MigrationAction::Uploaded));
    assert_eq!(migration.action(Table::Habits), Some(MigrationAction::Skipped));
    assert!(report.link.is_none());

    assert_eq!(hunter.player.snapshot().await.total_xp, 500);
    assert_eq!(hunter.streak.snapshot().await.longest_streak, 9);
    assert_eq!(report.hydration.quests, FetchOutcome::Loaded);
    assert!(hunter.quests.snapshot().await.quests.is_empty());
}

#[tokio::test]
async fn level_is_independent_of_award_granularity() {
    let piecewise_remote = MemoryRemote::new();
    let piecewise = hunter(&piecewise_remote);
    piecewise.hydrate().await;
    for _ in 0..30 {
        piecewise.award_xp(100, XpSource::Other, "drip").await;
    }

    let lump_remote = MemoryRemote::new();
    let lump = hunter(&lump_remote);
    lump.hydrate().await;
    lump.award_xp(3000, XpSource::Other, "lump").await;

    let a = piecewise.player.snapshot().await;
    let b = lump.player.snapshot().await;
    assert_eq!(a.total_xp, b.total_xp);
    assert_eq!(a.level, b.level);
    assert_eq!(a.available_points, b.available_points);
    assert_eq!(a.rank, b.rank);
    assert_eq!(
        piecewise.gates.snapshot().await.gates,
        lump.gates.snapshot().await.gates
    );
}
