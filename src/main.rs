use chrono::Utc;
use hunter_sync::{AppConfig, AppState, EventBus, FileRemote, Hunter, UserId, read_local_snapshot, router};
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = AppConfig::from_env()?;
    let remote = FileRemote::open(&config.data_path).await?;
    let hunter = Hunter::new(
        Arc::new(remote),
        config.user_id.clone().map(UserId::new),
        config.sync.clone(),
        EventBus::global().clone(),
    );

    let local = match &config.import_path {
        Some(path) => read_local_snapshot(path).await,
        None => None,
    };
    let report = hunter.sign_in(local, config.discord_id.as_deref()).await;
    if let Some(migration) = &report.migration {
        info!(wrote = migration.wrote_anything(), "local data migration finished");
    }
    if hunter.user_id().is_none() {
        warn!("HUNTER_USER_ID is empty; running without a signed-in hunter");
    }

    let tick = hunter.daily_tick_at(Utc::now()).await;
    info!(date = %tick.date, quests_reset = tick.quests_reset, "startup check done");

    let _subscriptions = hunter.listen();
    let _scheduler = hunter.spawn_scheduler();

    let app = router(AppState::new(hunter));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
