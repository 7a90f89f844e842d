use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/today", get(handlers::get_today))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/stats/allocate", post(handlers::allocate_stat))
        .route("/api/xp", post(handlers::award_xp))
        .route("/api/quests", get(handlers::list_quests).post(handlers::add_quest))
        .route("/api/quests/:id", delete(handlers::delete_quest))
        .route("/api/quests/:id/complete", post(handlers::complete_quest))
        .route("/api/habits", get(handlers::list_habits).post(handlers::create_habit))
        .route("/api/habits/:id", delete(handlers::delete_habit))
        .route("/api/habits/:id/toggle", post(handlers::toggle_habit_day))
        .route("/api/habits/:id/complete", post(handlers::complete_habit))
        .route("/api/streak", get(handlers::get_streak))
        .route("/api/gates", get(handlers::list_gates))
        .route("/api/gates/:id/enter", post(handlers::enter_gate))
        .route("/api/gates/:id/mark", post(handlers::mark_gate_day))
        .route("/api/gates/:id/complete", post(handlers::complete_gate))
        .route("/api/gates/:id/fail", post(handlers::fail_gate))
        .route("/api/gates/:id/rechallenge", post(handlers::rechallenge_gate))
        .route("/api/settings/timezone", post(handlers::set_timezone))
        .route("/api/tick", post(handlers::run_tick))
        .route("/api/achievements", get(handlers::list_achievements))
        .route("/api/notifications", get(handlers::get_notifications))
        .route("/api/redeem", post(handlers::redeem_code))
        .with_state(state)
}
