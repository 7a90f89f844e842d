use crate::achievements::Achievement;
use crate::errors::AppError;
use crate::gates::DayProgress;
use crate::habits::{Finalization, HabitDraft};
use crate::hunter::{QuestCompletion, TickReport};
use crate::models::{
    AllocateRequest, AwardXpRequest, DailyQuest, Gate, GateBook, Habit, HabitBook,
    NewHabitRequest, NewQuestRequest, QuestBook, RedeemRequest, StatBoost, StatsResponse,
    StreakData, TimezoneRequest, TodayResponse, ToggleDayRequest, UserSettings, XpSource,
};
use crate::notifications::NotificationFeed;
use crate::player::XpAward;
use crate::quests::QuestDraft;
use crate::redemption::Redemption;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct AllocateResponse {
    pub value: u32,
    pub available_points: u32,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub date: String,
    pub completed: bool,
}

#[derive(Debug, Serialize)]
pub struct FailResponse {
    pub losses: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteHabitRequest {
    #[serde(default)]
    pub won: bool,
}

fn require_session(state: &AppState) -> Result<(), AppError> {
    if state.hunter.user_id().is_none() {
        return Err(AppError::unavailable("no hunter is signed in"));
    }
    Ok(())
}

pub async fn get_today(State(state): State<AppState>) -> Json<TodayResponse> {
    let (date, tz) = state.hunter.today().await;
    Json(TodayResponse {
        date,
        timezone: tz.name().to_string(),
    })
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.hunter.player.snapshot().await;
    let progress = stats.progress();
    Json(StatsResponse { stats, progress })
}

pub async fn award_xp(
    State(state): State<AppState>,
    Json(payload): Json<AwardXpRequest>,
) -> Result<Json<XpAward>, AppError> {
    require_session(&state)?;
    if payload.amount == 0 {
        return Err(AppError::bad_request("amount must be greater than zero"));
    }
    let description = payload.description.unwrap_or_else(|| "Manual award".to_string());
    let award = state
        .hunter
        .award_xp(payload.amount, XpSource::Other, &description)
        .await
        .ok_or_else(|| AppError::unavailable("stats are not loaded"))?;
    Ok(Json(award))
}

pub async fn allocate_stat(
    State(state): State<AppState>,
    Json(payload): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, AppError> {
    require_session(&state)?;
    let value = state
        .hunter
        .player
        .allocate_stat(payload.stat)
        .await
        .ok_or_else(|| AppError::conflict("no attribute points available"))?;
    let available_points = state.hunter.player.snapshot().await.available_points;
    Ok(Json(AllocateResponse {
        value,
        available_points,
    }))
}

pub async fn list_quests(State(state): State<AppState>) -> Json<QuestBook> {
    Json(state.hunter.quests.snapshot().await)
}

pub async fn add_quest(
    State(state): State<AppState>,
    Json(payload): Json<NewQuestRequest>,
) -> Result<(StatusCode, Json<DailyQuest>), AppError> {
    require_session(&state)?;
    let draft = QuestDraft {
        name: payload.name,
        xp_reward: payload.xp_reward,
        stat_boost: StatBoost {
            stat: payload.stat,
            amount: payload.amount,
        },
    };
    let quest = state
        .hunter
        .quests
        .add_quest(draft)
        .await?
        .ok_or_else(|| AppError::unavailable("quests are not loaded"))?;
    info!(quest = %quest.id, "quest added");
    Ok((StatusCode::CREATED, Json(quest)))
}

pub async fn delete_quest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    require_session(&state)?;
    if state.hunter.quests.delete_quest(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("quest {id} not found")))
    }
}

pub async fn complete_quest(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QuestCompletion>, AppError> {
    require_session(&state)?;
    let completion = state
        .hunter
        .complete_quest(&id)
        .await
        .ok_or_else(|| AppError::conflict(format!("quest {id} is unknown or already completed")))?;
    Ok(Json(completion))
}

pub async fn list_habits(State(state): State<AppState>) -> Json<HabitBook> {
    Json(state.hunter.habits.snapshot().await)
}

pub async fn create_habit(
    State(state): State<AppState>,
    Json(payload): Json<NewHabitRequest>,
) -> Result<(StatusCode, Json<Habit>), AppError> {
    require_session(&state)?;
    let (today, _) = state.hunter.today().await;
    let draft = HabitDraft {
        name: payload.name,
        icon: payload.icon,
        color: payload.color,
        goal_days: payload.goal_days,
        win_xp: payload.win_xp,
        lose_xp: payload.lose_xp,
    };
    let habit = state
        .hunter
        .habits
        .create_habit(draft, &today)
        .await?
        .ok_or_else(|| AppError::unavailable("habits are not loaded"))?;
    Ok((StatusCode::CREATED, Json(habit)))
}

pub async fn delete_habit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    require_session(&state)?;
    if state.hunter.habits.delete_habit(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found(format!("habit {id} not found")))
    }
}

pub async fn toggle_habit_day(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<ToggleDayRequest>>,
) -> Result<Json<ToggleResponse>, AppError> {
    require_session(&state)?;
    let date = match payload.and_then(|Json(body)| body.date) {
        Some(date) => date,
        None => state.hunter.today().await.0,
    };
    let completed = state
        .hunter
        .habits
        .toggle_day(&id, &date)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no active habit {id}")))?;
    Ok(Json(ToggleResponse { date, completed }))
}

pub async fn complete_habit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<CompleteHabitRequest>>,
) -> Result<Json<Finalization>, AppError> {
    require_session(&state)?;
    let won = payload.map(|Json(body)| body.won).unwrap_or_default();
    let finalization = state
        .hunter
        .complete_habit_at(&id, won, Utc::now())
        .await
        .ok_or_else(|| AppError::not_found(format!("no active habit {id}")))?;
    Ok(Json(finalization))
}

pub async fn get_streak(State(state): State<AppState>) -> Json<StreakData> {
    Json(state.hunter.streak.snapshot().await)
}

pub async fn list_gates(State(state): State<AppState>) -> Json<GateBook> {
    Json(state.hunter.gates.snapshot().await)
}

pub async fn enter_gate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    require_session(&state)?;
    let (today, _) = state.hunter.today().await;
    if state.hunter.gates.enter_gate(&id, &today).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::conflict(format!("gate {id} cannot be entered")))
    }
}

pub async fn mark_gate_day(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DayProgress>, AppError> {
    require_session(&state)?;
    let (today, _) = state.hunter.today().await;
    let progress = state
        .hunter
        .gates
        .mark_day_complete(&id, &today)
        .await
        .ok_or_else(|| AppError::conflict(format!("gate {id} is not in progress")))?;
    Ok(Json(progress))
}

pub async fn complete_gate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Gate>, AppError> {
    require_session(&state)?;
    let gate = state
        .hunter
        .complete_gate_at(&id, Utc::now())
        .await
        .ok_or_else(|| AppError::conflict(format!("gate {id} is not active")))?;
    Ok(Json(gate))
}

pub async fn fail_gate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FailResponse>, AppError> {
    require_session(&state)?;
    let (today, _) = state.hunter.today().await;
    let losses = state
        .hunter
        .gates
        .fail_gate(&id, &today)
        .await
        .ok_or_else(|| AppError::conflict(format!("gate {id} is not active")))?;
    Ok(Json(FailResponse { losses }))
}

pub async fn rechallenge_gate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    require_session(&state)?;
    if state.hunter.gates.rechallenge_gate(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::conflict(format!("gate {id} is locked or unknown")))
    }
}

pub async fn set_timezone(
    State(state): State<AppState>,
    Json(payload): Json<TimezoneRequest>,
) -> Result<Json<UserSettings>, AppError> {
    require_session(&state)?;
    state
        .hunter
        .challenges
        .update_settings(payload.timezone.trim())
        .await?;
    Ok(Json(state.hunter.challenges.settings().await))
}

pub async fn run_tick(State(state): State<AppState>) -> Json<TickReport> {
    Json(state.hunter.daily_tick_at(Utc::now()).await)
}

pub async fn list_achievements(State(state): State<AppState>) -> Json<Vec<&'static Achievement>> {
    Json(state.hunter.achievements.snapshot().await.unlocked())
}

pub async fn get_notifications(State(state): State<AppState>) -> Json<NotificationFeed> {
    Json(state.hunter.notifications.refresh().await)
}

pub async fn redeem_code(
    State(state): State<AppState>,
    Json(payload): Json<RedeemRequest>,
) -> Result<Json<Redemption>, AppError> {
    require_session(&state)?;
    let redemption = state.hunter.redeem_code_at(&payload.code, Utc::now()).await?;
    Ok(Json(redemption))
}
