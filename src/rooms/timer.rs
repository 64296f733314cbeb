use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    db::{self, Room, unix_now},
    error::{AppError, AppResult},
    session::{self, CurrentUser},
};

pub const WORK_DURATION_SECS: i64 = 25 * 60;
pub const BREAK_DURATION_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TimerMode {
    Work,
    Break,
}

impl TimerMode {
    pub fn flipped(self) -> Self {
        match self {
            TimerMode::Work => TimerMode::Break,
            TimerMode::Break => TimerMode::Work,
        }
    }

    pub fn default_duration(self) -> i64 {
        match self {
            TimerMode::Work => WORK_DURATION_SECS,
            TimerMode::Break => BREAK_DURATION_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerState {
    pub is_running: bool,
    pub time_left: i64,
    pub mode: TimerMode,
    pub duration: i64,
}

/// Pending expiry transition that the caller must persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeChange {
    pub mode: TimerMode,
    pub duration: i64,
}

/// Derives the current timer state from the stored start time.
///
/// The remaining time is never stored while running; it is recomputed from
/// `timer_started_at` on every read. When a running session has used up its
/// allotment the returned `ModeChange` carries the mode flip the caller has
/// to write back, and the returned state already reflects it.
pub fn evaluate(room: &Room, now: i64) -> (TimerState, Option<ModeChange>) {
    if !room.timer_is_running {
        return (
            TimerState {
                is_running: false,
                time_left: room.timer_duration,
                mode: room.timer_mode,
                duration: room.timer_duration,
            },
            None,
        );
    }

    // started_at can only be null here if the row was edited out of band;
    // reading it as "just started" keeps the computation total
    let started_at = room.timer_started_at.unwrap_or(now);
    let elapsed = now - started_at;
    // negative elapsed (skewed clock) may push time_left above duration;
    // only the zero floor is clamped
    let time_left = (room.timer_duration - elapsed).max(0);

    if time_left > 0 {
        return (
            TimerState {
                is_running: true,
                time_left,
                mode: room.timer_mode,
                duration: room.timer_duration,
            },
            None,
        );
    }

    let mode = room.timer_mode.flipped();
    let duration = mode.default_duration();
    (
        TimerState {
            is_running: false,
            time_left: duration,
            mode,
            duration,
        },
        Some(ModeChange { mode, duration }),
    )
}

fn require_owner(room: &Room, actor: &CurrentUser) -> AppResult<()> {
    if room.owner_id != actor.id {
        return Err(AppError::PermissionDenied(
            "Only the room owner can control the timer",
        ));
    }
    Ok(())
}

// The is_running guard makes the flip settle exactly once when several
// readers race on an expired session.
async fn apply_change(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    room_id: &str,
    change: ModeChange,
) -> AppResult<()> {
    sqlx::query(
        "UPDATE rooms SET timer_is_running=0, timer_started_at=NULL, timer_mode=?, timer_duration=?
         WHERE id=? AND timer_is_running=1",
    )
    .bind(change.mode)
    .bind(change.duration)
    .bind(room_id)
    .execute(&mut **tx)
    .await?;

    tracing::info!(room = room_id, mode = ?change.mode, "pomodoro session expired, mode switched");
    Ok(())
}

/// Read the state, persisting a pending expiry flip. Not a pure query.
pub async fn load_state(pool: &SqlitePool, room_id: Uuid, now: i64) -> AppResult<TimerState> {
    let mut tx = pool.begin().await?;
    let room = db::fetch_room(&mut *tx, room_id).await?;

    let (state, change) = evaluate(&room, now);
    if let Some(change) = change {
        apply_change(&mut tx, &room.id, change).await?;
    }
    tx.commit().await?;

    Ok(state)
}

pub async fn start(
    pool: &SqlitePool,
    room_id: Uuid,
    actor: &CurrentUser,
    now: i64,
) -> AppResult<TimerState> {
    let mut tx = pool.begin().await?;
    let mut room = db::fetch_room(&mut *tx, room_id).await?;
    require_owner(&room, actor)?;

    if !room.timer_is_running {
        sqlx::query(
            "UPDATE rooms SET timer_is_running=1, timer_started_at=? WHERE id=? AND timer_is_running=0",
        )
        .bind(now)
        .bind(&room.id)
        .execute(&mut *tx)
        .await?;
        room.timer_is_running = true;
        room.timer_started_at = Some(now);
    }

    // starting a fully banked-out timer (duration 0) expires immediately
    let (state, change) = evaluate(&room, now);
    if let Some(change) = change {
        apply_change(&mut tx, &room.id, change).await?;
    }
    tx.commit().await?;

    Ok(state)
}

pub async fn pause(
    pool: &SqlitePool,
    room_id: Uuid,
    actor: &CurrentUser,
    now: i64,
) -> AppResult<TimerState> {
    let mut tx = pool.begin().await?;
    let mut room = db::fetch_room(&mut *tx, room_id).await?;
    require_owner(&room, actor)?;

    if room.timer_is_running {
        let started_at = room.timer_started_at.unwrap_or(now);
        let banked = (room.timer_duration - (now - started_at)).max(0);
        sqlx::query(
            "UPDATE rooms SET timer_duration=?, timer_is_running=0, timer_started_at=NULL
             WHERE id=? AND timer_is_running=1",
        )
        .bind(banked)
        .bind(&room.id)
        .execute(&mut *tx)
        .await?;
        room.timer_duration = banked;
        room.timer_is_running = false;
        room.timer_started_at = None;
    }

    let (state, _) = evaluate(&room, now);
    tx.commit().await?;

    Ok(state)
}

pub async fn reset(pool: &SqlitePool, room_id: Uuid, actor: &CurrentUser) -> AppResult<TimerState> {
    let mut tx = pool.begin().await?;
    let room = db::fetch_room(&mut *tx, room_id).await?;
    require_owner(&room, actor)?;

    sqlx::query(
        "UPDATE rooms SET timer_is_running=0, timer_started_at=NULL, timer_mode='work', timer_duration=?
         WHERE id=?",
    )
    .bind(WORK_DURATION_SECS)
    .bind(&room.id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(TimerState {
        is_running: false,
        time_left: WORK_DURATION_SECS,
        mode: TimerMode::Work,
        duration: WORK_DURATION_SECS,
    })
}

#[debug_handler]
pub(crate) async fn timer_state(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<TimerState>> {
    session::require_user(&session).await?;
    Ok(Json(load_state(&db_pool, room_id, unix_now()).await?))
}

#[debug_handler]
pub(crate) async fn timer_start(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<TimerState>> {
    let user = session::require_user(&session).await?;
    Ok(Json(start(&db_pool, room_id, &user, unix_now()).await?))
}

#[debug_handler]
pub(crate) async fn timer_pause(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<TimerState>> {
    let user = session::require_user(&session).await?;
    Ok(Json(pause(&db_pool, room_id, &user, unix_now()).await?))
}

#[debug_handler]
pub(crate) async fn timer_reset(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<TimerState>> {
    let user = session::require_user(&session).await?;
    Ok(Json(reset(&db_pool, room_id, &user).await?))
}
