use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    db::{self, unix_now},
    error::AppResult,
    session::{self, CurrentUser},
};

pub const ACTIVE_WINDOW_SECS: i64 = 30;
pub const RETENTION_SECS: i64 = 24 * 60 * 60;

pub async fn heartbeat(
    pool: &SqlitePool,
    room_id: &str,
    user: &CurrentUser,
    now: i64,
) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO presence (room_id,user_id,username,last_seen) VALUES (?,?,?,?)
         ON CONFLICT (room_id,user_id) DO UPDATE SET last_seen=excluded.last_seen, username=excluded.username",
    )
    .bind(room_id)
    .bind(&user.id)
    .bind(&user.name)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn active_users(pool: &SqlitePool, room_id: &str, now: i64) -> AppResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT username FROM presence WHERE room_id=? AND last_seen>=? ORDER BY username",
    )
    .bind(room_id)
    .bind(now - ACTIVE_WINDOW_SECS)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Delete-by-age sweep, meant for periodic invocation rather than
/// per-request use. Returns how many rows went away.
pub async fn purge_stale(pool: &SqlitePool, older_than: i64) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM presence WHERE last_seen<?")
        .bind(older_than)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[debug_handler]
pub(crate) async fn presence(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let room = db::fetch_room(&db_pool, room_id).await?;

    let now = unix_now();
    heartbeat(&db_pool, &room.id, &user, now).await?;
    let users = active_users(&db_pool, &room.id, now).await?;

    Ok(Json(json!({
        "active_count": users.len(),
        "active_users": users,
    })))
}
