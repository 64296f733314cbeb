use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    rooms::timer::TimerMode,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    owner_id TEXT NOT NULL,
    owner_name TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    is_private INTEGER NOT NULL DEFAULT 0,
    password TEXT,
    timer_started_at INTEGER,
    timer_duration INTEGER NOT NULL DEFAULT 1500,
    timer_is_running INTEGER NOT NULL DEFAULT 0,
    timer_mode TEXT NOT NULL DEFAULT 'work'
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    username TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room ON messages (room_id, created_at);

CREATE TABLE IF NOT EXISTS presence (
    room_id TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL,
    username TEXT NOT NULL,
    last_seen INTEGER NOT NULL,
    PRIMARY KEY (room_id, user_id)
);
"#;

pub async fn connect(url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    init(&pool).await?;
    Ok(pool)
}

pub async fn init(pool: &SqlitePool) -> sqlx::Result<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub owner_id: String,
    pub owner_name: String,
    pub created_at: i64,
    pub is_private: bool,
    // the shareable access code, not a login credential
    pub password: Option<String>,
    pub timer_started_at: Option<i64>,
    pub timer_duration: i64,
    pub timer_is_running: bool,
    pub timer_mode: TimerMode,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: i64,
}

pub async fn fetch_room<'e, E>(executor: E, room_id: Uuid) -> AppResult<Room>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as::<_, Room>("SELECT * FROM rooms WHERE id=?")
        .bind(room_id.to_string())
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("room"))
}

pub async fn fetch_message<'e, E>(executor: E, message_id: Uuid) -> AppResult<Message>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id=?")
        .bind(message_id.to_string())
        .fetch_optional(executor)
        .await?
        .ok_or(AppError::NotFound("message"))
}

pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

pub fn iso8601(ts: i64) -> AppResult<String> {
    Ok(OffsetDateTime::from_unix_timestamp(ts)?.format(&Rfc3339)?)
}
