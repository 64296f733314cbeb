use axum::{
    Json, debug_handler,
    extract::{Path, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    db::{self, Message, Room, unix_now},
    error::{AppError, AppResult},
    session::{self, CurrentUser},
};

use super::access;

pub async fn send(
    pool: &SqlitePool,
    room: &Room,
    author: &CurrentUser,
    content: &str,
    now: i64,
) -> AppResult<Message> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::Validation("Message content is required"));
    }

    let id = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO messages (id,room_id,user_id,username,content,created_at) VALUES (?,?,?,?,?,?)",
    )
    .bind(id.to_string())
    .bind(&room.id)
    .bind(&author.id)
    .bind(&author.name)
    .bind(content)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(Message {
        id: id.to_string(),
        room_id: room.id.clone(),
        user_id: author.id.clone(),
        username: author.name.clone(),
        content: content.to_owned(),
        created_at: now,
    })
}

pub async fn list(pool: &SqlitePool, room: &Room) -> AppResult<Vec<Message>> {
    Ok(sqlx::query_as::<_, Message>(
        "SELECT * FROM messages WHERE room_id=? ORDER BY created_at, id",
    )
    .bind(&room.id)
    .fetch_all(pool)
    .await?)
}

fn message_json(message: &Message, viewer_id: &str) -> AppResult<Value> {
    Ok(json!({
        "id": message.id,
        "user": message.username,
        "content": message.content,
        "timestamp": db::iso8601(message.created_at)?,
        "is_own": message.user_id == viewer_id,
    }))
}

async fn viewable_room(
    pool: &SqlitePool,
    session: &Session,
    user: &CurrentUser,
    room_id: Uuid,
) -> AppResult<Room> {
    let room = db::fetch_room(pool, room_id).await?;
    let granted = session::grants(session).await?;
    if !access::can_view(&room, &user.id, &granted) {
        return Err(AppError::PermissionDenied(
            "You don't have access to this room",
        ));
    }
    Ok(room)
}

#[derive(Deserialize)]
pub(crate) struct SendMessageBody {
    content: String,
}

#[debug_handler]
pub(crate) async fn send_message(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(SendMessageBody { content }): Json<SendMessageBody>,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let room = viewable_room(&db_pool, &session, &user, room_id).await?;

    let message = send(&db_pool, &room, &user, &content, unix_now()).await?;

    Ok(Json(json!({
        "success": true,
        "message": message_json(&message, &user.id)?,
    })))
}

#[debug_handler]
pub(crate) async fn list_messages(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let room = viewable_room(&db_pool, &session, &user, room_id).await?;

    let messages = list(&db_pool, &room)
        .await?
        .iter()
        .map(|message| message_json(message, &user.id))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(json!({ "messages": messages })))
}

#[debug_handler]
pub(crate) async fn delete_message(
    Path(message_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let message = db::fetch_message(&db_pool, message_id).await?;

    if message.user_id != user.id {
        return Err(AppError::PermissionDenied(
            "You can only delete your own messages",
        ));
    }

    sqlx::query("DELETE FROM messages WHERE id=?")
        .bind(&message.id)
        .execute(&db_pool)
        .await?;

    Ok(Json(json!({ "success": true })))
}
