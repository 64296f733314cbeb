pub mod access;
pub mod msg;
pub mod presence;
pub mod timer;

use axum::{
    Json, Router, debug_handler,
    extract::{Path, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppState,
    db::{self, Room, unix_now},
    error::{AppError, AppResult},
    session::{self, CurrentUser},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rooms).post(new_room))
        .route("/join", post(access::join_private_room))
        .route("/{uuid}", get(room_detail))
        .route("/{uuid}/delete", post(delete_room))
        .route("/{uuid}/privacy", post(access::set_privacy))
        .route("/{uuid}/timer", get(timer::timer_state))
        .route("/{uuid}/timer/start", post(timer::timer_start))
        .route("/{uuid}/timer/pause", post(timer::timer_pause))
        .route("/{uuid}/timer/reset", post(timer::timer_reset))
        .route("/{uuid}/messages", get(msg::list_messages).post(msg::send_message))
        .route("/{uuid}/presence", get(presence::presence))
        .route("/messages/{uuid}/delete", post(msg::delete_message))
}

fn room_json(room: &Room, viewer: &CurrentUser) -> AppResult<Value> {
    Ok(json!({
        "id": room.id,
        "name": room.name,
        "description": room.description,
        "created_by": room.owner_name,
        "created_at": db::iso8601(room.created_at)?,
        "is_creator": room.owner_id == viewer.id,
        "is_private": room.is_private,
    }))
}

#[derive(Deserialize)]
pub(crate) struct NewRoomBody {
    name: String,
    description: Option<String>,
}

#[debug_handler]
pub(crate) async fn new_room(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(NewRoomBody { name, description }): Json<NewRoomBody>,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;

    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Room name is required"));
    }
    let description = description
        .map(|d| d.trim().to_owned())
        .filter(|d| !d.is_empty());

    let uuid = Uuid::now_v7();
    sqlx::query(
        "INSERT INTO rooms (id,name,description,owner_id,owner_name,created_at) VALUES (?,?,?,?,?,?)",
    )
    .bind(uuid.to_string())
    .bind(name)
    .bind(&description)
    .bind(&user.id)
    .bind(&user.name)
    .bind(unix_now())
    .execute(&db_pool)
    .await?;

    tracing::info!(room = %uuid, owner = %user.id, "room created");

    let room = db::fetch_room(&db_pool, uuid).await?;
    Ok(Json(room_json(&room, &user)?))
}

#[debug_handler]
pub(crate) async fn list_rooms(
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let granted = session::grants(&session).await?;

    let rooms: Vec<Room> = sqlx::query_as("SELECT * FROM rooms ORDER BY created_at DESC, id DESC")
        .fetch_all(&db_pool)
        .await?;

    let rooms = rooms
        .iter()
        .filter(|room| access::can_view(room, &user.id, &granted))
        .map(|room| room_json(room, &user))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(Json(json!({ "rooms": rooms })))
}

#[debug_handler]
pub(crate) async fn room_detail(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let granted = session::grants(&session).await?;

    let room = db::fetch_room(&db_pool, room_id).await?;
    if !access::can_view(&room, &user.id, &granted) {
        return Err(AppError::PermissionDenied(
            "You don't have access to this room",
        ));
    }

    let mut body = room_json(&room, &user)?;
    if room.owner_id == user.id {
        // the owner sees the code so they can share it
        body["code"] = json!(room.password);
    }

    Ok(Json(body))
}

#[debug_handler]
pub(crate) async fn delete_room(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Json<Value>> {
    let user = session::require_user(&session).await?;
    let room = db::fetch_room(&db_pool, room_id).await?;

    if room.owner_id != user.id {
        return Err(AppError::PermissionDenied(
            "Only the room owner can delete this room",
        ));
    }

    // messages and presence rows go with it via FK cascade
    sqlx::query("DELETE FROM rooms WHERE id=?")
        .bind(&room.id)
        .execute(&db_pool)
        .await?;

    tracing::info!(room = %room.id, "room deleted");
    Ok(Json(json!({ "success": true })))
}
