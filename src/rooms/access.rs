use std::collections::HashSet;

use axum::{
    Form, Json, debug_handler,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use rand::seq::IndexedRandom;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    db::{self, Room},
    error::AppResult,
    session,
};

// uppercase + digits minus the lookalikes 0/O/I/1
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;
const FALLBACK_CODE_LEN: usize = 8;
const UNIQUE_ATTEMPTS: usize = 100;

pub fn can_view(room: &Room, user_id: &str, grants: &HashSet<String>) -> bool {
    !room.is_private || room.owner_id == user_id || grants.contains(&room.id)
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

fn random_code(len: usize) -> String {
    // thread rng is a CSPRNG; the code is the room's only access credential
    let mut rng = rand::rng();
    (0..len)
        .map(|_| *CODE_ALPHABET.choose(&mut rng).unwrap() as char)
        .collect()
}

/// Short shareable code, unique among live private-room codes. After 100
/// collisions in a row the longer fallback is returned unchecked.
pub async fn generate_code(pool: &SqlitePool) -> AppResult<String> {
    for _ in 0..UNIQUE_ATTEMPTS {
        let code = random_code(CODE_LEN);
        let taken = sqlx::query("SELECT 1 FROM rooms WHERE is_private=1 AND password=?")
            .bind(&code)
            .fetch_optional(pool)
            .await?
            .is_some();
        if !taken {
            return Ok(code);
        }
    }
    Ok(random_code(FALLBACK_CODE_LEN))
}

#[derive(Deserialize)]
pub(crate) struct SetPrivacyBody {
    is_private: bool,
}

#[debug_handler]
pub(crate) async fn set_privacy(
    Path(room_id): Path<Uuid>,
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(SetPrivacyBody { is_private }): Json<SetPrivacyBody>,
) -> AppResult<Response> {
    let user = session::require_user(&session).await?;
    let room = db::fetch_room(&db_pool, room_id).await?;

    if room.owner_id != user.id {
        return Ok((
            StatusCode::FORBIDDEN,
            Json(json!({
                "success": false,
                "error": "Only the room owner can change privacy",
            })),
        )
            .into_response());
    }

    let code = if is_private {
        Some(generate_code(&db_pool).await?)
    } else {
        None
    };

    // flag and code move in one statement so readers never see them disagree
    sqlx::query("UPDATE rooms SET is_private=?, password=? WHERE id=?")
        .bind(is_private)
        .bind(&code)
        .bind(&room.id)
        .execute(&db_pool)
        .await?;

    tracing::info!(room = %room.id, is_private, "room privacy changed");

    Ok(Json(json!({
        "success": true,
        "is_private": is_private,
        "code": code,
    }))
    .into_response())
}

#[derive(Deserialize)]
pub(crate) struct JoinRoomForm {
    room_code: Option<String>,
}

#[debug_handler]
pub(crate) async fn join_private_room(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Form(JoinRoomForm { room_code }): Form<JoinRoomForm>,
) -> AppResult<Redirect> {
    session::require_user(&session).await?;

    let code = normalize_code(room_code.as_deref().unwrap_or_default());
    if code.is_empty() {
        return Ok(Redirect::to("/r?error=missing_code"));
    }

    let room: Option<(String,)> =
        sqlx::query_as("SELECT id FROM rooms WHERE is_private=1 AND password=?")
            .bind(&code)
            .fetch_optional(&db_pool)
            .await?;

    let Some((room_id,)) = room else {
        return Ok(Redirect::to("/r?error=invalid_code"));
    };

    session::add_grant(&session, &room_id).await?;
    Ok(Redirect::to(&format!("/r/{room_id}")))
}
