use std::collections::HashSet;

use tower_sessions::Session;

use crate::error::{AppError, AppResult};

pub const USER_ID: &str = "user_id";
pub const USERNAME: &str = "username";
pub const ROOM_GRANTS: &str = "room_grants";

/// Identity written into the session by the auth layer upstream.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub name: String,
}

pub async fn require_user(session: &Session) -> AppResult<CurrentUser> {
    let Some(id) = session.get::<String>(USER_ID).await? else {
        return Err(AppError::Unauthenticated);
    };
    let name = session
        .get::<String>(USERNAME)
        .await?
        .unwrap_or_else(|| id.clone());

    Ok(CurrentUser { id, name })
}

pub async fn grants(session: &Session) -> AppResult<HashSet<String>> {
    Ok(session
        .get::<HashSet<String>>(ROOM_GRANTS)
        .await?
        .unwrap_or_default())
}

pub async fn add_grant(session: &Session, room_id: &str) -> AppResult<()> {
    let mut granted = grants(session).await?;
    if granted.insert(room_id.to_owned()) {
        session.insert(ROOM_GRANTS, &granted).await?;
    }
    Ok(())
}
