use std::str::FromStr;

use axum::{
    Router,
    body::Body,
    extract::Path,
    http::{Request, StatusCode, header},
    routing::get,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use studyhive::{AppState, db, rooms, session as session_keys};
use tower::ServiceExt;
use tower_sessions::{MemoryStore, Session, SessionManagerLayer};

// Stand-in for the external auth layer: writes the identity keys into the
// session the same way the real one would.
async fn test_login(Path((id, name)): Path<(String, String)>, session: Session) -> &'static str {
    session.insert(session_keys::USER_ID, id).await.unwrap();
    session.insert(session_keys::USERNAME, name).await.unwrap();
    "ok"
}

async fn app() -> Router {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();
    db::init(&db_pool).await.unwrap();

    let session_layer = SessionManagerLayer::new(MemoryStore::default()).with_secure(false);

    Router::new()
        .route("/login/{id}/{name}", get(test_login))
        .nest("/r", rooms::router())
        .with_state(AppState { db_pool })
        .layer(session_layer)
}

async fn login(app: &Router, id: &str, name: &str) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/login/{id}/{name}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("login must set a session cookie")
        .to_str()
        .unwrap();
    cookie.split(';').next().unwrap().to_owned()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    cookie: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .map(|l| l.to_str().unwrap().to_owned());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, location, value)
}

async fn join(app: &Router, cookie: &str, code: &str) -> (StatusCode, String) {
    let request = Request::post("/r/join")
        .header(header::COOKIE, cookie)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("room_code={code}")))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let location = response
        .headers()
        .get(header::LOCATION)
        .expect("join always redirects")
        .to_str()
        .unwrap()
        .to_owned();
    (status, location)
}

async fn create_room(app: &Router, cookie: &str, name: &str) -> String {
    let (status, _, body) = send(
        app,
        "POST",
        "/r",
        Some(cookie),
        Some(json!({ "name": name })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn unauthenticated_requests_redirect_to_login() {
    let app = app().await;

    let (status, location, _) = send(&app, "GET", "/r", None, None).await;
    assert!(status.is_redirection());
    assert_eq!(location.as_deref(), Some("/login"));

    let (status, location, _) = send(&app, "GET", "/r/0190a000-0000-7000-8000-000000000000/presence", None, None).await;
    assert!(status.is_redirection());
    assert_eq!(location.as_deref(), Some("/login"));
}

#[tokio::test]
async fn unknown_room_is_404() {
    let app = app().await;
    let cookie = login(&app, "u1", "alice").await;
    let missing = "0190a000-0000-7000-8000-000000000000";

    for uri in [
        format!("/r/{missing}"),
        format!("/r/{missing}/timer"),
        format!("/r/{missing}/messages"),
        format!("/r/{missing}/presence"),
    ] {
        let (status, _, _) = send(&app, "GET", &uri, Some(&cookie), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn room_creation_validates_name_and_lists_newest_first() {
    let app = app().await;
    let cookie = login(&app, "u1", "alice").await;

    let (status, _, body) = send(&app, "POST", "/r", Some(&cookie), Some(json!({ "name": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Room name is required"));

    create_room(&app, &cookie, "first").await;
    create_room(&app, &cookie, "second").await;

    let (status, _, body) = send(&app, "GET", "/r", Some(&cookie), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["rooms"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["second", "first"]);
    assert_eq!(body["rooms"][0]["is_creator"], json!(true));
    assert_eq!(body["rooms"][0]["created_by"], json!("alice"));

    let other = login(&app, "u2", "bob").await;
    let (_, _, body) = send(&app, "GET", "/r", Some(&other), None).await;
    assert_eq!(body["rooms"][0]["is_creator"], json!(false));
}

#[tokio::test]
async fn timer_controls_are_owner_only() {
    let app = app().await;
    let owner = login(&app, "u1", "alice").await;
    let other = login(&app, "u2", "bob").await;
    let room = create_room(&app, &owner, "deep work").await;

    for op in ["start", "pause", "reset"] {
        let (status, _, body) =
            send(&app, "POST", &format!("/r/{room}/timer/{op}"), Some(&other), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{op}");
        assert_eq!(body["error"], json!("Only the room owner can control the timer"));
    }

    // the failed attempts changed nothing
    let (status, _, body) = send(&app, "GET", &format!("/r/{room}/timer"), Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "is_running": false, "time_left": 1500, "mode": "work", "duration": 1500 })
    );

    let (status, _, body) =
        send(&app, "POST", &format!("/r/{room}/timer/start"), Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_running"], json!(true));
    assert_eq!(body["mode"], json!("work"));

    let (status, _, body) =
        send(&app, "POST", &format!("/r/{room}/timer/reset"), Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "is_running": false, "time_left": 1500, "mode": "work", "duration": 1500 })
    );
}

#[tokio::test]
async fn private_room_grant_flow() {
    let app = app().await;
    let owner = login(&app, "u1", "alice").await;
    let other = login(&app, "u2", "bob").await;
    let room = create_room(&app, &owner, "secret den").await;

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/r/{room}/privacy"),
        Some(&owner),
        Some(json!({ "is_private": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["is_private"], json!(true));
    let code = body["code"].as_str().unwrap().to_owned();
    assert!(code.len() >= 6 && code.len() <= 8);

    // non-owner cannot change privacy
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/r/{room}/privacy"),
        Some(&other),
        Some(json!({ "is_private": false })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], json!(false));

    // without a grant: hidden from the directory, detail and messages denied
    let (_, _, body) = send(&app, "GET", "/r", Some(&other), None).await;
    assert!(body["rooms"].as_array().unwrap().is_empty());
    let (status, _, _) = send(&app, "GET", &format!("/r/{room}"), Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _, _) = send(&app, "GET", &format!("/r/{room}/messages"), Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // the owner still sees their own private room, code included
    let (_, _, body) = send(&app, "GET", "/r", Some(&owner), None).await;
    assert_eq!(body["rooms"].as_array().unwrap().len(), 1);
    let (status, _, body) = send(&app, "GET", &format!("/r/{room}"), Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], json!(code));

    // wrong code: redirected back, still no access
    let (status, location) = join(&app, &other, "ZZZZZZ").await;
    assert!(status.is_redirection());
    assert_eq!(location, "/r?error=invalid_code");
    let (status, _, _) = send(&app, "GET", &format!("/r/{room}"), Some(&other), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // empty code
    let (status, location) = join(&app, &other, "").await;
    assert!(status.is_redirection());
    assert_eq!(location, "/r?error=missing_code");

    // right code, submitted lowercase with padding: grant sticks to the session
    let (status, location) = join(&app, &other, &format!("%20{}%20", code.to_lowercase())).await;
    assert!(status.is_redirection());
    assert_eq!(location, format!("/r/{room}"));

    let (status, _, _) = send(&app, "GET", &format!("/r/{room}"), Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, _, body) = send(&app, "GET", "/r", Some(&other), None).await;
    assert_eq!(body["rooms"].as_array().unwrap().len(), 1);

    // a third session without the grant is still locked out
    let third = login(&app, "u3", "carol").await;
    let (status, _, _) = send(&app, "GET", &format!("/r/{room}"), Some(&third), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn toggling_privacy_off_clears_the_code() {
    let app = app().await;
    let owner = login(&app, "u1", "alice").await;
    let room = create_room(&app, &owner, "den").await;

    send(
        &app,
        "POST",
        &format!("/r/{room}/privacy"),
        Some(&owner),
        Some(json!({ "is_private": true })),
    )
    .await;
    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/r/{room}/privacy"),
        Some(&owner),
        Some(json!({ "is_private": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_private"], json!(false));
    assert_eq!(body["code"], Value::Null);

    let (_, _, body) = send(&app, "GET", &format!("/r/{room}"), Some(&owner), None).await;
    assert_eq!(body["is_private"], json!(false));
    assert_eq!(body["code"], Value::Null);
}

#[tokio::test]
async fn message_send_list_delete_contract() {
    let app = app().await;
    let alice = login(&app, "u1", "alice").await;
    let bob = login(&app, "u2", "bob").await;
    let room = create_room(&app, &alice, "hall").await;

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/r/{room}/messages"),
        Some(&alice),
        Some(json!({ "content": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("Message content is required"));

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/r/{room}/messages"),
        Some(&alice),
        Some(json!({ "content": "  hello there  " })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["message"]["user"], json!("alice"));
    assert_eq!(body["message"]["content"], json!("hello there"));
    assert_eq!(body["message"]["is_own"], json!(true));
    let message_id = body["message"]["id"].as_str().unwrap().to_owned();

    let (status, _, body) = send(&app, "GET", &format!("/r/{room}/messages"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["is_own"], json!(false));

    // only the author may delete
    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/r/messages/{message_id}/delete"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (_, _, body) = send(&app, "GET", &format!("/r/{room}/messages"), Some(&alice), None).await;
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);

    let (status, _, body) = send(
        &app,
        "POST",
        &format!("/r/messages/{message_id}/delete"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));
    let (_, _, body) = send(&app, "GET", &format!("/r/{room}/messages"), Some(&alice), None).await;
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn presence_endpoint_reports_active_users() {
    let app = app().await;
    let alice = login(&app, "u1", "alice").await;
    let bob = login(&app, "u2", "bob").await;
    let room = create_room(&app, &alice, "lounge").await;

    let (status, _, body) =
        send(&app, "GET", &format!("/r/{room}/presence"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_count"], json!(1));
    assert_eq!(body["active_users"], json!(["alice"]));

    let (_, _, body) = send(&app, "GET", &format!("/r/{room}/presence"), Some(&bob), None).await;
    assert_eq!(body["active_count"], json!(2));
    assert_eq!(body["active_users"], json!(["alice", "bob"]));
}

#[tokio::test]
async fn room_delete_is_owner_only_and_cascades() {
    let app = app().await;
    let alice = login(&app, "u1", "alice").await;
    let bob = login(&app, "u2", "bob").await;
    let room = create_room(&app, &alice, "hall").await;

    send(
        &app,
        "POST",
        &format!("/r/{room}/messages"),
        Some(&bob),
        Some(json!({ "content": "hi" })),
    )
    .await;

    let (status, _, _) = send(&app, "POST", &format!("/r/{room}/delete"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _, body) = send(&app, "POST", &format!("/r/{room}/delete"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (status, _, _) = send(&app, "GET", &format!("/r/{room}"), Some(&alice), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, "GET", &format!("/r/{room}/messages"), Some(&bob), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
