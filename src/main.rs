use axum::Router;
use studyhive::{AppState, db, rooms};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::SameSite};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    studyhive::init_tracing();

    let database_url =
        dotenv::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:studyhive.db".to_string());
    let db_pool = db::connect(&database_url).await.unwrap();

    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(8)));

    // hourly sweep of presence rows past the retention window
    let purge_pool = db_pool.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tick.tick().await;
            let cutoff = db::unix_now() - rooms::presence::RETENTION_SECS;
            match rooms::presence::purge_stale(&purge_pool, cutoff).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "purged stale presence rows"),
                Err(err) => tracing::warn!("presence purge failed: {err}"),
            }
        }
    });

    let app_state = AppState { db_pool };

    let app = Router::new()
        .nest("/r", rooms::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = dotenv::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await.unwrap();
}
