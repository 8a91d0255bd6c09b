use std::{sync::Arc, time::Duration};

use sqlx::sqlite::SqlitePoolOptions;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wifi_credits::{
    api,
    config::Settings,
    service::{clock::SystemClock, ServiceContext},
    storage::LocalBlobStore,
};

/// How often stale pending referrals are swept.
const REFERRAL_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wifi_credits=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    if settings.auth.jwt_secret == Settings::default().auth.jwt_secret {
        tracing::warn!("Using the default JWT secret; set WIFI_CREDITS__AUTH__JWT_SECRET");
    }

    tracing::info!("Starting WiFi credits server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database
    let db_pool = SqlitePoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.operation_timeout_secs.max(1)))
        .connect(&settings.database.url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await?;

    let blob_store = Arc::new(LocalBlobStore::new(
        &settings.storage.uploads_dir,
        settings.storage.public_base_url.clone(),
        settings.storage.max_upload_bytes,
    ));

    let service_context = Arc::new(ServiceContext::new(
        db_pool,
        blob_store,
        Arc::new(SystemClock),
        &settings,
    )?);

    tracing::info!(
        "Loaded {} packages",
        service_context.payment_service.packages().len()
    );

    // Background sweep of pending referrals that never resolved
    let referrals = service_context.referral_service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REFERRAL_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = referrals.expire_stale().await {
                tracing::error!("Referral expiry sweep failed: {}", e);
            }
        }
    });

    let uploads = ServeDir::new(&settings.storage.uploads_dir);
    let settings = Arc::new(settings);

    let app = api::create_app(service_context, settings.clone())
        .nest_service("/uploads", uploads);

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}
