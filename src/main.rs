use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use campus_quiz::{
    config::{get_config, init_config, LogFormat, StoreBackend},
    database::{memory::MemoryQuizStore, pool::create_pool, postgres::PgQuizStore, store::QuizStore},
    error::Error,
    routes,
    services::grading_service::RetryPolicy,
    AppState,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("campus_quiz=info,tower_http=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn build_store() -> anyhow::Result<Arc<dyn QuizStore>> {
    let config = get_config();
    match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config.database_url.as_deref().ok_or_else(|| {
                Error::Config("DATABASE_URL is required for the postgres store".to_string())
            })?;
            let pool = create_pool(database_url, config.db_max_connections).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            info!("Connected to Postgres, migrations applied");
            Ok(Arc::new(PgQuizStore::new(pool)))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryQuizStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_config()?;
    let config = get_config();
    init_tracing(config.log_format);

    let store = build_store().await?;
    let app_state = AppState::new(store, &config.jwt_secret, RetryPolicy::from_config(config));

    {
        let state = app_state.clone();
        let interval = Duration::from_secs(config.grading_worker_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                match state.grading_service.run_once(chrono::Utc::now()).await {
                    Ok(0) => {}
                    Ok(count) => info!(count, "grading retries processed"),
                    Err(e) => tracing::error!(error = ?e, "Grading retry worker error"),
                }
                let pruned = state
                    .sessions
                    .prune(chrono::Duration::hours(6), chrono::Duration::hours(26));
                if pruned > 0 {
                    tracing::debug!(pruned, "sessions pruned");
                }
                tokio::time::sleep(interval).await;
            }
        });
    }

    let app = routes::build_router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024));

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
