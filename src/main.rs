use anyhow::Result;
use avatar_studio::{
    config,
    routes,
    services::{
        auth_service::StaticAuthenticator, ingest_service, ingest_service::IngestService,
        session_store::InMemorySessionStore,
    },
    state::AppState,
};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        storage_dir = %cfg.storage_dir,
        database_url = %cfg.database_url,
        public_prefix = %cfg.public_prefix,
        max_upload_bytes = cfg.max_upload_bytes,
        "Starting avatar-studio"
    );

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    // --- Handle migration mode ---
    if migrate {
        ingest_service::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // The schema is idempotent, so a fresh database works without `--migrate`.
    ingest_service::run_migrations(&db).await?;

    // --- Initialize core services ---
    let state = AppState {
        ingest: IngestService::new(
            db.clone(),
            cfg.storage_dir.clone(),
            cfg.public_prefix.clone(),
            cfg.max_upload_bytes,
        ),
        sessions: Arc::new(InMemorySessionStore::new()),
        auth: Arc::new(StaticAuthenticator::new(
            cfg.username.clone(),
            cfg.password.clone(),
        )),
    };

    // --- Build router ---
    let app: Router = routes::routes::app(state, cfg.request_timeout());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
