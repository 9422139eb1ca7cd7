//! warden server entry point

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden::app::{AppState, Stores, build_router};
use warden::core::auth::TokenService;
use warden::core::config::{Config, ConfigError, DbDriver, Environment};
use warden::core::db::{DbError, create_pool_with_migrations};
use warden::core::email::{EmailSender, HttpMailer, LogMailer};
use warden::core::users::UserError;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("failed to seed admin account: {0}")]
    AdminSeed(#[from] UserError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

fn init_tracing(environment: Environment) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if environment.is_production() {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Periodically drop expired persisted tokens
fn spawn_token_cleanup(tokens: TokenService, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match tokens.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "expired tokens purged"),
                Err(e) => warn!(error = %e, "token cleanup failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal, shutting down gracefully"),
            Err(e) => warn!("Failed to install Ctrl+C handler: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received terminate signal, shutting down gracefully");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run(config: Config) -> Result<(), StartupError> {
    if config.using_dev_secret {
        warn!("JWT_SECRET not set, using the development secret");
    }

    let stores = match (config.db_driver, &config.database) {
        (DbDriver::Postgres, Some(db)) => {
            info!(database = ?db, "connecting to PostgreSQL");
            Stores::postgres(create_pool_with_migrations(db).await?)
        }
        (DbDriver::Postgres, None) => return Err(ConfigError::MissingDatabase.into()),
        (DbDriver::Memory, _) => {
            warn!("using in-memory storage, data is lost on restart");
            Stores::memory()
        }
    };

    let sender: Arc<dyn EmailSender> = match &config.email.relay_url {
        Some(url) => Arc::new(HttpMailer::new(url.clone())),
        None => Arc::new(LogMailer),
    };

    let state = AppState::from_config(&config, stores, sender);

    if let Some(admin) = &config.admin {
        let created = state
            .users
            .ensure_admin(&admin.name, &admin.email, admin.password.expose())
            .await?;
        if created {
            info!(email = %admin.email, "bootstrap admin created");
        }
    }

    spawn_token_cleanup(state.tokens.clone(), config.token_cleanup_interval);

    info!(
        environment = ?config.environment,
        driver = ?config.db_driver,
        rate_limit = config.rate_limit.enabled,
        "starting server"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.environment);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            ExitCode::FAILURE
        }
    }
}
