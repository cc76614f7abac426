use std::{future::IntoFuture, net::SocketAddr};

use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite};
use tokio::time::{self, Duration as TokioDuration};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webdavhub::{config, db, routes, state::AppState};

/// How long open connections may keep the process alive after a shutdown signal.
const SHUTDOWN_GRACE: TokioDuration = TokioDuration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + tägliche Datei-Rotation unter ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "webdavhub.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Guards am Leben halten (nicht fallen lassen), damit Non-Blocking Writer korrekt flushen
    let _log_guards = (stdout_guard, file_guard);

    // Load configuration (embedded defaults -> webdavhub.toml -> env/.env -> legacy env)
    let app_cfg = config::load()?;
    if app_cfg.library.is_placeholder() {
        tracing::warn!(
            "Destination directory '{}' is not configured; listings return an empty result",
            app_cfg.library.destination_dir
        );
    }

    // Prepare data dir (if sqlite)
    let db_url = &app_cfg.database.url;
    config::ensure_sqlite_parent_dir(db_url)?;
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        info!("Creating SQLite database at {}", db_url);
        Sqlite::create_database(db_url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(app_cfg.database.max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA cache_size=-16384;").execute(&mut *conn).await; // ~16MB page cache
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;

    // Initialize DB schema
    db::init_db(&pool).await?;

    let state = AppState::new(pool, app_cfg.clone())?;

    // Spawn periodic cleanup for per-endpoint rate limiters to avoid memory growth
    {
        let rl = state.rate_limiter.clone();
        let stop = state.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(TokioDuration::from_secs(300));
            loop {
                tokio::select! {
                    _ = ticker.tick() => rl.cleanup_all().await,
                    _ = stop.cancelled() => break,
                }
            }
        });
    }

    let shutdown = state.shutdown.clone();
    let app = routes::app(state);

    // Server listen addr (from config)
    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("webdavhub listening on http://{}", listener.local_addr()?);
    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .into_future();
    tokio::pin!(server);
    tokio::select! {
        res = &mut server => res?,
        _ = async {
            shutdown.cancelled().await;
            time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!(
                "Connections still open {}s after shutdown signal, exiting anyway",
                SHUTDOWN_GRACE.as_secs()
            );
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(restart: CancellationToken) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                    _ = restart.cancelled() => info!("Restart requested"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = restart.cancelled() => info!("Restart requested"),
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = restart.cancelled() => info!("Restart requested"),
        }
    }
    info!("Shutdown signal received. Stopping server...");
    // Ends the SSE and bridge streams and the background tasks
    restart.cancel();
}
