use sqlx::SqlitePool;

pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance, failures are logged only
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA temp_store=MEMORY;").execute(pool).await {
        tracing::warn!("Failed to set temp_store: {}", e);
    }

    // Mirror of the destination library: one row per media/category folder
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS folder_cache (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            folder_name TEXT NOT NULL,
            folder_path TEXT NOT NULL UNIQUE,
            parent_path TEXT NOT NULL,
            tmdb_id TEXT NULL,
            media_type TEXT NULL,
            last_updated TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    // Raw metadata records keyed by lookup key (name keys and id:<id>:<kind> keys)
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS tmdb_cache (
            query TEXT PRIMARY KEY,
            result TEXT NOT NULL,
            tmdb_id TEXT NULL,
            media_type TEXT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS processed_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL UNIQUE,
            destination_path TEXT NULL,
            base_path TEXT NULL,
            tmdb_id TEXT NULL,
            season_number INTEGER NULL,
            episode_number INTEGER NULL,
            media_type TEXT NULL,
            proper_name TEXT NULL,
            year TEXT NULL,
            file_size INTEGER NULL,
            processed_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS file_details (
            path TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            type TEXT NOT NULL,
            size INTEGER NULL,
            modified TEXT NULL,
            tmdb_id TEXT NULL,
            media_type TEXT NULL,
            extra TEXT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS recent_media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            folder_name TEXT NOT NULL,
            type TEXT NOT NULL,
            tmdb_id TEXT NULL,
            show_name TEXT NULL,
            season_number INTEGER NULL,
            episode_number INTEGER NULL,
            episode_title TEXT NULL,
            filename TEXT NULL,
            updated_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS source_files (
            file_path TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            tmdb_id TEXT NULL,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        ("idx_folder_cache_parent", "CREATE INDEX IF NOT EXISTS idx_folder_cache_parent ON folder_cache(parent_path, folder_name)"),
        ("idx_tmdb_cache_id", "CREATE INDEX IF NOT EXISTS idx_tmdb_cache_id ON tmdb_cache(tmdb_id, media_type)"),
        ("idx_processed_dest", "CREATE INDEX IF NOT EXISTS idx_processed_dest ON processed_files(destination_path)"),
        ("idx_recent_updated", "CREATE INDEX IF NOT EXISTS idx_recent_updated ON recent_media(updated_at DESC)"),
        ("idx_recent_path", "CREATE INDEX IF NOT EXISTS idx_recent_path ON recent_media(path)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}
