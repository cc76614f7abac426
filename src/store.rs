//! SQLite access for every table the backend owns.
//!
//! All queries go through [`Store`], a cheap clonable wrapper around the pool.
//! Folder paths in `folder_cache` are API paths (`/Movies/Heat (1995)`), while
//! `processed_files` and `recent_media` hold absolute filesystem paths.

use std::collections::HashSet;

use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::types::{CachedFolder, FileDetail, ProcessedFile, RecentMedia};

pub type StoreResult<T> = Result<T, sqlx::Error>;

/// Aggregates used by the stats endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LibraryCounts {
    pub files: i64,
    pub folders: i64,
    pub size: i64,
    pub movies: i64,
    pub shows: i64,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` clause.
fn like_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn child_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{}/%", like_escape(trimmed))
}

fn offset(page: u32, limit: u32) -> i64 {
    (page.max(1) as i64 - 1) * limit as i64
}

fn folder_from_row(row: &SqliteRow) -> StoreResult<CachedFolder> {
    Ok(CachedFolder {
        folder_name: row.try_get("folder_name")?,
        folder_path: row.try_get("folder_path")?,
        parent_path: row.try_get("parent_path")?,
        tmdb_id: row.try_get("tmdb_id")?,
        media_type: row.try_get("media_type")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn processed_from_row(row: &SqliteRow) -> StoreResult<ProcessedFile> {
    Ok(ProcessedFile {
        file_path: row.try_get("file_path")?,
        destination_path: row.try_get("destination_path")?,
        base_path: row.try_get("base_path")?,
        tmdb_id: row.try_get("tmdb_id")?,
        season_number: row.try_get("season_number")?,
        episode_number: row.try_get("episode_number")?,
        media_type: row.try_get("media_type")?,
        proper_name: row.try_get("proper_name")?,
        year: row.try_get("year")?,
        file_size: row.try_get("file_size")?,
    })
}

fn detail_from_row(row: &SqliteRow) -> StoreResult<FileDetail> {
    let extra: Option<String> = row.try_get("extra")?;
    Ok(FileDetail {
        path: row.try_get("path")?,
        name: row.try_get("name")?,
        kind: row.try_get("type")?,
        size: row.try_get("size")?,
        modified: row.try_get("modified")?,
        tmdb_id: row.try_get("tmdb_id")?,
        media_type: row.try_get("media_type")?,
        extra: extra.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

const FOLDER_COLUMNS: &str = "folder_name, folder_path, parent_path, tmdb_id, media_type, last_updated";
const PROCESSED_COLUMNS: &str = "file_path, destination_path, base_path, tmdb_id, season_number, \
     episode_number, media_type, proper_name, year, file_size";

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ---- folder cache -------------------------------------------------

    /// Direct children of `parent`, paginated, with the total child count.
    pub async fn folders_under(
        &self,
        parent: &str,
        page: u32,
        limit: u32,
    ) -> StoreResult<(Vec<CachedFolder>, i64)> {
        let total: i64 = sqlx::query("SELECT COUNT(*) AS cnt FROM folder_cache WHERE parent_path = ?1")
            .bind(parent)
            .fetch_one(&self.pool)
            .await?
            .try_get("cnt")?;
        let sql = format!(
            "SELECT {} FROM folder_cache WHERE parent_path = ?1 \
             ORDER BY folder_name COLLATE NOCASE LIMIT ?2 OFFSET ?3",
            FOLDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(parent)
            .bind(limit as i64)
            .bind(offset(page, limit))
            .fetch_all(&self.pool)
            .await?;
        let folders = rows.iter().map(folder_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok((folders, total))
    }

    /// Case-insensitive name search over every folder below `base`.
    pub async fn search_folders(
        &self,
        base: &str,
        query: &str,
        page: u32,
        limit: u32,
    ) -> StoreResult<(Vec<CachedFolder>, i64)> {
        let scope = if base == "/" { "%".to_string() } else { child_prefix(base) };
        let needle = format!("%{}%", like_escape(query));
        let total: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM folder_cache \
             WHERE folder_path LIKE ?1 ESCAPE '\\' AND folder_name LIKE ?2 ESCAPE '\\'",
        )
        .bind(&scope)
        .bind(&needle)
        .fetch_one(&self.pool)
        .await?
        .try_get("cnt")?;
        let sql = format!(
            "SELECT {} FROM folder_cache \
             WHERE folder_path LIKE ?1 ESCAPE '\\' AND folder_name LIKE ?2 ESCAPE '\\' \
             ORDER BY folder_name COLLATE NOCASE LIMIT ?3 OFFSET ?4",
            FOLDER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&scope)
            .bind(&needle)
            .bind(limit as i64)
            .bind(offset(page, limit))
            .fetch_all(&self.pool)
            .await?;
        let folders = rows.iter().map(folder_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok((folders, total))
    }

    /// Direct children of `parent` whose name starts with `letter` (`#` = any digit).
    pub async fn folders_by_letter(
        &self,
        parent: &str,
        letter: &str,
        page: u32,
        limit: u32,
    ) -> StoreResult<(Vec<CachedFolder>, i64)> {
        let filter = if letter == "#" {
            "?2 = '#' AND substr(folder_name, 1, 1) BETWEEN '0' AND '9'"
        } else {
            "lower(substr(folder_name, 1, 1)) = lower(?2)"
        };
        let count_sql =
            format!("SELECT COUNT(*) AS cnt FROM folder_cache WHERE parent_path = ?1 AND {}", filter);
        let total: i64 = sqlx::query(&count_sql)
            .bind(parent)
            .bind(letter)
            .fetch_one(&self.pool)
            .await?
            .try_get("cnt")?;
        let sql = format!(
            "SELECT {} FROM folder_cache WHERE parent_path = ?1 AND {} \
             ORDER BY folder_name COLLATE NOCASE LIMIT ?3 OFFSET ?4",
            FOLDER_COLUMNS, filter
        );
        let rows = sqlx::query(&sql)
            .bind(parent)
            .bind(letter)
            .bind(limit as i64)
            .bind(offset(page, limit))
            .fetch_all(&self.pool)
            .await?;
        let folders = rows.iter().map(folder_from_row).collect::<StoreResult<Vec<_>>>()?;
        Ok((folders, total))
    }

    pub async fn folder_by_path(&self, path: &str) -> StoreResult<Option<CachedFolder>> {
        let sql = format!("SELECT {} FROM folder_cache WHERE folder_path = ?1", FOLDER_COLUMNS);
        let row = sqlx::query(&sql).bind(path).fetch_optional(&self.pool).await?;
        row.as_ref().map(folder_from_row).transpose()
    }

    pub async fn upsert_folder(&self, folder: &CachedFolder) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO folder_cache (folder_name, folder_path, parent_path, tmdb_id, media_type, last_updated)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(folder_path) DO UPDATE SET
                   folder_name = excluded.folder_name,
                   parent_path = excluded.parent_path,
                   tmdb_id = COALESCE(excluded.tmdb_id, folder_cache.tmdb_id),
                   media_type = COALESCE(excluded.media_type, folder_cache.media_type),
                   last_updated = excluded.last_updated"#,
        )
        .bind(&folder.folder_name)
        .bind(&folder.folder_path)
        .bind(&folder.parent_path)
        .bind(&folder.tmdb_id)
        .bind(&folder.media_type)
        .bind(&folder.last_updated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drops the folder at `path` and everything below it.
    pub async fn remove_folders_under(&self, path: &str) -> StoreResult<u64> {
        let res = sqlx::query(
            "DELETE FROM folder_cache WHERE folder_path = ?1 OR folder_path LIKE ?2 ESCAPE '\\'",
        )
        .bind(path)
        .bind(child_prefix(path))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    /// Rewrites folder paths after a rename of `old_path` to `new_path`.
    pub async fn rename_folder_prefix(&self, old_path: &str, new_path: &str, new_name: &str) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let cut = old_path.chars().count() as i64 + 1;
        sqlx::query(
            r#"UPDATE folder_cache SET
                   folder_path = ?2 || substr(folder_path, ?3),
                   parent_path = CASE
                       WHEN parent_path = ?1 OR parent_path LIKE ?4 ESCAPE '\' THEN ?2 || substr(parent_path, ?3)
                       ELSE parent_path END
               WHERE folder_path LIKE ?4 ESCAPE '\'"#,
        )
        .bind(old_path)
        .bind(new_path)
        .bind(cut)
        .bind(child_prefix(old_path))
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE folder_cache SET folder_path = ?2, folder_name = ?3 WHERE folder_path = ?1")
            .bind(old_path)
            .bind(new_path)
            .bind(new_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await
    }

    // ---- metadata cache -----------------------------------------------

    pub async fn tmdb_get(&self, key: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT result FROM tmdb_cache WHERE query = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("result")).transpose()
    }

    pub async fn tmdb_upsert(
        &self,
        key: &str,
        result: &str,
        tmdb_id: Option<&str>,
        media_type: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO tmdb_cache (query, result, tmdb_id, media_type, updated_at)
               VALUES (?1, ?2, ?3, ?4, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
               ON CONFLICT(query) DO UPDATE SET
                   result = excluded.result,
                   tmdb_id = excluded.tmdb_id,
                   media_type = excluded.media_type,
                   updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(result)
        .bind(tmdb_id)
        .bind(media_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Any stored record for the given id and kind, regardless of the key it was stored under.
    pub async fn tmdb_find_by_id(&self, tmdb_id: &str, media_type: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query(
            "SELECT result FROM tmdb_cache WHERE tmdb_id = ?1 AND lower(media_type) = lower(?2) \
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(tmdb_id)
        .bind(media_type)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.try_get("result")).transpose()
    }

    pub async fn tmdb_clear(&self) -> StoreResult<u64> {
        Ok(sqlx::query("DELETE FROM tmdb_cache").execute(&self.pool).await?.rows_affected())
    }

    // ---- processed files ----------------------------------------------

    pub async fn upsert_processed(&self, file: &ProcessedFile) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO processed_files (file_path, destination_path, base_path, tmdb_id, season_number,
                   episode_number, media_type, proper_name, year, file_size)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
               ON CONFLICT(file_path) DO UPDATE SET
                   destination_path = excluded.destination_path,
                   base_path = COALESCE(excluded.base_path, processed_files.base_path),
                   tmdb_id = COALESCE(excluded.tmdb_id, processed_files.tmdb_id),
                   season_number = COALESCE(excluded.season_number, processed_files.season_number),
                   episode_number = COALESCE(excluded.episode_number, processed_files.episode_number),
                   media_type = COALESCE(excluded.media_type, processed_files.media_type),
                   proper_name = COALESCE(excluded.proper_name, processed_files.proper_name),
                   year = COALESCE(excluded.year, processed_files.year),
                   file_size = COALESCE(excluded.file_size, processed_files.file_size),
                   processed_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')"#,
        )
        .bind(&file.file_path)
        .bind(&file.destination_path)
        .bind(&file.base_path)
        .bind(&file.tmdb_id)
        .bind(file.season_number)
        .bind(file.episode_number)
        .bind(&file.media_type)
        .bind(&file.proper_name)
        .bind(&file.year)
        .bind(file.file_size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Looks a file up by destination path first, then by source path.
    pub async fn processed_for_path(&self, path: &str) -> StoreResult<Option<ProcessedFile>> {
        let sql = format!(
            "SELECT {} FROM processed_files WHERE destination_path = ?1 OR file_path = ?1 \
             ORDER BY CASE WHEN destination_path = ?1 THEN 0 ELSE 1 END LIMIT 1",
            PROCESSED_COLUMNS
        );
        let row = sqlx::query(&sql).bind(path).fetch_optional(&self.pool).await?;
        row.as_ref().map(processed_from_row).transpose()
    }

    /// Source paths below `prefix` that already have a destination.
    pub async fn processed_sources_under(&self, prefix: &str) -> StoreResult<HashSet<String>> {
        let rows = sqlx::query(
            "SELECT file_path FROM processed_files WHERE file_path LIKE ?1 ESCAPE '\\' \
             AND destination_path IS NOT NULL AND destination_path != ''",
        )
        .bind(format!("{}%", like_escape(prefix)))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<String, _>("file_path")).collect()
    }

    /// Removes rows whose source or destination is any of `paths` or lies below one of them.
    pub async fn delete_processed(&self, paths: &[&str]) -> StoreResult<u64> {
        let mut removed = 0;
        for path in paths {
            let res = sqlx::query(
                "DELETE FROM processed_files WHERE file_path = ?1 OR destination_path = ?1 \
                 OR destination_path LIKE ?2 ESCAPE '\\'",
            )
            .bind(path)
            .bind(child_prefix(path))
            .execute(&self.pool)
            .await?;
            removed += res.rows_affected();
        }
        Ok(removed)
    }

    pub async fn rename_destination_prefix(&self, old_path: &str, new_path: &str) -> StoreResult<u64> {
        let cut = old_path.chars().count() as i64 + 1;
        let res = sqlx::query(
            "UPDATE processed_files SET destination_path = ?2 || substr(destination_path, ?3) \
             WHERE destination_path = ?1 OR destination_path LIKE ?4 ESCAPE '\\'",
        )
        .bind(old_path)
        .bind(new_path)
        .bind(cut)
        .bind(child_prefix(old_path))
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    pub async fn category_base_paths(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT base_path FROM processed_files WHERE base_path IS NOT NULL AND base_path != ''",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(|r| r.try_get::<String, _>("base_path")).collect()
    }

    pub async fn library_counts(&self) -> StoreResult<LibraryCounts> {
        let row = sqlx::query(
            r#"SELECT
                   (SELECT COUNT(*) FROM processed_files
                        WHERE destination_path IS NOT NULL AND destination_path != '') AS files,
                   (SELECT COUNT(*) FROM folder_cache) AS folders,
                   (SELECT COALESCE(SUM(file_size), 0) FROM processed_files
                        WHERE destination_path IS NOT NULL AND destination_path != '') AS size,
                   (SELECT COUNT(DISTINCT tmdb_id) FROM processed_files
                        WHERE lower(media_type) = 'movie' AND tmdb_id IS NOT NULL) AS movies,
                   (SELECT COUNT(DISTINCT tmdb_id) FROM processed_files
                        WHERE lower(media_type) IN ('tv', 'tvshow') AND tmdb_id IS NOT NULL) AS shows"#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(LibraryCounts {
            files: row.try_get("files")?,
            folders: row.try_get("folders")?,
            size: row.try_get("size")?,
            movies: row.try_get("movies")?,
            shows: row.try_get("shows")?,
        })
    }

    // ---- source files ---------------------------------------------------

    pub async fn mark_source_status(&self, path: &str, status: &str, tmdb_id: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO source_files (file_path, status, tmdb_id, updated_at)
               VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
               ON CONFLICT(file_path) DO UPDATE SET
                   status = excluded.status,
                   tmdb_id = COALESCE(excluded.tmdb_id, source_files.tmdb_id),
                   updated_at = excluded.updated_at"#,
        )
        .bind(path)
        .bind(status)
        .bind(tmdb_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn source_status(&self, path: &str) -> StoreResult<Option<String>> {
        let row = sqlx::query("SELECT status FROM source_files WHERE file_path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("status")).transpose()
    }

    // ---- file details ---------------------------------------------------

    pub async fn file_detail(&self, path: &str) -> StoreResult<Option<FileDetail>> {
        let row = sqlx::query(
            "SELECT path, name, type, size, modified, tmdb_id, media_type, extra FROM file_details WHERE path = ?1",
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(detail_from_row).transpose()
    }

    pub async fn file_details_with_prefix(&self, prefix: &str) -> StoreResult<Vec<FileDetail>> {
        let rows = sqlx::query(
            "SELECT path, name, type, size, modified, tmdb_id, media_type, extra FROM file_details \
             WHERE path LIKE ?1 ESCAPE '\\' ORDER BY path",
        )
        .bind(format!("{}%", like_escape(prefix)))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(detail_from_row).collect()
    }

    pub async fn upsert_file_detail(&self, detail: &FileDetail) -> StoreResult<()> {
        let extra = detail.extra.as_ref().map(|v| v.to_string());
        sqlx::query(
            r#"INSERT INTO file_details (path, name, type, size, modified, tmdb_id, media_type, extra, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
               ON CONFLICT(path) DO UPDATE SET
                   name = excluded.name,
                   type = excluded.type,
                   size = excluded.size,
                   modified = excluded.modified,
                   tmdb_id = excluded.tmdb_id,
                   media_type = excluded.media_type,
                   extra = excluded.extra,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&detail.path)
        .bind(&detail.name)
        .bind(&detail.kind)
        .bind(detail.size)
        .bind(&detail.modified)
        .bind(&detail.tmdb_id)
        .bind(&detail.media_type)
        .bind(extra)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_file_detail(&self, path: &str) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM file_details WHERE path = ?1").bind(path).execute(&self.pool).await?;
        Ok(res.rows_affected())
    }

    // ---- recent media ---------------------------------------------------

    pub async fn add_recent_media(&self, media: &RecentMedia) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO recent_media (name, path, folder_name, type, tmdb_id, show_name, season_number,
                   episode_number, episode_title, filename, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
        )
        .bind(&media.name)
        .bind(&media.path)
        .bind(&media.folder_name)
        .bind(&media.kind)
        .bind(&media.tmdb_id)
        .bind(&media.show_name)
        .bind(media.season_number)
        .bind(media.episode_number)
        .bind(&media.episode_title)
        .bind(&media.filename)
        .bind(&media.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Newest entries first, joined with what the pipeline recorded for the same destination.
    pub async fn recent_media(&self, limit: u32) -> StoreResult<Vec<RecentMedia>> {
        let rows = sqlx::query(
            r#"SELECT r.name, r.path, r.folder_name, r.type, r.tmdb_id, r.show_name, r.season_number,
                      r.episode_number, r.episode_title, r.filename, r.updated_at,
                      (SELECT p.base_path FROM processed_files p WHERE p.destination_path = r.path LIMIT 1) AS base_path,
                      (SELECT p.proper_name FROM processed_files p WHERE p.destination_path = r.path LIMIT 1) AS proper_name,
                      (SELECT p.year FROM processed_files p WHERE p.destination_path = r.path LIMIT 1) AS year
               FROM recent_media r
               ORDER BY r.updated_at DESC, r.id DESC
               LIMIT ?1"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| -> StoreResult<RecentMedia> {
                let base_path: Option<String> = row.try_get("base_path")?;
                Ok(RecentMedia {
                    name: row.try_get("name")?,
                    path: row.try_get("path")?,
                    folder_name: row.try_get("folder_name")?,
                    kind: row.try_get("type")?,
                    tmdb_id: row.try_get("tmdb_id")?,
                    show_name: row.try_get("show_name")?,
                    season_number: row.try_get("season_number")?,
                    episode_number: row.try_get("episode_number")?,
                    episode_title: row.try_get("episode_title")?,
                    filename: row.try_get("filename")?,
                    updated_at: row.try_get("updated_at")?,
                    base_path: base_path.map(|p| p.replace('\\', "/")),
                    proper_name: row.try_get("proper_name")?,
                    year: row.try_get("year")?,
                })
            })
            .collect()
    }

    pub async fn remove_recent_media_under(&self, path: &str) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM recent_media WHERE path = ?1 OR path LIKE ?2 ESCAPE '\\'")
            .bind(path)
            .bind(child_prefix(path))
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_escape_handles_wildcards() {
        assert_eq!(like_escape("100%_done\\"), "100\\%\\_done\\\\");
        assert_eq!(child_prefix("/Movies/"), "/Movies/%");
    }

    #[test]
    fn offset_starts_at_zero() {
        assert_eq!(offset(1, 50), 0);
        assert_eq!(offset(3, 50), 100);
        assert_eq!(offset(0, 50), 0);
    }
}
