//! Side effects of pipeline messages posted to `/api/mediahub-message`.
//!
//! A `symlink_created` message marks the source file as processed, keeps the
//! folder mirror and the processed-file table in step with the new link and
//! records a recent-media row. Everything here is best effort: a failed write
//! is logged and the message is still relayed.

use std::path::{Component, Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use super::{hub::EventHub, kinds, BroadcastMessage};
use crate::library::{categories::CategoryCache, join_api_path};
use crate::stats::StatsCache;
use crate::store::Store;
use crate::types::{CachedFolder, ProcessedFile, RecentMedia};

lazy_static! {
    static ref TMDB_TAG: Regex = Regex::new(r"\s*\{tmdb-\d+\}").expect("valid tmdb tag regex");
    static ref EPISODE_PREFIX: Regex = Regex::new(r"^S\d{2}E\d{2}\s*-?\s*").expect("valid episode prefix regex");
    static ref NAME_YEAR: Regex = Regex::new(r"^(.*?)\s*\((\d{4})\)\s*$").expect("valid name/year regex");
}

fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn opt_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Payload of a `symlink_created` message. Unknown or malformed fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SymlinkCreated {
    #[serde(deserialize_with = "opt_string")]
    pub media_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub media_type: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub source_file: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub destination_file: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub filename: Option<String>,
    /// Number or string on the wire.
    #[serde(deserialize_with = "opt_string")]
    pub tmdb_id: Option<String>,
    #[serde(deserialize_with = "opt_number")]
    pub season_number: Option<i64>,
    #[serde(deserialize_with = "opt_number")]
    pub episode_number: Option<i64>,
    #[serde(deserialize_with = "opt_string")]
    pub show_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub proper_show_name: Option<String>,
    #[serde(deserialize_with = "opt_string")]
    pub episode_title: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    pub force_mode: bool,
}

impl SymlinkCreated {
    pub fn from_message(message: &BroadcastMessage) -> Self {
        serde_json::from_value(Value::Object(message.data.clone())).unwrap_or_else(|e| {
            tracing::warn!("Malformed symlink_created payload: {}", e);
            Self::default()
        })
    }

    pub fn is_tv(&self) -> bool {
        matches!(self.media_type.as_deref().map(str::to_lowercase).as_deref(), Some("tv") | Some("tvshow"))
    }

    /// Show name for recent-media rows: the explicit one, else the proper name without its id tag.
    pub fn display_show_name(&self) -> Option<String> {
        self.show_name.clone().or_else(|| self.proper_show_name.as_deref().map(strip_tmdb_tag))
    }
}

pub fn strip_tmdb_tag(name: &str) -> String {
    TMDB_TAG.replace_all(name, "").trim().to_string()
}

pub fn strip_episode_prefix(title: &str) -> String {
    EPISODE_PREFIX.replace(title, "").trim().to_string()
}

/// Splits `"Heat (1995)"` into `("Heat", Some("1995"))`.
pub fn split_name_year(name: &str) -> (String, Option<String>) {
    let cleaned = strip_tmdb_tag(name);
    match NAME_YEAR.captures(&cleaned) {
        Some(caps) => (caps[1].trim().to_string(), Some(caps[2].to_string())),
        None => (cleaned, None),
    }
}

/// The first two components of `destination` below `root`: category and media folder.
pub fn destination_parts(root: &Path, destination: &Path) -> (Option<String>, Option<String>) {
    let Ok(rel) = destination.strip_prefix(root) else {
        return (None, None);
    };
    let mut names = rel.components().filter_map(|c| match c {
        Component::Normal(s) => s.to_str().map(str::to_string),
        _ => None,
    });
    let category = names.next();
    // A bare file directly in the category has no media folder
    let media = names.next().filter(|_| rel.components().count() > 2);
    (category, media)
}

/// Applies pipeline messages to the store and notifies subscribers.
#[derive(Clone)]
pub struct Ingestor {
    store: Store,
    hub: EventHub,
    categories: CategoryCache,
    stats: StatsCache,
    root: PathBuf,
}

impl Ingestor {
    pub fn new(
        store: Store,
        hub: EventHub,
        categories: CategoryCache,
        stats: StatsCache,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self { store, hub, categories, stats, root: root.into() }
    }

    pub async fn apply(&self, message: &BroadcastMessage) {
        if message.kind == kinds::SYMLINK_CREATED {
            self.symlink_created(SymlinkCreated::from_message(message)).await;
        }
    }

    pub async fn symlink_created(&self, ev: SymlinkCreated) {
        let (Some(media_name), Some(media_type)) = (ev.media_name.as_deref(), ev.media_type.as_deref()) else {
            tracing::debug!("symlink_created without media name or type, skipping");
            return;
        };
        let destination = ev.destination_file.clone().unwrap_or_default();
        let (category, media_folder) = destination_parts(&self.root, Path::new(&destination));

        if ev.force_mode {
            self.refresh_folder_mirror(&ev, category.as_deref(), media_folder.as_deref()).await;
        }

        if let Some(source) = ev.source_file.as_deref() {
            self.record_processed(&ev, source, &destination, category.as_deref(), media_name).await;
        }

        let mut recent = RecentMedia {
            name: media_name.to_string(),
            path: destination.clone(),
            folder_name: if ev.is_tv() { "TV Shows" } else { "Movies" }.to_string(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            kind: media_type.to_string(),
            tmdb_id: ev.tmdb_id.clone(),
            filename: ev.filename.clone(),
            ..Default::default()
        };
        if ev.is_tv() {
            recent.season_number = ev.season_number;
            recent.episode_number = ev.episode_number;
            recent.show_name = ev.display_show_name();
            recent.episode_title = ev.episode_title.as_deref().map(strip_episode_prefix);
        }
        match self.store.add_recent_media(&recent).await {
            Ok(()) => {
                self.stats.invalidate();
                self.hub.broadcast(&BroadcastMessage::new(kinds::DASHBOARD_STATS_CHANGED, json!({})));
            }
            Err(e) => tracing::warn!("Failed to record recent media for {}: {}", destination, e),
        }
    }

    async fn refresh_folder_mirror(&self, ev: &SymlinkCreated, category: Option<&str>, media_folder: Option<&str>) {
        let Some(category) = category else {
            tracing::debug!("force_mode link outside the destination root, folder mirror untouched");
            return;
        };
        let category_path = join_api_path("/", category);
        if let Err(e) = self.store.remove_folders_under(&category_path).await {
            tracing::warn!("Failed to invalidate folder cache for {}: {}", category_path, e);
        }
        self.categories.invalidate().await;

        if let Some(folder) = media_folder {
            let row = CachedFolder {
                folder_name: folder.to_string(),
                folder_path: join_api_path(&category_path, folder),
                parent_path: category_path.clone(),
                tmdb_id: ev.tmdb_id.clone(),
                media_type: ev.media_type.clone(),
                last_updated: chrono::Utc::now().to_rfc3339(),
            };
            if let Err(e) = self.store.upsert_folder(&row).await {
                tracing::warn!("Failed to update folder cache for {}: {}", row.folder_path, e);
            }
        }
    }

    async fn record_processed(
        &self,
        ev: &SymlinkCreated,
        source: &str,
        destination: &str,
        category: Option<&str>,
        media_name: &str,
    ) {
        if let Err(e) = self.store.mark_source_status(source, "processed", ev.tmdb_id.as_deref()).await {
            tracing::warn!("Failed to update source status for {}: {}", source, e);
            return;
        }
        let (proper_name, year) = split_name_year(ev.proper_show_name.as_deref().unwrap_or(media_name));
        let file_size = tokio::fs::metadata(destination).await.ok().map(|m| m.len() as i64);
        let row = ProcessedFile {
            file_path: source.to_string(),
            destination_path: Some(destination.to_string()).filter(|d| !d.is_empty()),
            base_path: category.map(str::to_string),
            tmdb_id: ev.tmdb_id.clone(),
            season_number: ev.season_number,
            episode_number: ev.episode_number,
            media_type: ev.media_type.clone(),
            proper_name: Some(proper_name),
            year,
            file_size,
        };
        if let Err(e) = self.store.upsert_processed(&row).await {
            tracing::warn!("Failed to record processed file {}: {}", source, e);
        }
        if row.base_path.is_some() {
            self.categories.invalidate().await;
        }

        self.hub.broadcast(&BroadcastMessage::new(
            kinds::FILE_PROCESSED,
            json!({
                "source_file": source,
                "destination_file": destination,
                "media_name": media_name,
                "media_type": ev.media_type,
                "tmdb_id": ev.tmdb_id,
                "season_number": ev.season_number,
                "filename": ev.filename,
            }),
        ));
    }
}
