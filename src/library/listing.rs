//! Cache-first directory listings.
//!
//! A listing combines folder rows from the library mirror with a live
//! `read_dir` of the resolved directory, filters and sorts the result, slices
//! out one page and only then enriches that page with TMDB metadata.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::categories::CategoryCache;
use super::resolve::resolve_directory;
use super::{file_icon, format_file_size, is_season_folder, join_api_path, normalize_api_path, rfc3339};
use crate::metadata::MetadataGateway;
use crate::store::Store;
use crate::types::{CachedFolder, DirectoryEntry, EntryKind};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;
/// Upper bound of folder rows pulled from the cache for one directory.
pub const CACHE_FETCH_LIMIT: u32 = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum ListingError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Directory not found: {0}")]
    NotFound(String),
    #[error("Failed to read directory: {0}")]
    Io(#[from] io::Error),
    #[error("directory scan task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Pagination and filter parameters of a listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub letter: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self { page: DEFAULT_PAGE, limit: DEFAULT_LIMIT, search: None, letter: None }
    }
}

impl ListQuery {
    /// Lenient parsing: invalid or out-of-range numbers fall back to the defaults,
    /// blank filters are ignored.
    pub fn from_raw(page: Option<&str>, limit: Option<&str>, search: Option<&str>, letter: Option<&str>) -> Self {
        let page = page.and_then(|p| p.trim().parse::<u32>().ok()).filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE);
        let limit = limit
            .and_then(|l| l.trim().parse::<u32>().ok())
            .filter(|l| (1..=MAX_LIMIT).contains(l))
            .unwrap_or(DEFAULT_LIMIT);
        let clean = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);
        Self { page, limit, search: clean(search), letter: clean(letter) }
    }
}

/// Values reported in the `X-*` response headers of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingHeaders {
    pub total: usize,
    pub page: u32,
    pub limit: u32,
    pub has_allowed_extensions: bool,
    pub has_season_folders: bool,
    pub tmdb_id: Option<String>,
    pub media_type: Option<String>,
    pub search_query: Option<String>,
}

impl ListingHeaders {
    pub fn total_pages(&self) -> usize {
        total_pages(self.total, self.limit)
    }

    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("x-total-count", self.total.to_string()),
            ("x-page", self.page.to_string()),
            ("x-limit", self.limit.to_string()),
            ("x-total-pages", self.total_pages().to_string()),
            ("x-has-allowed-extensions", self.has_allowed_extensions.to_string()),
        ];
        if self.has_season_folders {
            out.push(("x-has-season-folders", "true".to_string()));
        }
        if let Some(id) = &self.tmdb_id {
            out.push(("x-tmdb-id", id.clone()));
        }
        if let Some(kind) = &self.media_type {
            out.push(("x-media-type", kind.clone()));
        }
        if let Some(q) = &self.search_query {
            out.push(("x-search-query", q.clone()));
        }
        out
    }
}

#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<DirectoryEntry>,
    pub headers: ListingHeaders,
}

/// One `read_dir` result with metadata already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: String,
}

/// Reads a directory, following symlinks for type and size. Broken links are
/// reported with their own metadata; unreadable entries are skipped.
pub fn scan_directory(dir: &Path) -> io::Result<Vec<LiveEntry>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Skipping unreadable entry in {}: {}", dir.display(), e);
                continue;
            }
        };
        let meta = match fs::metadata(entry.path()).or_else(|_| entry.metadata()) {
            Ok(m) => m,
            Err(_) => continue,
        };
        out.push(LiveEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: meta.len(),
            modified: meta.modified().map(rfc3339).unwrap_or_default(),
        });
    }
    Ok(out)
}

/// Directories first, then case-insensitive name; exact name breaks ties.
pub fn compare_entries(a: &DirectoryEntry, b: &DirectoryEntry) -> Ordering {
    b.is_dir()
        .cmp(&a.is_dir())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
}

pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(compare_entries);
}

/// Slice `[(page-1)*limit, page*limit)` clamped to the input.
pub fn paginate<T>(items: Vec<T>, page: u32, limit: u32) -> Vec<T> {
    let start = (page.max(1) as usize - 1).saturating_mul(limit as usize);
    if start >= items.len() {
        return Vec::new();
    }
    items.into_iter().skip(start).take(limit as usize).collect()
}

pub fn total_pages(total: usize, limit: u32) -> usize {
    if limit == 0 {
        return 0;
    }
    total.div_ceil(limit as usize)
}

/// `#` matches a leading ASCII digit, anything else the first character case-insensitively.
pub fn matches_letter(name: &str, letter: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    if letter == "#" {
        return first.is_ascii_digit();
    }
    let wanted = letter.to_lowercase();
    first.to_lowercase().eq(wanted.chars())
}

pub fn matches_search(name: &str, query: &str) -> bool {
    name.to_lowercase().contains(&query.to_lowercase())
}

fn non_empty(v: &Option<String>) -> Option<String> {
    v.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

fn is_tv(kind: &str) -> bool {
    kind == "tv" || kind == "TV"
}

fn entry_from_cache(folder: &CachedFolder) -> DirectoryEntry {
    let media_type = non_empty(&folder.media_type);
    DirectoryEntry {
        name: folder.folder_name.clone(),
        kind: EntryKind::Directory,
        modified: folder.last_updated.clone(),
        path: folder.folder_path.clone(),
        full_path: Some(folder.folder_path.clone()),
        icon: file_icon(&folder.folder_name, true).to_string(),
        is_season_folder: is_season_folder(&folder.folder_name),
        has_season_folders: media_type.as_deref().is_some_and(is_tv),
        tmdb_id: non_empty(&folder.tmdb_id),
        media_type,
        ..Default::default()
    }
}

struct Pending {
    entry: DirectoryEntry,
    abs_path: PathBuf,
    live_size: Option<u64>,
}

enum CacheRows {
    /// The store already filtered and paginated; `total` is its own count.
    Filtered { rows: Vec<CachedFolder>, total: i64 },
    /// Rows to merge with the live scan and filter in memory.
    Merge(Vec<CachedFolder>),
}

/// Builds directory listings for the destination library.
#[derive(Clone)]
pub struct Lister {
    root: PathBuf,
    store: Store,
    metadata: MetadataGateway,
    categories: CategoryCache,
    allowed_extensions: Arc<Vec<String>>,
}

impl Lister {
    pub fn new(
        root: PathBuf,
        store: Store,
        metadata: MetadataGateway,
        categories: CategoryCache,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self { root, store, metadata, categories, allowed_extensions: Arc::new(allowed_extensions) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn list(&self, raw_path: &str, query: &ListQuery) -> Result<Listing, ListingError> {
        if raw_path.split(['/', '\\']).any(|s| s == "..") {
            return Err(ListingError::InvalidPath(raw_path.to_string()));
        }
        let api_path = normalize_api_path(raw_path);
        let dir = {
            let root = self.root.clone();
            let p = api_path.clone();
            tokio::task::spawn_blocking(move || resolve_directory(&root, &p)).await?
        };
        tracing::debug!("Listing {} (API path {})", dir.display(), api_path);

        let mut headers = ListingHeaders {
            page: query.page,
            limit: query.limit,
            search_query: query.search.clone(),
            ..Default::default()
        };

        let rows = match self.cache_rows(&api_path, query).await {
            Some(rows) => rows,
            None => return Ok(Listing { entries: Vec::new(), headers }),
        };

        let need_live = match &rows {
            CacheRows::Filtered { .. } => false,
            CacheRows::Merge(_) => query.search.is_none(),
        };
        let live = if need_live {
            let cached_empty = matches!(&rows, CacheRows::Merge(r) if r.is_empty());
            let scan_dir = dir.clone();
            match tokio::task::spawn_blocking(move || scan_directory(&scan_dir)).await? {
                Ok(entries) => entries,
                Err(e) if cached_empty => {
                    tracing::warn!("Failed to read directory {}: {}", dir.display(), e);
                    return Err(if e.kind() == io::ErrorKind::NotFound || !dir.is_dir() {
                        ListingError::NotFound(api_path)
                    } else {
                        ListingError::Io(e)
                    });
                }
                Err(e) => {
                    tracing::warn!("Live scan of {} failed, serving cached folders only: {}", dir.display(), e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let categories = self.categories.folders(&self.store).await;
        let dir_name = dir.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
        let current_is_category = !dir_name.is_empty() && categories.contains(&dir_name);

        // Directory level metadata
        let (mut dir_tmdb, mut dir_media) = (None, None);
        if api_path != "/" && !current_is_category {
            match self.store.folder_by_path(&api_path).await {
                Ok(Some(own)) => {
                    dir_tmdb = non_empty(&own.tmdb_id);
                    dir_media = non_empty(&own.media_type);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Folder cache lookup failed for {}: {}", api_path, e),
            }
            if dir_tmdb.is_none() {
                if let CacheRows::Merge(rows) = &rows {
                    if let Some(first) = rows.iter().find(|r| non_empty(&r.tmdb_id).is_some()) {
                        dir_tmdb = non_empty(&first.tmdb_id);
                        dir_media = non_empty(&first.media_type);
                    }
                }
            }
            if dir_tmdb.is_some() {
                headers.tmdb_id = dir_tmdb.clone();
                headers.media_type = dir_media.clone();
            }
        }

        headers.has_allowed_extensions = !self.allowed_extensions.is_empty()
            && live.iter().filter(|e| !e.is_dir).any(|e| {
                let lower = e.name.to_lowercase();
                self.allowed_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
            });

        if !live.is_empty() && live.iter().all(|e| e.is_dir && is_season_folder(&e.name)) {
            headers.has_season_folders = true;
            if dir_media.is_none() {
                dir_media = Some("tv".to_string());
                headers.media_type = dir_media.clone();
            }
        }

        let (cached, store_total) = match rows {
            CacheRows::Filtered { rows, total } => (rows, Some(total.max(0) as usize)),
            CacheRows::Merge(rows) => (rows, None),
        };

        let mut pending: Vec<Pending> = Vec::with_capacity(cached.len() + live.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(cached.len());
        for folder in &cached {
            seen.insert(folder.folder_name.clone());
            pending.push(Pending { entry: entry_from_cache(folder), abs_path: dir.join(&folder.folder_name), live_size: None });
        }
        for live_entry in live {
            if live_entry.is_dir && seen.contains(&live_entry.name) {
                continue;
            }
            let path = join_api_path(&api_path, &live_entry.name);
            let entry = DirectoryEntry {
                kind: if live_entry.is_dir { EntryKind::Directory } else { EntryKind::File },
                modified: live_entry.modified,
                full_path: Some(path.clone()),
                path,
                icon: file_icon(&live_entry.name, live_entry.is_dir).to_string(),
                is_season_folder: live_entry.is_dir && is_season_folder(&live_entry.name),
                name: live_entry.name.clone(),
                ..Default::default()
            };
            pending.push(Pending {
                entry,
                abs_path: dir.join(&live_entry.name),
                live_size: (!live_entry.is_dir).then_some(live_entry.size),
            });
        }

        if store_total.is_none() {
            if let Some(q) = &query.search {
                pending.retain(|p| matches_search(&p.entry.name, q));
            }
            if let Some(letter) = &query.letter {
                pending.retain(|p| matches_letter(&p.entry.name, letter));
            }
        }

        pending.sort_by(|a, b| compare_entries(&a.entry, &b.entry));
        let (total, page) = match store_total {
            Some(total) => (total, pending),
            None => {
                let total = pending.len();
                (total, paginate(pending, query.page, query.limit))
            }
        };
        headers.total = total;

        let mut entries = Vec::with_capacity(page.len());
        for item in page {
            entries.push(self.finish_entry(item, &categories, dir_tmdb.as_deref()).await);
        }

        Ok(Listing { entries, headers })
    }

    /// Folder-cache rows for the request mode. `None` means a failed search,
    /// which yields an empty listing instead of a scan.
    async fn cache_rows(&self, api_path: &str, query: &ListQuery) -> Option<CacheRows> {
        if let Some(search) = &query.search {
            return match self.store.search_folders(api_path, search, query.page, query.limit).await {
                Ok((rows, total)) => Some(CacheRows::Filtered { rows, total }),
                Err(e) => {
                    tracing::warn!("Folder search failed for {:?} under {}: {}", search, api_path, e);
                    None
                }
            };
        }

        if let Some(letter) = &query.letter {
            match self.store.folders_by_letter(api_path, letter, query.page, query.limit).await {
                Ok((rows, total)) if total > 0 => return Some(CacheRows::Filtered { rows, total }),
                Ok(_) => {}
                Err(e) => tracing::warn!("Letter lookup failed for {} under {}: {}", letter, api_path, e),
            }
        }

        match self.store.folders_under(api_path, 1, CACHE_FETCH_LIMIT).await {
            Ok((rows, _)) => Some(CacheRows::Merge(rows)),
            Err(e) => {
                tracing::warn!("Folder cache unavailable for {}: {}", api_path, e);
                Some(CacheRows::Merge(Vec::new()))
            }
        }
    }

    async fn finish_entry(&self, item: Pending, categories: &HashSet<String>, parent_tmdb: Option<&str>) -> DirectoryEntry {
        let Pending { mut entry, abs_path, live_size } = item;

        if entry.is_dir() {
            entry.is_category_folder = categories.contains(&entry.name.to_lowercase());
            if !entry.is_category_folder {
                let record =
                    self.metadata.enrich(entry.tmdb_id.as_deref(), entry.media_type.as_deref(), &entry.name).await;
                if let Some(record) = record {
                    entry.poster_path = record.poster_path.clone();
                    entry.title = record.display_title().map(str::to_string);
                    entry.release_date = record.release_date.clone();
                    entry.first_air_date = record.first_air_date.clone();
                    if entry.media_type.is_none() {
                        if let Some(kind) = record.media_type {
                            entry.has_season_folders |= is_tv(&kind);
                            entry.media_type = Some(kind);
                        }
                    }
                }
            }
            if entry.is_season_folder && entry.tmdb_id.is_none() {
                if let Some(id) = parent_tmdb {
                    entry.tmdb_id = Some(id.to_string());
                    entry.media_type = Some("tv".to_string());
                }
            }
            return entry;
        }

        let processed = match self.store.processed_for_path(&abs_path.to_string_lossy()).await {
            Ok(p) => p.filter(|p| p.file_size.unwrap_or(0) > 0),
            Err(e) => {
                tracing::debug!("Processed file lookup failed for {}: {}", abs_path.display(), e);
                None
            }
        };
        match processed {
            Some(p) => {
                entry.size = Some(format_file_size(p.file_size.unwrap_or(0)));
                entry.source_path = Some(p.file_path);
                entry.destination_path = p.destination_path;
                entry.tmdb_id = non_empty(&p.tmdb_id);
                entry.season_number = p.season_number.filter(|n| *n > 0);
                entry.episode_number = p.episode_number.filter(|n| *n > 0);
            }
            None => entry.size = Some(format_file_size(live_size.unwrap_or(0) as i64)),
        }
        entry
    }
}
