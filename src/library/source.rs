//! Browsing of the configured source directories.
//!
//! Files the pipeline already linked into the library are hidden so the view
//! only shows what still needs processing.

use std::path::{Path, PathBuf};

use super::listing::{
    matches_letter, matches_search, paginate, scan_directory, sort_entries, ListQuery, ListingError, ListingHeaders,
};
use super::{file_icon, format_file_size, is_media_file, join_api_path, normalize_api_path, rfc3339};
use crate::store::Store;
use crate::types::{DirectoryEntry, EntryKind};

#[derive(Debug, Clone)]
pub enum SourceListing {
    /// No usable source directory is configured.
    NotConfigured,
    /// Overview of all source roots, returned for `/` when more than one exists.
    Roots { entries: Vec<DirectoryEntry>, directories: Vec<String> },
    Directory { entries: Vec<DirectoryEntry>, headers: ListingHeaders, source_index: usize, source_dir: String },
}

#[derive(Clone)]
pub struct SourceBrowser {
    dirs: Vec<PathBuf>,
    store: Store,
}

impl SourceBrowser {
    pub fn new(dirs: Vec<PathBuf>, store: Store) -> Self {
        Self { dirs, store }
    }

    /// `source` is the raw `?source=` parameter; out-of-range or unparsable values select the first root.
    pub async fn browse(
        &self,
        raw_path: &str,
        query: &ListQuery,
        source: Option<&str>,
    ) -> Result<SourceListing, ListingError> {
        if self.dirs.is_empty() {
            return Ok(SourceListing::NotConfigured);
        }
        if raw_path.split(['/', '\\']).any(|s| s == "..") {
            return Err(ListingError::InvalidPath(raw_path.to_string()));
        }
        let api_path = normalize_api_path(raw_path);
        let requested = source.and_then(|s| s.trim().parse::<usize>().ok()).filter(|i| *i < self.dirs.len());

        if api_path == "/" && requested.unwrap_or(0) == 0 && self.dirs.len() > 1 {
            let dirs = self.dirs.clone();
            let entries = tokio::task::spawn_blocking(move || root_entries(&dirs)).await?;
            return Ok(SourceListing::Roots {
                entries,
                directories: self.dirs.iter().map(|d| d.to_string_lossy().into_owned()).collect(),
            });
        }

        let source_index = requested.unwrap_or(0);
        let source_dir = self.dirs[source_index].clone();
        let dir = api_path.split('/').filter(|s| !s.is_empty()).fold(source_dir.clone(), |acc, s| acc.join(s));
        if !dir.starts_with(&source_dir) {
            return Err(ListingError::InvalidPath(api_path));
        }

        let scan_dir = dir.clone();
        let live = match tokio::task::spawn_blocking(move || scan_directory(&scan_dir)).await? {
            Ok(live) => live,
            Err(e) => {
                tracing::warn!("Failed to read source directory {}: {}", dir.display(), e);
                return Err(if !dir.is_dir() { ListingError::NotFound(api_path) } else { ListingError::Io(e) });
            }
        };

        let processed = match self.store.processed_sources_under(&source_dir.to_string_lossy()).await {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!("Failed to load processed files for {}: {}", source_dir.display(), e);
                Default::default()
            }
        };

        let mut entries: Vec<DirectoryEntry> = live
            .into_iter()
            .filter(|e| !e.name.starts_with('.'))
            .filter(|e| e.is_dir || !processed.contains(dir.join(&e.name).to_string_lossy().as_ref()))
            .map(|e| {
                let path = join_api_path(&api_path, &e.name);
                DirectoryEntry {
                    kind: if e.is_dir { EntryKind::Directory } else { EntryKind::File },
                    size: (!e.is_dir).then(|| format_file_size(e.size as i64)),
                    modified: e.modified,
                    full_path: Some(format!("{}?source={}", path, source_index)),
                    path,
                    icon: file_icon(&e.name, e.is_dir).to_string(),
                    is_source_file: true,
                    is_media_file: !e.is_dir && is_media_file(&e.name),
                    name: e.name,
                    ..Default::default()
                }
            })
            .collect();

        if let Some(q) = &query.search {
            entries.retain(|e| matches_search(&e.name, q));
        }
        if let Some(letter) = &query.letter {
            entries.retain(|e| matches_letter(&e.name, letter));
        }
        sort_entries(&mut entries);

        let headers = ListingHeaders {
            total: entries.len(),
            page: query.page,
            limit: query.limit,
            search_query: query.search.clone(),
            ..Default::default()
        };
        Ok(SourceListing::Directory {
            entries: paginate(entries, query.page, query.limit),
            headers,
            source_index,
            source_dir: source_dir.to_string_lossy().into_owned(),
        })
    }
}

fn root_entries(dirs: &[PathBuf]) -> Vec<DirectoryEntry> {
    dirs.iter()
        .enumerate()
        .filter_map(|(i, dir)| match std::fs::metadata(dir) {
            Ok(meta) => Some(DirectoryEntry {
                name: display_name(dir),
                kind: EntryKind::Directory,
                modified: meta.modified().map(rfc3339).unwrap_or_default(),
                path: dir.to_string_lossy().into_owned(),
                full_path: Some(format!("/?source={}", i)),
                icon: "folder".to_string(),
                is_source_root: true,
                ..Default::default()
            }),
            Err(e) => {
                tracing::warn!("Source directory {} is not accessible: {}", dir.display(), e);
                None
            }
        })
        .collect()
}

fn display_name(dir: &Path) -> String {
    dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| dir.to_string_lossy().into_owned())
}
