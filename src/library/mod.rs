//! Filesystem side of the media library.
//!
//! - [`resolve`]: API path to on-disk directory, tolerant of `{tmdb-..}` suffixes
//! - [`listing`]: cache-first directory listings with metadata enrichment
//! - [`source`]: browsing of the configured source directories
//! - [`mutate`]: validated delete and rename inside the destination root
//! - [`categories`]: cached set of category folder names

pub mod categories;
pub mod listing;
pub mod mutate;
pub mod resolve;
pub mod source;

use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

pub const MEDIA_EXTENSIONS: [&str; 12] =
    [".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".mpg", ".mpeg", ".3gp", ".ogv"];

/// Human readable size using 1024 based units, e.g. `1.5 MB`.
pub fn format_file_size(size: i64) -> String {
    const UNIT: i64 = 1024;
    if size < UNIT {
        return format!("{} B", size);
    }
    let mut div = UNIT;
    let mut exp = 0usize;
    let mut n = size / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let suffix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", size as f64 / div as f64, suffix)
}

/// Icon name the UI uses for an entry.
pub fn file_icon(name: &str, is_dir: bool) -> &'static str {
    if is_dir {
        return "folder";
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "webm" | "avi" | "mov" | "mkv" => "movie",
        "mp3" | "wav" | "ogg" | "flac" => "music",
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" => "image",
        "pdf" => "pdf",
        "doc" | "docx" | "txt" | "rtf" => "text",
        "xls" | "xlsx" | "csv" => "spreadsheet",
        "ppt" | "pptx" => "presentation",
        "zip" | "rar" | "tar" | "gz" | "7z" => "archive",
        "go" | "js" | "html" | "css" | "py" | "java" | "c" | "cpp" | "php" | "rb" => "code",
        _ => "file",
    }
}

/// `Season 1`, `season 12` ... (case-insensitive, numeric suffix only).
pub fn is_season_folder(name: &str) -> bool {
    let lower = name.to_lowercase();
    match lower.strip_prefix("season ") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

pub fn is_media_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub fn rfc3339(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Normalizes a request path to `/a/b` form (leading slash, no trailing slash, `\` as `/`).
pub fn normalize_api_path(raw: &str) -> String {
    let parts: Vec<&str> = raw.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".").collect();
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

pub fn join_api_path(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent.trim_end_matches('/'), name)
    }
}

pub fn parent_api_path(path: &str) -> String {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

pub fn api_basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}
