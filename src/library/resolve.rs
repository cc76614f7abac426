use std::fs;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ID_SUFFIX: Regex = Regex::new(r"\s*\{(?:tmdb|imdb|tvdb)-[^}]+\}").expect("valid id suffix regex");
}

/// Removes `{tmdb-..}`, `{imdb-..}` and `{tvdb-..}` annotations from a folder name.
pub fn strip_id_suffix(name: &str) -> String {
    ID_SUFFIX.replace_all(name, "").trim().to_string()
}

/// Maps an API path onto the real directory below `root`.
///
/// Folders on disk usually carry an id suffix (`Heat (1995) {tmdb-949}`) that the
/// UI leaves out. When the plain join does not exist, the path is walked one
/// segment at a time, matching either the exact name or the name without the
/// suffix. On any miss the naive join is returned unchanged so the caller's
/// read fails the normal way.
pub fn resolve_directory(root: &Path, api_path: &str) -> PathBuf {
    let segments: Vec<&str> = api_path.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".").collect();
    let naive = segments.iter().fold(root.to_path_buf(), |acc, s| acc.join(s));
    if naive.exists() {
        return naive;
    }

    let mut current = root.to_path_buf();
    for segment in &segments {
        let exact = current.join(segment);
        if exact.is_dir() {
            current = exact;
            continue;
        }
        match find_decorated_child(&current, segment) {
            Some(found) => current = found,
            None => return naive,
        }
    }
    current
}

fn find_decorated_child(dir: &Path, segment: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        let name = entry.file_name();
        if strip_id_suffix(&name.to_string_lossy()) == segment {
            return Some(entry.path());
        }
    }
    None
}
