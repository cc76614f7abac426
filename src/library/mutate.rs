use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum MutateError {
    #[error("{0}")]
    InvalidPath(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
}

/// A path that was removed, both as filesystem path and as API path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub input: String,
    pub abs_path: PathBuf,
    pub api_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renamed {
    pub old_abs: PathBuf,
    pub new_abs: PathBuf,
    pub old_api: String,
    pub new_api: String,
    pub new_name: String,
}

#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub removed: Vec<Removed>,
    pub errors: Vec<String>,
}

/// Collapses `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn has_parent_segment(input: &str) -> bool {
    input.split(['/', '\\']).any(|s| s == "..")
}

/// Delete and rename confined to the destination root.
#[derive(Debug, Clone)]
pub struct SafeMutator {
    root: PathBuf,
}

impl SafeMutator {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref();
        let root = if root.is_absolute() { root.to_path_buf() } else { std::env::current_dir()?.join(root) };
        Ok(Self { root: lexical_normalize(&root) })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validates user input and maps it to an absolute path strictly below the root.
    pub fn resolve_target(&self, input: &str) -> Result<PathBuf, MutateError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(MutateError::InvalidPath("Path is required".into()));
        }
        if trimmed.contains('\0') {
            return Err(MutateError::InvalidPath("Path contains null characters".into()));
        }
        if has_parent_segment(trimmed) {
            return Err(MutateError::InvalidPath(format!("Invalid path: {}", trimmed)));
        }

        let candidate = Path::new(trimmed);
        let target = if candidate.is_absolute() {
            let abs = lexical_normalize(candidate);
            if !abs.starts_with(&self.root) {
                return Err(MutateError::InvalidPath("Path outside destination directory".into()));
            }
            abs
        } else {
            let cleaned = lexical_normalize(candidate);
            if cleaned.as_os_str().is_empty() {
                return Err(MutateError::InvalidPath(format!("Invalid path: {}", trimmed)));
            }
            let joined = lexical_normalize(&self.root.join(cleaned));
            if !joined.starts_with(&self.root) {
                return Err(MutateError::InvalidPath("Path outside destination directory".into()));
            }
            joined
        };

        if target == self.root {
            return Err(MutateError::InvalidPath("Refusing to modify the destination root".into()));
        }
        Ok(target)
    }

    /// `/a/b` form of a path below the root.
    pub fn api_path(&self, abs: &Path) -> String {
        let rel = abs.strip_prefix(&self.root).unwrap_or(abs);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    pub fn delete(&self, input: &str) -> Result<Removed, MutateError> {
        let target = self.resolve_target(input)?;
        let meta = match fs::symlink_metadata(&target) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(MutateError::NotFound(format!("File or directory not found: {}", input.trim())));
            }
            Err(e) => return Err(e.into()),
        };

        if meta.is_dir() {
            fs::remove_dir_all(&target)?;
        } else {
            fs::remove_file(&target)?;
        }
        tracing::info!("Deleted {}", target.display());

        if let Some(parent) = target.parent() {
            self.remove_empty_ancestors(parent);
        }

        Ok(Removed { input: input.trim().to_string(), api_path: self.api_path(&target), abs_path: target })
    }

    /// Deletes every path, collecting per-path errors instead of stopping.
    pub fn delete_many(&self, inputs: &[String]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for input in inputs {
            match self.delete(input) {
                Ok(removed) => outcome.removed.push(removed),
                Err(e) => {
                    tracing::warn!("Bulk delete failed for {}: {}", input, e);
                    outcome.errors.push(format!("{}: {}", input, e));
                }
            }
        }
        outcome
    }

    /// Removes now-empty directories upward from `start`, never the root itself.
    pub fn remove_empty_ancestors(&self, start: &Path) {
        let mut current = start.to_path_buf();
        loop {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            let is_empty = match fs::read_dir(&current) {
                Ok(mut entries) => entries.next().is_none(),
                Err(_) => false,
            };
            if !is_empty {
                break;
            }
            if let Err(e) = fs::remove_dir(&current) {
                tracing::warn!("Failed to remove empty directory {}: {}", current.display(), e);
                break;
            }
            tracing::debug!("Removed empty directory {}", current.display());
            match current.parent() {
                Some(parent) if parent != current => current = parent.to_path_buf(),
                _ => break,
            }
        }
    }

    pub fn rename(&self, old_path: &str, new_name: &str) -> Result<Renamed, MutateError> {
        let old_abs = self.resolve_target(old_path)?;
        let new_name = new_name.trim();
        let mut parts = Path::new(new_name).components();
        let single_component = matches!((parts.next(), parts.next()), (Some(Component::Normal(_)), None));
        if new_name.is_empty() || new_name.contains(['/', '\\', '\0']) || !single_component {
            return Err(MutateError::InvalidPath(format!("Invalid name: {}", new_name)));
        }

        if fs::symlink_metadata(&old_abs).is_err() {
            return Err(MutateError::NotFound(format!("File or directory not found: {}", old_path.trim())));
        }
        let parent = old_abs.parent().unwrap_or(&self.root);
        let new_abs = parent.join(new_name);
        if !new_abs.starts_with(&self.root) {
            return Err(MutateError::InvalidPath("Path outside destination directory".into()));
        }
        if fs::symlink_metadata(&new_abs).is_ok() {
            return Err(MutateError::Conflict("Target already exists".into()));
        }

        fs::rename(&old_abs, &new_abs)?;
        tracing::info!("Renamed {} -> {}", old_abs.display(), new_abs.display());

        Ok(Renamed {
            old_api: self.api_path(&old_abs),
            new_api: self.api_path(&new_abs),
            new_name: new_name.to_string(),
            old_abs,
            new_abs,
        })
    }
}
