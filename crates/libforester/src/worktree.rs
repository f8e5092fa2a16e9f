use std::{
    collections::BTreeMap,
    fs,
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};

use glob::Pattern;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{
    error::{ForesterError, Result},
    object::{ObjectKind, ObjectStore},
};

/// Name of the repository metadata directory.
pub const DFM_DIR: &str = ".DFM";

/// Size and modification time of a working file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Length in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the epoch.
    pub mtime_ns: i64,
}

impl FileStat {
    /// Read the stat of a file.
    fn of(meta: &fs::Metadata) -> Self {
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or_default();
        Self {
            size: meta.len(),
            mtime_ns,
        }
    }
}

/// The checked-out files of a repository.
#[derive(Debug, Clone)]
pub struct WorkTree {
    /// Repository root.
    root: PathBuf,
    /// Ignore patterns, matched against every path component.
    ignore: Vec<Pattern>,
}

impl WorkTree {
    /// Create a working tree rooted at `root`. Malformed ignore patterns are
    /// logged and skipped.
    pub fn new(root: &Path, ignore: &[String]) -> Self {
        let ignore = ignore
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!(pattern = %raw, error = %e, "skipping invalid ignore pattern");
                    None
                }
            })
            .collect();
        Self {
            root: root.to_path_buf(),
            ignore,
        }
    }

    /// Whether a single path component is the metadata directory or matches
    /// an ignore pattern.
    fn ignores_component(&self, name: &str) -> bool {
        name == DFM_DIR || self.ignore.iter().any(|pattern| pattern.matches(name))
    }

    /// Whether any component of `rel` is ignored.
    pub fn is_ignored(&self, rel: &str) -> bool {
        rel.split('/').any(|component| self.ignores_component(component))
    }

    /// Every non-ignored regular file, keyed by relative path.
    pub fn scan(&self) -> Result<BTreeMap<String, FileStat>> {
        let mut files = BTreeMap::new();
        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| !self.ignores_component(&entry.file_name().to_string_lossy()));
        for entry in walker {
            let entry = entry.map_err(|e| {
                ForesterError::OperationError(format!("Failed to scan working tree: {e}"))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(rel) = relative_components(&self.root, entry.path()) else {
                continue;
            };
            let meta = entry.metadata().map_err(|e| {
                ForesterError::OperationError(format!(
                    "Failed to stat {}: {e}",
                    entry.path().display()
                ))
            })?;
            files.insert(rel, FileStat::of(&meta));
        }
        debug!(count = files.len(), "scanned working tree");
        Ok(files)
    }

    /// Absolute path of a relative path.
    pub fn absolute(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|c| !c.is_empty())
            .fold(self.root.clone(), |acc, c| acc.join(c))
    }

    /// Normalize a path to a repository-relative `/`-separated string.
    ///
    /// Relative inputs are taken relative to the repository root. The empty
    /// string denotes the root itself. Paths escaping the root or pointing
    /// into `.DFM` are rejected.
    pub fn relative(&self, path: &Path) -> Result<String> {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize(&absolute);
        let rel = relative_components(&self.root, &normalized)
            .or_else(|| {
                let canonical = canonicalize_lenient(&normalized)?;
                relative_components(&self.root, &canonical)
            })
            .ok_or_else(|| ForesterError::PathOutsideRepository(path.to_path_buf()))?;
        if rel.split('/').next() == Some(DFM_DIR) {
            return Err(ForesterError::PathOutsideRepository(path.to_path_buf()));
        }
        Ok(rel)
    }

    /// Write a blob to a relative path, creating parent directories.
    pub fn checkout_file(&self, store: &ObjectStore, rel: &str, hash: &str) -> Result<()> {
        materialize_blob(store, hash, &self.absolute(rel))
    }

    /// Remove a file and any directories left empty by its removal.
    pub fn remove_file(&self, rel: &str) -> Result<()> {
        let path = self.absolute(rel);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let mut dir = path.parent();
        while let Some(current) = dir {
            if current == self.root.as_path() || fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
        Ok(())
    }
}

/// Copy a blob out of the store to `dest`, using a reflink where the
/// filesystem supports it.
pub fn materialize_blob(store: &ObjectStore, hash: &str, dest: &Path) -> Result<()> {
    let source = store.path(ObjectKind::Blob, hash)?;
    if !source.is_file() {
        return Err(ForesterError::MissingObject {
            kind: ObjectKind::Blob.dir_name(),
            hash: hash.to_string(),
        });
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if dest.is_dir() {
        fs::remove_dir_all(dest)?;
    }
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let staging = dest.with_file_name(format!(".{file_name}.forester-tmp"));
    #[allow(clippy::let_underscore_must_use)]
    {
        let _ = fs::remove_file(&staging);
    }
    reflink_copy::reflink_or_copy(&source, &staging).map_err(|e| {
        ForesterError::OperationError(format!("Failed to write {}: {e}", dest.display()))
    })?;
    fs::rename(&staging, dest)?;
    Ok(())
}

/// `path` relative to `root` with `/` separators, if it lies inside it.
fn relative_components(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

/// Resolve `.` and `..` lexically.
fn normalize(path: &Path) -> PathBuf {
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

/// Canonicalize a path whose final component may not exist yet.
fn canonicalize_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Some(canonical);
    }
    let parent = path.parent()?.canonicalize().ok()?;
    Some(parent.join(path.file_name()?))
}
