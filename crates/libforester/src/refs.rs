use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    process,
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::info;

use crate::{
    error::{ForesterError, Result},
    object::is_full_hash,
    types::Head,
};

/// Maximum length of a branch or tag name.
pub const MAX_NAME_LEN: usize = 255;

/// Substrings that may not appear in a branch or tag name.
const FORBIDDEN: [&str; 9] = ["..", "~", "^", ":", "?", "*", "[", "\\", "/"];

/// Prefix of an attached `HEAD` file.
const HEAD_REF_PREFIX: &str = "ref: ";

/// Check a branch or tag name.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(ForesterError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.trim().is_empty() {
        return invalid("name cannot be empty");
    }
    if name.chars().count() > MAX_NAME_LEN {
        return invalid("name is longer than 255 characters");
    }
    if FORBIDDEN.iter().any(|bad| name.contains(bad)) {
        return invalid("name contains a forbidden sequence (.. ~ ^ : ? * [ \\ /)");
    }
    if name.starts_with(['.', ' ']) || name.ends_with(['.', ' ']) {
        return invalid("name cannot start or end with '.' or a space");
    }
    if name.chars().any(char::is_control) {
        return invalid("name cannot contain control characters");
    }
    Ok(())
}

/// Write `contents` to `path` through a sibling temp file and a rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| ForesterError::OperationError(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(parent)?;
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}-{nonce}.tmp", process::id()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        #[allow(clippy::let_underscore_must_use)]
        {
            let _ = fs::remove_file(&tmp);
        }
        return Err(e.into());
    }
    Ok(())
}

/// File-backed refs: `HEAD`, `refs/heads/*` and `refs/tags/*`.
#[derive(Debug, Clone)]
pub struct RefStore {
    /// The `.DFM` directory.
    dfm_dir: PathBuf,
}

impl RefStore {
    /// Create a ref store for the given `.DFM` directory.
    pub fn new(dfm_dir: &Path) -> Self {
        Self {
            dfm_dir: dfm_dir.to_path_buf(),
        }
    }

    /// Create `refs/heads` and `refs/tags`.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.heads_dir())?;
        fs::create_dir_all(self.tags_dir())?;
        Ok(())
    }

    /// Directory of branch files.
    fn heads_dir(&self) -> PathBuf {
        self.dfm_dir.join("refs").join("heads")
    }

    /// Directory of tag files.
    fn tags_dir(&self) -> PathBuf {
        self.dfm_dir.join("refs").join("tags")
    }

    /// File of a branch. Names that fail validation never exist.
    fn branch_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name).map_err(|_| ForesterError::BranchNotFound(name.to_string()))?;
        Ok(self.heads_dir().join(name))
    }

    /// File of a tag. Names that fail validation never exist.
    fn tag_path(&self, name: &str) -> Result<PathBuf> {
        validate_name(name).map_err(|_| ForesterError::TagNotFound(name.to_string()))?;
        Ok(self.tags_dir().join(name))
    }

    /// Read `HEAD`.
    pub fn head(&self) -> Result<Head> {
        let path = self.dfm_dir.join("HEAD");
        let contents = fs::read_to_string(&path)?;
        let contents = contents.trim();
        if let Some(branch) = contents.strip_prefix(HEAD_REF_PREFIX) {
            return Ok(Head::Branch(branch.trim().to_string()));
        }
        if is_full_hash(contents) {
            return Ok(Head::Detached(contents.to_string()));
        }
        Err(ForesterError::CorruptObject {
            kind: "ref",
            hash: "HEAD".to_string(),
            message: format!("unrecognized contents '{contents}'"),
        })
    }

    /// Point `HEAD` at a branch or a commit.
    pub fn set_head(&self, head: &Head) -> Result<()> {
        let contents = match head {
            Head::Branch(name) => format!("{HEAD_REF_PREFIX}{name}\n"),
            Head::Detached(hash) => format!("{hash}\n"),
        };
        write_atomic(&self.dfm_dir.join("HEAD"), contents.as_bytes())?;
        info!(?head, "moved HEAD");
        Ok(())
    }

    /// Whether a branch file exists.
    pub fn branch_exists(&self, name: &str) -> bool {
        self.branch_path(name).is_ok_and(|path| path.is_file())
    }

    /// Head of a branch; `None` for an orphan.
    pub fn read_branch(&self, name: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.branch_path(name)?) {
            Ok(contents) => Ok(parse_target(&contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ForesterError::BranchNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create or move a branch.
    pub fn write_branch(&self, name: &str, head: Option<&str>) -> Result<()> {
        let contents = head.map(|h| format!("{h}\n")).unwrap_or_default();
        write_atomic(&self.branch_path(name)?, contents.as_bytes())?;
        info!(branch = name, head = head.unwrap_or("<orphan>"), "updated branch");
        Ok(())
    }

    /// Remove a branch file.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.branch_path(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ForesterError::BranchNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every branch and its head, ordered by name.
    pub fn branches(&self) -> Result<Vec<(String, Option<String>)>> {
        let mut branches = Vec::new();
        for name in list_names(&self.heads_dir())? {
            let head = self.read_branch(&name)?;
            branches.push((name, head));
        }
        Ok(branches)
    }

    /// Whether a tag file exists.
    pub fn tag_exists(&self, name: &str) -> bool {
        self.tag_path(name).is_ok_and(|path| path.is_file())
    }

    /// Commit named by a tag.
    pub fn read_tag(&self, name: &str) -> Result<String> {
        match fs::read_to_string(self.tag_path(name)?) {
            Ok(contents) => parse_target(&contents).ok_or_else(|| ForesterError::CorruptObject {
                kind: "ref",
                hash: format!("refs/tags/{name}"),
                message: "tag file is empty".to_string(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ForesterError::TagNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create a tag.
    pub fn write_tag(&self, name: &str, commit: &str) -> Result<()> {
        write_atomic(&self.tag_path(name)?, format!("{commit}\n").as_bytes())?;
        info!(tag = name, %commit, "created tag");
        Ok(())
    }

    /// Remove a tag.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.tag_path(name)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ForesterError::TagNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Every tag and its commit, ordered by name.
    pub fn tags(&self) -> Result<Vec<(String, String)>> {
        let mut tags = Vec::new();
        for name in list_names(&self.tags_dir())? {
            tags.push((name.clone(), self.read_tag(&name)?));
        }
        Ok(tags)
    }
}

/// Parse the body of a ref file.
fn parse_target(contents: &str) -> Option<String> {
    let trimmed = contents.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Sorted file names in a ref directory, skipping temp files.
fn list_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_file() && !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn name_validation() {
        for good in ["main", "feature-x", "v1.0", "look_dev"] {
            assert!(validate_name(good).is_ok(), "{good} should be valid");
        }
        for bad in [
            "", "   ", "a..b", "a~b", "a^b", "a:b", "a?b", "a*b", "a[b", "a\\b", "a/b", ".hidden",
            "trailing.", " lead", "tail ", "bell\u{7}",
        ] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn head_round_trip() {
        let tmp = tempdir().unwrap();
        let refs = RefStore::new(tmp.path());
        refs.ensure_layout().unwrap();

        refs.set_head(&Head::Branch("main".to_string())).unwrap();
        assert_eq!(refs.head().unwrap(), Head::Branch("main".to_string()));

        let hash = "a".repeat(64);
        refs.set_head(&Head::Detached(hash.clone())).unwrap();
        assert_eq!(refs.head().unwrap(), Head::Detached(hash));
    }

    #[test]
    fn orphan_branches_have_no_head() {
        let tmp = tempdir().unwrap();
        let refs = RefStore::new(tmp.path());
        refs.ensure_layout().unwrap();

        refs.write_branch("main", None).unwrap();
        refs.write_branch("dev", Some(&"b".repeat(64))).unwrap();

        assert_eq!(refs.read_branch("main").unwrap(), None);
        assert_eq!(
            refs.branches().unwrap(),
            vec![
                ("dev".to_string(), Some("b".repeat(64))),
                ("main".to_string(), None)
            ]
        );
        assert!(matches!(
            refs.read_branch("nope"),
            Err(ForesterError::BranchNotFound(_))
        ));
    }

    #[test]
    fn tags_are_listed_by_name() {
        let tmp = tempdir().unwrap();
        let refs = RefStore::new(tmp.path());
        refs.ensure_layout().unwrap();

        refs.write_tag("v2", &"2".repeat(64)).unwrap();
        refs.write_tag("v1", &"1".repeat(64)).unwrap();

        let names: Vec<_> = refs.tags().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["v1", "v2"]);

        refs.delete_tag("v1").unwrap();
        assert!(!refs.tag_exists("v1"));
        assert!(matches!(
            refs.delete_tag("v1"),
            Err(ForesterError::TagNotFound(_))
        ));
    }

    #[test]
    fn escaping_names_never_touch_files_outside_refs() {
        let tmp = tempdir().unwrap();
        let refs = RefStore::new(tmp.path());
        refs.ensure_layout().unwrap();
        refs.set_head(&Head::Branch("main".to_string())).unwrap();
        refs.write_branch("main", None).unwrap();
        refs.write_branch("feature", None).unwrap();

        assert!(!refs.branch_exists("../../HEAD"));
        assert!(!refs.tag_exists("../heads/feature"));
        assert!(matches!(
            refs.read_branch("../../HEAD"),
            Err(ForesterError::BranchNotFound(_))
        ));
        assert!(matches!(
            refs.delete_branch("../../HEAD"),
            Err(ForesterError::BranchNotFound(_))
        ));
        assert!(matches!(
            refs.write_branch("../tags/evil", None),
            Err(ForesterError::BranchNotFound(_))
        ));
        assert!(matches!(
            refs.read_tag("../heads/feature"),
            Err(ForesterError::TagNotFound(_))
        ));
        assert!(matches!(
            refs.delete_tag("../heads/feature"),
            Err(ForesterError::TagNotFound(_))
        ));
        assert!(matches!(
            refs.write_tag("../heads/feature", &"c".repeat(64)),
            Err(ForesterError::TagNotFound(_))
        ));

        assert!(tmp.path().join("HEAD").is_file());
        assert_eq!(refs.branches().unwrap().len(), 2);
        assert!(refs.tags().unwrap().is_empty());
    }
}
