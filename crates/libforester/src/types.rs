use std::{fmt, path::PathBuf, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// File contents.
    Blob,
    /// Subdirectory.
    Tree,
}

/// One named child of a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// File or directory name, without separators.
    pub name: String,
    /// Whether the entry is a file or a directory.
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Hash of the referenced blob or tree.
    pub hash: String,
}

/// A directory listing. Entries are kept sorted by name so equal directories
/// serialize to equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Children, sorted by name.
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree, sorting the entries into canonical order.
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Self { entries }
    }
}

/// Stored form of a commit; its canonical JSON is what gets hashed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitObject {
    /// Parent commit, absent for a root commit.
    pub parent: Option<String>,
    /// Root tree.
    pub tree: String,
    /// Author name.
    pub author: String,
    /// Trimmed commit message.
    pub message: String,
    /// Tag given at commit time.
    pub tag: Option<String>,
    /// Branch the commit was made on, absent when detached.
    pub branch: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// A commit together with its hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Content hash of the commit object.
    pub hash: String,
    /// Parent commit, absent for a root commit.
    pub parent: Option<String>,
    /// Root tree.
    pub tree: String,
    /// Author name.
    pub author: String,
    /// Commit message.
    pub message: String,
    /// Tag given when the commit was created. Part of the hashed object, so
    /// it outlives a later `tag -d`; [`LogEntry::tag`] is the live tag.
    pub tag: Option<String>,
    /// Branch the commit was made on.
    pub branch: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Commit {
    /// Attach a hash to a stored commit object.
    pub(crate) fn from_object(hash: String, object: CommitObject) -> Self {
        Self {
            hash,
            parent: object.parent,
            tree: object.tree,
            author: object.author,
            message: object.message,
            tag: object.tag,
            branch: object.branch,
            timestamp: object.timestamp,
        }
    }
}

/// Stored form of a stash snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashObject {
    /// Commit the snapshot was taken against.
    pub base: Option<String>,
    /// Tree holding the full working-tree snapshot.
    pub tree: String,
    /// Branch that was current when saving.
    pub branch: Option<String>,
    /// Description.
    pub message: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Random salt keeping simultaneous stashes distinct.
    pub nonce: u64,
}

/// A saved stash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stash {
    /// Content hash of the stash object.
    pub hash: String,
    /// Commit the snapshot was taken against.
    pub base: Option<String>,
    /// Snapshot tree.
    pub tree: String,
    /// Branch that was current when saving.
    pub branch: Option<String>,
    /// Description.
    pub message: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Stash {
    /// Attach a hash to a stored stash object.
    pub(crate) fn from_object(hash: String, object: StashObject) -> Self {
        Self {
            hash,
            base: object.base,
            tree: object.tree,
            branch: object.branch,
            message: object.message,
            timestamp: object.timestamp,
        }
    }
}

/// Where `HEAD` points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "target", rename_all = "lowercase")]
pub enum Head {
    /// Attached to a branch.
    Branch(String),
    /// Detached at a commit.
    Detached(String),
}

impl Head {
    /// Name of the current branch, if attached.
    pub fn branch(&self) -> Option<&str> {
        match self {
            Self::Branch(name) => Some(name),
            Self::Detached(_) => None,
        }
    }
}

/// A branch and its head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    /// Branch name.
    pub name: String,
    /// Head commit; `None` for an orphan branch.
    pub head: Option<String>,
    /// Whether `HEAD` is attached to this branch.
    pub is_current: bool,
}

/// A tag and the commit it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInfo {
    /// Tag name.
    pub name: String,
    /// Tagged commit.
    pub commit: String,
}

/// One recorded ref movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflogEntry {
    /// `HEAD`, a branch name, or `stash`.
    pub ref_name: String,
    /// Previous target.
    pub old_hash: Option<String>,
    /// New target.
    pub new_hash: Option<String>,
    /// When the movement happened.
    pub timestamp: DateTime<Utc>,
    /// What caused it, e.g. `commit: fix uv seams`.
    pub message: String,
}

/// Advisory lock flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    /// Blocks every other lock on the file.
    Exclusive,
    /// Coexists with other shared locks.
    Shared,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exclusive => write!(f, "exclusive"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

impl FromStr for LockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exclusive" => Ok(Self::Exclusive),
            "shared" => Ok(Self::Shared),
            other => Err(format!("unknown lock type '{other}'")),
        }
    }
}

/// An advisory lock on one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLock {
    /// Repository-relative path with `/` separators.
    pub file_path: String,
    /// Exclusive or shared.
    pub lock_type: LockType,
    /// Holder.
    pub user: String,
    /// Branch the lock applies to.
    pub branch: String,
    /// When the lock was taken or last refreshed.
    pub created_at: DateTime<Utc>,
    /// When the lock lapses; `None` never lapses.
    pub expires_at: Option<DateTime<Utc>>,
}

impl FileLock {
    /// Whether the lock is still in force at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|expiry| expiry > now)
    }
}

/// Result of an unlock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The caller's lock (or a forced one) was removed.
    Released(FileLock),
    /// There was no active lock on the path.
    NotLocked,
}

/// Working tree state relative to `HEAD` and the staging area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkingStatus {
    /// Where `HEAD` points.
    pub head: Head,
    /// Current head commit, if any.
    pub head_commit: Option<String>,
    /// Staged paths.
    pub staged: Vec<String>,
    /// Tracked paths whose content changed and is not staged.
    pub modified: Vec<String>,
    /// Tracked paths missing from disk and not staged.
    pub deleted: Vec<String>,
    /// Paths neither tracked nor staged.
    pub untracked: Vec<String>,
}

impl WorkingStatus {
    /// Whether there is nothing staged, changed or untracked.
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.untracked.is_empty()
    }
}

/// A commit as listed by `log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// The commit itself.
    pub commit: Commit,
    /// Whether the commit is the head of the walked branch.
    pub is_head: bool,
    /// Live tag pointing at the commit.
    pub tag: Option<String>,
}

/// Whether `show` found a commit or a stash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    /// A regular commit.
    Commit,
    /// A stash snapshot.
    Stash,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Stash => write!(f, "stash"),
        }
    }
}

/// Details printed by `show`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitDetails {
    /// Full hash.
    pub hash: String,
    /// Commit or stash.
    pub object_type: ObjectType,
    /// Author, or the stash's branch owner.
    pub author: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Parent commit, or the stash base.
    pub parent: Option<String>,
    /// Root tree.
    pub tree: String,
    /// Flattened file list.
    pub files: Vec<String>,
    /// Message.
    pub message: String,
}

/// Counts produced by a GC run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Unreachable commits removed (or that would be removed).
    pub commits_deleted: usize,
    /// Unreachable trees removed.
    pub trees_deleted: usize,
    /// Unreachable blobs removed.
    pub blobs_deleted: usize,
    /// Expired reflog entries dropped.
    pub reflog_pruned: usize,
    /// Referenced objects that were missing or unreadable.
    pub missing_objects: usize,
    /// Stale temp files removed.
    pub tmp_files_removed: usize,
    /// Whether nothing was actually deleted.
    pub dry_run: bool,
}

/// Counts produced by an index rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    /// Commits indexed.
    pub commits: usize,
    /// Branches indexed.
    pub branches: usize,
    /// Tags indexed.
    pub tags: usize,
    /// Stashes indexed.
    pub stashes: usize,
    /// Reflog entries indexed.
    pub reflog_entries: usize,
    /// Locks indexed.
    pub locks: usize,
    /// Objects that could not be parsed and were skipped.
    pub skipped: usize,
}

/// Result of materializing a commit for comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompareOutcome {
    /// Scratch directory holding the commit's files.
    pub path: PathBuf,
    /// File handed to the editor, if one was launched.
    pub opened: Option<PathBuf>,
}
