use std::{io, path::PathBuf, result::Result as StdResult};

use thiserror::Error;

/// Custom Result type for Forester operations.
pub type Result<T> = StdResult<T, ForesterError>;

/// Forester-specific error types.
#[derive(Error, Debug)]
pub enum ForesterError {
    /// No `.DFM` directory was found at or above the given path.
    #[error("Not a Forester repository: {0}")]
    NotARepository(PathBuf),

    /// `init` was run on a directory that already holds a repository.
    #[error("Repository already initialized at {0}")]
    AlreadyInitialized(PathBuf),

    /// A branch or tag name failed validation.
    #[error("Invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Which rule the name broke.
        reason: &'static str,
    },

    /// The branch already exists.
    #[error("Branch '{0}' already exists")]
    BranchExists(String),

    /// The branch does not exist.
    #[error("Branch '{0}' not found")]
    BranchNotFound(String),

    /// The current branch cannot be deleted.
    #[error("Cannot delete branch '{0}': it is the current branch")]
    CannotDeleteCurrent(String),

    /// The last remaining branch cannot be deleted.
    #[error("Cannot delete branch '{0}': it is the last remaining branch")]
    CannotDeleteLast(String),

    /// Commit messages must contain something other than whitespace.
    #[error("Commit message cannot be empty")]
    EmptyMessage,

    /// Nothing is staged and the branch already has commits.
    #[error("Nothing to commit, working tree clean")]
    NothingToCommit,

    /// No commit (or stash) matches the given hash or prefix.
    #[error("Commit not found: {0}")]
    CommitNotFound(String),

    /// A hash prefix matches more than one object.
    #[error("Ambiguous hash prefix '{0}'")]
    AmbiguousHash(String),

    /// The tag name is already in use.
    #[error("Tag '{0}' already exists")]
    TagExists(String),

    /// The tag does not exist.
    #[error("Tag '{0}' not found")]
    TagNotFound(String),

    /// The commit is still referenced by a tag.
    #[error("cannot delete commit {hash} - it is referenced by tag '{tag}'")]
    CommitTagged {
        /// Commit that was going to be deleted.
        hash: String,
        /// Tag pointing at it.
        tag: String,
    },

    /// A commit may carry at most one tag.
    #[error("Commit {hash} is already tagged '{tag}'")]
    CommitAlreadyTagged {
        /// Commit that was going to be tagged.
        hash: String,
        /// Its existing tag.
        tag: String,
    },

    /// The commit is the head of one or more branches and has a parent.
    #[error("cannot delete commit {hash} - it is HEAD of branch '{branch}'")]
    CommitIsBranchHead {
        /// Commit that was going to be deleted.
        hash: String,
        /// First branch whose head is this commit.
        branch: String,
    },

    /// Another commit names this one as its parent.
    #[error("cannot delete commit {hash} - it has child commit {child}")]
    CommitHasChildren {
        /// Commit that was going to be deleted.
        hash: String,
        /// One of the children.
        child: String,
    },

    /// The working tree is dirty and the operation requires a clean one.
    #[error("Uncommitted changes present in repository: {repo_dir}")]
    UncommittedChanges {
        /// Root of the repository with uncommitted changes.
        repo_dir: PathBuf,
    },

    /// A staged path is outside the repository or inside `.DFM`.
    #[error("Path '{0}' is outside the repository working tree")]
    PathOutsideRepository(PathBuf),

    /// A path given to `add` does not exist and was never tracked.
    #[error("Pathspec '{0}' did not match any files")]
    PathNotFound(String),

    /// An advisory lock conflicts with a lock held by someone else.
    #[error("File '{path}' is already locked ({lock_type}) by {user}")]
    LockConflict {
        /// Path of the locked file.
        path: String,
        /// Type of the existing lock.
        lock_type: String,
        /// Holder of the existing lock.
        user: String,
    },

    /// Unlock was attempted on a lock owned by another user.
    #[error("File '{path}' is locked by {user}; use --force to unlock it")]
    LockNotOwned {
        /// Path of the locked file.
        path: String,
        /// Holder of the lock.
        user: String,
    },

    /// No stash entries exist.
    #[error("No stash entries found")]
    NoStashes,

    /// No stash matches the given hash or prefix.
    #[error("Stash not found: {0}")]
    StashNotFound(String),

    /// `stash save` found nothing to stash.
    #[error("No local changes to save")]
    NoLocalChanges,

    /// A freshly computed stash hash is already stored.
    #[error("UNIQUE constraint failed: stashes.hash ({0})")]
    StashCollision(String),

    /// Applying a stash would overwrite diverged working-tree content.
    #[error("Stash apply conflict in: {}", .paths.join(", "))]
    StashConflict {
        /// Paths whose working content diverged from both base and stash.
        paths: Vec<String>,
    },

    /// The compare scratch directory for this commit is already populated.
    #[error("Compare directory already exists: {} (run compare with --cleanup first)", .0.display())]
    CompareExists(PathBuf),

    /// Another process holds the repository mutex.
    #[error("Repository is busy: {holder}")]
    RepositoryBusy {
        /// Description of the holding process.
        holder: String,
    },

    /// The index database is unusable or inconsistent.
    #[error("Index error: {0} (run 'forester rebuild' to repair the index)")]
    Index(String),

    /// A stored object is unreadable or does not match its kind.
    #[error("Corrupt {kind} object {hash}: {message}")]
    CorruptObject {
        /// Object kind directory name.
        kind: &'static str,
        /// Hash of the object.
        hash: String,
        /// What was wrong with it.
        message: String,
    },

    /// A stored object is missing.
    #[error("Missing {kind} object {hash}")]
    MissingObject {
        /// Object kind directory name.
        kind: &'static str,
        /// Hash of the object.
        hash: String,
    },

    /// The repository configuration could not be read or written.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operation was cancelled by the user.
    #[error("Aborted by user")]
    UserAborted,

    /// A high-level operation failed.
    #[error("Operation failed: {0}")]
    OperationError(String),

    /// An underlying I/O operation failed.
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<rusqlite::Error> for ForesterError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Index(err.to_string())
    }
}

impl ForesterError {
    /// Return the recommended process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UserAborted => 130,
            Self::RepositoryBusy { .. } => 4,
            Self::Index(_) | Self::CorruptObject { .. } | Self::MissingObject { .. } => 3,
            Self::BranchExists(_)
            | Self::CannotDeleteCurrent(_)
            | Self::CannotDeleteLast(_)
            | Self::TagExists(_)
            | Self::CommitTagged { .. }
            | Self::CommitAlreadyTagged { .. }
            | Self::CommitIsBranchHead { .. }
            | Self::CommitHasChildren { .. }
            | Self::UncommittedChanges { .. }
            | Self::LockConflict { .. }
            | Self::LockNotOwned { .. }
            | Self::StashCollision(_)
            | Self::StashConflict { .. }
            | Self::CompareExists(_) => 2,
            _ => 1,
        }
    }

    /// Stable machine-readable name for the error, used by the JSON channel.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotARepository(_) => "not_a_repository",
            Self::AlreadyInitialized(_) => "already_initialized",
            Self::InvalidName { .. } => "invalid_name",
            Self::BranchExists(_) => "branch_exists",
            Self::BranchNotFound(_) => "branch_not_found",
            Self::CannotDeleteCurrent(_) => "cannot_delete_current",
            Self::CannotDeleteLast(_) => "cannot_delete_last",
            Self::EmptyMessage => "empty_message",
            Self::NothingToCommit => "nothing_to_commit",
            Self::CommitNotFound(_) => "commit_not_found",
            Self::AmbiguousHash(_) => "ambiguous_hash",
            Self::TagExists(_) => "tag_exists",
            Self::TagNotFound(_) => "tag_not_found",
            Self::CommitTagged { .. } => "commit_tagged",
            Self::CommitAlreadyTagged { .. } => "commit_already_tagged",
            Self::CommitIsBranchHead { .. } => "commit_is_branch_head",
            Self::CommitHasChildren { .. } => "commit_has_children",
            Self::UncommittedChanges { .. } => "uncommitted_changes",
            Self::PathOutsideRepository(_) => "path_outside_repository",
            Self::PathNotFound(_) => "path_not_found",
            Self::LockConflict { .. } => "lock_conflict",
            Self::LockNotOwned { .. } => "lock_not_owned",
            Self::NoStashes => "no_stashes",
            Self::StashNotFound(_) => "stash_not_found",
            Self::NoLocalChanges => "no_local_changes",
            Self::StashCollision(_) => "stash_collision",
            Self::StashConflict { .. } => "stash_conflict",
            Self::CompareExists(_) => "compare_exists",
            Self::RepositoryBusy { .. } => "repository_busy",
            Self::Index(_) => "index",
            Self::CorruptObject { .. } => "corrupt_object",
            Self::MissingObject { .. } => "missing_object",
            Self::Config(_) => "config",
            Self::UserAborted => "user_aborted",
            Self::OperationError(_) => "operation",
            Self::IoError(_) => "io",
        }
    }
}
