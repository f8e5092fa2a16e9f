#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]
//! Core library for Forester, a content-addressed version-control engine for
//! 3D project files.
//!
//! A repository is a working tree plus a `.DFM` directory holding immutable
//! objects, refs, a reflog, advisory locks and a derived SQLite index. The
//! [`Repository`] type implements every engine operation; the `forester`
//! binary in `crates/forester` exposes them as a text protocol, and
//! [`ForesterClient`] drives that protocol from other programs.

/// Typed client for the `forester` command-line protocol.
pub mod client;
/// Repository configuration file.
mod config;
/// Unified diffs.
mod diff;
/// Error taxonomy and exit codes.
mod error;
/// Reachability marking and sweeping.
mod gc;
/// The derived SQLite index.
mod index;
/// Advisory per-file locks.
mod locks;
/// Cross-process repository mutex.
mod mutex;
/// Content-addressed object storage.
mod object;
/// HEAD, branch and tag refs.
mod refs;
/// Append-only ref history.
mod reflog;
/// High-level repository operations.
mod repository;
/// Stash application planning.
mod stash;
/// Tree objects and flattened file maps.
mod tree;
/// Shared data types.
mod types;
/// Working tree scanning and materialization.
mod worktree;

/// Re-exports of the protocol client and its error.
pub use client::{ClientError, ForesterClient};
/// Re-exports of configuration types.
pub use config::{DEFAULT_IGNORE, RepoConfig, StashConflictPolicy};
/// Re-export of the error type and result alias.
pub use error::{ForesterError, Result};
/// Re-exports of name validation.
pub use refs::{MAX_NAME_LEN, validate_name};
/// Re-export of the main repository type.
pub use repository::{DEFAULT_BRANCH, Repository};
/// Re-exports of the values returned by repository operations.
pub use types::{
    BranchInfo, Commit, CommitDetails, CompareOutcome, FileLock, GcReport, Head, LockType,
    LogEntry, ObjectType, RebuildReport, ReflogEntry, Stash, TagInfo, UnlockOutcome,
    WorkingStatus,
};
/// Re-export of the metadata directory name.
pub use worktree::DFM_DIR;
