use std::path::PathBuf;

use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand, ValueEnum};
use libforester::LockType;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(group(
    ArgGroup::new("color_mode")
        .args(["color", "no_color"])
))]
/// Top-level CLI options for forester.
pub struct Cli {
    /// Repository to operate on (defaults to the nearest .DFM above the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    pub repo_dir: Option<PathBuf>,

    /// User name for commits and locks (defaults to $FORESTER_USER, then config, then the OS user)
    #[arg(long, global = true, value_name = "NAME")]
    pub user: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    pub format: Format,

    /// Enable colored output
    #[arg(long, global = true)]
    pub color: bool,

    /// Disable colored output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// Suppress everything except command output and errors
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, global = true)]
    pub no_prompt: bool,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    /// The primary command to execute.
    pub command: Commands,
}

/// How command results are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Format {
    /// The line-oriented text protocol.
    Text,
    /// One JSON document per command.
    Json,
}

#[derive(Subcommand)]
/// CLI subcommands supported by forester.
pub enum Commands {
    /// Create a new repository
    Init {
        /// Directory to initialize
        path: PathBuf,
    },

    /// Show the working tree state
    Status,

    /// Show commit history
    Log {
        /// Branch to walk (defaults to HEAD)
        branch: Option<String>,

        /// Maximum number of commits to show
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
    },

    /// List, create or delete branches
    Branch {
        /// Branch to create
        #[arg(conflicts_with = "delete")]
        name: Option<String>,

        /// Branch to delete
        #[arg(short = 'd', long = "delete", value_name = "NAME")]
        delete: Option<String>,
    },

    /// Switch to a branch or detach at a commit
    Checkout {
        /// Branch name or commit hash
        target: String,

        /// Discard uncommitted changes to tracked files
        #[arg(long)]
        force: bool,
    },

    /// Stage files for the next commit
    Add {
        /// Files or directories to stage ("." for everything)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Record staged changes, or delete a commit
    Commit(CommitArgs),

    /// Show a commit or stash
    Show {
        /// Commit or stash hash (a unique prefix is enough)
        hash: String,
    },

    /// Remove unreachable objects
    Gc {
        /// Report what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Reflog entries older than this many days stop protecting commits
        #[arg(long, value_name = "DAYS")]
        reflog_expire: Option<u32>,
    },

    /// Regenerate the index database from .DFM
    Rebuild {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Save and restore uncommitted work
    Stash {
        #[command(subcommand)]
        /// Stash action.
        action: StashAction,
    },

    /// Materialize a commit into a scratch directory
    Compare {
        /// Commit to materialize
        hash: String,

        /// Remove the scratch directory instead
        #[arg(long)]
        cleanup: bool,

        /// Editor to open the first .blend file (or the directory) with
        #[arg(long, value_name = "PATH", conflicts_with = "cleanup")]
        editor: Option<PathBuf>,
    },

    /// Manage advisory file locks
    Lock(LockArgs),

    /// List, create or delete tags
    Tag {
        /// Tag to create
        #[arg(conflicts_with = "delete")]
        name: Option<String>,

        /// Commit to tag (defaults to HEAD)
        #[arg(requires = "name")]
        commit: Option<String>,

        /// Tag to delete
        #[arg(long, value_name = "NAME")]
        delete: Option<String>,
    },

    /// Show changes between commits and the working tree
    Diff {
        /// Commit to diff from (defaults to HEAD)
        from: Option<String>,

        /// Commit to diff to (defaults to the working tree)
        to: Option<String>,
    },
}

/// Arguments of `forester commit`.
#[derive(Args)]
pub struct CommitArgs {
    /// Commit message
    #[arg(short, long, required_unless_present = "delete")]
    pub message: Option<String>,

    /// Author name (defaults to the current user)
    #[arg(long)]
    pub author: Option<String>,

    /// Tag the new commit
    #[arg(long)]
    pub tag: Option<String>,

    /// Accepted for compatibility; there are no hooks to skip
    #[arg(long)]
    pub no_verify: bool,

    /// Delete the given commit instead of creating one
    #[arg(long, value_name = "HASH", conflicts_with_all = ["message", "author", "tag"])]
    pub delete: Option<String>,
}

#[derive(Subcommand)]
/// Stash actions.
pub enum StashAction {
    /// Snapshot the working tree and reset it to HEAD
    Save {
        /// Stash message
        message: Option<String>,
    },
    /// List stashes, newest first
    List,
    /// Re-apply a stash and keep it
    Apply {
        /// Stash hash (defaults to the newest)
        hash: Option<String>,
    },
    /// Re-apply a stash and drop it
    Pop {
        /// Stash hash (defaults to the newest)
        hash: Option<String>,
    },
    /// Delete a stash
    Drop {
        /// Stash hash (defaults to the newest)
        hash: Option<String>,
    },
}

/// Arguments of `forester lock`: either a path to lock or a subcommand.
#[derive(Args)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
#[command(group(
    ArgGroup::new("lock_mode")
        .args(["exclusive", "shared"])
))]
pub struct LockArgs {
    #[command(subcommand)]
    /// Lock subcommand.
    pub action: Option<LockAction>,

    /// File to lock
    #[arg(required = true)]
    pub path: Option<PathBuf>,

    /// Take an exclusive lock (the default)
    #[arg(long)]
    pub exclusive: bool,

    /// Take a shared lock
    #[arg(long)]
    pub shared: bool,

    /// Hours until the lock expires (defaults to locks.default_expire_hours)
    #[arg(long, value_name = "HOURS")]
    pub expire: Option<u32>,
}

impl LockArgs {
    /// Requested lock flavour; exclusive unless `--shared` was given.
    pub fn lock_type(&self) -> LockType {
        if self.shared && !self.exclusive {
            LockType::Shared
        } else {
            LockType::Exclusive
        }
    }
}

#[derive(Subcommand)]
/// Lock subcommands.
pub enum LockAction {
    /// Release a lock
    Unlock {
        /// Locked file
        path: PathBuf,

        /// Release a lock held by someone else
        #[arg(long)]
        force: bool,
    },
    /// List active locks on the current branch
    List,
}
