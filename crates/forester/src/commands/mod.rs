//! Command implementations. Each renders its result either as the text
//! protocol or as JSON.

use anyhow::Result;
use forester_term::Output;
use libforester::Repository;

use crate::args::{Commands, Format, LockAction, LockArgs, StashAction};

/// Branch and tag commands.
mod branch;
/// Commit creation, deletion and history.
mod history;
/// Advisory lock commands.
mod lock;
/// Repository maintenance: init, gc, rebuild, compare.
mod maintenance;
/// Stash commands.
mod stash;
/// Working-tree commands: status, add, checkout, diff.
mod worktree;

pub use maintenance::init;

/// Everything a command needs to run.
pub struct Invocation<'a> {
    /// The opened repository.
    pub repo: Repository,
    /// Where to render.
    pub output: &'a dyn Output,
    /// Requested output format.
    pub format: Format,
    /// Acting user for commits and locks.
    pub user: String,
}

impl Invocation<'_> {
    /// Whether results should be printed as JSON.
    pub fn json(&self) -> bool {
        self.format == Format::Json
    }
}

/// Run a repository command. `init` is handled before a repository exists.
pub fn dispatch(inv: &Invocation<'_>, command: Commands) -> Result<()> {
    match command {
        Commands::Init { path } => init(inv.output, inv.format, &path),
        Commands::Status => worktree::status(inv),
        Commands::Add { paths } => worktree::add(inv, &paths),
        Commands::Checkout { target, force } => worktree::checkout(inv, &target, force),
        Commands::Diff { from, to } => worktree::diff(inv, from.as_deref(), to.as_deref()),
        Commands::Commit(args) => match &args.delete {
            Some(hash) => history::delete(inv, hash),
            None => history::commit(inv, &args),
        },
        Commands::Log { branch, limit } => history::log(inv, branch.as_deref(), limit),
        Commands::Show { hash } => history::show(inv, &hash),
        Commands::Branch { name, delete } => match (name, delete) {
            (_, Some(name)) => branch::delete_branch(inv, &name),
            (Some(name), None) => branch::create_branch(inv, &name),
            (None, None) => branch::list_branches(inv),
        },
        Commands::Tag {
            name,
            commit,
            delete,
        } => match (name, delete) {
            (_, Some(name)) => branch::delete_tag(inv, &name),
            (Some(name), None) => branch::create_tag(inv, &name, commit.as_deref()),
            (None, None) => branch::list_tags(inv),
        },
        Commands::Stash { action } => match action {
            StashAction::Save { message } => stash::save(inv, message.as_deref()),
            StashAction::List => stash::list(inv),
            StashAction::Apply { hash } => stash::apply(inv, hash.as_deref()),
            StashAction::Pop { hash } => stash::pop(inv, hash.as_deref()),
            StashAction::Drop { hash } => stash::drop(inv, hash.as_deref()),
        },
        Commands::Lock(args) => {
            let lock_type = args.lock_type();
            let LockArgs {
                action,
                path,
                expire,
                ..
            } = args;
            match (action, path) {
                (Some(LockAction::Unlock { path, force }), _) => lock::unlock(inv, &path, force),
                (Some(LockAction::List), _) => lock::list(inv),
                (None, Some(path)) => lock::lock(inv, &path, lock_type, expire),
                (None, None) => anyhow::bail!("A path to lock is required"),
            }
        }
        Commands::Gc {
            dry_run,
            reflog_expire,
        } => maintenance::gc(inv, dry_run, reflog_expire),
        Commands::Rebuild { yes } => maintenance::rebuild(inv, yes),
        Commands::Compare {
            hash,
            cleanup,
            editor,
        } => maintenance::compare(inv, &hash, editor.as_deref(), cleanup),
    }
}
