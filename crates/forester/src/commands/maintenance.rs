use std::path::Path;

use anyhow::Result;
use forester_term::Output;
use libforester::{DEFAULT_BRANCH, Repository};
use serde_json::json;

use super::Invocation;
use crate::{
    args::Format,
    ui::{self, emit, lines, require_confirmation},
    utils::absolutize,
};

/// Run the `forester init` command logic.
pub fn init(output: &dyn Output, format: Format, path: &Path) -> Result<()> {
    let root = absolutize(path)?;
    let repo = Repository::init(&root)?;
    if format == Format::Json {
        return ui::json(
            output,
            &json!({ "root": repo.root(), "branch": DEFAULT_BRANCH }),
        );
    }
    emit(output.success(&format!(
        "Initialized empty Forester repository in {}",
        repo.root().display()
    )))
}

/// Run the `forester gc` command logic.
pub fn gc(inv: &Invocation<'_>, dry_run: bool, reflog_expire: Option<u32>) -> Result<()> {
    let spinner = inv.output.spinner("Collecting garbage...");
    let report = inv.repo.gc(dry_run, reflog_expire);
    spinner.finish();
    let report = report?;
    if inv.json() {
        return ui::json(inv.output, &report);
    }

    if report.dry_run {
        emit(inv.output.warn("Dry run: nothing was deleted"))?;
    }
    lines(
        inv.output,
        [
            format!("Commits deleted: {}", report.commits_deleted),
            format!("Trees deleted: {}", report.trees_deleted),
            format!("Blobs deleted: {}", report.blobs_deleted),
            format!("Reflog entries pruned: {}", report.reflog_pruned),
            format!("Missing objects: {}", report.missing_objects),
            format!("Temporary files removed: {}", report.tmp_files_removed),
        ],
    )
}

/// Run the `forester rebuild` command logic.
pub fn rebuild(inv: &Invocation<'_>, yes: bool) -> Result<()> {
    if !yes {
        require_confirmation(
            inv.output,
            "Rebuild the index from the object store? The current index is discarded.",
        )?;
    }

    let spinner = inv.output.spinner("Rebuilding index...");
    let report = inv.repo.rebuild();
    spinner.finish();
    let report = report?;
    if inv.json() {
        return ui::json(inv.output, &report);
    }

    if report.skipped > 0 {
        emit(
            inv.output
                .warn(&format!("Skipped {} unreadable objects", report.skipped)),
        )?;
    }
    emit(inv.output.success(&format!(
        "Rebuilt index: {} commits, {} branches, {} tags, {} stashes, {} reflog entries, {} locks",
        report.commits,
        report.branches,
        report.tags,
        report.stashes,
        report.reflog_entries,
        report.locks
    )))
}

/// Run the `forester compare` command logic.
pub fn compare(
    inv: &Invocation<'_>,
    hash: &str,
    editor: Option<&Path>,
    cleanup: bool,
) -> Result<()> {
    let outcome = inv.repo.compare(hash, editor, cleanup)?;
    if inv.json() {
        return ui::json(inv.output, &outcome);
    }
    if cleanup {
        return emit(
            inv.output
                .success(&format!("Removed {}", outcome.path.display())),
        );
    }
    emit(inv.output.line(&outcome.path.display().to_string()))?;
    if let Some(opened) = &outcome.opened {
        emit(inv.output.message(&format!("Opened {}", opened.display())))?;
    }
    Ok(())
}
