use std::path::PathBuf;

use anyhow::Result;
use libforester::Head;
use serde_json::json;

use super::Invocation;
use crate::{
    ui::{emit, json, lines, map_output_error},
    utils::absolutize,
};

/// Run the `forester status` command logic.
pub fn status(inv: &Invocation<'_>) -> Result<()> {
    let status = inv.repo.status()?;
    if inv.json() {
        return json(inv.output, &status);
    }

    let output = inv.output;
    match &status.head {
        Head::Branch(name) => emit(output.line(&format!("On branch {name}")))?,
        Head::Detached(hash) => emit(output.line(&format!("HEAD detached at {hash}")))?,
    }
    match &status.head_commit {
        Some(hash) => emit(output.line(&format!("HEAD: {hash}")))?,
        None => emit(output.line("No commits yet"))?,
    }

    let sections = [
        ("Staged files:", &status.staged),
        ("Modified files:", &status.modified),
        ("Deleted files:", &status.deleted),
        ("Untracked files:", &status.untracked),
    ];
    let mut any = false;
    for (header, paths) in sections {
        if paths.is_empty() {
            continue;
        }
        any = true;
        emit(output.line(""))?;
        let section = output.section(header).map_err(map_output_error)?;
        lines(section.as_ref(), paths)?;
    }
    if !any {
        emit(output.line("Nothing to commit, working tree clean"))?;
    }
    Ok(())
}

/// Run the `forester add` command logic.
pub fn add(inv: &Invocation<'_>, paths: &[PathBuf]) -> Result<()> {
    let paths = paths
        .iter()
        .map(|path| absolutize(path))
        .collect::<Result<Vec<_>>>()?;
    let staged = inv.repo.add(&paths)?;
    if inv.json() {
        return json(inv.output, &staged);
    }
    match staged.len() {
        0 => emit(inv.output.message("Nothing to stage")),
        1 => emit(inv.output.success("Staged 1 path")),
        n => emit(inv.output.success(&format!("Staged {n} paths"))),
    }
}

/// Run the `forester checkout` command logic.
pub fn checkout(inv: &Invocation<'_>, target: &str, force: bool) -> Result<()> {
    let head = inv.repo.checkout(target, force)?;
    if inv.json() {
        return json(inv.output, &head);
    }
    match head {
        Head::Branch(name) => emit(inv.output.success(&format!("Switched to branch '{name}'"))),
        Head::Detached(hash) => emit(inv.output.success(&format!("HEAD is now at {hash}"))),
    }
}

/// Run the `forester diff` command logic.
pub fn diff(inv: &Invocation<'_>, from: Option<&str>, to: Option<&str>) -> Result<()> {
    let text = inv.repo.diff(from, to)?;
    if inv.json() {
        return json(inv.output, &json!({ "diff": text }));
    }
    lines(inv.output, text.lines())
}
