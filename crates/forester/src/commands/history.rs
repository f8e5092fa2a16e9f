use anyhow::Result;

use super::Invocation;
use crate::{
    args::CommitArgs,
    ui::{emit, indented, json, lines, local_time, map_output_error},
};

/// Run the `forester commit` command logic.
pub fn commit(inv: &Invocation<'_>, args: &CommitArgs) -> Result<()> {
    let message = args.message.as_deref().unwrap_or_default();
    let author = args.author.as_deref().unwrap_or(&inv.user);
    let commit = inv
        .repo
        .commit(message, Some(author), args.tag.as_deref(), args.no_verify)?;
    if inv.json() {
        return json(inv.output, &commit);
    }

    let label = commit.branch.as_deref().unwrap_or("detached");
    let subject = commit.message.lines().next().unwrap_or_default();
    emit(
        inv.output
            .line(&format!("[{label} {}] {subject}", commit.hash)),
    )
}

/// Run the `forester commit --delete` command logic.
pub fn delete(inv: &Invocation<'_>, hash: &str) -> Result<()> {
    let commit = inv.repo.delete_commit(hash)?;
    if inv.json() {
        return json(inv.output, &commit);
    }
    emit(inv.output.success(&format!("Deleted commit {}", commit.hash)))
}

/// Run the `forester log` command logic.
pub fn log(inv: &Invocation<'_>, branch: Option<&str>, limit: Option<usize>) -> Result<()> {
    let entries = inv.repo.log(branch, limit)?;
    if inv.json() {
        return json(inv.output, &entries);
    }
    if entries.is_empty() {
        return emit(inv.output.line("No commits yet"));
    }

    let output = inv.output;
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            emit(output.line(""))?;
        }
        emit(output.line(&format!("commit {}", entry.commit.hash)))?;
        if entry.is_head {
            emit(output.line("HEAD: true"))?;
        }
        emit(output.line(&format!("Author: {}", entry.commit.author)))?;
        emit(output.line(&format!("Date:   {}", local_time(entry.commit.timestamp))))?;
        if let Some(tag) = &entry.tag {
            emit(output.line(&format!("Tag:    {tag}")))?;
        }
        emit(output.line(""))?;
        lines(output, indented(&entry.commit.message))?;
    }
    Ok(())
}

/// Run the `forester show` command logic.
pub fn show(inv: &Invocation<'_>, hash: &str) -> Result<()> {
    let details = inv.repo.show(hash)?;
    if inv.json() {
        return json(inv.output, &details);
    }

    let output = inv.output;
    emit(output.line(&format!("commit {}", details.hash)))?;
    emit(output.line(&format!("Author: {}", details.author)))?;
    emit(output.line(&format!("Date:   {}", local_time(details.timestamp))))?;
    if let Some(parent) = &details.parent {
        emit(output.line(&format!("Parent: {parent}")))?;
    }
    emit(output.line(&format!("Tree:   {}", details.tree)))?;
    emit(output.line(&format!("Type:   {}", details.object_type)))?;
    let files = output.section("Files:").map_err(map_output_error)?;
    lines(files.as_ref(), &details.files)?;
    emit(output.line(""))?;
    lines(output, indented(&details.message))
}

