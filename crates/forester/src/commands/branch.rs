use anyhow::Result;

use super::Invocation;
use crate::ui::{emit, json};

/// Run the `forester branch` listing logic.
pub fn list_branches(inv: &Invocation<'_>) -> Result<()> {
    let branches = inv.repo.branches()?;
    if inv.json() {
        return json(inv.output, &branches);
    }
    for branch in branches {
        let marker = if branch.is_current { '*' } else { ' ' };
        emit(inv.output.line(&format!("{marker} {}", branch.name)))?;
    }
    Ok(())
}

/// Run the `forester branch <name>` command logic.
pub fn create_branch(inv: &Invocation<'_>, name: &str) -> Result<()> {
    let branch = inv.repo.create_branch(name)?;
    if inv.json() {
        return json(inv.output, &branch);
    }
    emit(inv.output.success(&format!("Created branch '{name}'")))
}

/// Run the `forester branch -d <name>` command logic.
pub fn delete_branch(inv: &Invocation<'_>, name: &str) -> Result<()> {
    inv.repo.delete_branch(name)?;
    if inv.json() {
        return json(inv.output, &serde_json::json!({ "deleted": name }));
    }
    emit(inv.output.success(&format!("Deleted branch '{name}'")))
}

/// Run the `forester tag` listing logic.
pub fn list_tags(inv: &Invocation<'_>) -> Result<()> {
    let tags = inv.repo.tags()?;
    if inv.json() {
        return json(inv.output, &tags);
    }
    for tag in tags {
        emit(inv.output.line(&tag.name))?;
    }
    Ok(())
}

/// Run the `forester tag <name> [commit]` command logic.
pub fn create_tag(inv: &Invocation<'_>, name: &str, commit: Option<&str>) -> Result<()> {
    let tag = inv.repo.create_tag(name, commit)?;
    if inv.json() {
        return json(inv.output, &tag);
    }
    emit(
        inv.output
            .success(&format!("Tagged {} as '{}'", tag.commit, tag.name)),
    )
}

/// Run the `forester tag --delete <name>` command logic.
pub fn delete_tag(inv: &Invocation<'_>, name: &str) -> Result<()> {
    inv.repo.delete_tag(name)?;
    if inv.json() {
        return json(inv.output, &serde_json::json!({ "deleted": name }));
    }
    emit(inv.output.success(&format!("Deleted tag '{name}'")))
}
