use anyhow::Result;
use libforester::Stash;

use super::Invocation;
use crate::ui::{emit, json};

/// Run the `forester stash save` command logic.
pub fn save(inv: &Invocation<'_>, message: Option<&str>) -> Result<()> {
    let stash = inv.repo.stash_save(message)?;
    if inv.json() {
        return json(inv.output, &stash);
    }
    emit(inv.output.line(&format!("Saved stash {}", stash.hash)))
}

/// Run the `forester stash list` command logic.
pub fn list(inv: &Invocation<'_>) -> Result<()> {
    let stashes = inv.repo.stash_list()?;
    if inv.json() {
        return json(inv.output, &stashes);
    }
    for stash in stashes {
        emit(
            inv.output
                .line(&format!("stash{{{}}}: {}", stash.hash, stash.message)),
        )?;
    }
    Ok(())
}

/// Render the stash an action touched.
fn report(inv: &Invocation<'_>, stash: &Stash, verb: &str) -> Result<()> {
    if inv.json() {
        return json(inv.output, stash);
    }
    emit(inv.output.success(&format!("{verb} stash {}", stash.hash)))
}

/// Run the `forester stash apply` command logic.
pub fn apply(inv: &Invocation<'_>, hash: Option<&str>) -> Result<()> {
    let stash = inv.repo.stash_apply(hash)?;
    report(inv, &stash, "Applied")
}

/// Run the `forester stash pop` command logic.
pub fn pop(inv: &Invocation<'_>, hash: Option<&str>) -> Result<()> {
    let stash = inv.repo.stash_pop(hash)?;
    report(inv, &stash, "Popped")
}

/// Run the `forester stash drop` command logic.
pub fn drop(inv: &Invocation<'_>, hash: Option<&str>) -> Result<()> {
    let stash = inv.repo.stash_drop(hash)?;
    report(inv, &stash, "Dropped")
}
