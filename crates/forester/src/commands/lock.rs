use std::path::Path;

use anyhow::Result;
use libforester::{LockType, UnlockOutcome};
use serde_json::json;

use super::Invocation;
use crate::{
    ui::{self, emit, local_time, map_output_error},
    utils::absolutize,
};

/// Run the `forester lock <path>` command logic.
pub fn lock(
    inv: &Invocation<'_>,
    path: &Path,
    lock_type: LockType,
    expire: Option<u32>,
) -> Result<()> {
    let lock = inv
        .repo
        .lock(&absolutize(path)?, lock_type, expire, &inv.user)?;
    if inv.json() {
        return ui::json(inv.output, &lock);
    }
    emit(inv.output.success(&format!(
        "Locked {} ({}) for {}",
        lock.file_path, lock.lock_type, lock.user
    )))
}

/// Run the `forester lock unlock` command logic. A missing lock only warns.
pub fn unlock(inv: &Invocation<'_>, path: &Path, force: bool) -> Result<()> {
    match inv.repo.unlock(&absolutize(path)?, &inv.user, force)? {
        UnlockOutcome::Released(lock) => {
            if inv.json() {
                return ui::json(inv.output, &json!({ "released": lock }));
            }
            emit(inv.output.success(&format!("Unlocked {}", lock.file_path)))
        }
        UnlockOutcome::NotLocked => {
            if inv.json() {
                return ui::json(inv.output, &json!({ "released": null }));
            }
            emit(inv.output.warn(&format!("{} is not locked", path.display())))
        }
    }
}

/// Run the `forester lock list` command logic.
pub fn list(inv: &Invocation<'_>) -> Result<()> {
    let locks = inv.repo.locks()?;
    if inv.json() {
        return ui::json(inv.output, &locks);
    }
    if locks.is_empty() {
        return emit(inv.output.line("No locks found"));
    }

    let section = inv.output.section("Locks:").map_err(map_output_error)?;
    for lock in locks {
        let mut line = format!("{} ({}) by {}", lock.file_path, lock.lock_type, lock.user);
        if let Some(expires) = lock.expires_at {
            line.push_str(&format!(" expires: {}", local_time(expires)));
        }
        emit(section.line(&line))?;
    }
    Ok(())
}
