use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::{
    error::{ForesterError, Result},
    refs::write_atomic,
    types::{FileLock, LockType, UnlockOutcome},
};

/// Persisted advisory locks in `.DFM/locks.json`.
///
/// The file is the source of truth; the index mirrors it for listing. Every
/// mutating call drops expired locks before it does anything else.
#[derive(Debug, Clone)]
pub struct LockStore {
    /// Path of `locks.json`.
    path: PathBuf,
}

/// A lock request.
#[derive(Debug, Clone)]
pub struct LockRequest<'a> {
    /// Normalized repository-relative path.
    pub file_path: &'a str,
    /// Requested flavour.
    pub lock_type: LockType,
    /// Requesting user.
    pub user: &'a str,
    /// Branch the lock applies to.
    pub branch: &'a str,
    /// Hours until expiry; `None` or zero never expires.
    pub expire_hours: Option<u32>,
}

impl LockStore {
    /// File name within `.DFM`.
    pub const FILE_NAME: &'static str = "locks.json";

    /// Create a store for the given `.DFM` directory.
    pub fn new(dfm_dir: &Path) -> Self {
        Self {
            path: dfm_dir.join(Self::FILE_NAME),
        }
    }

    /// Every stored lock, expired ones included.
    pub fn load(&self) -> Result<Vec<FileLock>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&contents).map_err(|e| ForesterError::CorruptObject {
            kind: "locks",
            hash: Self::FILE_NAME.to_string(),
            message: e.to_string(),
        })
    }

    /// Replace the stored locks.
    fn save(&self, locks: &[FileLock]) -> Result<()> {
        let body = serde_json::to_vec_pretty(locks)
            .map_err(|e| ForesterError::OperationError(format!("Failed to encode locks: {e}")))?;
        write_atomic(&self.path, &body)
    }

    /// Load the locks and persist the set without the expired ones.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileLock>> {
        let locks = self.load()?;
        let before = locks.len();
        let active: Vec<_> = locks.into_iter().filter(|l| l.is_active(now)).collect();
        if active.len() != before {
            debug!(purged = before - active.len(), "purged expired locks");
            self.save(&active)?;
        }
        Ok(active)
    }

    /// Take or refresh a lock.
    pub fn lock(&self, request: &LockRequest<'_>, now: DateTime<Utc>) -> Result<FileLock> {
        let mut locks = self.purge_expired(now)?;
        check_conflict(&locks, request)?;

        // The caller is the only holder here, so their old lock is replaced.
        locks.retain(|l| {
            !(l.file_path == request.file_path && l.branch == request.branch && l.user == request.user)
        });

        let expires_at = request
            .expire_hours
            .filter(|hours| *hours > 0)
            .map(|hours| now + Duration::hours(i64::from(hours)));
        let lock = FileLock {
            file_path: request.file_path.to_string(),
            lock_type: request.lock_type,
            user: request.user.to_string(),
            branch: request.branch.to_string(),
            created_at: now,
            expires_at,
        };
        locks.push(lock.clone());
        self.save(&locks)?;
        info!(path = %lock.file_path, user = %lock.user, lock_type = %lock.lock_type, "locked file");
        Ok(lock)
    }

    /// Release a lock held by `user`, or anyone's when `force` is set.
    pub fn unlock(
        &self,
        file_path: &str,
        branch: &str,
        user: &str,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<UnlockOutcome> {
        let mut locks = self.purge_expired(now)?;
        let on_path: Vec<usize> = locks
            .iter()
            .enumerate()
            .filter(|(_, l)| l.file_path == file_path && l.branch == branch)
            .map(|(i, _)| i)
            .collect();
        if on_path.is_empty() {
            return Ok(UnlockOutcome::NotLocked);
        }

        let target = on_path
            .iter()
            .copied()
            .find(|i| locks[*i].user == user)
            .or_else(|| force.then(|| on_path[0]));
        let Some(index) = target else {
            return Err(ForesterError::LockNotOwned {
                path: file_path.to_string(),
                user: locks[on_path[0]].user.clone(),
            });
        };

        let released = locks.remove(index);
        self.save(&locks)?;
        info!(path = %released.file_path, user = %released.user, forced = force, "unlocked file");
        Ok(UnlockOutcome::Released(released))
    }
}

/// Reject a request that collides with someone else's active lock.
///
/// An exclusive lock blocks everything; shared locks block a new exclusive
/// one. The requester's own lock never conflicts with itself.
fn check_conflict(active: &[FileLock], request: &LockRequest<'_>) -> Result<()> {
    let others = active.iter().filter(|l| {
        l.file_path == request.file_path && l.branch == request.branch && l.user != request.user
    });
    for held in others {
        if held.lock_type == LockType::Exclusive || request.lock_type == LockType::Exclusive {
            return Err(ForesterError::LockConflict {
                path: held.file_path.clone(),
                lock_type: held.lock_type.to_string(),
                user: held.user.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    /// Active locks on `branch`, ordered by path then user.
    fn listed(store: &LockStore, branch: &str, now: DateTime<Utc>) -> Result<Vec<FileLock>> {
        let mut locks: Vec<_> = store
            .purge_expired(now)?
            .into_iter()
            .filter(|l| l.branch == branch)
            .collect();
        locks.sort_by(|a, b| a.file_path.cmp(&b.file_path).then(a.user.cmp(&b.user)));
        Ok(locks)
    }

    fn request<'a>(path: &'a str, lock_type: LockType, user: &'a str) -> LockRequest<'a> {
        LockRequest {
            file_path: path,
            lock_type,
            user,
            branch: "main",
            expire_hours: None,
        }
    }

    #[test]
    fn exclusive_blocks_everyone_else() {
        let tmp = tempdir().unwrap();
        let store = LockStore::new(tmp.path());
        let now = Utc::now();

        store
            .lock(&request("scene.blend", LockType::Exclusive, "ana"), now)
            .unwrap();

        for lock_type in [LockType::Exclusive, LockType::Shared] {
            let err = store
                .lock(&request("scene.blend", lock_type, "ben"), now)
                .unwrap_err();
            assert!(matches!(err, ForesterError::LockConflict { ref user, .. } if user == "ana"));
        }
    }

    #[test]
    fn shared_locks_coexist_but_block_exclusive() {
        let tmp = tempdir().unwrap();
        let store = LockStore::new(tmp.path());
        let now = Utc::now();

        store
            .lock(&request("tex.png", LockType::Shared, "ana"), now)
            .unwrap();
        store
            .lock(&request("tex.png", LockType::Shared, "ben"), now)
            .unwrap();
        assert!(
            store
                .lock(&request("tex.png", LockType::Exclusive, "cy"), now)
                .is_err()
        );
        assert_eq!(listed(&store, "main", now).unwrap().len(), 2);
    }

    #[test]
    fn sole_holder_can_upgrade() {
        let tmp = tempdir().unwrap();
        let store = LockStore::new(tmp.path());
        let now = Utc::now();

        store
            .lock(&request("a.blend", LockType::Shared, "ana"), now)
            .unwrap();
        store
            .lock(&request("a.blend", LockType::Exclusive, "ana"), now)
            .unwrap();

        let locks = listed(&store, "main", now).unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].lock_type, LockType::Exclusive);
    }

    #[test]
    fn expired_locks_are_inert() {
        let tmp = tempdir().unwrap();
        let store = LockStore::new(tmp.path());
        let then = Utc::now() - Duration::hours(5);

        let mut req = request("a.blend", LockType::Exclusive, "ana");
        req.expire_hours = Some(1);
        store.lock(&req, then).unwrap();

        let now = Utc::now();
        assert!(listed(&store, "main", now).unwrap().is_empty());
        store
            .lock(&request("a.blend", LockType::Exclusive, "ben"), now)
            .unwrap();
    }

    #[test]
    fn unlock_rules() {
        let tmp = tempdir().unwrap();
        let store = LockStore::new(tmp.path());
        let now = Utc::now();

        assert_eq!(
            store.unlock("a.blend", "main", "ana", false, now).unwrap(),
            UnlockOutcome::NotLocked
        );

        store
            .lock(&request("a.blend", LockType::Exclusive, "ana"), now)
            .unwrap();
        assert!(matches!(
            store.unlock("a.blend", "main", "ben", false, now),
            Err(ForesterError::LockNotOwned { .. })
        ));
        assert!(matches!(
            store.unlock("a.blend", "main", "ben", true, now).unwrap(),
            UnlockOutcome::Released(lock) if lock.user == "ana"
        ));
        assert!(listed(&store, "main", now).unwrap().is_empty());
    }

    #[test]
    fn locks_are_scoped_to_branches() {
        let tmp = tempdir().unwrap();
        let store = LockStore::new(tmp.path());
        let now = Utc::now();

        store
            .lock(&request("a.blend", LockType::Exclusive, "ana"), now)
            .unwrap();
        let mut other = request("a.blend", LockType::Exclusive, "ben");
        other.branch = "dev";
        store.lock(&other, now).unwrap();

        assert_eq!(listed(&store, "dev", now).unwrap().len(), 1);
        assert_eq!(listed(&store, "main", now).unwrap()[0].user, "ana");
    }
}
