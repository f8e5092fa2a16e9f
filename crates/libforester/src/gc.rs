use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{
    error::Result,
    object::{ObjectKind, ObjectStore},
    types::{CommitObject, EntryType, Tree},
};

/// Starting points of the reachability walk.
#[derive(Debug, Default)]
pub struct Roots {
    /// Commits to keep along with their ancestry.
    pub commits: Vec<String>,
    /// Trees to keep that are not reached through a commit (stash snapshots).
    pub trees: Vec<String>,
    /// Blobs to keep that no tree references yet (staged content).
    pub blobs: Vec<String>,
}

/// Objects found reachable from the roots.
#[derive(Debug, Default)]
pub struct Reachable {
    /// Reachable commits.
    pub commits: HashSet<String>,
    /// Reachable trees.
    pub trees: HashSet<String>,
    /// Reachable blobs.
    pub blobs: HashSet<String>,
    /// Referenced objects that were missing or unreadable.
    pub missing: usize,
}

/// What a sweep removed, or would remove on a dry run.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Unreachable commit hashes.
    pub commits: Vec<String>,
    /// Number of unreachable trees.
    pub trees: usize,
    /// Number of unreachable blobs.
    pub blobs: usize,
}

/// Walk parent chains and trees from the roots. Missing or corrupt objects
/// are counted and skipped.
pub fn mark(store: &ObjectStore, roots: &Roots) -> Reachable {
    let mut reachable = Reachable::default();
    let mut commits: Vec<String> = roots.commits.clone();
    let mut trees: Vec<String> = roots.trees.clone();
    reachable.blobs.extend(roots.blobs.iter().cloned());

    while let Some(hash) = commits.pop() {
        if !reachable.commits.insert(hash.clone()) {
            continue;
        }
        match store.get_json::<CommitObject>(ObjectKind::Commit, &hash) {
            Ok(commit) => {
                trees.push(commit.tree);
                if let Some(parent) = commit.parent {
                    commits.push(parent);
                }
            }
            Err(e) => {
                warn!(%hash, error = %e, "skipping unreadable commit during gc");
                reachable.missing += 1;
            }
        }
    }

    while let Some(hash) = trees.pop() {
        if !reachable.trees.insert(hash.clone()) {
            continue;
        }
        match store.get_json::<Tree>(ObjectKind::Tree, &hash) {
            Ok(tree) => {
                for entry in tree.entries {
                    match entry.entry_type {
                        EntryType::Tree => trees.push(entry.hash),
                        EntryType::Blob => {
                            if !store.exists(ObjectKind::Blob, &entry.hash) {
                                reachable.missing += 1;
                            }
                            reachable.blobs.insert(entry.hash);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(%hash, error = %e, "skipping unreadable tree during gc");
                reachable.missing += 1;
            }
        }
    }

    debug!(
        commits = reachable.commits.len(),
        trees = reachable.trees.len(),
        blobs = reachable.blobs.len(),
        missing = reachable.missing,
        "marked reachable objects"
    );
    reachable
}

/// Delete every stored commit, tree and blob outside the reachable set.
pub fn sweep(store: &ObjectStore, reachable: &Reachable, dry_run: bool) -> Result<Sweep> {
    let mut result = Sweep::default();
    for hash in store.list(ObjectKind::Commit)? {
        if !reachable.commits.contains(&hash) {
            if !dry_run {
                store.remove(ObjectKind::Commit, &hash)?;
            }
            result.commits.push(hash);
        }
    }
    result.trees = sweep_kind(store, ObjectKind::Tree, &reachable.trees, dry_run)?;
    result.blobs = sweep_kind(store, ObjectKind::Blob, &reachable.blobs, dry_run)?;
    Ok(result)
}

/// Sweep one kind, returning how many objects were unreachable.
fn sweep_kind(
    store: &ObjectStore,
    kind: ObjectKind,
    keep: &HashSet<String>,
    dry_run: bool,
) -> Result<usize> {
    let mut count = 0;
    for hash in store.list(kind)? {
        if keep.contains(&hash) {
            continue;
        }
        if !dry_run {
            store.remove(kind, &hash)?;
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;
    use crate::tree::{FileMap, write_tree};

    fn commit(store: &ObjectStore, parent: Option<&str>, content: &[u8]) -> String {
        let blob = store.put(ObjectKind::Blob, content).unwrap();
        let mut files = FileMap::new();
        files.insert("scene.blend".to_string(), blob);
        let tree = write_tree(store, &files).unwrap();
        store
            .put_json(
                ObjectKind::Commit,
                &CommitObject {
                    parent: parent.map(str::to_string),
                    tree,
                    author: "ana".to_string(),
                    message: "m".to_string(),
                    tag: None,
                    branch: Some("main".to_string()),
                    timestamp: Utc::now(),
                },
            )
            .unwrap()
    }

    #[test]
    fn keeps_ancestry_and_drops_orphans() {
        let tmp = tempdir().unwrap();
        let store = ObjectStore::new(tmp.path());
        let first = commit(&store, None, b"v1");
        let second = commit(&store, Some(&first), b"v2");
        let orphan = commit(&store, None, b"abandoned");

        let roots = Roots {
            commits: vec![second],
            ..Roots::default()
        };
        let reachable = mark(&store, &roots);
        assert_eq!(reachable.commits.len(), 2);
        assert_eq!(reachable.missing, 0);

        let dry = sweep(&store, &reachable, true).unwrap();
        assert_eq!(dry.commits, vec![orphan.clone()]);
        assert!(store.exists(ObjectKind::Commit, &orphan));

        let swept = sweep(&store, &reachable, false).unwrap();
        assert_eq!(swept.commits.len(), 1);
        assert_eq!(swept.trees, 1);
        assert_eq!(swept.blobs, 1);
        assert!(!store.exists(ObjectKind::Commit, &orphan));
        assert!(store.exists(ObjectKind::Commit, &first));
    }

    #[test]
    fn missing_objects_are_counted_not_fatal() {
        let tmp = tempdir().unwrap();
        let store = ObjectStore::new(tmp.path());
        let first = commit(&store, None, b"v1");
        let second = commit(&store, Some(&first), b"v2");
        store.remove(ObjectKind::Commit, &first).unwrap();

        let reachable = mark(
            &store,
            &Roots {
                commits: vec![second],
                ..Roots::default()
            },
        );
        assert_eq!(reachable.missing, 1);
        let swept = sweep(&store, &reachable, false).unwrap();
        // The first commit's tree and blob are no longer reachable.
        assert_eq!(swept.trees, 1);
        assert_eq!(swept.blobs, 1);
    }

    #[test]
    fn blob_roots_survive_without_a_tree() {
        let tmp = tempdir().unwrap();
        let store = ObjectStore::new(tmp.path());
        let head = commit(&store, None, b"v1");
        let staged = store.put(ObjectKind::Blob, b"not committed yet").unwrap();
        let stray = store.put(ObjectKind::Blob, b"unstaged leftover").unwrap();

        let roots = Roots {
            commits: vec![head],
            blobs: vec![staged.clone()],
            ..Roots::default()
        };
        let reachable = mark(&store, &roots);
        let swept = sweep(&store, &reachable, false).unwrap();
        assert_eq!(swept.blobs, 1);
        assert!(store.exists(ObjectKind::Blob, &staged));
        assert!(!store.exists(ObjectKind::Blob, &stray));
    }
}
