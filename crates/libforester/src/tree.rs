use std::collections::BTreeMap;

use crate::{
    error::Result,
    object::{ObjectKind, ObjectStore},
    types::{EntryType, Tree, TreeEntry},
};

/// Flattened tree: repository-relative path to blob hash.
pub type FileMap = BTreeMap<String, String>;

/// Directory node used while building nested trees.
#[derive(Debug, Default)]
struct DirNode {
    /// Files directly in this directory.
    files: BTreeMap<String, String>,
    /// Subdirectories.
    dirs: BTreeMap<String, DirNode>,
}

impl DirNode {
    /// Insert a file at a `/`-separated path. A later path wins over a
    /// conflicting earlier one, so a file replaced by a directory disappears.
    fn insert(&mut self, path: &str, hash: &str) {
        match path.split_once('/') {
            None => {
                self.dirs.remove(path);
                self.files.insert(path.to_string(), hash.to_string());
            }
            Some((dir, rest)) => {
                self.files.remove(dir);
                self.dirs
                    .entry(dir.to_string())
                    .or_default()
                    .insert(rest, hash);
            }
        }
    }

    /// Store this directory and its children, returning the tree hash.
    fn write(&self, store: &ObjectStore) -> Result<String> {
        let mut entries = Vec::with_capacity(self.files.len() + self.dirs.len());
        for (name, hash) in &self.files {
            entries.push(TreeEntry {
                name: name.clone(),
                entry_type: EntryType::Blob,
                hash: hash.clone(),
            });
        }
        for (name, dir) in &self.dirs {
            entries.push(TreeEntry {
                name: name.clone(),
                entry_type: EntryType::Tree,
                hash: dir.write(store)?,
            });
        }
        store.put_json(ObjectKind::Tree, &Tree::new(entries))
    }
}

/// Store the nested trees for a flat file map and return the root hash.
pub fn write_tree(store: &ObjectStore, files: &FileMap) -> Result<String> {
    let mut root = DirNode::default();
    for (path, hash) in files {
        root.insert(path, hash);
    }
    root.write(store)
}

/// Read a tree and every subtree into a flat file map.
pub fn read_tree(store: &ObjectStore, hash: &str) -> Result<FileMap> {
    let mut files = FileMap::new();
    collect(store, hash, "", &mut files)?;
    Ok(files)
}

/// Recursive helper for [`read_tree`].
fn collect(store: &ObjectStore, hash: &str, prefix: &str, files: &mut FileMap) -> Result<()> {
    let tree: Tree = store.get_json(ObjectKind::Tree, hash)?;
    for entry in tree.entries {
        let path = if prefix.is_empty() {
            entry.name
        } else {
            format!("{prefix}/{}", entry.name)
        };
        match entry.entry_type {
            EntryType::Blob => {
                files.insert(path, entry.hash);
            }
            EntryType::Tree => collect(store, &entry.hash, &path, files)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn files(pairs: &[(&str, &str)]) -> FileMap {
        pairs
            .iter()
            .map(|(p, h)| ((*p).to_string(), (*h).to_string()))
            .collect()
    }

    #[test]
    fn nested_round_trip() {
        let tmp = tempdir().unwrap();
        let store = ObjectStore::new(tmp.path());
        let a = store.put(ObjectKind::Blob, b"a").unwrap();
        let b = store.put(ObjectKind::Blob, b"b").unwrap();

        let map = files(&[
            ("scene.blend", &a),
            ("textures/wood.png", &b),
            ("textures/deep/metal.png", &a),
        ]);
        let root = write_tree(&store, &map).unwrap();
        assert_eq!(read_tree(&store, &root).unwrap(), map);
    }

    #[test]
    fn identical_contents_share_a_hash() {
        let tmp = tempdir().unwrap();
        let store = ObjectStore::new(tmp.path());
        let a = store.put(ObjectKind::Blob, b"a").unwrap();

        let first = write_tree(&store, &files(&[("x", &a), ("y", &a)])).unwrap();
        let second = write_tree(&store, &files(&[("y", &a), ("x", &a)])).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_tree_is_storable() {
        let tmp = tempdir().unwrap();
        let store = ObjectStore::new(tmp.path());

        let root = write_tree(&store, &FileMap::new()).unwrap();
        assert!(read_tree(&store, &root).unwrap().is_empty());
    }
}
