use std::collections::BTreeSet;

use crate::tree::FileMap;

/// Working-tree edits needed to apply a stash.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyPlan {
    /// Paths to write with the given blob.
    pub writes: Vec<(String, String)>,
    /// Paths to delete.
    pub removals: Vec<String>,
    /// Paths whose working content differs from both the base and the stash.
    pub conflicts: Vec<String>,
}

impl ApplyPlan {
    /// Whether applying would change nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.removals.is_empty()
    }
}

/// Work out how to apply a stash whose snapshot is `stash`, taken against
/// `base`, onto a working tree currently holding `current`.
///
/// Only paths the stash changed relative to its base are touched. A path
/// already matching the stash is skipped. A path still matching the base is
/// updated. Anything else is a conflict; conflicting paths are still listed in
/// `writes`/`removals` so an overwrite policy can apply them.
pub fn plan_apply(base: &FileMap, stash: &FileMap, current: &FileMap) -> ApplyPlan {
    let mut plan = ApplyPlan::default();
    let paths: BTreeSet<&String> = base.keys().chain(stash.keys()).collect();

    for path in paths {
        let before = base.get(path);
        let after = stash.get(path);
        if before == after {
            continue;
        }
        let now = current.get(path);
        if now == after {
            continue;
        }
        if now != before {
            plan.conflicts.push(path.clone());
        }
        match after {
            Some(hash) => plan.writes.push((path.clone(), hash.clone())),
            None => plan.removals.push(path.clone()),
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> FileMap {
        pairs
            .iter()
            .map(|(p, h)| ((*p).to_string(), (*h).to_string()))
            .collect()
    }

    #[test]
    fn clean_tree_takes_every_stashed_change() {
        let base = map(&[("scene.blend", "b1"), ("old.png", "o1")]);
        let stash = map(&[("scene.blend", "b2"), ("new.png", "n1")]);

        let plan = plan_apply(&base, &stash, &base);
        assert!(plan.conflicts.is_empty());
        assert_eq!(
            plan.writes,
            vec![
                ("new.png".to_string(), "n1".to_string()),
                ("scene.blend".to_string(), "b2".to_string())
            ]
        );
        assert_eq!(plan.removals, vec!["old.png".to_string()]);
    }

    #[test]
    fn diverged_paths_conflict() {
        let base = map(&[("scene.blend", "b1")]);
        let stash = map(&[("scene.blend", "b2")]);
        let current = map(&[("scene.blend", "b3")]);

        let plan = plan_apply(&base, &stash, &current);
        assert_eq!(plan.conflicts, vec!["scene.blend".to_string()]);
    }

    #[test]
    fn already_applied_paths_are_skipped() {
        let base = map(&[("scene.blend", "b1")]);
        let stash = map(&[("scene.blend", "b2")]);

        let plan = plan_apply(&base, &stash, &stash);
        assert!(plan.is_empty());
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn untouched_paths_never_conflict() {
        let base = map(&[("a", "1"), ("b", "1")]);
        let stash = map(&[("a", "2"), ("b", "1")]);
        let current = map(&[("a", "1"), ("b", "9")]);

        let plan = plan_apply(&base, &stash, &current);
        assert!(plan.conflicts.is_empty());
        assert_eq!(plan.writes.len(), 1);
    }
}
