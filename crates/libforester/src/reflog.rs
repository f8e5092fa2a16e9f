use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::{
    error::{ForesterError, Result},
    refs::write_atomic,
    types::ReflogEntry,
};

/// Append-only reflog at `.DFM/logs/reflog`, one JSON object per line.
#[derive(Debug, Clone)]
pub struct Reflog {
    /// Path of the log file.
    path: PathBuf,
}

impl Reflog {
    /// Create a reflog handle for the given `.DFM` directory.
    pub fn new(dfm_dir: &Path) -> Self {
        Self {
            path: dfm_dir.join("logs").join("reflog"),
        }
    }

    /// Append one entry.
    pub fn append(&self, entry: &ReflogEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = encode(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Every entry in recording order. Unparseable lines are skipped.
    pub fn entries(&self) -> Result<Vec<ReflogEntry>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(line = number + 1, error = %e, "skipping unreadable reflog line"),
            }
        }
        Ok(entries)
    }

    /// Drop entries older than `cutoff`, returning how many were removed.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let entries = self.entries()?;
        let before = entries.len();
        let kept: Vec<_> = entries
            .into_iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            let mut body = String::new();
            for entry in &kept {
                body.push_str(&encode(entry)?);
                body.push('\n');
            }
            write_atomic(&self.path, body.as_bytes())?;
        }
        Ok(removed)
    }
}

/// Serialize one entry as a single JSON line body.
fn encode(entry: &ReflogEntry) -> Result<String> {
    serde_json::to_string(entry)
        .map_err(|e| ForesterError::OperationError(format!("Failed to encode reflog entry: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::tempdir;

    use super::*;

    fn entry(message: &str, timestamp: DateTime<Utc>) -> ReflogEntry {
        ReflogEntry {
            ref_name: "main".to_string(),
            old_hash: None,
            new_hash: Some("c".repeat(64)),
            timestamp,
            message: message.to_string(),
        }
    }

    #[test]
    fn append_and_read_back() {
        let tmp = tempdir().unwrap();
        let reflog = Reflog::new(tmp.path());
        assert!(reflog.entries().unwrap().is_empty());

        let now = Utc::now();
        reflog.append(&entry("commit: first", now)).unwrap();
        reflog.append(&entry("commit: second", now)).unwrap();

        let messages: Vec<_> = reflog
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect();
        assert_eq!(messages, vec!["commit: first", "commit: second"]);
    }

    #[test]
    fn prune_drops_only_expired_entries() {
        let tmp = tempdir().unwrap();
        let reflog = Reflog::new(tmp.path());
        let now = Utc::now();

        reflog.append(&entry("old", now - Duration::days(120))).unwrap();
        reflog.append(&entry("recent", now - Duration::days(1))).unwrap();

        assert_eq!(reflog.prune(now - Duration::days(90)).unwrap(), 1);
        let remaining = reflog.entries().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "recent");
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let tmp = tempdir().unwrap();
        let reflog = Reflog::new(tmp.path());
        reflog.append(&entry("ok", Utc::now())).unwrap();
        let mut file = OpenOptions::new()
            .append(true)
            .open(tmp.path().join("logs/reflog"))
            .unwrap();
        writeln!(file, "{{not json").unwrap();

        assert_eq!(reflog.entries().unwrap().len(), 1);
    }
}
