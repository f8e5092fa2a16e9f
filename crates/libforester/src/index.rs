//! The derived SQLite index in `.DFM/forester.db`.
//!
//! Everything in here can be regenerated from the files under `.DFM/` by
//! `rebuild`, except the staging area and the stat cache, which are transient
//! working state and start out empty after a rebuild.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{
    Connection, ErrorCode, OptionalExtension, Row, Transaction, params, types::Type,
};
use tracing::{debug, info};

use crate::{
    error::{ForesterError, Result},
    types::{Commit, FileLock, LockType, ReflogEntry, Stash},
};

/// Schema version recorded in the `meta` table.
pub const SCHEMA_VERSION: i64 = 1;

/// Tables every healthy index must contain.
const TABLES: [&str; 9] = [
    "meta",
    "commits",
    "branches",
    "tags",
    "reflog",
    "stashes",
    "locks",
    "staged",
    "stat_cache",
];

/// Full schema, applied to a fresh or reset database.
const SCHEMA: &str = "
CREATE TABLE meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE commits (
    hash TEXT PRIMARY KEY,
    parent TEXT,
    tree TEXT NOT NULL,
    author TEXT NOT NULL,
    message TEXT NOT NULL,
    tag TEXT,
    branch TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX idx_commits_parent ON commits(parent);
CREATE TABLE branches (
    name TEXT PRIMARY KEY,
    head TEXT
);
CREATE TABLE tags (
    name TEXT PRIMARY KEY,
    commit_hash TEXT NOT NULL
);
CREATE TABLE reflog (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ref_name TEXT NOT NULL,
    old_hash TEXT,
    new_hash TEXT,
    timestamp TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE TABLE stashes (
    hash TEXT PRIMARY KEY,
    base TEXT,
    tree TEXT NOT NULL,
    branch TEXT,
    message TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE TABLE locks (
    file_path TEXT NOT NULL,
    branch TEXT NOT NULL,
    user TEXT NOT NULL,
    lock_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    PRIMARY KEY (file_path, branch, user)
);
CREATE TABLE staged (
    path TEXT PRIMARY KEY,
    blob TEXT
);
CREATE TABLE stat_cache (
    path TEXT PRIMARY KEY,
    size INTEGER NOT NULL,
    mtime_ns INTEGER NOT NULL,
    hash TEXT NOT NULL
);
";

/// Handle on the index database.
pub struct Index {
    /// Open connection.
    conn: Connection,
    /// Database file path.
    path: PathBuf,
}

impl Index {
    /// File name within `.DFM`.
    pub const FILE_NAME: &'static str = "forester.db";

    /// Open the index, creating an empty schema when the file does not exist.
    ///
    /// Returns the handle and whether the database was freshly created, in
    /// which case the caller is expected to repopulate it.
    pub fn open(dfm_dir: &Path) -> Result<(Self, bool)> {
        let path = dfm_dir.join(Self::FILE_NAME);
        let created = !path.exists();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let index = Self { conn, path };
        if created {
            info!(path = %index.path.display(), "creating index database");
            index.create_schema()?;
        }
        Ok((index, created))
    }

    /// Fail with the name of the first missing table.
    pub fn verify_schema(&self) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
        for table in TABLES {
            let present = stmt.query_row(params![table], |_| Ok(())).optional()?;
            if present.is_none() {
                return Err(ForesterError::Index(format!("no such table: {table}")));
            }
        }
        Ok(())
    }

    /// Drop every table and recreate the schema.
    pub fn reset(&self) -> Result<()> {
        let mut drops = String::new();
        for table in TABLES {
            drops.push_str(&format!("DROP TABLE IF EXISTS {table};"));
        }
        self.conn.execute_batch(&drops)?;
        self.create_schema()
    }

    /// Apply the schema and record its version.
    fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        debug!(version = SCHEMA_VERSION, "created index schema");
        Ok(())
    }

    /// Begin a transaction; statements issued through `self` join it.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    // Commits

    /// Record a commit.
    pub fn insert_commit(&self, commit: &Commit) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO commits (hash, parent, tree, author, message, tag, branch, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                commit.hash,
                commit.parent,
                commit.tree,
                commit.author,
                commit.message,
                commit.tag,
                commit.branch,
                format_time(&commit.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Look up a commit by full hash.
    pub fn commit(&self, hash: &str) -> Result<Option<Commit>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT hash, parent, tree, author, message, tag, branch, timestamp
             FROM commits WHERE hash = ?1",
        )?;
        let commit = stmt
            .query_row(params![hash], |row| {
                Ok(Commit {
                    hash: row.get(0)?,
                    parent: row.get(1)?,
                    tree: row.get(2)?,
                    author: row.get(3)?,
                    message: row.get(4)?,
                    tag: row.get(5)?,
                    branch: row.get(6)?,
                    timestamp: time_column(row, 7)?,
                })
            })
            .optional()?;
        Ok(commit)
    }

    /// Remove a commit row.
    pub fn delete_commit(&self, hash: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM commits WHERE hash = ?1", params![hash])?;
        Ok(())
    }

    /// Full hashes of commits starting with `prefix`.
    pub fn commits_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.hashes_with_prefix("commits", prefix)
    }

    /// One commit naming `hash` as its parent, if any.
    pub fn child_of(&self, hash: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT hash FROM commits WHERE parent = ?1 ORDER BY hash LIMIT 1")?;
        Ok(stmt.query_row(params![hash], |row| row.get(0)).optional()?)
    }

    // Branches

    /// Create or move a branch row.
    pub fn upsert_branch(&self, name: &str, head: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO branches (name, head) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET head = excluded.head",
            params![name, head],
        )?;
        Ok(())
    }

    /// Remove a branch row.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM branches WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Every branch and its head, ordered by name.
    pub fn branches(&self) -> Result<Vec<(String, Option<String>)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name, head FROM branches ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Branches whose head is `hash`.
    pub fn branches_at(&self, hash: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM branches WHERE head = ?1 ORDER BY name")?;
        let rows = stmt
            .query_map(params![hash], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // Tags

    /// Record a tag.
    pub fn upsert_tag(&self, name: &str, commit: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tags (name, commit_hash) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET commit_hash = excluded.commit_hash",
            params![name, commit],
        )?;
        Ok(())
    }

    /// Remove a tag row.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM tags WHERE name = ?1", params![name])?;
        Ok(())
    }

    /// Every tag and its commit, ordered by name.
    pub fn tags(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name, commit_hash FROM tags ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Tag pointing at `commit`, if any.
    pub fn tag_for(&self, commit: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name FROM tags WHERE commit_hash = ?1 ORDER BY name LIMIT 1",
        )?;
        Ok(stmt.query_row(params![commit], |row| row.get(0)).optional()?)
    }

    // Reflog

    /// Record a ref movement.
    pub fn insert_reflog(&self, entry: &ReflogEntry) -> Result<()> {
        self.conn.execute(
            "INSERT INTO reflog (ref_name, old_hash, new_hash, timestamp, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.ref_name,
                entry.old_hash,
                entry.new_hash,
                format_time(&entry.timestamp),
                entry.message,
            ],
        )?;
        Ok(())
    }

    /// Every reflog entry in recording order.
    pub fn reflog(&self) -> Result<Vec<ReflogEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT ref_name, old_hash, new_hash, timestamp, message FROM reflog ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ReflogEntry {
                    ref_name: row.get(0)?,
                    old_hash: row.get(1)?,
                    new_hash: row.get(2)?,
                    timestamp: time_column(row, 3)?,
                    message: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Drop reflog rows older than `cutoff`.
    pub fn prune_reflog(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        // RFC 3339 UTC strings with fixed precision sort chronologically.
        Ok(self.conn.execute(
            "DELETE FROM reflog WHERE timestamp < ?1",
            params![format_time(&cutoff)],
        )?)
    }

    // Stashes

    /// Record a stash; a duplicate hash is a collision.
    pub fn insert_stash(&self, stash: &Stash) -> Result<()> {
        let result = self.conn.execute(
            "INSERT INTO stashes (hash, base, tree, branch, message, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                stash.hash,
                stash.base,
                stash.tree,
                stash.branch,
                stash.message,
                format_time(&stash.timestamp),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                Err(ForesterError::StashCollision(stash.hash.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stash row.
    pub fn delete_stash(&self, hash: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM stashes WHERE hash = ?1", params![hash])?;
        Ok(())
    }

    /// Every stash, newest first.
    pub fn stashes(&self) -> Result<Vec<Stash>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT hash, base, tree, branch, message, timestamp
             FROM stashes ORDER BY timestamp DESC, hash",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Stash {
                    hash: row.get(0)?,
                    base: row.get(1)?,
                    tree: row.get(2)?,
                    branch: row.get(3)?,
                    message: row.get(4)?,
                    timestamp: time_column(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Full hashes of stashes starting with `prefix`.
    pub fn stashes_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.hashes_with_prefix("stashes", prefix)
    }

    // Locks

    /// Replace the mirrored lock set.
    pub fn replace_locks(&self, locks: &[FileLock]) -> Result<()> {
        self.conn.execute("DELETE FROM locks", [])?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT OR REPLACE INTO locks (file_path, branch, user, lock_type, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for lock in locks {
            stmt.execute(params![
                lock.file_path,
                lock.branch,
                lock.user,
                lock.lock_type.to_string(),
                format_time(&lock.created_at),
                lock.expires_at.as_ref().map(format_time),
            ])?;
        }
        Ok(())
    }

    /// Mirrored locks on a branch, ordered by path.
    pub fn locks(&self, branch: &str) -> Result<Vec<FileLock>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT file_path, branch, user, lock_type, created_at, expires_at
             FROM locks WHERE branch = ?1 ORDER BY file_path, user",
        )?;
        let rows = stmt
            .query_map(params![branch], |row| {
                let lock_type: String = row.get(3)?;
                let expires_at = match row.get::<_, Option<String>>(5)? {
                    Some(_) => Some(time_column(row, 5)?),
                    None => None,
                };
                Ok(FileLock {
                    file_path: row.get(0)?,
                    branch: row.get(1)?,
                    user: row.get(2)?,
                    lock_type: lock_type.parse::<LockType>().map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
                    })?,
                    created_at: time_column(row, 4)?,
                    expires_at,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // Staging area

    /// Stage a path: `Some(blob)` for new content, `None` for a deletion.
    pub fn stage(&self, path: &str, blob: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO staged (path, blob) VALUES (?1, ?2)
             ON CONFLICT(path) DO UPDATE SET blob = excluded.blob",
            params![path, blob],
        )?;
        Ok(())
    }

    /// Remove a path from the staging area.
    pub fn unstage(&self, path: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM staged WHERE path = ?1", params![path])?;
        Ok(())
    }

    /// Everything staged, keyed by path.
    pub fn staged(&self) -> Result<BTreeMap<String, Option<String>>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT path, blob FROM staged ORDER BY path")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
        Ok(rows)
    }

    /// Empty the staging area.
    pub fn clear_staged(&self) -> Result<()> {
        self.conn.execute("DELETE FROM staged", [])?;
        Ok(())
    }

    // Stat cache

    /// Cached blob hash for a file whose size and mtime are unchanged.
    pub fn cached_hash(&self, path: &str, size: u64, mtime_ns: i64) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT hash FROM stat_cache WHERE path = ?1 AND size = ?2 AND mtime_ns = ?3",
        )?;
        Ok(stmt
            .query_row(params![path, to_sql_size(size), mtime_ns], |row| row.get(0))
            .optional()?)
    }

    /// Remember the blob hash for a file's current size and mtime.
    pub fn remember_hash(&self, path: &str, size: u64, mtime_ns: i64, hash: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO stat_cache (path, size, mtime_ns, hash) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET size = excluded.size,
                 mtime_ns = excluded.mtime_ns, hash = excluded.hash",
            params![path, to_sql_size(size), mtime_ns, hash],
        )?;
        Ok(())
    }

    /// Hashes in `table` starting with `prefix`.
    fn hashes_with_prefix(&self, table: &str, prefix: &str) -> Result<Vec<String>> {
        // Prefixes are hex-only by the time they get here, so LIKE needs no escaping.
        let sql = format!("SELECT hash FROM {table} WHERE hash LIKE ?1 ORDER BY hash");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![format!("{prefix}%")], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

/// Render a timestamp the way every table stores it.
fn format_time(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Read a timestamp column.
fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// SQLite integers are signed.
fn to_sql_size(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}
