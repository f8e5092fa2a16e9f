//! A typed client for the `forester` command-line protocol.
//!
//! Front-ends drive the engine by running the `forester` binary and reading
//! its text output. [`ForesterClient`] wraps that: it builds the command line,
//! enforces a per-call timeout, and parses each command's stdout into typed
//! values.

use std::{
    env,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Child, Command, ExitStatus, Stdio},
    result::Result as StdResult,
    thread,
    time::{Duration, Instant},
};

use thiserror::Error;
use tracing::debug;

/// Environment variable naming the binary [`ForesterClient::discover`] uses.
pub const BIN_ENV: &str = "FORESTER_BIN";

/// Timeout applied to each call unless overridden.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Errors returned by [`ForesterClient`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// The command ran and exited unsuccessfully.
    #[error("{message}")]
    Failed {
        /// Trimmed stderr, else stdout, else "Unknown error".
        message: String,
        /// Process exit code, if it exited normally.
        code: Option<i32>,
    },

    /// The command did not finish within the timeout and was killed.
    #[error("forester did not finish within {0:?}")]
    Timeout(Duration),

    /// The binary could not be started.
    #[error("Failed to run forester: {0}")]
    Spawn(#[from] io::Error),

    /// The command succeeded but its output was not understood.
    #[error("Unexpected forester output: {0}")]
    Parse(String),
}

/// Result alias for client calls.
pub type Result<T> = StdResult<T, ClientError>;

/// Parsed `status` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    /// Current branch, when attached.
    pub branch: Option<String>,
    /// Commit HEAD is detached at.
    pub detached: Option<String>,
    /// Head commit, absent before the first commit.
    pub head: Option<String>,
    /// Staged paths.
    pub staged: Vec<String>,
    /// Modified tracked paths.
    pub modified: Vec<String>,
    /// Deleted tracked paths.
    pub deleted: Vec<String>,
    /// Untracked paths.
    pub untracked: Vec<String>,
}

impl StatusSummary {
    /// Whether no tracked path is staged, modified or deleted.
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// One commit from `log`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogEntry {
    /// Commit hash.
    pub hash: String,
    /// Whether this is the head of the listed branch.
    pub is_head: bool,
    /// Author name.
    pub author: String,
    /// Rendered local date.
    pub date: String,
    /// Tag on the commit.
    pub tag: Option<String>,
    /// Commit message.
    pub message: String,
}

/// One line of `branch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchEntry {
    /// Branch name.
    pub name: String,
    /// Whether HEAD is on this branch.
    pub is_current: bool,
}

/// One line of `stash list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    /// Stash hash.
    pub hash: String,
    /// Stash message.
    pub message: String,
}

/// One line of `lock list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    /// Locked path, relative to the repository root.
    pub path: String,
    /// `exclusive` or `shared`.
    pub lock_type: String,
    /// Lock holder.
    pub user: String,
    /// Rendered local expiry, when the lock expires.
    pub expires: Option<String>,
}

/// Counts reported by `gc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcSummary {
    /// Commits deleted (or that would be).
    pub commits: usize,
    /// Trees deleted.
    pub trees: usize,
    /// Blobs deleted.
    pub blobs: usize,
}

/// Parsed `show` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowSummary {
    /// Commit or stash hash.
    pub hash: String,
    /// `commit` or `stash`.
    pub object_type: String,
    /// Author line.
    pub author: String,
    /// Rendered local date.
    pub date: String,
    /// Parent commit, if any.
    pub parent: Option<String>,
    /// Root tree hash.
    pub tree: String,
    /// Every file in the snapshot.
    pub files: Vec<String>,
    /// Message.
    pub message: String,
}

/// Handle on a `forester` binary, optionally bound to one repository.
#[derive(Debug, Clone)]
pub struct ForesterClient {
    /// Binary to run.
    binary: PathBuf,
    /// Repository passed as `--repo-dir`.
    repo_dir: Option<PathBuf>,
    /// User passed as `--user`.
    user: Option<String>,
    /// Per-call timeout.
    timeout: Duration,
}

/// Read a child's pipe to the end on a background thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            #[allow(clippy::let_underscore_must_use)]
            {
                let _ = pipe.read_to_end(&mut buf);
            }
        }
        buf
    })
}

/// Wait for `child`, killing it once `timeout` elapses.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> Result<(ExitStatus, String, String)> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let deadline = Instant::now() + timeout;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Err(ClientError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let text = |handle: thread::JoinHandle<Vec<u8>>| {
        String::from_utf8_lossy(&handle.join().unwrap_or_default()).into_owned()
    };
    Ok((status, text(stdout), text(stderr)))
}

/// Strip a `key:` prefix and surrounding whitespace.
fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(str::trim)
}

/// Indented list items following a header line.
fn section(lines: &[&str], header: &str) -> Vec<String> {
    lines
        .iter()
        .skip_while(|line| line.trim_end() != header)
        .skip(1)
        .take_while(|line| line.starts_with("  "))
        .map(|line| line.trim().to_string())
        .collect()
}

/// Parse `status` output.
fn parse_status(out: &str) -> StatusSummary {
    let lines: Vec<&str> = out.lines().collect();
    let mut summary = StatusSummary::default();
    for line in &lines {
        if let Some(branch) = field(line, "On branch ") {
            summary.branch = Some(branch.to_string());
        } else if let Some(hash) = field(line, "HEAD detached at ") {
            summary.detached = Some(hash.to_string());
        } else if let Some(hash) = field(line, "HEAD: ") {
            summary.head = Some(hash.to_string());
        }
    }
    summary.staged = section(&lines, "Staged files:");
    summary.modified = section(&lines, "Modified files:");
    summary.deleted = section(&lines, "Deleted files:");
    summary.untracked = section(&lines, "Untracked files:");
    summary
}

/// Parse `log` output into entries.
fn parse_log(out: &str) -> Vec<LogEntry> {
    let mut entries: Vec<LogEntry> = Vec::new();
    for line in out.lines() {
        if let Some(hash) = field(line, "commit ") {
            entries.push(LogEntry {
                hash: hash.to_string(),
                ..LogEntry::default()
            });
            continue;
        }
        let Some(entry) = entries.last_mut() else {
            continue;
        };
        if let Some(value) = field(line, "HEAD:") {
            entry.is_head = value == "true";
        } else if let Some(value) = field(line, "Author:") {
            entry.author = value.to_string();
        } else if let Some(value) = field(line, "Date:") {
            entry.date = value.to_string();
        } else if let Some(value) = field(line, "Tag:") {
            entry.tag = Some(value.to_string());
        } else if let Some(text) = line.strip_prefix("    ") {
            if !entry.message.is_empty() {
                entry.message.push('\n');
            }
            entry.message.push_str(text);
        }
    }
    entries
}

/// Parse `show` output.
fn parse_show(out: &str) -> Result<ShowSummary> {
    let lines: Vec<&str> = out.lines().collect();
    let mut summary = ShowSummary::default();
    let mut message = Vec::new();
    for line in &lines {
        if let Some(hash) = field(line, "commit ") {
            summary.hash = hash.to_string();
        } else if let Some(value) = field(line, "Author:") {
            summary.author = value.to_string();
        } else if let Some(value) = field(line, "Date:") {
            summary.date = value.to_string();
        } else if let Some(value) = field(line, "Parent:") {
            summary.parent = Some(value.to_string());
        } else if let Some(value) = field(line, "Tree:") {
            summary.tree = value.to_string();
        } else if let Some(value) = field(line, "Type:") {
            summary.object_type = value.to_string();
        } else if let Some(text) = line.strip_prefix("    ") {
            message.push(text);
        }
    }
    if summary.hash.is_empty() {
        return Err(ClientError::Parse(out.to_string()));
    }
    summary.files = section(&lines, "Files:");
    summary.message = message.join("\n");
    Ok(summary)
}

/// Parse one `lock list` line: `<path> (<type>) by <user>[ expires: <date>]`.
fn parse_lock(line: &str) -> Option<LockEntry> {
    let (rest, expires) = match line.rsplit_once(" expires: ") {
        Some((rest, date)) => (rest, Some(date.trim().to_string())),
        None => (line, None),
    };
    let (head, user) = rest.rsplit_once(") by ")?;
    let (path, lock_type) = head.rsplit_once(" (")?;
    Some(LockEntry {
        path: path.to_string(),
        lock_type: lock_type.to_string(),
        user: user.trim().to_string(),
        expires,
    })
}

/// Parse the `[<branch> <hash>] <message>` line printed by `commit`.
fn parse_commit(out: &str) -> Result<String> {
    out.lines()
        .find_map(|line| {
            let inner = line.strip_prefix('[')?.split_once(']')?.0;
            inner.rsplit_once(' ').map(|(_, hash)| hash.to_string())
        })
        .ok_or_else(|| ClientError::Parse(out.to_string()))
}

/// Read a `<label>: N` count.
fn count(out: &str, label: &str) -> usize {
    out.lines()
        .find_map(|line| field(line.trim(), label))
        .and_then(|n| n.parse().ok())
        .unwrap_or_default()
}

impl ForesterClient {
    /// Client for an explicit binary.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            repo_dir: None,
            user: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Client for the binary named by `FORESTER_BIN`, else `forester` on
    /// `PATH`.
    pub fn discover() -> Self {
        Self::new(env::var_os(BIN_ENV).map_or_else(|| PathBuf::from("forester"), PathBuf::from))
    }

    /// Bind every call to the repository at `dir`.
    #[must_use]
    pub fn with_repo(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = Some(dir.into());
        self
    }

    /// Act as `user` for commits and locks.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Replace the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run one command and return its stdout.
    pub fn run(&self, args: &[&str]) -> Result<String> {
        let mut command = Command::new(&self.binary);
        command.arg("--no-color").arg("--no-prompt");
        if let Some(dir) = &self.repo_dir {
            command.arg("--repo-dir").arg(dir);
        }
        if let Some(user) = &self.user {
            command.arg("--user").arg(user);
        }
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(binary = %self.binary.display(), ?args, "running forester");
        let child = command.spawn()?;
        let (status, stdout, stderr) = wait_with_timeout(child, self.timeout)?;
        if status.success() {
            return Ok(stdout);
        }

        let message = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|text| !text.is_empty())
            .unwrap_or("Unknown error")
            .to_string();
        Err(ClientError::Failed {
            message,
            code: status.code(),
        })
    }

    /// Run a command whose output is not needed.
    fn exec(&self, args: &[&str]) -> Result<()> {
        self.run(args).map(drop)
    }

    /// `init <path>`.
    pub fn init(&self, path: &Path) -> Result<()> {
        self.exec(&["init", &path.to_string_lossy()])
    }

    /// `status`.
    pub fn status(&self) -> Result<StatusSummary> {
        Ok(parse_status(&self.run(&["status"])?))
    }

    /// `add <paths...>`.
    pub fn add(&self, paths: &[&str]) -> Result<()> {
        let mut args = vec!["add"];
        args.extend_from_slice(paths);
        self.exec(&args)
    }

    /// `commit -m <message>`; returns the new commit hash.
    pub fn commit(&self, message: &str, author: Option<&str>, tag: Option<&str>) -> Result<String> {
        let mut args = vec!["commit", "-m", message];
        if let Some(author) = author {
            args.extend(["--author", author]);
        }
        if let Some(tag) = tag {
            args.extend(["--tag", tag]);
        }
        parse_commit(&self.run(&args)?)
    }

    /// `commit --delete <hash>`.
    pub fn delete_commit(&self, hash: &str) -> Result<()> {
        self.exec(&["commit", "--delete", hash])
    }

    /// `log [branch] [--limit N]`.
    pub fn log(&self, branch: Option<&str>, limit: Option<usize>) -> Result<Vec<LogEntry>> {
        let limit = limit.map(|n| n.to_string());
        let mut args = vec!["log"];
        args.extend(branch);
        if let Some(limit) = &limit {
            args.extend(["--limit", limit]);
        }
        Ok(parse_log(&self.run(&args)?))
    }

    /// `show <hash>`.
    pub fn show(&self, hash: &str) -> Result<ShowSummary> {
        parse_show(&self.run(&["show", hash])?)
    }

    /// `branch`.
    pub fn branches(&self) -> Result<Vec<BranchEntry>> {
        Ok(self
            .run(&["branch"])?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| BranchEntry {
                is_current: line.starts_with("* "),
                name: line[2.min(line.len())..].trim().to_string(),
            })
            .collect())
    }

    /// `branch <name>`.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        self.exec(&["branch", name])
    }

    /// `branch -d <name>`.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        self.exec(&["branch", "-d", name])
    }

    /// `checkout <target> [--force]`.
    pub fn checkout(&self, target: &str, force: bool) -> Result<()> {
        let mut args = vec!["checkout", target];
        if force {
            args.push("--force");
        }
        self.exec(&args)
    }

    /// `gc [--dry-run] [--reflog-expire N]`.
    pub fn gc(&self, dry_run: bool, reflog_expire_days: Option<u32>) -> Result<GcSummary> {
        let days = reflog_expire_days.map(|n| n.to_string());
        let mut args = vec!["gc"];
        if dry_run {
            args.push("--dry-run");
        }
        if let Some(days) = &days {
            args.extend(["--reflog-expire", days]);
        }
        let out = self.run(&args)?;
        Ok(GcSummary {
            commits: count(&out, "Commits deleted:"),
            trees: count(&out, "Trees deleted:"),
            blobs: count(&out, "Blobs deleted:"),
        })
    }

    /// `rebuild --yes`.
    pub fn rebuild(&self) -> Result<()> {
        self.exec(&["rebuild", "--yes"])
    }

    /// `stash save [message]`; returns the stash hash.
    pub fn stash_save(&self, message: Option<&str>) -> Result<String> {
        let mut args = vec!["stash", "save"];
        args.extend(message);
        let out = self.run(&args)?;
        out.lines()
            .find_map(|line| field(line, "Saved stash "))
            .map(str::to_string)
            .ok_or_else(|| ClientError::Parse(out.clone()))
    }

    /// `stash list`.
    pub fn stash_list(&self) -> Result<Vec<StashEntry>> {
        Ok(self
            .run(&["stash", "list"])?
            .lines()
            .filter_map(|line| {
                let rest = line.strip_prefix("stash{")?;
                let (hash, message) = rest.split_once("}: ")?;
                Some(StashEntry {
                    hash: hash.to_string(),
                    message: message.to_string(),
                })
            })
            .collect())
    }

    /// `stash <action> [hash]` for `apply`, `pop` and `drop`.
    fn stash_action(&self, action: &str, hash: Option<&str>) -> Result<()> {
        let mut args = vec!["stash", action];
        args.extend(hash);
        self.exec(&args)
    }

    /// `stash apply [hash]`.
    pub fn stash_apply(&self, hash: Option<&str>) -> Result<()> {
        self.stash_action("apply", hash)
    }

    /// `stash pop [hash]`.
    pub fn stash_pop(&self, hash: Option<&str>) -> Result<()> {
        self.stash_action("pop", hash)
    }

    /// `stash drop [hash]`.
    pub fn stash_drop(&self, hash: Option<&str>) -> Result<()> {
        self.stash_action("drop", hash)
    }

    /// `compare <hash> [--cleanup] [--editor path]`.
    pub fn compare(&self, hash: &str, cleanup: bool, editor: Option<&Path>) -> Result<()> {
        let editor = editor.map(|p| p.to_string_lossy().into_owned());
        let mut args = vec!["compare", hash];
        if cleanup {
            args.push("--cleanup");
        }
        if let Some(editor) = &editor {
            args.extend(["--editor", editor]);
        }
        self.exec(&args)
    }

    /// `lock <path> --exclusive|--shared [--expire H]`.
    pub fn lock(&self, path: &str, exclusive: bool, expire_hours: Option<u32>) -> Result<()> {
        let hours = expire_hours.map(|n| n.to_string());
        let mode = if exclusive { "--exclusive" } else { "--shared" };
        let mut args = vec!["lock", path, mode];
        if let Some(hours) = &hours {
            args.extend(["--expire", hours]);
        }
        self.exec(&args)
    }

    /// `lock unlock <path> [--force]`.
    pub fn unlock(&self, path: &str, force: bool) -> Result<()> {
        let mut args = vec!["lock", "unlock", path];
        if force {
            args.push("--force");
        }
        self.exec(&args)
    }

    /// `lock list`.
    pub fn locks(&self) -> Result<Vec<LockEntry>> {
        Ok(self
            .run(&["lock", "list"])?
            .lines()
            .skip_while(|line| line.trim_end() != "Locks:")
            .skip(1)
            .filter_map(|line| parse_lock(line.trim()))
            .collect())
    }

    /// `tag`.
    pub fn tags(&self) -> Result<Vec<String>> {
        Ok(self
            .run(&["tag"])?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `tag <name> [commit]`.
    pub fn create_tag(&self, name: &str, commit: Option<&str>) -> Result<()> {
        let mut args = vec!["tag", name];
        args.extend(commit);
        self.exec(&args)
    }

    /// `tag --delete <name>`.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        self.exec(&["tag", "--delete", name])
    }

    /// `diff [a] [b]`.
    pub fn diff(&self, from: Option<&str>, to: Option<&str>) -> Result<String> {
        let mut args = vec!["diff"];
        args.extend(from);
        args.extend(to);
        self.run(&args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_sections() {
        let out = "On branch main\nHEAD: abc\n\nStaged files:\n  a.blend\n\nModified files:\n  b.png\n  c.png\n\nUntracked files:\n  notes.txt\n";
        let status = parse_status(out);
        assert_eq!(status.branch.as_deref(), Some("main"));
        assert_eq!(status.head.as_deref(), Some("abc"));
        assert_eq!(status.staged, vec!["a.blend"]);
        assert_eq!(status.modified, vec!["b.png", "c.png"]);
        assert!(status.deleted.is_empty());
        assert_eq!(status.untracked, vec!["notes.txt"]);
        assert!(!status.is_clean());

        let fresh = parse_status("On branch main\nNo commits yet\nNothing to commit, working tree clean\n");
        assert_eq!(fresh.head, None);
        assert!(fresh.is_clean());
    }

    #[test]
    fn parses_log_blocks() {
        let out = "commit aaa\nHEAD: true\nAuthor: ana\nDate:   2024-01-02 03:04:05\nTag:    v1\n\n    second\n    more\n\ncommit bbb\nAuthor: ben\nDate:   2024-01-01 00:00:00\n\n    first\n";
        let log = parse_log(out);
        assert_eq!(log.len(), 2);
        assert!(log[0].is_head);
        assert_eq!(log[0].tag.as_deref(), Some("v1"));
        assert_eq!(log[0].message, "second\nmore");
        assert!(!log[1].is_head);
        assert_eq!(log[1].author, "ben");
    }

    #[test]
    fn parses_show_and_commit_lines() {
        let out = "commit abc\nAuthor: ana\nDate:   2024-01-01 00:00:00\nParent: def\nTree:   123\nType:   commit\nFiles:\n  a.blend\n  tex/b.png\n\n    message\n";
        let show = parse_show(out).unwrap();
        assert_eq!(show.parent.as_deref(), Some("def"));
        assert_eq!(show.files, vec!["a.blend", "tex/b.png"]);
        assert_eq!(show.message, "message");
        assert!(parse_show("garbage").is_err());

        assert_eq!(parse_commit("[main abc123] hello").unwrap(), "abc123");
        assert_eq!(parse_commit("[detached abc123] hello").unwrap(), "abc123");
    }

    #[test]
    fn parses_lock_lines() {
        let lock = parse_lock("scenes/a b.blend (exclusive) by ana expires: 2024-01-01 10:00:00").unwrap();
        assert_eq!(lock.path, "scenes/a b.blend");
        assert_eq!(lock.lock_type, "exclusive");
        assert_eq!(lock.user, "ana");
        assert_eq!(lock.expires.as_deref(), Some("2024-01-01 10:00:00"));

        let open = parse_lock("a.blend (shared) by ben").unwrap();
        assert_eq!(open.expires, None);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let client = ForesterClient::new("/nonexistent/forester-binary");
        assert!(matches!(client.status(), Err(ClientError::Spawn(_))));
    }
}
