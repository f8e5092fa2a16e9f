use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::Duration,
};

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::{
    config::{ConfigStore, RepoConfig, StashConflictPolicy},
    diff,
    error::{ForesterError, Result},
    gc::{self, Roots},
    index::Index,
    locks::{LockRequest, LockStore},
    mutex::{Access, RepoGuard, RepoMutex},
    object::{HASH_LEN, ObjectKind, ObjectStore, hash_file, is_full_hash},
    reflog::Reflog,
    refs::{RefStore, validate_name, write_atomic},
    stash::plan_apply,
    tree::{FileMap, read_tree, write_tree},
    types::{
        BranchInfo, Commit, CommitDetails, CommitObject, CompareOutcome, FileLock, GcReport,
        Head, LockType, LogEntry, ObjectType, RebuildReport, ReflogEntry, Stash, StashObject,
        TagInfo, UnlockOutcome, WorkingStatus,
    },
    worktree::{DFM_DIR, FileStat, WorkTree, materialize_blob},
};

/// Branch created by `init`.
pub const DEFAULT_BRANCH: &str = "main";

/// Persisted staging area within `.DFM`.
const STAGING_FILE: &str = "staging.json";

/// Files modified more recently than this are hashed every time, since a
/// second write within the same timestamp tick would go unnoticed.
const STAT_CACHE_SETTLE: Duration = Duration::from_secs(2);

/// Staged paths: `Some(blob)` for new content, `None` for a deletion.
type Staged = BTreeMap<String, Option<String>>;

/// Map a configuration failure into a `ForesterError`.
fn config_error(error: &anyhow::Error) -> ForesterError {
    ForesterError::Config(format!("{error:#}"))
}

/// Leading characters of a hash used in messages.
fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

/// First line of a message, for reflog entries.
fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

/// Whether `spec` could be an abbreviated hash.
fn is_hex_prefix(spec: &str) -> bool {
    !spec.is_empty() && spec.len() <= HASH_LEN && spec.bytes().all(|b| b.is_ascii_hexdigit())
}

/// HEAD's files with the staging area applied on top.
fn overlay(head_files: &FileMap, staged: &Staged) -> FileMap {
    let mut files = head_files.clone();
    for (path, blob) in staged {
        match blob {
            Some(hash) => {
                files.insert(path.clone(), hash.clone());
            }
            None => {
                files.remove(path);
            }
        }
    }
    files
}

/// Human-readable name of where HEAD points.
fn describe_head(head: &Head) -> String {
    match head {
        Head::Branch(name) => name.clone(),
        Head::Detached(hash) => short(hash).to_string(),
    }
}

/// Spawn an editor on `target` without waiting for it.
#[allow(clippy::zombie_processes)]
fn launch_detached(editor: &Path, target: &Path) -> Result<()> {
    // The editor outlives this process.
    let child = Command::new(editor)
        .arg(target)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| {
            ForesterError::OperationError(format!(
                "Failed to launch editor {}: {e}",
                editor.display()
            ))
        })?;
    info!(pid = child.id(), editor = %editor.display(), target = %target.display(), "launched editor");
    Ok(())
}

/// A Forester repository: a working tree plus its `.DFM` directory.
///
/// `Repository` owns every engine component and implements the high-level
/// operations the CLI exposes. Mutating operations take the repository mutex
/// exclusively; read-only ones take it shared. The files under `.DFM` are the
/// source of truth and the SQLite index is kept in step with them, so a lost
/// or damaged index can always be regenerated with [`Repository::rebuild`].
pub struct Repository {
    /// Working tree root.
    root: PathBuf,
    /// The `.DFM` directory.
    dfm_dir: PathBuf,
    /// Loaded configuration.
    config: RepoConfig,
    /// Content-addressed objects.
    objects: ObjectStore,
    /// HEAD, branches and tags.
    refs: RefStore,
    /// Ref movement history.
    reflog: Reflog,
    /// Advisory file locks.
    locks: LockStore,
    /// Derived SQLite index.
    index: Index,
    /// Checked-out files.
    worktree: WorkTree,
    /// Cross-process command mutex.
    mutex: RepoMutex,
}

impl Repository {
    /// Create a repository at `path`, creating the directory if needed.
    ///
    /// The new repository has one orphan branch, `main`, and default
    /// configuration.
    pub fn init(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)?;
        let root = fs::canonicalize(path)?;
        let dfm_dir = root.join(DFM_DIR);
        if dfm_dir.exists() {
            return Err(ForesterError::AlreadyInitialized(root));
        }

        fs::create_dir_all(&dfm_dir)?;
        ObjectStore::new(&dfm_dir).ensure_layout()?;
        let refs = RefStore::new(&dfm_dir);
        refs.ensure_layout()?;
        refs.write_branch(DEFAULT_BRANCH, None)?;
        refs.set_head(&Head::Branch(DEFAULT_BRANCH.to_string()))?;
        fs::create_dir_all(dfm_dir.join("logs"))?;
        ConfigStore::new(&dfm_dir)
            .save(&RepoConfig::default())
            .map_err(|e| config_error(&e))?;

        info!(root = %root.display(), "initialized repository");
        Self::open(&root)
    }

    /// Open the repository containing `start`, walking up parent directories.
    pub fn discover(start: &Path) -> Result<Self> {
        let start = fs::canonicalize(start).unwrap_or_else(|_| start.to_path_buf());
        for dir in start.ancestors() {
            if dir.join(DFM_DIR).is_dir() {
                return Self::open(dir);
            }
        }
        Err(ForesterError::NotARepository(start))
    }

    /// Open the repository rooted at `root`.
    ///
    /// A missing index database is recreated and repopulated from `.DFM`.
    pub fn open(root: &Path) -> Result<Self> {
        let root =
            fs::canonicalize(root).map_err(|_| ForesterError::NotARepository(root.to_path_buf()))?;
        let dfm_dir = root.join(DFM_DIR);
        if !dfm_dir.is_dir() {
            return Err(ForesterError::NotARepository(root));
        }

        let config = ConfigStore::new(&dfm_dir)
            .load()
            .map_err(|e| config_error(&e))?;
        let (index, created) = Index::open(&dfm_dir)?;
        let repo = Self {
            objects: ObjectStore::new(&dfm_dir),
            refs: RefStore::new(&dfm_dir),
            reflog: Reflog::new(&dfm_dir),
            locks: LockStore::new(&dfm_dir),
            worktree: WorkTree::new(&root, &config.core.ignore),
            mutex: RepoMutex::new(&dfm_dir, Duration::from_secs(config.core.lock_timeout_secs)),
            index,
            config,
            dfm_dir,
            root,
        };

        if created {
            warn!("index database missing; rebuilding it from .DFM");
            let _guard = repo.mutex.acquire(Access::Exclusive)?;
            repo.rebuild_locked()?;
        }
        Ok(repo)
    }

    /// Working tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loaded configuration.
    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    /// User name used when none is given: `user.name` from the config, else
    /// the operating system user.
    pub fn default_user(&self) -> String {
        self.config
            .user
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(whoami::username)
    }

    /// Take the repository mutex and make sure the index is usable.
    fn guard(&self, access: Access) -> Result<RepoGuard> {
        let guard = self.mutex.acquire(access)?;
        self.index.verify_schema()?;
        Ok(guard)
    }

    // Lookups

    /// Where HEAD points.
    pub fn head(&self) -> Result<Head> {
        self.refs.head()
    }

    /// Commit HEAD resolves to, if any.
    fn head_commit(&self, head: &Head) -> Result<Option<String>> {
        match head {
            Head::Branch(name) => self.refs.read_branch(name),
            Head::Detached(hash) => Ok(Some(hash.clone())),
        }
    }

    /// Load a commit by full hash, preferring the index.
    fn load_commit(&self, hash: &str) -> Result<Commit> {
        if let Some(commit) = self.index.commit(hash)? {
            return Ok(commit);
        }
        match self.objects.get_json::<CommitObject>(ObjectKind::Commit, hash) {
            Ok(object) => Ok(Commit::from_object(hash.to_string(), object)),
            Err(ForesterError::MissingObject { .. }) => {
                Err(ForesterError::CommitNotFound(hash.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Flattened files of a commit; an absent commit has none.
    fn commit_files(&self, hash: Option<&str>) -> Result<FileMap> {
        match hash {
            Some(hash) => read_tree(&self.objects, &self.load_commit(hash)?.tree),
            None => Ok(FileMap::new()),
        }
    }

    /// Resolve `HEAD`, a hash, a unique hash prefix or a tag to a commit hash.
    fn resolve_commit(&self, spec: &str) -> Result<String> {
        let spec = spec.trim();
        if spec == "HEAD" {
            return self
                .head_commit(&self.refs.head()?)?
                .ok_or_else(|| ForesterError::CommitNotFound(spec.to_string()));
        }
        if is_hex_prefix(spec) {
            let prefix = spec.to_ascii_lowercase();
            let mut matches = self.index.commits_with_prefix(&prefix)?;
            match matches.len() {
                1 => return Ok(matches.remove(0)),
                0 => {}
                _ => return Err(ForesterError::AmbiguousHash(spec.to_string())),
            }
            if is_full_hash(&prefix) && self.objects.exists(ObjectKind::Commit, &prefix) {
                return Ok(prefix);
            }
        }
        if validate_name(spec).is_ok() && self.refs.tag_exists(spec) {
            return self.refs.read_tag(spec);
        }
        Err(ForesterError::CommitNotFound(spec.to_string()))
    }

    // Working tree

    /// Hash of a working file, served from the stat cache when possible.
    fn working_hash(&self, rel: &str, stat: FileStat) -> Result<String> {
        if let Some(hash) = self.index.cached_hash(rel, stat.size, stat.mtime_ns)? {
            return Ok(hash);
        }
        let hash = hash_file(&self.worktree.absolute(rel))?;
        let settled_before = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(i64::MAX)
            .saturating_sub(i64::try_from(STAT_CACHE_SETTLE.as_nanos()).unwrap_or(i64::MAX));
        if stat.mtime_ns < settled_before {
            self.index
                .remember_hash(rel, stat.size, stat.mtime_ns, &hash)?;
        }
        Ok(hash)
    }

    /// Every non-ignored working file with its content hash.
    fn working_files(&self) -> Result<FileMap> {
        let mut files = FileMap::new();
        for (path, stat) in self.worktree.scan()? {
            let hash = self.working_hash(&path, stat)?;
            files.insert(path, hash);
        }
        Ok(files)
    }

    /// Write every `target` file whose working content differs.
    fn write_files(&self, working: &FileMap, target: &FileMap) -> Result<usize> {
        let mut written = 0;
        for (path, hash) in target {
            if working.get(path) != Some(hash) {
                self.worktree.checkout_file(&self.objects, path, hash)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Read the persisted staging area.
    fn load_staging(&self) -> Result<Staged> {
        let path = self.dfm_dir.join(STAGING_FILE);
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Staged::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&contents).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable staging file");
            Staged::new()
        }))
    }

    /// Persist the staging area so a rebuild can restore it.
    fn save_staging(&self, staged: &Staged) -> Result<()> {
        let body = serde_json::to_vec_pretty(staged).map_err(|e| {
            ForesterError::OperationError(format!("Failed to encode staging area: {e}"))
        })?;
        write_atomic(&self.dfm_dir.join(STAGING_FILE), &body)
    }

    /// Append a reflog entry to the log file and the index.
    fn record(&self, entry: &ReflogEntry) -> Result<()> {
        self.reflog.append(entry)?;
        self.index.insert_reflog(entry)
    }

    // Status and staging

    /// Compare the working tree against HEAD and the staging area.
    pub fn status(&self) -> Result<WorkingStatus> {
        let _guard = self.guard(Access::Shared)?;
        self.status_locked()
    }

    /// [`Repository::status`] for callers already holding the mutex.
    fn status_locked(&self) -> Result<WorkingStatus> {
        let head = self.refs.head()?;
        let head_commit = self.head_commit(&head)?;
        let head_files = self.commit_files(head_commit.as_deref())?;
        let staged = self.index.staged()?;
        let expected = overlay(&head_files, &staged);
        let working = self.working_files()?;

        let mut modified = Vec::new();
        let mut untracked = Vec::new();
        for (path, hash) in &working {
            match expected.get(path) {
                Some(want) if want != hash => modified.push(path.clone()),
                Some(_) => {}
                None => untracked.push(path.clone()),
            }
        }
        let deleted = expected
            .keys()
            .filter(|path| !working.contains_key(*path))
            .cloned()
            .collect();

        Ok(WorkingStatus {
            head,
            head_commit,
            staged: staged.into_keys().collect(),
            modified,
            deleted,
            untracked,
        })
    }

    /// Whether anything tracked is staged, modified or deleted.
    pub fn has_uncommitted_changes(&self) -> Result<bool> {
        let _guard = self.guard(Access::Shared)?;
        self.is_dirty_locked()
    }

    /// Dirty check for callers already holding the mutex. Untracked files
    /// do not count.
    fn is_dirty_locked(&self) -> Result<bool> {
        let status = self.status_locked()?;
        Ok(!(status.staged.is_empty() && status.modified.is_empty() && status.deleted.is_empty()))
    }

    /// Stage files. A directory (or the root) stages every change beneath
    /// it; a path that no longer exists stages its deletion.
    ///
    /// Returns the affected paths.
    pub fn add(&self, paths: &[PathBuf]) -> Result<Vec<String>> {
        let _guard = self.guard(Access::Exclusive)?;
        let head = self.refs.head()?;
        let head_files = self.commit_files(self.head_commit(&head)?.as_deref())?;
        let staged = self.index.staged()?;
        let expected = overlay(&head_files, &staged);
        let working = self.working_files()?;

        let mut changes: BTreeMap<String, bool> = BTreeMap::new();
        for path in paths {
            let rel = self.worktree.relative(path)?;
            let absolute = self.worktree.absolute(&rel);
            if rel.is_empty() || absolute.is_dir() {
                let dir_prefix = format!("{rel}/");
                let under = |p: &str| rel.is_empty() || p.starts_with(&dir_prefix);
                for (p, hash) in working.iter().filter(|(p, _)| under(p.as_str())) {
                    if expected.get(p) != Some(hash) {
                        changes.insert(p.clone(), true);
                    }
                }
                for p in expected.keys().filter(|p| under(p.as_str())) {
                    if !working.contains_key(p) {
                        changes.insert(p.clone(), false);
                    }
                }
            } else if working.contains_key(&rel) {
                changes.insert(rel, true);
            } else if self.worktree.is_ignored(&rel) {
                warn!(path = %rel, "skipping ignored path");
            } else if expected.contains_key(&rel) || staged.contains_key(&rel) {
                changes.insert(rel, false);
            } else {
                return Err(ForesterError::PathNotFound(path.display().to_string()));
            }
        }

        let tx = self.index.begin()?;
        for (path, present) in &changes {
            if *present {
                let blob = self.objects.put_file(&self.worktree.absolute(path))?;
                if head_files.get(path) == Some(&blob) {
                    self.index.unstage(path)?;
                } else {
                    self.index.stage(path, Some(&blob))?;
                }
            } else if head_files.contains_key(path) {
                self.index.stage(path, None)?;
            } else {
                self.index.unstage(path)?;
            }
        }
        self.save_staging(&self.index.staged()?)?;
        tx.commit()?;

        debug!(count = changes.len(), "staged paths");
        Ok(changes.into_keys().collect())
    }

    // Commits

    /// Record the staged changes as a new commit on the current branch (or
    /// the detached HEAD).
    ///
    /// The first commit of a branch may be made with nothing staged, which
    /// snapshots HEAD's (empty) tree. `no_verify` is accepted for protocol
    /// compatibility; there are no hooks to skip.
    pub fn commit(
        &self,
        message: &str,
        author: Option<&str>,
        tag: Option<&str>,
        no_verify: bool,
    ) -> Result<Commit> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ForesterError::EmptyMessage);
        }
        if let Some(tag) = tag {
            validate_name(tag)?;
        }

        let _guard = self.guard(Access::Exclusive)?;
        if let Some(tag) = tag
            && self.refs.tag_exists(tag)
        {
            return Err(ForesterError::TagExists(tag.to_string()));
        }

        let head = self.refs.head()?;
        let parent = self.head_commit(&head)?;
        let staged = self.index.staged()?;
        if staged.is_empty() && parent.is_some() {
            return Err(ForesterError::NothingToCommit);
        }
        if let Some(hash) = staged
            .values()
            .flatten()
            .find(|hash| !self.objects.exists(ObjectKind::Blob, hash))
        {
            return Err(ForesterError::MissingObject {
                kind: ObjectKind::Blob.dir_name(),
                hash: hash.clone(),
            });
        }
        let head_files = self.commit_files(parent.as_deref())?;
        let tree = write_tree(&self.objects, &overlay(&head_files, &staged))?;
        if let Some(parent) = &parent
            && self.load_commit(parent)?.tree == tree
        {
            return Err(ForesterError::NothingToCommit);
        }

        let object = CommitObject {
            parent: parent.clone(),
            tree,
            author: author.map_or_else(|| self.default_user(), str::to_string),
            message: message.to_string(),
            tag: tag.map(str::to_string),
            branch: head.branch().map(str::to_string),
            timestamp: Utc::now(),
        };
        let hash = self.objects.put_json(ObjectKind::Commit, &object)?;
        let commit = Commit::from_object(hash.clone(), object);

        match &head {
            Head::Branch(name) => self.refs.write_branch(name, Some(&hash))?,
            Head::Detached(_) => self.refs.set_head(&Head::Detached(hash.clone()))?,
        }
        if let Some(tag) = tag {
            self.refs.write_tag(tag, &hash)?;
        }
        self.save_staging(&Staged::new())?;

        let kind = if parent.is_none() { "commit (initial)" } else { "commit" };
        let entry = ReflogEntry {
            ref_name: head.branch().unwrap_or("HEAD").to_string(),
            old_hash: parent,
            new_hash: Some(hash.clone()),
            timestamp: commit.timestamp,
            message: format!("{kind}: {}", first_line(message)),
        };
        let tx = self.index.begin()?;
        self.index.insert_commit(&commit)?;
        if let Head::Branch(name) = &head {
            self.index.upsert_branch(name, Some(&hash))?;
        }
        if let Some(tag) = tag {
            self.index.upsert_tag(tag, &hash)?;
        }
        self.record(&entry)?;
        self.index.clear_staged()?;
        tx.commit()?;

        if no_verify {
            debug!("--no-verify given; no hooks are configured");
        }
        info!(hash = %commit.hash, branch = ?commit.branch, "created commit");
        Ok(commit)
    }

    /// Delete a single commit.
    ///
    /// Refused while a tag references it, while it heads a branch and has a
    /// parent, or while another commit names it as parent. A parentless branch
    /// head may be deleted; its branches become orphans. Its tree and blobs
    /// are left for GC.
    pub fn delete_commit(&self, spec: &str) -> Result<Commit> {
        let _guard = self.guard(Access::Exclusive)?;
        let hash = self.resolve_commit(spec)?;
        let commit = self.load_commit(&hash)?;

        if let Some(tag) = self.index.tag_for(&hash)? {
            return Err(ForesterError::CommitTagged { hash, tag });
        }
        let heads = self.index.branches_at(&hash)?;
        if commit.parent.is_some()
            && let Some(branch) = heads.first()
        {
            return Err(ForesterError::CommitIsBranchHead {
                hash,
                branch: branch.clone(),
            });
        }
        if self.refs.head()? == Head::Detached(hash.clone()) {
            return Err(ForesterError::CommitIsBranchHead {
                hash,
                branch: "HEAD".to_string(),
            });
        }
        if let Some(child) = self.index.child_of(&hash)? {
            return Err(ForesterError::CommitHasChildren { hash, child });
        }

        for branch in &heads {
            self.refs.write_branch(branch, None)?;
        }
        self.objects.remove(ObjectKind::Commit, &hash)?;

        let tx = self.index.begin()?;
        self.index.delete_commit(&hash)?;
        for branch in &heads {
            self.index.upsert_branch(branch, None)?;
            self.record(&ReflogEntry {
                ref_name: branch.clone(),
                old_hash: Some(hash.clone()),
                new_hash: None,
                timestamp: Utc::now(),
                message: format!("commit delete: {}", short(&hash)),
            })?;
        }
        tx.commit()?;

        info!(%hash, orphaned = ?heads, "deleted commit");
        Ok(commit)
    }

    /// First-parent history of a branch (or HEAD), newest first.
    pub fn log(&self, branch: Option<&str>, limit: Option<usize>) -> Result<Vec<LogEntry>> {
        let _guard = self.guard(Access::Shared)?;
        let start = match branch {
            Some(name) => self.refs.read_branch(name)?,
            None => self.head_commit(&self.refs.head()?)?,
        };

        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut next = start;
        while let Some(hash) = next {
            if limit.is_some_and(|limit| entries.len() >= limit) || !seen.insert(hash.clone()) {
                break;
            }
            let commit = self.load_commit(&hash)?;
            next = commit.parent.clone();
            entries.push(LogEntry {
                is_head: entries.is_empty(),
                tag: self.index.tag_for(&hash)?,
                commit,
            });
        }
        Ok(entries)
    }

    /// Details and file list of a commit or a stash.
    pub fn show(&self, spec: &str) -> Result<CommitDetails> {
        let _guard = self.guard(Access::Shared)?;
        match self.resolve_commit(spec) {
            Ok(hash) => {
                let commit = self.load_commit(&hash)?;
                let files = read_tree(&self.objects, &commit.tree)?;
                Ok(CommitDetails {
                    hash,
                    object_type: ObjectType::Commit,
                    author: commit.author,
                    timestamp: commit.timestamp,
                    parent: commit.parent,
                    tree: commit.tree,
                    files: files.into_keys().collect(),
                    message: commit.message,
                })
            }
            Err(ForesterError::CommitNotFound(_)) => {
                let stash = self
                    .resolve_stash(Some(spec))
                    .map_err(|_| ForesterError::CommitNotFound(spec.to_string()))?;
                let files = read_tree(&self.objects, &stash.tree)?;
                Ok(CommitDetails {
                    hash: stash.hash,
                    object_type: ObjectType::Stash,
                    author: format!("stash on {}", stash.branch.as_deref().unwrap_or("HEAD")),
                    timestamp: stash.timestamp,
                    parent: stash.base,
                    tree: stash.tree,
                    files: files.into_keys().collect(),
                    message: stash.message,
                })
            }
            Err(e) => Err(e),
        }
    }

    // Branches

    /// Every branch, ordered by name.
    pub fn branches(&self) -> Result<Vec<BranchInfo>> {
        let _guard = self.guard(Access::Shared)?;
        let head = self.refs.head()?;
        Ok(self
            .index
            .branches()?
            .into_iter()
            .map(|(name, head_hash)| BranchInfo {
                is_current: head.branch() == Some(name.as_str()),
                name,
                head: head_hash,
            })
            .collect())
    }

    /// Create a branch at the current head commit without switching to it.
    pub fn create_branch(&self, name: &str) -> Result<BranchInfo> {
        validate_name(name)?;
        let _guard = self.guard(Access::Exclusive)?;
        if self.refs.branch_exists(name) {
            return Err(ForesterError::BranchExists(name.to_string()));
        }

        let head = self.refs.head()?;
        let start = self.head_commit(&head)?;
        self.refs.write_branch(name, start.as_deref())?;

        let tx = self.index.begin()?;
        self.index.upsert_branch(name, start.as_deref())?;
        self.record(&ReflogEntry {
            ref_name: name.to_string(),
            old_hash: None,
            new_hash: start.clone(),
            timestamp: Utc::now(),
            message: format!("branch: created from {}", describe_head(&head)),
        })?;
        tx.commit()?;

        Ok(BranchInfo {
            name: name.to_string(),
            head: start,
            is_current: false,
        })
    }

    /// Delete a branch. The current branch and the last branch are kept.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        let _guard = self.guard(Access::Exclusive)?;
        let head_hash = self.refs.read_branch(name)?;
        if self.refs.head()?.branch() == Some(name) {
            return Err(ForesterError::CannotDeleteCurrent(name.to_string()));
        }
        if self.refs.branches()?.len() <= 1 {
            return Err(ForesterError::CannotDeleteLast(name.to_string()));
        }

        self.refs.delete_branch(name)?;
        let tx = self.index.begin()?;
        self.index.delete_branch(name)?;
        self.record(&ReflogEntry {
            ref_name: name.to_string(),
            old_hash: head_hash,
            new_hash: None,
            timestamp: Utc::now(),
            message: "branch: deleted".to_string(),
        })?;
        tx.commit()?;
        info!(branch = name, "deleted branch");
        Ok(())
    }

    /// Switch to a branch, or detach HEAD at a commit.
    ///
    /// Refuses when tracked files have uncommitted changes unless `force` is
    /// set. Files tracked by the old HEAD but absent from the target are
    /// removed; untracked files are left alone. The staging area is cleared.
    pub fn checkout(&self, target: &str, force: bool) -> Result<Head> {
        let _guard = self.guard(Access::Exclusive)?;
        let new_head = if self.refs.branch_exists(target) {
            Head::Branch(target.to_string())
        } else {
            match self.resolve_commit(target) {
                Ok(hash) => Head::Detached(hash),
                Err(ForesterError::CommitNotFound(_)) if !is_hex_prefix(target) => {
                    return Err(ForesterError::BranchNotFound(target.to_string()));
                }
                Err(e) => return Err(e),
            }
        };
        if !force && self.is_dirty_locked()? {
            return Err(ForesterError::UncommittedChanges {
                repo_dir: self.root.clone(),
            });
        }

        let old_head = self.refs.head()?;
        let old_commit = self.head_commit(&old_head)?;
        let new_commit = self.head_commit(&new_head)?;
        let old_files = self.commit_files(old_commit.as_deref())?;
        let new_files = self.commit_files(new_commit.as_deref())?;

        let working = self.working_files()?;
        let written = self.write_files(&working, &new_files)?;
        let mut removed = 0;
        for path in old_files.keys().filter(|p| !new_files.contains_key(*p)) {
            if working.contains_key(path) {
                self.worktree.remove_file(path)?;
                removed += 1;
            }
        }

        self.refs.set_head(&new_head)?;
        self.save_staging(&Staged::new())?;
        let tx = self.index.begin()?;
        self.index.clear_staged()?;
        self.record(&ReflogEntry {
            ref_name: "HEAD".to_string(),
            old_hash: old_commit,
            new_hash: new_commit,
            timestamp: Utc::now(),
            message: format!(
                "checkout: moving from {} to {}",
                describe_head(&old_head),
                describe_head(&new_head)
            ),
        })?;
        tx.commit()?;

        info!(target, written, removed, "checked out");
        Ok(new_head)
    }

    // Tags

    /// Every tag, ordered by name.
    pub fn tags(&self) -> Result<Vec<TagInfo>> {
        let _guard = self.guard(Access::Shared)?;
        Ok(self
            .index
            .tags()?
            .into_iter()
            .map(|(name, commit)| TagInfo { name, commit })
            .collect())
    }

    /// Tag a commit (HEAD when omitted). A commit carries at most one tag.
    pub fn create_tag(&self, name: &str, commit: Option<&str>) -> Result<TagInfo> {
        validate_name(name)?;
        let _guard = self.guard(Access::Exclusive)?;
        if self.refs.tag_exists(name) {
            return Err(ForesterError::TagExists(name.to_string()));
        }
        let hash = self.resolve_commit(commit.unwrap_or("HEAD"))?;
        if let Some(tag) = self.index.tag_for(&hash)? {
            return Err(ForesterError::CommitAlreadyTagged { hash, tag });
        }

        self.refs.write_tag(name, &hash)?;
        self.index.upsert_tag(name, &hash)?;
        Ok(TagInfo {
            name: name.to_string(),
            commit: hash,
        })
    }

    /// Remove a tag. The commit is untouched.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        let _guard = self.guard(Access::Exclusive)?;
        self.refs.delete_tag(name)?;
        self.index.delete_tag(name)?;
        info!(tag = name, "deleted tag");
        Ok(())
    }

    // Maintenance

    /// Mark-and-sweep garbage collection.
    ///
    /// Roots are branch heads, tags, a detached HEAD, stashes, staged blobs,
    /// and both ends of every reflog entry younger than `expire_days`
    /// (default from config). With `dry_run` the counts are computed and nothing is deleted.
    pub fn gc(&self, dry_run: bool, expire_days: Option<u32>) -> Result<GcReport> {
        let _guard = self.guard(Access::Exclusive)?;
        let days = expire_days.unwrap_or(self.config.gc.reflog_expire_days);
        let cutoff = Utc::now() - TimeDelta::days(i64::from(days));

        // Roots are read from the files under .DFM, never the index.
        let mut roots = Roots::default();
        roots
            .commits
            .extend(self.refs.branches()?.into_iter().filter_map(|(_, head)| head));
        roots
            .commits
            .extend(self.refs.tags()?.into_iter().map(|(_, commit)| commit));
        if let Head::Detached(hash) = self.refs.head()? {
            roots.commits.push(hash);
        }
        for hash in self.objects.list(ObjectKind::Stash)? {
            match self.objects.get_json::<StashObject>(ObjectKind::Stash, &hash) {
                Ok(stash) => {
                    roots.trees.push(stash.tree);
                    roots.commits.extend(stash.base);
                }
                Err(e) => warn!(%hash, error = %e, "skipping unreadable stash during gc"),
            }
        }
        roots
            .blobs
            .extend(self.load_staging()?.into_values().flatten());
        roots
            .blobs
            .extend(self.index.staged()?.into_values().flatten());
        let mut expired = 0;
        for entry in self.reflog.entries()? {
            if entry.timestamp >= cutoff {
                roots.commits.extend(entry.old_hash);
                roots.commits.extend(entry.new_hash);
            } else {
                expired += 1;
            }
        }

        let reachable = gc::mark(&self.objects, &roots);
        let swept = gc::sweep(&self.objects, &reachable, dry_run)?;
        let mut report = GcReport {
            commits_deleted: swept.commits.len(),
            trees_deleted: swept.trees,
            blobs_deleted: swept.blobs,
            reflog_pruned: expired,
            missing_objects: reachable.missing,
            tmp_files_removed: 0,
            dry_run,
        };

        if !dry_run {
            report.reflog_pruned = self.reflog.prune(cutoff)?;
            let tx = self.index.begin()?;
            self.index.prune_reflog(cutoff)?;
            for hash in &swept.commits {
                self.index.delete_commit(hash)?;
            }
            tx.commit()?;
            // Writers hold the mutex exclusively, so nothing is mid-write.
            report.tmp_files_removed = self.objects.clear_tmp(Duration::ZERO)?;
        }

        info!(
            commits = report.commits_deleted,
            trees = report.trees_deleted,
            blobs = report.blobs_deleted,
            reflog = report.reflog_pruned,
            missing = report.missing_objects,
            dry_run,
            "garbage collection finished"
        );
        Ok(report)
    }

    /// Regenerate the index from the files under `.DFM`.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let _guard = self.mutex.acquire(Access::Exclusive)?;
        self.rebuild_locked()
    }

    /// [`Repository::rebuild`] for callers already holding the mutex.
    fn rebuild_locked(&self) -> Result<RebuildReport> {
        self.index.reset()?;
        let mut report = RebuildReport::default();
        let tx = self.index.begin()?;

        for hash in self.objects.list(ObjectKind::Commit)? {
            match self.objects.get_json::<CommitObject>(ObjectKind::Commit, &hash) {
                Ok(object) => {
                    self.index
                        .insert_commit(&Commit::from_object(hash, object))?;
                    report.commits += 1;
                }
                Err(e) => {
                    warn!(%hash, error = %e, "skipping unreadable commit");
                    report.skipped += 1;
                }
            }
        }
        for (name, head) in self.refs.branches()? {
            self.index.upsert_branch(&name, head.as_deref())?;
            report.branches += 1;
        }
        for (name, commit) in self.refs.tags()? {
            self.index.upsert_tag(&name, &commit)?;
            report.tags += 1;
        }
        for entry in self.reflog.entries()? {
            self.index.insert_reflog(&entry)?;
            report.reflog_entries += 1;
        }
        for hash in self.objects.list(ObjectKind::Stash)? {
            match self.objects.get_json::<StashObject>(ObjectKind::Stash, &hash) {
                Ok(object) => {
                    self.index.insert_stash(&Stash::from_object(hash, object))?;
                    report.stashes += 1;
                }
                Err(e) => {
                    warn!(%hash, error = %e, "skipping unreadable stash");
                    report.skipped += 1;
                }
            }
        }
        let locks = self.locks.purge_expired(Utc::now())?;
        self.index.replace_locks(&locks)?;
        report.locks = locks.len();
        for (path, blob) in self.load_staging()? {
            self.index.stage(&path, blob.as_deref())?;
        }
        tx.commit()?;

        info!(
            commits = report.commits,
            branches = report.branches,
            tags = report.tags,
            stashes = report.stashes,
            skipped = report.skipped,
            "rebuilt index"
        );
        Ok(report)
    }

    // Stash

    /// Snapshot the whole working tree and reset it to HEAD.
    ///
    /// Untracked files are part of the snapshot and are removed afterwards;
    /// ignored files are never touched.
    pub fn stash_save(&self, message: Option<&str>) -> Result<Stash> {
        let _guard = self.guard(Access::Exclusive)?;
        let head = self.refs.head()?;
        let base = self.head_commit(&head)?;
        let head_files = self.commit_files(base.as_deref())?;
        let working = self.working_files()?;
        if working == head_files && self.index.staged()?.is_empty() {
            return Err(ForesterError::NoLocalChanges);
        }

        let mut snapshot = FileMap::new();
        for (path, hash) in &working {
            let blob = if self.objects.exists(ObjectKind::Blob, hash) {
                hash.clone()
            } else {
                self.objects.put_file(&self.worktree.absolute(path))?
            };
            snapshot.insert(path.clone(), blob);
        }
        let tree = write_tree(&self.objects, &snapshot)?;
        let message = message
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map_or_else(
                || match &base {
                    Some(hash) => format!("WIP on {}: {}", describe_head(&head), short(hash)),
                    None => format!("WIP on {}", describe_head(&head)),
                },
                str::to_string,
            );
        let object = StashObject {
            base,
            tree,
            branch: head.branch().map(str::to_string),
            message,
            timestamp: Utc::now(),
            nonce: rand::random::<u64>(),
        };
        let hash = self.objects.put_json(ObjectKind::Stash, &object)?;
        let stash = Stash::from_object(hash, object);
        self.index.insert_stash(&stash)?;

        for path in working.keys().filter(|p| !head_files.contains_key(*p)) {
            self.worktree.remove_file(path)?;
        }
        self.write_files(&working, &head_files)?;
        self.save_staging(&Staged::new())?;
        self.index.clear_staged()?;

        info!(hash = %stash.hash, files = snapshot.len(), "saved stash");
        Ok(stash)
    }

    /// Every stash, newest first.
    pub fn stash_list(&self) -> Result<Vec<Stash>> {
        let _guard = self.guard(Access::Shared)?;
        self.index.stashes()
    }

    /// Re-apply a stash (the newest when omitted) and keep it.
    pub fn stash_apply(&self, spec: Option<&str>) -> Result<Stash> {
        let _guard = self.guard(Access::Exclusive)?;
        let stash = self.resolve_stash(spec)?;
        self.apply_stash_locked(&stash)?;
        Ok(stash)
    }

    /// Re-apply a stash (the newest when omitted) and drop it.
    pub fn stash_pop(&self, spec: Option<&str>) -> Result<Stash> {
        let _guard = self.guard(Access::Exclusive)?;
        let stash = self.resolve_stash(spec)?;
        self.apply_stash_locked(&stash)?;
        self.drop_stash_locked(&stash)?;
        Ok(stash)
    }

    /// Delete a stash (the newest when omitted) without applying it.
    pub fn stash_drop(&self, spec: Option<&str>) -> Result<Stash> {
        let _guard = self.guard(Access::Exclusive)?;
        let stash = self.resolve_stash(spec)?;
        self.drop_stash_locked(&stash)?;
        Ok(stash)
    }

    /// Find a stash by unique hash prefix, or the newest one.
    fn resolve_stash(&self, spec: Option<&str>) -> Result<Stash> {
        let mut stashes = self.index.stashes()?;
        if stashes.is_empty() {
            return Err(ForesterError::NoStashes);
        }
        let Some(spec) = spec.map(str::trim) else {
            return Ok(stashes.remove(0));
        };
        if !is_hex_prefix(spec) {
            return Err(ForesterError::StashNotFound(spec.to_string()));
        }
        let matches = self.index.stashes_with_prefix(&spec.to_ascii_lowercase())?;
        match matches.as_slice() {
            [hash] => stashes
                .into_iter()
                .find(|s| &s.hash == hash)
                .ok_or_else(|| ForesterError::StashNotFound(spec.to_string())),
            [] => Err(ForesterError::StashNotFound(spec.to_string())),
            _ => Err(ForesterError::AmbiguousHash(spec.to_string())),
        }
    }

    /// Write a stash's changes into the working tree.
    fn apply_stash_locked(&self, stash: &Stash) -> Result<()> {
        let base_files = self.commit_files(stash.base.as_deref())?;
        let stash_files = read_tree(&self.objects, &stash.tree)?;
        let current = self.working_files()?;
        let plan = plan_apply(&base_files, &stash_files, &current);

        if !plan.conflicts.is_empty() {
            match self.config.stash.conflict {
                StashConflictPolicy::Fail => {
                    return Err(ForesterError::StashConflict {
                        paths: plan.conflicts,
                    });
                }
                StashConflictPolicy::Overwrite => {
                    warn!(paths = ?plan.conflicts, "overwriting diverged files from stash");
                }
            }
        }

        for (path, hash) in &plan.writes {
            self.worktree.checkout_file(&self.objects, path, hash)?;
        }
        for path in &plan.removals {
            self.worktree.remove_file(path)?;
        }
        info!(
            hash = %stash.hash,
            written = plan.writes.len(),
            removed = plan.removals.len(),
            "applied stash"
        );
        Ok(())
    }

    /// Remove a stash object and its index row.
    fn drop_stash_locked(&self, stash: &Stash) -> Result<()> {
        self.objects.remove(ObjectKind::Stash, &stash.hash)?;
        self.index.delete_stash(&stash.hash)?;
        info!(hash = %stash.hash, "dropped stash");
        Ok(())
    }

    // Locks

    /// Branch name locks are scoped to.
    fn lock_branch(&self) -> Result<String> {
        Ok(match self.refs.head()? {
            Head::Branch(name) => name,
            Head::Detached(_) => "HEAD".to_string(),
        })
    }

    /// Normalize a lock path; the repository root itself cannot be locked.
    fn lock_path(&self, path: &Path) -> Result<String> {
        let rel = self.worktree.relative(path)?;
        if rel.is_empty() {
            return Err(ForesterError::PathNotFound(path.display().to_string()));
        }
        Ok(rel)
    }

    /// Drop expired locks and mirror the rest into the index.
    fn sync_locks(&self) -> Result<()> {
        let active = self.locks.purge_expired(Utc::now())?;
        self.index.replace_locks(&active)
    }

    /// Take or refresh an advisory lock on a file for `user` on the current
    /// branch. Without `expire_hours` the configured default applies.
    pub fn lock(
        &self,
        path: &Path,
        lock_type: LockType,
        expire_hours: Option<u32>,
        user: &str,
    ) -> Result<FileLock> {
        let _guard = self.guard(Access::Exclusive)?;
        let rel = self.lock_path(path)?;
        let branch = self.lock_branch()?;
        let request = LockRequest {
            file_path: &rel,
            lock_type,
            user,
            branch: &branch,
            expire_hours: expire_hours.or(Some(self.config.locks.default_expire_hours)),
        };
        let lock = self.locks.lock(&request, Utc::now())?;
        self.sync_locks()?;
        Ok(lock)
    }

    /// Release a lock. Someone else's lock needs `force`.
    pub fn unlock(&self, path: &Path, user: &str, force: bool) -> Result<UnlockOutcome> {
        let _guard = self.guard(Access::Exclusive)?;
        let rel = self.lock_path(path)?;
        let branch = self.lock_branch()?;
        let outcome = self.locks.unlock(&rel, &branch, user, force, Utc::now())?;
        self.sync_locks()?;
        Ok(outcome)
    }

    /// Active locks on the current branch. Expired locks are hidden here and
    /// purged by the next lock or unlock.
    pub fn locks(&self) -> Result<Vec<FileLock>> {
        let _guard = self.guard(Access::Shared)?;
        let now = Utc::now();
        Ok(self
            .index
            .locks(&self.lock_branch()?)?
            .into_iter()
            .filter(|lock| lock.is_active(now))
            .collect())
    }

    // Compare and diff

    /// Root directory for compare scratch copies.
    fn compare_root(&self) -> PathBuf {
        match &self.config.compare.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.root.join(dir),
            None => self.dfm_dir.join("compare"),
        }
    }

    /// Materialize a commit into its own scratch directory, optionally opening
    /// the first `.blend` file (or the directory) in `editor`. With `cleanup`
    /// the scratch directory is removed instead.
    pub fn compare(
        &self,
        spec: &str,
        editor: Option<&Path>,
        cleanup: bool,
    ) -> Result<CompareOutcome> {
        let _guard = self.guard(Access::Shared)?;
        let hash = self.resolve_commit(spec)?;
        let dir = self.compare_root().join(&hash);

        if cleanup {
            if dir.exists() {
                fs::remove_dir_all(&dir)?;
                info!(path = %dir.display(), "removed compare directory");
            }
            return Ok(CompareOutcome {
                path: dir,
                opened: None,
            });
        }
        if dir.exists() {
            return Err(ForesterError::CompareExists(dir));
        }

        let files = self.commit_files(Some(&hash))?;
        fs::create_dir_all(&dir)?;
        let scratch = WorkTree::new(&dir, &[]);
        for (path, blob) in &files {
            materialize_blob(&self.objects, blob, &scratch.absolute(path))?;
        }

        let opened = match editor {
            Some(editor) => {
                let target = files
                    .keys()
                    .find(|p| p.ends_with(".blend"))
                    .map_or_else(|| dir.clone(), |p| scratch.absolute(p));
                launch_detached(editor, &target)?;
                Some(target)
            }
            None => None,
        };
        Ok(CompareOutcome { path: dir, opened })
    }

    /// Unified diff. No arguments compare HEAD with the working tree; one
    /// compares that commit with the working tree; two compare two commits.
    pub fn diff(&self, from: Option<&str>, to: Option<&str>) -> Result<String> {
        let _guard = self.guard(Access::Shared)?;
        let left_commit = match from {
            Some(spec) => Some(self.resolve_commit(spec)?),
            None => self.head_commit(&self.refs.head()?)?,
        };
        let right_commit = to.map(|spec| self.resolve_commit(spec)).transpose()?;
        let left = self.commit_files(left_commit.as_deref())?;
        let right = match &right_commit {
            Some(hash) => self.commit_files(Some(hash))?,
            None => self.working_files()?,
        };

        let paths: BTreeSet<&String> = left.keys().chain(right.keys()).collect();
        let mut out = String::new();
        for path in paths {
            let (old_hash, new_hash) = (left.get(path), right.get(path));
            if old_hash == new_hash {
                continue;
            }
            let old = old_hash
                .map(|h| self.objects.get(ObjectKind::Blob, h))
                .transpose()?;
            let new = match new_hash {
                Some(h) if right_commit.is_some() => Some(self.objects.get(ObjectKind::Blob, h)?),
                Some(_) => Some(fs::read(self.worktree.absolute(path))?),
                None => None,
            };
            out.push_str(&diff::unified_diff(path, old.as_deref(), new.as_deref()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use tempfile::{TempDir, tempdir};

    use super::*;

    fn setup() -> (TempDir, Repository) {
        let tmp = tempdir().unwrap();
        let repo = Repository::init(&tmp.path().join("project")).unwrap();
        (tmp, repo)
    }

    fn write(repo: &Repository, rel: &str, contents: &str) {
        let path = repo.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn commit_all(repo: &Repository, message: &str) -> Commit {
        repo.add(&[PathBuf::from(".")]).unwrap();
        repo.commit(message, Some("ana"), None, false).unwrap()
    }

    #[test]
    fn init_creates_orphan_main() {
        let (_tmp, repo) = setup();
        let branches = repo.branches().unwrap();
        assert_eq!(
            branches,
            vec![BranchInfo {
                name: "main".to_string(),
                head: None,
                is_current: true,
            }]
        );
        assert!(repo.status().unwrap().head_commit.is_none());
        assert!(matches!(
            Repository::init(repo.root()),
            Err(ForesterError::AlreadyInitialized(_))
        ));
    }

    #[test]
    fn discover_walks_up_to_the_repository() {
        let (_tmp, repo) = setup();
        write(&repo, "textures/wood.png", "px");
        let found = Repository::discover(&repo.root().join("textures")).unwrap();
        assert_eq!(found.root(), repo.root());
    }

    #[test]
    fn commit_records_history_and_cleans_status() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        write(&repo, "textures/wood.png", "px");
        let first = commit_all(&repo, "  first  ");
        assert_eq!(first.message, "first");
        assert_eq!(first.parent, None);

        write(&repo, "scene.blend", "v2");
        let status = repo.status().unwrap();
        assert_eq!(status.modified, vec!["scene.blend".to_string()]);
        assert!(repo.has_uncommitted_changes().unwrap());

        let second = commit_all(&repo, "second");
        assert_eq!(second.parent.as_deref(), Some(first.hash.as_str()));
        assert!(repo.status().unwrap().is_clean());

        let log = repo.log(None, None).unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].is_head);
        assert_eq!(log[0].commit.hash, second.hash);
        assert_eq!(repo.log(None, Some(1)).unwrap().len(), 1);
    }

    #[test]
    fn commit_requires_message_and_changes() {
        let (_tmp, repo) = setup();
        assert!(matches!(
            repo.commit("   ", None, None, false),
            Err(ForesterError::EmptyMessage)
        ));

        // The root commit may snapshot an empty tree.
        let root = repo.commit("empty root", None, None, false).unwrap();
        assert!(root.parent.is_none());
        assert!(matches!(
            repo.commit("again", None, None, false),
            Err(ForesterError::NothingToCommit)
        ));
    }

    #[test]
    fn untracked_files_do_not_make_the_tree_dirty() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");
        write(&repo, "notes.txt", "todo");

        let status = repo.status().unwrap();
        assert_eq!(status.untracked, vec!["notes.txt".to_string()]);
        assert!(!repo.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn add_stages_deletions_and_unstages_reverts() {
        let (_tmp, repo) = setup();
        write(&repo, "a.txt", "a");
        write(&repo, "b.txt", "b");
        commit_all(&repo, "first");

        fs::remove_file(repo.root().join("a.txt")).unwrap();
        repo.add(&[PathBuf::from("a.txt")]).unwrap();
        assert_eq!(repo.status().unwrap().staged, vec!["a.txt".to_string()]);

        write(&repo, "b.txt", "changed");
        repo.add(&[PathBuf::from("b.txt")]).unwrap();
        write(&repo, "b.txt", "b");
        repo.add(&[PathBuf::from("b.txt")]).unwrap();
        assert_eq!(repo.status().unwrap().staged, vec!["a.txt".to_string()]);

        let commit = repo.commit("drop a", None, None, false).unwrap();
        assert_eq!(repo.show(&commit.hash).unwrap().files, vec!["b.txt".to_string()]);

        assert!(matches!(
            repo.add(&[PathBuf::from("missing.txt")]),
            Err(ForesterError::PathNotFound(_))
        ));
        assert!(matches!(
            repo.add(&[PathBuf::from(".DFM/HEAD")]),
            Err(ForesterError::PathOutsideRepository(_))
        ));
    }

    #[test]
    fn checkout_switches_tracked_files_only() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "main");
        commit_all(&repo, "on main");

        repo.create_branch("feature").unwrap();
        repo.checkout("feature", false).unwrap();
        write(&repo, "scene.blend", "feature");
        write(&repo, "extra.png", "img");
        commit_all(&repo, "on feature");
        write(&repo, "scratch.txt", "untracked");

        repo.checkout("main", false).unwrap();
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "main");
        assert!(!repo.root().join("extra.png").exists());
        assert!(repo.root().join("scratch.txt").exists());
        assert_eq!(repo.head().unwrap(), Head::Branch("main".to_string()));
    }

    #[test]
    fn checkout_refuses_dirty_tree_unless_forced() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let first = commit_all(&repo, "first");
        write(&repo, "scene.blend", "v2");
        commit_all(&repo, "second");
        write(&repo, "scene.blend", "dirty");

        assert!(matches!(
            repo.checkout(&first.hash, false),
            Err(ForesterError::UncommittedChanges { .. })
        ));
        let head = repo.checkout(&first.hash[..10], true).unwrap();
        assert_eq!(head, Head::Detached(first.hash.clone()));
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "v1");
        assert!(matches!(
            repo.checkout("nonexistent", false),
            Err(ForesterError::BranchNotFound(_))
        ));
    }

    #[test]
    fn branch_deletion_guards() {
        let (_tmp, repo) = setup();
        assert!(matches!(
            repo.delete_branch("main"),
            Err(ForesterError::CannotDeleteCurrent(_))
        ));
        repo.create_branch("feature").unwrap();
        assert!(matches!(
            repo.create_branch("feature"),
            Err(ForesterError::BranchExists(_))
        ));
        assert!(matches!(
            repo.create_branch("bad..name"),
            Err(ForesterError::InvalidName { .. })
        ));
        repo.delete_branch("feature").unwrap();
        assert_eq!(repo.branches().unwrap().len(), 1);
    }

    #[test]
    fn ref_names_cannot_escape_their_directories() {
        let (_tmp, repo) = setup();
        repo.create_branch("feature").unwrap();

        assert!(matches!(
            repo.delete_branch("../../HEAD"),
            Err(ForesterError::BranchNotFound(_))
        ));
        assert!(matches!(
            repo.delete_tag("../heads/feature"),
            Err(ForesterError::TagNotFound(_))
        ));
        assert!(repo.dfm_dir.join("HEAD").is_file());
        assert_eq!(repo.branches().unwrap().len(), 2);
        assert_eq!(repo.refs.head().unwrap(), Head::Branch("main".to_string()));
    }

    #[test]
    fn delete_commit_follows_reference_rules() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let first = commit_all(&repo, "first");
        write(&repo, "scene.blend", "v2");
        let second = commit_all(&repo, "second");

        let err = repo.delete_commit(&first.hash).unwrap_err();
        assert!(err.to_string().contains("has child commit"));
        let err = repo.delete_commit(&second.hash).unwrap_err();
        assert!(err.to_string().contains("HEAD of branch 'main'"));

        repo.create_tag("v1", Some(&second.hash)).unwrap();
        let err = repo.delete_commit(&second.hash).unwrap_err();
        assert!(err.to_string().contains("referenced by tag 'v1'"));
    }

    #[test]
    fn deleting_lone_root_commit_orphans_branch() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let root = commit_all(&repo, "only");
        repo.delete_commit(&root.hash).unwrap();

        assert_eq!(repo.branches().unwrap()[0].head, None);
        assert!(repo.log(None, None).unwrap().is_empty());
    }

    #[test]
    fn tags_are_unique_per_name_and_commit() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let commit = repo
            .add(&[PathBuf::from(".")])
            .and_then(|_| repo.commit("first", None, Some("release"), false))
            .unwrap();

        assert!(matches!(
            repo.create_tag("release", None),
            Err(ForesterError::TagExists(_))
        ));
        assert!(matches!(
            repo.create_tag("other", None),
            Err(ForesterError::CommitAlreadyTagged { .. })
        ));
        assert_eq!(repo.log(None, None).unwrap()[0].tag.as_deref(), Some("release"));
        assert_eq!(repo.show("release").unwrap().hash, commit.hash);

        repo.delete_tag("release").unwrap();
        assert!(repo.tags().unwrap().is_empty());
        let entry = &repo.log(None, None).unwrap()[0];
        assert_eq!(entry.tag, None);
        assert_eq!(entry.commit.tag.as_deref(), Some("release"));
        assert!(matches!(
            repo.delete_tag("release"),
            Err(ForesterError::TagNotFound(_))
        ));
    }

    #[test]
    fn stash_round_trip_restores_work() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");
        assert!(matches!(repo.stash_save(None), Err(ForesterError::NoLocalChanges)));

        write(&repo, "scene.blend", "wip");
        write(&repo, "new.png", "img");
        let stash = repo.stash_save(Some("experiment")).unwrap();
        assert_eq!(stash.message, "experiment");
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "v1");
        assert!(!repo.root().join("new.png").exists());
        assert_eq!(repo.stash_list().unwrap().len(), 1);

        repo.stash_pop(Some(&stash.hash[..8])).unwrap();
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "wip");
        assert!(repo.root().join("new.png").exists());
        assert!(matches!(repo.stash_drop(None), Err(ForesterError::NoStashes)));
    }

    #[test]
    fn stash_apply_reports_conflicts() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");
        write(&repo, "scene.blend", "stashed");
        repo.stash_save(None).unwrap();
        write(&repo, "scene.blend", "diverged");

        let err = repo.stash_apply(None).unwrap_err();
        assert!(matches!(err, ForesterError::StashConflict { ref paths } if paths == &["scene.blend"]));
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "diverged");
        assert_eq!(repo.stash_list().unwrap().len(), 1);
    }

    #[test]
    fn stash_apply_can_overwrite_diverged_files() {
        let (_tmp, mut repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");
        write(&repo, "scene.blend", "stashed");
        repo.stash_save(None).unwrap();
        write(&repo, "scene.blend", "diverged");

        repo.config.stash.conflict = StashConflictPolicy::Overwrite;
        repo.stash_apply(None).unwrap();
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "stashed");
        assert_eq!(repo.stash_list().unwrap().len(), 1);
    }

    #[test]
    fn gc_keeps_staged_blobs_until_committed() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let first = commit_all(&repo, "first");
        write(&repo, "scene.blend", "v2");
        repo.add(&[PathBuf::from("scene.blend")]).unwrap();

        let report = repo.gc(false, Some(0)).unwrap();
        assert_eq!(report.blobs_deleted, 0);
        commit_all(&repo, "second");

        repo.checkout(&first.hash, false).unwrap();
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "v1");
        repo.checkout("main", false).unwrap();
        assert_eq!(fs::read_to_string(repo.root().join("scene.blend")).unwrap(), "v2");
    }

    #[test]
    fn commit_refuses_staged_blob_that_is_gone() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        repo.add(&[PathBuf::from("scene.blend")]).unwrap();
        let blob = repo.index.staged().unwrap()["scene.blend"].clone().unwrap();
        repo.objects.remove(ObjectKind::Blob, &blob).unwrap();

        let err = repo.commit("first", None, None, false).unwrap_err();
        assert!(matches!(err, ForesterError::MissingObject { ref hash, .. } if hash == &blob));
        assert!(repo.log(None, None).unwrap().is_empty());
    }

    #[test]
    fn gc_roots_come_from_files_not_the_index() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");
        repo.create_branch("feature").unwrap();
        repo.checkout("feature", false).unwrap();
        write(&repo, "scene.blend", "feature");
        let feature = commit_all(&repo, "feature work");
        repo.create_tag("shot-01", None).unwrap();
        repo.checkout("main", false).unwrap();
        write(&repo, "scene.blend", "wip");
        let stash = repo.stash_save(None).unwrap();

        let conn = Connection::open(repo.dfm_dir.join(Index::FILE_NAME)).unwrap();
        conn.execute_batch(
            "DELETE FROM branches; DELETE FROM tags; DELETE FROM reflog; DELETE FROM stashes;",
        )
        .unwrap();
        drop(conn);

        let report = repo.gc(false, Some(0)).unwrap();
        assert_eq!(report.commits_deleted, 0);
        assert_eq!(report.trees_deleted, 0);
        assert_eq!(report.blobs_deleted, 0);
        assert!(repo.objects.exists(ObjectKind::Commit, &feature.hash));
        assert!(repo.objects.exists(ObjectKind::Tree, &stash.tree));
    }

    #[test]
    fn gc_keeps_reachable_and_sweeps_deleted_branches() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let kept = commit_all(&repo, "first");

        repo.create_branch("feature").unwrap();
        repo.checkout("feature", false).unwrap();
        write(&repo, "scene.blend", "feature");
        let dropped = commit_all(&repo, "feature work");
        repo.checkout("main", false).unwrap();
        repo.delete_branch("feature").unwrap();

        // Recent reflog entries still protect the commit.
        let report = repo.gc(false, None).unwrap();
        assert_eq!(report.commits_deleted, 0);

        let dry = repo.gc(true, Some(0)).unwrap();
        assert_eq!(dry.commits_deleted, 1);
        assert!(dry.reflog_pruned > 0);
        assert!(repo.show(&dropped.hash).is_ok());

        let report = repo.gc(false, Some(0)).unwrap();
        assert_eq!(report.commits_deleted, 1);
        assert_eq!(report.trees_deleted, 1);
        assert_eq!(report.blobs_deleted, 1);
        assert!(repo.show(&dropped.hash).is_err());
        assert!(repo.show(&kept.hash).is_ok());
    }

    #[test]
    fn rebuild_restores_index_from_files() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");
        repo.create_branch("feature").unwrap();
        write(&repo, "scene.blend", "staged");
        repo.add(&[PathBuf::from("scene.blend")]).unwrap();
        let before = (repo.branches().unwrap(), repo.log(None, None).unwrap());
        let root = repo.root().to_path_buf();
        drop(repo);

        fs::remove_file(root.join(DFM_DIR).join(Index::FILE_NAME)).unwrap();
        let repo = Repository::open(&root).unwrap();
        assert_eq!((repo.branches().unwrap(), repo.log(None, None).unwrap()), before);
        assert_eq!(repo.status().unwrap().staged, vec!["scene.blend".to_string()]);
    }

    #[test]
    fn damaged_index_is_reported_until_rebuilt() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        commit_all(&repo, "first");

        let conn = Connection::open(repo.dfm_dir.join(Index::FILE_NAME)).unwrap();
        conn.execute_batch("DROP TABLE reflog").unwrap();
        drop(conn);

        let err = repo.status().unwrap_err();
        assert!(err.to_string().contains("no such table: reflog"));
        assert_eq!(err.exit_code(), 3);

        let report = repo.rebuild().unwrap();
        assert_eq!(report.commits, 1);
        assert!(repo.status().unwrap().is_clean());
    }

    #[test]
    fn locks_are_scoped_to_user_and_branch() {
        let (_tmp, repo) = setup();
        write(&repo, "scene.blend", "v1");
        let path = PathBuf::from("scene.blend");

        repo.lock(&path, LockType::Exclusive, Some(2), "ana").unwrap();
        assert!(matches!(
            repo.lock(&path, LockType::Shared, None, "ben"),
            Err(ForesterError::LockConflict { .. })
        ));
        let locks = repo.locks().unwrap();
        assert_eq!(locks.len(), 1);
        assert!(locks[0].expires_at.is_some());

        assert!(matches!(
            repo.unlock(&path, "ben", false),
            Err(ForesterError::LockNotOwned { .. })
        ));
        assert!(matches!(
            repo.unlock(&path, "ben", true).unwrap(),
            UnlockOutcome::Released(_)
        ));
        assert_eq!(
            repo.unlock(&path, "ana", false).unwrap(),
            UnlockOutcome::NotLocked
        );
    }

    #[test]
    fn listing_locks_hides_expired_without_writing() {
        let (_tmp, repo) = setup();
        let now = Utc::now();
        let lock = |file_path: &str, expires_at| FileLock {
            file_path: file_path.to_string(),
            lock_type: LockType::Exclusive,
            user: "ana".to_string(),
            branch: "main".to_string(),
            created_at: now - TimeDelta::hours(3),
            expires_at,
        };
        let stored = vec![
            lock("old.blend", Some(now - TimeDelta::hours(1))),
            lock("scene.blend", Some(now + TimeDelta::hours(1))),
        ];
        let path = repo.dfm_dir.join(LockStore::FILE_NAME);
        fs::write(&path, serde_json::to_vec_pretty(&stored).unwrap()).unwrap();
        repo.index.replace_locks(&stored).unwrap();

        let listed = repo.locks().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].file_path, "scene.blend");
        let on_disk: Vec<FileLock> = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(repo.index.locks("main").unwrap().len(), 2);
    }

    #[test]
    fn compare_materializes_and_cleans_up() {
        let (_tmp, repo) = setup();
        write(&repo, "scenes/shot.blend", "v1");
        let commit = commit_all(&repo, "first");

        let outcome = repo.compare(&commit.hash, None, false).unwrap();
        assert_eq!(
            fs::read_to_string(outcome.path.join("scenes/shot.blend")).unwrap(),
            "v1"
        );
        assert!(matches!(
            repo.compare(&commit.hash, None, false),
            Err(ForesterError::CompareExists(_))
        ));
        let cleaned = repo.compare(&commit.hash, None, true).unwrap();
        assert!(!cleaned.path.exists());
    }

    #[test]
    fn diff_compares_head_with_working_tree() {
        let (_tmp, repo) = setup();
        write(&repo, "notes.txt", "one\ntwo\n");
        let first = commit_all(&repo, "first");
        write(&repo, "notes.txt", "one\nthree\n");

        let diff = repo.diff(None, None).unwrap();
        assert!(diff.contains("diff --forester a/notes.txt b/notes.txt"));
        assert!(diff.contains("-two\n+three\n"));

        let second = commit_all(&repo, "second");
        let between = repo.diff(Some(&first.hash), Some(&second.hash)).unwrap();
        assert_eq!(between, diff);
        assert!(repo.diff(None, None).unwrap().is_empty());
    }
}
