use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{ForesterError, Result};

/// Length of a full SHA-256 hex digest.
pub const HASH_LEN: usize = 64;

/// Hash algorithm directory inserted between the kind and the fan-out.
const ALGORITHM_DIR: &str = "sha256";

/// Directory for in-flight writes.
const TMP_DIR: &str = "tmp";

/// Kinds of immutable objects kept in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// Commit records.
    Commit,
    /// Directory listings.
    Tree,
    /// Raw file contents.
    Blob,
    /// Stash snapshots.
    Stash,
}

impl ObjectKind {
    /// Every kind, in the order GC reports them.
    pub const ALL: [Self; 4] = [Self::Commit, Self::Tree, Self::Blob, Self::Stash];

    /// Directory name under `objects/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Commit => "commits",
            Self::Tree => "trees",
            Self::Blob => "blobs",
            Self::Stash => "stashes",
        }
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of a file's contents, streamed.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Whether `hash` is a full lowercase SHA-256 hex digest.
pub fn is_full_hash(hash: &str) -> bool {
    hash.len() == HASH_LEN && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Content-addressed store rooted at `.DFM/objects`.
///
/// Objects are immutable. A write lands in `objects/tmp/` first and is renamed
/// into `objects/<kind>/sha256/<2 hex>/<62 hex>`, so a crashed writer never
/// leaves a truncated object behind.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    /// The `objects` directory.
    root: PathBuf,
}

impl ObjectStore {
    /// Directory name for objects within the `.DFM` directory.
    pub const DIR_NAME: &'static str = "objects";

    /// Create a store rooted inside the given `.DFM` directory.
    pub fn new(dfm_dir: &Path) -> Self {
        Self {
            root: dfm_dir.join(Self::DIR_NAME),
        }
    }

    /// Create the per-kind directory skeleton.
    pub fn ensure_layout(&self) -> Result<()> {
        for kind in ObjectKind::ALL {
            fs::create_dir_all(self.root.join(kind.dir_name()).join(ALGORITHM_DIR))?;
        }
        fs::create_dir_all(self.root.join(TMP_DIR))?;
        Ok(())
    }

    /// Path of an object, validating the hash first.
    pub fn path(&self, kind: ObjectKind, hash: &str) -> Result<PathBuf> {
        if !is_full_hash(hash) {
            return Err(ForesterError::CorruptObject {
                kind: kind.dir_name(),
                hash: hash.to_string(),
                message: "not a 64-character lowercase hex digest".to_string(),
            });
        }
        Ok(self
            .root
            .join(kind.dir_name())
            .join(ALGORITHM_DIR)
            .join(&hash[..2])
            .join(&hash[2..]))
    }

    /// Whether the object is present.
    pub fn exists(&self, kind: ObjectKind, hash: &str) -> bool {
        self.path(kind, hash).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Store `bytes`, returning their hash. Storing identical bytes again is a no-op.
    pub fn put(&self, kind: ObjectKind, bytes: &[u8]) -> Result<String> {
        let hash = hash_bytes(bytes);
        let dest = self.path(kind, &hash)?;
        if dest.is_file() {
            debug!(kind = kind.dir_name(), %hash, "object already stored");
            return Ok(hash);
        }

        let tmp = self.tmp_path()?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        self.commit_tmp(kind, &hash, &tmp, &dest)?;
        Ok(hash)
    }

    /// Stream a file into the blob store, hashing while copying.
    pub fn put_file(&self, source: &Path) -> Result<String> {
        let tmp = self.tmp_path()?;
        let mut hasher = Sha256::new();
        {
            let mut input = File::open(source)?;
            let mut output = File::create(&tmp)?;
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                let read = match input.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        drop(output);
                        remove_quietly(&tmp);
                        return Err(e.into());
                    }
                };
                hasher.update(&buf[..read]);
                output.write_all(&buf[..read])?;
            }
            output.sync_all()?;
        }

        let hash = hex::encode(hasher.finalize());
        let dest = self.path(ObjectKind::Blob, &hash)?;
        if dest.is_file() {
            remove_quietly(&tmp);
            return Ok(hash);
        }
        self.commit_tmp(ObjectKind::Blob, &hash, &tmp, &dest)?;
        Ok(hash)
    }

    /// Read an object's bytes.
    pub fn get(&self, kind: ObjectKind, hash: &str) -> Result<Vec<u8>> {
        let path = self.path(kind, hash)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ForesterError::MissingObject {
                kind: kind.dir_name(),
                hash: hash.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize `value` canonically and store it.
    pub fn put_json<T: Serialize>(&self, kind: ObjectKind, value: &T) -> Result<String> {
        let bytes = serde_json::to_vec(value).map_err(|e| {
            ForesterError::OperationError(format!("Failed to encode {} object: {e}", kind.dir_name()))
        })?;
        self.put(kind, &bytes)
    }

    /// Read and decode a JSON object.
    pub fn get_json<T: DeserializeOwned>(&self, kind: ObjectKind, hash: &str) -> Result<T> {
        let bytes = self.get(kind, hash)?;
        serde_json::from_slice(&bytes).map_err(|e| ForesterError::CorruptObject {
            kind: kind.dir_name(),
            hash: hash.to_string(),
            message: e.to_string(),
        })
    }

    /// Delete an object, reporting whether it existed.
    pub fn remove(&self, kind: ObjectKind, hash: &str) -> Result<bool> {
        let path = self.path(kind, hash)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                // Fan-out directories are recreated on demand.
                if let Some(parent) = path.parent() {
                    #[allow(clippy::let_underscore_must_use)]
                    {
                        let _ = fs::remove_dir(parent);
                    }
                }
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List the hashes of every stored object of a kind.
    ///
    /// Entries that do not form a valid hash are skipped with a warning.
    pub fn list(&self, kind: ObjectKind) -> Result<Vec<String>> {
        let base = self.root.join(kind.dir_name()).join(ALGORITHM_DIR);
        let mut hashes = Vec::new();
        let fanouts = match fs::read_dir(&base) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(hashes),
            Err(e) => return Err(e.into()),
        };
        for fanout in fanouts {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            let prefix = fanout.file_name().to_string_lossy().to_string();
            for entry in fs::read_dir(fanout.path())? {
                let entry = entry?;
                let hash = format!("{prefix}{}", entry.file_name().to_string_lossy());
                if is_full_hash(&hash) && entry.file_type()?.is_file() {
                    hashes.push(hash);
                } else {
                    warn!(kind = kind.dir_name(), entry = %entry.path().display(), "ignoring stray file in object store");
                }
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Remove partial writes older than `grace`, returning how many were removed.
    pub fn clear_tmp(&self, grace: Duration) -> Result<usize> {
        let dir = self.root.join(TMP_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let modified = entry.metadata()?.modified().unwrap_or(now);
            let age = now.duration_since(modified).unwrap_or_default();
            if age >= grace && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Allocate a unique path for an in-flight write.
    fn tmp_path(&self) -> Result<PathBuf> {
        let dir = self.root.join(TMP_DIR);
        fs::create_dir_all(&dir)?;
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Ok(dir.join(format!("{}-{nonce}.partial", process::id())))
    }

    /// Move a finished temp file into its final location.
    fn commit_tmp(&self, kind: ObjectKind, hash: &str, tmp: &Path, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Err(e) = fs::rename(tmp, dest) {
            remove_quietly(tmp);
            return Err(e.into());
        }
        debug!(kind = kind.dir_name(), %hash, "stored object");
        Ok(())
    }
}

/// Best-effort removal of a scratch file.
fn remove_quietly(path: &Path) {
    #[allow(clippy::let_underscore_must_use)]
    {
        let _ = fs::remove_file(path);
    }
}
