use std::{
    fs::{File, OpenOptions},
    io::{self, ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    process, thread,
    time::{Duration, Instant},
};

use fs4::FileExt;
use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tracing::debug;

use crate::error::{ForesterError, Result};

/// Interval between acquisition attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a command holds the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Readers share the repository.
    Shared,
    /// Writers hold it alone.
    Exclusive,
}

/// Advisory mutex on `.DFM/forester.lock` serializing commands across processes.
#[derive(Debug, Clone)]
pub struct RepoMutex {
    /// Path of the lock file.
    path: PathBuf,
    /// How long to keep polling before reporting the repository busy.
    timeout: Duration,
}

/// Held repository mutex; released on drop.
#[derive(Debug)]
pub struct RepoGuard {
    /// The locked file handle.
    file: File,
    /// How the mutex is held.
    access: Access,
}

impl Drop for RepoGuard {
    #[allow(clippy::let_underscore_must_use)]
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(access = ?self.access, "released repository mutex");
    }
}

impl RepoMutex {
    /// File name within `.DFM`.
    pub const FILE_NAME: &'static str = "forester.lock";

    /// Create a mutex for the given `.DFM` directory.
    pub fn new(dfm_dir: &Path, timeout: Duration) -> Self {
        Self {
            path: dfm_dir.join(Self::FILE_NAME),
            timeout,
        }
    }

    /// Acquire the mutex, polling until the timeout elapses.
    pub fn acquire(&self, access: Access) -> Result<RepoGuard> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let started = Instant::now();
        loop {
            let attempt = match access {
                Access::Shared => FileExt::try_lock_shared(&file),
                Access::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match attempt {
                Ok(()) => break,
                Err(e) if is_contended(&e) => {
                    if started.elapsed() >= self.timeout {
                        return Err(ForesterError::RepositoryBusy {
                            holder: describe_holder(&mut file),
                        });
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if access == Access::Exclusive {
            record_holder(&mut file)?;
        }
        debug!(?access, waited_ms = started.elapsed().as_millis(), "acquired repository mutex");
        Ok(RepoGuard { file, access })
    }
}

/// Whether a lock attempt failed only because someone else holds the lock.
fn is_contended(err: &io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
}

/// Write our PID into the lock file so a blocked process can name us.
fn record_holder(file: &mut File) -> Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    write!(file, "{}", process::id())?;
    file.flush()?;
    Ok(())
}

/// Describe whoever last recorded themselves as the exclusive holder.
fn describe_holder(file: &mut File) -> String {
    let mut contents = String::new();
    let pid = file
        .seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_string(&mut contents))
        .ok()
        .and_then(|_| contents.trim().parse::<u32>().ok());

    let Some(pid) = pid else {
        return "held by another forester process".to_string();
    };
    let state = if process_alive(Pid::from_u32(pid)) {
        "running"
    } else {
        "no longer running"
    };
    format!("held by pid {pid} ({state})")
}

/// Whether a process with this PID exists.
fn process_alive(pid: Pid) -> bool {
    let mut sys =
        System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new()));
    sys.refresh_process(pid);
    sys.process(pid).is_some()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn shared_holders_coexist() {
        let tmp = tempdir().unwrap();
        let mutex = RepoMutex::new(tmp.path(), Duration::ZERO);

        let first = mutex.acquire(Access::Shared).unwrap();
        let second = mutex.acquire(Access::Shared).unwrap();
        assert_eq!(first.access, Access::Shared);
        assert_eq!(second.access, Access::Shared);
    }

    #[test]
    fn exclusive_holder_blocks_until_timeout() {
        let tmp = tempdir().unwrap();
        let mutex = RepoMutex::new(tmp.path(), Duration::from_millis(250));

        let guard = mutex.acquire(Access::Exclusive).unwrap();
        let err = mutex.acquire(Access::Shared).unwrap_err();
        match err {
            ForesterError::RepositoryBusy { holder } => {
                assert!(holder.contains(&process::id().to_string()));
                assert!(holder.contains("running"));
            }
            other => panic!("unexpected error: {other}"),
        }

        drop(guard);
        mutex.acquire(Access::Exclusive).unwrap();
    }

    #[test]
    fn released_on_drop() {
        let tmp = tempdir().unwrap();
        let mutex = RepoMutex::new(tmp.path(), Duration::ZERO);

        {
            let _guard = mutex.acquire(Access::Exclusive).unwrap();
        }
        mutex.acquire(Access::Exclusive).unwrap();
    }
}
