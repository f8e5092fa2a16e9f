use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use libforester::Repository;

/// Environment variable overriding the acting user.
pub const USER_ENV: &str = "FORESTER_USER";

/// Resolve `path` against the current directory.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().context("Failed to read the current directory")?;
    Ok(cwd.join(path))
}

/// Open the repository named by `--repo-dir`, or the one containing the
/// current directory.
pub fn open_repository(repo_dir: Option<&Path>) -> Result<Repository> {
    let start = match repo_dir {
        Some(dir) => absolutize(dir)?,
        None => env::current_dir().context("Failed to read the current directory")?,
    };
    Ok(Repository::discover(&start)?)
}

/// The acting user: `--user`, then `FORESTER_USER`, then the repository's
/// configured or OS user.
pub fn resolve_user(flag: Option<&str>, repo: &Repository) -> String {
    flag.map(str::to_string)
        .or_else(|| env::var(USER_ENV).ok())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| repo.default_user())
}
