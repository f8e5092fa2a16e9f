#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    process::{Command, Output},
};

use anyhow::{Context, Result};
use libforester::ForesterClient;
use tempfile::TempDir;

/// Return the path to the compiled `forester` binary.
pub fn forester_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_forester"))
}

/// A scratch repository plus a client bound to it.
pub struct TestRepo {
    /// Keeps the directory alive for the test's duration.
    _temp: TempDir,
    /// Canonical repository root.
    pub root: PathBuf,
    /// Client acting as the default test user.
    pub client: ForesterClient,
}

impl TestRepo {
    /// Client bound to this repository acting as `user`.
    pub fn client_as(&self, user: &str) -> ForesterClient {
        ForesterClient::new(forester_binary())
            .with_repo(&self.root)
            .with_user(user)
    }

    /// Absolute path of `rel` inside the working tree, as a string.
    pub fn path(&self, rel: &str) -> String {
        self.root.join(rel).to_string_lossy().into_owned()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("failed to write {rel}"))
    }

    /// Read `rel` from the working tree.
    pub fn read(&self, rel: &str) -> Result<String> {
        fs::read_to_string(self.root.join(rel)).with_context(|| format!("failed to read {rel}"))
    }

    /// Write, stage and commit one file; returns the commit hash.
    pub fn commit_file(&self, rel: &str, contents: &str, message: &str) -> Result<String> {
        self.write(rel, contents)?;
        self.client.add(&[&self.path(rel)])?;
        Ok(self.client.commit(message, None, None)?)
    }

    /// Run the binary directly against this repository.
    pub fn run(&self, args: &[&str]) -> Result<Output> {
        run_forester(&self.root, args)
    }
}

/// Initialise a fresh repository in a temporary directory.
pub fn create_repo() -> Result<TestRepo> {
    let temp = TempDir::new()?;
    let root = temp.path().join("project");
    fs::create_dir_all(&root)?;
    let root = fs::canonicalize(&root)?;
    let client = ForesterClient::new(forester_binary())
        .with_repo(&root)
        .with_user("tester");
    client.init(&root)?;
    Ok(TestRepo {
        _temp: temp,
        root,
        client,
    })
}

/// Run `forester` with `args` from inside `dir`, without a terminal.
pub fn run_forester(dir: &Path, args: &[&str]) -> Result<Output> {
    Command::new(forester_binary())
        .current_dir(dir)
        .env_remove("FORESTER_LOG")
        .env("FORESTER_USER", "tester")
        .arg("--no-color")
        .arg("--no-prompt")
        .args(args)
        .output()
        .with_context(|| format!("failed to run forester {}", args.join(" ")))
}

/// Stdout of a finished command as a string.
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Stderr of a finished command as a string.
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}
