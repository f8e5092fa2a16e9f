// Integration tests are compiled as a separate crate, so these lints don't apply
#![allow(clippy::tests_outside_test_module)]
#![allow(missing_docs)]

mod common;

use anyhow::Result;
use common::{create_repo, run_forester, stderr, stdout};
use libforester::ClientError;
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn test_status_sections_and_clean_tree() -> Result<()> {
    let repo = create_repo()?;
    repo.commit_file("scene.blend", "v1", "first")?;
    let clean = stdout(&repo.run(&["status"])?);
    assert!(clean.contains("On branch main"));
    assert!(clean.contains("Nothing to commit, working tree clean"));

    repo.write("scene.blend", "v2")?;
    repo.write("notes.txt", "todo")?;
    let status = repo.client.status()?;
    assert_eq!(status.modified, vec!["scene.blend".to_string()]);
    assert_eq!(status.untracked, vec!["notes.txt".to_string()]);
    assert!(status.staged.is_empty());

    repo.client.add(&[&repo.path("notes.txt")])?;
    assert_eq!(repo.client.status()?.staged, vec!["notes.txt".to_string()]);
    Ok(())
}

#[test]
fn test_commit_output_names_branch_or_detached() -> Result<()> {
    let repo = create_repo()?;
    repo.write("scene.blend", "v1")?;
    repo.client.add(&[&repo.path("scene.blend")])?;
    let out = stdout(&repo.run(&["commit", "-m", "first"])?);
    assert!(out.starts_with("[main "), "{out}");
    assert!(out.trim_end().ends_with("] first"), "{out}");

    let hash = repo.client.log(None, None)?[0].hash.clone();
    repo.client.checkout(&hash, false)?;
    assert_eq!(repo.client.status()?.detached.as_deref(), Some(hash.as_str()));
    repo.write("scene.blend", "v2")?;
    repo.client.add(&[&repo.path("scene.blend")])?;
    let out = stdout(&repo.run(&["commit", "-m", "detached work"])?);
    assert!(out.starts_with("[detached "), "{out}");
    Ok(())
}

#[test]
fn test_second_tag_with_same_name_is_rejected() -> Result<()> {
    let repo = create_repo()?;
    repo.write("scene.blend", "v1")?;
    repo.client.add(&[&repo.path("scene.blend")])?;
    repo.client.commit("first", None, Some("release"))?;

    repo.write("scene.blend", "v2")?;
    repo.client.add(&[&repo.path("scene.blend")])?;
    let err = repo
        .client
        .commit("second", None, Some("release"))
        .expect_err("duplicate tag accepted");
    assert!(err.to_string().contains("already exists"), "{err}");
    assert_eq!(repo.client.tags()?, vec!["release".to_string()]);
    Ok(())
}

#[test]
fn test_shared_locks_coexist_and_block_exclusive() -> Result<()> {
    let repo = create_repo()?;
    repo.commit_file("scene.blend", "v1", "first")?;
    let scene = repo.path("scene.blend");
    let alice = repo.client_as("alice");
    let bob = repo.client_as("bob");

    alice.lock(&scene, false, Some(24))?;
    bob.lock(&scene, false, None)?;
    assert!(alice.lock(&scene, true, None).is_err());

    let locks = alice.locks()?;
    assert_eq!(locks.len(), 2);
    assert!(locks.iter().all(|lock| lock.lock_type == "shared"));
    assert!(locks.iter().any(|lock| lock.user == "alice" && lock.expires.is_some()));

    bob.unlock(&scene, false)?;
    assert_eq!(alice.locks()?.len(), 1);
    Ok(())
}

#[test]
fn test_foreign_lock_needs_force() -> Result<()> {
    let repo = create_repo()?;
    repo.commit_file("scene.blend", "v1", "first")?;
    let scene = repo.path("scene.blend");
    repo.client_as("alice").lock(&scene, true, None)?;

    let bob = repo.client_as("bob");
    match bob.unlock(&scene, false) {
        Err(ClientError::Failed { message, .. }) => assert!(message.contains("--force")),
        other => panic!("expected ownership error, got {other:?}"),
    }
    bob.unlock(&scene, true)?;
    assert!(bob.locks()?.is_empty());

    let out = stdout(&repo.run(&["lock", "list"])?);
    assert_eq!(out.trim(), "No locks found");
    Ok(())
}

#[test]
fn test_json_format_for_results_and_errors() -> Result<()> {
    let repo = create_repo()?;
    repo.commit_file("scene.blend", "v1", "first")?;

    let output = repo.run(&["--format", "json", "branch"])?;
    assert!(output.status.success());
    let branches: Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(branches[0]["name"], "main");
    assert_eq!(branches[0]["is_current"], true);

    let output = repo.run(&["--format", "json", "branch", "-d", "main"])?;
    assert_eq!(output.status.code(), Some(2));
    let error: Value = serde_json::from_str(stderr(&output).trim())?;
    assert_eq!(error["error"], "cannot_delete_current");
    assert!(error["message"].as_str().is_some_and(|m| m.contains("main")));
    Ok(())
}

#[test]
fn test_outside_repository_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let output = run_forester(dir.path(), &["status"])?;
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Not a Forester repository"));
    Ok(())
}

#[test]
fn test_quiet_keeps_protocol_output() -> Result<()> {
    let repo = create_repo()?;
    repo.client.create_branch("feature")?;
    let output = repo.run(&["--quiet", "branch"])?;
    assert_eq!(stdout(&output), "  feature\n* main\n");
    assert!(stderr(&output).is_empty());
    Ok(())
}

#[test]
fn test_diff_between_commits() -> Result<()> {
    let repo = create_repo()?;
    let first = repo.commit_file("notes.txt", "one\n", "first")?;
    let second = repo.commit_file("notes.txt", "two\n", "second")?;
    let diff = repo.client.diff(Some(&first), Some(&second))?;
    assert!(diff.contains("-one"), "{diff}");
    assert!(diff.contains("+two"), "{diff}");
    Ok(())
}

#[test]
fn test_ref_names_cannot_reach_outside_refs() -> Result<()> {
    let repo = create_repo()?;
    repo.commit_file("scene.blend", "v1", "first")?;
    repo.client.create_branch("feature")?;

    let output = repo.run(&["--format", "json", "branch", "-d", "../../HEAD"])?;
    assert_eq!(output.status.code(), Some(1));
    let error: Value = serde_json::from_str(stderr(&output).trim())?;
    assert_eq!(error["error"], "branch_not_found");

    let output = repo.run(&["tag", "--delete", "../heads/feature"])?;
    assert_eq!(output.status.code(), Some(1));

    assert!(repo.root.join(".DFM/HEAD").is_file());
    assert!(repo.root.join(".DFM/refs/heads/feature").is_file());
    assert_eq!(repo.client.status()?.branch.as_deref(), Some("main"));
    Ok(())
}
