//! Integration tests for the cross-send daemon

use assert_cmd::Command;
use libcrosspost::tracker::StatusTracker;
use libcrosspost::{Database, Post, PostStatus};
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Write a config pointing every path into the temp dir
async fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");
    let media_root = temp_dir.path().join("media");

    let config_content = format!(
        r#"
[database]
path = "{}"

[storage]
root = "{}"

[triggers]
due_poll_interval_secs = 1

[retry.publish]
strategy = "fixed"
max_attempts = 1
delay_ms = 0

[providers.x]
enabled = true
api_url = "http://127.0.0.1:9"
upload_url = "http://127.0.0.1:9"
"#,
        db_path.display().to_string().replace('\\', "/"),
        media_root.display().to_string().replace('\\', "/"),
    );
    fs::write(&config_path, config_content).unwrap();

    Database::new(db_path.to_str().unwrap()).await.unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

/// Create a scheduled post whose instant has passed
async fn create_due_post(db_path: &str) -> String {
    let db = Database::new(db_path).await.unwrap();
    let tracker = StatusTracker::new(db);
    let past = chrono::Utc::now().timestamp() - 10;

    let post = Post::new(
        "user-1".to_string(),
        "Test scheduled post".to_string(),
        vec!["x".to_string()],
    )
    .scheduled_for(past);
    tracker.create_post(&post).await.unwrap();
    tracker.mark_queued(&post.id).await.unwrap();
    tracker.mark_scheduled(&post.id).await.unwrap();
    post.id
}

#[test]
fn test_help_flag() {
    let mut cmd = Command::cargo_bin("cross-send").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Crosspost daemon"))
        .stdout(predicate::str::contains("--once"));
}

#[test]
fn test_version_flag() {
    let mut cmd = Command::cargo_bin("cross-send").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cross-send"));
}

#[tokio::test]
async fn test_once_with_nothing_due() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    let mut cmd = Command::cargo_bin("cross-send").unwrap();
    cmd.env("CROSSPOST_CONFIG", &config_path)
        .arg("--once")
        .assert()
        .success();
}

#[tokio::test]
async fn test_once_publishes_due_post() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_due_post(&db_path).await;

    let mut cmd = Command::cargo_bin("cross-send").unwrap();
    cmd.env("CROSSPOST_CONFIG", &config_path)
        .arg("--once")
        .assert()
        .success();

    // no linked x account: the post is picked up and fails permanently
    let db = Database::new(&db_path).await.unwrap();
    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    let outcomes = db.get_outcomes(&post_id).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].attempts, 1);
}

#[test]
fn test_invalid_config_exits_with_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[upload]\nchunk_size_bytes = 0\n").unwrap();

    let mut cmd = Command::cargo_bin("cross-send").unwrap();
    cmd.env("CROSSPOST_CONFIG", config_path.to_str().unwrap())
        .arg("--once")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("chunk_size_bytes"));
}
