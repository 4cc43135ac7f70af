use std::fs;

use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn status_reports_paths_and_store_counts() {
    let tmp = tempdir().expect("tempdir");
    let workspace = tmp.path().join("data");
    let thread = workspace.join("Facebook/your_facebook_activity/messages/inbox/alice_123");
    fs::create_dir_all(&thread).expect("mkdir");
    fs::write(
        thread.join("message_1.json"),
        r#"{"title":"Alice","participants":[{"name":"Alice"}],
            "messages":[{"sender_name":"Alice","timestamp_ms":1,"content":"hi"}]}"#,
    )
    .expect("write thread");

    let run = |args: &[&str]| {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("messagehub");
        cmd.current_dir(tmp.path())
            .env("HOME", tmp.path())
            .env("MESSAGEHUB_HOME", tmp.path().join("hub"))
            .env("MESSAGEHUB_WORKSPACE", &workspace)
            .env("MESSAGEHUB_CONFIG_PATH", tmp.path().join("missing.toml"))
            .env_remove("MESSAGEHUB_DB")
            .args(args)
            .assert()
    };

    run(&["status"])
        .success()
        .stdout(predicate::str::contains("store not created yet"));

    run(&["ingest"]).success();

    run(&["status", "--json"])
        .success()
        .stdout(predicate::str::contains("\"command\": \"status\""))
        .stdout(predicate::str::contains("threads=1 messages=1"))
        .stdout(predicate::str::contains("MESSAGEHUB_WORKSPACE"));
}

#[test]
fn invalid_config_file_is_reported() {
    let tmp = tempdir().expect("tempdir");
    let config = tmp.path().join("config.toml");
    fs::write(&config, "[ingest]\ncommit_every = 0\nsnippet_max_chars = 80\n").expect("write");

    assert_cmd::cargo::cargo_bin_cmd!("messagehub")
        .current_dir(tmp.path())
        .env("HOME", tmp.path())
        .env("MESSAGEHUB_HOME", tmp.path().join("hub"))
        .env("MESSAGEHUB_CONFIG_PATH", &config)
        .arg("status")
        .assert()
        .failure()
        .stdout(predicate::str::contains("commit_every must be >= 1"));
}
