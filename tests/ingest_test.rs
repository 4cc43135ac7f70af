use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use predicates::prelude::*;
use tempfile::{TempDir, tempdir};

struct Hub {
    tmp: TempDir,
}

impl Hub {
    fn new() -> Self {
        let tmp = tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("data")).expect("mkdir workspace");
        Self { tmp }
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }

    fn workspace(&self) -> PathBuf {
        self.root().join("data")
    }

    fn db(&self) -> PathBuf {
        self.workspace().join("messagehub.db")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("messagehub");
        cmd.current_dir(self.root())
            .env("HOME", self.root())
            .env("MESSAGEHUB_HOME", self.root().join("hub"))
            .env("MESSAGEHUB_WORKSPACE", self.workspace())
            .env("MESSAGEHUB_DB", self.db())
            .env("MESSAGEHUB_CONFIG_PATH", self.root().join("missing.toml"))
            .env_remove("MESSAGEHUB_INBOX_DIRS")
            .env_remove("MESSAGEHUB_LOG");
        cmd
    }

    fn count(&self, sql: &str) -> i64 {
        let conn = rusqlite::Connection::open(self.db()).expect("open store");
        conn.query_row(sql, [], |row| row.get(0)).expect("count")
    }
}

fn write_thread(dir: &Path, file: &str, body: &str) {
    fs::create_dir_all(dir).expect("mkdir thread");
    fs::write(dir.join(file), body).expect("write thread");
}

fn write_zip(path: &Path, members: &[(&str, &str)]) {
    let file = fs::File::create(path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    for (name, body) in members {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .expect("start member");
        zip.write_all(body.as_bytes()).expect("write member");
    }
    zip.finish().expect("finish zip");
}

const ALICE_THREAD: &str = r#"{
  "title": "Alice",
  "participants": [{"name": "Alice"}, {"name": "Me"}],
  "messages": [
    {"sender_name": "Me", "timestamp_ms": 2000, "content": "see you then"},
    {"sender_name": "Alice", "timestamp_ms": 1000, "content": "lunch at noon?"}
  ]
}"#;

#[test]
fn second_ingest_inserts_nothing() {
    let hub = Hub::new();
    write_thread(
        &hub.workspace()
            .join("Facebook/your_facebook_activity/messages/inbox/alice_123"),
        "message_1.json",
        ALICE_THREAD,
    );

    hub.cmd()
        .arg("ingest")
        .assert()
        .success()
        .stdout(predicate::str::contains("[Done]: 1|2|0|0"));
    hub.cmd()
        .arg("ingest")
        .assert()
        .success()
        .stdout(predicate::str::contains("[Done]: 1|0|2|0"));

    assert_eq!(hub.count("SELECT COUNT(*) FROM messages"), 2);
    assert_eq!(hub.count("SELECT COUNT(*) FROM threads"), 1);
    assert_eq!(hub.count("SELECT COUNT(*) FROM thread_labels"), 1);
}

#[test]
fn overlapping_exports_store_each_message_once() {
    let hub = Hub::new();
    let older = r#"{"title":"Alice","participants":[{"name":"Alice"},{"name":"Me"}],
        "messages":[{"sender_name":"Alice","timestamp_ms":1000,"content":"lunch at noon?"}]}"#;
    write_thread(
        &hub.workspace()
            .join("Facebook/export-2023/messages/inbox/alice_123"),
        "message_1.json",
        older,
    );
    write_thread(
        &hub.workspace()
            .join("Facebook/export-2024/messages/inbox/alice_123"),
        "message_1.json",
        ALICE_THREAD,
    );

    hub.cmd().arg("ingest").assert().success();

    assert_eq!(hub.count("SELECT COUNT(*) FROM messages"), 2);
    assert_eq!(hub.count("SELECT COUNT(*) FROM threads"), 1);
    assert_eq!(
        hub.count("SELECT last_activity_ms FROM threads WHERE id = 'alice_123'"),
        2000
    );
}

#[test]
fn reverse_ordered_files_keep_latest_activity() {
    let hub = Hub::new();
    let dir = hub
        .workspace()
        .join("Facebook/your_facebook_activity/messages/inbox/bob_9");
    write_thread(
        &dir,
        "message_1.json",
        r#"{"title":"Bob","participants":[{"name":"Bob"},{"name":"Me"}],
            "messages":[{"sender_name":"Bob","timestamp_ms":9000,"content":"newest"}]}"#,
    );
    write_thread(
        &dir,
        "message_2.json",
        r#"{"messages":[{"sender_name":"Me","timestamp_ms":10,"content":"oldest"}]}"#,
    );

    hub.cmd().arg("ingest").assert().success();

    let conn = rusqlite::Connection::open(hub.db()).expect("open store");
    let (ts, snippet): (i64, String) = conn
        .query_row(
            "SELECT last_activity_ms, snippet FROM threads WHERE id = 'bob_9'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("thread row");
    assert_eq!(ts, 9000);
    assert_eq!(snippet, "Bob: newest");
}

#[test]
fn archives_are_extracted_and_moved_aside() {
    let hub = Hub::new();
    let inbox = hub.root().join("inbox");
    fs::create_dir_all(&inbox).expect("mkdir inbox");
    let archive = inbox.join("facebook-me.zip");
    write_zip(
        &archive,
        &[(
            "your_facebook_activity/messages/inbox/alice_123/message_1.json",
            ALICE_THREAD,
        )],
    );

    hub.cmd()
        .env("MESSAGEHUB_INBOX_DIRS", &inbox)
        .arg("ingest")
        .assert()
        .success()
        .stdout(predicate::str::contains("[TotalArchives]: 1"))
        .stdout(predicate::str::contains("[ArchiveExtracted]: facebook-me.zip"));

    assert!(!archive.exists());
    assert!(hub.workspace().join(".processed/facebook-me.zip").is_file());
    assert!(
        hub.workspace()
            .join("Facebook/your_facebook_activity/messages/inbox/alice_123/message_1.json")
            .is_file()
    );
    assert_eq!(hub.count("SELECT COUNT(*) FROM messages"), 2);
}

#[test]
fn failed_space_preflight_touches_nothing() {
    let hub = Hub::new();
    let inbox = hub.root().join("inbox");
    fs::create_dir_all(&inbox).expect("mkdir inbox");
    let archive = inbox.join("facebook-me.zip");
    write_zip(
        &archive,
        &[(
            "your_facebook_activity/messages/inbox/alice_123/message_1.json",
            ALICE_THREAD,
        )],
    );

    hub.cmd()
        .env("MESSAGEHUB_INBOX_DIRS", &inbox)
        .env("MESSAGEHUB_SPACE_MULTIPLIER", "1e15")
        .arg("ingest")
        .assert()
        .failure()
        .stdout(predicate::str::contains("[Error]: insufficient disk space"))
        .stderr(predicate::str::contains("insufficient disk space"));

    assert!(archive.is_file());
    assert!(!hub.workspace().join("Facebook").exists());
    assert!(!hub.db().exists());
}

#[test]
fn unknown_platform_filter_is_rejected() {
    let hub = Hub::new();
    hub.cmd()
        .args(["ingest", "--platform", "myspace"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown platform"));
}

#[test]
fn platform_filter_limits_ingestion() {
    let hub = Hub::new();
    write_thread(
        &hub.workspace()
            .join("Facebook/your_facebook_activity/messages/inbox/alice_123"),
        "message_1.json",
        ALICE_THREAD,
    );
    write_thread(
        &hub.workspace()
            .join("Instagram/your_instagram_activity/messages/inbox/carol_7"),
        "message_1.json",
        r#"{"title":"Carol","participants":[{"name":"Carol"},{"name":"Me"}],
            "messages":[{"sender_name":"Carol","timestamp_ms":5,"content":"hey"}]}"#,
    );

    hub.cmd()
        .args(["ingest", "--platform", "instagram"])
        .assert()
        .success();

    assert_eq!(hub.count("SELECT COUNT(*) FROM threads"), 1);
    assert_eq!(
        hub.count("SELECT COUNT(*) FROM threads WHERE platform = 'instagram'"),
        1
    );
}

#[test]
fn facebook_activity_lands_under_its_own_labels() {
    let hub = Hub::new();
    let activity = hub.workspace().join("Facebook/your_facebook_activity");
    write_thread(
        &activity.join("events"),
        "your_event_responses.json",
        r#"{"event_responses_v2":{"events_joined":[{"name":"Picnic","start_timestamp":100}]}}"#,
    );
    write_thread(
        &activity.join("posts"),
        "your_posts_1.json",
        r#"[{"timestamp":200,"data":[{"post":"hello world"}]}]"#,
    );
    write_thread(
        &activity.join("posts"),
        "check-ins.json",
        r#"[{"timestamp":300,"label_values":[{"label":"Message","value":"here"}]}]"#,
    );
    write_thread(&activity.join("messages/inbox/alice_123"), "message_1.json", ALICE_THREAD);

    hub.cmd()
        .arg("ingest")
        .assert()
        .success()
        .stdout(predicate::str::contains("[Done]: 2|5|0|0"));

    for label in ["event", "post", "checkin", "message"] {
        assert_eq!(
            hub.count(&format!(
                "SELECT COUNT(*) FROM thread_labels WHERE label = '{label}'"
            )),
            1,
            "label {label}"
        );
    }
    assert_eq!(
        hub.count("SELECT last_activity_ms FROM threads WHERE id = 'fb_post_200000'"),
        200_000
    );
}
