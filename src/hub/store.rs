use crate::hub::platform::Platform;
use crate::hub::records::{MessageRecord, ThreadRecord};
use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Name,
    Email,
}

impl IdKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StoreCounts {
    pub threads: u64,
    pub messages: u64,
    pub labels: u64,
    pub identities: u64,
}

/// Single-writer connection to the message store. Writes happen inside an
/// open transaction that `commit_batch` lands and reopens.
pub struct IngestionStore {
    conn: Connection,
}

impl IngestionStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open store {}", path.display()))?;
        // WAL keeps readers unblocked while a run is writing.
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("failed to set synchronous mode")?;
        conn.execute_batch(SCHEMA_SQL)
            .with_context(|| format!("failed to apply schema to {}", path.display()))?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }

    pub fn begin(&self) -> rusqlite::Result<()> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Land the open batch and start the next one.
    pub fn commit_batch(&self) -> rusqlite::Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        self.conn.execute_batch("BEGIN")
    }

    pub fn finish(&self) -> rusqlite::Result<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Create the thread or refine it. Empty titles and participant lists
    /// never overwrite known ones; activity fields are left alone.
    pub fn upsert_thread(&self, thread: &ThreadRecord) -> rusqlite::Result<()> {
        let participants_json =
            serde_json::to_string(&thread.participants).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            "INSERT INTO threads (id, platform, title, participants_json, is_group)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
               platform = excluded.platform,
               title = CASE WHEN excluded.title <> '' THEN excluded.title ELSE threads.title END,
               participants_json = CASE WHEN excluded.participants_json <> '[]'
                 THEN excluded.participants_json ELSE threads.participants_json END,
               is_group = CASE WHEN excluded.participants_json <> '[]'
                 THEN excluded.is_group ELSE threads.is_group END",
            params![
                thread.id,
                thread.platform.as_str(),
                thread.title,
                participants_json,
                thread.is_group,
            ],
        )?;
        Ok(())
    }

    /// Move the thread's activity forward. Older timestamps are ignored so
    /// the stored value is the maximum ever seen.
    pub fn record_activity(
        &self,
        thread_id: &str,
        timestamp_ms: i64,
        snippet: &str,
    ) -> rusqlite::Result<bool> {
        let changed = self.conn.execute(
            "UPDATE threads SET last_activity_ms = ?2, snippet = ?3
             WHERE id = ?1 AND (last_activity_ms IS NULL OR last_activity_ms <= ?2)",
            params![thread_id, timestamp_ms, snippet],
        )?;
        Ok(changed > 0)
    }

    /// The only place the (thread, sender, timestamp, content) key is
    /// enforced. Duplicates come back as `Skipped`, never as errors.
    pub fn insert_message_if_absent(
        &self,
        message: &MessageRecord,
    ) -> rusqlite::Result<InsertOutcome> {
        // UNIQUE treats NULLs as distinct, so NULL content needs a lookup.
        if message.content.is_none() {
            let existing: Option<i64> = self
                .conn
                .query_row(
                    "SELECT id FROM messages
                     WHERE thread_id = ?1 AND sender_name = ?2 AND timestamp_ms = ?3
                       AND content IS NULL
                     LIMIT 1",
                    params![message.thread_id, message.sender_name, message.timestamp_ms],
                    |row| row.get(0),
                )
                .optional()?;
            if existing.is_some() {
                return Ok(InsertOutcome::Skipped);
            }
        }

        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO messages
             (thread_id, sender_name, timestamp_ms, content, media_json, reactions_json, share_json, annotations_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.thread_id,
                message.sender_name,
                message.timestamp_ms,
                message.content,
                json_or_null(&message.media),
                json_or_null(&message.reactions),
                message.share.as_ref().map(Value::to_string),
                message.annotations.as_ref().map(Value::to_string),
            ],
        )?;
        Ok(if changed > 0 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Skipped
        })
    }

    pub fn add_label(&self, thread_id: &str, label: &str) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO thread_labels (thread_id, label) VALUES (?1, ?2)",
            params![thread_id, label],
        )?;
        Ok(())
    }

    pub fn upsert_identity(
        &self,
        platform: Platform,
        kind: IdKind,
        value: &str,
        is_me: bool,
        metadata: Option<&Value>,
    ) -> rusqlite::Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO identities (platform, id_type, id_value, is_me, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                platform.as_str(),
                kind.as_str(),
                value,
                is_me,
                metadata.map(Value::to_string),
            ],
        )?;
        Ok(())
    }

    pub fn counts(&self) -> rusqlite::Result<StoreCounts> {
        let count = |table: &str| -> rusqlite::Result<u64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|n| n.max(0) as u64)
        };
        Ok(StoreCounts {
            threads: count("threads")?,
            messages: count("messages")?,
            labels: count("thread_labels")?,
            identities: count("identities")?,
        })
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn json_or_null<T: serde::Serialize>(items: &[T]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    serde_json::to_string(items).ok()
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS threads (
  id TEXT PRIMARY KEY,
  platform TEXT NOT NULL,
  title TEXT,
  participants_json TEXT,
  is_group INTEGER NOT NULL DEFAULT 0,
  last_activity_ms INTEGER,
  snippet TEXT
);

CREATE TABLE IF NOT EXISTS thread_labels (
  thread_id TEXT NOT NULL,
  label TEXT NOT NULL,
  PRIMARY KEY (thread_id, label)
);

CREATE TABLE IF NOT EXISTS messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  thread_id TEXT NOT NULL,
  sender_name TEXT NOT NULL,
  timestamp_ms INTEGER NOT NULL,
  content TEXT,
  media_json TEXT,
  reactions_json TEXT,
  share_json TEXT,
  annotations_json TEXT,
  UNIQUE (thread_id, sender_name, timestamp_ms, content)
);

CREATE TABLE IF NOT EXISTS identities (
  platform TEXT NOT NULL,
  id_type TEXT NOT NULL,
  id_value TEXT NOT NULL,
  is_me INTEGER NOT NULL DEFAULT 0,
  metadata_json TEXT,
  PRIMARY KEY (platform, id_type, id_value)
);

CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp_ms);
CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_name);
CREATE INDEX IF NOT EXISTS idx_threads_platform ON threads(platform);
CREATE INDEX IF NOT EXISTS idx_thread_labels_label ON thread_labels(label);

CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
  content,
  content='messages',
  content_rowid='id',
  tokenize='trigram'
);

CREATE TRIGGER IF NOT EXISTS messages_ai AFTER INSERT ON messages BEGIN
  INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content);
END;

CREATE TRIGGER IF NOT EXISTS messages_ad AFTER DELETE ON messages BEGIN
  INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', old.id, old.content);
END;

CREATE TRIGGER IF NOT EXISTS messages_au AFTER UPDATE ON messages BEGIN
  INSERT INTO messages_fts(messages_fts, rowid, content) VALUES('delete', old.id, old.content);
  INSERT INTO messages_fts(rowid, content) VALUES (new.id, new.content);
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::records::MediaRef;

    fn thread(id: &str, title: &str, people: &[&str]) -> ThreadRecord {
        ThreadRecord::new(
            id,
            Platform::Facebook,
            title,
            people.iter().map(|p| p.to_string()),
        )
    }

    #[test]
    fn duplicate_messages_are_skipped_not_errors() {
        let store = IngestionStore::open_in_memory().expect("store");
        store.upsert_thread(&thread("t1", "Chat", &["A", "B"])).expect("thread");
        let msg = MessageRecord::new("t1", "A", 1_000, Some("hi".into()));

        assert_eq!(
            store.insert_message_if_absent(&msg).expect("insert"),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_message_if_absent(&msg).expect("insert"),
            InsertOutcome::Skipped
        );
        assert_eq!(store.counts().expect("counts").messages, 1);
    }

    #[test]
    fn null_content_duplicates_collapse() {
        let store = IngestionStore::open_in_memory().expect("store");
        let mut msg = MessageRecord::new("t1", "A", 5, None);
        msg.media.push(MediaRef::new("t1/photo.jpg", "photo"));

        assert_eq!(
            store.insert_message_if_absent(&msg).expect("insert"),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_message_if_absent(&msg).expect("insert"),
            InsertOutcome::Skipped
        );
        assert_eq!(store.counts().expect("counts").messages, 1);
    }

    #[test]
    fn same_text_different_sender_is_distinct() {
        let store = IngestionStore::open_in_memory().expect("store");
        let a = MessageRecord::new("t1", "A", 5, Some("ok".into()));
        let b = MessageRecord::new("t1", "B", 5, Some("ok".into()));
        store.insert_message_if_absent(&a).expect("insert");
        assert_eq!(
            store.insert_message_if_absent(&b).expect("insert"),
            InsertOutcome::Inserted
        );
    }

    #[test]
    fn activity_never_moves_backwards() {
        let store = IngestionStore::open_in_memory().expect("store");
        store.upsert_thread(&thread("t1", "Chat", &["A"])).expect("thread");
        assert!(store.record_activity("t1", 300, "A: newest").expect("activity"));
        assert!(!store.record_activity("t1", 100, "A: older").expect("activity"));

        let (ts, snippet): (i64, String) = store
            .conn()
            .query_row(
                "SELECT last_activity_ms, snippet FROM threads WHERE id = 't1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("row");
        assert_eq!(ts, 300);
        assert_eq!(snippet, "A: newest");
    }

    #[test]
    fn thread_refinement_keeps_known_fields_and_activity() {
        let store = IngestionStore::open_in_memory().expect("store");
        store
            .upsert_thread(&thread("t1", "Family", &["A", "B", "C"]))
            .expect("thread");
        store.record_activity("t1", 42, "A: hi").expect("activity");
        store.upsert_thread(&thread("t1", "", &[])).expect("refine");

        let (title, is_group, ts): (String, bool, i64) = store
            .conn()
            .query_row(
                "SELECT title, is_group, last_activity_ms FROM threads WHERE id = 't1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("row");
        assert_eq!(title, "Family");
        assert!(is_group);
        assert_eq!(ts, 42);
        assert_eq!(store.counts().expect("counts").threads, 1);
    }

    #[test]
    fn trigram_index_matches_infix() {
        let store = IngestionStore::open_in_memory().expect("store");
        store
            .insert_message_if_absent(&MessageRecord::new(
                "t1",
                "A",
                1,
                Some("see you at the lighthouse".into()),
            ))
            .expect("insert");

        let hits: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM messages_fts WHERE messages_fts MATCH 'ghth'",
                [],
                |row| row.get(0),
            )
            .expect("fts query");
        assert_eq!(hits, 1);
    }

    #[test]
    fn labels_are_idempotent() {
        let store = IngestionStore::open_in_memory().expect("store");
        store.add_label("t1", "message").expect("label");
        store.add_label("t1", "message").expect("label");
        store.add_label("t1", "inbox").expect("label");
        assert_eq!(store.counts().expect("counts").labels, 2);
    }

    #[test]
    fn batches_commit_and_reopen() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("nested/hub.db");
        let store = IngestionStore::open(&path).expect("open");
        store.begin().expect("begin");
        store.add_label("t1", "message").expect("label");
        store.commit_batch().expect("commit");
        store.add_label("t2", "message").expect("label");
        store.finish().expect("finish");
        drop(store);

        let reopened = IngestionStore::open(&path).expect("reopen");
        assert_eq!(reopened.counts().expect("counts").labels, 2);
    }
}
