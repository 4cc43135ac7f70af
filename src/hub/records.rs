//! Canonical thread and message records produced by the parsers.

use crate::hub::platform::Platform;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub id: String,
    pub platform: Platform,
    pub title: String,
    pub participants: Vec<String>,
    pub is_group: bool,
}

impl ThreadRecord {
    pub fn new(
        id: impl Into<String>,
        platform: Platform,
        title: impl Into<String>,
        participants: impl IntoIterator<Item = String>,
    ) -> Self {
        let participants = normalize_participants(participants);
        let is_group = participants.len() > 2;
        Self {
            id: id.into(),
            platform,
            title: title.into(),
            participants,
            is_group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaRef {
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl MediaRef {
    pub fn new(uri: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reaction {
    pub reaction: String,
    pub actor: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub thread_id: String,
    pub sender_name: String,
    pub timestamp_ms: i64,
    pub content: Option<String>,
    pub media: Vec<MediaRef>,
    pub reactions: Vec<Reaction>,
    pub share: Option<Value>,
    pub annotations: Option<Value>,
}

impl MessageRecord {
    pub fn new(
        thread_id: impl Into<String>,
        sender_name: impl Into<String>,
        timestamp_ms: i64,
        content: Option<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            sender_name: sender_name.into(),
            timestamp_ms,
            content: content.filter(|c| !c.is_empty()),
            media: Vec::new(),
            reactions: Vec::new(),
            share: None,
            annotations: None,
        }
    }

    /// Preview line for the thread list.
    pub fn snippet(&self) -> String {
        if let Some(content) = self.content.as_deref() {
            return format!("{}: {}", self.sender_name, content);
        }
        if let Some(first) = self.media.first() {
            return format!("{} sent a {}", self.sender_name, first.kind);
        }
        format!("{} sent a message", self.sender_name)
    }
}

/// Trimmed, de-duplicated, case-preserving, sorted.
pub fn normalize_participants(names: impl IntoIterator<Item = String>) -> Vec<String> {
    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn media_kind_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "heic" | "bmp" => "photo",
        "mp4" | "mov" | "avi" | "mkv" | "webm" | "3gp" => "video",
        "mp3" | "m4a" | "aac" | "wav" | "ogg" | "amr" | "opus" => "audio",
        _ => "file",
    }
}

/// Tracks the newest message seen while parsing one unit. Ties go to the
/// later message, matching export order within a file.
#[derive(Debug, Clone, Default)]
pub struct LatestActivity {
    pub timestamp_ms: i64,
    pub snippet: Option<String>,
}

impl LatestActivity {
    pub fn observe(&mut self, message: &MessageRecord) {
        if self.snippet.is_none() || message.timestamp_ms >= self.timestamp_ms {
            self.timestamp_ms = message.timestamp_ms;
            self.snippet = Some(message.snippet());
        }
    }

    pub fn observe_with(&mut self, timestamp_ms: i64, snippet: String) {
        if self.snippet.is_none() || timestamp_ms >= self.timestamp_ms {
            self.timestamp_ms = timestamp_ms;
            self.snippet = Some(snippet);
        }
    }
}
