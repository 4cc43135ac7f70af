//! Google Chat group folders: `messages.json` plus `group_info.json`.

use super::{ParseContext, PlatformParser, UnitCounts, dir_name, read_json_file};
use crate::error::ParseError;
use crate::hub::attachments::{self, DiskCandidates};
use crate::hub::platform::Platform;
use crate::hub::records::{LatestActivity, MediaRef, MessageRecord, Reaction, ThreadRecord};
use crate::hub::text::{parse_chat_timestamp_ms, repair_mojibake};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct GroupInfo {
    name: Option<String>,
    members: Vec<Member>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Member {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MessagesFile {
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ChatMessage {
    creator: Option<Member>,
    created_date: Option<String>,
    text: Option<String>,
    annotations: Vec<Value>,
    attached_files: Vec<AttachedFile>,
    reactions: Vec<ChatReaction>,
    quoted_message_metadata: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct AttachedFile {
    export_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Emoji {
    unicode: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ChatReaction {
    emoji: Emoji,
    reactor_emails: Vec<String>,
}

fn is_metadata_file(name: &str) -> bool {
    name == "messages.json" || name == "group_info.json" || name.starts_with("message_")
}

fn message_files(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let consolidated = dir.join("messages.json");
    if consolidated.is_file() {
        return Ok(vec![consolidated]);
    }
    let entries = fs::read_dir(dir).map_err(|err| ParseError::io(dir, err))?;
    // Split files are numbered; unnumbered ones sort after them by name.
    let mut files: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let stem = name.strip_prefix("message_")?.strip_suffix(".json")?;
            Some((stem.parse::<u32>().unwrap_or(u32::MAX), e.path()))
        })
        .collect();
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

fn read_group_info(dir: &Path) -> GroupInfo {
    let path = dir.join("group_info.json");
    if !path.is_file() {
        return GroupInfo::default();
    }
    read_json_file(&path)
        .and_then(|v| serde_json::from_value(v).map_err(|err| ParseError::malformed(&path, err)))
        .unwrap_or_else(|err| {
            tracing::warn!(error = %err, "ignoring unreadable group info");
            GroupInfo::default()
        })
}

pub struct GoogleChatParser;

impl PlatformParser for GoogleChatParser {
    fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError> {
        let thread_id = dir_name(unit);
        let info = read_group_info(unit);
        let participants = info
            .members
            .iter()
            .map(|m| m.name.clone().unwrap_or_else(|| "Unknown".to_string()))
            .map(|n| repair_mojibake(&n));
        let thread = ThreadRecord::new(
            &thread_id,
            Platform::GoogleChat,
            info.name.clone().unwrap_or_default(),
            participants,
        );
        ctx.store_thread(&thread, "message")?;

        let mut messages = Vec::new();
        for path in message_files(unit)? {
            let doc = read_json_file(&path).and_then(|v| {
                serde_json::from_value::<MessagesFile>(v)
                    .map_err(|err| ParseError::malformed(&path, err))
            })?;
            messages.extend(doc.messages);
        }

        // Reconcile every attachment reference against the folder contents
        // before building records, in encounter order.
        let references: Vec<String> = messages
            .iter()
            .flat_map(|m| m.attached_files.iter().filter_map(|a| a.export_name.clone()))
            .collect();
        let resolved = if references.is_empty() {
            Vec::new()
        } else {
            let disk = DiskCandidates::scan_dir(unit, is_metadata_file)
                .map_err(|err| ParseError::io(unit, err))?;
            attachments::reconcile(&disk, &references)
        };
        let mut resolved = resolved.into_iter();

        let mut counts = UnitCounts::default();
        let mut latest = LatestActivity::default();
        for message in messages {
            let sender = message
                .creator
                .as_ref()
                .and_then(|c| c.name.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            let ts = message
                .created_date
                .as_deref()
                .and_then(parse_chat_timestamp_ms)
                .unwrap_or(0);
            let content = message.text.as_deref().map(repair_mojibake);

            let mut record = MessageRecord::new(&thread_id, sender, ts, content);
            for attachment in &message.attached_files {
                if attachment.export_name.is_none() {
                    continue;
                }
                if let Some(file_name) = resolved.next() {
                    record
                        .media
                        .push(MediaRef::new(format!("{thread_id}/{file_name}"), "file"));
                }
            }
            record.reactions = message
                .reactions
                .iter()
                .flat_map(|r| {
                    let emoji = r.emoji.unicode.clone().unwrap_or_default();
                    r.reactor_emails.iter().map(move |actor| Reaction {
                        reaction: emoji.clone(),
                        actor: actor.clone(),
                    })
                })
                .collect();
            record.share = message
                .quoted_message_metadata
                .map(|quoted| json!({ "quoted_message": quoted }));
            if !message.annotations.is_empty() {
                record.annotations = Some(Value::Array(message.annotations));
            }
            ctx.store_message(&record, &mut counts, &mut latest)?;
        }
        ctx.finish_thread(&thread_id, &latest)?;
        Ok(counts)
    }
}
