//! Facebook and Instagram thread folders (`message_<n>.json`).

use super::{ParseContext, PlatformParser, UnitCounts, dir_name, read_json_file};
use crate::error::ParseError;
use crate::hub::platform::Platform;
use crate::hub::records::{
    LatestActivity, MediaRef, MessageRecord, Reaction, ThreadRecord, media_kind_for,
};
use crate::hub::text::repair_mojibake;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ThreadFile {
    title: Option<String>,
    participants: Vec<Participant>,
    messages: Vec<MetaMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Participant {
    name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct UriRef {
    uri: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MetaReaction {
    reaction: Option<String>,
    actor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MetaMessage {
    sender_name: Option<String>,
    timestamp_ms: i64,
    content: Option<String>,
    photos: Vec<UriRef>,
    videos: Vec<UriRef>,
    gifs: Vec<UriRef>,
    audio_files: Vec<UriRef>,
    files: Vec<UriRef>,
    sticker: Option<UriRef>,
    reactions: Vec<MetaReaction>,
    share: Option<Value>,
}

impl MetaMessage {
    fn media(&self) -> Vec<MediaRef> {
        let mut media = Vec::new();
        let typed = [
            (&self.photos, "photo"),
            (&self.videos, "video"),
            (&self.gifs, "gif"),
            (&self.audio_files, "audio"),
        ];
        for (refs, kind) in typed {
            media.extend(
                refs.iter()
                    .filter_map(|r| r.uri.as_deref())
                    .map(|uri| MediaRef::new(uri, kind)),
            );
        }
        media.extend(
            self.files
                .iter()
                .filter_map(|r| r.uri.as_deref())
                .map(|uri| MediaRef::new(uri, media_kind_for(uri))),
        );
        if let Some(uri) = self.sticker.as_ref().and_then(|s| s.uri.as_deref()) {
            media.push(MediaRef::new(uri, "sticker"));
        }
        media
    }

    fn into_record(self, thread_id: &str) -> MessageRecord {
        let sender = self
            .sender_name
            .as_deref()
            .map(repair_mojibake)
            .unwrap_or_else(|| "Unknown".to_string());
        let content = self.content.as_deref().map(repair_mojibake);
        let mut record = MessageRecord::new(thread_id, sender, self.timestamp_ms, content);
        record.media = self.media();
        record.reactions = self
            .reactions
            .iter()
            .map(|r| Reaction {
                reaction: repair_mojibake(r.reaction.as_deref().unwrap_or_default()),
                actor: repair_mojibake(r.actor.as_deref().unwrap_or_default()),
            })
            .collect();
        record.share = self.share.map(repair_share);
        record
    }
}

fn repair_share(mut share: Value) -> Value {
    if let Some(text) = share.get_mut("share_text") {
        if let Some(raw) = text.as_str() {
            *text = Value::String(repair_mojibake(raw));
        }
    }
    share
}

/// `message_<n>.json` files ordered by `n`.
fn message_files(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let entries = fs::read_dir(dir).map_err(|err| ParseError::io(dir, err))?;
    let mut files: Vec<(u32, PathBuf)> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let n = name
                .strip_prefix("message_")?
                .strip_suffix(".json")?
                .parse::<u32>()
                .ok()?;
            Some((n, e.path()))
        })
        .collect();
    files.sort();
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

pub struct MetaParser {
    platform: Platform,
}

impl MetaParser {
    pub const fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

impl PlatformParser for MetaParser {
    fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError> {
        let thread_id = dir_name(unit);
        let mut docs = Vec::new();
        let mut last_error = None;
        for path in message_files(unit)? {
            let parsed = read_json_file(&path).and_then(|value| {
                serde_json::from_value::<ThreadFile>(value)
                    .map_err(|err| ParseError::malformed(&path, err))
            });
            match parsed {
                Ok(doc) => docs.push(doc),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable message file");
                    last_error = Some(err);
                }
            }
        }
        if docs.is_empty() {
            return match last_error {
                Some(err) => Err(err),
                None => Ok(UnitCounts::default()),
            };
        }

        let title = docs
            .iter()
            .find_map(|d| d.title.as_deref().filter(|t| !t.is_empty()))
            .map(repair_mojibake)
            .unwrap_or_default();
        let participants: Vec<String> = docs
            .iter()
            .find(|d| !d.participants.is_empty())
            .map(|d| {
                d.participants
                    .iter()
                    .filter_map(|p| p.name.as_deref())
                    .map(repair_mojibake)
                    .collect()
            })
            .unwrap_or_default();
        let thread = ThreadRecord::new(&thread_id, self.platform, title, participants);
        ctx.store_thread(&thread, "message")?;

        let mut counts = UnitCounts::default();
        let mut latest = LatestActivity::default();
        for doc in docs {
            for message in doc.messages {
                let record = message.into_record(&thread_id);
                ctx.store_message(&record, &mut counts, &mut latest)?;
            }
        }
        ctx.finish_thread(&thread_id, &latest)?;
        Ok(counts)
    }
}
