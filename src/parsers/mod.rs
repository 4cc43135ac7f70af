//! Platform parsers turn one unit of work into stored records.

pub mod facebook_activity;
pub mod google_chat;
pub mod google_mail;
pub mod google_voice;
pub mod meta;

use crate::error::ParseError;
use crate::hub::identity::IdentityRegistry;
use crate::hub::platform::Platform;
use crate::hub::records::{LatestActivity, MessageRecord, ThreadRecord};
use crate::hub::scanner::UnitKind;
use crate::hub::store::{IngestionStore, InsertOutcome};
use crate::hub::util::truncate_with_ellipsis;
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitCounts {
    pub inserted: u64,
    pub skipped: u64,
}

impl UnitCounts {
    pub fn add(&mut self, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted += 1,
            InsertOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: UnitCounts) {
        self.inserted += other.inserted;
        self.skipped += other.skipped;
    }
}

/// Run-scoped state handed to every parser call. Parsers keep nothing
/// between calls.
pub struct ParseContext<'a> {
    pub store: &'a IngestionStore,
    pub identities: &'a mut IdentityRegistry,
    pub root: &'a Path,
    pub snippet_max_chars: usize,
}

impl ParseContext<'_> {
    /// Insert a message and fold it into the unit's latest activity.
    pub fn store_message(
        &self,
        message: &MessageRecord,
        counts: &mut UnitCounts,
        latest: &mut LatestActivity,
    ) -> Result<(), ParseError> {
        counts.add(self.store.insert_message_if_absent(message)?);
        latest.observe(message);
        Ok(())
    }

    /// Upsert the thread and attach `label`.
    pub fn store_thread(&self, thread: &ThreadRecord, label: &str) -> Result<(), ParseError> {
        self.store.upsert_thread(thread)?;
        self.store.add_label(&thread.id, label)?;
        Ok(())
    }

    pub fn finish_thread(&self, thread_id: &str, latest: &LatestActivity) -> Result<(), ParseError> {
        if let Some(snippet) = &latest.snippet {
            let snippet = truncate_with_ellipsis(snippet, self.snippet_max_chars);
            self.store.record_activity(thread_id, latest.timestamp_ms, &snippet)?;
        }
        Ok(())
    }
}

pub trait PlatformParser: Sync {
    fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError>;
}

static FACEBOOK: meta::MetaParser = meta::MetaParser::new(Platform::Facebook);
static FACEBOOK_ACTIVITY: facebook_activity::FacebookActivityParser =
    facebook_activity::FacebookActivityParser;
static INSTAGRAM: meta::MetaParser = meta::MetaParser::new(Platform::Instagram);
static GOOGLE_CHAT: google_chat::GoogleChatParser = google_chat::GoogleChatParser;
static GOOGLE_VOICE: google_voice::GoogleVoiceParser = google_voice::GoogleVoiceParser;
static GOOGLE_MAIL: google_mail::GoogleMailParser = google_mail::GoogleMailParser;

pub fn parser_for(platform: Platform, kind: UnitKind) -> &'static dyn PlatformParser {
    match platform {
        Platform::Facebook if kind == UnitKind::Activity => &FACEBOOK_ACTIVITY,
        Platform::Facebook => &FACEBOOK,
        Platform::Instagram => &INSTAGRAM,
        Platform::GoogleChat => &GOOGLE_CHAT,
        Platform::GoogleVoice => &GOOGLE_VOICE,
        Platform::GoogleMail => &GOOGLE_MAIL,
    }
}

pub(crate) fn read_json_file(path: &Path) -> Result<Value, ParseError> {
    let raw = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    serde_json::from_str(&raw).map_err(|err| ParseError::malformed(path, err))
}

pub(crate) fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
