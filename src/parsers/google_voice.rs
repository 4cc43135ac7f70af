//! Google Voice `Calls/` HTML files, grouped into one virtual thread per
//! counterpart.

use super::{ParseContext, PlatformParser, UnitCounts};
use crate::error::ParseError;
use crate::hub::platform::Platform;
use crate::hub::records::{LatestActivity, MediaRef, MessageRecord, ThreadRecord};
use crate::hub::text::{parse_rfc3339_ms, repair_mojibake, strip_tags};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const UNKNOWN_COUNTERPART: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKind {
    Text,
    Voicemail,
    Placed,
    Received,
    Missed,
}

impl EntryKind {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "Text" => Some(Self::Text),
            "Voicemail" => Some(Self::Voicemail),
            "Placed" => Some(Self::Placed),
            "Received" => Some(Self::Received),
            "Missed" => Some(Self::Missed),
            _ => None,
        }
    }

    fn call_log_text(self) -> Option<&'static str> {
        match self {
            Self::Missed => Some("Missed Call"),
            Self::Placed => Some("Placed Call"),
            Self::Received => Some("Received Call"),
            Self::Text | Self::Voicemail => None,
        }
    }
}

struct Patterns {
    file_name: Regex,
    anonymous: Regex,
    file_stamp: Regex,
    message_block: Regex,
    stamp: Regex,
    sender_cite: Regex,
    fn_name: Regex,
    tel_href: Regex,
    contributor: Regex,
    quote: Regex,
    img: Regex,
    audio: Regex,
    vcf_link: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |src: &str| Regex::new(src).expect("static regex");
        Patterns {
            file_name: re(r"^(.*?)\s+-\s+(Text|Voicemail|Placed|Received|Missed)"),
            anonymous: re(r"^\s*-\s+(Text|Voicemail|Placed|Received|Missed)"),
            file_stamp: re(r"(\d{4}-\d{2}-\d{2}T\d{2}_\d{2}_\d{2}Z)"),
            message_block: re(r#"(?s)<div class="message">(.*?)</div>"#),
            stamp: re(r#"<abbr[^>]*class="(?:dt|published)"[^>]*title="([^"]*)""#),
            sender_cite: re(r#"(?s)<cite[^>]*class="sender[^"]*"[^>]*>(.*?)</cite>"#),
            fn_name: re(r#"(?s)class="fn"[^>]*>(.*?)</"#),
            tel_href: re(r#"href="tel:([^"]*)""#),
            contributor: re(r#"(?s)<div class="contributor[^"]*"[^>]*>(.*?)</div>"#),
            quote: re(r"(?s)<q>(.*?)</q>"),
            img: re(r#"<img[^>]*src="([^"]+)""#),
            audio: re(r#"<audio[^>]*src="([^"]+)""#),
            vcf_link: re(r#"(?i)<a[^>]*href="([^"]+\.vcf)""#),
        }
    })
}

/// Counterpart and kind from `"<who> - <Kind> - <stamp>.html"`.
fn classify_file(name: &str) -> Option<(String, EntryKind)> {
    let p = patterns();
    if let Some(caps) = p.file_name.captures(name) {
        let who = caps[1].trim();
        let kind = EntryKind::parse(&caps[2])?;
        let who = if who.is_empty() { UNKNOWN_COUNTERPART } else { who };
        return Some((who.to_string(), kind));
    }
    let caps = p.anonymous.captures(name)?;
    Some((UNKNOWN_COUNTERPART.to_string(), EntryKind::parse(&caps[1])?))
}

fn group_calls(calls_dir: &Path) -> Result<BTreeMap<String, Vec<(PathBuf, EntryKind)>>, ParseError> {
    let entries = fs::read_dir(calls_dir).map_err(|err| ParseError::io(calls_dir, err))?;
    let mut groups: BTreeMap<String, Vec<(PathBuf, EntryKind)>> = BTreeMap::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.to_ascii_lowercase().ends_with(".html") {
            continue;
        }
        if let Some((who, kind)) = classify_file(name) {
            groups.entry(who).or_default().push((path.clone(), kind));
        }
    }
    for files in groups.values_mut() {
        files.sort();
    }
    Ok(groups)
}

struct VoiceEntry {
    record: MessageRecord,
    snippet: String,
}

fn sender_for(html: &str, block: &str, kind: EntryKind, counterpart: &str) -> String {
    let p = patterns();
    let mut sender = None;
    if kind == EntryKind::Voicemail {
        sender = p
            .contributor
            .captures(html)
            .and_then(|c| p.tel_href.captures(&c[1]).map(|t| t[1].to_string()));
    } else if let Some(cite) = p.sender_cite.captures(block) {
        sender = p
            .fn_name
            .captures(&cite[1])
            .map(|c| strip_tags(&c[1]))
            .filter(|s| !s.is_empty())
            .or_else(|| p.tel_href.captures(&cite[1]).map(|t| t[1].to_string()));
    } else if kind == EntryKind::Placed {
        sender = Some("Me".to_string());
    }

    let sender = match sender.filter(|s| !s.trim().is_empty()) {
        Some(s) if s.eq_ignore_ascii_case("me") => "Me".to_string(),
        Some(s) => s.trim().to_string(),
        None => counterpart.to_string(),
    };
    repair_mojibake(&sender)
}

fn parse_file(
    path: &Path,
    kind: EntryKind,
    thread_id: &str,
) -> Result<Vec<VoiceEntry>, ParseError> {
    let html = fs::read_to_string(path).map_err(|err| ParseError::io(path, err))?;
    let p = patterns();
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();

    let mut blocks: Vec<&str> = p
        .message_block
        .captures_iter(&html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    // Call logs have no message blocks; the whole page is the entry.
    if blocks.is_empty() && p.stamp.is_match(&html) {
        blocks.push(&html);
    }

    let mut out = Vec::with_capacity(blocks.len());
    for (index, block) in blocks.into_iter().enumerate() {
        let mut ts = p
            .stamp
            .captures(block)
            .and_then(|c| parse_rfc3339_ms(&c[1]));
        if ts.is_none() && index == 0 {
            ts = p
                .file_stamp
                .captures(file_name)
                .and_then(|c| parse_rfc3339_ms(&c[1]));
        }
        let ts = ts.unwrap_or(0);

        let sender = sender_for(&html, block, kind, thread_id);
        let content = p
            .quote
            .captures(block)
            .map(|c| strip_tags(&c[1]))
            .filter(|t| !t.is_empty())
            .or_else(|| kind.call_log_text().map(str::to_string));

        let mut record = MessageRecord::new(thread_id, sender, ts, content);
        for caps in p.img.captures_iter(block) {
            record
                .media
                .push(MediaRef::new(format!("Voice/Calls/{}", &caps[1]), "photo"));
        }
        for caps in p.audio.captures_iter(block) {
            record
                .media
                .push(MediaRef::new(format!("Voice/Calls/{}", &caps[1]), "audio"));
        }
        for caps in p.vcf_link.captures_iter(block) {
            record
                .media
                .push(MediaRef::new(format!("Voice/Calls/{}", &caps[1]), "file"));
        }

        let snippet = if kind == EntryKind::Voicemail {
            "Voicemail".to_string()
        } else if record.content.is_none() && !record.media.is_empty() {
            format!("{} sent a file", record.sender_name)
        } else {
            record.snippet()
        };
        out.push(VoiceEntry { record, snippet });
    }
    Ok(out)
}

pub struct GoogleVoiceParser;

impl PlatformParser for GoogleVoiceParser {
    fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError> {
        let groups = group_calls(&unit.join("Calls"))?;
        tracing::info!(threads = groups.len(), "grouped voice call files");

        let mut total = UnitCounts::default();
        for (counterpart, files) in groups {
            let thread = ThreadRecord::new(
                &counterpart,
                Platform::GoogleVoice,
                &counterpart,
                ["Me".to_string(), counterpart.clone()],
            );
            ctx.store_thread(&thread, "message")?;

            let mut counts = UnitCounts::default();
            let mut latest = LatestActivity::default();
            for (path, kind) in files {
                let entries = match parse_file(&path, kind, &counterpart) {
                    Ok(entries) => entries,
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping voice file");
                        continue;
                    }
                };
                for entry in entries {
                    counts.add(ctx.store.insert_message_if_absent(&entry.record)?);
                    latest.observe_with(entry.record.timestamp_ms, entry.snippet);
                }
            }
            ctx.finish_thread(&counterpart, &latest)?;
            total.merge(counts);
        }
        Ok(total)
    }
}
