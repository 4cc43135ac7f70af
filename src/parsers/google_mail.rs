//! Google Takeout `.mbox` mailboxes.

use super::{ParseContext, PlatformParser, UnitCounts};
use crate::error::ParseError;
use crate::hub::platform::Platform;
use crate::hub::records::{LatestActivity, MediaRef, MessageRecord, ThreadRecord, media_kind_for};
use crate::hub::text::{plain_preview, sanitize_file_name};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const SNIPPET_CHARS: usize = 100;
const SUBJECT_ID_CHARS: usize = 50;
const EXTERNAL_IMAGE_HOSTS: &[&str] = &["tenor.com", "giphy.com", "googleusercontent.com/proxy"];

/// Streams raw messages out of an mbox, splitting on `From ` lines.
struct MboxReader<R> {
    inner: R,
    pending: Vec<u8>,
    done: bool,
}

impl<R: BufRead> MboxReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for MboxReader<R> {
    type Item = std::io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut current: Vec<u8> = std::mem::take(&mut self.pending);
        let mut line = Vec::new();
        loop {
            line.clear();
            match self.inner.read_until(b'\n', &mut line) {
                Ok(0) => {
                    self.done = true;
                    return (!current.is_empty()).then_some(Ok(current));
                }
                Ok(_) if line.starts_with(b"From ") => {
                    if current.is_empty() {
                        continue;
                    }
                    return Some(Ok(current));
                }
                Ok(_) => current.extend_from_slice(&line),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

fn quote_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)<div class="gmail_quote[^"]*"[^>]*>.*?</div>|<blockquote[^>]*>.*?</blockquote>"#)
            .expect("static regex")
    })
}

fn reply_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(From|Sent|To|Subject):\s+.*|^-+\s*Original Message\s*-+$")
            .expect("static regex")
    })
}

fn img_src_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)<img[^>]*src="([^"]+)""#).expect("static regex"))
}

/// Keep only the new part of a plain-text reply.
pub(crate) fn strip_quoted_text(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let stripped = line.trim();
        if stripped.starts_with('>') || reply_header_re().is_match(stripped) {
            break;
        }
        if stripped.starts_with("On ")
            && lines[i..lines.len().min(i + 5)]
                .iter()
                .any(|l| l.trim().to_lowercase().ends_with("wrote:"))
        {
            break;
        }
        kept.push(*line);
    }
    kept.join("\n").trim().to_string()
}

/// Rejoin hard-wrapped lines; blank lines stay paragraph breaks.
pub(crate) fn unwrap_text(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .filter_map(|para| {
            let mut lines = para.split('\n');
            let mut joined = lines.next()?.to_string();
            for next in lines {
                let next = next.trim();
                if next.is_empty() {
                    continue;
                }
                let sep = if next.starts_with(|c: char| c.is_lowercase()) {
                    " "
                } else {
                    "\n"
                };
                joined = format!("{}{sep}{next}", joined.trim_end());
            }
            let joined = joined.trim().to_string();
            (!joined.is_empty()).then_some(joined)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn single_addresses(raw: &str) -> Vec<(Option<String>, String)> {
    let Ok(list) = mailparse::addrparse(raw) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for addr in list.iter() {
        match addr {
            MailAddr::Single(info) => out.push((info.display_name.clone(), info.addr.clone())),
            MailAddr::Group(group) => out.extend(
                group
                    .addrs
                    .iter()
                    .map(|info| (info.display_name.clone(), info.addr.clone())),
            ),
        }
    }
    out
}

fn display_or_addr(name: Option<String>, addr: String) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or(addr)
}

pub(crate) fn thread_id_for(gm_thread: Option<&str>, subject: &str) -> String {
    if let Some(id) = gm_thread.map(str::trim).filter(|id| !id.is_empty()) {
        return format!("gm_{id}");
    }
    let slug: String = subject
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(SUBJECT_ID_CHARS)
        .collect();
    format!("gm_{slug}")
}

fn labels_for(raw: &str) -> BTreeSet<&'static str> {
    let mut labels = BTreeSet::new();
    if raw.contains("Sent") {
        labels.insert("sent");
    }
    if raw.contains("Inbox") {
        labels.insert("inbox");
    }
    if labels.is_empty() {
        labels.insert("inbox");
    }
    labels
}

#[derive(Default)]
struct Bodies {
    plain: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

struct Attachment {
    file_name: String,
    is_image: bool,
    bytes: Vec<u8>,
}

fn collect_parts(part: &ParsedMail<'_>, bodies: &mut Bodies, seq: &mut usize) {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, bodies, seq);
        }
        return;
    }
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    let disposition = part.get_content_disposition();
    let is_attachment = disposition.disposition == DispositionType::Attachment;
    let is_image = mimetype.starts_with("image/");

    if !is_attachment && mimetype == "text/plain" && bodies.plain.is_none() {
        bodies.plain = part.get_body().ok();
        return;
    }
    if !is_attachment && mimetype == "text/html" && bodies.html.is_none() {
        bodies.html = part.get_body().ok();
        return;
    }
    if !(is_attachment || is_image) {
        return;
    }
    let Ok(bytes) = part.get_body_raw() else {
        return;
    };
    if bytes.is_empty() {
        return;
    }
    *seq += 1;
    let ext = mimetype.rsplit('/').next().unwrap_or("bin").to_string();
    let name = disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .cloned()
        .or_else(|| {
            part.headers
                .get_first_value("Content-ID")
                .map(|cid| format!("{}.{ext}", cid.trim_matches(|c| c == '<' || c == '>')))
        })
        .unwrap_or_else(|| format!("inline_{seq}.{ext}"));
    bodies.attachments.push(Attachment {
        file_name: sanitize_file_name(&name),
        is_image,
        bytes,
    });
}

/// Write once; an existing file with the same name is kept.
fn save_attachment(dir: &Path, attachment: &Attachment) -> std::io::Result<()> {
    let target = dir.join(&attachment.file_name);
    if target.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&attachment.bytes)?;
    if let Err(err) = tmp.persist_noclobber(&target) {
        if !target.exists() {
            return Err(err.error);
        }
    }
    Ok(())
}

fn strip_html_quotes(html: &str) -> String {
    quote_block_re().replace_all(html, "").into_owned()
}

fn external_images(body: &str) -> Vec<MediaRef> {
    img_src_re()
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .filter(|src| {
            let lower = src.to_lowercase();
            EXTERNAL_IMAGE_HOSTS.iter().any(|host| lower.contains(host))
        })
        .map(|src| MediaRef::new(src, "photo"))
        .collect()
}

#[derive(Default)]
struct MailThread {
    title: String,
    participants: BTreeSet<String>,
    labels: BTreeSet<&'static str>,
    latest: LatestActivity,
}

pub struct GoogleMailParser;

impl GoogleMailParser {
    fn attachments_uri_base(ctx: &ParseContext<'_>, attach_dir: &Path) -> String {
        attach_dir
            .strip_prefix(ctx.root)
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .unwrap_or_else(|_| "Mail/attachments".to_string())
    }

    fn ingest_message(
        &self,
        ctx: &mut ParseContext<'_>,
        raw: &[u8],
        attach_dir: &Path,
        threads: &mut BTreeMap<String, MailThread>,
    ) -> Result<Option<MessageRecord>, ParseError> {
        let parsed = match mailparse::parse_mail(raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unparseable mail message");
                return Ok(None);
            }
        };
        let headers = &parsed.headers;

        if let Some(delivered) = headers.get_first_value("Delivered-To") {
            for (_, addr) in single_addresses(&delivered) {
                ctx.identities.record_delivery(&addr);
            }
        }
        let mut participants = Vec::new();
        for header in ["From", "To", "Cc"] {
            for value in headers.get_all_values(header) {
                for (name, addr) in single_addresses(&value) {
                    if let Some(name) = name.as_deref() {
                        ctx.identities.record_alias(&addr, name);
                    }
                    participants.push(display_or_addr(name, addr));
                }
            }
        }

        let subject = headers
            .get_first_value("Subject")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "(No Subject)".to_string());
        let thread_id = thread_id_for(headers.get_first_value("X-GM-THRID").as_deref(), &subject);
        let sender = headers
            .get_first_value("From")
            .and_then(|raw| single_addresses(&raw).into_iter().next())
            .map(|(name, addr)| display_or_addr(name, addr))
            .unwrap_or_else(|| "Unknown".to_string());
        let ts = headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .map(|secs| secs * 1000)
            .unwrap_or(0);
        let labels = labels_for(&headers.get_first_value("X-Gmail-Labels").unwrap_or_default());

        let mut bodies = Bodies::default();
        let mut seq = 0usize;
        collect_parts(&parsed, &mut bodies, &mut seq);

        let uri_base = Self::attachments_uri_base(ctx, attach_dir);
        let mut media = Vec::new();
        for attachment in &bodies.attachments {
            if let Err(err) = save_attachment(attach_dir, attachment) {
                tracing::warn!(file = %attachment.file_name, error = %err, "failed to save attachment");
                continue;
            }
            let kind = if attachment.is_image {
                "photo"
            } else {
                media_kind_for(&attachment.file_name)
            };
            media.push(MediaRef::new(format!("{uri_base}/{}", attachment.file_name), kind));
        }

        let content = match (&bodies.html, &bodies.plain) {
            (Some(html), _) => strip_html_quotes(html),
            (None, Some(plain)) => unwrap_text(&strip_quoted_text(plain)),
            (None, None) => String::new(),
        };
        let image_source = bodies.html.as_deref().or(bodies.plain.as_deref()).unwrap_or("");
        for image in external_images(image_source) {
            if !media.iter().any(|m| m.uri == image.uri) {
                media.push(image);
            }
        }

        let mut record = MessageRecord::new(&thread_id, sender, ts, Some(content));
        record.media = media;

        let thread = threads.entry(thread_id).or_default();
        if thread.title.is_empty() {
            thread.title = subject;
        }
        thread.participants.extend(participants);
        thread.labels.extend(labels);
        let preview = record
            .content
            .as_deref()
            .map(|c| plain_preview(c, SNIPPET_CHARS))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| record.snippet());
        thread.latest.observe_with(ts, preview);
        Ok(Some(record))
    }
}

impl PlatformParser for GoogleMailParser {
    fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError> {
        let file = File::open(unit).map_err(|err| ParseError::io(unit, err))?;
        let attach_dir: PathBuf = unit
            .parent()
            .map(|p| p.join("attachments"))
            .unwrap_or_else(|| PathBuf::from("attachments"));

        let mut counts = UnitCounts::default();
        let mut threads: BTreeMap<String, MailThread> = BTreeMap::new();
        for raw in MboxReader::new(BufReader::new(file)) {
            let raw = raw.map_err(|err| ParseError::io(unit, err))?;
            if let Some(record) = self.ingest_message(ctx, &raw, &attach_dir, &mut threads)? {
                counts.add(ctx.store.insert_message_if_absent(&record)?);
            }
        }

        for (thread_id, thread) in threads {
            let record = ThreadRecord::new(
                &thread_id,
                Platform::GoogleMail,
                thread.title,
                thread.participants,
            );
            ctx.store.upsert_thread(&record)?;
            for label in &thread.labels {
                ctx.store.add_label(&thread_id, label)?;
            }
            ctx.finish_thread(&thread_id, &thread.latest)?;
        }
        Ok(counts)
    }
}
