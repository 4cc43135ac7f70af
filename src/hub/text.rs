//! Text cleanup shared by the platform parsers.

use chrono::{DateTime, NaiveDateTime};
use html2text::render::TrivialDecorator;
use regex::Regex;
use std::sync::OnceLock;

const HEART: char = '\u{2764}';
const VS16: char = '\u{FE0F}';

/// Meta exports write UTF-8 bytes as if they were latin-1 code points.
/// Reinterpret them when every char fits in a byte and the result is valid
/// UTF-8; otherwise keep the input. Bare hearts gain the emoji selector.
pub fn repair_mojibake(input: &str) -> String {
    let repaired = if input.chars().all(|c| (c as u32) <= 0xFF) {
        let bytes: Vec<u8> = input.chars().map(|c| c as u8).collect();
        String::from_utf8(bytes).unwrap_or_else(|_| input.to_string())
    } else {
        input.to_string()
    };

    if !repaired.contains(HEART) {
        return repaired;
    }
    let mut out = String::with_capacity(repaired.len() + 3);
    let mut chars = repaired.chars().peekable();
    while let Some(ch) = chars.next() {
        out.push(ch);
        if ch == HEART && chars.peek() != Some(&VS16) {
            out.push(VS16);
        }
    }
    out
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Wide enough that rendering never wraps a paragraph.
const RENDER_WIDTH: usize = 10_000;

/// Render markup to undecorated text, one non-empty line per rendered line.
/// Entities are decoded by the HTML parser.
pub fn strip_tags(html: &str) -> String {
    let rendered = html2text::from_read_with_decorator(
        html.as_bytes(),
        RENDER_WIDTH,
        TrivialDecorator::new(),
    )
    .unwrap_or_else(|err| {
        tracing::debug!(error = %err, "html render failed; keeping raw text");
        html.to_string()
    });
    rendered
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Single-line plain text preview of markup or text.
pub fn plain_preview(input: &str, max_chars: usize) -> String {
    let text = if input.contains('<') && input.contains('>') {
        strip_tags(input)
    } else {
        input.to_string()
    };
    let collapsed = whitespace_re().replace_all(text.trim(), " ");
    collapsed.chars().take(max_chars).collect()
}

/// Parse `Monday, May 20, 2013 at 2:11:12 PM UTC` style timestamps.
pub fn parse_chat_timestamp_ms(raw: &str) -> Option<i64> {
    let clean = raw
        .replace('\u{202f}', " ")
        .replace(" at ", " ")
        .replace(" UTC", "");
    NaiveDateTime::parse_from_str(clean.trim(), "%A, %B %d, %Y %I:%M:%S %p")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// RFC 3339 first, then the underscore form used in voice export file names.
pub fn parse_rfc3339_ms(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Some(dt.timestamp_millis());
    }
    let normalized = raw.trim().replace('_', ":");
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
