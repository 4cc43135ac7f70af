//! Machine-readable progress lines on stdout, one `[Tag]: payload` per line.
//! A supervising process splits the payload on `|`.

use crate::hub::platform::Platform;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    TotalArchives(usize),
    ArchiveStarted { name: String, members: usize },
    ArchiveProgress { name: String, done: usize, total: usize },
    ArchiveExtracted { name: String },
    ArchiveSkipped { name: String, reason: String },
    TotalFiles(usize),
    Ingesting { platform: Platform, unit: String },
    Identity { platform: Platform, value: String },
    Committed { units: usize, inserted: u64, skipped: u64 },
    Done { units: usize, inserted: u64, skipped: u64, failed: usize },
    Rollback { restored: usize, unrecoverable: usize },
    Error(String),
}

fn sanitize_field(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| if c == '|' || c.is_control() { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "na".to_string()
    } else {
        trimmed.to_string()
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TotalArchives(n) => write!(f, "[TotalArchives]: {n}"),
            Self::ArchiveStarted { name, members } => {
                write!(f, "[ArchiveStarted]: {}|{members}", sanitize_field(name))
            }
            Self::ArchiveProgress { name, done, total } => {
                write!(f, "[ArchiveProgress]: {}|{done}|{total}", sanitize_field(name))
            }
            Self::ArchiveExtracted { name } => {
                write!(f, "[ArchiveExtracted]: {}", sanitize_field(name))
            }
            Self::ArchiveSkipped { name, reason } => write!(
                f,
                "[ArchiveSkipped]: {}|{}",
                sanitize_field(name),
                sanitize_field(reason)
            ),
            Self::TotalFiles(n) => write!(f, "[TotalFiles]: {n}"),
            Self::Ingesting { platform, unit } => {
                write!(f, "[Ingesting]: {}|{}", platform.as_str(), sanitize_field(unit))
            }
            Self::Identity { platform, value } => {
                write!(f, "[Identity]: {}|{}", platform.as_str(), sanitize_field(value))
            }
            Self::Committed {
                units,
                inserted,
                skipped,
            } => write!(f, "[Committed]: {units}|{inserted}|{skipped}"),
            Self::Done {
                units,
                inserted,
                skipped,
                failed,
            } => write!(f, "[Done]: {units}|{inserted}|{skipped}|{failed}"),
            Self::Rollback {
                restored,
                unrecoverable,
            } => write!(f, "[Rollback]: {restored}|{unrecoverable}"),
            Self::Error(message) => write!(f, "[Error]: {}", sanitize_field(message)),
        }
    }
}

pub fn emit(event: ProgressEvent) {
    println!("{event}");
}
