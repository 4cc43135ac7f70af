//! Builds the prioritized work queue for one scan root.

use crate::hub::platform::{Platform, PlatformFilter};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const THREAD_MARKERS: &[&str] = &["message_1.json", "messages.json"];
const PROFILE_MARKERS: &[&str] = &[
    "profile_information.json",
    "personal_information.json",
    "user_info.json",
];
const VOICE_ROOTS: &[&str] = &["Voice", "Takeout/Voice", ""];
const MAIL_ROOTS: &[&str] = &["Mail", "Takeout/Mail", ""];
const FACEBOOK_ACTIVITY_ROOTS: &[&str] = &[
    "Facebook/your_facebook_activity",
    "your_facebook_activity",
];
const FACEBOOK_ACTIVITY_DIRS: &[&str] = &["events", "posts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnitKind {
    /// Identity marker only; triggers discovery, stores nothing.
    Profile,
    /// A thread folder with message files.
    Thread,
    /// A single mailbox file.
    Mailbox,
    /// The voice export root (the directory holding `Calls/`).
    VoiceRoot,
    /// Facebook `your_facebook_activity/` holding `events/` or `posts/`.
    Activity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    pub platform: Platform,
    pub kind: UnitKind,
    pub path: PathBuf,
}

impl WorkUnit {
    pub fn new(platform: Platform, kind: UnitKind, path: PathBuf) -> Self {
        Self {
            platform,
            kind,
            path,
        }
    }

    fn sort_key(&self) -> (u32, Reverse<&Path>, UnitKind) {
        (self.platform.weight(), Reverse(self.path.as_path()), self.kind)
    }
}

/// Max-heap order: higher weight first, then ascending path, and thread
/// units ahead of profile units for the same directory.
impl Ord for WorkUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for WorkUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub root: PathBuf,
    pub filter: PlatformFilter,
    pub allow: Option<BTreeSet<Platform>>,
}

impl ScanPlan {
    fn admits(&self, platform: Platform) -> bool {
        self.filter.admits(platform)
            && self
                .allow
                .as_ref()
                .is_none_or(|allowed| allowed.contains(&platform))
    }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn under(root: &Path, rel: &str) -> PathBuf {
    if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(rel)
    }
}

fn voice_root(root: &Path) -> Option<PathBuf> {
    VOICE_ROOTS
        .iter()
        .map(|rel| under(root, rel))
        .find(|candidate| candidate.join("Calls").is_dir())
}

fn facebook_activity_root(root: &Path) -> Option<PathBuf> {
    FACEBOOK_ACTIVITY_ROOTS
        .iter()
        .map(|rel| root.join(rel))
        .find(|candidate| {
            FACEBOOK_ACTIVITY_DIRS
                .iter()
                .any(|dir| candidate.join(dir).is_dir())
        })
}

fn mailboxes(root: &Path) -> Vec<PathBuf> {
    let mut found = BTreeSet::new();
    for rel in MAIL_ROOTS {
        let Ok(entries) = fs::read_dir(under(root, rel)) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let is_mbox = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("mbox"));
            if is_mbox && path.is_file() {
                found.insert(path);
            }
        }
    }
    found.into_iter().collect()
}

fn marker_kind(file_name: &str) -> Option<UnitKind> {
    if THREAD_MARKERS.contains(&file_name) {
        Some(UnitKind::Thread)
    } else if PROFILE_MARKERS.contains(&file_name) {
        Some(UnitKind::Profile)
    } else {
        None
    }
}

/// Structural units first, then every directory holding a marker file,
/// classified by the ordered keyword table.
pub fn build_queue(plan: &ScanPlan) -> BinaryHeap<WorkUnit> {
    let mut queue = BinaryHeap::new();
    let root = plan.root.as_path();

    if plan.admits(Platform::GoogleVoice) {
        if let Some(voice) = voice_root(root) {
            queue.push(WorkUnit::new(Platform::GoogleVoice, UnitKind::VoiceRoot, voice));
        }
    }
    if plan.admits(Platform::GoogleMail) {
        for mbox in mailboxes(root) {
            queue.push(WorkUnit::new(Platform::GoogleMail, UnitKind::Mailbox, mbox));
        }
    }
    if plan.admits(Platform::Facebook) {
        if let Some(activity) = facebook_activity_root(root) {
            queue.push(WorkUnit::new(Platform::Facebook, UnitKind::Activity, activity));
        }
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable path during scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = entry.file_name().to_str().and_then(marker_kind) else {
            continue;
        };
        let Some(dir) = entry.path().parent() else {
            continue;
        };
        let relative = dir.strip_prefix(root).unwrap_or(dir);
        let Some(platform) = Platform::classify(relative) else {
            tracing::debug!(dir = %dir.display(), "marker outside any known platform tree");
            continue;
        };
        if !plan.admits(platform) {
            continue;
        }
        queue.push(WorkUnit::new(platform, kind, dir.to_path_buf()));
    }
    queue
}
