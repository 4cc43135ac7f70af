//! Per-run "who am I" facts for each platform.

use crate::hub::platform::Platform;
use crate::hub::store::{IdKind, IngestionStore};
use crate::hub::text::repair_mojibake;
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const FACEBOOK_PROFILES: &[&str] = &[
    "Facebook/profile_information/profile_information.json",
    "Facebook/personal_information/profile_information/profile_information.json",
];
const INSTAGRAM_PROFILES: &[&str] = &[
    "Instagram/personal_information/personal_information/personal_information.json",
    "Instagram/personal_information/personal_information.json",
];
const CHAT_USER_ROOTS: &[&str] = &["Google Chat/Users", "Takeout/Google Chat/Users"];
const VOICE_PHONES: &[&str] = &["Voice/Phones.vcf", "Takeout/Voice/Phones.vcf"];

#[derive(Debug, Clone, Default)]
struct MailTally {
    count: u64,
    names: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailOwner {
    pub address: String,
    pub count: u64,
    pub names: Vec<String>,
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    discovered: BTreeSet<Platform>,
    names: BTreeMap<Platform, String>,
    mail: BTreeMap<String, MailTally>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_discovered(&self, platform: Platform) -> bool {
        self.discovered.contains(&platform)
    }

    pub fn name_for(&self, platform: Platform) -> Option<&str> {
        self.names.get(&platform).map(String::as_str)
    }

    /// Look up the account owner's display name once per platform. Later
    /// calls return the memoized answer without touching the filesystem.
    pub fn discover(&mut self, platform: Platform, workspace: &Path) -> Option<String> {
        if !self.discovered.insert(platform) {
            return self.names.get(&platform).cloned();
        }
        let found = match platform {
            Platform::Facebook => first_json_field(workspace, FACEBOOK_PROFILES, |v| {
                v.pointer("/profile_v2/name/full_name")
            }),
            Platform::Instagram => first_json_field(workspace, INSTAGRAM_PROFILES, |v| {
                v.pointer("/profile_user/0/string_map_data/Name/value")
            }),
            Platform::GoogleChat => chat_owner(workspace),
            Platform::GoogleVoice => voice_number(workspace),
            // Mail ownership is inferred from delivery counts at run end.
            Platform::GoogleMail => None,
        };
        if let Some(name) = &found {
            self.names.insert(platform, name.clone());
        }
        found
    }

    /// `discover` plus persisting a first-time hit as a self identity.
    pub fn discover_and_store(
        &mut self,
        platform: Platform,
        workspace: &Path,
        store: &IngestionStore,
    ) -> rusqlite::Result<Option<String>> {
        if self.is_discovered(platform) {
            return Ok(None);
        }
        let Some(name) = self.discover(platform, workspace) else {
            return Ok(None);
        };
        store.upsert_identity(platform, IdKind::Name, &name, true, None)?;
        Ok(Some(name))
    }

    /// Count one message delivered to `address`.
    pub fn record_delivery(&mut self, address: &str) {
        let key = address.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        self.mail.entry(key).or_default().count += 1;
    }

    /// Remember a display name seen next to `address`.
    pub fn record_alias(&mut self, address: &str, name: &str) {
        let key = address.trim().to_lowercase();
        let name = name.trim();
        if key.is_empty() || name.is_empty() {
            return;
        }
        self.mail
            .entry(key)
            .or_default()
            .names
            .insert(name.to_string());
    }

    /// Highest delivery count wins; ties go to the smaller address. An
    /// address that was only ever seen as a sender or recipient never wins.
    pub fn resolve_mail_owner(&self) -> Option<MailOwner> {
        let mut best: Option<(&String, &MailTally)> = None;
        for (address, tally) in self.mail.iter().filter(|(_, t)| t.count > 0) {
            if best.is_none_or(|(_, current)| tally.count > current.count) {
                best = Some((address, tally));
            }
        }
        best.map(|(address, tally)| MailOwner {
            address: address.clone(),
            count: tally.count,
            names: tally.names.iter().cloned().collect(),
        })
    }

    /// Persist the inferred mail owner and each alias as self identities.
    pub fn finalize_mail(&mut self, store: &IngestionStore) -> rusqlite::Result<Option<MailOwner>> {
        let Some(owner) = self.resolve_mail_owner() else {
            return Ok(None);
        };
        let metadata = json!({ "count": owner.count, "names": owner.names });
        store.upsert_identity(
            Platform::GoogleMail,
            IdKind::Email,
            &owner.address,
            true,
            Some(&metadata),
        )?;
        for name in &owner.names {
            store.upsert_identity(Platform::GoogleMail, IdKind::Name, name, true, None)?;
        }
        self.discovered.insert(Platform::GoogleMail);
        self.names.insert(Platform::GoogleMail, owner.address.clone());
        Ok(Some(owner))
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "unreadable profile file");
            None
        }
    }
}

fn first_json_field(
    workspace: &Path,
    variants: &[&str],
    pick: impl Fn(&Value) -> Option<&Value>,
) -> Option<String> {
    variants
        .iter()
        .map(|rel| workspace.join(rel))
        .filter(|path| path.is_file())
        .find_map(|path| {
            let doc = read_json(&path)?;
            let raw = pick(&doc)?.as_str()?.trim().to_string();
            (!raw.is_empty()).then(|| repair_mojibake(&raw))
        })
}

fn chat_owner(workspace: &Path) -> Option<String> {
    for root in CHAT_USER_ROOTS {
        let users = workspace.join(root);
        let Ok(entries) = fs::read_dir(&users) else {
            continue;
        };
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path().join("user_info.json"))
            .filter(|path| path.is_file())
            .collect();
        candidates.sort();
        for path in candidates {
            let name = read_json(&path)
                .and_then(|doc| doc.pointer("/user/name")?.as_str().map(str::to_string));
            if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
                return Some(name.trim().to_string());
            }
        }
    }
    None
}

fn voice_number(workspace: &Path) -> Option<String> {
    VOICE_PHONES
        .iter()
        .map(|rel| workspace.join(rel))
        .find_map(|path| {
            let raw = fs::read_to_string(&path).ok()?;
            raw.lines()
                .filter(|line| line.to_ascii_uppercase().starts_with("TEL"))
                .find_map(|line| line.split_once(':').map(|(_, v)| v.trim().to_string()))
                .filter(|v| !v.is_empty())
        })
}
