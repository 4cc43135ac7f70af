//! Discovery, classification and concurrent extraction of export bundles.
//!
//! Workers share one mutex that guards only destination-directory creation
//! and archive relocation. Member extraction runs unlocked; bundles of
//! different platforms land in disjoint sub-trees, and Google bundles only
//! add files under their own `Takeout/` paths.

use crate::error::HubError;
use crate::hub::platform::{Platform, PlatformFilter};
use crate::hub::progress::{self, ProgressEvent};
use crate::hub::relocation::{self, ArchiveMove, MergeReport};
use crate::hub::util::now_epoch_ms;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;

/// Member-path prefixes identifying what a bundle contains.
const SIGNATURES: &[(&str, Platform)] = &[
    ("Takeout/Voice/", Platform::GoogleVoice),
    ("Takeout/Google Chat/", Platform::GoogleChat),
    ("Takeout/Mail/", Platform::GoogleMail),
    ("your_instagram_activity", Platform::Instagram),
    ("your_facebook_activity", Platform::Facebook),
];

/// Staged Takeout sub-trees and the canonical roots they merge into.
const CONSOLIDATION: &[(&str, &str, Platform)] = &[
    ("Takeout/Voice", "Voice", Platform::GoogleVoice),
    ("Takeout/Google Chat", "Google Chat", Platform::GoogleChat),
    ("Takeout/Mail", "Mail", Platform::GoogleMail),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Zip,
    TarGz,
}

impl ArchiveKind {
    fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

pub fn is_archive(path: &Path) -> bool {
    path.is_file() && ArchiveKind::of(path).is_some()
}

#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub destination: PathBuf,
    pub processed_dir: PathBuf,
    pub filter: PlatformFilter,
    pub delete_after: bool,
    pub max_workers: usize,
    pub progress_every: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionOutcome {
    pub processed: usize,
    pub detected: BTreeSet<Platform>,
    pub moves: Vec<ArchiveMove>,
    pub skipped: Vec<(PathBuf, String)>,
    pub merge: MergeReport,
    /// Set when consolidation failed after archives were relocated, so the
    /// caller can still roll the moves back.
    pub consolidation_error: Option<String>,
}

#[derive(Debug)]
enum ArchiveResult {
    Extracted {
        detected: BTreeSet<Platform>,
        relocation: Option<ArchiveMove>,
    },
    Skipped(String),
}

/// Archives directly inside each search directory plus any explicit ones,
/// de-duplicated by canonical path, in a stable order.
pub fn discover_archives(search_dirs: &[PathBuf], explicit: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let mut consider = |path: PathBuf| {
        if !is_archive(&path) {
            return;
        }
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if seen.insert(key) {
            out.push(path);
        }
    };

    for path in explicit {
        consider(path.clone());
    }
    for dir in search_dirs {
        let Ok(entries) = fs::read_dir(dir) else {
            continue;
        };
        let mut found: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        found.sort();
        for path in found {
            consider(path);
        }
    }
    out
}

pub fn total_size(archives: &[PathBuf]) -> u64 {
    archives
        .iter()
        .filter_map(|p| fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

pub fn required_space(archive_bytes: u64, multiplier: f64) -> u64 {
    (archive_bytes as f64 * multiplier).ceil() as u64
}

pub fn check_space(required: u64, available: u64) -> Result<(), HubError> {
    if available < required {
        return Err(HubError::InsufficientSpace {
            required,
            available,
        });
    }
    Ok(())
}

/// Abort before touching anything when the extraction footprint would not
/// fit. An unanswerable free-space query only warns.
pub fn preflight(archives: &[PathBuf], destination: &Path, multiplier: f64) -> Result<()> {
    let required = required_space(total_size(archives), multiplier);
    let probe = destination
        .ancestors()
        .find(|p| p.exists())
        .unwrap_or(destination);
    match fs2::available_space(probe) {
        Ok(available) => {
            tracing::debug!(required, available, "extraction space preflight");
            check_space(required, available)?;
        }
        Err(err) => {
            tracing::warn!(path = %probe.display(), error = %err, "free space unknown; skipping preflight");
        }
    }
    Ok(())
}

fn normalize_member(name: &str) -> &str {
    name.trim_start_matches("./")
}

pub fn classify_members<'a>(names: impl IntoIterator<Item = &'a str>) -> BTreeSet<Platform> {
    let mut detected = BTreeSet::new();
    for name in names {
        let name = normalize_member(name);
        for (prefix, platform) in SIGNATURES {
            if name.starts_with(prefix) {
                detected.insert(*platform);
            }
        }
    }
    detected
}

/// App exports get a named sub-directory; Facebook wins when both appear.
pub fn destination_for(root: &Path, detected: &BTreeSet<Platform>) -> PathBuf {
    for platform in [Platform::Facebook, Platform::Instagram] {
        if detected.contains(&platform) {
            if let Some(sub) = platform.extraction_subdir() {
                return root.join(sub);
            }
        }
    }
    root.to_path_buf()
}

fn member_names(path: &Path, kind: ArchiveKind) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    match kind {
        ArchiveKind::Zip => {
            let archive = zip::ZipArchive::new(file)
                .with_context(|| format!("failed to read zip {}", path.display()))?;
            Ok(archive.file_names().map(str::to_string).collect())
        }
        ArchiveKind::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(file));
            let mut names = Vec::new();
            for entry in archive
                .entries()
                .with_context(|| format!("failed to read tar {}", path.display()))?
            {
                let entry = entry.with_context(|| format!("corrupt entry in {}", path.display()))?;
                names.push(entry.path()?.to_string_lossy().into_owned());
            }
            Ok(names)
        }
    }
}

struct MemberProgress<'a> {
    name: &'a str,
    total: usize,
    every: usize,
}

impl MemberProgress<'_> {
    fn tick(&self, done: usize) {
        if done % self.every == 0 || done == self.total {
            progress::emit(ProgressEvent::ArchiveProgress {
                name: self.name.to_string(),
                done,
                total: self.total,
            });
        }
    }
}

/// Best effort: a member that fails to extract is logged and skipped.
fn extract_members(
    path: &Path,
    kind: ArchiveKind,
    dest: &Path,
    progress: &MemberProgress<'_>,
) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut failures = 0usize;
    match kind {
        ArchiveKind::Zip => {
            let mut archive = zip::ZipArchive::new(file)
                .with_context(|| format!("failed to read zip {}", path.display()))?;
            for i in 0..archive.len() {
                if let Err(err) = extract_zip_member(&mut archive, i, dest) {
                    failures += 1;
                    tracing::warn!(archive = progress.name, index = i, error = %err, "failed to extract member");
                }
                progress.tick(i + 1);
            }
        }
        ArchiveKind::TarGz => {
            let mut archive = tar::Archive::new(GzDecoder::new(file));
            let entries = archive
                .entries()
                .with_context(|| format!("failed to read tar {}", path.display()))?;
            for (i, entry) in entries.enumerate() {
                let outcome = entry.and_then(|mut e| e.unpack_in(dest));
                match outcome {
                    Ok(true) => {}
                    Ok(false) => {
                        failures += 1;
                        tracing::warn!(archive = progress.name, index = i, "refused member outside destination");
                    }
                    Err(err) => {
                        failures += 1;
                        tracing::warn!(archive = progress.name, index = i, error = %err, "failed to extract member");
                    }
                }
                progress.tick(i + 1);
            }
        }
    }
    Ok(failures)
}

fn extract_zip_member(
    archive: &mut zip::ZipArchive<File>,
    index: usize,
    dest: &Path,
) -> Result<()> {
    let mut member = archive.by_index(index)?;
    let Some(relative) = member.enclosed_name() else {
        anyhow::bail!("unsafe member path {}", member.name());
    };
    let out = dest.join(relative);
    if member.is_dir() {
        fs::create_dir_all(&out).with_context(|| format!("failed to create {}", out.display()))?;
        return Ok(());
    }
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut target =
        File::create(&out).with_context(|| format!("failed to create {}", out.display()))?;
    io::copy(&mut member, &mut target)
        .with_context(|| format!("failed to write {}", out.display()))?;
    Ok(())
}

fn archive_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn relocate(archive: &Path, req: &ExtractionRequest) -> Result<ArchiveMove> {
    if req.delete_after {
        fs::remove_file(archive)
            .with_context(|| format!("failed to delete {}", archive.display()))?;
        return Ok(ArchiveMove {
            original: archive.to_path_buf(),
            relocated: None,
        });
    }
    fs::create_dir_all(&req.processed_dir)
        .with_context(|| format!("failed to create {}", req.processed_dir.display()))?;
    let target = relocation::processed_destination(&req.processed_dir, archive, now_epoch_ms()?);
    relocation::move_file(archive, &target)?;
    Ok(ArchiveMove {
        original: archive.to_path_buf(),
        relocated: Some(target),
    })
}

fn process_archive(archive: &Path, req: &ExtractionRequest, fs_lock: &Mutex<()>) -> ArchiveResult {
    let label = archive_label(archive);
    let Some(kind) = ArchiveKind::of(archive) else {
        return ArchiveResult::Skipped("unsupported archive type".to_string());
    };

    let names = match member_names(archive, kind) {
        Ok(names) => names,
        Err(err) => return ArchiveResult::Skipped(format!("unreadable archive: {err:#}")),
    };
    let detected = classify_members(names.iter().map(String::as_str));
    if detected.is_empty() {
        return ArchiveResult::Skipped("unknown structure".to_string());
    }
    if !req.filter.admits_any(&detected) {
        return ArchiveResult::Skipped(format!("filter mismatch ({})", req.filter));
    }

    let dest = destination_for(&req.destination, &detected);
    {
        let _guard = fs_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if dest.exists() && !dest.is_dir() {
            return ArchiveResult::Skipped(format!(
                "destination {} is a file",
                dest.display()
            ));
        }
        if let Err(err) = fs::create_dir_all(&dest) {
            return ArchiveResult::Skipped(format!(
                "failed to create {}: {err}",
                dest.display()
            ));
        }
    }

    progress::emit(ProgressEvent::ArchiveStarted {
        name: label.clone(),
        members: names.len(),
    });
    let member_progress = MemberProgress {
        name: &label,
        total: names.len(),
        every: req.progress_every.max(1),
    };
    match extract_members(archive, kind, &dest, &member_progress) {
        Ok(0) => {}
        Ok(failures) => tracing::warn!(archive = %label, failures, "archive partially extracted"),
        Err(err) => return ArchiveResult::Skipped(format!("extraction failed: {err:#}")),
    }
    progress::emit(ProgressEvent::ArchiveExtracted {
        name: label.clone(),
    });

    let relocation = {
        let _guard = fs_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match relocate(archive, req) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!(archive = %label, error = %format!("{err:#}"), "archive left in place");
                None
            }
        }
    };

    ArchiveResult::Extracted {
        detected,
        relocation,
    }
}

/// Merge staged `Takeout/<X>` trees into their canonical roots, one at a
/// time, then drop `Takeout/` if nothing else is left in it.
pub fn consolidate(root: &Path, detected: &BTreeSet<Platform>) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    for (staged, canonical, platform) in CONSOLIDATION {
        let src = root.join(staged);
        if !detected.contains(platform) || !src.is_dir() {
            continue;
        }
        tracing::info!(from = %src.display(), "consolidating {}", platform.label());
        relocation::merge_dirs(&src, &root.join(canonical), &mut report)?;
    }
    let takeout = root.join("Takeout");
    if takeout.is_dir() && fs::remove_dir(&takeout).is_ok() {
        tracing::info!("removed empty Takeout directory");
    }
    Ok(report)
}

pub fn extract_all(archives: &[PathBuf], req: &ExtractionRequest) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();
    if archives.is_empty() {
        return outcome;
    }

    let width = req.max_workers.max(1).min(archives.len());
    let next = AtomicUsize::new(0);
    let fs_lock = Mutex::new(());
    let results: Mutex<Vec<(usize, ArchiveResult)>> = Mutex::new(Vec::with_capacity(archives.len()));

    thread::scope(|scope| {
        for _ in 0..width {
            scope.spawn(|| loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                let Some(archive) = archives.get(idx) else {
                    break;
                };
                let result = process_archive(archive, req, &fs_lock);
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((idx, result));
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_else(PoisonError::into_inner);
    results.sort_by_key(|(idx, _)| *idx);
    for (idx, result) in results {
        let archive = &archives[idx];
        match result {
            ArchiveResult::Extracted {
                detected,
                relocation,
            } => {
                outcome.processed += 1;
                outcome.detected.extend(detected);
                outcome.moves.extend(relocation);
            }
            ArchiveResult::Skipped(reason) => {
                tracing::warn!(archive = %archive.display(), %reason, "archive skipped");
                progress::emit(ProgressEvent::ArchiveSkipped {
                    name: archive_label(archive),
                    reason: reason.clone(),
                });
                outcome.skipped.push((archive.clone(), reason));
            }
        }
    }

    match consolidate(&req.destination, &outcome.detected) {
        Ok(merge) => outcome.merge = merge,
        Err(err) => outcome.consolidation_error = Some(format!("{err:#}")),
    }
    outcome
}
