//! Filesystem moves made during a run and the compensating rollback.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".zip"];

/// Where an archive went after extraction. `relocated == None` means it was
/// deleted and cannot be restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMove {
    pub original: PathBuf,
    pub relocated: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    pub restored: Vec<PathBuf>,
    pub unrecoverable: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub moved: usize,
    pub duplicates: usize,
    pub conflicts: Vec<PathBuf>,
}

pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    match fs::rename(from, to) {
        Ok(_) => Ok(()),
        Err(rename_err)
            if matches!(
                rename_err.kind(),
                ErrorKind::CrossesDevices | ErrorKind::PermissionDenied
            ) =>
        {
            fs::copy(from, to).with_context(|| {
                format!("failed to copy {} to {}", from.display(), to.display())
            })?;
            fs::remove_file(from).with_context(|| format!("failed to remove {}", from.display()))
        }
        Err(rename_err) => Err(rename_err)
            .with_context(|| format!("failed to move {} to {}", from.display(), to.display())),
    }
}

pub fn file_hash(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

fn split_archive_name(name: &str) -> (&str, &str) {
    let lower = name.to_ascii_lowercase();
    for suffix in ARCHIVE_SUFFIXES {
        if lower.ends_with(suffix) && name.len() > suffix.len() {
            let cut = name.len() - suffix.len();
            return (&name[..cut], &name[cut..]);
        }
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    }
}

/// Target inside the processed directory; an occupied name gets a
/// millisecond stamp before its extension.
pub fn processed_destination(processed_dir: &Path, archive: &Path, stamp_ms: u128) -> PathBuf {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let direct = processed_dir.join(&name);
    if !direct.exists() {
        return direct;
    }
    let (stem, ext) = split_archive_name(&name);
    processed_dir.join(format!("{stem}_{stamp_ms}{ext}"))
}

/// Recursively move `src` into `dst`. Identical files already present drop
/// the source copy; differing ones stay in `src` and are reported.
pub fn merge_dirs(src: &Path, dst: &Path, report: &mut MergeReport) -> Result<()> {
    if dst.exists() && !dst.is_dir() {
        report.conflicts.push(src.to_path_buf());
        return Ok(());
    }
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;

    let entries =
        fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read {}", src.display()))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            merge_dirs(&from, &to, report)?;
            continue;
        }
        if !to.exists() {
            move_file(&from, &to)?;
            report.moved += 1;
        } else if to.is_file() && file_hash(&from)? == file_hash(&to)? {
            fs::remove_file(&from)
                .with_context(|| format!("failed to remove {}", from.display()))?;
            report.duplicates += 1;
        } else {
            tracing::warn!(
                staged = %from.display(),
                existing = %to.display(),
                "merge conflict; keeping existing file"
            );
            report.conflicts.push(from);
        }
    }

    // Non-empty means conflicts remain in staging.
    let _ = fs::remove_dir(src);
    Ok(())
}

/// Undo relocations newest first. Deleted archives are reported, not fatal.
pub fn rollback(moves: &[ArchiveMove]) -> RollbackReport {
    let mut report = RollbackReport::default();
    for record in moves.iter().rev() {
        let Some(relocated) = &record.relocated else {
            report.unrecoverable.push(record.original.clone());
            continue;
        };
        if !relocated.exists() {
            report.unrecoverable.push(record.original.clone());
            continue;
        }
        match move_file(relocated, &record.original) {
            Ok(()) => report.restored.push(record.original.clone()),
            Err(err) => report
                .failed
                .push((record.original.clone(), format!("{err:#}"))),
        }
    }
    report
}
