//! One ingestion run: discover and extract archives, scan, dispatch, and
//! undo archive relocations when the storage phase fails.

use crate::error::HubError;
use crate::hub::archive::{self, ExtractionOutcome, ExtractionRequest};
use crate::hub::audit::{self, AuditStatus};
use crate::hub::config::HubConfig;
use crate::hub::dispatch::{Dispatcher, RunSummary};
use crate::hub::paths::HubPaths;
use crate::hub::platform::{Platform, PlatformFilter};
use crate::hub::progress::{self, ProgressEvent};
use crate::hub::relocation::{self, MergeReport};
use crate::hub::scanner::{self, ScanPlan};
use crate::hub::store::IngestionStore;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub source: Option<PathBuf>,
    pub store_path: PathBuf,
    pub filter: PlatformFilter,
    pub delete_archives: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub archives_found: usize,
    pub archives_processed: usize,
    pub archives_skipped: Vec<(PathBuf, String)>,
    pub detected: BTreeSet<Platform>,
    pub merge: MergeReport,
    pub scan_root: PathBuf,
    pub units_queued: usize,
    pub summary: RunSummary,
}

fn search_dirs(paths: &HubPaths, source: Option<&PathBuf>) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(source) = source.filter(|s| s.is_dir()) {
        dirs.push(source.clone());
    }
    dirs.push(paths.workspace.clone());
    dirs.extend(paths.inbox_dirs.iter().cloned());
    dirs
}

/// Scan `plan.root` and feed every unit through the dispatcher.
pub fn scan_and_dispatch(
    store: &IngestionStore,
    plan: &ScanPlan,
    cfg: &HubConfig,
) -> Result<(usize, RunSummary)> {
    let queue = scanner::build_queue(plan);
    let queued = queue.len();
    progress::emit(ProgressEvent::TotalFiles(queued));
    let summary = Dispatcher::new(store, &plan.root, &cfg.ingest).run(queue)?;
    Ok((queued, summary))
}

pub fn run_ingestion(paths: &HubPaths, cfg: &HubConfig, req: &IngestRequest) -> Result<IngestReport> {
    run_ingestion_with(paths, cfg, req, |store, plan| scan_and_dispatch(store, plan, cfg))
}

/// `run_ingestion` with the scan phase supplied by the caller.
pub fn run_ingestion_with<F>(
    paths: &HubPaths,
    cfg: &HubConfig,
    req: &IngestRequest,
    scan: F,
) -> Result<IngestReport>
where
    F: FnOnce(&IngestionStore, &ScanPlan) -> Result<(usize, RunSummary)>,
{
    if let Some(source) = &req.source {
        if !source.exists() {
            return Err(HubError::WorkspaceMissing(source.clone()).into());
        }
    }
    fs::create_dir_all(&paths.workspace)
        .with_context(|| format!("failed to create {}", paths.workspace.display()))?;

    let explicit: Vec<PathBuf> = req
        .source
        .iter()
        .filter(|s| s.is_file() && archive::is_archive(s))
        .cloned()
        .collect();
    let search = search_dirs(paths, req.source.as_ref());
    let archives = archive::discover_archives(&search, &explicit);
    progress::emit(ProgressEvent::TotalArchives(archives.len()));

    let mut report = IngestReport {
        archives_found: archives.len(),
        ..IngestReport::default()
    };

    if !archives.is_empty() && !cfg.extraction.skip_space_check {
        if let Err(err) =
            archive::preflight(&archives, &paths.workspace, cfg.extraction.space_multiplier)
        {
            let message = format!("{err:#}");
            progress::emit(ProgressEvent::Error(message.clone()));
            audit::record(paths, "extract", AuditStatus::Failed, &message);
            return Err(err);
        }
    }

    let store = IngestionStore::open(&req.store_path)?;

    let outcome = archive::extract_all(
        &archives,
        &ExtractionRequest {
            destination: paths.workspace.clone(),
            processed_dir: paths.processed_dir.clone(),
            filter: req.filter,
            delete_after: req.delete_archives,
            max_workers: cfg.extraction.max_workers as usize,
            progress_every: cfg.extraction.progress_every as usize,
        },
    );
    if !archives.is_empty() {
        let status = if outcome.skipped.is_empty() && outcome.merge.conflicts.is_empty() {
            AuditStatus::Ok
        } else {
            AuditStatus::Degraded
        };
        audit::record(
            paths,
            "extract",
            status,
            &format!(
                "processed={} skipped={} conflicts={}",
                outcome.processed,
                outcome.skipped.len(),
                outcome.merge.conflicts.len()
            ),
        );
    }
    if let Some(err) = &outcome.consolidation_error {
        let err = anyhow::anyhow!("failed to consolidate extracted trees: {err}");
        return Err(fail_and_roll_back(paths, &outcome, err));
    }

    let plan = ScanPlan {
        root: scan_root(paths, req, &outcome),
        filter: req.filter,
        allow: (outcome.processed > 0).then(|| outcome.detected.clone()),
    };
    tracing::info!(root = %plan.root.display(), "scanning");

    let (units_queued, summary) = match scan(&store, &plan) {
        Ok(result) => result,
        Err(err) => return Err(fail_and_roll_back(paths, &outcome, err)),
    };

    let status = if summary.is_degraded() {
        AuditStatus::Degraded
    } else {
        AuditStatus::Ok
    };
    audit::record(
        paths,
        "scan",
        status,
        &format!(
            "units={} inserted={} skipped={} failed={}",
            summary.units,
            summary.inserted,
            summary.skipped,
            summary.failed.len()
        ),
    );
    audit::record(paths, "run", status, "ingestion finished");

    report.archives_processed = outcome.processed;
    report.archives_skipped = outcome.skipped;
    report.detected = outcome.detected;
    report.merge = outcome.merge;
    report.scan_root = plan.root;
    report.units_queued = units_queued;
    report.summary = summary;
    Ok(report)
}

/// Extracted data goes to the workspace, so a run that extracted anything
/// scans the workspace; otherwise the source directory itself is scanned.
fn scan_root(paths: &HubPaths, req: &IngestRequest, outcome: &ExtractionOutcome) -> PathBuf {
    if outcome.processed > 0 {
        return paths.workspace.clone();
    }
    match &req.source {
        Some(source) if source.is_dir() => source.clone(),
        _ => paths.workspace.clone(),
    }
}

fn fail_and_roll_back(
    paths: &HubPaths,
    outcome: &ExtractionOutcome,
    err: anyhow::Error,
) -> anyhow::Error {
    let message = format!("{err:#}");
    tracing::error!(error = %message, "ingestion failed; rolling back archive moves");
    progress::emit(ProgressEvent::Error(message.clone()));

    let rollback = relocation::rollback(&outcome.moves);
    for (path, reason) in &rollback.failed {
        tracing::warn!(archive = %path.display(), %reason, "archive could not be restored");
    }
    progress::emit(ProgressEvent::Rollback {
        restored: rollback.restored.len(),
        unrecoverable: rollback.unrecoverable.len() + rollback.failed.len(),
    });
    let status = if rollback.failed.is_empty() && rollback.unrecoverable.is_empty() {
        AuditStatus::Ok
    } else {
        AuditStatus::Degraded
    };
    audit::record(
        paths,
        "rollback",
        status,
        &format!(
            "restored={} unrecoverable={} failed={}",
            rollback.restored.len(),
            rollback.unrecoverable.len(),
            rollback.failed.len()
        ),
    );
    audit::record(paths, "run", AuditStatus::Failed, &message);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_zip(path: &Path, members: &[(&str, &str)]) {
        let file = fs::File::create(path).expect("create zip");
        let mut zip = zip::ZipWriter::new(file);
        for (name, body) in members {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .expect("start file");
            zip.write_all(body.as_bytes()).expect("write member");
        }
        zip.finish().expect("finish zip");
    }

    fn hub_paths(root: &Path) -> HubPaths {
        let workspace = root.join("data");
        HubPaths {
            hub_home: root.to_path_buf(),
            store_path: workspace.join("messagehub.db"),
            processed_dir: workspace.join(".processed"),
            logs_dir: root.join("logs"),
            inbox_dirs: vec![root.join("inbox")],
            workspace,
        }
    }

    fn quiet_config() -> HubConfig {
        let mut cfg = HubConfig::default();
        cfg.extraction.skip_space_check = true;
        cfg
    }

    #[test]
    fn scan_failure_restores_relocated_archives_only() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = hub_paths(tmp.path());
        let inbox = tmp.path().join("inbox");
        fs::create_dir_all(&inbox).expect("mkdir");
        let fb = inbox.join("a-facebook.zip");
        let ig = inbox.join("b-instagram.zip");
        write_zip(
            &fb,
            &[("your_facebook_activity/messages/inbox/x/message_1.json", "{}")],
        );
        write_zip(
            &ig,
            &[("your_instagram_activity/messages/inbox/y/message_1.json", "{}")],
        );

        let req = IngestRequest {
            source: None,
            store_path: paths.store_path.clone(),
            filter: PlatformFilter::Only(Platform::Facebook),
            delete_archives: false,
        };
        let err = run_ingestion_with(&paths, &quiet_config(), &req, |_, _| {
            Err(anyhow::anyhow!("store went away"))
        })
        .expect_err("scan failure must fail the run");
        assert!(format!("{err:#}").contains("store went away"));

        assert!(fb.exists(), "relocated archive restored");
        assert!(ig.exists(), "filtered archive untouched");
        assert!(!paths.workspace.join("Instagram").exists());
        assert!(paths.workspace.join("Facebook").is_dir());
        let processed = fs::read_dir(&paths.processed_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(processed, 0);

        let audit = fs::read_to_string(paths.logs_dir.join("audit.log")).expect("audit");
        assert!(audit.contains("\"phase\":\"rollback\""));
        assert!(audit.contains("\"status\":\"failed\""));
    }

    #[test]
    fn extracted_platforms_limit_the_scan() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = hub_paths(tmp.path());
        fs::create_dir_all(tmp.path().join("inbox")).expect("mkdir");
        write_zip(
            &tmp.path().join("inbox/fb.zip"),
            &[("your_facebook_activity/messages/inbox/x/message_1.json", "{}")],
        );
        let req = IngestRequest {
            source: None,
            store_path: paths.store_path.clone(),
            filter: PlatformFilter::All,
            delete_archives: true,
        };
        let mut seen = None;
        let report = run_ingestion_with(&paths, &quiet_config(), &req, |_, plan| {
            seen = Some(plan.clone());
            Ok((0, RunSummary::default()))
        })
        .expect("run");
        let plan = seen.expect("scan invoked");
        assert_eq!(plan.root, paths.workspace);
        assert_eq!(plan.allow, Some(BTreeSet::from([Platform::Facebook])));
        assert_eq!(report.archives_processed, 1);
        assert!(!tmp.path().join("inbox/fb.zip").exists());
    }

    #[test]
    fn missing_source_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let paths = hub_paths(tmp.path());
        let req = IngestRequest {
            source: Some(tmp.path().join("nope")),
            store_path: paths.store_path.clone(),
            filter: PlatformFilter::All,
            delete_archives: false,
        };
        let err = run_ingestion(&paths, &quiet_config(), &req).expect_err("missing source");
        assert!(matches!(
            err.downcast_ref::<HubError>(),
            Some(HubError::WorkspaceMissing(_))
        ));
    }
}
