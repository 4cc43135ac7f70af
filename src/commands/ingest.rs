use anyhow::Result;
use std::path::PathBuf;

use crate::commands::CommandReport;
use crate::hub::config::load_config;
use crate::hub::paths::resolve_paths;
use crate::hub::pipeline::{self, IngestReport, IngestRequest};
use crate::hub::platform::PlatformFilter;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub source: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub platform: PlatformFilter,
    pub delete_archives: bool,
}

fn describe(report: &mut CommandReport, run: &IngestReport) {
    report.detail(format!(
        "archives found={} processed={} skipped={}",
        run.archives_found,
        run.archives_processed,
        run.archives_skipped.len()
    ));
    for (archive, reason) in &run.archives_skipped {
        report.detail(format!("archive skipped: {} ({reason})", archive.display()));
    }
    if !run.detected.is_empty() {
        let tags: Vec<&str> = run.detected.iter().map(|p| p.as_str()).collect();
        report.detail(format!("detected platforms: {}", tags.join(",")));
    }
    if run.merge.moved > 0 || run.merge.duplicates > 0 {
        report.detail(format!(
            "consolidated files moved={} duplicates_dropped={}",
            run.merge.moved, run.merge.duplicates
        ));
    }
    for conflict in &run.merge.conflicts {
        report.detail(format!("left in staging (differs): {}", conflict.display()));
    }
    report.detail(format!("scan_root={}", run.scan_root.display()));
    report.detail(format!(
        "units queued={} ingested={} failed={}",
        run.units_queued,
        run.summary.units,
        run.summary.failed.len()
    ));
    report.detail(format!(
        "messages inserted={} skipped={} batches_committed={}",
        run.summary.inserted,
        run.summary.skipped,
        run.summary.commits.len()
    ));
    for (platform, name) in &run.summary.identities {
        report.detail(format!("identity {}={name}", platform.as_str()));
    }
    for (unit, reason) in &run.summary.failed {
        report.detail(format!("unit failed: {} ({reason})", unit.display()));
    }
}

pub fn run(opts: &IngestOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("ingest");

    let req = IngestRequest {
        source: opts.source.clone(),
        store_path: opts.db.clone().unwrap_or_else(|| paths.store_path.clone()),
        filter: opts.platform,
        delete_archives: opts.delete_archives,
    };
    report.detail(format!("store={}", req.store_path.display()));
    report.detail(format!("platform={}", req.filter));

    let run = pipeline::run_ingestion(&paths, &cfg, &req)?;
    describe(&mut report, &run);
    Ok(report)
}
