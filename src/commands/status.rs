use anyhow::Result;

use crate::commands::CommandReport;
use crate::hub::config::load_config;
use crate::hub::paths::resolve_paths;
use crate::hub::store::IngestionStore;

include!(concat!(env!("OUT_DIR"), "/env_allowlist.rs"));

fn set_variables() -> Vec<&'static str> {
    GENERATED_ENV_ALLOWLIST
        .iter()
        .copied()
        .filter(|key| std::env::var_os(key).is_some())
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("BUILD_ID")));
    report.detail(format!("hub_home={}", paths.hub_home.display()));
    report.detail(format!(
        "workspace={} exists={}",
        paths.workspace.display(),
        paths.workspace.is_dir()
    ));
    report.detail(format!("store={}", paths.store_path.display()));
    report.detail(format!("processed_dir={}", paths.processed_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    for dir in &paths.inbox_dirs {
        report.detail(format!("inbox_dir={}", dir.display()));
    }

    let set = set_variables();
    if !set.is_empty() {
        report.detail(format!("env_set={}", set.join(",")));
    }

    match load_config() {
        Ok(cfg) => {
            report.detail(format!(
                "extraction max_workers={} space_multiplier={} skip_space_check={}",
                cfg.extraction.max_workers,
                cfg.extraction.space_multiplier,
                cfg.extraction.skip_space_check
            ));
            report.detail(format!(
                "ingest commit_every={} snippet_max_chars={}",
                cfg.ingest.commit_every, cfg.ingest.snippet_max_chars
            ));
        }
        Err(err) => report.issue(format!("{err:#}")),
    }

    if paths.store_path.is_file() {
        let counts = IngestionStore::open(&paths.store_path)?.counts()?;
        report.detail(format!(
            "threads={} messages={} labels={} identities={}",
            counts.threads, counts.messages, counts.labels, counts.identities
        ));
    } else {
        report.detail("store not created yet");
    }

    Ok(report)
}
