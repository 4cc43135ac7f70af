//! Sequential parse-and-store loop over the scanned work queue.

use crate::hub::config::IngestConfig;
use crate::hub::identity::IdentityRegistry;
use crate::hub::platform::Platform;
use crate::hub::progress::{self, ProgressEvent};
use crate::hub::scanner::{UnitKind, WorkUnit};
use crate::hub::store::IngestionStore;
use crate::parsers::{self, ParseContext, PlatformParser};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::path::{Path, PathBuf};

pub type ParserResolver = fn(Platform, UnitKind) -> &'static dyn PlatformParser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Ingested { inserted: u64, skipped: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub units: usize,
    pub inserted: u64,
    pub skipped: u64,
    pub failed: Vec<(PathBuf, String)>,
    pub skipped_units: Vec<(PathBuf, String)>,
    /// Ingested-unit count at each mid-run batch commit.
    pub commits: Vec<usize>,
    /// Self identity per platform as known at the end of the run.
    pub identities: BTreeMap<Platform, String>,
}

impl RunSummary {
    pub fn record(&mut self, unit: &Path, outcome: UnitOutcome) {
        match outcome {
            UnitOutcome::Ingested { inserted, skipped } => {
                self.units += 1;
                self.inserted += inserted;
                self.skipped += skipped;
            }
            UnitOutcome::Skipped { reason } => {
                self.skipped_units.push((unit.to_path_buf(), reason));
            }
            UnitOutcome::Failed { reason } => self.failed.push((unit.to_path_buf(), reason)),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.failed.is_empty()
    }
}

/// Owns the run context for one scan: the store handle, the identity
/// registry and the visited set. Nothing here is shared across threads.
pub struct Dispatcher<'a> {
    store: &'a IngestionStore,
    root: PathBuf,
    identities: IdentityRegistry,
    commit_every: usize,
    snippet_max_chars: usize,
    resolver: ParserResolver,
}

impl<'a> Dispatcher<'a> {
    pub fn new(store: &'a IngestionStore, root: &Path, cfg: &IngestConfig) -> Self {
        Self {
            store,
            root: root.to_path_buf(),
            identities: IdentityRegistry::new(),
            commit_every: cfg.commit_every.max(1) as usize,
            snippet_max_chars: cfg.snippet_max_chars as usize,
            resolver: parsers::parser_for,
        }
    }

    pub fn with_resolver(mut self, resolver: ParserResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Drain the queue. Only store failures abort; every other unit error
    /// is recorded in the summary and the loop moves on.
    pub fn run(&mut self, mut queue: BinaryHeap<WorkUnit>) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
        self.store.begin().context("failed to open ingest transaction")?;

        while let Some(unit) = queue.pop() {
            if !visited.insert(unit.path.clone()) {
                tracing::debug!(unit = %unit.path.display(), "already visited");
                continue;
            }
            self.discover_identity(unit.platform)?;
            let outcome = self.process(&unit)?;
            let ingested = matches!(outcome, UnitOutcome::Ingested { .. });
            summary.record(&unit.path, outcome);

            if ingested && summary.units % self.commit_every == 0 {
                self.store
                    .commit_batch()
                    .context("failed to commit ingest batch")?;
                tracing::info!(units = summary.units, "batch committed");
                summary.commits.push(summary.units);
                progress::emit(ProgressEvent::Committed {
                    units: summary.units,
                    inserted: summary.inserted,
                    skipped: summary.skipped,
                });
            }
        }

        let owner = self
            .identities
            .finalize_mail(self.store)
            .context("failed to store mail identity")?;
        if let Some(owner) = owner {
            progress::emit(ProgressEvent::Identity {
                platform: Platform::GoogleMail,
                value: owner.address,
            });
        }
        for platform in Platform::ALL {
            if let Some(name) = self.identities.name_for(platform) {
                summary.identities.insert(platform, name.to_string());
            }
        }
        self.store.finish().context("failed to commit final batch")?;
        progress::emit(ProgressEvent::Done {
            units: summary.units,
            inserted: summary.inserted,
            skipped: summary.skipped,
            failed: summary.failed.len(),
        });
        Ok(summary)
    }

    fn discover_identity(&mut self, platform: Platform) -> Result<()> {
        if self.identities.is_discovered(platform) {
            return Ok(());
        }
        let found = self
            .identities
            .discover_and_store(platform, &self.root, self.store)
            .with_context(|| format!("failed to store {} identity", platform.as_str()))?;
        if let Some(name) = found {
            tracing::info!(platform = platform.as_str(), %name, "identity discovered");
            progress::emit(ProgressEvent::Identity {
                platform,
                value: name,
            });
        }
        Ok(())
    }

    fn process(&mut self, unit: &WorkUnit) -> Result<UnitOutcome> {
        let relative = unit.path.strip_prefix(&self.root).unwrap_or(&unit.path);
        progress::emit(ProgressEvent::Ingesting {
            platform: unit.platform,
            unit: relative.display().to_string(),
        });
        if unit.kind == UnitKind::Profile {
            return Ok(UnitOutcome::Skipped {
                reason: "identity marker only".to_string(),
            });
        }

        let parser = (self.resolver)(unit.platform, unit.kind);
        let mut ctx = ParseContext {
            store: self.store,
            identities: &mut self.identities,
            root: &self.root,
            snippet_max_chars: self.snippet_max_chars,
        };
        match parser.parse(&mut ctx, &unit.path) {
            Ok(counts) => Ok(UnitOutcome::Ingested {
                inserted: counts.inserted,
                skipped: counts.skipped,
            }),
            Err(err) if err.is_fatal() => Err(err)
                .with_context(|| format!("failed to ingest {}", unit.path.display())),
            Err(err) => {
                tracing::warn!(unit = %unit.path.display(), error = %err, "unit failed");
                Ok(UnitOutcome::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseError;
    use crate::hub::records::{LatestActivity, MessageRecord, ThreadRecord};
    use crate::parsers::UnitCounts;

    struct OneMessage;

    impl PlatformParser for OneMessage {
        fn parse(&self, ctx: &mut ParseContext<'_>, unit: &Path) -> Result<UnitCounts, ParseError> {
            let id = parsers::dir_name(unit);
            if id == "broken" {
                return Err(ParseError::malformed(unit, "bad json"));
            }
            ctx.store_thread(
                &ThreadRecord::new(&id, Platform::Facebook, &id, vec!["A".to_string()]),
                "message",
            )?;
            let mut counts = UnitCounts::default();
            let mut latest = LatestActivity::default();
            let msg = MessageRecord::new(&id, "A", 1, Some("hi".to_string()));
            ctx.store_message(&msg, &mut counts, &mut latest)?;
            ctx.finish_thread(&id, &latest)?;
            Ok(counts)
        }
    }

    static ONE: OneMessage = OneMessage;

    fn resolve(_: Platform, _: UnitKind) -> &'static dyn PlatformParser {
        &ONE
    }

    fn cfg(commit_every: u64) -> IngestConfig {
        IngestConfig {
            commit_every,
            ..IngestConfig::default()
        }
    }

    fn queue(root: &Path, dirs: &[(&str, UnitKind)]) -> BinaryHeap<WorkUnit> {
        dirs.iter()
            .map(|(d, kind)| WorkUnit::new(Platform::Facebook, *kind, root.join(d)))
            .collect()
    }

    #[test]
    fn failed_units_are_counted_and_the_loop_continues() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = IngestionStore::open_in_memory().expect("store");
        let mut dispatcher = Dispatcher::new(&store, tmp.path(), &cfg(2)).with_resolver(resolve);
        let summary = dispatcher
            .run(queue(
                tmp.path(),
                &[
                    ("a", UnitKind::Thread),
                    ("broken", UnitKind::Thread),
                    ("c", UnitKind::Thread),
                    ("c", UnitKind::Profile),
                ],
            ))
            .expect("run");
        assert_eq!(summary.units, 2);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.failed.len(), 1);
        // The profile marker shares its directory with a thread unit.
        assert!(summary.skipped_units.is_empty());
        assert!(store.conn().is_autocommit());
    }

    #[test]
    fn batches_commit_after_every_n_ingested_units() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = IngestionStore::open_in_memory().expect("store");
        let mut dispatcher = Dispatcher::new(&store, tmp.path(), &cfg(2)).with_resolver(resolve);
        let summary = dispatcher
            .run(queue(
                tmp.path(),
                &[
                    ("a", UnitKind::Thread),
                    ("b", UnitKind::Thread),
                    ("broken", UnitKind::Thread),
                    ("c", UnitKind::Thread),
                    ("d", UnitKind::Thread),
                    ("e", UnitKind::Thread),
                ],
            ))
            .expect("run");
        assert_eq!(summary.units, 5);
        // The failed unit does not advance the batch counter.
        assert_eq!(summary.commits, vec![2, 4]);
        assert_eq!(store.counts().expect("counts").messages, 5);
        assert!(store.conn().is_autocommit());
    }

    #[test]
    fn rerun_skips_everything() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = IngestionStore::open_in_memory().expect("store");
        let units = [("a", UnitKind::Thread), ("b", UnitKind::Thread)];
        let first = Dispatcher::new(&store, tmp.path(), &cfg(10))
            .with_resolver(resolve)
            .run(queue(tmp.path(), &units))
            .expect("first");
        let second = Dispatcher::new(&store, tmp.path(), &cfg(10))
            .with_resolver(resolve)
            .run(queue(tmp.path(), &units))
            .expect("second");
        assert_eq!(first.inserted, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(store.counts().expect("counts").threads, 2);
    }

    #[test]
    fn profile_only_units_trigger_discovery_and_store_nothing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let profile = tmp
            .path()
            .join("Facebook/profile_information/profile_information.json");
        std::fs::create_dir_all(profile.parent().expect("parent")).expect("mkdir");
        std::fs::write(&profile, r#"{"profile_v2":{"name":{"full_name":"Sam Roe"}}}"#)
            .expect("write");

        let store = IngestionStore::open_in_memory().expect("store");
        let mut dispatcher = Dispatcher::new(&store, tmp.path(), &cfg(10)).with_resolver(resolve);
        let summary = dispatcher
            .run(queue(tmp.path(), &[("Facebook/profile_information", UnitKind::Profile)]))
            .expect("run");
        assert_eq!(summary.units, 0);
        assert_eq!(summary.skipped_units.len(), 1);
        assert_eq!(
            summary.identities.get(&Platform::Facebook).map(String::as_str),
            Some("Sam Roe")
        );
        assert_eq!(store.counts().expect("counts").identities, 1);
    }
}
