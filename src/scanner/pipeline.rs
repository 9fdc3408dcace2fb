//! One run: walk -> classify -> execute, single pass, on the calling thread.
//!
//! The [`RunReport`] is built here and handed back; nothing is global. With
//! parallel traversal only the walk fans out; classification and execution
//! stay here so outcomes are never interleaved.
//!
//! In delete mode candidate directories are held back and removed after the
//! walk, deepest first. A directory emptied by the run itself is removed in
//! the same run, and with `recursive` the walk has already been through the
//! subtree (registering any keep markers) before it is removed.
//!
//! [`Pipeline::execute_plan`] deletes exactly the candidates of an earlier
//! dry run, for flows that show a plan before acting on it.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::logger::jsonl::RunCounts;
use crate::platform::hidden::{HiddenDetector, detect_hidden_detector};
use crate::scanner::cancel::CancelToken;
use crate::scanner::classifier::{ClassificationResult, Classifier, RulePolicy};
use crate::scanner::executor::{ActionOutcome, Disposition, Executor, Mode};
use crate::scanner::protection::ProtectionRegistry;
use crate::scanner::walker::{
    DirectoryWalker, EntryKind, RootInfo, SkippedBranch, WalkItem, WalkerConfig,
};

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub root: PathBuf,
    pub mode: Mode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub cancelled: bool,
    pub counts: RunCounts,
    pub outcomes: Vec<ActionOutcome>,
    pub skipped_branches: Vec<SkippedBranch>,
}

impl RunReport {
    fn new(root: PathBuf, mode: Mode) -> Self {
        Self {
            root,
            mode,
            started_at: Utc::now(),
            elapsed_ms: 0,
            cancelled: false,
            counts: RunCounts::default(),
            outcomes: Vec::new(),
            skipped_branches: Vec::new(),
        }
    }

    fn record(&mut self, outcome: ActionOutcome) {
        self.counts.entries += 1;
        if outcome.result.is_candidate() {
            self.counts.candidates += 1;
        }
        match outcome.disposition {
            Disposition::Deleted => {
                self.counts.deleted += 1;
                self.counts.bytes_freed += outcome.result.entry.size_bytes;
            }
            Disposition::Skipped => self.counts.skipped += 1,
            Disposition::Failed => self.counts.failed += 1,
        }
        self.outcomes.push(outcome);
    }

    fn record_branch(&mut self, branch: SkippedBranch) {
        self.counts.skipped_branches += 1;
        self.skipped_branches.push(branch);
    }

    pub fn failures(&self) -> u64 {
        self.counts.failed
    }

    /// No outcome failed.
    pub fn is_clean(&self) -> bool {
        self.counts.failed == 0
    }

    pub fn candidates(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_candidate())
    }
}

/// Configured walk/classify/execute pipeline.
#[derive(Debug)]
pub struct Pipeline {
    config: Config,
    mode: Mode,
    cancel: CancelToken,
    logger: Option<ActivityLoggerHandle>,
    detector: Arc<dyn HiddenDetector>,
}

impl Pipeline {
    pub fn new(config: Config, mode: Mode) -> Self {
        Self {
            config,
            mode,
            cancel: CancelToken::new(),
            logger: None,
            detector: detect_hidden_detector(),
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLoggerHandle>) -> Self {
        self.logger = logger;
        self
    }

    /// Replace the platform hidden detector.
    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn HiddenDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run over `root`. Root problems and `PathEscape` are errors; everything
    /// else ends up in the report.
    pub fn run(&self, root: &Path) -> Result<RunReport> {
        let started = Instant::now();
        let (root_info, listing) = RootInfo::resolve(root)?;

        let classifier = Classifier::new(
            &RulePolicy::from_config(&self.config.rules),
            Arc::clone(&self.detector),
        )?;
        let protection = ProtectionRegistry::new(&self.config.scanner.protected_paths)?;
        let walker = DirectoryWalker::new(
            WalkerConfig::from_scanner_config(&root_info.path, &self.config.scanner),
            protection,
        )
        .with_cancel(self.cancel.clone());
        let executor = self.executor(&root_info, Arc::clone(walker.protection()));

        self.log(ActivityEvent::ScanStarted {
            root: root_info.path.clone(),
            mode: self.mode.to_string(),
            rules: classifier.rules().iter().map(ToString::to_string).collect(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
        });

        let mut report = RunReport::new(root_info.path.clone(), self.mode);
        let mut held_dirs: Vec<ClassificationResult> = Vec::new();
        let hold_dirs = self.mode == Mode::Delete;

        for item in walker.items_from(root_info, listing) {
            match item {
                WalkItem::Skipped(branch) => {
                    self.log(ActivityEvent::BranchSkipped {
                        path: branch.path.clone(),
                        cause: branch.cause.label().to_string(),
                        detail: branch.detail.clone(),
                    });
                    report.record_branch(branch);
                }
                WalkItem::Entry(entry) => {
                    let result = classifier.classify(entry);
                    if hold_dirs
                        && result.is_candidate()
                        && result.entry.kind == EntryKind::Directory
                    {
                        held_dirs.push(result);
                    } else {
                        report.record(executor.apply_one(result)?);
                    }
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }
        }

        for result in deepest_first(held_dirs) {
            report.record(executor.apply_one(result)?);
        }

        Ok(self.finish(report, started))
    }

    /// Delete the candidates listed in `plan`, a dry-run report over the same
    /// root, and nothing else. Every entry is re-checked before removal;
    /// directories go last, deepest first.
    pub fn execute_plan(&self, plan: &RunReport) -> Result<RunReport> {
        let started = Instant::now();
        let root_info = RootInfo::check(&plan.root)?;
        let protection = ProtectionRegistry::new(&self.config.scanner.protected_paths)?;
        let executor = self.executor(&root_info, Arc::new(RwLock::new(protection)));

        self.log(ActivityEvent::ScanStarted {
            root: root_info.path.clone(),
            mode: self.mode.to_string(),
            rules: self
                .config
                .rules
                .enabled
                .iter()
                .map(ToString::to_string)
                .collect(),
            config_hash: self.config.stable_hash().unwrap_or_default(),
        });

        let mut report = RunReport::new(root_info.path, self.mode);
        let (dirs, others): (Vec<_>, Vec<_>) = plan
            .candidates()
            .map(|outcome| outcome.result.clone())
            .partition(|result| result.entry.kind == EntryKind::Directory);

        for result in others.into_iter().chain(deepest_first(dirs)) {
            report.record(executor.apply_one(result)?);
            if self.cancel.is_cancelled() {
                break;
            }
        }

        Ok(self.finish(report, started))
    }

    fn executor(&self, root: &RootInfo, protection: Arc<RwLock<ProtectionRegistry>>) -> Executor {
        Executor::new(self.mode, root.canonical.clone(), protection)
            .with_recursive(self.config.executor.recursive)
            .with_cancel(self.cancel.clone())
            .with_logger(self.logger.clone())
    }

    fn finish(&self, mut report: RunReport, started: Instant) -> RunReport {
        report.cancelled = self.cancel.is_cancelled();
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if report.cancelled {
            self.log(ActivityEvent::Cancelled {
                counts: report.counts,
            });
        }
        self.log(ActivityEvent::ScanCompleted {
            root: report.root.clone(),
            counts: report.counts,
            duration_ms: report.elapsed_ms,
        });
        report
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

fn deepest_first(mut dirs: Vec<ClassificationResult>) -> Vec<ClassificationResult> {
    dirs.sort_by(|a, b| b.entry.depth.cmp(&a.entry.depth));
    dirs
}
