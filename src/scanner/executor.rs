//! Executor: turns classification results into outcomes, deleting when asked.
//!
//! Every result yields exactly one [`ActionOutcome`]. Before each removal the
//! executor re-checks, in order:
//! 1. cancellation (no new removals once requested)
//! 2. the path still exists (`lstat`), else `vanished`
//! 3. the path's real location lies strictly under the canonical root,
//!    else the run aborts with `PathEscape`
//! 4. the path is not protected, by the registry or by a marker file found on
//!    disk at the path or between it and the root
//! 5. in recursive mode, nothing kept lies below a directory
//!    ([`ProtectionRegistry::subtree_guard`])
//!
//! Per-entry failures are recorded and the batch continues.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

use crate::core::errors::{HdError, Result};
use crate::core::paths::{is_strict_descendant, resolve_entry_location};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::scanner::cancel::CancelToken;
use crate::scanner::classifier::ClassificationResult;
use crate::scanner::protection::{self, ProtectionRegistry, SUBTREE_CHECK_DEPTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    DryRun,
    Delete,
}

impl Mode {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Disposition {
    Deleted,
    Skipped,
    Failed,
}

impl Disposition {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Deleted => "deleted",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    DryRun,
    NotACandidate,
    Vanished,
    Protected,
    Cancelled,
}

impl SkipReason {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::DryRun => "dry-run",
            Self::NotACandidate => "not-a-candidate",
            Self::Vanished => "vanished",
            Self::Protected => "protected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Captured error of a failed removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub code: String,
    pub kind: String,
    pub message: String,
}

impl From<&HdError> for FailureDetail {
    fn from(err: &HdError) -> Self {
        Self {
            code: err.code().to_string(),
            kind: err.kind_label().to_string(),
            message: err.to_string(),
        }
    }
}

/// Final word on one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionOutcome {
    #[serde(flatten)]
    pub result: ClassificationResult,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureDetail>,
}

impl ActionOutcome {
    fn deleted(result: ClassificationResult) -> Self {
        Self {
            result,
            disposition: Disposition::Deleted,
            skip_reason: None,
            error: None,
        }
    }

    fn skipped(result: ClassificationResult, reason: SkipReason) -> Self {
        Self {
            result,
            disposition: Disposition::Skipped,
            skip_reason: Some(reason),
            error: None,
        }
    }

    fn failed(result: ClassificationResult, err: &HdError) -> Self {
        Self {
            result,
            disposition: Disposition::Failed,
            skip_reason: None,
            error: Some(FailureDetail::from(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.result.entry.path
    }

    /// Short reason text for reports: the matched rule for deletions, the
    /// skip reason for skips, the error kind for failures.
    pub fn reason_label(&self) -> &str {
        match self.disposition {
            Disposition::Deleted => self.result.reason.map_or("", |rule| rule.label()),
            Disposition::Skipped => self.skip_reason.map_or("", SkipReason::label),
            Disposition::Failed => self.error.as_ref().map_or("", |e| e.kind.as_str()),
        }
    }
}

/// Outcomes of one `apply` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Execution {
    pub outcomes: Vec<ActionOutcome>,
    /// Cancellation was observed; later results were never looked at.
    pub cancelled: bool,
}

/// Applies one [`Mode`] to classification results under one root.
#[derive(Debug)]
pub struct Executor {
    mode: Mode,
    recursive: bool,
    canonical_root: PathBuf,
    protection: Arc<RwLock<ProtectionRegistry>>,
    cancel: CancelToken,
    logger: Option<ActivityLoggerHandle>,
}

impl Executor {
    /// `canonical_root` must already be resolved (`fs::canonicalize`).
    pub fn new(
        mode: Mode,
        canonical_root: PathBuf,
        protection: Arc<RwLock<ProtectionRegistry>>,
    ) -> Self {
        Self {
            mode,
            recursive: false,
            canonical_root,
            protection,
            cancel: CancelToken::new(),
            logger: None,
        }
    }

    /// Remove non-empty candidate directories with their contents.
    #[must_use]
    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
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

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Apply the mode to every result until cancellation is observed.
    ///
    /// Only `PathEscape` is returned as an error; it aborts the batch.
    pub fn apply<I>(&self, results: I) -> Result<Execution>
    where
        I: IntoIterator<Item = ClassificationResult>,
    {
        let mut execution = Execution::default();
        for result in results {
            execution.outcomes.push(self.apply_one(result)?);
            if self.cancel.is_cancelled() {
                execution.cancelled = true;
                break;
            }
        }
        Ok(execution)
    }

    /// Decide and, in delete mode, act on a single result.
    pub fn apply_one(&self, result: ClassificationResult) -> Result<ActionOutcome> {
        if !result.is_candidate() {
            return Ok(ActionOutcome::skipped(result, SkipReason::NotACandidate));
        }
        if self.mode == Mode::DryRun {
            return Ok(ActionOutcome::skipped(result, SkipReason::DryRun));
        }
        if self.cancel.is_cancelled() {
            return Ok(ActionOutcome::skipped(result, SkipReason::Cancelled));
        }

        let path = result.entry.path.clone();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(ActionOutcome::skipped(result, SkipReason::Vanished));
            }
            Err(err) => return Ok(self.record_failure(result, &HdError::from_io(&path, err))),
        };

        self.ensure_contained(&path)?;

        if self.protection.read().is_protected(&path)
            || protection::marker_on_disk(&path, result.entry.depth).is_some()
        {
            return Ok(ActionOutcome::skipped(result, SkipReason::Protected));
        }
        if self.recursive && meta.is_dir() {
            let guard = self
                .protection
                .write()
                .subtree_guard(&path, SUBTREE_CHECK_DEPTH);
            if let Some(rule) = guard {
                self.log(ActivityEvent::BranchSkipped {
                    path,
                    cause: "protected".to_string(),
                    detail: rule.to_string(),
                });
                return Ok(ActionOutcome::skipped(result, SkipReason::Protected));
            }
        }

        let started = Instant::now();
        match self.remove(&path, meta.is_dir()) {
            Ok(()) => {
                self.log(ActivityEvent::EntryDeleted {
                    path,
                    reason: result.reason.map(|r| r.to_string()).unwrap_or_default(),
                    size_bytes: result.entry.size_bytes,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
                Ok(ActionOutcome::deleted(result))
            }
            Err(err) => Ok(self.record_failure(result, &err)),
        }
    }

    /// Re-verify at deletion time that `path` resolves strictly inside the root.
    fn ensure_contained(&self, path: &Path) -> Result<()> {
        let location = resolve_entry_location(path);
        if is_strict_descendant(&location, &self.canonical_root) {
            Ok(())
        } else {
            self.log(ActivityEvent::Error {
                code: "HDEL-2900".to_string(),
                message: format!(
                    "{} resolves to {} outside {}",
                    path.display(),
                    location.display(),
                    self.canonical_root.display()
                ),
            });
            Err(HdError::PathEscape {
                path: location,
                root: self.canonical_root.clone(),
            })
        }
    }

    fn remove(&self, path: &Path, is_dir: bool) -> Result<()> {
        let removed = if is_dir {
            if self.recursive {
                fs::remove_dir_all(path)
            } else {
                fs::remove_dir(path)
            }
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|err| HdError::from_io(path, err))?;

        match fs::symlink_metadata(path) {
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            _ => Err(HdError::Runtime {
                details: format!("path still exists after deletion: {}", path.display()),
            }),
        }
    }

    fn record_failure(&self, result: ClassificationResult, err: &HdError) -> ActionOutcome {
        self.log(ActivityEvent::EntryFailed {
            path: result.entry.path.clone(),
            error_code: err.code().to_string(),
            error_message: err.to_string(),
        });
        ActionOutcome::failed(result, err)
    }

    fn log(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}
