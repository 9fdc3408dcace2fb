//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use hdelete::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{HdError, Result};

// Platform
pub use crate::platform::hidden::{HiddenDetector, detect_hidden_detector};

// Scanner
pub use crate::scanner::cancel::CancelToken;
pub use crate::scanner::classifier::{ClassificationResult, Classifier, Rule, RulePolicy, Verdict};
pub use crate::scanner::executor::{ActionOutcome, Disposition, Executor, Mode, SkipReason};
pub use crate::scanner::pipeline::{Pipeline, RunReport};
pub use crate::scanner::protection::ProtectionRegistry;
pub use crate::scanner::walker::{DirectoryWalker, Entry, EntryKind, WalkerConfig, scan};

// Logger
pub use crate::logger::activity::{ActivityLogger, ActivityLoggerHandle};
