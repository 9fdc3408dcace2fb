#![forbid(unsafe_code)]

//! hdelete: find and delete hidden operating system files.
//!
//! A run is a single pass through three stages:
//! 1. **Walker**: lazy depth-first traversal below one root, with a cycle
//!    guard and protected subtrees.
//! 2. **Classifier**: per-entry verdict from an ordered rule set (dotfile,
//!    hidden attribute, known OS-artifact names, zero-byte files).
//! 3. **Executor**: dry-run or delete, re-checking root containment before
//!    every removal.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use hdelete::prelude::*;
//!
//! let report = Pipeline::new(Config::default(), Mode::DryRun)
//!     .run(std::path::Path::new("/data/photos"))?;
//! for outcome in report.candidates() {
//!     println!("{}", outcome.path().display());
//! }
//! # Ok::<(), HdError>(())
//! ```

pub mod prelude;

pub mod core;
pub mod logger;
pub mod platform;
pub mod scanner;
