//! Hidden-file capability: one trait, per-platform implementations chosen at startup.
//!
//! - Linux and other Unix: the dot-prefix naming convention is the only notion
//!   of "hidden".
//! - macOS: Finder hides both dot-prefixed names and entries carrying the
//!   `UF_HIDDEN` BSD flag.
//! - Windows: the `FILE_ATTRIBUTE_HIDDEN` attribute bit.
//!
//! The walker records the raw attribute bit on each entry via
//! [`hidden_attribute`]; detectors only read entries, never the filesystem.

#![allow(missing_docs)]

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::scanner::walker::Entry;

/// Decides whether an entry is hidden by the platform's own convention.
pub trait HiddenDetector: Send + Sync + fmt::Debug {
    /// Short identifier shown in reports and the activity log.
    fn name(&self) -> &'static str;

    fn is_hidden(&self, entry: &Entry) -> bool;
}

/// POSIX convention: names beginning with `.`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DotPrefixDetector;

impl HiddenDetector for DotPrefixDetector {
    fn name(&self) -> &'static str {
        "dot-prefix"
    }

    fn is_hidden(&self, entry: &Entry) -> bool {
        has_dot_prefix(&entry.path)
    }
}

/// Attribute-bit convention: trusts the flag the walker read from metadata.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeDetector;

impl HiddenDetector for AttributeDetector {
    fn name(&self) -> &'static str {
        "attribute"
    }

    fn is_hidden(&self, entry: &Entry) -> bool {
        entry.hidden_attribute == Some(true)
    }
}

/// macOS: attribute flag or dot prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct FinderDetector;

impl HiddenDetector for FinderDetector {
    fn name(&self) -> &'static str {
        "finder"
    }

    fn is_hidden(&self, entry: &Entry) -> bool {
        entry.hidden_attribute == Some(true) || has_dot_prefix(&entry.path)
    }
}

/// Select the detector for the running platform.
#[must_use]
pub fn detect_hidden_detector() -> Arc<dyn HiddenDetector> {
    #[cfg(windows)]
    {
        Arc::new(AttributeDetector)
    }
    #[cfg(target_os = "macos")]
    {
        Arc::new(FinderDetector)
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        Arc::new(DotPrefixDetector)
    }
}

/// Whether the final path component starts with `.`.
#[must_use]
pub fn has_dot_prefix(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().starts_with('.'))
}

/// Read the platform hidden-attribute bit, or `None` where no such bit exists.
#[must_use]
pub fn hidden_attribute(meta: &fs::Metadata) -> Option<bool> {
    #[cfg(windows)]
    {
        use std::os::windows::fs::MetadataExt;
        const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
        Some(meta.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0)
    }
    #[cfg(target_os = "macos")]
    {
        use std::os::macos::fs::MetadataExt;
        Some(meta.st_flags() & libc::UF_HIDDEN != 0)
    }
    #[cfg(not(any(windows, target_os = "macos")))]
    {
        let _ = meta;
        None
    }
}
