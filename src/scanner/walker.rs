//! Lazy depth-first walker with cycle, device, and protection guards.
//!
//! [`Walk`] is a pre-order iterator: a directory is yielded before anything
//! below it, and it is only opened once the iterator reaches its children.
//! Unreadable subtrees and protected directories come out as
//! [`WalkItem::Skipped`] so the caller can report them; vanished entries,
//! excluded paths, symlink cycles and foreign filesystems are dropped silently.
//!
//! [`DirectoryWalker::stream`] fans the top-level subdirectories out to worker
//! threads. Each worker runs its own [`Walk`] with its own visited set and
//! sends whole items over a bounded channel.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use crossbeam_channel as channel;
use parking_lot::RwLock;
use serde::{Serialize, Serializer};

use crate::core::config::{ScannerConfig, default_protected_paths};
use crate::core::errors::{HdError, Result};
use crate::platform::hidden::hidden_attribute;
use crate::scanner::cancel::CancelToken;
use crate::scanner::protection::{self, ProtectionRegistry};

/// Capacity of the result channel used by [`DirectoryWalker::stream`].
const STREAM_CAPACITY: usize = 1024;

/// Walker configuration derived from `ScannerConfig`.
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub root: PathBuf,
    pub follow_links: bool,
    /// Deepest level yielded; the root's children are depth 1.
    pub max_depth: Option<usize>,
    pub cross_devices: bool,
    pub parallelism: usize,
    pub excluded_paths: HashSet<PathBuf>,
    pub keep_markers: bool,
}

impl WalkerConfig {
    /// Sequential walk of `root` with default guards.
    pub fn new(root: impl Into<PathBuf>, follow_links: bool) -> Self {
        Self {
            root: root.into(),
            follow_links,
            max_depth: None,
            cross_devices: false,
            parallelism: 1,
            excluded_paths: HashSet::new(),
            keep_markers: true,
        }
    }

    pub fn from_scanner_config(root: impl Into<PathBuf>, scanner: &ScannerConfig) -> Self {
        Self {
            root: root.into(),
            follow_links: scanner.follow_links,
            max_depth: scanner.max_depth,
            cross_devices: scanner.cross_devices,
            parallelism: scanner.parallelism.max(1),
            excluded_paths: scanner.excluded_paths.iter().cloned().collect(),
            keep_markers: scanner.keep_markers,
        }
    }

    fn descends_below(&self, depth: usize) -> bool {
        self.max_depth.is_none_or(|max| depth < max)
    }
}

/// What an entry is, as seen by `lstat`. Symlinks are never resolved here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl EntryKind {
    fn of(file_type: fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
            Self::Other => "other",
        }
    }
}

/// A discovered filesystem object. Immutable once yielded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Absolute path, lexically under the walk root.
    pub path: PathBuf,
    pub kind: EntryKind,
    /// Platform hidden bit; `None` where the platform has no such bit.
    pub hidden_attribute: Option<bool>,
    pub size_bytes: u64,
    #[serde(serialize_with = "serialize_system_time")]
    pub modified: SystemTime,
    pub depth: usize,
}

impl Entry {
    /// Build an entry from `lstat` metadata.
    pub fn from_metadata(path: PathBuf, meta: &fs::Metadata, depth: usize) -> Self {
        Self {
            path,
            kind: EntryKind::of(meta.file_type()),
            hidden_attribute: hidden_attribute(meta),
            size_bytes: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            depth,
        }
    }

    /// Final path component, lossily decoded.
    #[must_use]
    pub fn file_name(&self) -> Option<std::borrow::Cow<'_, str>> {
        self.path.file_name().map(|name| name.to_string_lossy())
    }
}

fn serialize_system_time<S: Serializer>(
    time: &SystemTime,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    DateTime::<Utc>::from(*time)
        .to_rfc3339()
        .serialize(serializer)
}

/// Why a subtree was not walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipCause {
    AccessDenied,
    Unreadable,
    Protected,
}

impl SkipCause {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::AccessDenied => "access-denied",
            Self::Unreadable => "unreadable",
            Self::Protected => "protected",
        }
    }
}

/// A subtree left out of the walk. Never classified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedBranch {
    pub path: PathBuf,
    pub cause: SkipCause,
    pub detail: String,
}

impl SkippedBranch {
    fn from_io(path: PathBuf, err: &io::Error) -> Self {
        let cause = if err.kind() == ErrorKind::PermissionDenied {
            SkipCause::AccessDenied
        } else {
            SkipCause::Unreadable
        };
        Self {
            path,
            cause,
            detail: err.to_string(),
        }
    }
}

/// One step of a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkItem {
    Entry(Entry),
    Skipped(SkippedBranch),
}

impl WalkItem {
    #[must_use]
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Skipped(_) => None,
        }
    }
}

/// Resolved facts about the walk root, computed once per traversal.
#[derive(Debug, Clone)]
pub struct RootInfo {
    /// Absolute but not canonicalized; entry paths start with it.
    pub path: PathBuf,
    pub canonical: PathBuf,
    device: Option<u64>,
}

impl RootInfo {
    /// Check the root and resolve it. Errors here are fatal to the run.
    pub fn check(root: &Path) -> Result<Self> {
        let path = std::path::absolute(root).map_err(|err| HdError::from_io(root, err))?;
        let meta = fs::metadata(&path).map_err(|err| HdError::from_io(&path, err))?;
        if !meta.is_dir() {
            return Err(HdError::InvalidRoot { path });
        }
        let canonical = fs::canonicalize(&path).map_err(|err| HdError::from_io(&path, err))?;
        Ok(Self {
            path,
            canonical,
            device: device_id(&meta),
        })
    }

    /// [`RootInfo::check`], then open the root listing the walk starts from.
    pub fn resolve(root: &Path) -> Result<(Self, fs::ReadDir)> {
        let info = Self::check(root)?;
        let listing = fs::read_dir(&info.path).map_err(|err| HdError::from_io(&info.path, err))?;
        Ok((info, listing))
    }
}

#[derive(Debug)]
struct Frame {
    dir: PathBuf,
    depth: usize,
    listing: Option<fs::ReadDir>,
}

/// Lazy pre-order traversal of one tree (or one subtree, for stream workers).
#[derive(Debug)]
pub struct Walk {
    config: Arc<WalkerConfig>,
    root: Arc<RootInfo>,
    protection: Arc<RwLock<ProtectionRegistry>>,
    cancel: CancelToken,
    stack: Vec<Frame>,
    visited: HashSet<PathBuf>,
    /// When set, directories at this depth are collected instead of entered.
    defer_at: Option<usize>,
    deferred: Vec<PathBuf>,
    queued: Option<WalkItem>,
}

impl Walk {
    fn new(
        config: Arc<WalkerConfig>,
        root: Arc<RootInfo>,
        protection: Arc<RwLock<ProtectionRegistry>>,
        cancel: CancelToken,
    ) -> Self {
        let mut visited = HashSet::new();
        if config.follow_links {
            visited.insert(root.canonical.clone());
        }
        Self {
            config,
            root,
            protection,
            cancel,
            stack: Vec::new(),
            visited,
            defer_at: None,
            deferred: Vec::new(),
            queued: None,
        }
    }

    /// Directories at `defer_at` that were held back for workers.
    fn take_deferred(&mut self) -> Vec<PathBuf> {
        std::mem::take(&mut self.deferred)
    }

    fn push_dir(&mut self, dir: PathBuf, depth: usize, listing: Option<fs::ReadDir>) {
        self.stack.push(Frame {
            dir,
            depth,
            listing,
        });
    }

    /// Mark a directory's real location as visited. `false` if it already was.
    fn first_visit(&mut self, path: &Path) -> bool {
        if !self.config.follow_links {
            return true;
        }
        match fs::canonicalize(path) {
            Ok(real) => self.visited.insert(real),
            Err(_) => true,
        }
    }

    fn on_foreign_device(&self, meta: &fs::Metadata) -> bool {
        if self.config.cross_devices {
            return false;
        }
        match (self.root.device, device_id(meta)) {
            (Some(root), Some(dev)) => root != dev,
            _ => false,
        }
    }

    /// Protection check for a directory about to be entered.
    fn guard_dir(&self, path: &Path) -> Option<SkippedBranch> {
        if let Some(rule) = self.protection.read().protection_for(path) {
            return Some(protected(path, rule.to_string()));
        }
        if self.config.keep_markers && protection::has_marker(path) {
            self.protection.write().register_marker(path);
            return Some(protected(
                path,
                format!("{} present", protection::MARKER_FILENAME),
            ));
        }
        None
    }

    fn descend_or_defer(&mut self, path: PathBuf, depth: usize) {
        if !self.config.descends_below(depth) {
            return;
        }
        if self.defer_at == Some(depth) {
            self.deferred.push(path);
        } else {
            self.push_dir(path, depth, None);
        }
    }

    /// Decide what to emit for one child. `None` means drop it silently.
    fn visit(&mut self, path: PathBuf, depth: usize) -> Option<WalkItem> {
        if self.config.excluded_paths.contains(&path) {
            return None;
        }

        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => return None,
            Err(err) => return Some(WalkItem::Skipped(SkippedBranch::from_io(path, &err))),
        };
        let file_type = meta.file_type();

        if file_type.is_dir() {
            if let Some(skip) = self.guard_dir(&path) {
                return Some(WalkItem::Skipped(skip));
            }
            if self.on_foreign_device(&meta) {
                return None;
            }
            let entry = Entry::from_metadata(path.clone(), &meta, depth);
            if self.first_visit(&path) {
                self.descend_or_defer(path, depth);
            }
            return Some(WalkItem::Entry(entry));
        }

        if let Some(rule) = self.protection.read().protection_for(&path) {
            return Some(WalkItem::Skipped(protected(&path, rule.to_string())));
        }

        if file_type.is_symlink() && self.config.follow_links {
            return self.visit_followed_link(path, &meta, depth);
        }

        Some(WalkItem::Entry(Entry::from_metadata(path, &meta, depth)))
    }

    /// A link is always yielded as the link itself. Its target directory is
    /// entered only when it resolves inside the root and has not been seen.
    fn visit_followed_link(
        &mut self,
        path: PathBuf,
        link_meta: &fs::Metadata,
        depth: usize,
    ) -> Option<WalkItem> {
        let entry = Entry::from_metadata(path.clone(), link_meta, depth);
        let Ok(target_meta) = fs::metadata(&path) else {
            return Some(WalkItem::Entry(entry));
        };
        if !target_meta.is_dir() {
            return Some(WalkItem::Entry(entry));
        }
        let Ok(real) = fs::canonicalize(&path) else {
            return Some(WalkItem::Entry(entry));
        };
        if !crate::core::paths::is_within(&real, &self.root.canonical) {
            return Some(WalkItem::Entry(entry));
        }
        if self.visited.contains(&real) {
            return None;
        }
        if let Some(skip) = self.guard_dir(&path) {
            return Some(WalkItem::Skipped(skip));
        }
        if self.on_foreign_device(&target_meta) {
            return Some(WalkItem::Entry(entry));
        }
        self.visited.insert(real);
        self.descend_or_defer(path, depth);
        Some(WalkItem::Entry(entry))
    }
}

impl Iterator for Walk {
    type Item = WalkItem;

    fn next(&mut self) -> Option<WalkItem> {
        if let Some(item) = self.queued.take() {
            return Some(item);
        }
        loop {
            if self.cancel.is_cancelled() {
                self.stack.clear();
                return None;
            }

            let frame = self.stack.last_mut()?;
            if frame.listing.is_none() {
                match fs::read_dir(&frame.dir) {
                    Ok(listing) => frame.listing = Some(listing),
                    Err(err) => {
                        let dir = std::mem::take(&mut frame.dir);
                        self.stack.pop();
                        if err.kind() == ErrorKind::NotFound {
                            continue;
                        }
                        return Some(WalkItem::Skipped(SkippedBranch::from_io(dir, &err)));
                    }
                }
            }

            let depth = frame.depth + 1;
            match frame.listing.as_mut().and_then(Iterator::next) {
                None => {
                    self.stack.pop();
                }
                Some(Err(err)) => {
                    let dir = std::mem::take(&mut frame.dir);
                    self.stack.pop();
                    return Some(WalkItem::Skipped(SkippedBranch::from_io(dir, &err)));
                }
                Some(Ok(child)) => {
                    if let Some(item) = self.visit(child.path(), depth) {
                        return Some(item);
                    }
                }
            }
        }
    }
}

/// Directory walker bound to one root, one protection registry and one
/// cancellation token.
///
/// Safety invariants:
/// - every yielded path lies under the root
/// - symlinks are yielded as links; targets are entered only when following
///   is enabled, the target is inside the root, and it was not seen before
/// - protected and excluded directories are never entered
#[derive(Debug)]
pub struct DirectoryWalker {
    config: Arc<WalkerConfig>,
    protection: Arc<RwLock<ProtectionRegistry>>,
    cancel: CancelToken,
}

impl DirectoryWalker {
    pub fn new(config: WalkerConfig, protection: ProtectionRegistry) -> Self {
        Self {
            config: Arc::new(config),
            protection: Arc::new(RwLock::new(protection)),
            cancel: CancelToken::new(),
        }
    }

    /// Stop producing entries once `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    /// Registry shared with the walk; markers found while walking land here.
    pub fn protection(&self) -> &Arc<RwLock<ProtectionRegistry>> {
        &self.protection
    }

    /// Sequential lazy walk on the caller's thread.
    pub fn walk(&self) -> Result<Walk> {
        let (root, listing) = RootInfo::resolve(&self.config.root)?;
        Ok(self.walk_from(Arc::new(root), listing))
    }

    fn walk_from(&self, root: Arc<RootInfo>, listing: fs::ReadDir) -> Walk {
        let mut walk = Walk::new(
            Arc::clone(&self.config),
            Arc::clone(&root),
            Arc::clone(&self.protection),
            self.cancel.clone(),
        );
        match walk.guard_dir(&root.path) {
            Some(skip) => walk.queued = Some(WalkItem::Skipped(skip)),
            None => walk.push_dir(root.path.clone(), 0, Some(listing)),
        }
        walk
    }

    /// Parallel walk: the top level is listed here, each top-level directory
    /// becomes one worker job.
    ///
    /// With `parallelism == 1` the whole walk runs on one background thread.
    pub fn stream(&self) -> Result<channel::Receiver<WalkItem>> {
        let (root, listing) = RootInfo::resolve(&self.config.root)?;
        Ok(self.stream_from(Arc::new(root), listing))
    }

    fn stream_from(&self, root: Arc<RootInfo>, listing: fs::ReadDir) -> channel::Receiver<WalkItem> {
        let (result_tx, result_rx) = channel::bounded::<WalkItem>(STREAM_CAPACITY);

        let parallelism = self.config.parallelism.max(1);
        let mut top = self.walk_from(Arc::clone(&root), listing);
        if parallelism > 1 {
            top.defer_at = Some(1);
        }
        let config = Arc::clone(&self.config);
        let protection = Arc::clone(&self.protection);
        let cancel = self.cancel.clone();

        thread::spawn(move || {
            for item in top.by_ref() {
                if result_tx.send(item).is_err() {
                    return;
                }
            }
            let jobs = top.take_deferred();
            if jobs.is_empty() {
                return;
            }

            let (job_tx, job_rx) = channel::unbounded::<PathBuf>();
            for job in jobs {
                let _ = job_tx.send(job);
            }
            drop(job_tx);

            let workers: Vec<_> = (0..parallelism)
                .map(|_| {
                    let job_rx = job_rx.clone();
                    let result_tx = result_tx.clone();
                    let config = Arc::clone(&config);
                    let root = Arc::clone(&root);
                    let protection = Arc::clone(&protection);
                    let cancel = cancel.clone();
                    thread::spawn(move || {
                        while let Ok(dir) = job_rx.recv() {
                            let mut walk = Walk::new(
                                Arc::clone(&config),
                                Arc::clone(&root),
                                Arc::clone(&protection),
                                cancel.clone(),
                            );
                            walk.first_visit(&dir);
                            walk.push_dir(dir, 1, None);
                            for item in walk {
                                if result_tx.send(item).is_err() {
                                    return;
                                }
                            }
                        }
                    })
                })
                .collect();
            drop(result_tx);
            for worker in workers {
                if worker.join().is_err() {
                    eprintln!("[HDEL-WALKER] walker worker panicked");
                }
            }
        });

        result_rx
    }

    /// Lazy item source chosen by configured parallelism.
    pub fn items(&self) -> Result<Box<dyn Iterator<Item = WalkItem> + Send>> {
        let (root, listing) = RootInfo::resolve(&self.config.root)?;
        Ok(self.items_from(root, listing))
    }

    /// [`DirectoryWalker::items`] over a root the caller already resolved.
    /// `listing` must be the open listing of `root.path`.
    pub fn items_from(
        &self,
        root: RootInfo,
        listing: fs::ReadDir,
    ) -> Box<dyn Iterator<Item = WalkItem> + Send> {
        let root = Arc::new(root);
        if self.config.parallelism > 1 {
            Box::new(self.stream_from(root, listing).into_iter())
        } else {
            Box::new(self.walk_from(root, listing))
        }
    }
}

/// Lazy sequence of entries under `root`, skipping default protected paths.
///
/// Skipped branches are dropped; use [`DirectoryWalker`] to observe them.
pub fn scan(root: &Path, follow_links: bool) -> Result<impl Iterator<Item = Entry>> {
    let protection = ProtectionRegistry::new(&default_protected_paths())?;
    let walker = DirectoryWalker::new(WalkerConfig::new(root, follow_links), protection);
    Ok(walker.walk()?.filter_map(WalkItem::into_entry))
}

fn protected(path: &Path, detail: String) -> SkippedBranch {
    SkippedBranch {
        path: path.to_path_buf(),
        cause: SkipCause::Protected,
        detail,
    }
}

fn device_id(meta: &fs::Metadata) -> Option<u64> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        Some(meta.dev())
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        None
    }
}
