//! Keep rules: `.hdelete-keep` marker files and configured glob patterns.
//!
//! A directory holding a marker is never entered, and nothing below it is ever
//! deleted. Glob patterns (`scanner.protected_paths`) protect any entry whose
//! path, or one of whose ancestors, matches. Markers are registered lazily by
//! the walker as it meets them. The only scan the registry runs itself is the
//! bounded subtree check made before a directory is removed with its contents.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{HdError, Result};

/// Filename that pins a directory and its whole subtree.
pub const MARKER_FILENAME: &str = ".hdelete-keep";

/// Levels below a directory that [`ProtectionRegistry::subtree_guard`] will
/// inspect before giving up and refusing the removal.
pub const SUBTREE_CHECK_DEPTH: usize = 64;

/// Optional JSON body of a marker file. An empty marker is equally valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeepNote {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Why an entry is off-limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum Protection {
    /// A `.hdelete-keep` marker in `dir` (the entry itself or an ancestor).
    Marker { dir: PathBuf },
    /// A configured glob matched the entry, an ancestor, or something below.
    Pattern { glob: String },
    /// `dir` holds a `.git` entry.
    Repository { dir: PathBuf },
    /// The subtree below `dir` could not be checked completely.
    Unverified { dir: PathBuf },
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marker { dir } => write!(f, "{MARKER_FILENAME} in {}", dir.display()),
            Self::Pattern { glob } => write!(f, "pattern {glob}"),
            Self::Repository { dir } => write!(f, "repository at {}", dir.display()),
            Self::Unverified { dir } => write!(f, "unchecked subtree at {}", dir.display()),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledGlob {
    source: String,
    regex: Regex,
}

/// Marker directories seen so far plus the compiled keep globs.
///
/// Marker paths are stored exactly as the walker produced them, so lookups
/// must use walker paths too.
#[derive(Debug, Default)]
pub struct ProtectionRegistry {
    markers: HashSet<PathBuf>,
    globs: Vec<CompiledGlob>,
}

impl ProtectionRegistry {
    /// Compile `patterns` into a registry with no markers yet.
    ///
    /// `*` stays inside one component, `**` spans components, `?` is one
    /// character. Every other character is literal.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let globs = patterns
            .iter()
            .map(|pattern| {
                Ok(CompiledGlob {
                    source: pattern.clone(),
                    regex: glob_to_regex(pattern)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            markers: HashSet::new(),
            globs,
        })
    }

    /// Registry with neither globs nor markers.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_protected(&self, path: &Path) -> bool {
        self.protection_for(path).is_some()
    }

    /// The first rule protecting `path`. Markers win over globs.
    #[must_use]
    pub fn protection_for(&self, path: &Path) -> Option<Protection> {
        if let Some(dir) = self.marker_ancestor(path) {
            return Some(Protection::Marker { dir: dir.clone() });
        }
        self.matching_glob(path).map(|glob| Protection::Pattern {
            glob: glob.source.clone(),
        })
    }

    /// Remember that `dir` holds a marker. Returns `false` if already known.
    pub fn register_marker(&mut self, dir: &Path) -> bool {
        self.markers.insert(dir.to_path_buf())
    }

    #[must_use]
    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.globs.len()
    }

    /// Configured globs, in declaration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.globs.iter().map(|glob| glob.source.as_str())
    }

    /// What would be lost by removing `dir` together with everything below it.
    ///
    /// Registered markers under `dir` are checked first. Then the subtree is
    /// walked (links are not followed, as `remove_dir_all` does not follow
    /// them) looking for marker files, `.git` entries and paths matching a
    /// keep glob. Markers found on the way are registered. A subtree that is
    /// deeper than `max_depth` or cannot be listed is refused as unverified.
    pub fn subtree_guard(&mut self, dir: &Path, max_depth: usize) -> Option<Protection> {
        if let Some(marker) = self.markers.iter().find(|m| m.starts_with(dir)) {
            return Some(Protection::Marker {
                dir: marker.clone(),
            });
        }

        let mut queue: Vec<(PathBuf, usize)> = vec![(dir.to_path_buf(), 0)];
        while let Some((current, depth)) = queue.pop() {
            if has_marker(&current) {
                self.markers.insert(current.clone());
                return Some(Protection::Marker { dir: current });
            }
            let listing = match fs::read_dir(&current) {
                Ok(listing) => listing,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(_) => return Some(Protection::Unverified { dir: current }),
            };
            for child in listing {
                let Ok(child) = child else {
                    return Some(Protection::Unverified { dir: current });
                };
                if child.file_name() == ".git" {
                    return Some(Protection::Repository { dir: current });
                }
                let path = child.path();
                if let Some(glob) = self.exact_glob(&path) {
                    return Some(Protection::Pattern {
                        glob: glob.source.clone(),
                    });
                }
                if child.file_type().is_ok_and(|t| t.is_dir()) {
                    if depth >= max_depth {
                        return Some(Protection::Unverified { dir: path });
                    }
                    queue.push((path, depth + 1));
                }
            }
        }
        None
    }

    fn exact_glob(&self, path: &Path) -> Option<&CompiledGlob> {
        if self.globs.is_empty() {
            return None;
        }
        let candidate = slash_path(path);
        self.globs.iter().find(|glob| glob.regex.is_match(&candidate))
    }

    fn marker_ancestor(&self, path: &Path) -> Option<&PathBuf> {
        if self.markers.is_empty() {
            return None;
        }
        path.ancestors().find_map(|ancestor| self.markers.get(ancestor))
    }

    fn matching_glob(&self, path: &Path) -> Option<&CompiledGlob> {
        if self.globs.is_empty() {
            return None;
        }
        path.ancestors().find_map(|ancestor| {
            let candidate = slash_path(ancestor);
            self.globs.iter().find(|glob| glob.regex.is_match(&candidate))
        })
    }
}

/// Whether `dir` directly contains a marker file.
#[must_use]
pub fn has_marker(dir: &Path) -> bool {
    fs::symlink_metadata(dir.join(MARKER_FILENAME)).is_ok_and(|meta| meta.is_file())
}

/// Nearest directory holding a marker among `path` and its `levels` closest
/// ancestors, read from disk rather than the registry.
#[must_use]
pub fn marker_on_disk(path: &Path, levels: usize) -> Option<PathBuf> {
    path.ancestors()
        .take(levels + 1)
        .find(|dir| has_marker(dir))
        .map(Path::to_path_buf)
}

/// Write a marker into `dir`, with `note` as its JSON body when given.
pub fn create_marker(dir: &Path, note: Option<&KeepNote>) -> Result<PathBuf> {
    let meta = fs::metadata(dir).map_err(|err| HdError::from_io(dir, err))?;
    if !meta.is_dir() {
        return Err(HdError::InvalidRoot {
            path: dir.to_path_buf(),
        });
    }
    let marker = dir.join(MARKER_FILENAME);
    let body = match note {
        Some(note) => serde_json::to_string_pretty(note)?,
        None => String::new(),
    };
    fs::write(&marker, body).map_err(|err| HdError::from_io(&marker, err))?;
    Ok(marker)
}

/// Delete the marker in `dir`. `Ok(false)` when there was none.
pub fn remove_marker(dir: &Path) -> Result<bool> {
    let marker = dir.join(MARKER_FILENAME);
    match fs::remove_file(&marker) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(HdError::from_io(&marker, err)),
    }
}

/// Parse the marker body in `dir`. Empty or malformed bodies read as `None`.
#[must_use]
pub fn read_note(dir: &Path) -> Option<KeepNote> {
    let body = fs::read_to_string(dir.join(MARKER_FILENAME)).ok()?;
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    serde_json::from_str(body).ok()
}

/// Check that `pattern` compiles as a keep glob.
pub fn validate_glob_pattern(pattern: &str) -> Result<()> {
    if pattern.trim().is_empty() {
        return Err(HdError::InvalidConfig {
            details: "protected path pattern must not be empty".to_string(),
        });
    }
    glob_to_regex(pattern).map(|_| ())
}

/// Translate a path glob into an anchored regex over `/`-separated paths.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let chars: Vec<char> = pattern.replace('\\', "/").chars().collect();
    let mut out = String::with_capacity(chars.len() * 2 + 2);
    out.push('^');

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            c => {
                out.push_str(&regex::escape(&c.to_string()));
                i += 1;
            }
        }
    }
    out.push('$');

    Regex::new(&out).map_err(|err| HdError::InvalidConfig {
        details: format!("invalid glob pattern {pattern:?}: {err}"),
    })
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
