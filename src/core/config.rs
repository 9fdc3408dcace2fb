//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{HdError, Result};
use crate::scanner::classifier::Rule;

/// Full hdelete configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub scanner: ScannerConfig,
    pub rules: RulesConfig,
    pub executor: ExecutorConfig,
    pub paths: PathsConfig,
}

/// Walker behavior and safety constraints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScannerConfig {
    pub follow_links: bool,
    /// Maximum depth below the root; `None` walks the whole tree.
    pub max_depth: Option<usize>,
    pub cross_devices: bool,
    /// Worker threads for subtree traversal. `1` keeps the walk on the caller's thread.
    pub parallelism: usize,
    pub excluded_paths: Vec<PathBuf>,
    /// Shell-style globs for subtrees that are never entered.
    pub protected_paths: Vec<String>,
    /// Honor `.hdelete-keep` marker files.
    pub keep_markers: bool,
}

/// Classification policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RulesConfig {
    pub enabled: Vec<Rule>,
    /// Known OS-artifact names: exact names or `*`/`?` globs.
    pub name_patterns: Vec<String>,
    pub case_insensitive: bool,
}

/// Deletion behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Remove non-empty candidate directories with their contents.
    pub recursive: bool,
}

/// Filesystem paths used by hdelete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    /// JSONL activity log; disabled when unset.
    pub activity_log: Option<PathBuf>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            follow_links: false,
            max_depth: None,
            cross_devices: false,
            parallelism: 1,
            excluded_paths: Vec::new(),
            protected_paths: default_protected_paths(),
            keep_markers: true,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            enabled: vec![Rule::NamePattern],
            name_patterns: default_name_patterns(),
            case_insensitive: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[HDEL-CONFIG] WARNING: HOME not set, falling back to /tmp for config path"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("hdelete").join("config.toml"),
            activity_log: None,
        }
    }
}

/// Version-control and credential directories that are never entered.
#[must_use]
pub fn default_protected_paths() -> Vec<String> {
    [".git", ".hg", ".svn", ".ssh", ".gnupg"]
        .iter()
        .map(|name| format!("**/{name}"))
        .collect()
}

/// Well-known OS artifact names (thumbnail caches, desktop metadata).
#[must_use]
pub fn default_name_patterns() -> Vec<String> {
    [
        "Thumbs.db",
        "ehthumbs.db",
        "ehthumbs_vista.db",
        "desktop.ini",
        ".DS_Store",
        "._*",
        ".AppleDouble",
        ".LSOverride",
        ".Spotlight-V100",
        ".Trashes",
        ".fseventsd",
        ".TemporaryItems",
        ".directory",
        "Icon\r",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HdError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HdError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for the activity log.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // scanner
        if let Some(raw) = lookup("HDEL_SCANNER_FOLLOW_LINKS") {
            self.scanner.follow_links = parse_env_bool("HDEL_SCANNER_FOLLOW_LINKS", &raw)?;
        }
        if let Some(raw) = lookup("HDEL_SCANNER_MAX_DEPTH") {
            self.scanner.max_depth = Some(parse_env_usize("HDEL_SCANNER_MAX_DEPTH", &raw)?);
        }
        if let Some(raw) = lookup("HDEL_SCANNER_CROSS_DEVICES") {
            self.scanner.cross_devices = parse_env_bool("HDEL_SCANNER_CROSS_DEVICES", &raw)?;
        }
        if let Some(raw) = lookup("HDEL_SCANNER_PARALLELISM") {
            self.scanner.parallelism = parse_env_usize("HDEL_SCANNER_PARALLELISM", &raw)?;
        }

        // rules
        if let Some(raw) = lookup("HDEL_RULES") {
            self.rules.enabled = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<Rule>().map_err(|details| HdError::ConfigParse {
                        context: "env",
                        details: format!("HDEL_RULES={raw:?}: {details}"),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }
        if let Some(raw) = lookup("HDEL_RULES_CASE_INSENSITIVE") {
            self.rules.case_insensitive = parse_env_bool("HDEL_RULES_CASE_INSENSITIVE", &raw)?;
        }

        // executor
        if let Some(raw) = lookup("HDEL_EXECUTOR_RECURSIVE") {
            self.executor.recursive = parse_env_bool("HDEL_EXECUTOR_RECURSIVE", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("HDEL_ACTIVITY_LOG") {
            self.paths.activity_log = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    fn normalize_paths(&mut self) {
        for path in &mut self.scanner.excluded_paths {
            let s = path.to_string_lossy();
            if s.len() > 1
                && let Some(stripped) = s.strip_suffix('/')
            {
                *path = PathBuf::from(stripped);
            }
        }

        let mut seen = Vec::with_capacity(self.rules.enabled.len());
        for rule in &self.rules.enabled {
            if !seen.contains(rule) {
                seen.push(*rule);
            }
        }
        self.rules.enabled = seen;
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.scanner.parallelism == 0 {
            return Err(HdError::InvalidConfig {
                details: "scanner.parallelism must be >= 1".to_string(),
            });
        }
        if self.scanner.max_depth == Some(0) {
            return Err(HdError::InvalidConfig {
                details: "scanner.max_depth must be >= 1 when set".to_string(),
            });
        }

        if self.rules.enabled.contains(&Rule::NamePattern) && self.rules.name_patterns.is_empty()
        {
            return Err(HdError::InvalidConfig {
                details: "rules.name_patterns must not be empty when name-pattern is enabled"
                    .to_string(),
            });
        }

        for pattern in &self.rules.name_patterns {
            if pattern.is_empty() || pattern.contains('/') {
                return Err(HdError::InvalidConfig {
                    details: format!(
                        "rules.name_patterns entry {pattern:?} must be a non-empty file name"
                    ),
                });
            }
            crate::scanner::classifier::validate_name_pattern(pattern)?;
        }

        for pattern in &self.scanner.protected_paths {
            crate::scanner::protection::validate_glob_pattern(pattern)?;
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env_usize(name: &str, raw: &str) -> Result<usize> {
    raw.trim()
        .parse::<usize>()
        .map_err(|error| HdError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    raw.trim()
        .parse::<bool>()
        .map_err(|error| HdError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}
