//! Rule-based classification of walked entries.
//!
//! Rules are checked in a fixed priority order ([`Rule::PRIORITY`]); the first
//! enabled rule that matches names the reason. Classification only looks at
//! the entry's path and the metadata captured by the walker, never at file
//! contents, so it is a pure function of the [`Entry`].

#![allow(missing_docs)]

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::core::config::RulesConfig;
use crate::core::errors::{HdError, Result};
use crate::platform::hidden::{HiddenDetector, has_dot_prefix};
use crate::scanner::walker::{Entry, EntryKind};

/// One classification rule. Declaration order is priority order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    /// Name begins with `.`.
    Dotfile,
    /// The platform's hidden capability reports the entry as hidden.
    HiddenAttribute,
    /// Name matches a known OS-artifact pattern.
    NamePattern,
    /// Zero-byte regular file.
    SizeZero,
}

impl Rule {
    pub const PRIORITY: [Self; 4] = [
        Self::Dotfile,
        Self::HiddenAttribute,
        Self::NamePattern,
        Self::SizeZero,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Dotfile => "dotfile",
            Self::HiddenAttribute => "hidden-attribute",
            Self::NamePattern => "name-pattern",
            Self::SizeZero => "size-zero",
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Rule {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase().replace('_', "-");
        Self::PRIORITY
            .into_iter()
            .find(|rule| rule.label() == wanted)
            .ok_or_else(|| {
                format!(
                    "unknown rule {raw:?} (expected one of: dotfile, hidden-attribute, \
                     name-pattern, size-zero)"
                )
            })
    }
}

/// Outcome of classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Keep,
    DeleteCandidate,
}

impl Verdict {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::DeleteCandidate => "delete-candidate",
        }
    }
}

/// An entry with its verdict. `reason` is set exactly when the verdict is
/// `DeleteCandidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassificationResult {
    pub entry: Entry,
    pub verdict: Verdict,
    pub reason: Option<Rule>,
}

impl ClassificationResult {
    #[must_use]
    pub fn is_candidate(&self) -> bool {
        self.verdict == Verdict::DeleteCandidate
    }
}

/// Which rules run, and the artifact names the `name-pattern` rule knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePolicy {
    pub enabled: Vec<Rule>,
    pub name_patterns: Vec<String>,
    pub case_insensitive: bool,
}

impl RulePolicy {
    #[must_use]
    pub fn from_config(rules: &RulesConfig) -> Self {
        Self {
            enabled: rules.enabled.clone(),
            name_patterns: rules.name_patterns.clone(),
            case_insensitive: rules.case_insensitive,
        }
    }
}

impl Default for RulePolicy {
    fn default() -> Self {
        Self::from_config(&RulesConfig::default())
    }
}

#[derive(Debug, Clone)]
struct NamePattern {
    source: String,
    regex: Regex,
}

/// Compiled policy plus the platform hidden detector.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Enabled rules, sorted by priority.
    rules: Vec<Rule>,
    names: Vec<NamePattern>,
    detector: Arc<dyn HiddenDetector>,
}

impl Classifier {
    pub fn new(policy: &RulePolicy, detector: Arc<dyn HiddenDetector>) -> Result<Self> {
        let mut rules = policy.enabled.clone();
        rules.sort_unstable();
        rules.dedup();

        let names = if rules.contains(&Rule::NamePattern) {
            policy
                .name_patterns
                .iter()
                .map(|source| {
                    Ok(NamePattern {
                        source: source.clone(),
                        regex: compile_name_pattern(source, policy.case_insensitive)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(Self {
            rules,
            names,
            detector,
        })
    }

    /// Enabled rules in priority order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn classify(&self, entry: Entry) -> ClassificationResult {
        let reason = self.first_match(&entry);
        ClassificationResult {
            verdict: if reason.is_some() {
                Verdict::DeleteCandidate
            } else {
                Verdict::Keep
            },
            reason,
            entry,
        }
    }

    /// The highest-priority enabled rule matching `entry`.
    pub fn first_match(&self, entry: &Entry) -> Option<Rule> {
        self.rules
            .iter()
            .copied()
            .find(|rule| self.matches(*rule, entry))
    }

    /// Which configured name pattern matched, for diagnostics.
    pub fn matching_name_pattern(&self, entry: &Entry) -> Option<&str> {
        let name = entry.file_name()?;
        self.names
            .iter()
            .find(|pattern| pattern.regex.is_match(&name))
            .map(|pattern| pattern.source.as_str())
    }

    fn matches(&self, rule: Rule, entry: &Entry) -> bool {
        match rule {
            Rule::Dotfile => has_dot_prefix(&entry.path),
            Rule::HiddenAttribute => self.detector.is_hidden(entry),
            Rule::NamePattern => self.matching_name_pattern(entry).is_some(),
            Rule::SizeZero => entry.kind == EntryKind::File && entry.size_bytes == 0,
        }
    }
}

/// Check that a name pattern compiles.
pub fn validate_name_pattern(pattern: &str) -> Result<()> {
    compile_name_pattern(pattern, false).map(|_| ())
}

/// `*` and `?` are wildcards over a single file name; everything else is literal.
fn compile_name_pattern(pattern: &str, case_insensitive: bool) -> Result<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');

    RegexBuilder::new(&out)
        .case_insensitive(case_insensitive)
        .build()
        .map_err(|err| HdError::InvalidConfig {
            details: format!("invalid name pattern {pattern:?}: {err}"),
        })
}
