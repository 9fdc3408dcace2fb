//! Plain-text rendering of a [`RunReport`]: one line per entry with path,
//! verdict, disposition and reason, then skipped branches and a summary.

#![allow(missing_docs)]

use std::io::{self, Write};

use colored::Colorize;

use crate::scanner::executor::{ActionOutcome, Disposition, Mode};
use crate::scanner::pipeline::RunReport;
use crate::scanner::walker::SkippedBranch;

/// Paths longer than this do not widen the path column.
const MAX_PATH_COLUMN: usize = 72;

#[derive(Debug, Clone, Copy)]
pub struct ReportOptions {
    /// Print `keep` entries too. On by default: one line per entry.
    pub show_keep: bool,
    pub color: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            show_keep: true,
            color: false,
        }
    }
}

/// One report line without padding or color.
#[must_use]
pub fn plain_line(outcome: &ActionOutcome) -> String {
    format!(
        "{}\t{}\t{}\t{}",
        outcome.path().display(),
        outcome.result.verdict.label(),
        outcome.disposition.label(),
        outcome.reason_label(),
    )
}

fn styled_line(outcome: &ActionOutcome, path_width: usize, color: bool) -> String {
    let path = format!("{:<path_width$}", outcome.path().display());
    let verdict = format!("{:<16}", outcome.result.verdict.label());
    let disposition = format!("{:<8}", outcome.disposition.label());
    let reason = outcome.reason_label();

    if !color {
        return format!("{path}  {verdict}  {disposition}  {reason}")
            .trim_end()
            .to_string();
    }

    let disposition = match outcome.disposition {
        Disposition::Deleted => disposition.green().bold(),
        Disposition::Skipped if outcome.result.is_candidate() => disposition.yellow(),
        Disposition::Skipped => disposition.dimmed(),
        Disposition::Failed => disposition.red().bold(),
    };
    let reason = if outcome.disposition == Disposition::Failed {
        reason.red()
    } else {
        reason.normal()
    };
    format!("{path}  {verdict}  {disposition}  {reason}")
}

fn branch_line(branch: &SkippedBranch, color: bool) -> String {
    let head = format!("skipped branch ({})", branch.cause.label());
    let head = if color {
        head.yellow().to_string()
    } else {
        head
    };
    format!("{head}: {}  {}", branch.path.display(), branch.detail)
        .trim_end()
        .to_string()
}

/// Human summary line, e.g. `delete: 3 entries, 2 candidates, 2 deleted (6 B), 0 failed`.
#[must_use]
pub fn summary_line(report: &RunReport) -> String {
    let c = &report.counts;
    let mut line = format!(
        "{}: {} entries, {} candidates",
        report.mode, c.entries, c.candidates
    );
    match report.mode {
        Mode::DryRun => line.push_str(&format!(", {} would be deleted", c.candidates)),
        Mode::Delete => line.push_str(&format!(
            ", {} deleted ({})",
            c.deleted,
            format_bytes(c.bytes_freed)
        )),
    }
    line.push_str(&format!(", {} failed", c.failed));
    if c.skipped_branches > 0 {
        line.push_str(&format!(", {} branches skipped", c.skipped_branches));
    }
    if report.cancelled {
        line.push_str(" (cancelled)");
    }
    line
}

/// Write the full human report.
pub fn write_report<W: Write>(out: &mut W, report: &RunReport, opts: ReportOptions) -> io::Result<()> {
    let shown: Vec<&ActionOutcome> = report
        .outcomes
        .iter()
        .filter(|o| opts.show_keep || o.result.is_candidate())
        .collect();
    let path_width = shown
        .iter()
        .map(|o| o.path().display().to_string().chars().count())
        .max()
        .unwrap_or(0)
        .min(MAX_PATH_COLUMN);

    for outcome in shown {
        writeln!(out, "{}", styled_line(outcome, path_width, opts.color))?;
    }
    for branch in &report.skipped_branches {
        writeln!(out, "{}", branch_line(branch, opts.color))?;
    }
    writeln!(out, "{}", summary_line(report))?;
    Ok(())
}

pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    #[allow(clippy::cast_precision_loss)]
    let as_f64 = |n: u64| n as f64;
    if bytes >= GIB {
        format!("{:.1} GB", as_f64(bytes) / as_f64(GIB))
    } else if bytes >= MIB {
        format!("{:.1} MB", as_f64(bytes) / as_f64(MIB))
    } else if bytes >= KIB {
        format!("{:.1} KB", as_f64(bytes) / as_f64(KIB))
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::scanner::classifier::Rule;
    use crate::scanner::pipeline::Pipeline;
    use std::fs;
    use tempfile::TempDir;

    fn scenario(mode: Mode) -> (TempDir, RunReport) {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".hidden_file"), b"").unwrap();
        fs::write(tmp.path().join("visible.txt"), b"hello").unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/Thumbs.db"), b"thumbs").unwrap();

        let mut config = Config::default();
        config.rules.enabled = vec![Rule::Dotfile, Rule::NamePattern];
        config.rules.name_patterns = vec!["Thumbs.db".to_string()];
        let report = Pipeline::new(config, mode).run(tmp.path()).unwrap();
        (tmp, report)
    }

    fn line_for<'a>(report: &'a RunReport, name: &str) -> String {
        let outcome = report
            .outcomes
            .iter()
            .find(|o| o.path().ends_with(name))
            .unwrap();
        plain_line(outcome)
    }

    #[test]
    fn plain_lines_carry_all_four_columns() {
        let (_tmp, report) = scenario(Mode::Delete);
        let hidden = line_for(&report, ".hidden_file");
        let cols: Vec<&str> = hidden.split('\t').collect();
        assert!(cols[0].ends_with(".hidden_file"));
        assert_eq!(&cols[1..], ["delete-candidate", "deleted", "dotfile"]);

        let visible = line_for(&report, "visible.txt");
        assert!(visible.ends_with("\tkeep\tskipped\tnot-a-candidate"));
    }

    #[test]
    fn report_lists_every_entry_by_default() {
        let (_tmp, report) = scenario(Mode::DryRun);
        let mut out = Vec::new();
        write_report(&mut out, &report, ReportOptions::default()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("visible.txt"));
        assert!(text.contains("Thumbs.db"));
        assert_eq!(text.lines().count(), 5);

        let mut out = Vec::new();
        let opts = ReportOptions {
            show_keep: false,
            color: false,
        };
        write_report(&mut out, &report, opts).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("visible.txt"));
        assert!(text.contains("Thumbs.db"));
        assert!(text.contains("dry-run"));
    }

    #[test]
    fn summary_mentions_counts() {
        let (_tmp, report) = scenario(Mode::Delete);
        let summary = summary_line(&report);
        assert_eq!(
            summary,
            "delete: 4 entries, 2 candidates, 2 deleted (6 B), 0 failed"
        );

        let (_tmp, report) = scenario(Mode::DryRun);
        assert!(summary_line(&report).contains("2 would be deleted"));
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }
}
