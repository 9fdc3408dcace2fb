//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::{Value, json};
use thiserror::Error;

use hdelete::core::config::Config;
use hdelete::core::errors::HdError;
use hdelete::logger::activity::ActivityLogger;
use hdelete::logger::jsonl::JsonlConfig;
use hdelete::scanner::cancel::CancelToken;
use hdelete::scanner::classifier::Rule;
use hdelete::scanner::executor::{Disposition, Mode};
use hdelete::scanner::pipeline::{Pipeline, RunReport};
use hdelete::scanner::protection::{self, KeepNote};
use hdelete::scanner::report::{self, ReportOptions};

/// hdelete: find and delete hidden operating system files.
#[derive(Debug, Parser)]
#[command(
    name = "hdelete",
    author,
    version,
    about = "Simple tool for finding and deleting hidden operating system files",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Force JSON output mode.
    #[arg(long, global = true)]
    json: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Increase verbosity.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
    /// Quiet mode (errors only).
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Report hidden-file candidates without deleting anything.
    Scan(ScanArgs),
    /// Delete hidden-file candidates.
    Clean(CleanArgs),
    /// Protect a directory subtree (creates a `.hdelete-keep` marker).
    Keep(KeepArgs),
    /// Remove a `.hdelete-keep` marker.
    Unkeep(UnkeepArgs),
    /// View configuration state.
    Config(ConfigArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Traversal and rule options shared by `scan` and `clean`.
#[derive(Debug, Clone, Args, Default)]
struct FilterArgs {
    /// Enable a classification rule (repeatable); replaces the configured set.
    #[arg(long = "rule", value_name = "RULE")]
    rules: Vec<Rule>,
    /// Known OS-artifact name or `*`/`?` glob (repeatable); replaces the default set.
    #[arg(long = "name-pattern", value_name = "GLOB")]
    name_patterns: Vec<String>,
    /// Follow symbolic links to directories inside the root.
    #[arg(long)]
    follow_links: bool,
    /// Maximum depth below the root.
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,
    /// Worker threads for subtree traversal.
    #[arg(long, value_name = "N")]
    parallelism: Option<usize>,
    /// List only delete candidates; `keep` entries are omitted.
    #[arg(long)]
    candidates_only: bool,
}

#[derive(Debug, Clone, Args)]
struct ScanArgs {
    /// Directory to scan.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Debug, Clone, Args)]
struct CleanArgs {
    /// Directory to clean.
    #[arg(value_name = "ROOT")]
    root: PathBuf,
    /// Report what would be deleted without deleting.
    #[arg(long)]
    dry_run: bool,
    /// Skip the interactive confirmation prompt.
    #[arg(long)]
    yes: bool,
    /// Remove non-empty candidate directories with their contents.
    #[arg(long)]
    recursive: bool,
    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Debug, Clone, Args)]
struct KeepArgs {
    /// Directory to protect.
    #[arg(value_name = "DIR")]
    path: PathBuf,
    /// Note stored in the marker file.
    #[arg(long, value_name = "TEXT")]
    reason: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct UnkeepArgs {
    /// Directory whose marker should be removed.
    #[arg(value_name = "DIR")]
    path: PathBuf,
}

#[derive(Debug, Clone, Args, Default)]
struct ConfigArgs {
    /// Config operation to run.
    #[command(subcommand)]
    command: Option<ConfigCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum ConfigCommand {
    /// Print resolved config file path.
    Path,
    /// Print effective merged configuration.
    Show,
    /// Validate configuration and exit.
    Validate,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid user input at runtime.
    #[error("{0}")]
    User(String),
    /// Environment/runtime failure.
    #[error("{0}")]
    Runtime(String),
    /// Internal bug or invariant violation.
    #[error("{0}")]
    Internal(String),
    /// Operation partially succeeded.
    #[error("{0}")]
    Partial(String),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 1,
            Self::Runtime(_) | Self::Io(_) => 2,
            Self::Internal(_) | Self::Json(_) => 3,
            Self::Partial(_) => 4,
        }
    }
}

impl From<HdError> for CliError {
    fn from(err: HdError) -> Self {
        match err {
            HdError::PathEscape { .. } => Self::Internal(err.to_string()),
            HdError::InvalidConfig { .. }
            | HdError::MissingConfig { .. }
            | HdError::ConfigParse { .. }
            | HdError::InvalidRoot { .. }
            | HdError::NotFound { .. } => Self::User(err.to_string()),
            _ => Self::Runtime(err.to_string()),
        }
    }
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    match &cli.command {
        Command::Scan(args) => run_scan(cli, args),
        Command::Clean(args) => run_clean(cli, args),
        Command::Keep(args) => run_keep(cli, args),
        Command::Unkeep(args) => run_unkeep(cli, args),
        Command::Config(args) => run_config(cli, args),
        Command::Completions(args) => {
            let mut command = Cli::command();
            let binary_name = command.get_name().to_string();
            generate(args.shell, &mut command, binary_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn load_config(cli: &Cli, filter: &FilterArgs) -> Result<Config, CliError> {
    let mut config = Config::load(cli.config.as_deref())?;
    apply_filter_overrides(&mut config, filter);
    config.validate()?;
    Ok(config)
}

/// CLI flags win over file and environment settings.
fn apply_filter_overrides(config: &mut Config, filter: &FilterArgs) {
    if !filter.rules.is_empty() {
        let mut rules = filter.rules.clone();
        rules.sort_unstable();
        rules.dedup();
        config.rules.enabled = rules;
    }
    if !filter.name_patterns.is_empty() {
        config.rules.name_patterns.clone_from(&filter.name_patterns);
    }
    if filter.follow_links {
        config.scanner.follow_links = true;
    }
    if let Some(depth) = filter.max_depth {
        config.scanner.max_depth = Some(depth);
    }
    if let Some(parallelism) = filter.parallelism {
        config.scanner.parallelism = parallelism;
    }
}

fn run_scan(cli: &Cli, args: &ScanArgs) -> Result<(), CliError> {
    let config = load_config(cli, &args.filter)?;
    execute_run(cli, "scan", &args.root, config, Mode::DryRun, !args.filter.candidates_only)
}

fn run_clean(cli: &Cli, args: &CleanArgs) -> Result<(), CliError> {
    let mut config = load_config(cli, &args.filter)?;
    if args.recursive {
        config.executor.recursive = true;
    }

    let show_keep = !args.filter.candidates_only;
    if args.dry_run {
        return execute_run(cli, "clean", &args.root, config, Mode::DryRun, show_keep);
    }

    let interactive = !args.yes
        && output_mode(cli) == OutputMode::Human
        && io::stdin().is_terminal()
        && io::stdout().is_terminal();
    if interactive {
        return match confirm_deletion(cli, &args.root, &config)? {
            Some(plan) => execute_plan(cli, "clean", &plan, config, show_keep),
            None => Ok(()),
        };
    }

    execute_run(cli, "clean", &args.root, config, Mode::Delete, show_keep)
}

/// Preview the candidates with a dry run, then ask. Returns the confirmed
/// preview; only its candidates are deleted afterwards.
fn confirm_deletion(cli: &Cli, root: &Path, config: &Config) -> Result<Option<RunReport>, CliError> {
    let preview = Pipeline::new(config.clone(), Mode::DryRun).run(root)?;
    let candidates: Vec<_> = preview.candidates().collect();
    if candidates.is_empty() {
        if !cli.quiet {
            println!("No hidden-file candidates under {}.", preview.root.display());
        }
        return Ok(None);
    }

    println!("The following entries will be deleted:\n");
    for outcome in &candidates {
        println!(
            "  {}  ({})",
            outcome.path().display(),
            outcome.result.reason.map_or("", Rule::label)
        );
    }
    let bytes: u64 = candidates.iter().map(|o| o.result.entry.size_bytes).sum();
    println!(
        "\nTotal: {} entries, {}",
        candidates.len(),
        report::format_bytes(bytes)
    );
    if config.executor.recursive {
        println!("  Candidate directories are removed with their contents (--recursive).");
    }
    print!("Proceed with deletion? [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .map_err(|e| CliError::Runtime(e.to_string()))?;
    if !matches!(input.trim().to_lowercase().as_str(), "y" | "yes") {
        println!("Aborted; nothing was deleted.");
        return Ok(None);
    }
    Ok(Some(preview))
}

fn execute_run(
    cli: &Cli,
    command: &str,
    root: &Path,
    config: Config,
    mode: Mode,
    show_keep: bool,
) -> Result<(), CliError> {
    run_pipeline(cli, command, root, config, mode, show_keep, |pipeline| {
        pipeline.run(root)
    })
}

/// Delete exactly the candidates of a confirmed preview.
fn execute_plan(
    cli: &Cli,
    command: &str,
    plan: &RunReport,
    config: Config,
    show_keep: bool,
) -> Result<(), CliError> {
    run_pipeline(cli, command, &plan.root, config, Mode::Delete, show_keep, |pipeline| {
        pipeline.execute_plan(plan)
    })
}

fn run_pipeline<F>(
    cli: &Cli,
    command: &str,
    root: &Path,
    config: Config,
    mode: Mode,
    show_keep: bool,
    drive: F,
) -> Result<(), CliError>
where
    F: FnOnce(&Pipeline) -> Result<RunReport, HdError>,
{
    let cancel = CancelToken::new();
    cancel.cancel_on_signals();

    let logger = match &config.paths.activity_log {
        Some(path) => Some(ActivityLogger::spawn(JsonlConfig::new(path))?),
        None => None,
    };

    if cli.verbose {
        eprintln!(
            "[HDEL-RUN] {command} {mode} {} rules={} config_hash={}",
            root.display(),
            config
                .rules
                .enabled
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            config.stable_hash().unwrap_or_default(),
        );
    }

    let pipeline = Pipeline::new(config, mode)
        .with_cancel(cancel)
        .with_logger(logger.as_ref().map(ActivityLogger::handle));
    let result = drive(&pipeline);
    if let Some(logger) = logger {
        logger.finish();
    }
    let report = result?;

    emit_report(cli, command, &report, show_keep)?;
    run_status(&report)
}

fn emit_report(
    cli: &Cli,
    command: &str,
    run_report: &RunReport,
    show_keep: bool,
) -> Result<(), CliError> {
    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                for outcome in &run_report.outcomes {
                    if outcome.disposition == Disposition::Failed {
                        eprintln!("{}", report::plain_line(outcome));
                    }
                }
                return Ok(());
            }
            let opts = ReportOptions {
                show_keep,
                color: !cli.no_color && io::stdout().is_terminal(),
            };
            let mut stdout = io::stdout().lock();
            report::write_report(&mut stdout, run_report, opts)?;
        }
        OutputMode::Json => {
            let payload = json!({
                "command": command,
                "report": serde_json::to_value(run_report)?,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

/// Exit status: clean only when no outcome failed and the run finished.
fn run_status(report: &RunReport) -> Result<(), CliError> {
    if report.failures() > 0 {
        return Err(CliError::Partial(format!(
            "{} of {} entries failed",
            report.failures(),
            report.counts.entries
        )));
    }
    if report.cancelled {
        return Err(CliError::Partial(format!(
            "cancelled after {} entries",
            report.counts.entries
        )));
    }
    Ok(())
}

fn run_keep(cli: &Cli, args: &KeepArgs) -> Result<(), CliError> {
    let note = KeepNote {
        reason: args.reason.clone(),
        created_at: Some(Utc::now().to_rfc3339()),
    };
    let marker = protection::create_marker(&args.path, Some(&note))?;

    match output_mode(cli) {
        OutputMode::Human => {
            if !cli.quiet {
                println!(
                    "{} {} (created {})",
                    "Kept:".green(),
                    args.path.display(),
                    marker.display()
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "keep",
                "path": args.path.to_string_lossy(),
                "marker": marker.to_string_lossy(),
                "reason": args.reason,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_unkeep(cli: &Cli, args: &UnkeepArgs) -> Result<(), CliError> {
    let removed = protection::remove_marker(&args.path)?;

    match output_mode(cli) {
        OutputMode::Human => {
            if cli.quiet {
                return Ok(());
            }
            if removed {
                println!("Unkept: {} (marker removed)", args.path.display());
            } else {
                println!(
                    "No keep marker found at {}",
                    args.path.join(protection::MARKER_FILENAME).display(),
                );
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "command": "unkeep",
                "path": args.path.to_string_lossy(),
                "removed": removed,
            });
            write_json_line(&payload)?;
        }
    }
    Ok(())
}

fn run_config(cli: &Cli, args: &ConfigArgs) -> Result<(), CliError> {
    match &args.command {
        None | Some(ConfigCommand::Path) => {
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            let exists = path.exists();

            match output_mode(cli) {
                OutputMode::Human => {
                    println!("{}", path.display());
                    if !exists {
                        println!("  (file does not exist; defaults will be used)");
                    }
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config path",
                        "path": path.to_string_lossy(),
                        "exists": exists,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Show) => {
            let config = Config::load(cli.config.as_deref())?;

            match output_mode(cli) {
                OutputMode::Human => {
                    let toml_str = toml::to_string_pretty(&config)
                        .map_err(|e| CliError::Runtime(format!("serialize config: {e}")))?;
                    println!("{toml_str}");
                }
                OutputMode::Json => {
                    let payload = json!({
                        "command": "config show",
                        "config": serde_json::to_value(&config)?,
                    });
                    write_json_line(&payload)?;
                }
            }
            Ok(())
        }
        Some(ConfigCommand::Validate) => match Config::load(cli.config.as_deref()) {
            Ok(config) => {
                let hash = config.stable_hash()?;

                match output_mode(cli) {
                    OutputMode::Human => {
                        println!("Configuration is valid.");
                        println!("  Source: {}", config.paths.config_file.display());
                        println!("  Hash: {hash}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": true,
                            "path": config.paths.config_file.to_string_lossy(),
                            "hash": hash,
                        });
                        write_json_line(&payload)?;
                    }
                }
                Ok(())
            }
            Err(e) => {
                match output_mode(cli) {
                    OutputMode::Human => {
                        eprintln!("Configuration is INVALID: {e}");
                    }
                    OutputMode::Json => {
                        let payload = json!({
                            "command": "config validate",
                            "valid": false,
                            "error": e.to_string(),
                            "code": e.code(),
                        });
                        write_json_line(&payload)?;
                    }
                }
                Err(CliError::User(format!("invalid config: {e}")))
            }
        },
    }
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}

fn output_mode(cli: &Cli) -> OutputMode {
    let env_mode = std::env::var("HDEL_OUTPUT_FORMAT").ok();
    resolve_output_mode(cli.json, env_mode.as_deref(), io::stdout().is_terminal())
}

fn resolve_output_mode(json_flag: bool, env_mode: Option<&str>, stdout_is_tty: bool) -> OutputMode {
    if json_flag {
        return OutputMode::Json;
    }

    let fallback = if stdout_is_tty {
        OutputMode::Human
    } else {
        OutputMode::Json
    };

    match env_mode
        .map(str::trim)
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => OutputMode::Json,
        Some("human") => OutputMode::Human,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn verify_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_requires_root() {
        assert!(Cli::try_parse_from(["hdelete", "scan"]).is_err());
        assert!(Cli::try_parse_from(["hdelete", "scan", "/tmp/photos"]).is_ok());
    }

    #[test]
    fn rules_parse_and_repeat() {
        let cli = parse(&[
            "hdelete",
            "scan",
            "/data",
            "--rule",
            "dotfile",
            "--rule",
            "name_pattern",
            "--name-pattern",
            "Thumbs.db",
        ]);
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert_eq!(args.filter.rules, [Rule::Dotfile, Rule::NamePattern]);
        assert_eq!(args.filter.name_patterns, ["Thumbs.db"]);
    }

    #[test]
    fn unknown_rule_is_rejected() {
        assert!(Cli::try_parse_from(["hdelete", "scan", "/data", "--rule", "huge"]).is_err());
    }

    #[test]
    fn clean_flags_parse() {
        let cli = parse(&[
            "hdelete",
            "--json",
            "clean",
            "/data",
            "--yes",
            "--recursive",
            "--parallelism",
            "4",
        ]);
        assert!(cli.json);
        let Command::Clean(args) = cli.command else {
            panic!("expected clean");
        };
        assert!(args.yes && args.recursive && !args.dry_run);
        assert_eq!(args.filter.parallelism, Some(4));
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["hdelete", "-v", "-q", "scan", "/data"]).is_err());
    }

    #[test]
    fn completions_support_bash_zsh_and_fish() {
        for shell in ["bash", "zsh", "fish"] {
            let parsed = Cli::try_parse_from(["hdelete", "completions", shell]);
            assert!(parsed.is_ok(), "failed shell parse for {shell}");
        }
    }

    #[test]
    fn output_mode_resolution_honors_precedence() {
        assert_eq!(
            resolve_output_mode(true, Some("human"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("json"), true),
            OutputMode::Json
        );
        assert_eq!(
            resolve_output_mode(false, Some("human"), false),
            OutputMode::Human
        );
        assert_eq!(
            resolve_output_mode(false, Some("auto"), true),
            OutputMode::Human
        );
        assert_eq!(resolve_output_mode(false, None, false), OutputMode::Json);
    }

    #[test]
    fn filter_flags_override_config() {
        let mut config = Config::default();
        let filter = FilterArgs {
            rules: vec![Rule::SizeZero, Rule::Dotfile, Rule::Dotfile],
            name_patterns: vec!["*.tmp".to_string()],
            follow_links: true,
            max_depth: Some(3),
            parallelism: Some(2),
            candidates_only: false,
        };
        apply_filter_overrides(&mut config, &filter);
        assert_eq!(config.rules.enabled, [Rule::Dotfile, Rule::SizeZero]);
        assert_eq!(config.rules.name_patterns, ["*.tmp"]);
        assert!(config.scanner.follow_links);
        assert_eq!(config.scanner.max_depth, Some(3));
        assert_eq!(config.scanner.parallelism, 2);
    }

    #[test]
    fn empty_filter_keeps_config() {
        let mut config = Config::default();
        apply_filter_overrides(&mut config, &FilterArgs::default());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn error_mapping_follows_exit_code_contract() {
        let escape = CliError::from(HdError::PathEscape {
            path: PathBuf::from("/etc/passwd"),
            root: PathBuf::from("/data"),
        });
        assert_eq!(escape.exit_code(), 3);

        let missing = CliError::from(HdError::NotFound {
            path: PathBuf::from("/nope"),
        });
        assert_eq!(missing.exit_code(), 1);

        let denied = CliError::from(HdError::AccessDenied {
            path: PathBuf::from("/root"),
        });
        assert_eq!(denied.exit_code(), 2);
        assert_eq!(CliError::Partial("1 failed".into()).exit_code(), 4);
    }
}
