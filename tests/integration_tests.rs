//! Integration tests: CLI smoke tests and full-pipeline scenarios.

mod common;

use std::fs;

use hdelete::core::config::Config;
use hdelete::logger::activity::ActivityLogger;
use hdelete::logger::jsonl::JsonlConfig;
use hdelete::scanner::classifier::Rule;
use hdelete::scanner::executor::{Disposition, Mode, SkipReason};
use hdelete::scanner::pipeline::Pipeline;

const SCENARIO_RULES: [&str; 6] = [
    "--rule",
    "dotfile",
    "--rule",
    "name-pattern",
    "--name-pattern",
    "Thumbs.db",
];

fn scenario_config() -> Config {
    let mut config = Config::default();
    config.rules.enabled = vec![Rule::Dotfile, Rule::NamePattern];
    config.rules.name_patterns = vec!["Thumbs.db".to_string()];
    config
}

fn with_rules<'a>(head: &[&'a str]) -> Vec<&'a str> {
    let mut args = head.to_vec();
    args.extend_from_slice(&SCENARIO_RULES);
    args
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: hdelete [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(result.status.success());
    assert!(result.stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn clean_scenario_deletes_candidates_and_exits_zero() {
    let tmp = common::scenario_tree();
    let root = tmp.path().to_str().unwrap();
    let result = common::run_cli_case(
        "clean_scenario",
        &with_rules(&["--json", "clean", root, "--yes"]),
    );
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());

    let json = result.json();
    assert_eq!(json["command"], "clean");
    let report = &json["report"];
    assert_eq!(report["mode"], "delete");
    assert_eq!(report["counts"]["deleted"], 2);
    assert_eq!(report["counts"]["failed"], 0);

    let outcomes = report["outcomes"].as_array().unwrap();
    let find = |name: &str| {
        outcomes
            .iter()
            .find(|o| o["entry"]["path"].as_str().unwrap().ends_with(name))
            .unwrap()
    };
    assert_eq!(find(".hidden_file")["disposition"], "deleted");
    assert_eq!(find(".hidden_file")["reason"], "dotfile");
    assert_eq!(find("visible.txt")["disposition"], "skipped");
    assert_eq!(find("visible.txt")["skip_reason"], "not-a-candidate");
    assert_eq!(find("Thumbs.db")["reason"], "name-pattern");

    assert!(!tmp.path().join(".hidden_file").exists());
    assert!(tmp.path().join("visible.txt").exists());
    assert!(!tmp.path().join("sub/Thumbs.db").exists());
}

#[test]
fn second_clean_finds_nothing() {
    let tmp = common::scenario_tree();
    let root = tmp.path().to_str().unwrap();
    let args = with_rules(&["--json", "clean", root, "--yes"]);

    let first = common::run_cli_case("second_clean_first", &args);
    assert_eq!(first.code(), Some(0));
    let second = common::run_cli_case("second_clean_second", &args);
    assert_eq!(second.code(), Some(0));
    assert_eq!(second.json()["report"]["counts"]["candidates"], 0);
}

#[test]
fn scan_leaves_tree_identical() {
    let tmp = common::scenario_tree();
    let before = common::snapshot(tmp.path());
    let root = tmp.path().to_str().unwrap();

    let result = common::run_cli_case("scan_is_dry", &with_rules(&["--json", "scan", root]));
    assert_eq!(result.code(), Some(0));
    assert_eq!(result.json()["report"]["counts"]["candidates"], 2);
    assert_eq!(common::snapshot(tmp.path()), before);

    let result = common::run_cli_case(
        "clean_dry_run_is_dry",
        &with_rules(&["--json", "clean", root, "--dry-run"]),
    );
    assert_eq!(result.code(), Some(0));
    assert_eq!(result.json()["report"]["mode"], "dry-run");
    assert_eq!(common::snapshot(tmp.path()), before);
}

#[test]
fn human_report_lists_path_verdict_disposition_reason() {
    let tmp = common::scenario_tree();
    let root = tmp.path().to_str().unwrap();
    let result = common::run_cli_case_with_env(
        "human_report",
        &with_rules(&["--no-color", "scan", root]),
        &[("HDEL_OUTPUT_FORMAT", "human")],
    );
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());

    let hidden = result
        .stdout
        .lines()
        .find(|l| l.contains(".hidden_file"))
        .expect("line for .hidden_file");
    let cols: Vec<&str> = hidden.split_whitespace().collect();
    assert_eq!(&cols[1..], ["delete-candidate", "skipped", "dry-run"]);

    assert!(result.stdout.contains("visible.txt"));
    assert!(
        result
            .stdout
            .lines()
            .last()
            .unwrap()
            .starts_with("dry-run: 4 entries, 2 candidates")
    );
}

#[test]
fn candidates_only_omits_keep_lines() {
    let tmp = common::scenario_tree();
    let root = tmp.path().to_str().unwrap();
    let result = common::run_cli_case_with_env(
        "candidates_only",
        &with_rules(&["--no-color", "scan", root, "--candidates-only"]),
        &[("HDEL_OUTPUT_FORMAT", "human")],
    );
    assert_eq!(result.code(), Some(0), "log: {}", result.log_path.display());
    assert!(result.stdout.contains(".hidden_file"));
    assert!(!result.stdout.contains("visible.txt"));
}

#[test]
fn missing_root_is_a_user_error() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("missing");
    let result = common::run_cli_case("missing_root", &["scan", missing.to_str().unwrap()]);
    assert_eq!(result.code(), Some(1));
    assert!(result.stderr.contains("HDEL-2002"));
}

#[test]
fn file_root_is_a_user_error() {
    let tmp = common::scenario_tree();
    let file = tmp.path().join("visible.txt");
    let result = common::run_cli_case("file_root", &["scan", file.to_str().unwrap()]);
    assert_eq!(result.code(), Some(1));
    assert!(result.stderr.contains("HDEL-1101"));
}

#[test]
fn unknown_rule_is_rejected_by_parser() {
    let tmp = tempfile::tempdir().unwrap();
    let result = common::run_cli_case(
        "unknown_rule",
        &["scan", tmp.path().to_str().unwrap(), "--rule", "huge"],
    );
    assert!(!result.status.success());
}

#[test]
fn keep_marker_protects_subtree_until_removed() {
    let tmp = common::scenario_tree();
    let root = tmp.path().to_str().unwrap();
    let sub = tmp.path().join("sub");

    let keep = common::run_cli_case(
        "keep_marker",
        &["--json", "keep", sub.to_str().unwrap(), "--reason", "photos"],
    );
    assert_eq!(keep.code(), Some(0), "log: {}", keep.log_path.display());
    assert!(sub.join(".hdelete-keep").is_file());

    let clean = common::run_cli_case(
        "keep_marker_clean",
        &["--json", "clean", root, "--yes", "--rule", "name-pattern"],
    );
    assert_eq!(clean.code(), Some(0));
    assert_eq!(clean.json()["report"]["counts"]["skipped_branches"], 1);
    assert!(sub.join("Thumbs.db").exists());

    let unkeep = common::run_cli_case("unkeep_marker", &["--json", "unkeep", sub.to_str().unwrap()]);
    assert_eq!(unkeep.json()["removed"], true);

    let clean = common::run_cli_case(
        "unkeep_marker_clean",
        &["--json", "clean", root, "--yes", "--rule", "name-pattern"],
    );
    assert_eq!(clean.code(), Some(0));
    assert!(!sub.join("Thumbs.db").exists());
}

#[cfg(unix)]
#[test]
fn failed_deletions_exit_partial() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let locked = tmp.path().join("locked");
    fs::create_dir(&locked).unwrap();
    fs::write(locked.join(".DS_Store"), b"x").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

    let canary = locked.join(".canary");
    if fs::write(&canary, b"").is_ok() {
        // Privileged user: permission bits are not enforced.
        let _ = fs::remove_file(&canary);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let result = common::run_cli_case(
        "failed_deletions",
        &["--json", "clean", tmp.path().to_str().unwrap(), "--yes"],
    );
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(result.code(), Some(4), "log: {}", result.log_path.display());
    assert_eq!(result.json()["report"]["counts"]["failed"], 1);
    assert!(result.stderr.contains("1 of"));
}

#[test]
fn activity_log_records_the_run() {
    let tmp = common::scenario_tree();
    let logs = tempfile::tempdir().unwrap();
    let log_path = logs.path().join("activity.jsonl");

    let result = common::run_cli_case_with_env(
        "activity_log",
        &with_rules(&["--json", "clean", tmp.path().to_str().unwrap(), "--yes"]),
        &[("HDEL_ACTIVITY_LOG", log_path.to_str().unwrap())],
    );
    assert_eq!(result.code(), Some(0));

    let events: Vec<String> = fs::read_to_string(&log_path)
        .unwrap()
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["event"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(events.first().map(String::as_str), Some("scan_start"));
    assert_eq!(events.last().map(String::as_str), Some("scan_complete"));
    assert_eq!(events.iter().filter(|e| *e == "entry_deleted").count(), 2);
}

#[test]
fn config_validate_reports_bad_file() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.toml");
    fs::write(&path, "[scanner]\nparallelism = 0\n").unwrap();

    let result = common::run_cli_case(
        "config_validate_bad",
        &["--json", "--config", path.to_str().unwrap(), "config", "validate"],
    );
    assert_eq!(result.code(), Some(1));
    assert_eq!(result.json()["valid"], false);
    assert_eq!(result.json()["code"], "HDEL-1001");
}

#[test]
fn config_show_emits_defaults() {
    let result = common::run_cli_case("config_show", &["--json", "config", "show"]);
    assert_eq!(result.code(), Some(0));
    let config = &result.json()["config"];
    assert_eq!(config["rules"]["enabled"][0], "name-pattern");
    assert_eq!(config["scanner"]["parallelism"], 1);
}

#[test]
fn completions_generate_for_bash() {
    let result = common::run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(result.status.success());
    assert!(result.stdout.contains("hdelete"));
}

// -- library-level pipeline scenarios --------------------------------------

#[test]
fn pipeline_scenario_with_activity_logger() {
    let tmp = common::scenario_tree();
    let logs = tempfile::tempdir().unwrap();
    let logger = ActivityLogger::spawn(JsonlConfig::new(logs.path().join("a.jsonl"))).unwrap();

    let report = Pipeline::new(scenario_config(), Mode::Delete)
        .with_logger(Some(logger.handle()))
        .run(tmp.path())
        .unwrap();
    logger.finish();

    assert!(report.is_clean());
    let by_name = |name: &str| {
        report
            .outcomes
            .iter()
            .find(|o| o.path().ends_with(name))
            .unwrap()
    };
    assert_eq!(by_name(".hidden_file").disposition, Disposition::Deleted);
    assert_eq!(
        by_name("visible.txt").skip_reason,
        Some(SkipReason::NotACandidate)
    );
    assert_eq!(by_name("Thumbs.db").result.reason, Some(Rule::NamePattern));

    let log = fs::read_to_string(logs.path().join("a.jsonl")).unwrap();
    assert!(log.contains("\"scan_complete\""));
}

#[test]
fn every_outcome_lies_below_the_root() {
    let tmp = common::scenario_tree();
    fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();
    fs::write(tmp.path().join("a/b/c/.x"), b"").unwrap();

    let report = Pipeline::new(scenario_config(), Mode::DryRun)
        .run(tmp.path())
        .unwrap();
    let root = report.root.clone();
    assert!(report.outcomes.iter().all(|o| o.path().starts_with(&root) && o.path() != root));
}
