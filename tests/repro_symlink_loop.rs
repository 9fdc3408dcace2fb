#![cfg(unix)]

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use hdelete::core::config::Config;
use hdelete::scanner::executor::Mode;
use hdelete::scanner::pipeline::Pipeline;
use hdelete::scanner::walker::scan;
use tempfile::TempDir;

fn looping_tree() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("scan_root");
    fs::create_dir_all(root.join("a/b/c")).unwrap();
    // root/loop -> root, root/a/b/up -> root/a
    symlink(&root, root.join("loop")).unwrap();
    symlink(root.join("a"), root.join("a/b/up")).unwrap();
    fs::write(root.join("a/b/c/.DS_Store"), b"x").unwrap();
    (tmp, root)
}

#[test]
fn followed_loops_terminate_without_duplicates() {
    let (_tmp, root) = looping_tree();
    let (tx, rx) = mpsc::channel();

    let scan_root = root.clone();
    std::thread::spawn(move || {
        let paths: Vec<PathBuf> = scan(&scan_root, true).unwrap().map(|e| e.path).collect();
        tx.send(paths).unwrap();
    });

    let paths = match rx.recv_timeout(Duration::from_secs(5)) {
        Ok(paths) => paths,
        Err(_) => panic!("scan timed out - likely stuck in symlink loop"),
    };

    let unique: HashSet<&PathBuf> = paths.iter().collect();
    assert_eq!(unique.len(), paths.len(), "duplicate entries: {paths:?}");
    assert!(paths.contains(&root.join("a/b/c/.DS_Store")));
    assert!(paths.iter().all(|p| p.starts_with(&root) && *p != root));
}

#[test]
fn self_link_is_yielded_once() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("r");
    fs::create_dir(&root).unwrap();
    symlink(&root, root.join("me")).unwrap();

    let paths: Vec<PathBuf> = scan(&root, true).unwrap().map(|e| e.path).collect();
    assert!(paths.len() <= 1, "unexpected entries: {paths:?}");
}

#[test]
fn pipeline_over_loops_matches_in_parallel() {
    let (_tmp, root) = looping_tree();
    let mut config = Config::default();
    config.scanner.follow_links = true;

    let sequential = Pipeline::new(config.clone(), Mode::DryRun).run(&root).unwrap();
    config.scanner.parallelism = 3;
    let parallel = Pipeline::new(config, Mode::DryRun).run(&root).unwrap();

    assert_eq!(sequential.counts.candidates, 1);
    assert_eq!(parallel.counts.candidates, 1);
}
