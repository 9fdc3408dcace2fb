//! Shared path manipulation utilities: absolute resolution and root containment.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

/// Resolve the real location of `path` without following `path` itself.
///
/// The parent directory is canonicalized and the final component re-attached,
/// so a symlink named `path` resolves to where the link lives, not to its
/// target. This is the location a `remove_file` on `path` would affect.
pub fn resolve_entry_location(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) if !parent.as_os_str().is_empty() => {
            resolve_absolute_path(parent).join(name)
        }
        _ => resolve_absolute_path(path),
    }
}

/// True when `path` is `root` itself or lies strictly below it.
///
/// Both paths are compared component-wise, so `/data/a-2` is not inside
/// `/data/a`. Callers pass already-resolved paths.
#[must_use]
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

/// True when `path` lies strictly below `root` (the root itself is excluded).
#[must_use]
pub fn is_strict_descendant(path: &Path, root: &Path) -> bool {
    path != root && path.starts_with(root)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let cwd = env::current_dir().unwrap();
        let resolved = resolve_absolute_path(Path::new("."));
        assert_eq!(resolved, std::fs::canonicalize(&cwd).unwrap());
    }

    #[test]
    fn normalizes_nonexistent_path_syntactically() {
        #[cfg(unix)]
        let root = Path::new("/");
        #[cfg(windows)]
        let root = Path::new("C:");

        let input = root.join("nonexistent").join("foo").join("..").join("bar");
        let expected = root.join("nonexistent").join("bar");
        assert!(std::fs::canonicalize(&input).is_err());

        assert_eq!(resolve_absolute_path(&input), expected);
    }

    #[test]
    fn handles_parent_at_root() {
        #[cfg(unix)]
        {
            let resolved = normalize_syntactic(Path::new("/../foo"));
            assert_eq!(resolved, Path::new("/foo"));
        }
    }

    #[test]
    fn containment_respects_component_boundaries() {
        let root = Path::new("/data/scan");
        assert!(is_within(Path::new("/data/scan"), root));
        assert!(is_within(Path::new("/data/scan/a/b"), root));
        assert!(!is_within(Path::new("/data/scan-2/a"), root));
        assert!(!is_within(Path::new("/data"), root));

        assert!(!is_strict_descendant(root, root));
        assert!(is_strict_descendant(Path::new("/data/scan/x"), root));
    }

    #[cfg(unix)]
    #[test]
    fn entry_location_does_not_follow_final_symlink() {
        let tmp = tempfile::tempdir().unwrap();
        let inside = tmp.path().join("inside");
        std::fs::create_dir(&inside).unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = inside.join("link");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let location = resolve_entry_location(&link);
        let canon_inside = std::fs::canonicalize(&inside).unwrap();
        assert_eq!(location, canon_inside.join("link"));
    }
}
