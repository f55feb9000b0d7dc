//! `JobType.inputFiles` pattern resolution.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use globset::GlobBuilder;
use walkdir::WalkDir;

use super::SandboxError;

fn is_glob(text: &str) -> bool {
    text.contains(['*', '?', '[', '{'])
}

/// Expand every pattern against `base_dir`.
///
/// Patterns without glob characters name a file or directory directly.
/// `*` does not cross `/`; use `**` for that. When any pattern matches
/// nothing the error lists each such pattern as written.
pub fn resolve_input_files(
    patterns: &[String],
    base_dir: &Path,
) -> Result<Vec<PathBuf>, SandboxError> {
    let mut found = BTreeSet::new();
    let mut unmatched = Vec::new();

    for pattern in patterns {
        let matches = if is_glob(pattern) {
            expand(pattern, base_dir)?
        } else {
            let path = base_dir.join(pattern);
            if path.exists() {
                vec![path]
            } else {
                Vec::new()
            }
        };

        if matches.is_empty() {
            unmatched.push(pattern.clone());
        }
        found.extend(matches);
    }

    if unmatched.is_empty() {
        Ok(found.into_iter().collect())
    } else {
        Err(SandboxError::InputFileNotFound {
            patterns: unmatched,
        })
    }
}

fn expand(pattern: &str, base_dir: &Path) -> Result<Vec<PathBuf>, SandboxError> {
    // Relative patterns match paths relative to base_dir, so glob characters
    // in base_dir itself stay literal.
    let relative = Path::new(pattern).is_relative();
    let glob = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|source| SandboxError::Pattern {
            pattern: pattern.to_string(),
            source,
        })?
        .compile_matcher();

    let root = base_dir.join(literal_prefix(Path::new(pattern)));
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    Ok(WalkDir::new(&root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            let candidate = if relative {
                path.strip_prefix(base_dir).unwrap_or(path)
            } else {
                path.as_path()
            };
            glob.is_match(candidate)
        })
        .collect())
}

/// Leading components of `pattern` free of glob characters.
fn literal_prefix(pattern: &Path) -> PathBuf {
    let mut root = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if is_glob(&part.to_string_lossy()) {
                break;
            }
        }
        root.push(component);
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data/nested")).unwrap();
        fs::write(dir.path().join("data/a.txt"), "a").unwrap();
        fs::write(dir.path().join("data/b.txt"), "b").unwrap();
        fs::write(dir.path().join("data/nested/c.txt"), "c").unwrap();
        fs::write(dir.path().join("single.json"), "{}").unwrap();
        dir
    }

    fn names(paths: &[PathBuf], base: &Path) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.strip_prefix(base).unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let dir = tree();
        let found = resolve_input_files(&["data/*.txt".into()], dir.path()).unwrap();
        assert_eq!(names(&found, dir.path()), vec!["data/a.txt", "data/b.txt"]);
    }

    #[test]
    fn test_double_star_recurses() {
        let dir = tree();
        let found = resolve_input_files(&["data/**/*.txt".into()], dir.path()).unwrap();
        assert!(names(&found, dir.path()).contains(&"data/nested/c.txt".to_string()));
    }

    #[test]
    fn test_literal_and_directory() {
        let dir = tree();
        let found =
            resolve_input_files(&["single.json".into(), "data/nested".into()], dir.path()).unwrap();
        assert_eq!(names(&found, dir.path()), vec!["data/nested", "single.json"]);
    }

    #[test]
    fn test_every_unmatched_pattern_listed() {
        let dir = tree();
        let err = resolve_input_files(
            &["data/*.txt".into(), "*.root".into(), "nope.cfg".into()],
            dir.path(),
        )
        .unwrap_err();
        match err {
            SandboxError::InputFileNotFound { patterns } => {
                assert_eq!(patterns, vec!["*.root", "nope.cfg"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_bad_pattern() {
        let dir = tree();
        let err = resolve_input_files(&["data/[.txt".into()], dir.path()).unwrap_err();
        assert!(matches!(err, SandboxError::Pattern { .. }));
    }

    #[test]
    fn test_glob_characters_in_base_dir_are_literal() {
        let dir = TempDir::new().unwrap();
        let base = dir.path().join("proj[1]");
        fs::create_dir_all(&base).unwrap();
        fs::write(base.join("a.dat"), "a").unwrap();
        fs::create_dir_all(dir.path().join("proj1")).unwrap();
        fs::write(dir.path().join("proj1/b.dat"), "b").unwrap();

        let found = resolve_input_files(&["*.dat".into()], &base).unwrap();
        assert_eq!(found, vec![base.join("a.dat")]);
    }

    #[test]
    fn test_absolute_pattern() {
        let dir = tree();
        let pattern = format!("{}/data/*.txt", dir.path().display());
        let found = resolve_input_files(&[pattern], Path::new("/nonexistent")).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_literal_prefix() {
        assert_eq!(
            literal_prefix(Path::new("/base/data/*/x.txt")),
            PathBuf::from("/base/data")
        );
    }
}
