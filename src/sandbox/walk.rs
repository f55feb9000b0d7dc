//! Link-following directory walk with cycle detection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use super::{EntrySource, SandboxError};

/// Add everything under `root` to `entries`, archived below `prefix`.
///
/// Symbolic links are followed, so their targets are archived as regular
/// files and directories. A link pointing back at one of its ancestors is
/// an error naming `root`. Dangling links are skipped.
pub(super) fn add_tree(
    root: &Path,
    prefix: &str,
    entries: &mut BTreeMap<String, EntrySource>,
) -> Result<(), SandboxError> {
    for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.loop_ancestor().is_some() => {
                return Err(SandboxError::SymlinkLoop {
                    root: root.to_path_buf(),
                    link: e.path().map(Path::to_path_buf).unwrap_or_default(),
                });
            }
            Err(e) if is_dangling(&e) => {
                warn!(path = ?e.path(), "skipping dangling symbolic link");
                continue;
            }
            Err(e) => return Err(SandboxError::Walk(e)),
        };

        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| SandboxError::Io {
                path: entry.path().to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "outside walk root"),
            })?;
        let name = archive_name(prefix, rel);
        if name.is_empty() {
            continue;
        }

        let source = if entry.file_type().is_dir() {
            EntrySource::Directory
        } else {
            EntrySource::File(entry.path().to_path_buf())
        };
        entries.insert(name, source);
    }
    Ok(())
}

fn is_dangling(error: &walkdir::Error) -> bool {
    error
        .io_error()
        .is_some_and(|io| io.kind() == std::io::ErrorKind::NotFound)
        && error.path().is_some_and(|p| p.symlink_metadata().is_ok())
}

/// `prefix/rel` with `/` separators; either part may be empty.
pub(super) fn archive_name(prefix: &str, rel: &Path) -> String {
    let rel: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let rel = rel.join("/");
    match (prefix.is_empty(), rel.is_empty()) {
        (true, _) => rel,
        (false, true) => prefix.to_string(),
        (false, false) => format!("{}/{}", prefix, rel),
    }
}

/// Every `src/<pkg>/<sub>/<kind>` directory of a framework area.
pub(super) fn package_dirs(base: &Path, kinds: &[&str]) -> Vec<(PathBuf, String)> {
    let mut found = Vec::new();
    let src = base.join("src");
    for package in WalkDir::new(&src)
        .min_depth(2)
        .max_depth(2)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
    {
        for kind in kinds {
            let dir = package.path().join(kind);
            if dir.is_dir() {
                if let Ok(rel) = dir.strip_prefix(base) {
                    found.push((dir.clone(), archive_name("", rel)));
                }
            }
        }
    }
    found
}
