//! Sandbox builder
//!
//! Packages the user's framework area, input files, script and final
//! configuration into a canonical tar archive and uploads it to the
//! sandbox cache.
//!
//! Archives are deterministic:
//! - Entries are sorted by archive name
//! - mtime, uid and gid are zero
//! - Files are 0644, or 0755 when executable; directories are 0755
//!
//! The same inputs therefore always produce the same SHA-256, which is also
//! the key the cache stores the archive under.

mod inputs;
mod upload;
mod walk;

pub use inputs::resolve_input_files;
pub use upload::{upload, SandboxUpload, CACHE_FILE_RESOURCE};

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tar::{Builder, Header};
use tracing::{debug, info};

use crate::config::TaskConfiguration;
use crate::environment::ClientEnvironment;
use crate::failure::{Classify, FailureKind};
use crate::transport::RestError;

/// Framework area directories archived as-is.
const FRAMEWORK_DIRS: &[&str] = &["lib", "biglib", "module", "python"];

/// Per-package directories archived from `src/<pkg>/<sub>/`.
const PACKAGE_DIRS: &[&str] = &["data", "interface", "python"];

const EXTERNAL_DIR: &str = "external";

/// Archive name of the resolved task configuration.
pub const DEBUG_CONFIG_NAME: &str = "debug/crabConfig.toml";

/// Archive name of the user's parameter set.
pub const DEBUG_PSET_NAME: &str = "debug/originalPSet.py";

/// Sandbox errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("input file pattern(s) matched nothing: {}", .patterns.join(", "))]
    InputFileNotFound { patterns: Vec<String> },

    #[error("symbolic link loop under {}: {} points back to an ancestor", .root.display(), .link.display())]
    SymlinkLoop { root: PathBuf, link: PathBuf },

    #[error("invalid input file pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("cannot write archive: {0}")]
    Archive(#[source] io::Error),

    #[error("sandbox is {size} bytes, larger than the {limit} byte limit")]
    TooBig { size: u64, limit: u64 },

    #[error("sandbox upload failed: {0}")]
    Upload(#[from] RestError),

    #[error("cannot render the configuration into the sandbox: {0}")]
    Render(String),

    #[error("{} and {} would both be archived as '{name}'", .first.display(), .second.display())]
    DuplicateName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },
}

impl Classify for SandboxError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            SandboxError::InputFileNotFound { .. } => FailureKind::InputFileNotFound,
            SandboxError::TooBig { .. } => FailureKind::SandboxTooBig,
            SandboxError::Upload(e) => e.failure_kind(),
            SandboxError::SymlinkLoop { .. }
            | SandboxError::Pattern { .. }
            | SandboxError::Render(_)
            | SandboxError::DuplicateName { .. } => FailureKind::Configuration,
            SandboxError::Io { .. } | SandboxError::Walk(_) | SandboxError::Archive(_) => {
                FailureKind::Unexpected
            }
        }
    }
}

/// Where an archive entry's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    Directory,
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// A built archive.
#[derive(Debug, Clone)]
pub struct SandboxArchive {
    pub bytes: Vec<u8>,
    pub sha256: String,
    /// Archive names in archive order.
    pub entries: Vec<String>,
}

impl SandboxArchive {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Name the cache stores the archive under.
    pub fn cache_file_name(&self) -> String {
        format!("{}.tar", self.sha256)
    }
}

/// Collects sandbox entries and writes the canonical archive.
#[derive(Debug, Clone, Default)]
pub struct SandboxBuilder {
    entries: BTreeMap<String, EntrySource>,
    max_bytes: Option<u64>,
}

impl SandboxBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the build when the archive exceeds `max_bytes`; 0 means no
    /// limit.
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = if max_bytes > 0 { Some(max_bytes) } else { None };
        self
    }

    /// Everything a task needs: the framework area under `$CMSSW_BASE`,
    /// `JobType.inputFiles`, `JobType.scriptExe`, the parameter set and the
    /// resolved configuration. Relative names resolve against `base_dir`.
    pub fn from_config(
        config: &TaskConfiguration,
        env: &ClientEnvironment,
        base_dir: &Path,
    ) -> Result<Self, SandboxError> {
        let mut builder = Self::new();

        if let Some(base) = &env.framework_base {
            builder.add_framework_area(
                base,
                config.get_bool("JobType.sendExternalFolder").unwrap_or(false),
            )?;
        }

        // User files are archived by base name; two of them must not collide.
        let mut claimed: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut claim = |name: &str, path: &Path| match claimed.get(name) {
            Some(first) if first == path => Ok(()),
            Some(first) => Err(SandboxError::DuplicateName {
                name: name.to_string(),
                first: first.clone(),
                second: path.to_path_buf(),
            }),
            None => {
                claimed.insert(name.to_string(), path.to_path_buf());
                Ok(())
            }
        };

        if let Some(patterns) = config.get_list("JobType.inputFiles") {
            for path in resolve_input_files(&patterns, base_dir)? {
                let name = base_name(&path)?;
                claim(&name, &path)?;
                if path.is_dir() {
                    builder.add_tree(&path, &name)?;
                } else {
                    builder.add_file(name, path);
                }
            }
        }

        if let Some(script) = config.get_str("JobType.scriptExe") {
            let path = base_dir.join(script);
            let name = base_name(&path)?;
            claim(&name, &path)?;
            builder.add_file(name, path);
        }

        if let Some(pset) = config.get_str("JobType.psetName") {
            builder.add_file(DEBUG_PSET_NAME, base_dir.join(pset));
        }

        let rendered = config
            .to_toml_string()
            .map_err(|e| SandboxError::Render(e.to_string()))?;
        builder.add_bytes(DEBUG_CONFIG_NAME, rendered.into_bytes());

        Ok(builder)
    }

    fn add_framework_area(&mut self, base: &Path, external: bool) -> Result<(), SandboxError> {
        for dir in FRAMEWORK_DIRS {
            let path = base.join(dir);
            if path.is_dir() {
                self.add_tree(&path, dir)?;
            }
        }
        for (path, name) in walk::package_dirs(base, PACKAGE_DIRS) {
            self.add_tree(&path, &name)?;
        }
        if external {
            let path = base.join(EXTERNAL_DIR);
            if path.is_dir() {
                self.add_tree(&path, EXTERNAL_DIR)?;
            }
        }
        Ok(())
    }

    /// Add `root` and everything below it under `prefix`, following
    /// symbolic links.
    pub fn add_tree(&mut self, root: &Path, prefix: &str) -> Result<(), SandboxError> {
        walk::add_tree(root, prefix, &mut self.entries)
    }

    pub fn add_file(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.entries.insert(name.into(), EntrySource::File(path.into()));
    }

    pub fn add_bytes(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(name.into(), EntrySource::Bytes(bytes));
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Write the canonical archive.
    pub fn build(&self) -> Result<SandboxArchive, SandboxError> {
        let mut tar_buffer = Vec::new();
        {
            let mut builder = Builder::new(&mut tar_buffer);
            for (name, source) in &self.entries {
                match source {
                    EntrySource::Directory => {
                        let mut header = canonical_header(0, 0o755, true);
                        builder
                            .append_data(&mut header, format!("{}/", name), io::empty())
                            .map_err(SandboxError::Archive)?;
                    }
                    EntrySource::File(path) => {
                        let contents = fs::read(path).map_err(|source| SandboxError::Io {
                            path: path.clone(),
                            source,
                        })?;
                        let mode = if is_executable(path) { 0o755 } else { 0o644 };
                        let mut header = canonical_header(contents.len() as u64, mode, false);
                        builder
                            .append_data(&mut header, name, contents.as_slice())
                            .map_err(SandboxError::Archive)?;
                    }
                    EntrySource::Bytes(contents) => {
                        let mut header = canonical_header(contents.len() as u64, 0o644, false);
                        builder
                            .append_data(&mut header, name, contents.as_slice())
                            .map_err(SandboxError::Archive)?;
                    }
                }
            }
            builder.finish().map_err(SandboxError::Archive)?;
        }

        let size = tar_buffer.len() as u64;
        if let Some(limit) = self.max_bytes {
            if size > limit {
                return Err(SandboxError::TooBig { size, limit });
            }
        }

        let sha256 = hex::encode(Sha256::digest(&tar_buffer));
        debug!(entries = self.entries.len(), size, %sha256, "sandbox archive built");
        info!("sandbox is {} bytes with {} entries", size, self.entries.len());

        Ok(SandboxArchive {
            bytes: tar_buffer,
            sha256,
            entries: self.entries.keys().cloned().collect(),
        })
    }
}

/// Path and checksum are filled in by `append_data`, which also emits GNU
/// long-name records for names over 100 bytes.
fn canonical_header(size: u64, mode: u32, dir: bool) -> Header {
    let mut header = Header::new_gnu();
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode);
    if dir {
        header.set_entry_type(tar::EntryType::Directory);
    }
    header
}

fn base_name(path: &Path) -> Result<String, SandboxError> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| SandboxError::Io {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
        })
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = fs::metadata(path) {
            return metadata.permissions().mode() & 0o111 != 0;
        }
    }
    false
}
