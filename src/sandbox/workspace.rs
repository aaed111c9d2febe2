use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{Result, SandboxError};

const WORKSPACE_PREFIX: &str = "sandbox-";
pub(super) const STDOUT_FILE: &str = "stdout.txt";
pub(super) const STDERR_FILE: &str = "stderr.txt";
pub(super) const STATS_FILE: &str = "time_stats.txt";

/// Hands out one private directory per execution attempt
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    source_file: &'static str,
}

impl WorkspaceManager {
    /// Workspaces are created under `root`, or the system temp dir when `None`
    pub fn new(root: Option<PathBuf>, source_file: &'static str) -> Result<Self> {
        let root = root.unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&root).map_err(|source| SandboxError::Workspace {
            action: "create root of",
            source,
        })?;
        Ok(Self { root, source_file })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a fresh, uniquely named directory and writes the source into it
    pub fn acquire(&self, source_code: &str) -> Result<Workspace> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)
            .map_err(|source| SandboxError::Workspace {
                action: "create",
                source,
            })?;

        let workspace = Workspace {
            dir,
            source_file: self.source_file,
        };
        fs::write(workspace.source_path(), source_code).map_err(|source| {
            SandboxError::Workspace {
                action: "write source into",
                source,
            }
        })?;

        log::debug!(
            "Acquired workspace {} ({} bytes of source)",
            workspace.path().display(),
            source_code.len()
        );
        Ok(workspace)
    }
}

/// A directory owned by exactly one execution attempt.
///
/// Removed by [`Workspace::release`], or by `Drop` on any path that skips it
/// (early return, panic, cancelled task).
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    source_file: &'static str,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn source_file(&self) -> &'static str {
        self.source_file
    }

    pub fn source_path(&self) -> PathBuf {
        self.path().join(self.source_file)
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.path().join(STDOUT_FILE)
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.path().join(STDERR_FILE)
    }

    pub fn stats_path(&self) -> PathBuf {
        self.path().join(STATS_FILE)
    }

    /// Name under which this attempt's container runs; unique like the directory
    pub fn container_name(&self) -> String {
        self.path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| WORKSPACE_PREFIX.trim_end_matches('-').to_string())
    }

    /// Reads at most `limit` bytes of a file the run produced; anything beyond is
    /// dropped. A file that was never written reads as empty.
    pub fn read_output(&self, path: &Path, limit: u64) -> Result<Vec<u8>> {
        let read_error = |source| SandboxError::Workspace {
            action: "read output from",
            source,
        };
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(read_error(source)),
        };

        let mut content = Vec::new();
        file.take(limit.saturating_add(1))
            .read_to_end(&mut content)
            .map_err(read_error)?;
        if content.len() as u64 > limit {
            content.truncate(limit as usize);
            log::warn!("Truncated {} to {limit} bytes", path.display());
        }
        Ok(content)
    }

    /// Removes the directory and everything in it
    pub fn release(self) -> Result<()> {
        let path = self.path().to_path_buf();
        self.dir.close().map_err(|source| SandboxError::Workspace {
            action: "remove",
            source,
        })?;
        log::debug!("Released workspace {}", path.display());
        Ok(())
    }
}
