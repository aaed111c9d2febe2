#![allow(dead_code)]

use std::path::Path;

use lazy_static::lazy_static;
use tempfile::TempDir;

use sandbox_scorer::config::SandboxConfig;
use sandbox_scorer::sandbox::Scorer;

lazy_static! {
    /// Shell script standing in for `docker`, see tests/fake_runtime.sh
    pub static ref FAKE_RUNTIME: Vec<String> = vec![
        "sh".to_string(),
        concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fake_runtime.sh").to_string(),
    ];
}

pub fn fake_config(workspace_root: &Path) -> SandboxConfig {
    SandboxConfig {
        runtime: FAKE_RUNTIME.clone(),
        workspace_root: Some(workspace_root.to_path_buf()),
        ..SandboxConfig::default()
    }
}

/// A scorer backed by the fake runtime, plus the directory its workspaces live in
pub fn fake_scorer() -> (TempDir, Scorer) {
    let root = TempDir::new().unwrap();
    let scorer = Scorer::from_config(&fake_config(root.path())).unwrap();
    (root, scorer)
}

pub fn leftover_workspaces(root: &Path) -> usize {
    std::fs::read_dir(root).unwrap().count()
}
