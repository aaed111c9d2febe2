mod classifier;
mod launcher;
mod scorer;
mod types;
mod workspace;

pub use classifier::{Language, Python, classify};
pub use launcher::{ContainerLauncher, Launcher, TimeStats, parse_time_stats};
pub use scorer::{Limits, Scorer};
pub use types::{
    BatchResult, ExecutionRequest, ExecutionResult, ExitStatus, OutcomeKind, Signal, TestCase,
    Verdict, VerdictRecord,
};
pub use workspace::{Workspace, WorkspaceManager};

use std::io;

use thiserror::Error;

/// Faults of the scoring machinery itself. Grading outcomes are never reported here.
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Unable to {action} workspace: {source}")]
    Workspace {
        action: &'static str,
        source: io::Error,
    },
    #[error("Container runtime unavailable: {0}")]
    LaunchFailed(String),
    #[error("Unable to start the container runtime: {source}")]
    Spawn { source: io::Error },
    #[error("Unable to wait for the container runtime: {source}")]
    Wait { source: io::Error },
    #[error("Execution cancelled by shutdown")]
    Cancelled,
    #[error("Execution task failed: {0}")]
    TaskFailed(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl SandboxError {
    /// Whether the caller, not the machinery, is at fault
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidRequest(_))
    }
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
