use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::{MegaByte, SandboxConfig, Second};

use super::classifier::{Language, Python, classify};
use super::launcher::{ContainerLauncher, Launcher};
use super::types::{BatchResult, ExecutionRequest, ExitStatus, TestCase, Verdict};
use super::workspace::WorkspaceManager;
use super::{Result, SandboxError};

/// Smallest memory ceiling the container runtime accepts
const MIN_MEMORY_LIMIT_MB: u64 = 6;

/// Limits applied when a test case does not name its own
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub time_limit: Second,
    pub memory_limit: MegaByte,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            time_limit: Second(10.0),
            memory_limit: MegaByte(128),
        }
    }
}

/// Scores one submission against a set of test cases, one container per case
pub struct Scorer<L: Launcher = ContainerLauncher> {
    launcher: Arc<L>,
    workspaces: Arc<WorkspaceManager>,
    language: Arc<dyn Language>,
    defaults: Limits,
    permits: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl Scorer<ContainerLauncher> {
    /// Builds the production scorer: Python submissions in containers
    pub fn from_config(config: &SandboxConfig) -> Result<Self> {
        let language: Arc<dyn Language> = Arc::new(Python);
        let shutdown = CancellationToken::new();
        let launcher = ContainerLauncher::new(config.clone(), language.clone(), shutdown.clone())?;
        let workspaces = WorkspaceManager::new(config.workspace_root.clone(), language.source_file())?;
        let defaults = Limits {
            time_limit: config.default_time_limit,
            memory_limit: config.default_memory_limit,
        };

        let mut scorer = Self::new(launcher, workspaces, language, defaults)
            .with_max_parallel(config.max_parallel);
        scorer.shutdown = shutdown;
        Ok(scorer)
    }
}

impl<L: Launcher> Scorer<L> {
    pub fn new(
        launcher: L,
        workspaces: WorkspaceManager,
        language: Arc<dyn Language>,
        defaults: Limits,
    ) -> Self {
        Self {
            launcher: Arc::new(launcher),
            workspaces: Arc::new(workspaces),
            language,
            defaults,
            permits: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Caps the number of executions running at once across all batches
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.permits = max_parallel
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn defaults(&self) -> Limits {
        self.defaults
    }

    pub async fn preflight(&self) -> Result<()> {
        self.launcher.preflight().await
    }

    /// Stops accepting work and tears down running containers
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Some(permits) = &self.permits {
            permits.close();
        }
    }

    /// Builds the request for one test case, applying the configured defaults
    pub fn request_for(&self, code: &str, testcase: &TestCase) -> Result<ExecutionRequest> {
        let time_limit = testcase
            .time_limit_seconds
            .map(Second)
            .unwrap_or(self.defaults.time_limit);
        let time_limit = time_limit.to_duration().ok_or_else(|| {
            SandboxError::InvalidRequest(format!(
                "time limit must be a positive number of seconds, got {}",
                time_limit.0
            ))
        })?;

        let memory_limit = testcase
            .memory_limit_mb
            .map(MegaByte)
            .unwrap_or(self.defaults.memory_limit);
        if memory_limit.0 < MIN_MEMORY_LIMIT_MB {
            return Err(SandboxError::InvalidRequest(format!(
                "memory limit must be at least {MIN_MEMORY_LIMIT_MB} MB, got {}",
                memory_limit.0
            )));
        }

        Ok(ExecutionRequest {
            source_code: code.to_string(),
            stdin: testcase.input.clone(),
            time_limit,
            memory_limit: memory_limit.to_bytes(),
        })
    }

    /// Runs every test case concurrently and grades the results.
    ///
    /// Verdicts come back in test case order. Any infrastructure fault fails the
    /// whole batch, but only after every execution has finished.
    pub async fn score(&self, code: &str, testcases: &[TestCase]) -> Result<BatchResult> {
        if self.shutdown.is_cancelled() {
            return Err(SandboxError::Cancelled);
        }

        let requests = testcases
            .iter()
            .map(|tc| self.request_for(code, tc))
            .collect::<Result<Vec<_>>>()?;

        let started = Instant::now();
        let mut executions = JoinSet::new();
        for (idx, (request, testcase)) in requests.into_iter().zip(testcases).enumerate() {
            let launcher = self.launcher.clone();
            let workspaces = self.workspaces.clone();
            let language = self.language.clone();
            let permits = self.permits.clone();
            let expected_output = testcase.expected_output.clone();

            executions.spawn(async move {
                let verdict: Result<Verdict> = async {
                    // Closed only on shutdown
                    let _permit = match permits {
                        Some(permits) => Some(
                            permits
                                .acquire_owned()
                                .await
                                .map_err(|_| SandboxError::Cancelled)?,
                        ),
                        None => None,
                    };
                    execute_one(&*launcher, &workspaces, &*language, request, &expected_output)
                        .await
                }
                .await;
                (idx, verdict)
            });
        }

        let mut slots: Vec<Option<Verdict>> = vec![None; testcases.len()];
        let mut first_fault: Option<SandboxError> = None;
        while let Some(joined) = executions.join_next().await {
            match joined {
                Ok((idx, Ok(verdict))) => slots[idx] = Some(verdict),
                Ok((idx, Err(e))) => {
                    log::error!("Test case {idx} could not be scored: {e}");
                    first_fault.get_or_insert(e);
                }
                Err(e) => {
                    log::error!("Execution task failed: {e}");
                    first_fault.get_or_insert(SandboxError::TaskFailed(e.to_string()));
                }
            }
        }
        if let Some(fault) = first_fault {
            return Err(fault);
        }

        let verdicts = slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| SandboxError::TaskFailed("an execution produced no verdict".into()))?;
        let batch = BatchResult::new(verdicts);
        log::info!(
            "Scored {} test case(s) in {:?}, all accepted: {}",
            batch.len(),
            started.elapsed(),
            batch.all_accepted()
        );
        Ok(batch)
    }
}

/// Acquire a workspace, run, release, grade. The workspace is gone before this returns.
async fn execute_one<L: Launcher>(
    launcher: &L,
    workspaces: &WorkspaceManager,
    language: &dyn Language,
    request: ExecutionRequest,
    expected_output: &str,
) -> Result<Verdict> {
    let workspace = workspaces.acquire(&request.source_code)?;
    let outcome = launcher.run(&workspace, &request).await;
    let released = workspace.release();

    let result = outcome?;
    released?;

    if let ExitStatus::LaunchFailed(reason) = &result.exit_status {
        return Err(SandboxError::LaunchFailed(reason.clone()));
    }
    let outcome = classify(&result, expected_output, language)
        .ok_or_else(|| SandboxError::TaskFailed("execution result could not be graded".into()))?;
    Ok(Verdict::from_result(outcome, result))
}
