use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One execution of the submitted source against a single input
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub source_code: String,
    pub stdin: String,
    pub time_limit: Duration,
    /// Memory ceiling in bytes
    pub memory_limit: u64,
}

/// How the sandboxed process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Completed(i32),
    Signaled(Signal),
    TimedOut,
    /// The container runtime could not be invoked at all
    LaunchFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Killed by the runtime's out-of-memory mechanism
    OutOfMemory,
    Other(i32),
}

/// Raw outcome of one launch, before any grading
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub wall_time: Duration,
    /// Peak resident memory in bytes, when the accounting utility reported it
    pub peak_memory: Option<u64>,
}

impl ExecutionResult {
    pub fn timed_out(time_limit: Duration) -> Self {
        Self {
            exit_status: ExitStatus::TimedOut,
            stdout: Vec::new(),
            stderr: format!(
                "execution exceeded the time limit of {}s",
                time_limit.as_secs_f64()
            )
            .into_bytes(),
            wall_time: time_limit,
            peak_memory: None,
        }
    }

    pub fn launch_failed(reason: impl Into<String>) -> Self {
        Self {
            exit_status: ExitStatus::LaunchFailed(reason.into()),
            stdout: Vec::new(),
            stderr: Vec::new(),
            wall_time: Duration::ZERO,
            peak_memory: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Compilation Error")]
    CompilationError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    Timeout,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::WrongAnswer => "Wrong Answer",
            Self::CompilationError => "Compilation Error",
            Self::RuntimeError => "Runtime Error",
            Self::Timeout => "Timeout",
            Self::MemoryLimitExceeded => "Memory Limit Exceeded",
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graded result of a single test case
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: OutcomeKind,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
    pub peak_memory: Option<u64>,
}

impl Verdict {
    pub fn from_result(outcome: OutcomeKind, result: ExecutionResult) -> Self {
        Self {
            outcome,
            stdout: result.stdout,
            stderr: result.stderr,
            elapsed: result.wall_time,
            peak_memory: result.peak_memory,
        }
    }

    pub fn to_record(&self) -> VerdictRecord {
        VerdictRecord {
            outcome: self.outcome,
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            peak_memory_kb: self.peak_memory.map(|bytes| bytes / 1024),
        }
    }
}

/// Per-test-case record handed back to callers
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerdictRecord {
    pub outcome: OutcomeKind,
    pub stdout: String,
    pub stderr: String,
    pub elapsed_seconds: f64,
    pub peak_memory_kb: Option<u64>,
}

/// Verdicts of a whole submission, in test case order
#[derive(Debug, Clone)]
pub struct BatchResult {
    verdicts: Vec<Verdict>,
    all_accepted: bool,
}

impl BatchResult {
    pub fn new(verdicts: Vec<Verdict>) -> Self {
        let all_accepted = verdicts
            .iter()
            .all(|v| v.outcome == OutcomeKind::Accepted);
        Self {
            verdicts,
            all_accepted,
        }
    }

    pub fn verdicts(&self) -> &[Verdict] {
        &self.verdicts
    }

    pub fn all_accepted(&self) -> bool {
        self.all_accepted
    }

    pub fn len(&self) -> usize {
        self.verdicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.is_empty()
    }

    pub fn records(&self) -> Vec<VerdictRecord> {
        self.verdicts.iter().map(Verdict::to_record).collect()
    }

    pub fn into_verdicts(self) -> Vec<Verdict> {
        self.verdicts
    }
}

/// A test case as supplied by the caller. Missing limits use the configured defaults.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default, alias = "output")]
    pub expected_output: String,
    pub time_limit_seconds: Option<f64>,
    pub memory_limit_mb: Option<u64>,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
            time_limit_seconds: None,
            memory_limit_mb: None,
        }
    }

    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit_seconds = Some(seconds);
        self
    }

    pub fn with_memory_limit(mut self, megabytes: u64) -> Self {
        self.memory_limit_mb = Some(megabytes);
        self
    }
}
