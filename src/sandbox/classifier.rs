use super::types::{ExecutionResult, ExitStatus, OutcomeKind, Signal};

/// What the sandbox needs to know about the submission language
pub trait Language: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fixed file name the source is written to inside the workspace
    fn source_file(&self) -> &'static str;

    /// Interpreter invocation, run from the workspace mount point
    fn command(&self) -> Vec<String>;

    /// Whether the interpreter rejected the source before running it
    fn is_compile_error(&self, stderr: &str) -> bool;
}

/// Python 3, the only supported submission language
#[derive(Debug, Clone, Copy, Default)]
pub struct Python;

const PYTHON_COMPILE_MARKERS: &[&str] = &["SyntaxError:", "IndentationError:", "TabError:"];

impl Language for Python {
    fn name(&self) -> &'static str {
        "python"
    }

    fn source_file(&self) -> &'static str {
        "client_script.py"
    }

    fn command(&self) -> Vec<String> {
        vec!["python".to_string(), self.source_file().to_string()]
    }

    fn is_compile_error(&self, stderr: &str) -> bool {
        PYTHON_COMPILE_MARKERS
            .iter()
            .any(|marker| stderr.contains(marker))
    }
}

/// Grades one execution result against the expected output.
///
/// Returns `None` only for [`ExitStatus::LaunchFailed`]: a run that never happened
/// has no grade, and the caller must treat it as an infrastructure fault.
pub fn classify(
    result: &ExecutionResult,
    expected_output: &str,
    language: &dyn Language,
) -> Option<OutcomeKind> {
    let outcome = match &result.exit_status {
        ExitStatus::TimedOut => OutcomeKind::Timeout,
        ExitStatus::Signaled(Signal::OutOfMemory) => OutcomeKind::MemoryLimitExceeded,
        ExitStatus::Completed(0) => {
            let stdout = String::from_utf8_lossy(&result.stdout);
            if stdout.trim() == expected_output.trim() {
                OutcomeKind::Accepted
            } else {
                OutcomeKind::WrongAnswer
            }
        }
        ExitStatus::Completed(_) | ExitStatus::Signaled(Signal::Other(_)) => {
            if language.is_compile_error(&String::from_utf8_lossy(&result.stderr)) {
                OutcomeKind::CompilationError
            } else {
                OutcomeKind::RuntimeError
            }
        }
        ExitStatus::LaunchFailed(_) => return None,
    };
    Some(outcome)
}
