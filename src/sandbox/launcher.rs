use std::future::Future;
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::SandboxConfig;

use super::classifier::Language;
use super::types::{ExecutionRequest, ExecutionResult, ExitStatus, Signal};
use super::workspace::{STATS_FILE, STDERR_FILE, STDOUT_FILE, Workspace};
use super::{Result, SandboxError};

// Container layout
const MOUNT_POINT: &str = "/sandbox";
const TIME_BINARY: &str = "/usr/bin/time";

const TEARDOWN_GRACE: Duration = Duration::from_secs(5);
const PREFLIGHT_TIMEOUT: Duration = Duration::from_secs(10);

/// 128 + SIGKILL, reported by the runtime when the OOM killer ends the container
const OOM_EXIT_CODE: i32 = 137;
/// The runtime client itself failed: daemon unreachable, image missing, bad flags.
/// Like 126 and 127 it only means that when the program never got to run.
const RUNTIME_FAILURE_EXIT_CODE: i32 = 125;
const COMMAND_NOT_EXECUTABLE_EXIT_CODE: i32 = 126;
const COMMAND_NOT_FOUND_EXIT_CODE: i32 = 127;
const SIGKILL: i32 = 9;

/// `time -v` output is a few hundred bytes
const STATS_READ_LIMIT: u64 = 64 * 1024;

const OOM_MESSAGE: &str = "process was killed after exceeding the memory limit";

/// Runs one request inside an isolated environment
///
/// Implementations must enforce `request.time_limit` themselves and report a
/// runtime that cannot be invoked as [`ExitStatus::LaunchFailed`].
pub trait Launcher: Send + Sync + 'static {
    fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> impl Future<Output = Result<ExecutionResult>> + Send;

    /// Checks that the isolation backend is reachable at all
    fn preflight(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Launches each execution in a fresh container through the runtime's CLI
pub struct ContainerLauncher {
    config: SandboxConfig,
    language: Arc<dyn Language>,
    shutdown: CancellationToken,
}

/// Figures reported by GNU `time -v`
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TimeStats {
    pub peak_memory_kb: Option<u64>,
    pub terminated_by_signal: Option<i32>,
    /// Present only if `time` saw the program finish
    pub exit_status: Option<i32>,
}

/// Picks the figures the launcher needs out of `time -v` output.
/// Unknown or malformed lines are ignored.
pub fn parse_time_stats(text: &str) -> TimeStats {
    let mut stats = TimeStats::default();
    for line in text.lines() {
        let line = line.trim();
        if let Some(signal) = line.strip_prefix("Command terminated by signal ") {
            stats.terminated_by_signal = signal.trim().parse().ok();
        } else if let Some((key, value)) = line.split_once(':') {
            match key {
                "Maximum resident set size (kbytes)" => {
                    stats.peak_memory_kb = value.trim().parse().ok();
                }
                "Exit status" => stats.exit_status = value.trim().parse().ok(),
                _ => {}
            }
        }
    }
    stats
}

enum Waited {
    Exited(std::io::Result<std::process::ExitStatus>),
    Deadline,
    Shutdown,
}

impl ContainerLauncher {
    pub fn new(
        config: SandboxConfig,
        language: Arc<dyn Language>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        if config.runtime.is_empty() {
            return Err(SandboxError::LaunchFailed(
                "no container runtime configured".to_string(),
            ));
        }
        Ok(Self {
            config,
            language,
            shutdown,
        })
    }

    fn runtime_command(&self) -> Command {
        runtime_command(&self.config.runtime)
    }

    /// Shell line executed inside the container
    fn inner_command(&self) -> String {
        format!(
            "{TIME_BINARY} -v -o {STATS_FILE} {} > {STDOUT_FILE} 2> {STDERR_FILE}",
            self.language.command().join(" ")
        )
    }

    /// Arguments after the runtime binary. Every limit is always present.
    pub fn container_args(&self, workspace: &Workspace, request: &ExecutionRequest) -> Vec<String> {
        let memory = request.memory_limit.to_string();
        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "-i".into(),
            "--name".into(),
            workspace.container_name(),
            "--network".into(),
            "none".into(),
            "--memory".into(),
            memory.clone(),
            "--memory-swap".into(),
            memory,
            "--cpus".into(),
            self.config.cpus.to_string(),
            "--pids-limit".into(),
            self.config.pids_limit.to_string(),
            "--cap-drop=ALL".into(),
            "--security-opt=no-new-privileges".into(),
        ];
        if let Some(user) = host_user() {
            args.push("--user".into());
            args.push(user);
        }
        args.extend([
            "-v".into(),
            format!("{}:{MOUNT_POINT}:rw", workspace.path().display()),
            "-w".into(),
            MOUNT_POINT.into(),
            self.config.image.clone(),
            "sh".into(),
            "-c".into(),
            self.inner_command(),
        ]);
        args
    }

    /// Kills the runtime client and force-removes the container by name
    async fn teardown(&self, child: &mut Child, name: &str) {
        if let Err(e) = child.start_kill() {
            log::debug!("Runtime client for {name} already gone: {e}");
        }
        if timeout(TEARDOWN_GRACE, child.wait()).await.is_err() {
            log::warn!("Runtime client for {name} did not exit after being killed");
        }

        remove_container(&self.config.runtime, name).await;
    }
}

fn runtime_command(runtime: &[String]) -> Command {
    let mut command = Command::new(&runtime[0]);
    command.args(&runtime[1..]);
    command
}

async fn remove_container(runtime: &[String], name: &str) {
    let mut remove = runtime_command(runtime);
    remove
        .args(["rm", "--force", name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match timeout(TEARDOWN_GRACE, remove.status()).await {
        Ok(Ok(status)) if status.success() => log::debug!("Removed container {name}"),
        Ok(Ok(status)) => log::warn!("Removing container {name} exited with {status}"),
        Ok(Err(e)) => log::warn!("Unable to remove container {name}: {e}"),
        Err(_) => log::warn!("Removing container {name} timed out"),
    }
}

/// Removes the container when a run is abandoned midway (aborted task, panic).
///
/// Killing the runtime client alone leaves the container itself running.
struct ContainerGuard {
    runtime: Vec<String>,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(runtime: &[String], name: &str) -> Self {
        Self {
            runtime: runtime.to_vec(),
            name: name.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            log::warn!("Container {} abandoned outside of a runtime", self.name);
            return;
        };
        let runtime = std::mem::take(&mut self.runtime);
        let name = std::mem::take(&mut self.name);
        log::warn!("Run of container {name} abandoned, removing it");
        handle.spawn(async move { remove_container(&runtime, &name).await });
    }
}

impl Launcher for ContainerLauncher {
    async fn run(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResult> {
        let name = workspace.container_name();
        let runtime = &self.config.runtime[0];

        let mut command = self.runtime_command();
        command
            .args(self.container_args(workspace, request))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        log::debug!(
            "Launching container {name} (time limit {:?}, memory limit {} bytes)",
            request.time_limit,
            request.memory_limit
        );
        let started = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                log::error!("Container runtime {runtime} cannot be invoked: {e}");
                return Ok(ExecutionResult::launch_failed(format!("{runtime}: {e}")));
            }
            Err(source) => return Err(SandboxError::Spawn { source }),
        };
        let mut guard = ContainerGuard::new(&self.config.runtime, &name);

        let mut stdin_task = child.stdin.take().map(|mut stdin| {
            let input = request.stdin.clone().into_bytes();
            tokio::spawn(async move {
                // A program may exit without reading everything
                if let Err(e) = stdin.write_all(&input).await {
                    if e.kind() != ErrorKind::BrokenPipe {
                        log::debug!("Unable to feed stdin: {e}");
                    }
                }
            })
        });
        let mut diagnostics_task = child.stderr.take().map(read_to_end);

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = tokio::time::sleep(request.time_limit) => Waited::Deadline,
            _ = self.shutdown.cancelled() => Waited::Shutdown,
        };

        let status = match waited {
            Waited::Exited(Ok(status)) => {
                // `--rm` disposes of a container that ran to completion
                guard.disarm();
                status
            }
            Waited::Exited(Err(source)) => {
                self.teardown(&mut child, &name).await;
                guard.disarm();
                abort(&mut stdin_task, &mut diagnostics_task);
                return Err(SandboxError::Wait { source });
            }
            Waited::Deadline => {
                log::info!(
                    "Container {name} exceeded its time limit of {:?}",
                    request.time_limit
                );
                self.teardown(&mut child, &name).await;
                guard.disarm();
                abort(&mut stdin_task, &mut diagnostics_task);
                return Ok(ExecutionResult::timed_out(request.time_limit));
            }
            Waited::Shutdown => {
                log::info!("Shutting down, tearing down container {name}");
                self.teardown(&mut child, &name).await;
                guard.disarm();
                abort(&mut stdin_task, &mut diagnostics_task);
                return Err(SandboxError::Cancelled);
            }
        };
        let wall_time = started.elapsed();

        let diagnostics = match diagnostics_task.as_mut() {
            Some(task) => match timeout(TEARDOWN_GRACE, task).await {
                Ok(Ok(bytes)) => bytes,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        abort(&mut stdin_task, &mut diagnostics_task);
        let diagnostics = String::from_utf8_lossy(&diagnostics).trim().to_string();

        let stats = parse_time_stats(&String::from_utf8_lossy(
            &workspace.read_output(&workspace.stats_path(), STATS_READ_LIMIT)?,
        ));
        let output_limit = self.config.output_limit.to_bytes();
        let stdout = workspace.read_output(&workspace.stdout_path(), output_limit)?;
        let mut stderr = workspace.read_output(&workspace.stderr_path(), output_limit)?;

        // The shell inside the container reports a missing binary into stderr.txt
        let launch_diagnostics = if diagnostics.is_empty() && stats.exit_status.is_none() {
            String::from_utf8_lossy(&stderr).trim().to_string()
        } else {
            diagnostics.clone()
        };
        let exit_status =
            exit_status_from(status.code(), signal_of(&status), &stats, &launch_diagnostics);

        if let ExitStatus::LaunchFailed(reason) = &exit_status {
            log::error!("Container runtime failed to start {name}: {reason}");
            return Ok(ExecutionResult::launch_failed(reason.clone()));
        }

        let stderr_is_blank = stderr.iter().all(u8::is_ascii_whitespace);
        match exit_status {
            ExitStatus::Signaled(Signal::OutOfMemory) if stderr_is_blank => {
                stderr = OOM_MESSAGE.as_bytes().to_vec();
            }
            ExitStatus::Completed(COMMAND_NOT_EXECUTABLE_EXIT_CODE | COMMAND_NOT_FOUND_EXIT_CODE)
                if stderr_is_blank =>
            {
                stderr = diagnostics.into_bytes();
            }
            _ => {}
        }

        log::debug!("Container {name} finished with {exit_status:?} in {wall_time:?}");
        Ok(ExecutionResult {
            exit_status,
            stdout,
            stderr,
            wall_time,
            peak_memory: stats.peak_memory_kb.map(|kb| kb.saturating_mul(1024)),
        })
    }

    async fn preflight(&self) -> Result<()> {
        let runtime = self.config.runtime.join(" ");
        let mut command = self.runtime_command();
        command
            .arg("version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(PREFLIGHT_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                log::info!("Container runtime `{runtime}` is reachable");
                Ok(())
            }
            Ok(Ok(output)) => Err(SandboxError::LaunchFailed(format!(
                "`{runtime} version` exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Err(e)) => Err(SandboxError::LaunchFailed(format!("{runtime}: {e}"))),
            Err(_) => Err(SandboxError::LaunchFailed(format!(
                "`{runtime} version` did not answer within {PREFLIGHT_TIMEOUT:?}"
            ))),
        }
    }
}

/// Maps how the runtime client ended onto the sandbox's exit taxonomy
fn exit_status_from(
    code: Option<i32>,
    signal: Option<i32>,
    stats: &TimeStats,
    diagnostics: &str,
) -> ExitStatus {
    if let Some(signal) = stats.terminated_by_signal {
        // Nothing but the memory ceiling sends SIGKILL inside the container
        return ExitStatus::Signaled(if signal == SIGKILL {
            Signal::OutOfMemory
        } else {
            Signal::Other(signal)
        });
    }
    // A code `time` recorded is the program's own, whatever its value
    let program_ran = stats.exit_status.is_some();
    match code {
        Some(OOM_EXIT_CODE) if !program_ran => ExitStatus::Signaled(Signal::OutOfMemory),
        Some(
            code @ (RUNTIME_FAILURE_EXIT_CODE
            | COMMAND_NOT_EXECUTABLE_EXIT_CODE
            | COMMAND_NOT_FOUND_EXIT_CODE),
        ) if !program_ran => ExitStatus::LaunchFailed(if diagnostics.is_empty() {
            format!("runtime exited with code {code}")
        } else {
            diagnostics.to_string()
        }),
        Some(code) => ExitStatus::Completed(code),
        None => ExitStatus::Signaled(Signal::Other(signal.unwrap_or(0))),
    }
}

fn read_to_end<R>(mut reader: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Err(e) = reader.read_to_end(&mut buffer).await {
            log::debug!("Unable to read runtime diagnostics: {e}");
        }
        buffer
    })
}

fn abort(stdin_task: &mut Option<JoinHandle<()>>, diagnostics_task: &mut Option<JoinHandle<Vec<u8>>>) {
    if let Some(task) = stdin_task.take() {
        task.abort();
    }
    if let Some(task) = diagnostics_task.take() {
        task.abort();
    }
}

#[cfg(unix)]
fn signal_of(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

/// `uid:gid` of the host process, so files written in the workspace stay removable
#[cfg(unix)]
fn host_user() -> Option<String> {
    // SAFETY: getuid/getgid cannot fail and touch no memory
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    Some(format!("{uid}:{gid}"))
}

#[cfg(not(unix))]
fn host_user() -> Option<String> {
    None
}
