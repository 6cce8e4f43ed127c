/// Sandbox Executor - runs one program once against one stdin payload
///
/// **Execution Rules:**
/// 1. Exactly one child process per call, no reuse between test cases
/// 2. stdin is fed in full and then closed
/// 3. stdout/stderr are captured (capped at `MAX_OUTPUT_BYTES` each)
/// 4. The wall-clock deadline always wins: on expiry the whole process group
///    is killed and reaped, and the outcome is marked `timed_out`
/// 5. Any non-zero exit disqualifies the run, even if stdout was correct
///
/// The engine does NOT compare outputs or score anything; see evaluator.rs.
use crate::config::Toolchain;
use examjudge_common::error::JudgeError;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Safety limits to keep pathological submissions from exhausting memory
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB
pub const MAX_OUTPUT_BYTES: u64 = 16 * 1024 * 1024; // 16MB

/// How long pipe readers may lag behind process exit
const PIPE_GRACE: Duration = Duration::from_millis(500);

/// Raw result of one child process
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Result of running a submission against one test case
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub succeeded: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    /// `Timeout` or `RuntimeFailure` when the run did not succeed
    pub failure: Option<JudgeError>,
}

impl ExecutionOutcome {
    fn from_process(output: ProcessOutput, time_limit: Duration) -> Self {
        let failure = if output.timed_out {
            Some(JudgeError::Timeout(time_limit.as_millis() as u64))
        } else if output.exit_code != Some(0) {
            let detail = match (output.stderr.trim(), output.exit_code) {
                (stderr, _) if !stderr.is_empty() => stderr.to_string(),
                (_, Some(code)) => format!("process exited with code {}", code),
                (_, None) => "process terminated by a signal".to_string(),
            };
            Some(JudgeError::RuntimeFailure(detail))
        } else {
            None
        };

        Self {
            succeeded: failure.is_none(),
            stdout: output.stdout,
            stderr: output.stderr,
            timed_out: output.timed_out,
            exit_code: output.exit_code,
            execution_time_ms: output.elapsed_ms,
            failure,
        }
    }

    /// Message shown to callers when the run failed
    pub fn failure_message(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}

/// Run a prepared executable once with `stdin` under `time_limit`
#[tracing::instrument(
    skip(toolchain, executable, stdin),
    fields(language = %toolchain.name, timeout_ms = time_limit.as_millis() as u64)
)]
pub async fn run(
    toolchain: &Toolchain,
    executable: &Path,
    stdin: &str,
    time_limit: Duration,
) -> Result<ExecutionOutcome, JudgeError> {
    if stdin.len() > MAX_TEST_INPUT_BYTES {
        return Err(JudgeError::InvalidRequest(format!(
            "test input exceeds maximum size of {} bytes",
            MAX_TEST_INPUT_BYTES
        )));
    }

    let command = toolchain.run_command(executable);
    let workdir = executable.parent().unwrap_or_else(|| Path::new("."));
    let output = run_process(&command, workdir, Some(stdin), time_limit).await?;

    if output.timed_out {
        warn!(
            execution_time_ms = output.elapsed_ms,
            "Test execution timed out"
        );
    } else if output.exit_code != Some(0) {
        warn!(
            execution_time_ms = output.elapsed_ms,
            exit_code = ?output.exit_code,
            "Test execution had runtime error"
        );
    } else {
        debug!(
            execution_time_ms = output.elapsed_ms,
            "Test execution completed successfully"
        );
    }

    Ok(ExecutionOutcome::from_process(output, time_limit))
}

/// Spawn `command` in `workdir`, feed `stdin`, and wait at most `limit`.
///
/// Spawn failures surface as `ToolchainUnavailable`; everything the child does
/// after starting is reported through `ProcessOutput`.
pub async fn run_process(
    command: &[String],
    workdir: &Path,
    stdin: Option<&str>,
    limit: Duration,
) -> Result<ProcessOutput, JudgeError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| JudgeError::InvalidRequest("empty command".to_string()))?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(workdir)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| JudgeError::ToolchainUnavailable {
        program: program.clone(),
        source,
    })?;
    let pid = child.id();
    let start = Instant::now();

    let stdin_task = match (child.stdin.take(), stdin) {
        (Some(mut pipe), Some(data)) => {
            let data = data.as_bytes().to_vec();
            Some(tokio::spawn(async move {
                // The program may exit without reading its input
                let _ = pipe.write_all(&data).await;
                let _ = pipe.shutdown().await;
            }))
        }
        _ => None,
    };
    let stdout_task = tokio::spawn(read_capped(child.stdout.take()));
    let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

    let (status, timed_out) = match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            warn!(program = %program, error = %e, "Failed to wait for child process");
            (None, false)
        }
        Err(_) => {
            debug!(program = %program, timeout_ms = limit.as_millis() as u64, "Deadline reached, killing child");
            kill_group(pid);
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Child already gone when killed");
            }
            (None, true)
        }
    };
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if let Some(task) = stdin_task {
        task.abort();
    }

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;

    Ok(ProcessOutput {
        stdout,
        stderr,
        exit_code: status.as_ref().and_then(ExitStatus::code),
        timed_out,
        elapsed_ms,
    })
}

async fn read_capped<R>(pipe: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        if let Err(e) = pipe.take(MAX_OUTPUT_BYTES).read_to_end(&mut buf).await {
            debug!(error = %e, "Pipe read ended with error");
        }
    }
    buf
}

async fn collect(mut task: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(PIPE_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        // ESRCH just means the group is already empty
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
