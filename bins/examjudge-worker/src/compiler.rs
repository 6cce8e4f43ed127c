/// Compiler Stage
///
/// Writes the submission into its scratch directory and, for compiled
/// languages, runs the toolchain's compile command once under a bounded
/// timeout. The resulting artifact lives next to the source, so dropping the
/// owning `ScratchDir` removes both.
use crate::config::Toolchain;
use crate::engine::run_process;
use crate::scratch::ScratchDir;
use examjudge_common::error::JudgeError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Safety limit to keep pathological submissions away from the compiler
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB

#[derive(Debug, Clone, PartialEq)]
pub struct CompileArtifact {
    pub source_path: PathBuf,
    /// What the run command executes; the source itself for interpreted languages
    pub executable_path: Option<PathBuf>,
    pub compile_error: Option<String>,
    pub compile_time_ms: u64,
}

impl CompileArtifact {
    fn success(source_path: PathBuf, executable_path: PathBuf, compile_time_ms: u64) -> Self {
        Self {
            source_path,
            executable_path: Some(executable_path),
            compile_error: None,
            compile_time_ms,
        }
    }

    fn failure(source_path: PathBuf, error: JudgeError, compile_time_ms: u64) -> Self {
        Self {
            source_path,
            executable_path: None,
            compile_error: Some(error.to_string()),
            compile_time_ms,
        }
    }
}

/// Prepare `source` for execution.
///
/// Compiler rejections and timeouts come back as a failed `CompileArtifact`;
/// `Err` is reserved for scratch I/O problems and a missing compiler binary.
#[tracing::instrument(skip(source, toolchain, scratch), fields(language = %toolchain.name))]
pub async fn compile(
    source: &str,
    toolchain: &Toolchain,
    scratch: &ScratchDir,
    timeout: Duration,
) -> Result<CompileArtifact, JudgeError> {
    let source_path = scratch
        .write_file(&toolchain.source_file_name(source), source)
        .await?;

    let Some(command) = toolchain.compile_command(&source_path) else {
        return Ok(CompileArtifact::success(source_path.clone(), source_path, 0));
    };

    let output = run_process(&command, scratch.path(), None, timeout).await?;
    let compile_time_ms = output.elapsed_ms;

    if output.timed_out {
        let timeout_ms = timeout.as_millis() as u64;
        warn!(compile_time_ms, timeout_ms, "Compilation timed out");
        return Ok(CompileArtifact::failure(
            source_path,
            JudgeError::CompileTimeout(timeout_ms),
            compile_time_ms,
        ));
    }

    if !output.success() {
        let message = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        warn!(
            compile_time_ms,
            exit_code = ?output.exit_code,
            error_preview = message.lines().next().unwrap_or(""),
            "Compilation failed"
        );
        return Ok(CompileArtifact::failure(
            source_path,
            JudgeError::CompileError(message),
            compile_time_ms,
        ));
    }

    let executable_path = toolchain.artifact_path(&source_path);
    if !executable_path.exists() {
        warn!(
            artifact = %executable_path.display(),
            "Compiler exited cleanly without producing an artifact"
        );
        return Ok(CompileArtifact::failure(
            source_path,
            JudgeError::CompileError("compiler produced no artifact".to_string()),
            compile_time_ms,
        ));
    }

    info!(compile_time_ms, "Compilation succeeded");
    Ok(CompileArtifact::success(source_path, executable_path, compile_time_ms))
}
