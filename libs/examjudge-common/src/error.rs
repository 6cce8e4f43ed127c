use thiserror::Error;

/// Failures the judging engine can hit while evaluating a submission.
///
/// None of these escape the test-case runner: each one is folded into the
/// verdict (submission-level variants) or into a failed case (case-level
/// variants).
#[derive(Error, Debug)]
pub enum JudgeError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("compile error: {0}")]
    CompileError(String),

    #[error("compile timed out after {0}ms")]
    CompileTimeout(u64),

    #[error("{0}")]
    RuntimeFailure(String),

    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("toolchain unavailable: `{program}` could not be started: {source}")]
    ToolchainUnavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("evaluation cancelled")]
    Cancelled,

    #[error("scratch I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JudgeError>;
