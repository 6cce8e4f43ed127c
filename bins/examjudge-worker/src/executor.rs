/// Test-Case Runner - High-Level Orchestration for one submission
///
/// **Responsibility:**
/// Coordinate the compiler stage, the sandbox executor and the evaluator to
/// turn a submission into a verdict.
///
/// **Flow:**
/// 1. Validate the request and resolve the toolchain
/// 2. Compile once into a private scratch directory (compiler.rs)
/// 3. Run every test case against the read-only artifact (engine.rs)
/// 4. Score the outcomes (evaluator.rs)
///
/// Every failure is folded into the returned `Verdict`; nothing escapes this
/// boundary. The scratch directory is removed on every path.
use crate::compiler::{self, MAX_SOURCE_CODE_BYTES};
use crate::config::{Toolchain, ToolchainRegistry};
use crate::engine;
use crate::evaluator::{self, CaseEvaluation};
use crate::scratch::ScratchDir;
use examjudge_common::config::EngineConfig;
use examjudge_common::error::JudgeError;
use examjudge_common::types::{EvaluationRequest, Submission, TestCase, Verdict};
use futures_util::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared cancellation signal. Once set, no new test case or task is launched;
/// children that are already running finish or hit their deadline.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct TestCaseRunner {
    registry: Arc<ToolchainRegistry>,
    config: Arc<EngineConfig>,
    cancel: CancelFlag,
}

impl TestCaseRunner {
    pub fn new(registry: Arc<ToolchainRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn evaluate_request(&self, request: &EvaluationRequest) -> Verdict {
        self.evaluate(&request.submission(), &request.test_cases, request.point_value)
            .await
    }

    /// Evaluate one submission against its test cases
    #[tracing::instrument(
        skip(self, submission, test_cases),
        fields(
            question_id = %submission.question_id,
            language = %submission.language,
            test_count = test_cases.len()
        )
    )]
    pub async fn evaluate(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
        point_value: f64,
    ) -> Verdict {
        let start = Instant::now();

        let verdict = match self.try_evaluate(submission, test_cases, point_value).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Evaluation failed");
                Verdict::evaluation_error(point_value, e.to_string())
            }
        };
        let verdict = verdict.with_execution_time(start.elapsed().as_millis() as u64);

        info!(
            status = %verdict.status,
            score = verdict.score,
            point_value,
            execution_ms = verdict.execution_time_ms,
            "Evaluation completed"
        );
        verdict
    }

    async fn try_evaluate(
        &self,
        submission: &Submission,
        test_cases: &[TestCase],
        point_value: f64,
    ) -> Result<Verdict, JudgeError> {
        if !point_value.is_finite() || point_value < 0.0 {
            return Err(JudgeError::InvalidRequest(format!(
                "point value must be a non-negative number, got {}",
                point_value
            )));
        }
        if test_cases.is_empty() {
            return Ok(Verdict::no_test_cases(point_value));
        }

        let toolchain = self.registry.resolve(&submission.language)?;
        if submission.code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(JudgeError::InvalidRequest(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }
        if self.cancel.is_cancelled() {
            return Err(JudgeError::Cancelled);
        }

        // Dropped on every exit path below, taking all artifacts with it
        let scratch = ScratchDir::create(&self.config.scratch_root)?;

        let artifact = compiler::compile(
            &submission.code,
            toolchain,
            &scratch,
            self.config.compile_timeout(),
        )
        .await?;
        debug!(
            source = %artifact.source_path.display(),
            compile_time_ms = artifact.compile_time_ms,
            "Submission prepared"
        );
        let Some(executable) = artifact.executable_path else {
            let message = artifact
                .compile_error
                .unwrap_or_else(|| "compilation failed".to_string());
            return Ok(Verdict::evaluation_error(point_value, message));
        };

        let evaluations = self.run_cases(toolchain, &executable, test_cases).await?;
        Ok(evaluator::aggregate(evaluations, point_value, 0))
    }

    /// Run all cases, at most `max_parallel_tests` at a time, keeping case order
    async fn run_cases(
        &self,
        toolchain: &Toolchain,
        executable: &Path,
        test_cases: &[TestCase],
    ) -> Result<Vec<CaseEvaluation>, JudgeError> {
        // Built up front so the stream holds plain futures rather than a
        // borrowing closure, keeping the whole evaluation `Send`
        let cases: Vec<_> = test_cases
            .iter()
            .enumerate()
            .map(|(i, test_case)| self.run_case(toolchain, executable, i + 1, test_case))
            .collect();

        let results: Vec<Result<CaseEvaluation, JudgeError>> = stream::iter(cases)
            .buffered(self.config.max_parallel_tests.max(1))
            .collect()
            .await;

        results.into_iter().collect()
    }

    async fn run_case(
        &self,
        toolchain: &Toolchain,
        executable: &Path,
        index: usize,
        test_case: &TestCase,
    ) -> Result<CaseEvaluation, JudgeError> {
        if self.cancel.is_cancelled() {
            return Err(JudgeError::Cancelled);
        }

        let outcome = engine::run(
            toolchain,
            executable,
            &test_case.input,
            self.config.run_timeout(),
        )
        .await?;

        Ok(evaluator::evaluate_case(index, test_case, &outcome))
    }
}
