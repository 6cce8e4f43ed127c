// Batch orchestration
// Fans the test-case runner out over every (student, programming question)
// task of an exam on a bounded pool and streams verdicts back as they finish.

use crate::executor::{CancelFlag, TestCaseRunner};
use chrono::Utc;
use examjudge_common::error::JudgeError;
use examjudge_common::payload::{BatchTask, QuestionSpec, TaskInput};
use examjudge_common::types::{Progress, TaskVerdict, Verdict};
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Source of test data for the questions referenced by batch tasks
pub trait TestCaseProvider: Send + Sync {
    fn question(&self, question_id: &str) -> Option<QuestionSpec>;
}

impl TestCaseProvider for HashMap<String, QuestionSpec> {
    fn question(&self, question_id: &str) -> Option<QuestionSpec> {
        self.get(question_id).cloned()
    }
}

/// Caller side of a running batch
pub struct BatchHandle {
    /// Task verdicts in completion order; closes when the batch is over
    pub verdicts: mpsc::Receiver<TaskVerdict>,
    pub progress: watch::Receiver<Progress>,
    cancel: CancelFlag,
}

impl BatchHandle {
    pub async fn next_verdict(&mut self) -> Option<TaskVerdict> {
        self.verdicts.recv().await
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Stop launching tasks and test cases; running children are left to finish
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }
}

/// Start judging `tasks` in the background.
///
/// At most `max_parallel_jobs` tasks are evaluated at once. Every launched
/// task produces exactly one verdict; a cancelled batch simply ends early.
pub fn run_batch(
    tasks: Vec<BatchTask>,
    provider: Arc<dyn TestCaseProvider>,
    runner: TestCaseRunner,
) -> BatchHandle {
    let total = tasks.len();
    let cancel = CancelFlag::new();
    let runner = runner.with_cancel_flag(cancel.clone());
    let max_jobs = runner.config().max_parallel_jobs.max(1);

    let (verdict_tx, verdict_rx) = mpsc::channel(max_jobs * 2);
    let (progress_tx, progress_rx) = watch::channel(Progress { completed: 0, total });

    info!(total, max_jobs, "Starting batch");

    let flag = cancel.clone();
    tokio::spawn(async move {
        stream::iter(tasks)
            .take_while(|_| future::ready(!flag.is_cancelled()))
            .map(|task| judge_task(runner.clone(), Arc::clone(&provider), task))
            .buffer_unordered(max_jobs)
            .for_each(|verdict| {
                let verdict_tx = verdict_tx.clone();
                let progress_tx = &progress_tx;
                async move {
                    if verdict_tx.send(verdict).await.is_err() {
                        debug!("Verdict receiver dropped");
                    }
                    progress_tx.send_modify(|p| p.completed += 1);
                    let progress = *progress_tx.borrow();
                    debug!(
                        completed = progress.completed,
                        total = progress.total,
                        "Batch progress"
                    );
                }
            })
            .await;

        let progress = *progress_tx.borrow();
        if flag.is_cancelled() {
            warn!(
                completed = progress.completed,
                total = progress.total,
                "Batch cancelled"
            );
        } else {
            info!(completed = progress.completed, "Batch finished");
        }
    });

    BatchHandle {
        verdicts: verdict_rx,
        progress: progress_rx,
        cancel,
    }
}

async fn judge_task(
    runner: TestCaseRunner,
    provider: Arc<dyn TestCaseProvider>,
    task: BatchTask,
) -> TaskVerdict {
    let verdict = match (provider.question(&task.question_id), &task.input) {
        (None, _) => {
            let e = JudgeError::InvalidRequest(format!("unknown question '{}'", task.question_id));
            warn!(student = %task.student, error = %e, "Skipping task");
            Verdict::evaluation_error(0.0, e.to_string())
        }
        (Some(spec), TaskInput::Malformed(reason)) => {
            let e = JudgeError::MalformedInput(reason.clone());
            warn!(
                student = %task.student,
                question_id = %task.question_id,
                error = %e,
                "Skipping task"
            );
            Verdict::evaluation_error(spec.point_value, e.to_string())
        }
        (Some(spec), TaskInput::Ready(submission)) => {
            let point_value = spec.point_value;
            let submission = submission.clone();
            // Own task so a panic stays inside this one verdict
            let handle = tokio::spawn(async move {
                runner
                    .evaluate(&submission, &spec.test_cases, spec.point_value)
                    .await
            });
            match handle.await {
                Ok(verdict) => verdict,
                Err(e) => {
                    error!(
                        student = %task.student,
                        question_id = %task.question_id,
                        error = %e,
                        "Evaluation task aborted"
                    );
                    Verdict::evaluation_error(point_value, format!("evaluation aborted: {}", e))
                }
            }
        }
    };

    TaskVerdict {
        student: task.student,
        question_id: task.question_id,
        question_title: task.question_title,
        language: task.language,
        verdict,
        completed_at: Utc::now(),
    }
}
