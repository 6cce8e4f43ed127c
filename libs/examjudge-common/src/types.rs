use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Student code handed to the engine. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub code: String,
    /// Raw language identifier, resolved case-insensitively by the toolchain registry
    pub language: String,
    pub question_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// Input bundle for a single evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub point_value: f64,
    #[serde(default)]
    pub question_id: Option<String>,
}

impl EvaluationRequest {
    pub fn submission(&self) -> Submission {
        Submission {
            code: self.code.clone(),
            language: self.language.clone(),
            question_id: self.question_id.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VerdictStatus {
    Passed,
    PartiallyPassed { passed: usize, total: usize },
    Failed,
    NoTestCases,
    EvaluationError,
}

impl fmt::Display for VerdictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictStatus::Passed => write!(f, "Passed"),
            VerdictStatus::PartiallyPassed { passed, total } => {
                write!(f, "Partially passed ({}/{})", passed, total)
            }
            VerdictStatus::Failed => write!(f, "Failed"),
            VerdictStatus::NoTestCases => write!(f, "No test cases"),
            VerdictStatus::EvaluationError => write!(f, "Evaluation error"),
        }
    }
}

/// Outcome of one test case after output comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Passed,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseReport {
    /// 1-based position of the case in the question's test list
    pub index: usize,
    pub status: CaseStatus,
    pub execution_time_ms: u64,
}

/// Engine output for one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub status: VerdictStatus,
    pub score: f64,
    pub point_value: f64,
    pub execution_time_ms: u64,
    /// First three case failures joined with "; ", or the submission-level error
    pub error_summary: String,
    #[serde(default)]
    pub cases: Vec<CaseReport>,
}

impl Verdict {
    pub fn evaluation_error(point_value: f64, message: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::EvaluationError,
            score: 0.0,
            point_value,
            execution_time_ms: 0,
            error_summary: message.into(),
            cases: Vec::new(),
        }
    }

    pub fn no_test_cases(point_value: f64) -> Self {
        Self {
            status: VerdictStatus::NoTestCases,
            score: 0.0,
            point_value,
            execution_time_ms: 0,
            error_summary: "no test cases configured for this question".to_string(),
            cases: Vec::new(),
        }
    }

    pub fn with_execution_time(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == VerdictStatus::Passed
    }
}

/// Verdict of one (student, programming question) task in a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskVerdict {
    pub student: String,
    pub question_id: String,
    pub question_title: String,
    pub language: String,
    pub verdict: Verdict,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 * 100.0 / self.total as f64
    }
}
