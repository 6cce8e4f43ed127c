/// Test Evaluator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Compare execution outcomes against expected outputs and turn pass counts
/// into a verdict.
///
/// **Critical Properties:**
/// - Knows nothing about processes or toolchains
/// - Pure functions: (outcomes, expected outputs, point value) → verdict
///
/// **Scoring Rules:**
/// - All cases passed: `Passed`, full point value
/// - Some cases passed: `PartiallyPassed(p/m)`, `(p/m) * points` rounded to one decimal
/// - No case passed: `Failed`, zero
/// - No cases at all: `NoTestCases`, zero
///
/// **Normalization Rules:**
/// - Leading and trailing whitespace is ignored
/// - Internal whitespace and case are significant
use crate::engine::ExecutionOutcome;
use examjudge_common::types::{CaseReport, CaseStatus, TestCase, Verdict, VerdictStatus};

/// Number of failing cases described in a verdict's error summary
pub const MAX_REPORTED_FAILURES: usize = 3;

/// Evaluation of a single test case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseEvaluation {
    pub report: CaseReport,
    /// Human-readable failure line, None when the case passed
    pub error: Option<String>,
}

impl CaseEvaluation {
    pub fn passed(&self) -> bool {
        self.report.status == CaseStatus::Passed
    }
}

/// Normalize output string for comparison
fn normalize_output(output: &str) -> &str {
    output.trim()
}

/// Judge one execution outcome against its test case.
///
/// A run that did not succeed never passes, even when its stdout matches.
/// `index` is the 1-based case position used in messages.
pub fn evaluate_case(index: usize, test_case: &TestCase, outcome: &ExecutionOutcome) -> CaseEvaluation {
    let (status, error) = if !outcome.succeeded {
        let status = if outcome.timed_out {
            CaseStatus::TimeLimitExceeded
        } else {
            CaseStatus::RuntimeError
        };
        let detail = outcome
            .failure_message()
            .unwrap_or_else(|| "program execution failed".to_string());
        (
            status,
            Some(format!(
                "Test case {} execution error: input '{}', error '{}'",
                index, test_case.input, detail
            )),
        )
    } else {
        let actual = normalize_output(&outcome.stdout);
        let expected = normalize_output(&test_case.expected_output);

        if actual == expected {
            (CaseStatus::Passed, None)
        } else {
            (
                CaseStatus::WrongAnswer,
                Some(format!(
                    "Test case {} failed: input '{}', expected '{}', actual '{}'",
                    index, test_case.input, expected, actual
                )),
            )
        }
    };

    CaseEvaluation {
        report: CaseReport {
            index,
            status,
            execution_time_ms: outcome.execution_time_ms,
        },
        error,
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Convert pass counts and a point value into status and score
pub fn score(passed_cases: usize, total_cases: usize, point_value: f64) -> (VerdictStatus, f64) {
    if total_cases == 0 {
        (VerdictStatus::NoTestCases, 0.0)
    } else if passed_cases == 0 {
        (VerdictStatus::Failed, 0.0)
    } else if passed_cases >= total_cases {
        (VerdictStatus::Passed, point_value)
    } else {
        let ratio = passed_cases as f64 / total_cases as f64;
        (
            VerdictStatus::PartiallyPassed {
                passed: passed_cases,
                total: total_cases,
            },
            partial_score(ratio * point_value, point_value),
        )
    }
}

/// Rounded to one decimal but kept strictly between zero and the point
/// value, so only a full pass earns full marks and any pass earns something
fn partial_score(raw: f64, point_value: f64) -> f64 {
    let rounded = round_one_decimal(raw);
    if rounded > 0.0 && rounded < point_value {
        rounded
    } else if point_value > 0.2 {
        rounded.clamp(0.1, round_one_decimal(point_value - 0.1))
    } else {
        raw
    }
}

/// Join the first failures into the verdict's error summary
pub fn error_summary(evaluations: &[CaseEvaluation]) -> String {
    evaluations
        .iter()
        .filter_map(|e| e.error.as_deref())
        .take(MAX_REPORTED_FAILURES)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Aggregate case evaluations into the final verdict
pub fn aggregate(
    evaluations: Vec<CaseEvaluation>,
    point_value: f64,
    execution_time_ms: u64,
) -> Verdict {
    let total = evaluations.len();
    let passed = evaluations.iter().filter(|e| e.passed()).count();
    let (status, score) = score(passed, total, point_value);

    tracing::debug!(passed, total, score, status = %status, "Evaluation complete");

    Verdict {
        status,
        score,
        point_value,
        execution_time_ms,
        error_summary: error_summary(&evaluations),
        cases: evaluations.into_iter().map(|e| e.report).collect(),
    }
}
