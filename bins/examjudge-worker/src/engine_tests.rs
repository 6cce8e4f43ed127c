/// End-to-end tests for the judging pipeline
///
/// These tests drive the full path from request to verdict:
/// 1. Toolchain resolution and compile-once preparation
/// 2. One child process per test case
/// 3. Scoring and error summaries
/// 4. Scratch cleanup on every path
/// 5. Exam payload decoding feeding the batch orchestrator
///
/// Tests that need python3, node, gcc, g++ or a JDK are ignored by default.

#[cfg(all(test, unix))]
mod pipeline_tests {
    use crate::config::ToolchainRegistry;
    use crate::executor::TestCaseRunner;
    use crate::runner::{run_batch, TestCaseProvider};
    use examjudge_common::config::EngineConfig;
    use examjudge_common::payload::parse_exam;
    use examjudge_common::types::{
        CaseStatus, EvaluationRequest, Submission, TaskVerdict, TestCase, VerdictStatus,
    };
    use std::path::Path;
    use std::sync::Arc;

    fn runner_in(root: &Path) -> TestCaseRunner {
        let config = EngineConfig {
            scratch_root: root.to_path_buf(),
            run_timeout_ms: 5_000,
            compile_timeout_ms: 30_000,
            max_parallel_jobs: 2,
            ..EngineConfig::default()
        };
        TestCaseRunner::new(Arc::new(ToolchainRegistry::builtin().unwrap()), config)
    }

    fn submission(language: &str, code: &str) -> Submission {
        Submission {
            code: code.to_string(),
            language: language.to_string(),
            question_id: "q".to_string(),
        }
    }

    fn assert_scratch_empty(root: &Path) {
        let leftovers: Vec<_> = std::fs::read_dir(root)
            .map(|d| d.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        assert!(leftovers.is_empty(), "scratch left behind: {:?}", leftovers);
    }

    /// Test: the echo-sum program passes and leaves nothing behind
    #[tokio::test]
    async fn test_echo_sum_request() {
        let root = tempfile::tempdir().unwrap();
        let request = EvaluationRequest {
            code: "read a b\necho $((a + b))\n".to_string(),
            language: "bash".to_string(),
            test_cases: vec![TestCase::new("3 4", "7")],
            point_value: 10.0,
            question_id: Some("sum".to_string()),
        };

        let verdict = runner_in(root.path()).evaluate_request(&request).await;

        assert_eq!(verdict.status, VerdictStatus::Passed);
        assert_eq!(verdict.score, 10.0);
        assert_eq!(verdict.cases.len(), 1);
        assert_eq!(verdict.cases[0].status, CaseStatus::Passed);
        assert_scratch_empty(root.path());
    }

    /// Test: scratch files are gone after every kind of outcome
    #[tokio::test]
    async fn test_scratch_removed_on_every_path() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner_in(root.path());
        let cases = [TestCase::new("", "ok")];

        for code in ["echo ok\n", "echo bad\n", "exit 4\n", "cat /no/such/file\n"] {
            runner.evaluate(&submission("sh", code), &cases, 1.0).await;
            assert_scratch_empty(root.path());
        }
        runner.evaluate(&submission("rust", "fn main() {}"), &cases, 1.0).await;
        assert_scratch_empty(root.path());
    }

    /// Test: concurrent submissions never see each other's artifacts
    #[tokio::test]
    async fn test_concurrent_submissions_are_isolated() {
        let root = tempfile::tempdir().unwrap();
        let runner = runner_in(root.path());
        let code = "ls | wc -l\n";
        let cases = [TestCase::new("", "1")];

        let a = submission("sh", code);
        let b = submission("sh", code);
        let (first, second) = tokio::join!(
            runner.evaluate(&a, &cases, 1.0),
            runner.evaluate(&b, &cases, 1.0)
        );

        assert!(first.is_passed());
        assert!(second.is_passed());
        assert_scratch_empty(root.path());
    }

    /// Test: exam payload through the batch orchestrator
    #[tokio::test]
    async fn test_exam_batch_end_to_end() {
        let root = tempfile::tempdir().unwrap();
        let payload = serde_json::json!({
            "exam": {
                "title": "Midterm",
                "language": "sh",
                "questions": [
                    {
                        "_id": "q-sum",
                        "type": "PROGRAMMING",
                        "title": "Sum",
                        "points": 10,
                        "testCases": "[{\"input\":\"3 4\",\"expectedOutput\":\"7\"},{\"input\":\"1 1\",\"expectedOutput\":\"2\"}]"
                    },
                    { "_id": "q-mc", "type": "MULTIPLE_CHOICE", "title": "Pick", "points": 2 }
                ],
                "results": [
                    {
                        "student": { "name": "Ada" },
                        "answers": { "q-sum": { "code": "read a b\necho $((a + b))\n" } }
                    },
                    {
                        "studentName": "Bob",
                        "answers": "{\"q-sum\": \"echo 7\"}"
                    },
                    {
                        "student": { "name": "Cyd" },
                        "answers": {}
                    }
                ]
            }
        });
        let exam = parse_exam(&payload.to_string()).unwrap();
        let provider: Arc<dyn TestCaseProvider> = Arc::new(exam.question_specs());

        let mut handle = run_batch(exam.tasks(), provider, runner_in(root.path()));
        let mut verdicts: Vec<TaskVerdict> = Vec::new();
        while let Some(verdict) = handle.next_verdict().await {
            verdicts.push(verdict);
        }
        verdicts.sort_by(|a, b| a.student.cmp(&b.student));

        assert_eq!(handle.progress().completed, 3);
        assert_eq!(handle.progress().total, 3);

        assert_eq!(verdicts[0].student, "Ada");
        assert_eq!(verdicts[0].question_title, "Sum");
        assert_eq!(verdicts[0].verdict.status, VerdictStatus::Passed);
        assert_eq!(verdicts[0].verdict.score, 10.0);

        assert_eq!(verdicts[1].student, "Bob");
        assert_eq!(
            verdicts[1].verdict.status,
            VerdictStatus::PartiallyPassed { passed: 1, total: 2 }
        );
        assert_eq!(verdicts[1].verdict.score, 5.0);

        assert_eq!(verdicts[2].student, "Cyd");
        assert_eq!(verdicts[2].verdict.status, VerdictStatus::EvaluationError);
        assert_eq!(
            verdicts[2].verdict.error_summary,
            "malformed input: no answer submitted"
        );
        assert_scratch_empty(root.path());
    }

    /// Test: Python submission with several test cases
    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_python_partial_credit() {
        let root = tempfile::tempdir().unwrap();
        let code = "n = int(input())\nprint(n * 2 if n < 10 else n)\n";
        let cases = [
            TestCase::new("5", "10"),
            TestCase::new("10", "20"),
            TestCase::new("15", "30"),
        ];

        let verdict = runner_in(root.path())
            .evaluate(&submission("Python", code), &cases, 9.0)
            .await;

        assert_eq!(verdict.status, VerdictStatus::PartiallyPassed { passed: 1, total: 3 });
        assert_eq!(verdict.score, 3.0);
        assert!(verdict.error_summary.starts_with("Test case 2 failed"));
        assert_scratch_empty(root.path());
    }

    /// Test: Python exception is a runtime error with the traceback as detail
    #[tokio::test]
    #[ignore] // Requires python3
    async fn test_python_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let verdict = runner_in(root.path())
            .evaluate(
                &submission("py", "print(1)\nraise ValueError('boom')\n"),
                &[TestCase::new("", "1")],
                5.0,
            )
            .await;

        assert_eq!(verdict.status, VerdictStatus::Failed);
        assert_eq!(verdict.cases[0].status, CaseStatus::RuntimeError);
        assert!(verdict.error_summary.contains("ValueError: boom"));
    }

    /// Test: JavaScript reads stdin through node
    #[tokio::test]
    #[ignore] // Requires node
    async fn test_javascript_echo_sum() {
        let root = tempfile::tempdir().unwrap();
        let code = r#"
const [a, b] = require('fs').readFileSync(0, 'utf8').trim().split(/\s+/).map(Number);
console.log(a + b);
"#;
        let verdict = runner_in(root.path())
            .evaluate(&submission("js", code), &[TestCase::new("3 4", "7")], 4.0)
            .await;

        assert!(verdict.is_passed());
    }

    /// Test: C++ compiles once and runs every case
    #[tokio::test]
    #[ignore] // Requires g++
    async fn test_cpp_compile_once() {
        let root = tempfile::tempdir().unwrap();
        let code = r#"
#include <iostream>
int main() { long a, b; std::cin >> a >> b; std::cout << a + b << std::endl; }
"#;
        let cases = [TestCase::new("3 4", "7"), TestCase::new("-1 1", "0")];

        let verdict = runner_in(root.path())
            .evaluate(&submission("C++", code), &cases, 10.0)
            .await;

        assert_eq!(verdict.status, VerdictStatus::Passed);
        assert_scratch_empty(root.path());
    }

    /// Test: C compile errors are reported and nothing runs
    #[tokio::test]
    #[ignore] // Requires gcc
    async fn test_c_compile_error() {
        let root = tempfile::tempdir().unwrap();
        let verdict = runner_in(root.path())
            .evaluate(
                &submission("c", "int main( { return 0; }"),
                &[TestCase::new("", "")],
                10.0,
            )
            .await;

        assert_eq!(verdict.status, VerdictStatus::EvaluationError);
        assert_eq!(verdict.score, 0.0);
        assert!(verdict.error_summary.starts_with("compile error:"));
        assert!(verdict.cases.is_empty());
        assert_scratch_empty(root.path());
    }

    /// Test: Java source is named after its public class
    #[tokio::test]
    #[ignore] // Requires a JDK
    async fn test_java_public_class() {
        let root = tempfile::tempdir().unwrap();
        let code = r#"
import java.util.Scanner;

public class Solution {
    public static void main(String[] args) {
        Scanner in = new Scanner(System.in);
        System.out.println(in.nextInt() + in.nextInt());
    }
}
"#;
        let verdict = runner_in(root.path())
            .evaluate(&submission("java", code), &[TestCase::new("3 4", "7")], 10.0)
            .await;

        assert!(verdict.is_passed(), "{}", verdict.error_summary);
        assert_scratch_empty(root.path());
    }
}
