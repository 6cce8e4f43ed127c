//! Typed boundary for exam payloads produced by the sync layer.
//!
//! The exam service is loose about shapes: the exam may arrive wrapped in an
//! `{"exam": ...}` envelope or bare, a student's answers may be an object or a
//! JSON-encoded string, an individual answer may be an object or raw code, and
//! test cases may be a list or a JSON-encoded list. Everything is decoded here,
//! once, into [`BatchTask`]s and [`QuestionSpec`]s so the engine never looks at
//! untyped JSON.

use crate::error::JudgeError;
use crate::types::{Submission, TestCase};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROGRAMMING_QUESTION: &str = "PROGRAMMING";
pub const DEFAULT_LANGUAGE: &str = "cpp";
const UNKNOWN_STUDENT: &str = "unknown student";
const UNKNOWN_QUESTION: &str = "untitled question";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExamEnvelope {
    Wrapped { exam: ExamDocument },
    Bare(ExamDocument),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamDocument {
    #[serde(default)]
    pub title: String,
    /// Language every answer is judged in (`cpp` when absent)
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub results: Vec<StudentResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub test_cases: TestCasesField,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TestCasesField {
    List(Vec<TestCase>),
    Encoded(String),
}

impl Default for TestCasesField {
    fn default() -> Self {
        TestCasesField::List(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StudentField {
    Record { name: Option<String> },
    Other(IgnoredAny),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    #[serde(default)]
    pub student: Option<StudentField>,
    #[serde(default)]
    pub student_name: Option<String>,
    #[serde(default)]
    pub answers: AnswersField,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnswersField {
    Map(HashMap<String, AnswerPayload>),
    Encoded(String),
    Other(IgnoredAny),
}

impl Default for AnswersField {
    fn default() -> Self {
        AnswersField::Map(HashMap::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AnswerPayload {
    Structured(StructuredAnswer),
    Raw(String),
    Other(IgnoredAny),
}

/// Answer object; any other fields (such as a declared language) are ignored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructuredAnswer {
    #[serde(default)]
    pub code: Option<String>,
}

/// Test data and point value of one programming question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSpec {
    pub title: String,
    pub point_value: f64,
    pub test_cases: Vec<TestCase>,
}

/// Decoded input of one (student, question) task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskInput {
    Ready(Submission),
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchTask {
    pub student: String,
    pub question_id: String,
    pub question_title: String,
    pub language: String,
    pub input: TaskInput,
}

/// Parse an exam payload, accepting both the wrapped and the bare form
pub fn parse_exam(json: &str) -> Result<ExamDocument, JudgeError> {
    let envelope: ExamEnvelope = serde_json::from_str(json)
        .map_err(|e| JudgeError::MalformedInput(format!("exam payload: {}", e)))?;
    Ok(match envelope {
        ExamEnvelope::Wrapped { exam } => exam,
        ExamEnvelope::Bare(exam) => exam,
    })
}

impl Question {
    pub fn is_programming(&self) -> bool {
        self.kind == PROGRAMMING_QUESTION
    }

    /// Decoded test cases; an undecodable encoded list counts as no test cases
    pub fn test_cases(&self) -> Vec<TestCase> {
        match &self.test_cases {
            TestCasesField::List(cases) => cases.clone(),
            TestCasesField::Encoded(raw) => serde_json::from_str(raw).unwrap_or_default(),
        }
    }

    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            UNKNOWN_QUESTION
        } else {
            &self.title
        }
    }

    pub fn spec(&self) -> QuestionSpec {
        QuestionSpec {
            title: self.display_title().to_string(),
            point_value: self.points,
            test_cases: self.test_cases(),
        }
    }
}

impl StudentResult {
    pub fn student_display_name(&self) -> String {
        if let Some(StudentField::Record { name: Some(name) }) = &self.student {
            return name.clone();
        }
        self.student_name
            .clone()
            .unwrap_or_else(|| UNKNOWN_STUDENT.to_string())
    }

    fn answers(&self) -> Result<HashMap<String, AnswerPayload>, String> {
        match &self.answers {
            AnswersField::Map(map) => Ok(map.clone()),
            AnswersField::Encoded(raw) => serde_json::from_str(raw)
                .map_err(|e| format!("answers are not a JSON object: {}", e)),
            AnswersField::Other(_) => Err("answers are not a JSON object".to_string()),
        }
    }
}

impl AnswerPayload {
    /// Reduce the answer to its code. A raw string is decoded as a
    /// structured answer when it holds one, otherwise it is the code itself.
    fn resolve(&self) -> Result<StructuredAnswer, String> {
        match self {
            AnswerPayload::Structured(answer) => Ok(answer.clone()),
            AnswerPayload::Raw(raw) => match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(value @ serde_json::Value::Object(_)) => serde_json::from_value(value)
                    .map_err(|e| format!("answer payload: {}", e)),
                _ => Ok(StructuredAnswer {
                    code: Some(raw.clone()),
                }),
            },
            AnswerPayload::Other(_) => Err("answer is neither an object nor a string".to_string()),
        }
    }
}

impl ExamDocument {
    pub fn programming_questions(&self) -> impl Iterator<Item = &Question> {
        self.questions.iter().filter(|q| q.is_programming())
    }

    pub fn question_specs(&self) -> HashMap<String, QuestionSpec> {
        self.programming_questions()
            .map(|q| (q.id.clone(), q.spec()))
            .collect()
    }

    /// One task per (student, programming question) pair, in payload order
    pub fn tasks(&self) -> Vec<BatchTask> {
        let questions: Vec<&Question> = self.programming_questions().collect();
        let mut tasks = Vec::with_capacity(self.results.len() * questions.len());

        // Answers are judged in the exam's language, whatever they declare
        let language = self
            .language
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        for result in &self.results {
            let student = result.student_display_name();
            let answers = result.answers();

            for question in &questions {
                let input = match &answers {
                    Err(reason) => TaskInput::Malformed(reason.clone()),
                    Ok(map) => match map.get(&question.id).map(AnswerPayload::resolve) {
                        None => TaskInput::Malformed("no answer submitted".to_string()),
                        Some(Err(reason)) => TaskInput::Malformed(reason),
                        Some(Ok(answer)) => match answer.code {
                            Some(code) if !code.trim().is_empty() => TaskInput::Ready(Submission {
                                code,
                                language: language.clone(),
                                question_id: question.id.clone(),
                            }),
                            _ => TaskInput::Malformed("answer contains no code".to_string()),
                        },
                    },
                };

                tasks.push(BatchTask {
                    student: student.clone(),
                    question_id: question.id.clone(),
                    question_title: question.display_title().to_string(),
                    language: language.clone(),
                    input,
                });
            }
        }

        tasks
    }
}
