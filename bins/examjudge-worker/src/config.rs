// Language toolchain registry for the judging engine
use anyhow::{bail, Context, Result};
use examjudge_common::error::JudgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default toolchain table, compiled into the binary
const BUILTIN_LANGUAGES: &str = include_str!("../../../config/languages.json");

const FALLBACK_STEM: &str = "main";
const FALLBACK_CLASS: &str = "Main";

/// How the scratch source file is named
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceNaming {
    /// `main.<ext>`
    #[default]
    Fixed,
    /// Named after the top-level `public class`, as javac requires
    PublicClass,
}

/// Compile and run recipe for one language.
///
/// Command templates accept the placeholders `{source}`, `{output}`,
/// `{executable}`, `{dir}` and `{stem}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchain {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub file_extension: String,
    #[serde(default)]
    pub source_naming: SourceNaming,
    #[serde(default)]
    pub compile: Option<Vec<String>>,
    /// Extension of the compiled artifact, derived from the source path
    #[serde(default)]
    pub artifact_extension: Option<String>,
    pub run: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LanguagesJson {
    languages: Vec<Toolchain>,
}

impl Toolchain {
    pub fn needs_compile(&self) -> bool {
        self.compile.is_some()
    }

    /// File name the submission's source is written to
    pub fn source_file_name(&self, code: &str) -> String {
        let stem = match self.source_naming {
            SourceNaming::Fixed => FALLBACK_STEM.to_string(),
            SourceNaming::PublicClass => {
                detect_class_name(code).unwrap_or_else(|| FALLBACK_CLASS.to_string())
            }
        };
        format!("{}.{}", stem, self.file_extension)
    }

    /// Artifact location; for interpreted languages this is the source itself
    pub fn artifact_path(&self, source: &Path) -> PathBuf {
        match &self.artifact_extension {
            Some(ext) => source.with_extension(ext),
            None => source.to_path_buf(),
        }
    }

    pub fn compile_command(&self, source: &Path) -> Option<Vec<String>> {
        let template = self.compile.as_ref()?;
        let output = self.artifact_path(source);
        Some(expand(template, &Placeholders::new(source, &output, &output)))
    }

    pub fn run_command(&self, executable: &Path) -> Vec<String> {
        expand(&self.run, &Placeholders::new(executable, executable, executable))
    }

    fn keys(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|key| normalize(key))
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Toolchain with an empty name");
        }
        if self.file_extension.trim().is_empty() {
            bail!("Toolchain '{}' has no file extension", self.name);
        }
        if self.run.is_empty() {
            bail!("Toolchain '{}' has an empty run command", self.name);
        }
        match (&self.compile, &self.artifact_extension) {
            (Some(cmd), _) if cmd.is_empty() => {
                bail!("Toolchain '{}' has an empty compile command", self.name)
            }
            (Some(_), None) => bail!(
                "Toolchain '{}' compiles but declares no artifact_extension",
                self.name
            ),
            (None, Some(_)) => bail!(
                "Toolchain '{}' declares an artifact_extension without a compile command",
                self.name
            ),
            _ => Ok(()),
        }
    }
}

struct Placeholders {
    values: [(&'static str, String); 5],
}

impl Placeholders {
    fn new(source: &Path, output: &Path, executable: &Path) -> Self {
        let dir = executable
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".".to_string());
        let stem = executable
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            values: [
                ("{source}", source.to_string_lossy().into_owned()),
                ("{output}", output.to_string_lossy().into_owned()),
                ("{executable}", executable.to_string_lossy().into_owned()),
                ("{dir}", dir),
                ("{stem}", stem),
            ],
        }
    }
}

fn expand(template: &[String], placeholders: &Placeholders) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            placeholders
                .values
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect()
}

fn normalize(language: &str) -> String {
    language.trim().to_lowercase()
}

/// Class a Java source must be named after: the top-level `public class`,
/// otherwise the first top-level class. Nested classes never count.
fn detect_class_name(code: &str) -> Option<String> {
    let mut first = None;
    for declaration in top_level_text(code).split(['{', ';']) {
        let tokens: Vec<&str> = declaration.split_whitespace().collect();
        let Some(pos) = tokens.iter().position(|t| *t == "class") else {
            continue;
        };
        let Some(name) = tokens.get(pos + 1).and_then(|t| java_identifier(t)) else {
            continue;
        };
        if tokens[..pos].contains(&"public") {
            return Some(name);
        }
        if first.is_none() {
            first = Some(name);
        }
    }
    first
}

fn java_identifier(token: &str) -> Option<String> {
    let name: String = token
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
        .collect();
    name.chars()
        .next()
        .is_some_and(|c| !c.is_ascii_digit())
        .then_some(name)
}

/// Source text at brace depth 0 with comments and literals removed. Each
/// top-level block is replaced by `{` so declarations stay separated.
fn top_level_text(code: &str) -> String {
    enum State {
        Code,
        LineComment,
        BlockComment,
        Literal(char),
    }

    let mut out = String::new();
    let mut state = State::Code;
    let mut depth = 0usize;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                    out.push(' ');
                }
            }
            State::Literal(quote) => {
                if c == '\\' {
                    chars.next();
                } else if c == quote {
                    state = State::Code;
                }
            }
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                }
                '"' | '\'' => state = State::Literal(c),
                '{' => {
                    if depth == 0 {
                        out.push('{');
                    }
                    depth += 1;
                }
                '}' => depth = depth.saturating_sub(1),
                _ if depth == 0 => out.push(c),
                _ => {}
            },
        }
    }
    out
}

/// Read-only lookup table from language identifier to toolchain
#[derive(Debug, Clone)]
pub struct ToolchainRegistry {
    toolchains: Vec<Toolchain>,
    index: HashMap<String, usize>,
}

impl ToolchainRegistry {
    /// Load toolchains from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;
        Self::from_json(&content)
    }

    /// The toolchain table shipped with the binary
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_LANGUAGES).context("Built-in language table is invalid")
    }

    /// `JUDGE_LANGUAGES` when set, the built-in table otherwise
    pub fn load_default() -> Result<Self> {
        match std::env::var("JUDGE_LANGUAGES") {
            Ok(path) if !path.trim().is_empty() => Self::load(Path::new(&path)),
            _ => Self::builtin(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let mut index = HashMap::new();
        for (position, toolchain) in languages_json.languages.iter().enumerate() {
            toolchain.validate()?;
            for key in toolchain.keys() {
                if index.insert(key.clone(), position).is_some() {
                    bail!("Language identifier '{}' is declared twice", key);
                }
            }
        }
        if index.is_empty() {
            bail!("No languages configured in languages.json");
        }

        Ok(Self {
            toolchains: languages_json.languages,
            index,
        })
    }

    /// Resolve a language identifier, ignoring case and surrounding whitespace
    pub fn resolve(&self, language: &str) -> Result<&Toolchain, JudgeError> {
        self.index
            .get(&normalize(language))
            .map(|&position| &self.toolchains[position])
            .ok_or_else(|| JudgeError::UnsupportedLanguage(language.trim().to_string()))
    }

    /// Canonical names of all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        self.toolchains.iter().map(|t| t.name.clone()).collect()
    }

    pub fn toolchains(&self) -> &[Toolchain] {
        &self.toolchains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolchainRegistry {
        ToolchainRegistry::builtin().expect("built-in table parses")
    }

    #[test]
    fn test_builtin_languages() {
        let languages = registry().list_languages();
        for name in ["python", "javascript", "sh", "c", "cpp", "java"] {
            assert!(languages.contains(&name.to_string()), "missing {}", name);
        }
    }

    #[test]
    fn test_resolve_is_case_insensitive() {
        let registry = registry();
        assert_eq!(registry.resolve("Python").unwrap().name, "python");
        assert_eq!(registry.resolve("  C++ ").unwrap().name, "cpp");
        assert_eq!(registry.resolve("JS").unwrap().name, "javascript");
    }

    #[test]
    fn test_unknown_language() {
        match registry().resolve("cobol") {
            Err(JudgeError::UnsupportedLanguage(name)) => assert_eq!(name, "cobol"),
            other => panic!("expected UnsupportedLanguage, got {:?}", other.map(|t| &t.name)),
        }
    }

    #[test]
    fn test_interpreted_commands() {
        let registry = registry();
        let python = registry.resolve("python").unwrap();
        let source = Path::new("/tmp/job/main.py");

        assert!(!python.needs_compile());
        assert_eq!(python.source_file_name("print(1)"), "main.py");
        assert!(python.compile_command(source).is_none());
        assert_eq!(python.artifact_path(source), source);
        assert_eq!(python.run_command(source), vec!["python3", "/tmp/job/main.py"]);
    }

    #[test]
    fn test_compiled_commands() {
        let registry = registry();
        let cpp = registry.resolve("cpp").unwrap();
        let source = Path::new("/tmp/job/main.cpp");

        assert_eq!(
            cpp.compile_command(source).unwrap(),
            vec!["g++", "/tmp/job/main.cpp", "-o", "/tmp/job/main.out"]
        );
        assert_eq!(cpp.artifact_path(source), Path::new("/tmp/job/main.out"));
        assert_eq!(cpp.run_command(Path::new("/tmp/job/main.out")), vec!["/tmp/job/main.out"]);
    }

    #[test]
    fn test_java_class_naming() {
        let registry = registry();
        let java = registry.resolve("java").unwrap();
        let code = "import java.util.*;\npublic final class Solver {\n}\n";

        assert_eq!(java.source_file_name(code), "Solver.java");
        assert_eq!(java.source_file_name("class Hidden {}"), "Hidden.java");
        assert_eq!(java.source_file_name("int x;"), "Main.java");

        let class_file = java.artifact_path(Path::new("/tmp/job/Solver.java"));
        assert_eq!(class_file, Path::new("/tmp/job/Solver.class"));
        assert_eq!(
            java.run_command(&class_file),
            vec!["java", "-cp", "/tmp/job", "Solver"]
        );
    }

    #[test]
    fn test_detect_class_name() {
        assert_eq!(detect_class_name("public class Main{"), Some("Main".to_string()));
        assert_eq!(detect_class_name("public class 9Bad {}"), None);
        assert_eq!(detect_class_name("// nothing here"), None);
        assert_eq!(
            detect_class_name("public class Box<T> extends Base {}"),
            Some("Box".to_string())
        );
    }

    #[test]
    fn test_nested_public_class_is_ignored() {
        let code = "import java.util.*;\n\nclass Main {\n    public static class Pair {\n        int a, b;\n    }\n\n    public static void main(String[] args) {}\n}\n";
        assert_eq!(detect_class_name(code), Some("Main".to_string()));

        let registry = registry();
        let java = registry.resolve("java").unwrap();
        assert_eq!(java.source_file_name(code), "Main.java");
    }

    #[test]
    fn test_class_keyword_in_comments_and_strings_is_ignored() {
        let code = r#"
// public class Commented {}
/* public class Blocked { } */
class Helper {
    String s = "public class Quoted {";
    char c = '{';
}

public class Solution {
    public static void main(String[] args) {}
}
"#;
        assert_eq!(detect_class_name(code), Some("Solution".to_string()));
    }

    #[test]
    fn test_rejects_duplicates_and_bad_entries() {
        let duplicate = r#"{"languages": [
            {"name": "a", "file_extension": "x", "run": ["x"]},
            {"name": "b", "aliases": ["A"], "file_extension": "y", "run": ["y"]}
        ]}"#;
        assert!(ToolchainRegistry::from_json(duplicate).is_err());

        let no_artifact = r#"{"languages": [
            {"name": "c", "file_extension": "c", "compile": ["gcc", "{source}"], "run": ["x"]}
        ]}"#;
        assert!(ToolchainRegistry::from_json(no_artifact).is_err());

        assert!(ToolchainRegistry::from_json(r#"{"languages": []}"#).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(ToolchainRegistry::load(Path::new("/nonexistent/languages.json")).is_err());
    }
}
