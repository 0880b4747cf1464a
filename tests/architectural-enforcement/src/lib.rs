//! Architectural Enforcement
//!
//! A small source scanner used by this package's integration tests to keep a
//! few patterns out of production code:
//! - `std::thread::sleep` (blocks a runtime worker)
//! - `reqwest::blocking` (blocking HTTP inside an async service)
//! - `.unwrap()` / `.expect(` (errors must propagate)
//!
//! A file is production code up to its first `#[cfg(test)]` line. Comment
//! lines are ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// A forbidden pattern
#[derive(Clone, Copy, Debug)]
pub struct Rule {
    /// Short rule name
    pub name: &'static str,
    /// Text that must not appear
    pub pattern: &'static str,
    /// What to do instead
    pub hint: &'static str,
}

/// Rules applied to every production source file
pub const RULES: &[Rule] = &[
    Rule {
        name: "thread-sleep",
        pattern: "thread::sleep",
        hint: "use tokio::time::sleep or an event-driven wait",
    },
    Rule {
        name: "blocking-http",
        pattern: "reqwest::blocking",
        hint: "use the async reqwest client",
    },
    Rule {
        name: "unwrap",
        pattern: ".unwrap()",
        hint: "propagate the error with ?",
    },
    Rule {
        name: "expect",
        pattern: ".expect(",
        hint: "propagate the error with ?",
    },
];

/// One forbidden pattern found in a file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File the pattern was found in
    pub file: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Name of the broken rule
    pub rule: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} [{}] {}",
            self.file.display(),
            self.line,
            self.rule,
            self.text
        )
    }
}

/// Workspace root, two levels above this package
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

fn is_comment(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("//") || line.starts_with("/*") || line.starts_with('*')
}

/// Lines of `source` that count as production code, with 1-based numbers
pub fn production_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .take_while(|(_, line)| line.trim() != "#[cfg(test)]")
        .filter(|(_, line)| !is_comment(line))
        .map(|(i, line)| (i + 1, line))
}

/// Check one file's source against `rules`
#[must_use]
pub fn scan_source(file: &Path, source: &str, rules: &[Rule]) -> Vec<Violation> {
    production_lines(source)
        .flat_map(|(line_no, line)| {
            rules
                .iter()
                .filter(move |rule| line.contains(rule.pattern))
                .map(move |rule| Violation {
                    file: file.to_path_buf(),
                    line: line_no,
                    rule: rule.name,
                    text: line.trim().to_string(),
                })
        })
        .collect()
}

/// Check every `.rs` file under `dir`
///
/// # Errors
///
/// Fails if the directory cannot be walked or a file cannot be read.
pub fn scan_dir(dir: &Path, rules: &[Rule]) -> std::io::Result<Vec<Violation>> {
    let mut violations = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "rs") {
            let source = std::fs::read_to_string(path)?;
            violations.extend(scan_source(path, &source, rules));
        }
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
fn main() {
    // value.unwrap() in a comment is fine
    let x = value.unwrap();
    std::thread::sleep(d);
}

#[cfg(test)]
mod tests {
    fn t() { value.unwrap(); }
}
";

    #[test]
    fn test_scan_finds_production_violations_only() {
        let violations = scan_source(Path::new("sample.rs"), SAMPLE, RULES);
        let found: Vec<(usize, &str)> = violations.iter().map(|v| (v.line, v.rule)).collect();
        assert_eq!(found, vec![(3, "unwrap"), (4, "thread-sleep")]);
    }

    #[test]
    fn test_unwrap_or_variants_allowed() {
        let source = "let a = x.unwrap_or_default();\nlet b = y.unwrap_or_else(|| 1);\n";
        assert!(scan_source(Path::new("ok.rs"), source, RULES).is_empty());
    }

    #[test]
    fn test_violation_display() {
        let violation = Violation {
            file: PathBuf::from("src/a.rs"),
            line: 7,
            rule: "expect",
            text: "x.expect(\"boom\")".into(),
        };
        assert_eq!(violation.to_string(), "src/a.rs:7 [expect] x.expect(\"boom\")");
    }
}
