//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! across the promptsmith production sources:
//! - No sleep() calls (wait on I/O or timeouts instead)
//! - No blocking I/O inside async functions
//! - No `unwrap()`/`expect()` outside test code
//!
//! The helpers here locate production sources and classify lines so each
//! rule only has to say what it forbids.

use std::fmt;
use std::path::{Path, PathBuf};

/// Source directories checked by every rule, relative to the workspace root
pub const PRODUCTION_DIRS: [&str; 2] = ["promptsmith/core/src", "promptsmith/cli/src"];

/// Files compiled only for tests, skipped entirely
pub const TEST_SUPPORT_FILES: [&str; 1] = ["test_utils.rs"];

/// One rule violation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File path
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// Offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Workspace root (two levels above this crate)
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every production `.rs` file under [`PRODUCTION_DIRS`]
#[must_use]
pub fn production_sources() -> Vec<PathBuf> {
    let root = workspace_root();
    let mut files = Vec::new();
    for dir in PRODUCTION_DIRS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }
        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(Result::ok)
        {
            let p = entry.path();
            let is_rust = p.extension().and_then(|s| s.to_str()) == Some("rs");
            let is_test_support = p
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| TEST_SUPPORT_FILES.contains(&n));
            if is_rust && !is_test_support {
                files.push(p.to_path_buf());
            }
        }
    }
    files.sort();
    files
}

/// Line text with any trailing `//` comment removed
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first line of the file's `#[cfg(test)] mod ... {` block
///
/// A `#[cfg(test)]` on a `mod foo;` declaration does not start a test region.
#[must_use]
pub fn test_region_start(lines: &[&str]) -> Option<usize> {
    lines.iter().enumerate().find_map(|(idx, line)| {
        if line.trim() != "#[cfg(test)]" {
            return None;
        }
        let next = lines[idx + 1..].iter().find(|l| !l.trim().is_empty())?;
        let next = next.trim();
        (next.starts_with("mod ") && next.ends_with('{')).then_some(idx)
    })
}

/// Whether a trimmed line declares a function
fn declares_fn(trimmed: &str) -> bool {
    let rest = trimmed
        .trim_start_matches("pub(crate) ")
        .trim_start_matches("pub(super) ")
        .trim_start_matches("pub ")
        .trim_start_matches("const ")
        .trim_start_matches("unsafe ");
    rest.starts_with("fn ") || rest.starts_with("async fn ")
}

/// Whether the nearest enclosing function declaration is `async`
///
/// Returns `None` when no function encloses the line.
#[must_use]
pub fn enclosing_fn_is_async(lines: &[&str], current_idx: usize) -> Option<bool> {
    for idx in (0..=current_idx).rev() {
        let trimmed = lines[idx].trim();
        if declares_fn(trimmed) {
            return Some(trimmed.contains("async fn "));
        }
        if trimmed.starts_with("mod ") || (trimmed.starts_with("impl") && trimmed.ends_with('{')) {
            return None;
        }
    }
    None
}

/// Apply `check` to every production line outside test code
///
/// `check` receives the comment-stripped line, all lines of the file, and
/// the line index.
pub fn scan_production_code<F>(check: F) -> Vec<Violation>
where
    F: Fn(&str, &[&str], usize) -> bool,
{
    let mut violations = Vec::new();
    for path in production_sources() {
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        let end = test_region_start(&lines).unwrap_or(lines.len());
        for (idx, line) in lines[..end].iter().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            if check(code_part(line), &lines, idx) {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    text: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // note"), "let x = 1; ");
        assert_eq!(code_part("// all comment"), "");
    }

    #[test]
    fn test_test_region_detection() {
        let lines = [
            "#[cfg(test)]",
            "pub(crate) mod test_utils;",
            "",
            "fn real() {}",
            "#[cfg(test)]",
            "mod tests {",
            "}",
        ];
        assert_eq!(test_region_start(&lines), Some(4));
        assert_eq!(test_region_start(&["fn main() {}"]), None);
    }

    #[test]
    fn test_enclosing_fn_detection() {
        let lines = [
            "impl Thing {",
            "    pub async fn load(&self) {",
            "        let x = 1;",
            "    }",
            "    pub(crate) fn sync_helper() {",
            "        let y = 2;",
            "    }",
            "}",
        ];
        assert_eq!(enclosing_fn_is_async(&lines, 2), Some(true));
        assert_eq!(enclosing_fn_is_async(&lines, 5), Some(false));
        assert_eq!(enclosing_fn_is_async(&lines, 0), None);
    }

    #[test]
    fn test_production_sources_found() {
        let files = production_sources();
        assert!(files.iter().any(|p| p.ends_with("promptsmith/core/src/orchestrator.rs")));
        assert!(!files.iter().any(|p| p.ends_with("test_utils.rs")));
    }
}
