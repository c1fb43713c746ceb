//! Code Validator Service
//!
//! Pre-flight checks for generated code. Sanitization always runs and
//! returns the cleaned code together with the actions taken; the syntax
//! check only reports issues, it never rejects the artifact outright.

use std::collections::{BTreeSet, HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::models::TaskKind;

/// Names that generators sometimes import as if they were modules.
const TYPING_HINTS: &[&str] = &[
    "Any", "Callable", "Dict", "FrozenSet", "Generic", "Iterable", "Iterator", "List", "Optional", "Set",
    "Tuple", "Type", "TypeVar", "Union",
];

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue", "def",
    "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in", "is",
    "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with", "yield",
];

const BLOCK_KEYWORDS: &[&str] = &[
    "def", "class", "if", "elif", "else", "for", "while", "try", "except", "finally", "with", "async",
];

/// One change made by sanitization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SanitizeAction {
    StrippedFences,
    DroppedImport { line: String },
    DroppedMetadata { line: String },
    MergedTypingImports { names: Vec<String> },
    RemovedUnmatchedCloser { line: usize, delimiter: char },
    WrappedBoilerplate,
    AlreadyComplete,
}

/// A problem found by the syntax check. Lines are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxIssue {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Result of validating one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Sanitized code; persisted even when issues were found
    pub code: String,
    pub actions: Vec<SanitizeAction>,
    pub issues: Vec<SyntaxIssue>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issues rendered as interpreter-style error lines.
    pub fn failure_message(&self) -> String {
        self.issues
            .iter()
            .map(|issue| format!("SyntaxError: {} (line {})", issue.message, issue.line))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
struct Delimiter {
    offset: usize,
    line: usize,
    ch: char,
}

/// Lexical facts about a piece of code.
#[derive(Debug, Default)]
struct Scan {
    unmatched_closers: Vec<Delimiter>,
    unclosed_openers: Vec<Delimiter>,
    /// 0-based lines where a string is left open
    unterminated_strings: Vec<usize>,
    /// 0-based line -> byte offset of a `#` comment within the line
    comment_starts: HashMap<usize, usize>,
    /// 0-based lines that begin inside brackets or a multi-line string
    continuation_lines: HashSet<usize>,
}

const fn closer_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn scan(code: &str) -> Scan {
    let chars: Vec<(usize, char)> = code.char_indices().collect();
    let len = chars.len();
    let mut result = Scan::default();
    let mut stack: Vec<Delimiter> = Vec::new();
    let mut line = 0usize;
    let mut line_start = 0usize;
    let mut i = 0usize;

    let is_triple = |i: usize, quote: char| i + 2 < len && chars[i + 1].1 == quote && chars[i + 2].1 == quote;

    while i < len {
        let (offset, c) = chars[i];
        match c {
            '\n' => {
                line += 1;
                line_start = offset + 1;
                if !stack.is_empty() {
                    result.continuation_lines.insert(line);
                }
                i += 1;
            }
            '#' => {
                result.comment_starts.insert(line, offset - line_start);
                while i < len && chars[i].1 != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' if is_triple(i, c) => {
                let start_line = line;
                let mut escaped = false;
                let mut closed = false;
                i += 3;
                while i < len {
                    let (pos, ch) = chars[i];
                    if ch == '\n' {
                        line += 1;
                        line_start = pos + 1;
                        result.continuation_lines.insert(line);
                        escaped = false;
                    } else if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == c && is_triple(i, c) {
                        i += 3;
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    result.unterminated_strings.push(start_line);
                }
            }
            '\'' | '"' => {
                let mut escaped = false;
                let mut closed = false;
                i += 1;
                while i < len {
                    let ch = chars[i].1;
                    if ch == '\n' {
                        break;
                    }
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == c {
                        i += 1;
                        closed = true;
                        break;
                    }
                    i += 1;
                }
                if !closed {
                    result.unterminated_strings.push(line);
                }
            }
            '(' | '[' | '{' => {
                stack.push(Delimiter { offset, line, ch: c });
                i += 1;
            }
            ')' | ']' | '}' => {
                if stack.last().is_some_and(|open| closer_for(open.ch) == c) {
                    stack.pop();
                } else {
                    result.unmatched_closers.push(Delimiter { offset, line, ch: c });
                }
                i += 1;
            }
            _ => i += 1,
        }
    }

    result.unclosed_openers = stack;
    result
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !PYTHON_KEYWORDS.contains(&name)
}

fn is_dotted_identifier(name: &str) -> bool {
    name.split('.').all(is_identifier)
}

fn indentation(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

/// Line text without its trailing comment.
fn code_part<'a>(lines: &[&'a str], scan: &Scan, idx: usize) -> &'a str {
    let line = lines[idx];
    scan.comment_starts
        .get(&idx)
        .map_or(line, |&cut| line.get(..cut).unwrap_or(line))
        .trim_end()
}

/// Whether a line starts a logical statement.
fn is_statement(lines: &[&str], scan: &Scan, idx: usize) -> bool {
    !scan.continuation_lines.contains(&idx) && !code_part(lines, scan, idx).trim().is_empty()
}

/// Sanitizes and checks generated code.
#[derive(Debug, Clone)]
pub struct CodeValidator {
    broken_import_head: Regex,
    pseudo_module_import: Regex,
    dangling_from: Regex,
    metadata_line: Regex,
    plain_import: Regex,
    typing_import: Regex,
    entry_point: Regex,
    main_function: Regex,
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeValidator {
    pub fn new() -> Self {
        Self {
            broken_import_head: Regex::new(r"(?m)^([ \t]*)import[ \t]*\n[ \t]+([A-Za-z_]\w*)[ \t]*$").unwrap(),
            pseudo_module_import: Regex::new(
                r"^\s*(import\s+[A-Za-z_]\w*_mod(\s+as\s+\w+)?\s*$|from\s+[A-Za-z_]\w*_mod\s+import\b)",
            )
            .unwrap(),
            dangling_from: Regex::new(r"^\s*from(\s+[\w.]*)?\s*$").unwrap(),
            metadata_line: Regex::new(r#"^\s*"(task_id|description|plan_id)"\s*:"#).unwrap(),
            plain_import: Regex::new(r"^(\s*)import(\s+(.*))?$").unwrap(),
            typing_import: Regex::new(r"^from\s+typing\s+import\s+([^()\n]+)$").unwrap(),
            entry_point: Regex::new(r#"(?m)^if\s+__name__\s*==\s*['"]__main__['"]\s*:"#).unwrap(),
            main_function: Regex::new(r"(?m)^def\s+main\s*\(").unwrap(),
        }
    }

    /// Sanitize `code` and run the syntax check on the result.
    pub fn validate(&self, code: &str, kind: TaskKind) -> ValidationReport {
        let (code, actions) = self.sanitize(code, kind);
        let issues = self.check_syntax(&code);
        debug!(
            actions = actions.len(),
            issues = issues.len(),
            kind = kind.as_str(),
            "validated generated code"
        );
        ValidationReport { code, actions, issues }
    }

    /// Structural clean-up. Wrapping in the entry-point boilerplate happens at
    /// most once: code that already has it is left as is.
    pub fn sanitize(&self, code: &str, kind: TaskKind) -> (String, Vec<SanitizeAction>) {
        let mut actions = Vec::new();

        let mut code = strip_fences(code).map_or_else(
            || code.to_string(),
            |stripped| {
                actions.push(SanitizeAction::StrippedFences);
                stripped
            },
        );

        code = self.broken_import_head.replace_all(&code, "${1}import $2").into_owned();
        code = self.filter_lines(&code, &mut actions);
        code = remove_unmatched_closers(&code, &mut actions);

        if self.is_complete(&code) {
            actions.push(SanitizeAction::AlreadyComplete);
        } else {
            code = wrap_in_boilerplate(&code, kind);
            actions.push(SanitizeAction::WrappedBoilerplate);
        }

        (code, actions)
    }

    /// Whether the code already carries an entry point.
    pub fn is_complete(&self, code: &str) -> bool {
        self.entry_point.is_match(code) && self.main_function.is_match(code)
    }

    /// Delimiter balance, string termination and block bodies.
    pub fn check_syntax(&self, code: &str) -> Vec<SyntaxIssue> {
        let scan = scan(code);
        let mut issues = Vec::new();

        for line in &scan.unterminated_strings {
            issues.push(SyntaxIssue {
                line: line + 1,
                message: "unterminated string literal".to_string(),
            });
        }
        for closer in &scan.unmatched_closers {
            issues.push(SyntaxIssue {
                line: closer.line + 1,
                message: format!("unmatched '{}'", closer.ch),
            });
        }
        for opener in &scan.unclosed_openers {
            issues.push(SyntaxIssue {
                line: opener.line + 1,
                message: format!("'{}' was never closed", opener.ch),
            });
        }

        let lines: Vec<&str> = code.lines().collect();
        for idx in 0..lines.len() {
            if !is_statement(&lines, &scan, idx) {
                continue;
            }
            let text = code_part(&lines, &scan, idx);
            let first_word = text
                .trim_start()
                .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .next()
                .unwrap_or_default();
            if !text.ends_with(':') || !BLOCK_KEYWORDS.contains(&first_word) {
                continue;
            }
            let body_indented = (idx + 1..lines.len())
                .find(|&next| is_statement(&lines, &scan, next))
                .is_some_and(|next| indentation(lines[next]) > indentation(lines[idx]));
            if !body_indented {
                issues.push(SyntaxIssue {
                    line: idx + 1,
                    message: format!("expected an indented block after '{first_word}'"),
                });
            }
        }

        issues.sort_by_key(|issue| issue.line);
        issues
    }

    fn filter_lines(&self, code: &str, actions: &mut Vec<SanitizeAction>) -> String {
        let mut kept: Vec<String> = Vec::new();
        let mut hints: BTreeSet<String> = BTreeSet::new();

        for line in code.lines() {
            if self.pseudo_module_import.is_match(line) || self.dangling_from.is_match(line) {
                actions.push(SanitizeAction::DroppedImport { line: line.trim().to_string() });
                continue;
            }
            if self.metadata_line.is_match(line) {
                actions.push(SanitizeAction::DroppedMetadata { line: line.trim().to_string() });
                continue;
            }
            if let Some(caps) = self.plain_import.captures(line) {
                let indent = caps.get(1).map_or("", |m| m.as_str());
                let names = caps.get(3).map_or("", |m| m.as_str()).trim();
                if names.is_empty() {
                    actions.push(SanitizeAction::DroppedImport { line: line.trim().to_string() });
                    continue;
                }

                let mut modules = Vec::new();
                for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    let module = name.split_whitespace().next().unwrap_or_default();
                    if TYPING_HINTS.contains(&module) {
                        hints.insert(module.to_string());
                    } else {
                        modules.push(name);
                    }
                }

                let single_word_invalid = modules.len() == 1
                    && !modules[0].contains(' ')
                    && !is_dotted_identifier(modules[0]);
                if single_word_invalid {
                    actions.push(SanitizeAction::DroppedImport { line: line.trim().to_string() });
                    continue;
                }
                if modules.is_empty() {
                    continue;
                }
                kept.push(format!("{indent}import {}", modules.join(", ")));
                continue;
            }
            kept.push(line.to_string());
        }

        if !hints.is_empty() {
            let existing = kept
                .iter()
                .position(|line| self.typing_import.is_match(line));
            match existing {
                Some(idx) => {
                    if let Some(caps) = self.typing_import.captures(&kept[idx]) {
                        hints.extend(caps[1].split(',').map(|n| n.trim().to_string()).filter(|n| !n.is_empty()));
                    }
                    kept[idx] = format!("from typing import {}", hints.iter().cloned().collect::<Vec<_>>().join(", "));
                }
                None => {
                    let at = kept
                        .iter()
                        .position(|line| line.starts_with("import ") || line.starts_with("from "))
                        .unwrap_or(0);
                    kept.insert(
                        at,
                        format!("from typing import {}", hints.iter().cloned().collect::<Vec<_>>().join(", ")),
                    );
                }
            }
            actions.push(SanitizeAction::MergedTypingImports {
                names: hints.into_iter().collect(),
            });
        }

        let mut out = kept.join("\n");
        if code.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

/// Content of the fenced blocks, or `None` when there are no fences.
fn strip_fences(code: &str) -> Option<String> {
    if !code.lines().any(|line| line.trim_start().starts_with("```")) {
        return None;
    }

    let mut inside = false;
    let mut fenced: Vec<&str> = Vec::new();
    let mut complete_block = false;
    for line in code.lines() {
        if line.trim_start().starts_with("```") {
            if inside {
                complete_block = true;
            }
            inside = !inside;
            continue;
        }
        if inside {
            fenced.push(line);
        }
    }

    if complete_block {
        let mut out = fenced.join("\n");
        out.push('\n');
        return Some(out);
    }

    // An unterminated fence: drop the marker lines only.
    let mut out = code
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    Some(out)
}

fn remove_unmatched_closers(code: &str, actions: &mut Vec<SanitizeAction>) -> String {
    let closers = scan(code).unmatched_closers;
    if closers.is_empty() {
        return code.to_string();
    }

    let mut out = code.to_string();
    for closer in closers.iter().rev() {
        out.remove(closer.offset);
    }
    actions.extend(closers.iter().map(|c| SanitizeAction::RemovedUnmatchedCloser {
        line: c.line + 1,
        delimiter: c.ch,
    }));
    out
}

fn preamble(kind: TaskKind) -> &'static [&'static str] {
    match kind {
        TaskKind::CodeExecution => &["import json", "import os", "import sys", "import traceback"],
        TaskKind::Research => &["import json", "import os", "import sys", "import traceback", "import urllib.request"],
        TaskKind::DataAnalysis => &["import csv", "import json", "import os", "import statistics", "import sys", "import traceback"],
    }
}

/// Hoist top-level imports and move everything else into `main()`.
fn wrap_in_boilerplate(code: &str, kind: TaskKind) -> String {
    let continuation = scan(code).continuation_lines;
    let mut imports: Vec<String> = preamble(kind).iter().map(|s| (*s).to_string()).collect();
    let mut body: Vec<String> = Vec::new();
    let mut has_statement = false;

    for (idx, line) in code.lines().enumerate() {
        let top_level = !continuation.contains(&idx) && !line.starts_with(char::is_whitespace);
        if top_level && (line.starts_with("import ") || (line.starts_with("from ") && line.contains(" import "))) {
            let line = line.trim_end().to_string();
            if !imports.contains(&line) {
                imports.push(line);
            }
            continue;
        }
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            has_statement = true;
        }
        if trimmed.is_empty() {
            body.push(String::new());
        } else {
            body.push(format!("    {}", line.trim_end()));
        }
    }

    while body.first().is_some_and(String::is_empty) {
        body.remove(0);
    }
    while body.last().is_some_and(String::is_empty) {
        body.pop();
    }
    if !has_statement {
        body.push("    pass".to_string());
    }

    let mut out = imports.join("\n");
    out.push_str("\n\n\ndef main():\n");
    out.push_str(&body.join("\n"));
    out.push_str("\n\n\nif __name__ == \"__main__\":\n");
    out.push_str("    try:\n        result = main()\n");
    out.push_str("    except Exception:\n        traceback.print_exc()\n        sys.exit(1)\n");
    if kind != TaskKind::CodeExecution {
        out.push_str("    if result is not None:\n        print(json.dumps(result, default=str))\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> CodeValidator {
        CodeValidator::new()
    }

    #[test]
    fn test_strips_markdown_fences() {
        let raw = "Here you go:\n```python\nprint('hi')\n```\nEnjoy";
        let (code, actions) = validator().sanitize(raw, TaskKind::CodeExecution);
        assert!(actions.contains(&SanitizeAction::StrippedFences));
        assert!(!code.contains("```"));
        assert!(!code.contains("Enjoy"));
        assert!(code.contains("    print('hi')"));
    }

    #[test]
    fn test_drops_malformed_imports() {
        let raw = "import\n    np_mod\nfrom helpers_mod import thing\nfrom os\nimport 3d\nimport to.be.continued\nimport os\nprint(os.sep)\n";
        let (code, actions) = validator().sanitize(raw, TaskKind::CodeExecution);
        assert!(!code.contains("np_mod"));
        assert!(!code.contains("helpers_mod"));
        assert!(!code.contains("import 3d"));
        assert!(!code.contains("from os\n"));
        assert!(code.contains("import to.be.continued"));
        let dropped = actions
            .iter()
            .filter(|a| matches!(a, SanitizeAction::DroppedImport { .. }))
            .count();
        assert_eq!(dropped, 4);
    }

    #[test]
    fn test_drops_template_metadata_lines() {
        let raw = "\"task_id\": \"abc\",\n\"plan_id\": \"p\",\nprint(1)\n";
        let (code, actions) = validator().sanitize(raw, TaskKind::CodeExecution);
        assert!(!code.contains("task_id"));
        assert_eq!(
            actions
                .iter()
                .filter(|a| matches!(a, SanitizeAction::DroppedMetadata { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_typing_hints_merged_into_one_line() {
        let raw = "import Dict\nimport List, os\nfrom typing import Any\nx: Dict = {}\n";
        let (code, actions) = validator().sanitize(raw, TaskKind::CodeExecution);
        assert!(code.contains("from typing import Any, Dict, List"));
        assert!(code.contains("import os"));
        assert!(!code.contains("import Dict"));
        assert_eq!(code.matches("from typing import").count(), 1);
        assert!(actions.contains(&SanitizeAction::MergedTypingImports {
            names: vec!["Any".into(), "Dict".into(), "List".into()]
        }));
    }

    #[test]
    fn test_removes_unmatched_closers() {
        let raw = "print('a)')\nvalue = [1, 2]]\n";
        let (code, actions) = validator().sanitize(raw, TaskKind::CodeExecution);
        assert!(code.contains("value = [1, 2]\n"));
        assert!(code.contains("print('a)')"));
        assert!(actions.contains(&SanitizeAction::RemovedUnmatchedCloser { line: 2, delimiter: ']' }));
    }

    #[test]
    fn test_wraps_once() {
        let v = validator();
        let (first, actions) = v.sanitize("import math\nprint(math.pi)\n", TaskKind::CodeExecution);
        assert!(actions.contains(&SanitizeAction::WrappedBoilerplate));
        assert!(first.starts_with("import json"));
        assert!(first.contains("import math\n"));
        assert!(first.contains("def main():\n    print(math.pi)"));

        let (second, actions) = v.sanitize(&first, TaskKind::CodeExecution);
        assert!(actions.contains(&SanitizeAction::AlreadyComplete));
        assert_eq!(second.matches("def main").count(), 1);
        assert_eq!(second.matches("__main__").count(), 1);
    }

    #[test]
    fn test_comment_only_body_gets_pass() {
        let report = validator().validate("# fail: E_IMPORT: cannot import helper", TaskKind::CodeExecution);
        assert!(report.code.contains("    # fail: E_IMPORT: cannot import helper"));
        assert!(report.code.contains("    pass"));
        assert!(report.is_clean(), "{:?}", report.issues);
    }

    #[test]
    fn test_kind_selects_boilerplate() {
        let (code, _) = validator().sanitize("return {'rows': 3}", TaskKind::DataAnalysis);
        assert!(code.contains("import statistics"));
        assert!(code.contains("json.dumps(result"));
    }

    #[test]
    fn test_syntax_check_finds_unclosed_delimiters() {
        let issues = validator().check_syntax("def main():\n    print((1, 2)\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 2);
        assert!(issues[0].message.contains("never closed"));
    }

    #[test]
    fn test_syntax_check_ignores_delimiters_in_strings_and_comments() {
        let code = "x = '(' # )\ny = \"\"\"\n[\n\"\"\"\n";
        assert!(validator().check_syntax(code).is_empty());
    }

    #[test]
    fn test_syntax_check_unterminated_string() {
        let issues = validator().check_syntax("x = 'abc\ny = 1\n");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 1);
    }

    #[test]
    fn test_syntax_check_missing_block_body() {
        let issues = validator().check_syntax("if ready:\nprint('go')\n");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("'if'"));

        let ok = "for i in range(3):  # loop\n    # body\n    print(i)\n";
        assert!(validator().check_syntax(ok).is_empty());
    }

    #[test]
    fn test_failure_message_normalizes_as_syntax_error() {
        let report = ValidationReport {
            code: String::new(),
            actions: vec![],
            issues: vec![SyntaxIssue { line: 3, message: "'(' was never closed".into() }],
        };
        let sig = crate::domain::models::ErrorSignature::normalize(
            crate::domain::models::FailureCategory::ValidationError,
            &report.failure_message(),
        );
        assert_eq!(sig.error_class, "SyntaxError");
    }
}
