// T-SQL script preprocessing: sqlcmd directive stripping, deploy-variable
// substitution and GO batch splitting. Runs before any parsing so both the
// AST path and the lexical fallback see the same text.

use once_cell::sync::Lazy;
use regex::Regex;

/// `$(DeployVar)` style substitutions; the value is irrelevant for graph
/// extraction so every occurrence becomes the literal `0`.
static DEPLOY_VAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\([^)]*\)").unwrap());

/// Batch separator: a line holding only `GO`, optionally with a repeat count
/// or trailing semicolon.
static GO_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*GO(\s+\d+)?\s*;?\s*$").unwrap());

const DROPPED_DIRECTIVES: [&str; 4] = [":r", ":setvar", ":connect", ":on error exit"];

/// One `GO`-delimited unit of a script.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlBatch {
    /// Zero-based position within the file.
    pub index: i32,
    /// Preprocessed batch text.
    pub text: String,
    /// 1-based line of the batch's first line in the original file.
    pub start_line: usize,
}

/// Strip sqlcmd directives and substitute deploy variables. Dropped
/// directive lines become empty lines so downstream line numbers stay
/// aligned with the source file.
pub fn preprocess(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for line in raw.split_inclusive('\n') {
        let (content, newline) = match line.strip_suffix('\n') {
            Some(rest) => (rest, "\n"),
            None => (line, ""),
        };
        let trimmed = content.trim_start();
        let lowered = trimmed.to_lowercase();
        let dropped = DROPPED_DIRECTIVES
            .iter()
            .any(|d| lowered.starts_with(d) && !starts_with_longer_word(&lowered, d));
        if !dropped {
            out.push_str(&DEPLOY_VAR.replace_all(content, "0"));
        }
        out.push_str(newline);
    }
    out
}

// `:rollback` must not be confused with `:r`; a directive is only dropped
// when it is followed by whitespace or the end of the line.
fn starts_with_longer_word(line: &str, directive: &str) -> bool {
    line[directive.len()..]
        .chars()
        .next()
        .map(|c| !c.is_whitespace())
        .unwrap_or(false)
}

/// Split a preprocessed script into batches on `GO` separator lines.
/// Batches that contain only whitespace are not emitted, but batch indices
/// still count every separator-delimited region, matching how deployment
/// tooling numbers them.
pub fn split_batches(script: &str) -> Vec<SqlBatch> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut index: i32 = 0;
    let mut batch_start_line = 1usize;
    let mut line_no = 0usize;

    for line in script.lines() {
        line_no += 1;
        if GO_LINE.is_match(line) {
            push_batch(&mut batches, &mut current, &mut index, batch_start_line);
            batch_start_line = line_no + 1;
        } else {
            if current.is_empty() {
                batch_start_line = line_no;
            }
            current.push_str(line);
            current.push('\n');
        }
    }
    push_batch(&mut batches, &mut current, &mut index, batch_start_line);
    batches
}

fn push_batch(batches: &mut Vec<SqlBatch>, current: &mut String, index: &mut i32, start_line: usize) {
    if !current.trim().is_empty() {
        batches.push(SqlBatch {
            index: *index,
            text: std::mem::take(current),
            start_line,
        });
    } else {
        current.clear();
    }
    *index += 1;
}
