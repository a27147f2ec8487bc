//! Strict, non-fuzzy unified diff application.
//!
//! This is deliberately not a general diff engine. It supports exactly the
//! shape an LLM is asked to produce: one or more hunks against a single
//! file, each with a `@@ -origStart[,origCount] +newStart[,newCount] @@`
//! header and a body of context/addition/removal lines. Context lines
//! must match the original file exactly; there is no fuzz-matching path.

use std::sync::LazyLock;

use regex::Regex;

/// Failure modes surfaced while parsing or applying a patch.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("diff is empty")]
    EmptyDiff,
    #[error("diff contains no hunk header")]
    NoHunkHeader,
    #[error("malformed hunk header: {0}")]
    MalformedHunkHeader(String),
    #[error("invalid line prefix in hunk body: {0:?}")]
    InvalidLinePrefix(String),
    #[error("context mismatch at line {0}")]
    ContextMismatch(usize),
    #[error("hunk start {0} is out of range for a file with {1} lines")]
    HunkOutOfRange(usize, usize),
}

/// A single line within a hunk body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Addition(String),
    Removal(String),
}

/// One parsed hunk.
#[derive(Debug, Clone)]
pub struct Hunk {
    pub orig_start: usize,
    pub orig_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(?P<orig_start>\d+)(?:,(?P<orig_count>\d+))? \+(?P<new_start>\d+)(?:,(?P<new_count>\d+))? @@").unwrap()
});

/// Validates that `diff` has the shape this applier and the LLM-client
/// response validator require: non-empty, at least one hunk header, and
/// only recognized prefixes within hunk bodies.
///
/// # Errors
/// Returns the first structural problem encountered.
pub fn validate_diff_shape(diff: &str) -> Result<(), PatchError> {
    if diff.trim().is_empty() {
        return Err(PatchError::EmptyDiff);
    }
    if !diff.lines().any(|line| HUNK_HEADER.is_match(line)) {
        return Err(PatchError::NoHunkHeader);
    }

    let mut in_hunk = false;
    for line in diff.lines() {
        if HUNK_HEADER.is_match(line) {
            in_hunk = true;
            continue;
        }
        if line.starts_with("---") || line.starts_with("+++") || line.starts_with("diff ") {
            continue;
        }
        if in_hunk && !line.is_empty() {
            match line.as_bytes()[0] {
                b' ' | b'+' | b'-' => {}
                _ => return Err(PatchError::InvalidLinePrefix(line.to_string())),
            }
        }
    }

    Ok(())
}

/// Parses every hunk in `diff`, in the order they appear.
///
/// # Errors
/// Returns [`PatchError::NoHunkHeader`], [`PatchError::MalformedHunkHeader`],
/// or [`PatchError::InvalidLinePrefix`] on malformed input.
pub fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, PatchError> {
    validate_diff_shape(diff)?;

    let mut hunks = Vec::new();
    let mut lines = diff.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(caps) = HUNK_HEADER.captures(line) else {
            continue;
        };

        let orig_start: usize = caps["orig_start"]
            .parse()
            .map_err(|_| PatchError::MalformedHunkHeader(line.to_string()))?;
        let orig_count: usize = caps
            .name("orig_count")
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| PatchError::MalformedHunkHeader(line.to_string()))?
            .unwrap_or(1);
        let new_start: usize = caps["new_start"]
            .parse()
            .map_err(|_| PatchError::MalformedHunkHeader(line.to_string()))?;
        let new_count: usize = caps
            .name("new_count")
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| PatchError::MalformedHunkHeader(line.to_string()))?
            .unwrap_or(1);

        let mut body = Vec::new();
        while let Some(next) = lines.peek() {
            if HUNK_HEADER.is_match(next) {
                break;
            }
            let next = lines.next().unwrap();
            if next.is_empty() {
                body.push(DiffLine::Context(String::new()));
                continue;
            }
            let (prefix, rest) = next.split_at(1);
            match prefix {
                " " => body.push(DiffLine::Context(rest.to_string())),
                "+" => body.push(DiffLine::Addition(rest.to_string())),
                "-" => body.push(DiffLine::Removal(rest.to_string())),
                _ => return Err(PatchError::InvalidLinePrefix(next.to_string())),
            }
        }

        hunks.push(Hunk {
            orig_start,
            orig_count,
            new_start,
            new_count,
            lines: body,
        });
    }

    if hunks.is_empty() {
        return Err(PatchError::NoHunkHeader);
    }

    Ok(hunks)
}

/// Applies `diff` to `original`, returning the patched content.
///
/// Hunks are applied in order against an in-memory copy; nothing is
/// written until every hunk in the diff has succeeded, so a failure
/// partway through never leaves a partially patched result visible to
/// the caller — there is simply no output to write.
///
/// # Errors
/// Returns [`PatchError::ContextMismatch`] if a context line does not
/// match the original file exactly at the hunk's declared position, or a
/// parse error from [`parse_hunks`].
pub fn apply_patch(original: &str, diff: &str) -> Result<String, PatchError> {
    let hunks = parse_hunks(diff)?;
    let original_lines: Vec<&str> = original.lines().collect();

    let mut output: Vec<String> = Vec::new();
    let mut cursor = 0usize; // 0-based index into original_lines

    for hunk in &hunks {
        let start_index = hunk.orig_start.saturating_sub(1);
        if start_index > original_lines.len() {
            return Err(PatchError::HunkOutOfRange(hunk.orig_start, original_lines.len()));
        }

        // Copy verbatim everything between the previous hunk's end and this one's start.
        for line in &original_lines[cursor..start_index] {
            output.push((*line).to_string());
        }
        cursor = start_index;

        for diff_line in &hunk.lines {
            match diff_line {
                DiffLine::Context(text) => {
                    let actual = original_lines.get(cursor).copied().unwrap_or("");
                    if actual != text {
                        return Err(PatchError::ContextMismatch(cursor + 1));
                    }
                    output.push(text.clone());
                    cursor += 1;
                }
                DiffLine::Removal(text) => {
                    let actual = original_lines.get(cursor).copied().unwrap_or("");
                    if actual != text {
                        return Err(PatchError::ContextMismatch(cursor + 1));
                    }
                    cursor += 1;
                }
                DiffLine::Addition(text) => {
                    output.push(text.clone());
                }
            }
        }
    }

    for line in &original_lines[cursor..] {
        output.push((*line).to_string());
    }

    let mut result = output.join("\n");
    if original.ends_with('\n') {
        result.push('\n');
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_single_hunk_addition() {
        let original = "line1\nline2\nline3\n";
        let diff = "@@ -1,3 +1,4 @@\n line1\n+inserted\n line2\n line3\n";
        let patched = apply_patch(original, diff).unwrap();
        assert_eq!(patched, "line1\ninserted\nline2\nline3\n");
    }

    #[test]
    fn applies_removal() {
        let original = "a\nb\nc\n";
        let diff = "@@ -1,3 +1,2 @@\n a\n-b\n c\n";
        let patched = apply_patch(original, diff).unwrap();
        assert_eq!(patched, "a\nc\n");
    }

    #[test]
    fn rejects_context_mismatch_without_fuzzing() {
        let original = "a\nb\nc\n";
        let diff = "@@ -1,3 +1,3 @@\n a\n-X\n c\n";
        let err = apply_patch(original, diff).unwrap_err();
        assert!(matches!(err, PatchError::ContextMismatch(2)));
    }

    #[test]
    fn applies_multiple_hunks_in_order() {
        let original = "1\n2\n3\n4\n5\n6\n7\n8\n";
        let diff = "@@ -1,2 +1,2 @@\n-1\n+one\n 2\n@@ -7,2 +7,2 @@\n 7\n-8\n+eight\n";
        let patched = apply_patch(original, diff).unwrap();
        assert_eq!(patched, "one\n2\n3\n4\n5\n6\n7\neight\n");
    }

    #[test]
    fn rejects_invalid_line_prefix() {
        let diff = "@@ -1,1 +1,1 @@\n*oops\n";
        assert!(matches!(parse_hunks(diff), Err(PatchError::InvalidLinePrefix(_))));
    }

    #[test]
    fn rejects_empty_diff() {
        assert!(matches!(validate_diff_shape(""), Err(PatchError::EmptyDiff)));
    }

    #[test]
    fn rejects_diff_with_no_hunk_header() {
        assert!(matches!(
            validate_diff_shape("just some prose, no diff here"),
            Err(PatchError::NoHunkHeader)
        ));
    }
}
