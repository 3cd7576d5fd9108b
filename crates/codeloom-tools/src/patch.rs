//! Unified-diff application and generation.
//!
//! The applier is deliberately lenient: hunk offsets are trusted and removed
//! lines are not checked against the original. The only hard requirement is
//! at least one `@@` hunk marker.

use crate::ToolError;

/// Result of applying a diff in memory.
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    pub content: String,
    pub added: usize,
    pub removed: usize,
}

/// True when the diff declares creation of a new file.
pub fn declares_creation(diff: &str) -> bool {
    diff.lines()
        .any(|line| line.starts_with("--- ") && line.contains("/dev/null"))
}

/// Apply a unified diff to `original`.
///
/// Hunk header `@@ -S,L +S',L' @@`: unprocessed original lines before `S`
/// are emitted first; then `+` emits, `-` consumes without emitting, a space
/// emits and consumes, and `---`/`+++`/`\` metadata lines are ignored. Lines
/// without a leading sign count as context. Remaining original lines are
/// flushed at the end.
pub fn apply_unified(original: &str, diff: &str) -> Result<AppliedPatch, ToolError> {
    if !diff.lines().any(|line| line.starts_with("@@")) {
        return Err(ToolError::PatchFormat(
            "diff contains no @@ hunk marker".to_string(),
        ));
    }

    let original_lines: Vec<&str> = original.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut next = 0usize; // index of the next unconsumed original line
    let mut added = 0usize;
    let mut removed = 0usize;

    for line in diff.lines() {
        if let Some(header) = line.strip_prefix("@@") {
            let start = parse_hunk_start(header)?;
            let target = start.saturating_sub(1);
            while next < target && next < original_lines.len() {
                out.push(original_lines[next].to_string());
                next += 1;
            }
        } else if line.starts_with("---") || line.starts_with("+++") || line.starts_with('\\') {
            // Diff metadata.
        } else if let Some(body) = line.strip_prefix('+') {
            out.push(body.to_string());
            added += 1;
        } else if line.starts_with('-') {
            if next < original_lines.len() {
                next += 1;
            }
            removed += 1;
        } else {
            let body = line.strip_prefix(' ').unwrap_or(line);
            if next < original_lines.len() {
                out.push(original_lines[next].to_string());
                next += 1;
            } else {
                out.push(body.to_string());
            }
        }
    }

    while next < original_lines.len() {
        out.push(original_lines[next].to_string());
        next += 1;
    }

    let keep_trailing_newline = original.ends_with('\n') || original.is_empty();
    let mut content = out.join("\n");
    if !out.is_empty() && keep_trailing_newline {
        content.push('\n');
    }

    Ok(AppliedPatch {
        content,
        added,
        removed,
    })
}

/// Parse the 1-based original start out of a hunk header body
/// (everything after the leading `@@`).
fn parse_hunk_start(header: &str) -> Result<usize, ToolError> {
    let minus = header
        .split_whitespace()
        .find(|token| token.starts_with('-'))
        .ok_or_else(|| ToolError::PatchFormat(format!("malformed hunk header: @@{header}")))?;
    let start_text = minus[1..].split(',').next().unwrap_or_default();
    start_text
        .parse::<usize>()
        .map_err(|_| ToolError::PatchFormat(format!("malformed hunk header: @@{header}")))
}

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Line-level edit script between two texts, via the classic LCS table.
fn edit_ops<'a>(before: &[&'a str], after: &[&'a str]) -> Vec<(Op, usize)> {
    let n = before.len();
    let m = after.len();
    let mut table = vec![vec![0u32; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            table[i][j] = if before[i - 1] == after[j - 1] {
                table[i - 1][j - 1] + 1
            } else {
                table[i - 1][j].max(table[i][j - 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (n, m);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && before[i - 1] == after[j - 1] {
            ops.push((Op::Equal, i - 1));
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || table[i][j - 1] >= table[i - 1][j]) {
            ops.push((Op::Insert, j - 1));
            j -= 1;
        } else {
            ops.push((Op::Delete, i - 1));
            i -= 1;
        }
    }
    ops.reverse();
    ops
}

/// `(added, removed)` line counts between two texts.
pub fn line_diff_stats(before: &str, after: &str) -> (usize, usize) {
    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    let ops = edit_ops(&before_lines, &after_lines);
    let added = ops.iter().filter(|(op, _)| *op == Op::Insert).count();
    let removed = ops.iter().filter(|(op, _)| *op == Op::Delete).count();
    (added, removed)
}

const HUNK_CONTEXT: usize = 3;

/// Produce a unified-format patch turning `before` into `after`, with three
/// lines of context per hunk.
pub fn generate_unified(path: &str, before: &str, after: &str) -> String {
    let before_lines: Vec<&str> = before.lines().collect();
    let after_lines: Vec<&str> = after.lines().collect();
    let ops = edit_ops(&before_lines, &after_lines);

    // Group changed regions into hunks, merging any separated by at most
    // 2 * context equal lines.
    let mut hunks: Vec<(usize, usize)> = Vec::new();
    let mut open: Option<usize> = None;
    let mut last_change: Option<usize> = None;
    for (idx, (op, _)) in ops.iter().enumerate() {
        if *op == Op::Equal {
            continue;
        }
        match last_change {
            Some(prev) if idx - prev > HUNK_CONTEXT * 2 => {
                hunks.push((open.take().unwrap_or(0), (prev + HUNK_CONTEXT).min(ops.len() - 1)));
                open = Some(idx.saturating_sub(HUNK_CONTEXT));
            }
            None => open = Some(idx.saturating_sub(HUNK_CONTEXT)),
            _ => {}
        }
        last_change = Some(idx);
    }
    if let (Some(start), Some(prev)) = (open, last_change) {
        hunks.push((start, (prev + HUNK_CONTEXT).min(ops.len() - 1)));
    }

    let mut out = format!("--- a/{path}\n+++ b/{path}\n");
    for (start, end) in hunks {
        let mut old_start = 1usize;
        let mut new_start = 1usize;
        for (op, _) in ops.iter().take(start) {
            if matches!(op, Op::Equal | Op::Delete) {
                old_start += 1;
            }
            if matches!(op, Op::Equal | Op::Insert) {
                new_start += 1;
            }
        }
        let window = &ops[start..=end];
        let old_count = window
            .iter()
            .filter(|(op, _)| matches!(op, Op::Equal | Op::Delete))
            .count();
        let new_count = window
            .iter()
            .filter(|(op, _)| matches!(op, Op::Equal | Op::Insert))
            .count();
        out.push_str(&format!(
            "@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"
        ));
        for (op, idx) in window {
            match op {
                Op::Equal => out.push_str(&format!(" {}\n", before_lines[*idx])),
                Op::Delete => out.push_str(&format!("-{}\n", before_lines[*idx])),
                Op::Insert => out.push_str(&format!("+{}\n", after_lines[*idx])),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_diff_without_hunk_marker() {
        let err = apply_unified("a\n", "--- a/x\n+++ b/x\n+hello\n").expect_err("no marker");
        assert!(matches!(err, ToolError::PatchFormat(_)));
    }

    #[test]
    fn empty_hunk_body_leaves_content_unchanged() {
        let original = "one\ntwo\nthree\n";
        let applied = apply_unified(original, "@@ -1,0 +1,0 @@\n").expect("apply");
        assert_eq!(applied.content, original);
        assert_eq!((applied.added, applied.removed), (0, 0));
    }

    #[test]
    fn creation_from_dev_null() {
        let diff = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,1 @@\n+hello\n";
        assert!(declares_creation(diff));
        let applied = apply_unified("", diff).expect("apply");
        assert_eq!(applied.content, "hello\n");
        assert_eq!(applied.added, 1);
    }

    #[test]
    fn replaces_a_line_in_place() {
        let original = "one\ntwo\nthree\n";
        let diff = "@@ -2,1 +2,1 @@\n-two\n+TWO\n";
        let applied = apply_unified(original, diff).expect("apply");
        assert_eq!(applied.content, "one\nTWO\nthree\n");
        assert_eq!((applied.added, applied.removed), (1, 1));
    }

    #[test]
    fn context_lines_consume_original() {
        let original = "a\nb\nc\n";
        let diff = "@@ -1,3 +1,4 @@\n a\n b\n+inserted\n c\n";
        let applied = apply_unified(original, diff).expect("apply");
        assert_eq!(applied.content, "a\nb\ninserted\nc\n");
    }

    #[test]
    fn missing_trailing_newline_is_preserved() {
        let original = "solo";
        let applied = apply_unified(original, "@@ -1,1 +1,1 @@\n solo\n").expect("apply");
        assert_eq!(applied.content, "solo");
    }

    #[test]
    fn lenient_applier_trusts_offsets() {
        // The removed line does not match the original; the applier does not
        // care and consumes one original line anyway.
        let original = "alpha\nbeta\n";
        let diff = "@@ -1,1 +1,1 @@\n-something-else\n+ALPHA\n";
        let applied = apply_unified(original, diff).expect("apply");
        assert_eq!(applied.content, "ALPHA\nbeta\n");
    }

    #[test]
    fn generate_then_apply_round_trips() {
        let before = "fn main() {\n    old();\n}\n";
        let after = "fn main() {\n    new();\n    extra();\n}\n";
        let diff = generate_unified("src/main.rs", before, after);
        assert!(diff.contains("@@"));
        let applied = apply_unified(before, &diff).expect("apply");
        assert_eq!(applied.content, after);
    }

    #[test]
    fn stats_count_inserts_and_deletes() {
        let (added, removed) = line_diff_stats("a\nb\nc\n", "a\nx\nc\nd\n");
        assert_eq!((added, removed), (2, 1));
    }

    #[test]
    fn malformed_hunk_header_is_rejected() {
        let err = apply_unified("a\n", "@@ nonsense @@\n+x\n").expect_err("bad header");
        assert!(matches!(err, ToolError::PatchFormat(_)));
    }
}
