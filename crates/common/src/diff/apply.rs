// Forward-seek patch replay.
//
// Replays a hunk sequence against the original file with two cursors: `i`
// into the original line array and `j` into the hunk list. The diff only
// names a subset of the file's lines, so context and delete anchors seek
// forward to their first exact match and everything skipped over is copied
// into the output verbatim. Anchors that never match are recorded as
// diagnostics and skipped; the merged file is always produced.

use super::parse::{parse_diff, DiffHunk, HunkKind};

/// Outcome of replaying a diff. `content` is always present, even when some
/// hunks failed to anchor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PatchResult {
    /// The merged file.
    pub content: String,
    /// Context/add/delete hunks that anchored and were applied.
    pub applied_hunks: usize,
    /// Indices (into the hunk sequence) of anchors with no forward match.
    pub unmatched_hunks: Vec<usize>,
}

/// Parse `diff` and replay it against `original`.
pub fn apply_diff(original: &str, diff: &str) -> PatchResult {
    apply_hunks(original, &parse_diff(diff))
}

/// Replay an already-parsed hunk sequence against `original`.
///
/// Matching is exact per-line string equality; ambiguity is resolved by
/// always taking the first match at or after the cursor. An empty hunk
/// sequence returns the original unchanged.
pub fn apply_hunks(original: &str, hunks: &[DiffHunk]) -> PatchResult {
    let lines: Vec<&str> = original.split('\n').collect();
    let mut output: Vec<&str> = Vec::with_capacity(lines.len());
    let mut i = 0; // cursor into `lines`
    let mut applied_hunks = 0;
    let mut unmatched_hunks = Vec::new();

    for (j, hunk) in hunks.iter().enumerate() {
        match hunk.kind {
            // Additions never consume original lines.
            HunkKind::Add => {
                output.push(hunk.text.as_str());
                applied_hunks += 1;
            }
            // Nothing to do: the next anchor's forward seek recovers the
            // elided run of context lines.
            HunkKind::Ellipsis => {}
            HunkKind::Context | HunkKind::Delete => {
                match seek(&lines, i, &hunk.text) {
                    Some(k) => {
                        // Copy lines the diff skipped over.
                        output.extend_from_slice(&lines[i..k]);
                        i = k;
                        if hunk.kind == HunkKind::Context {
                            output.push(lines[i]);
                        }
                        i += 1;
                        applied_hunks += 1;
                    }
                    None => {
                        // No anchor; leave the cursor and keep going.
                        unmatched_hunks.push(j);
                    }
                }
            }
        }
    }

    // Everything after the final anchor is kept verbatim.
    output.extend_from_slice(&lines[i..]);

    PatchResult { content: output.join("\n"), applied_hunks, unmatched_hunks }
}

/// First index `k >= from` with `lines[k] == needle`.
fn seek(lines: &[&str], from: usize, needle: &str) -> Option<usize> {
    lines[from..].iter().position(|line| *line == needle).map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::super::parse::DiffHunk;
    use super::*;

    fn apply(original: &str, hunks: &[DiffHunk]) -> PatchResult {
        apply_hunks(original, hunks)
    }

    // ── Basic replay ───────────────────────────────────────────────

    #[test]
    fn context_delete_add_context() {
        let result = apply(
            "a\nb\nc",
            &[
                DiffHunk::context("a"),
                DiffHunk::delete("b"),
                DiffHunk::add("x"),
                DiffHunk::context("c"),
            ],
        );
        assert_eq!(result.content, "a\nx\nc");
        assert_eq!(result.applied_hunks, 4);
        assert!(result.unmatched_hunks.is_empty());
    }

    #[test]
    fn empty_diff_returns_original_unchanged() {
        let result = apply("a\nb\nc", &[]);
        assert_eq!(result.content, "a\nb\nc");
        assert_eq!(result.applied_hunks, 0);
        assert!(result.unmatched_hunks.is_empty());
    }

    #[test]
    fn additions_never_consume_original_lines() {
        let result = apply("a\nb", &[DiffHunk::add("x"), DiffHunk::add("y")]);
        assert_eq!(result.content, "x\ny\na\nb");
        assert_eq!(result.applied_hunks, 2);
    }

    #[test]
    fn trailing_original_lines_are_kept() {
        let result = apply("a\nb\nc\nd", &[DiffHunk::context("a"), DiffHunk::delete("b")]);
        assert_eq!(result.content, "a\nc\nd");
    }

    // ── Unmatched anchors ──────────────────────────────────────────

    #[test]
    fn unmatched_delete_is_diagnostic_not_fatal() {
        let result = apply("a\nb\nc", &[DiffHunk::delete("zzz")]);
        assert_eq!(result.content, "a\nb\nc");
        assert_eq!(result.applied_hunks, 0);
        assert_eq!(result.unmatched_hunks, vec![0]);
    }

    #[test]
    fn unmatched_anchor_leaves_cursor_for_later_hunks() {
        let result = apply(
            "a\nb\nc",
            &[DiffHunk::context("a"), DiffHunk::delete("zzz"), DiffHunk::delete("b")],
        );
        assert_eq!(result.content, "a\nc");
        assert_eq!(result.applied_hunks, 2);
        assert_eq!(result.unmatched_hunks, vec![1]);
    }

    #[test]
    fn anchor_behind_cursor_never_matches() {
        // Forward seek only: "a" was already consumed, so the second anchor
        // for it cannot re-match earlier lines.
        let result = apply("a\nb", &[DiffHunk::context("b"), DiffHunk::context("a")]);
        assert_eq!(result.content, "a\nb");
        assert_eq!(result.unmatched_hunks, vec![1]);
    }

    // ── Elision ────────────────────────────────────────────────────

    #[test]
    fn ellipsis_preserves_elided_run() {
        let original = "start\none\ntwo\nthree\nfour\nfive\nend";
        let result = apply(
            original,
            &[DiffHunk::context("start"), DiffHunk::ellipsis(), DiffHunk::context("end")],
        );
        assert_eq!(result.content, original);
        assert_eq!(result.applied_hunks, 2);
        assert!(result.unmatched_hunks.is_empty());
    }

    #[test]
    fn ellipsis_then_delete_recovers_context() {
        let result = apply(
            "a\nb\nc\nd",
            &[DiffHunk::context("a"), DiffHunk::ellipsis(), DiffHunk::delete("d")],
        );
        assert_eq!(result.content, "a\nb\nc");
    }

    // ── Inverse round-trip ─────────────────────────────────────────

    #[test]
    fn inverse_diff_restores_original() {
        let original = "a\nb\nc";
        let forward = [
            DiffHunk::context("a"),
            DiffHunk::delete("b"),
            DiffHunk::add("x"),
            DiffHunk::context("c"),
        ];
        let inverse = [
            DiffHunk::context("a"),
            DiffHunk::add("b"),
            DiffHunk::delete("x"),
            DiffHunk::context("c"),
        ];

        let patched = apply(original, &forward);
        assert!(patched.unmatched_hunks.is_empty());
        let restored = apply(&patched.content, &inverse);
        assert!(restored.unmatched_hunks.is_empty());
        assert_eq!(restored.content, original);
    }

    // ── Full text diffs through the parser ─────────────────────────

    const CODE: &str = "\nimport React from 'react';\n\nfunction MyComponent() {\n  return (\n    <div>\n      <h2>Untouched</h2>\n      <h1>Hello, World!</h1>\n    </div>\n  );\n}\n";

    #[test]
    fn react_component_diff() {
        let diff = "\n import React from 'react';\n \n-function MyComponent() {\n+function MyComponent(props) {\n   return (\n     <div>\n+      <p>Hi</p>\n      ...\n-      <h1>Hello, World!</h1>\n+      <h1>Hello, {props.name}!</h1>\n     </div>\n   );\n }\n";
        let expected = "\nimport React from 'react';\n\nfunction MyComponent(props) {\n  return (\n    <div>\n      <p>Hi</p>\n      <h2>Untouched</h2>\n      <h1>Hello, {props.name}!</h1>\n    </div>\n  );\n}\n";

        let result = apply_diff(CODE, diff);
        assert_eq!(result.content, expected);
        assert!(result.unmatched_hunks.is_empty());
    }

    #[test]
    fn short_diff_deletes_and_keeps_tail() {
        let diff = "\n import React from 'react';\n \n-function MyComponent() {\n";
        let result = apply_diff(CODE, diff);
        assert_eq!(
            result.content,
            "\nimport React from 'react';\n\n  return (\n    <div>\n      <h2>Untouched</h2>\n      <h1>Hello, World!</h1>\n    </div>\n  );\n}\n"
        );
    }
}
