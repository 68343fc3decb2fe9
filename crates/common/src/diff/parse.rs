// Parser for the assistant's diff format.
//
// The diff is produced by an LLM, not a diff tool: context lines sometimes
// lose their leading space, runs of context are elided with a bare `...`,
// and the closing tag of the surrounding block may be missing. Parsing is
// therefore defensive and never fails.

/// Opening marker of a diff block inside a larger assistant message.
pub const DIFF_BLOCK_OPEN: &str = "<code_diff>";
/// Closing marker. May be absent, in which case the block runs to the end.
pub const DIFF_BLOCK_CLOSE: &str = "</code_diff>";

/// The kind of one typed diff line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HunkKind {
    /// Anchor line that must exist in the original file.
    Context,
    /// Line inserted into the output; never consumes an original line.
    Add,
    /// Anchor line removed from the output.
    Delete,
    /// Elision marker: skip forward past any number of unlisted context
    /// lines to the next anchor.
    Ellipsis,
}

/// One typed line within a parsed diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub kind: HunkKind,
    pub text: String,
}

impl DiffHunk {
    pub fn context(text: impl Into<String>) -> Self {
        Self { kind: HunkKind::Context, text: text.into() }
    }

    pub fn add(text: impl Into<String>) -> Self {
        Self { kind: HunkKind::Add, text: text.into() }
    }

    pub fn delete(text: impl Into<String>) -> Self {
        Self { kind: HunkKind::Delete, text: text.into() }
    }

    pub fn ellipsis() -> Self {
        Self { kind: HunkKind::Ellipsis, text: String::new() }
    }
}

/// Extract the diff block between `<code_diff>` and `</code_diff>`.
///
/// A missing closing tag means "read to end of text". Returns `None` only
/// when there is no opening tag at all. One newline on either side of the
/// block body is trimmed so the tag lines themselves never become hunks.
pub fn extract_diff_block(text: &str) -> Option<&str> {
    let start = text.find(DIFF_BLOCK_OPEN)? + DIFF_BLOCK_OPEN.len();
    let rest = &text[start..];
    let end = rest.find(DIFF_BLOCK_CLOSE).unwrap_or(rest.len());
    let block = &rest[..end];
    let block = block.strip_prefix("\r\n").unwrap_or(block);
    let block = block.strip_prefix('\n').unwrap_or(block);
    let block = block.strip_suffix('\n').unwrap_or(block);
    Some(block.strip_suffix('\r').unwrap_or(block))
}

/// Parse a diff body into an ordered hunk sequence.
///
/// `+` is an addition, `-` a deletion, a leading space is context, and a
/// bare `...` (indentation allowed) is an elision marker. A line with no
/// recognized prefix is treated as context, since the generator sometimes
/// omits the space.
pub fn parse_diff(diff: &str) -> Vec<DiffHunk> {
    diff.lines()
        .map(|line| {
            if let Some(text) = line.strip_prefix('+') {
                DiffHunk::add(text)
            } else if let Some(text) = line.strip_prefix('-') {
                DiffHunk::delete(text)
            } else if line.trim() == "..." {
                DiffHunk::ellipsis()
            } else if let Some(text) = line.strip_prefix(' ') {
                DiffHunk::context(text)
            } else {
                DiffHunk::context(line)
            }
        })
        .collect()
}
