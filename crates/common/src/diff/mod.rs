// LLM code-diff handling: parse the constrained diff format the assistant
// emits, then replay it against the current source with a forward-seeking
// match strategy. Parsing and applying never fail; at worst the result
// carries diagnostics for hunks that found no anchor.

pub mod apply;
pub mod parse;

pub use apply::{apply_diff, apply_hunks, PatchResult};
pub use parse::{extract_diff_block, parse_diff, DiffHunk, HunkKind};
