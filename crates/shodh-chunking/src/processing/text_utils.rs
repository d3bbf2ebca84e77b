//! Whitespace and path normalization shared by the parsers and chunkers.

use regex::Regex;
use std::sync::LazyLock;

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank line regex is valid"));
static INLINE_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\S\n]{3,}").expect("inline space regex is valid"));
static DASH_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-{3,}").expect("dash run regex is valid"));

/// Collapse runs of three or more newlines, inline whitespace or dashes, then trim.
pub fn cleanup_content(content: &str) -> String {
    let output = BLANK_LINES_RE.replace_all(content, "\n\n");
    let output = INLINE_SPACE_RE.replace_all(&output, "  ");
    let output = DASH_RUN_RE.replace_all(&output, "---");
    output.trim().to_string()
}

/// Turn an escaped Windows path (`a\\b`) or a plain one (`a\b`) into `a/b`.
pub fn convert_escaped_to_posix(escaped_path: &str) -> String {
    escaped_path.replace("\\\\", "\\").replace('\\', "/")
}

/// Final path component, accepting either separator.
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}
