use regex::Regex;
use std::sync::LazyLock;

use crate::error::{ChunkingError, Result};
use crate::processing::text_utils::cleanup_content;
use crate::tokenizer::clip_text;
use crate::types::{Document, DocumentFormat};

/// Titles guessed from body text are clipped to this many tokens.
pub const TITLE_MAX_TOKENS: usize = 64;

static MD_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("markdown link regex is valid")
});
static MD_LIST_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:>\s*)*(?:[-*+]\s+|\d+[.)]\s+)?").expect("markdown list marker regex is valid")
});

/// Turns raw file content into a [`Document`] with a title and cleaned content.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, content: &str, file_name: Option<&str>) -> Result<Document>;
}

pub struct TextParser;
pub struct MarkdownParser;
pub struct HtmlParser;
pub struct PythonParser;
pub struct CsvParser;

static TEXT_PARSER: TextParser = TextParser;
static MARKDOWN_PARSER: MarkdownParser = MarkdownParser;
static HTML_PARSER: HtmlParser = HtmlParser;
static PYTHON_PARSER: PythonParser = PythonParser;
static CSV_PARSER: CsvParser = CsvParser;

/// Parser for `format`. PDFs are parsed as HTML when a layout HTML rendering
/// was supplied, as plain text otherwise.
pub fn parser_for(format: DocumentFormat, use_layout_html: bool) -> &'static dyn DocumentParser {
    match format {
        DocumentFormat::Markdown => &MARKDOWN_PARSER,
        DocumentFormat::Text => &TEXT_PARSER,
        DocumentFormat::Html => &HTML_PARSER,
        DocumentFormat::Python => &PYTHON_PARSER,
        DocumentFormat::Csv => &CSV_PARSER,
        DocumentFormat::Pdf if use_layout_html => &HTML_PARSER,
        DocumentFormat::Pdf => &TEXT_PARSER,
    }
}

impl DocumentParser for TextParser {
    fn parse(&self, content: &str, file_name: Option<&str>) -> Result<Document> {
        let title = content
            .lines()
            .find_map(|line| line.strip_prefix("title: ").map(|t| t.trim().to_string()))
            .filter(|t| !t.is_empty())
            .or_else(|| {
                content
                    .lines()
                    .find(|line| line.chars().any(char::is_alphanumeric))
                    .map(|line| line.trim().to_string())
            })
            .map(|t| clip_text(&t, TITLE_MAX_TOKENS))
            .or_else(|| file_name.map(str::to_string));

        Ok(Document {
            content: cleanup_content(content),
            title,
            ..Default::default()
        })
    }
}

impl DocumentParser for MarkdownParser {
    fn parse(&self, content: &str, file_name: Option<&str>) -> Result<Document> {
        let title = markdown_title(content)
            .or_else(|| file_name.map(str::to_string))
            .unwrap_or_default();

        Ok(Document {
            content: cleanup_content(content),
            title: Some(title),
            ..Default::default()
        })
    }
}

impl DocumentParser for HtmlParser {
    fn parse(&self, content: &str, file_name: Option<&str>) -> Result<Document> {
        let title = html_title(content)
            .or_else(|| file_name.map(str::to_string))
            .unwrap_or_default();

        // The markup is kept as is; only whitespace runs are normalized.
        Ok(Document {
            content: cleanup_content(content),
            title: Some(title),
            ..Default::default()
        })
    }
}

impl DocumentParser for PythonParser {
    fn parse(&self, content: &str, file_name: Option<&str>) -> Result<Document> {
        let docstring = scan_python(content)?.filter(|d| !d.is_empty());
        let title = match (docstring, file_name) {
            (Some(doc), Some(name)) => Some(format!("{}: {}", name, doc)),
            (Some(doc), None) => Some(doc),
            (None, name) => name.map(str::to_string),
        };

        Ok(Document {
            content: content.to_string(),
            title,
            ..Default::default()
        })
    }
}

impl DocumentParser for CsvParser {
    fn parse(&self, content: &str, _file_name: Option<&str>) -> Result<Document> {
        Ok(Document::new(content))
    }
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum HtmlToken<'a> {
    Open(String),
    Close(String),
    Text(&'a str),
}

/// Flat tag/text tokenization. Comments, declarations and the bodies of
/// `<script>`/`<style>` are dropped.
fn html_tokens(html: &str) -> Vec<HtmlToken<'_>> {
    let bytes = html.as_bytes();
    let lower = html.to_ascii_lowercase();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut text_start = 0;
    let mut i = 0;

    while i < len {
        let starts_tag = bytes[i] == b'<'
            && bytes
                .get(i + 1)
                .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, b'/' | b'!' | b'?'));
        if !starts_tag {
            i += 1;
            continue;
        }

        if text_start < i {
            tokens.push(HtmlToken::Text(&html[text_start..i]));
        }

        if lower[i..].starts_with("<!--") {
            i = lower[i + 4..].find("-->").map_or(len, |p| i + 4 + p + 3);
            text_start = i;
            continue;
        }

        let tag_end = lower[i..].find('>').map(|p| i + p);
        let inner = &lower[i + 1..tag_end.unwrap_or(len)];
        i = tag_end.map_or(len, |e| e + 1);
        text_start = i;

        if let Some(name) = inner.strip_prefix('/') {
            tokens.push(HtmlToken::Close(tag_name(name)));
        } else if !inner.starts_with('!') && !inner.starts_with('?') {
            let name = tag_name(inner);
            if name == "script" || name == "style" {
                let closing = format!("</{}", name);
                i = lower[i..].find(&closing).map_or(len, |p| i + p);
                text_start = i;
            }
            tokens.push(HtmlToken::Open(name));
        }
    }

    if text_start < len {
        tokens.push(HtmlToken::Text(&html[text_start..]));
    }
    tokens
}

fn tag_name(inner: &str) -> String {
    inner
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .next()
        .unwrap_or("")
        .to_string()
}

/// Decode the handful of entities that show up in titles.
pub fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Text of the first `name` element: stripped text nodes joined without a
/// separator. `None` when the element does not occur.
fn element_text(tokens: &[HtmlToken<'_>], name: &str) -> Option<String> {
    let start = tokens
        .iter()
        .position(|t| matches!(t, HtmlToken::Open(n) if n == name))?;

    let mut depth = 0usize;
    let mut text = String::new();
    for token in &tokens[start + 1..] {
        match token {
            HtmlToken::Open(n) if n == name => depth += 1,
            HtmlToken::Close(n) if n == name => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            HtmlToken::Text(t) => text.push_str(decode_entities(t).trim()),
            _ => {}
        }
    }
    Some(text)
}

/// `<title>`, else the first `<h1>`, else the first `<h2>`; when that yields
/// nothing, the first non-empty text node clipped to [`TITLE_MAX_TOKENS`].
pub fn html_title(html: &str) -> Option<String> {
    let tokens = html_tokens(html);

    let title = element_text(&tokens, "title")
        .filter(|t| !t.is_empty())
        .or_else(|| element_text(&tokens, "h1"))
        .or_else(|| element_text(&tokens, "h2"))
        .filter(|t| !t.is_empty());
    if title.is_some() {
        return title;
    }

    tokens.iter().find_map(|token| match token {
        HtmlToken::Text(t) => {
            let decoded = decode_entities(t);
            let stripped = decoded.trim();
            (!stripped.is_empty()).then(|| clip_text(stripped, TITLE_MAX_TOKENS))
        }
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

fn strip_inline_markup(text: &str) -> String {
    let text = MD_LINK_RE.replace_all(text, "$1");
    text.chars()
        .filter(|c| !matches!(c, '*' | '`'))
        .collect::<String>()
        .trim()
        .to_string()
}

fn atx_heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some((level, rest.trim().trim_end_matches('#').trim_end()))
}

fn setext_level(line: &str) -> Option<usize> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c == '=') {
        Some(1)
    } else if trimmed.chars().all(|c| c == '-') {
        Some(2)
    } else {
        None
    }
}

/// Title of a markdown document, mirroring the HTML title rules on the
/// rendered structure.
pub fn markdown_title(content: &str) -> Option<String> {
    let mut first_h1: Option<String> = None;
    let mut first_h2: Option<String> = None;
    let mut first_text: Option<String> = None;
    let mut in_fence = false;
    let mut previous: Option<&str> = None;

    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            previous = None;
            continue;
        }
        if in_fence {
            if first_text.is_none() && !line.trim().is_empty() {
                first_text = Some(line.trim().to_string());
            }
            continue;
        }

        let heading = if let Some((level, text)) = atx_heading(line) {
            Some((level, text.to_string()))
        } else if let (Some(level), Some(prev)) = (setext_level(line), previous) {
            Some((level, prev.trim().to_string()))
        } else {
            None
        };

        if let Some((level, text)) = heading {
            let text = strip_inline_markup(&text);
            match level {
                1 if first_h1.is_none() => first_h1 = Some(text),
                2 if first_h2.is_none() => first_h2 = Some(text),
                _ => {}
            }
            previous = None;
            continue;
        }

        if first_text.is_none() {
            let body = strip_inline_markup(&MD_LIST_MARKER_RE.replace(line, ""));
            if !body.is_empty() {
                first_text = Some(body);
            }
        }
        previous = (!line.trim().is_empty()).then_some(line);
    }

    first_h1
        .or(first_h2)
        .filter(|t| !t.is_empty())
        .or_else(|| first_text.map(|t| clip_text(&t, TITLE_MAX_TOKENS)))
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

enum FirstStatement {
    Pending,
    Candidate(String),
    Docstring(String),
    Other,
}

impl FirstStatement {
    fn settle(&mut self) {
        if let FirstStatement::Candidate(doc) = self {
            *self = FirstStatement::Docstring(std::mem::take(doc));
        }
    }

    fn significant(&mut self, c: char) {
        match self {
            FirstStatement::Pending => *self = FirstStatement::Other,
            FirstStatement::Candidate(_) if c == ';' => self.settle(),
            FirstStatement::Candidate(_) => *self = FirstStatement::Other,
            _ => {}
        }
    }
}

fn python_error(line: usize, message: impl Into<String>) -> ChunkingError {
    ChunkingError::PythonSyntax {
        line,
        message: message.into(),
    }
}

fn is_string_prefix(ident: &str) -> bool {
    matches!(
        ident.to_ascii_lowercase().as_str(),
        "r" | "u" | "b" | "f" | "br" | "rb" | "fr" | "rf"
    )
}

/// Lexical validity check over Python source. Returns the cleaned module
/// docstring when the first statement is a plain string literal.
fn scan_python(source: &str) -> Result<Option<String>> {
    let chars: Vec<char> = source.chars().collect();
    let n = chars.len();
    let mut pos = 0;
    let mut line = 1;

    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut at_line_start = true;
    let mut expect_indent = false;
    let mut ends_with_colon = false;
    let mut first = FirstStatement::Pending;

    while pos < n {
        if at_line_start && brackets.is_empty() {
            let mut col = 0;
            while pos < n && matches!(chars[pos], ' ' | '\t' | '\x0c') {
                col = match chars[pos] {
                    '\t' => (col / 8 + 1) * 8,
                    ' ' => col + 1,
                    _ => 0,
                };
                pos += 1;
            }
            if pos >= n {
                break;
            }
            match chars[pos] {
                '\n' => {
                    line += 1;
                    pos += 1;
                    continue;
                }
                '\r' => {
                    pos += 1;
                    continue;
                }
                '#' => {
                    while pos < n && chars[pos] != '\n' {
                        pos += 1;
                    }
                    continue;
                }
                _ => {}
            }

            let top = indents.last().copied().unwrap_or(0);
            if col > top {
                if !expect_indent {
                    return Err(python_error(line, "unexpected indent"));
                }
                indents.push(col);
            } else {
                if expect_indent {
                    return Err(python_error(line, "expected an indented block"));
                }
                while col < indents.last().copied().unwrap_or(0) {
                    indents.pop();
                }
                if col != indents.last().copied().unwrap_or(0) {
                    return Err(python_error(
                        line,
                        "unindent does not match any outer indentation level",
                    ));
                }
            }
            expect_indent = false;
            ends_with_colon = false;
            at_line_start = false;
            continue;
        }

        let c = chars[pos];
        match c {
            '#' => {
                while pos < n && chars[pos] != '\n' {
                    pos += 1;
                }
            }
            '\n' => {
                line += 1;
                pos += 1;
                if brackets.is_empty() {
                    expect_indent = ends_with_colon;
                    at_line_start = true;
                    first.settle();
                }
            }
            '\\' => match chars.get(pos + 1) {
                Some('\n') => {
                    line += 1;
                    pos += 2;
                }
                Some('\r') if chars.get(pos + 2) == Some(&'\n') => {
                    line += 1;
                    pos += 3;
                }
                _ => {
                    return Err(python_error(
                        line,
                        "unexpected character after line continuation character",
                    ))
                }
            },
            '\'' | '"' => {
                let (body, end, end_line) = scan_string_literal(&chars, pos, line)?;
                record_string(&mut first, &body, "");
                pos = end;
                line = end_line;
                ends_with_colon = false;
            }
            '(' | '[' | '{' => {
                first.significant(c);
                brackets.push((c, line));
                ends_with_colon = false;
                pos += 1;
            }
            ')' | ']' | '}' => {
                first.significant(c);
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(python_error(
                            line,
                            format!(
                                "closing parenthesis '{}' does not match opening parenthesis '{}' on line {}",
                                c, open, open_line
                            ),
                        ))
                    }
                    None => return Err(python_error(line, format!("unmatched '{}'", c))),
                }
                ends_with_colon = false;
                pos += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < n && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let ident: String = chars[start..pos].iter().collect();
                if pos < n && matches!(chars[pos], '\'' | '"') && is_string_prefix(&ident) {
                    let (body, end, end_line) = scan_string_literal(&chars, pos, line)?;
                    record_string(&mut first, &body, &ident.to_ascii_lowercase());
                    pos = end;
                    line = end_line;
                } else {
                    first.significant(c);
                }
                ends_with_colon = false;
            }
            c if c.is_whitespace() => pos += 1,
            c => {
                first.significant(c);
                ends_with_colon = c == ':';
                pos += 1;
            }
        }
    }

    if let Some((open, open_line)) = brackets.first() {
        return Err(python_error(*open_line, format!("'{}' was never closed", open)));
    }
    if expect_indent || (ends_with_colon && !at_line_start) {
        return Err(python_error(line, "expected an indented block"));
    }

    first.settle();
    Ok(match first {
        FirstStatement::Docstring(doc) => Some(cleandoc(&doc)),
        _ => None,
    })
}

fn record_string(first: &mut FirstStatement, body: &str, prefix: &str) {
    let docstring_prefix = !prefix.contains('b') && !prefix.contains('f');
    match first {
        FirstStatement::Pending if docstring_prefix => {
            let value = if prefix.contains('r') {
                body.to_string()
            } else {
                unescape_python(body)
            };
            *first = FirstStatement::Candidate(value);
        }
        FirstStatement::Candidate(doc) if docstring_prefix => {
            doc.push_str(&if prefix.contains('r') {
                body.to_string()
            } else {
                unescape_python(body)
            });
        }
        FirstStatement::Pending | FirstStatement::Candidate(_) => *first = FirstStatement::Other,
        _ => {}
    }
}

/// Scan a string literal whose opening quote is at `start`. Returns the raw
/// body, the position after the closing quote and the line it ends on.
fn scan_string_literal(chars: &[char], start: usize, line: usize) -> Result<(String, usize, usize)> {
    let n = chars.len();
    let quote = chars[start];
    let triple = start + 2 < n && chars[start + 1] == quote && chars[start + 2] == quote;
    let mut pos = if triple { start + 3 } else { start + 1 };
    let body_start = pos;
    let mut current_line = line;

    loop {
        if pos >= n {
            let message = if triple {
                "unterminated triple-quoted string literal"
            } else {
                "unterminated string literal"
            };
            return Err(python_error(line, message));
        }
        match chars[pos] {
            '\\' => {
                if chars.get(pos + 1) == Some(&'\n') {
                    current_line += 1;
                }
                pos += 2;
            }
            '\n' if !triple => return Err(python_error(line, "unterminated string literal")),
            '\n' => {
                current_line += 1;
                pos += 1;
            }
            c if c == quote => {
                if !triple {
                    let body: String = chars[body_start..pos].iter().collect();
                    return Ok((body, pos + 1, current_line));
                }
                if pos + 2 < n && chars[pos + 1] == quote && chars[pos + 2] == quote {
                    let body: String = chars[body_start..pos].iter().collect();
                    return Ok((body, pos + 3, current_line));
                }
                pos += 1;
            }
            _ => pos += 1,
        }
    }
}

fn unescape_python(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('\n') => {}
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn expand_tabs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut col = 0;
    for c in line.chars() {
        if c == '\t' {
            let spaces = 8 - col % 8;
            out.extend(std::iter::repeat(' ').take(spaces));
            col += spaces;
        } else {
            out.push(c);
            col += 1;
        }
    }
    out
}

/// Remove common leading indentation and surrounding blank lines from a
/// docstring.
pub fn cleandoc(doc: &str) -> String {
    let lines: Vec<String> = doc.split('\n').map(expand_tabs).collect();

    let margin = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim_start().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| {
            if i == 0 {
                l.trim_start().to_string()
            } else if l.len() >= margin {
                l[margin..].to_string()
            } else {
                l.trim_start().to_string()
            }
        })
        .collect();

    while cleaned.first().is_some_and(|l| l.trim().is_empty()) {
        cleaned.remove(0);
    }
    while cleaned.last().is_some_and(|l| l.trim().is_empty()) {
        cleaned.pop();
    }
    cleaned.join("\n")
}
