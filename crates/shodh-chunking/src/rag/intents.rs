//! Parsing of search intents from LLM replies.
//!
//! The intent rewriting prompt asks for a list such as
//! `["what is azure", "vm sizes"]`, but replies routinely come back with
//! single quotes, stray escapes or a missing bracket.

use serde_json::Value;

/// Pull the quoted elements out of a loosely formatted list.
///
/// Nothing is returned unless the text contains a `[`. Each element is
/// delimited by the quote character it opened with, or by `,`, `[` or `]`.
/// Backslashes are dropped and surrounding quotes or spaces trimmed.
pub fn extract_intents(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let Some(start) = chars.iter().position(|&c| c == '[') else {
        return Vec::new();
    };

    let mut intents = Vec::new();
    let mut i = start;
    while i < chars.len() {
        let mut quote = '"';
        while i < chars.len() && matches!(chars[i], '[' | ',' | ' ' | '"' | '\'' | '\\') {
            if chars[i] == '\'' {
                quote = '\'';
            }
            i += 1;
        }
        if i == chars.len() || chars[i] == ']' {
            break;
        }

        let mut intent = String::new();
        while i < chars.len() && chars[i] != quote && !matches!(chars[i], ',' | '[' | ']') {
            if chars[i] != '\\' {
                intent.push(chars[i]);
            }
            i += 1;
        }

        let intent = intent.trim_matches(|c| matches!(c, '\'' | '"' | ' '));
        if !intent.is_empty() {
            intents.push(intent.to_string());
        }
    }
    intents
}

fn strip_quotes_symmetric(mut text: &str) -> &str {
    let is_quote = |c: char| c == '\'' || c == '"';
    while text.len() >= 2 && text.starts_with(is_quote) && text.ends_with(is_quote) {
        text = &text[1..text.len() - 1];
    }
    text
}

/// Resolve backslash escape sequences. Unknown escapes are kept verbatim.
fn unescape_backslashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(&next) = chars.peek() else {
            out.push(c);
            break;
        };
        let simple = match next {
            'n' => Some('\n'),
            't' => Some('\t'),
            'r' => Some('\r'),
            '\\' => Some('\\'),
            '"' => Some('"'),
            '\'' => Some('\''),
            _ => None,
        };
        if let Some(resolved) = simple {
            chars.next();
            out.push(resolved);
            continue;
        }

        let width = match next {
            'u' => 4,
            'x' => 2,
            _ => 0,
        };
        let hex: String = chars.clone().skip(1).take(width).collect();
        let decoded = (width > 0 && hex.len() == width)
            .then(|| u32::from_str_radix(&hex, 16).ok())
            .flatten()
            .and_then(char::from_u32);
        match decoded {
            Some(resolved) => {
                for _ in 0..=width {
                    chars.next();
                }
                out.push(resolved);
            }
            None => out.push(c),
        }
    }
    out
}

/// Read a list of strings from `text`.
///
/// The text is parsed as JSON, then again after resolving backslash escapes.
/// A list yields its elements; any other value, or text that is not JSON at
/// all, yields a single element. Matching outer quotes are stripped from
/// every element.
pub fn convert_string_to_list(text: &str) -> Vec<String> {
    let (source, parsed) = match serde_json::from_str::<Value>(text) {
        Ok(value) => (text.to_string(), Some(value)),
        Err(_) => {
            let unescaped = unescape_backslashes(text);
            let parsed = serde_json::from_str::<Value>(&unescaped).ok();
            (unescaped, parsed)
        }
    };

    let items: Vec<String> = match parsed {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(_)) | None => vec![source],
        Some(other) => vec![other.to_string()],
    };

    items
        .iter()
        .map(|item| strip_quotes_symmetric(item).to_string())
        .collect()
}
