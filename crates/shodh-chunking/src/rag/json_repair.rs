//! Repair of JSON text cut off at an arbitrary point.
//!
//! Prompt documentation is serialized, then clipped to a token budget, so
//! the text can end inside a string, a key, after a colon or between
//! elements. [`make_valid_json`] closes what can be closed and drops the
//! trailing fragment that cannot.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Key,
    Colon,
    Value,
    CommaOrClose,
}

#[derive(Debug, Clone, Copy)]
enum Escape {
    None,
    /// Byte offset of the backslash
    Backslash(usize),
    /// Byte offset of the backslash and hex digits read so far
    Unicode(usize, u8),
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Structural,
    InString { key: bool, escape: Escape },
    InScalar,
}

struct Scanner {
    stack: Vec<Container>,
    expect: Expect,
    mode: Mode,
    /// Longest prefix known to be valid once closed, with its closers.
    safe: Option<(usize, String)>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            expect: Expect::Value,
            mode: Mode::Structural,
            safe: None,
        }
    }

    fn closers(&self) -> String {
        self.stack
            .iter()
            .rev()
            .map(|c| match c {
                Container::Object => '}',
                Container::Array => ']',
            })
            .collect()
    }

    fn mark_safe(&mut self, end: usize) {
        self.safe = Some((end, self.closers()));
    }

    fn value_done(&mut self, end: usize) {
        self.expect = Expect::CommaOrClose;
        self.mark_safe(end);
    }

    fn structural(&mut self, i: usize, c: char) {
        match c {
            c if c.is_whitespace() => {}
            '{' => {
                self.stack.push(Container::Object);
                self.expect = Expect::Key;
                self.mark_safe(i + 1);
            }
            '[' => {
                self.stack.push(Container::Array);
                self.expect = Expect::Value;
                self.mark_safe(i + 1);
            }
            '}' | ']' => {
                if self.stack.pop().is_some() {
                    self.value_done(i + 1);
                }
            }
            ':' => self.expect = Expect::Value,
            ',' => {
                self.expect = match self.stack.last() {
                    Some(Container::Object) => Expect::Key,
                    _ => Expect::Value,
                }
            }
            '"' => {
                let key = self.expect == Expect::Key && self.stack.last() == Some(&Container::Object);
                self.mode = Mode::InString { key, escape: Escape::None };
            }
            _ => self.mode = Mode::InScalar,
        }
    }

    fn feed(&mut self, i: usize, c: char) {
        match self.mode {
            Mode::Structural => self.structural(i, c),
            Mode::InString { key, escape } => {
                let escape = match escape {
                    Escape::Backslash(start) if c == 'u' => Escape::Unicode(start, 0),
                    Escape::Backslash(_) => Escape::None,
                    Escape::Unicode(start, n) if c.is_ascii_hexdigit() && n < 3 => Escape::Unicode(start, n + 1),
                    Escape::Unicode(..) => Escape::None,
                    Escape::None if c == '\\' => Escape::Backslash(i),
                    Escape::None if c == '"' => {
                        self.mode = Mode::Structural;
                        if key {
                            self.expect = Expect::Colon;
                        } else {
                            self.value_done(i + 1);
                        }
                        return;
                    }
                    Escape::None => Escape::None,
                };
                self.mode = Mode::InString { key, escape };
            }
            Mode::InScalar => {
                if c.is_whitespace() || matches!(c, ',' | '}' | ']' | ':') {
                    self.mode = Mode::Structural;
                    self.value_done(i);
                    self.structural(i, c);
                }
            }
        }
    }

    fn finish(self, text: &str) -> String {
        match self.mode {
            Mode::InString { key: false, escape } => {
                let end = match escape {
                    Escape::Backslash(start) | Escape::Unicode(start, _) => start,
                    Escape::None => text.len(),
                };
                format!("{}\"{}", &text[..end], self.closers())
            }
            Mode::InScalar if self.stack.is_empty() => text.to_string(),
            Mode::Structural if self.stack.is_empty() && self.expect == Expect::CommaOrClose => {
                text.to_string()
            }
            _ => match self.safe {
                Some((end, closers)) => format!("{}{}", &text[..end], closers),
                None => "{}".to_string(),
            },
        }
    }
}

/// Close a JSON prefix so that it parses.
///
/// An unterminated value string is closed in place, minus any incomplete
/// escape sequence. A dangling key, colon, comma or partial number is cut
/// back to the last complete value. Open objects and arrays are then
/// closed innermost first. Complete JSON is returned unchanged and text
/// with no recoverable prefix becomes `{}`.
pub fn make_valid_json(text: &str) -> String {
    let mut scanner = Scanner::new();
    for (i, c) in text.char_indices() {
        scanner.feed(i, c);
    }
    scanner.finish(text)
}
