//! Separator-cascade splitters with overlap-aware merging.

use regex::Regex;
use std::collections::VecDeque;

use crate::tokenizer::TokenEstimator;

/// Sentence endings tried first for prose.
pub const SENTENCE_ENDINGS: [&str; 3] = [".", "!", "?"];
/// Word breaks tried after sentence endings, widest first.
pub const WORD_BREAKS: [&str; 12] = ["\n", "\t", "}", "{", "]", "[", ")", "(", " ", ":", ";", ","];

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

const MARKDOWN_SEPARATORS: [&str; 9] = [
    r"\n#{1,6} ",
    "```\n",
    r"\n\*\*\*+\n",
    r"\n---+\n",
    r"\n___+\n",
    r"\n\n",
    r"\n",
    " ",
    "",
];

const PYTHON_SEPARATORS: [&str; 7] = ["\nclass ", "\ndef ", "\n\tdef ", "\n\n", "\n", " ", ""];

/// Text-family separator list: sentence endings, then word breaks.
pub fn text_separators() -> Vec<String> {
    SENTENCE_ENDINGS
        .iter()
        .chain(WORD_BREAKS.iter())
        .map(|s| s.to_string())
        .collect()
}

pub trait TextSplitter: Send + Sync {
    fn split_text(&self, text: &str, token_limit: usize, chunk_overlap: usize) -> Vec<String>;
}

#[derive(Debug, Clone)]
struct Separator {
    raw: String,
    /// `None` for the empty separator, which splits into characters
    pattern: Option<Regex>,
}

#[derive(Debug, Clone)]
pub struct RecursiveCharacterTextSplitter {
    separators: Vec<Separator>,
    keep_separator: bool,
    is_separator_regex: bool,
    estimator: TokenEstimator,
}

impl Default for RecursiveCharacterTextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(), true, false)
    }
}

impl RecursiveCharacterTextSplitter {
    /// `separators` are tried in order; an empty list means the defaults.
    pub fn new(separators: Vec<String>, keep_separator: bool, is_separator_regex: bool) -> Self {
        let separators = if separators.is_empty() {
            DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect()
        } else {
            separators
        };

        let separators = separators
            .into_iter()
            .map(|raw| {
                let pattern = if raw.is_empty() {
                    None
                } else if is_separator_regex {
                    match Regex::new(&raw) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            tracing::warn!("Invalid separator pattern {:?}, matching literally: {}", raw, e);
                            Regex::new(&regex::escape(&raw)).ok()
                        }
                    }
                } else {
                    Regex::new(&regex::escape(&raw)).ok()
                };
                Separator { raw, pattern }
            })
            .collect();

        Self {
            separators,
            keep_separator,
            is_separator_regex,
            estimator: TokenEstimator::new(),
        }
    }

    /// Splitter over the text-family separators.
    pub fn text(keep_separator: bool) -> Self {
        Self::new(text_separators(), keep_separator, false)
    }

    fn split_recursive(
        &self,
        text: &str,
        separators: &[Separator],
        token_limit: usize,
        chunk_overlap: usize,
    ) -> Vec<String> {
        let mut final_chunks = Vec::new();
        let Some(last) = separators.last() else {
            return final_chunks;
        };

        let mut separator = last;
        let mut remaining: &[Separator] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            match &candidate.pattern {
                None => {
                    separator = candidate;
                    break;
                }
                Some(re) if re.is_match(text) => {
                    separator = candidate;
                    remaining = &separators[i + 1..];
                    break;
                }
                Some(_) => {}
            }
        }

        let (splits, joiner) = self.split_on(text, separator);

        let mut good_splits: Vec<String> = Vec::new();
        for piece in splits {
            if self.estimator.estimate_tokens(&piece) < token_limit {
                good_splits.push(piece);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(merge_splits(
                    &self.estimator,
                    &good_splits,
                    &joiner,
                    token_limit,
                    chunk_overlap,
                ));
                good_splits.clear();
            }

            if remaining.is_empty() {
                final_chunks.extend(self.estimator.slice_by_tokens(&piece, token_limit));
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining, token_limit, chunk_overlap));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(merge_splits(
                &self.estimator,
                &good_splits,
                &joiner,
                token_limit,
                chunk_overlap,
            ));
        }

        final_chunks
    }

    /// Split `text` on `separator`, dropping empty pieces. Returns the pieces
    /// and the string used to join them back during merging.
    fn split_on(&self, text: &str, separator: &Separator) -> (Vec<String>, String) {
        let Some(re) = &separator.pattern else {
            return (text.chars().map(String::from).collect(), String::new());
        };

        if self.keep_separator {
            // Each separator stays attached to the piece that follows it.
            let mut pieces = Vec::new();
            let mut last = 0;
            for m in re.find_iter(text) {
                pieces.push(text[last..m.start()].to_string());
                last = m.start();
            }
            pieces.push(text[last..].to_string());
            pieces.retain(|p| !p.is_empty());
            return (pieces, String::new());
        }

        let joiner = if self.is_separator_regex {
            re.find(text).map(|m| m.as_str().to_string()).unwrap_or_default()
        } else {
            separator.raw.clone()
        };
        let pieces = re
            .split(text)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        (pieces, joiner)
    }
}

impl TextSplitter for RecursiveCharacterTextSplitter {
    fn split_text(&self, text: &str, token_limit: usize, chunk_overlap: usize) -> Vec<String> {
        self.split_recursive(text, &self.separators, token_limit.max(1), chunk_overlap)
    }
}

/// Recursive splitter tuned for markdown headings, fences and rules.
#[derive(Debug, Clone)]
pub struct MarkdownTextSplitter(RecursiveCharacterTextSplitter);

impl MarkdownTextSplitter {
    pub fn new(keep_separator: bool) -> Self {
        Self(RecursiveCharacterTextSplitter::new(
            MARKDOWN_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            keep_separator,
            true,
        ))
    }
}

impl TextSplitter for MarkdownTextSplitter {
    fn split_text(&self, text: &str, token_limit: usize, chunk_overlap: usize) -> Vec<String> {
        self.0.split_text(text, token_limit, chunk_overlap)
    }
}

/// Recursive splitter that prefers class and function boundaries.
#[derive(Debug, Clone)]
pub struct PythonCodeTextSplitter(RecursiveCharacterTextSplitter);

impl PythonCodeTextSplitter {
    pub fn new(keep_separator: bool) -> Self {
        Self(RecursiveCharacterTextSplitter::new(
            PYTHON_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            keep_separator,
            false,
        ))
    }
}

impl TextSplitter for PythonCodeTextSplitter {
    fn split_text(&self, text: &str, token_limit: usize, chunk_overlap: usize) -> Vec<String> {
        self.0.split_text(text, token_limit, chunk_overlap)
    }
}

fn join_docs(docs: &VecDeque<(&str, usize)>, separator: &str) -> Option<String> {
    let text = docs
        .iter()
        .map(|(d, _)| *d)
        .collect::<Vec<_>>()
        .join(separator);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Combine small pieces into chunks of at most `chunk_size` tokens.
///
/// After a chunk is emitted, pieces are dropped from its front until at most
/// `chunk_overlap` tokens remain; those carry into the next chunk.
pub fn merge_splits(
    estimator: &TokenEstimator,
    splits: &[String],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let separator_len = estimator.estimate_tokens(separator);
    let mut docs = Vec::new();
    let mut current: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for piece in splits {
        let len = estimator.estimate_tokens(piece);
        let joined_cost = |current: &VecDeque<(&str, usize)>| {
            if current.is_empty() {
                0
            } else {
                separator_len
            }
        };

        if total + len + joined_cost(&current) > chunk_size {
            if total > chunk_size {
                tracing::warn!(
                    "Created a chunk of size {}, which is longer than the specified {}",
                    total,
                    chunk_size
                );
            }
            if !current.is_empty() {
                if let Some(doc) = join_docs(&current, separator) {
                    docs.push(doc);
                }
                while total > chunk_overlap
                    || (total + len + joined_cost(&current) > chunk_size && total > 0)
                {
                    let joined_with_next = current.len() > 1;
                    let Some((_, first_len)) = current.pop_front() else {
                        total = 0;
                        break;
                    };
                    let removed = first_len + if joined_with_next { separator_len } else { 0 };
                    total = total.saturating_sub(removed);
                }
            }
        }

        current.push_back((piece.as_str(), len));
        total += len + if current.len() > 1 { separator_len } else { 0 };
    }

    if let Some(doc) = join_docs(&current, separator) {
        docs.push(doc);
    }
    docs
}

/// Concatenate adjacent fragments while the running total stays within
/// `num_tokens`. Yields each merged text with its token count. No overlap.
pub fn merge_chunks_serially(chunks: &[String], num_tokens: usize) -> Vec<(String, usize)> {
    let estimator = TokenEstimator::new();
    let mut merged = Vec::new();
    let mut current = String::new();
    let mut total_size = 0usize;

    for chunk in chunks {
        let chunk_size = estimator.estimate_tokens(chunk);
        if total_size > 0 && total_size + chunk_size > num_tokens {
            merged.push((std::mem::take(&mut current), total_size));
            total_size = 0;
        }
        total_size += chunk_size;
        current.push_str(chunk);
    }
    if total_size > 0 {
        merged.push((current, total_size));
    }
    merged
}
