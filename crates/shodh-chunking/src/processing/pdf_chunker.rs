//! Chunking for PDFs rendered to layout HTML, where tables arrive as
//! `<table>` markup between runs of prose.

use regex::Regex;
use std::sync::LazyLock;

use crate::processing::splitter::{merge_chunks_serially, merge_splits, text_separators};
use crate::tokenizer::TokenEstimator;

const TABLE_OPEN: &str = "<table>";
const TABLE_CLOSE: &str = "</table>";
const ROW_OPEN: &str = "<tr>";
const TITLE_TAG: &str = "h1";
const SECTION_TAG: &str = "h2";

/// Slack for token-count drift between this chunker and downstream
/// re-chunking of search hits.
const NOISE_TOKENS: usize = 50;

static TABLE_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<th.*>.*</th>").expect("table header regex is valid"));

pub struct PdfChunker {
    separators: Vec<String>,
    chunk_size: usize,
    chunk_overlap: usize,
    estimator: TokenEstimator,
}

impl PdfChunker {
    pub fn new(token_limit: usize, chunk_overlap: usize) -> Self {
        Self {
            separators: text_separators(),
            chunk_size: token_limit.max(1),
            chunk_overlap,
            estimator: TokenEstimator::new(),
        }
    }

    fn prose_limit(&self) -> usize {
        self.chunk_size.saturating_sub(NOISE_TOKENS).max(1)
    }

    fn pick_separator(&self, text: &str) -> &str {
        self.separators
            .iter()
            .find(|s| text.contains(s.as_str()))
            .or(self.separators.last())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let mut parts = text.split(TABLE_OPEN);
        let leading = parts.next().unwrap_or("");
        let mut chunks = self.chunk_rest(leading);

        let mut caption = chunks.last().map(|c| self.extract_caption(c)).unwrap_or_default();

        for part in parts {
            let (table_body, rest) = part.split_once(TABLE_CLOSE).unwrap_or((part, ""));
            let table = format!("{}{}{}", TABLE_OPEN, table_body, TABLE_CLOSE);
            chunks.extend(self.chunk_table(&table, &caption));

            if rest.trim().is_empty() {
                caption.clear();
            } else {
                let prose = self.chunk_rest(rest);
                caption = prose.last().map(|c| self.extract_caption(c)).unwrap_or_default();
                chunks.extend(prose);
            }
        }

        merge_chunks_serially(&chunks, self.chunk_size)
            .into_iter()
            .map(|(chunk, _)| chunk)
            .collect()
    }

    /// Caption carried onto the next table: the text of the last `<h1>` and
    /// `<h2>` in `text` followed by its last non-empty line.
    pub fn extract_caption(&self, text: &str) -> String {
        let last_line = text.lines().filter(|l| !l.trim().is_empty()).last().unwrap_or("");

        let mut caption = String::new();
        for tag in [TITLE_TAG, SECTION_TAG] {
            let open = format!("<{}>", tag);
            let close = format!("</{}>", tag);
            if let Some(pos) = text.rfind(&open) {
                let after = &text[pos + open.len()..];
                caption.push_str(after.split(&close).next().unwrap_or(""));
            }
        }
        caption.push('\n');
        caption.push_str(last_line.trim());
        caption
    }

    fn chunk_rest(&self, item: &str) -> Vec<String> {
        let separator = self.pick_separator(item);
        let splits: Vec<String> = if separator.is_empty() {
            item.chars().map(String::from).collect()
        } else {
            item.split(separator).map(str::to_string).collect()
        };

        // Nothing splits any further; fall back to token slicing.
        if splits.len() == 1 && self.estimator.estimate_tokens(&splits[0]) >= self.prose_limit() {
            return self.estimator.slice_by_tokens(&splits[0], self.prose_limit());
        }

        let mut chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();
        for piece in splits {
            if self.estimator.estimate_tokens(&piece) < self.prose_limit() {
                good_splits.push(piece);
                continue;
            }
            if !good_splits.is_empty() {
                chunks.extend(merge_splits(
                    &self.estimator,
                    &good_splits,
                    separator,
                    self.chunk_size,
                    self.chunk_overlap,
                ));
                good_splits.clear();
            }
            chunks.extend(self.chunk_rest(&piece));
        }
        if !good_splits.is_empty() {
            chunks.extend(merge_splits(
                &self.estimator,
                &good_splits,
                separator,
                self.chunk_size,
                self.chunk_overlap,
            ));
        }
        chunks
    }

    /// Split a table into mini-tables that each repeat the caption and the
    /// header cells.
    fn chunk_table(&self, table: &str, caption: &str) -> Vec<String> {
        let whole = format!("{}\n{}", caption, table);
        if self.estimator.estimate_tokens(&whole) < self.prose_limit() {
            return vec![whole];
        }

        let headers = TABLE_HEADER_RE
            .find(table)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let is_table_tag = |part: &str| part == TABLE_OPEN || part == TABLE_CLOSE;

        let mut tables = Vec::new();
        let mut current = format!("{}\n", caption);
        for part in table.split(ROW_OPEN).filter(|p| !p.is_empty()) {
            let candidate = format!("{}{}{}", current, ROW_OPEN, part);
            if self.estimator.estimate_tokens(&candidate) < self.chunk_size {
                if !is_table_tag(part) {
                    current.push_str(ROW_OPEN);
                }
                current.push_str(part);
                continue;
            }

            current.push_str(TABLE_CLOSE);
            tables.push(current);

            current = format!("{}\n{}\n{}", caption, TABLE_OPEN, headers);
            if !is_table_tag(part) {
                current.push_str(ROW_OPEN);
            }
            current.push_str(part);
        }

        if !current.ends_with(TABLE_CLOSE) {
            current.push_str(TABLE_CLOSE);
        }
        tables.push(current);
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::estimate_tokens;

    fn table(rows: usize) -> String {
        let mut t = String::from("<table><tr><th>Name</th><th>Value</th></tr>");
        for i in 0..rows {
            t.push_str(&format!("<tr><td>item {}</td><td>value {}</td></tr>", i, i * 7));
        }
        t.push_str("</table>");
        t
    }

    #[test]
    fn test_caption_from_headings_and_last_line() {
        let chunker = PdfChunker::new(512, 0);
        let caption = chunker.extract_caption("<h1>Report</h1>\nIntro.\n<h2>Costs</h2>\nTable below");
        assert_eq!(caption, "ReportCosts\nTable below");
    }

    #[test]
    fn test_small_table_kept_whole_with_caption() {
        let chunker = PdfChunker::new(512, 0);
        let text = format!("<h2>Prices</h2>\nSee the table\n{}\nAfter text.", table(2));
        let chunks = chunker.split_text(&text);
        let joined = chunks.concat();
        assert!(joined.contains("Prices\nSee the table\n<table>"));
        assert!(joined.contains("After text"));
    }

    #[test]
    fn test_large_table_repeats_headers() {
        let chunker = PdfChunker::new(120, 0);
        let text = format!("<h1>Inventory</h1>\nStock levels\n{}", table(40));
        let chunks = chunker.split_text(&text);
        assert!(chunks.len() > 1);

        let tables: Vec<&String> = chunks.iter().filter(|c| c.contains("<td>")).collect();
        assert!(tables.len() > 1);
        for t in tables.iter().skip(1) {
            assert!(t.contains("<th>Name</th><th>Value</th>"), "mini-table missing headers: {}", t);
            assert!(t.contains("Inventory"));
        }
        for chunk in &chunks {
            assert!(estimate_tokens(chunk) <= 120 + NOISE_TOKENS);
        }
    }

    #[test]
    fn test_unsplittable_prose_is_sliced() {
        let chunker = PdfChunker::new(60, 0);
        let word = "z".repeat(3000);
        let chunks = chunker.split_text(&word);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), word);
    }
}
