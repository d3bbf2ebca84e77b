//! Row-batched CSV chunking into markdown tables with per-column summaries.

use std::fmt::Write as _;

use crate::error::Result;
use crate::processing::text_utils::base_name;
use crate::tokenizer::TokenEstimator;
use crate::types::Document;

const BATCH_ROWS: usize = 1024;
/// Tokens held back for the summary block on large budgets.
const SUMMARY_RESERVE: usize = 256;
const SUMMARY_RESERVE_MIN_LIMIT: usize = 384;
const ENUMERATE_NUMERIC_BELOW: usize = 5;
const ENUMERATE_CATEGORICAL_UP_TO: usize = 10;
const CATEGORICAL_EXAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Categorical,
}

#[derive(Debug, Default)]
pub struct CsvChunker {
    estimator: TokenEstimator,
}

impl CsvChunker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split CSV `text` into documents of roughly `token_limit` tokens, each a
    /// markdown table preceded by a summary of its columns.
    pub fn split_text(&self, text: &str, file_name: &str, token_limit: usize) -> Result<Vec<Document>> {
        let stem = base_name(file_name).split('.').next().unwrap_or("");
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let header_tokens: usize = headers
            .iter()
            .map(|h| self.estimator.estimate_tokens(h))
            .sum();
        let approx_token_limit = if token_limit > SUMMARY_RESERVE_MIN_LIMIT {
            token_limit - SUMMARY_RESERVE
        } else {
            token_limit
        };

        let mut out_docs = Vec::new();
        let mut chunk: Vec<Vec<String>> = Vec::new();
        let mut current_tokens = 0usize;

        for (row_index, record) in reader.records().enumerate() {
            if row_index % BATCH_ROWS == 0 {
                tracing::debug!(file = %file_name, rows = row_index, "Reading CSV batch");
            }
            let row: Vec<String> = record?.iter().map(str::to_string).collect();
            let md_row = row_to_markdown(&row);
            let row_tokens = self.estimator.estimate_tokens(&md_row);

            if current_tokens + row_tokens + header_tokens > approx_token_limit && !chunk.is_empty() {
                out_docs.push(build_document(&headers, &chunk, stem, out_docs.len()));
                chunk.clear();
                current_tokens = 0;
            }

            chunk.push(row);
            current_tokens += row_tokens;
        }

        if !chunk.is_empty() {
            out_docs.push(build_document(&headers, &chunk, stem, out_docs.len()));
        }

        Ok(out_docs)
    }
}

fn row_to_markdown(row: &[String]) -> String {
    format!("| {} |", row.join(" | "))
}

fn build_document(headers: &[String], rows: &[Vec<String>], stem: &str, chunk_counter: usize) -> Document {
    let mut content = String::from("#### Table chunk Summary\n\n");
    for (col, header) in headers.iter().enumerate() {
        let cells: Vec<&str> = rows
            .iter()
            .map(|r| r.get(col).map(String::as_str).unwrap_or(""))
            .collect();
        let _ = writeln!(content, "- **{}**: {}", header, summarize_column(&cells));
    }
    content.push_str("\n\n");

    let _ = writeln!(content, "#### Chunk no. {}", chunk_counter);
    content.push_str(&row_to_markdown(headers));
    content.push('\n');
    content.push_str(&"| --- ".repeat(headers.len()));
    content.push_str("|\n");
    for row in rows {
        content.push_str(&row_to_markdown(row));
        content.push('\n');
    }
    content.push_str("\n\n");

    let title = content.split('\n').next().unwrap_or("").trim().to_string();
    Document {
        content,
        title: Some(title),
        filepath: Some(format!("{}_chunk_{}.txt", stem, chunk_counter)),
        ..Default::default()
    }
}

fn column_kind(cells: &[&str]) -> ColumnKind {
    let present: Vec<&str> = cells.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();
    let has_missing = present.len() < cells.len();

    if present.is_empty() {
        return ColumnKind::Float;
    }
    if present.iter().all(|c| c.parse::<i64>().is_ok()) {
        // Missing cells force a float column, as NaN has no integer form.
        return if has_missing { ColumnKind::Float } else { ColumnKind::Integer };
    }
    if present.iter().all(|c| c.parse::<f64>().is_ok()) {
        return ColumnKind::Float;
    }
    if !has_missing
        && present
            .iter()
            .all(|c| c.eq_ignore_ascii_case("true") || c.eq_ignore_ascii_case("false"))
    {
        return ColumnKind::Boolean;
    }
    ColumnKind::Categorical
}

fn distinct_in_order<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut seen = Vec::new();
    for v in values {
        if !seen.contains(&v) {
            seen.push(v);
        }
    }
    seen
}

fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

fn quote_str(s: &str) -> String {
    if s.contains('\'') && !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        format!("'{}'", s.replace('\'', "\\'"))
    }
}

fn numeric_summary<T>(values: &[T], render: impl Fn(T) -> String) -> String
where
    T: PartialEq + PartialOrd + Copy,
{
    let unique = distinct_in_order(values.iter().copied());
    if unique.len() < ENUMERATE_NUMERIC_BELOW {
        let items: Vec<String> = unique.into_iter().map(&render).collect();
        return format!("[{}]", items.join(", "));
    }

    let mut min = values[0];
    let mut max = values[0];
    for &v in values {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    format!("({}, {})", render(min), render(max))
}

/// Summary for one column of a chunk. Numeric columns list their values when
/// there are fewer than 5 distinct ones and give `(min, max)` otherwise.
fn summarize_column(cells: &[&str]) -> String {
    let present: Vec<&str> = cells.iter().map(|c| c.trim()).filter(|c| !c.is_empty()).collect();

    match column_kind(cells) {
        ColumnKind::Integer => {
            let values: Vec<i64> = present.iter().filter_map(|c| c.parse().ok()).collect();
            numeric_summary(&values, |v| v.to_string())
        }
        ColumnKind::Float => {
            let values: Vec<f64> = present.iter().filter_map(|c| c.parse().ok()).collect();
            if values.is_empty() {
                return "[]".to_string();
            }
            numeric_summary(&values, format_float)
        }
        ColumnKind::Boolean => {
            let true_count = present.iter().filter(|c| c.eq_ignore_ascii_case("true")).count();
            format!("True: {}, False: {}", true_count, present.len() - true_count)
        }
        ColumnKind::Categorical => {
            let unique = distinct_in_order(present.iter().copied());
            if unique.len() > ENUMERATE_CATEGORICAL_UP_TO {
                let examples: Vec<&str> = unique.iter().take(CATEGORICAL_EXAMPLES).copied().collect();
                format!(
                    "{} unique values. Few Random examples: {}",
                    unique.len(),
                    examples.join(",")
                )
            } else {
                let items: Vec<String> = unique.into_iter().map(quote_str).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::estimate_tokens;

    #[test]
    fn test_small_numeric_column_enumerates_values() {
        assert_eq!(summarize_column(&["1", "2", "3", "2", "1"]), "[1, 2, 3]");
    }

    #[test]
    fn test_wide_numeric_column_gives_range() {
        let cells: Vec<String> = (1..=10).map(|i| (i * 3).to_string()).collect();
        let refs: Vec<&str> = cells.iter().map(String::as_str).collect();
        assert_eq!(summarize_column(&refs), "(3, 30)");
    }

    #[test]
    fn test_float_and_missing_cells() {
        assert_eq!(summarize_column(&["1.5", "", "2"]), "[1.5, 2.0]");
        assert_eq!(summarize_column(&["1", "", "2"]), "[1.0, 2.0]");
        assert_eq!(summarize_column(&["", ""]), "[]");
    }

    #[test]
    fn test_boolean_counts() {
        assert_eq!(summarize_column(&["True", "false", "TRUE"]), "True: 2, False: 1");
    }

    #[test]
    fn test_categorical_summaries() {
        assert_eq!(summarize_column(&["red", "blue", "red"]), "['red', 'blue']");
        let many: Vec<String> = (0..12).map(|i| format!("c{}", i)).collect();
        let refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert_eq!(
            summarize_column(&refs),
            "12 unique values. Few Random examples: c0,c1,c2,c3,c4"
        );
    }

    #[test]
    fn test_single_chunk_layout() {
        let csv = "id,name\n1,alpha\n2,beta\n";
        let docs = CsvChunker::new().split_text(csv, "data/people.v1.csv", 1024).unwrap();
        assert_eq!(docs.len(), 1);

        let doc = &docs[0];
        assert_eq!(doc.title.as_deref(), Some("#### Table chunk Summary"));
        assert_eq!(doc.filepath.as_deref(), Some("people_chunk_0.txt"));
        assert_eq!(
            doc.content,
            "#### Table chunk Summary\n\n- **id**: [1, 2]\n- **name**: ['alpha', 'beta']\n\n\n\
             #### Chunk no. 0\n| id | name |\n| --- | --- |\n| 1 | alpha |\n| 2 | beta |\n\n\n"
        );
    }

    #[test]
    fn test_rows_split_across_chunks() {
        let mut csv = String::from("id,description\n");
        for i in 0..200 {
            csv.push_str(&format!("{},row number {} with some descriptive words\n", i, i));
        }
        let docs = CsvChunker::new().split_text(&csv, "rows.csv", 200).unwrap();
        assert!(docs.len() > 1);
        for (k, doc) in docs.iter().enumerate() {
            assert_eq!(doc.filepath.as_deref(), Some(format!("rows_chunk_{}.txt", k).as_str()));
            assert!(doc.content.contains(&format!("#### Chunk no. {}", k)));
        }
        let total_rows: usize = docs
            .iter()
            .map(|d| d.content.lines().filter(|l| l.starts_with("| ") && !l.starts_with("| id") && !l.starts_with("| ---")).count())
            .sum();
        assert_eq!(total_rows, 200);
        assert!(estimate_tokens(&docs[0].content) > 0);
    }

    #[test]
    fn test_ragged_rows_are_errors() {
        let result = CsvChunker::new().split_text("a,b\n1,2,3\n", "bad.csv", 512);
        assert!(matches!(result, Err(crate::error::ChunkingError::Csv(_))));
    }
}
