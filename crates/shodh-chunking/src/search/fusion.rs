use std::collections::HashMap;

use crate::error::Result;
use crate::types::Document;

/// Rank damping constant of reciprocal rank fusion.
pub const RRF_K: usize = 60;

/// Reciprocal Rank Fusion over per-query result lists.
/// Formula: rrf_score(doc) = Σ 1/(k + rank_i) for each list containing doc,
/// with 1-based ranks after sorting each list by score.
///
/// Documents are identified by `(title, filepath, content)`. An occurrence
/// scoring below `min_score` contributes nothing, though the same document may
/// still be fused in from another list. The first occurrence seen, walking the
/// lists in order, is kept as the representative: later duplicates only add
/// to its score, which is replaced by the fused value.
pub fn select_chunks(results: &[Vec<Document>], top_k: usize, min_score: Option<f64>) -> Vec<Document> {
    let mut index: HashMap<(Option<&str>, Option<&str>, &str), usize> = HashMap::new();
    let mut fused: Vec<(f64, &Document)> = Vec::new();

    for list in results {
        let mut ranked: Vec<&Document> = list.iter().collect();
        ranked.sort_by(|a, b| {
            b.score_or_zero()
                .partial_cmp(&a.score_or_zero())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for (rank, doc) in ranked.into_iter().enumerate() {
            if let Some(threshold) = min_score {
                if doc.score_or_zero() < threshold {
                    continue;
                }
            }
            let rrf = 1.0 / (RRF_K as f64 + rank as f64 + 1.0);
            match index.get(&doc.identity_key()) {
                Some(&slot) => fused[slot].0 += rrf,
                None => {
                    index.insert(doc.identity_key(), fused.len());
                    fused.push((rrf, doc));
                }
            }
        }
    }

    tracing::debug!(lists = results.len(), unique = fused.len(), "Fused search results");

    fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(top_k);
    fused
        .into_iter()
        .map(|(score, doc)| doc.clone().with_score(score))
        .collect()
}

/// [`select_chunks`] over the JSON transport shape `[[{document}, ...], ...]`.
pub fn select_chunks_json(results: serde_json::Value, top_k: usize, min_score: Option<f64>) -> Result<Vec<Document>> {
    let lists: Vec<Vec<Document>> = serde_json::from_value(results)?;
    Ok(select_chunks(&lists, top_k, min_score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(content: &str, score: f64) -> Document {
        Document::new(content).with_title("t").with_score(score)
    }

    #[test]
    fn test_same_doc_at_rank_one_twice() {
        let lists = vec![
            vec![doc("a", 0.9), doc("b", 0.5)],
            vec![doc("c", 0.1), doc("a", 0.8)],
        ];
        let fused = select_chunks(&lists, 5, None);
        assert_eq!(fused[0].content, "a");
        assert!((fused[0].score.unwrap() - 2.0 / 61.0).abs() < 1e-12);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn test_first_occurrence_is_representative() {
        let mut first = doc("a", 0.9);
        first.chunk_id = Some("0".to_string());
        first.url = Some("https://docs/first".to_string());
        let mut later = doc("a", 0.8);
        later.chunk_id = Some("7".to_string());
        later.url = Some("https://docs/later".to_string());

        let fused = select_chunks(&[vec![first], vec![later]], 5, None);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].chunk_id.as_deref(), Some("0"));
        assert_eq!(fused[0].url.as_deref(), Some("https://docs/first"));
    }

    #[test]
    fn test_min_score_excludes_low_occurrences() {
        let lists = vec![
            vec![doc("keep", 0.9), doc("low", 0.4)],
            vec![doc("low", 0.4)],
        ];
        let fused = select_chunks(&lists, 5, Some(0.5));
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].content, "keep");
    }

    #[test]
    fn test_min_score_is_per_occurrence() {
        let lists = vec![vec![doc("x", 0.4)], vec![doc("x", 0.7)]];
        let fused = select_chunks(&lists, 5, Some(0.5));
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score.unwrap() - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_identity_uses_title_filepath_content() {
        let a = Document::new("same").with_title("one").with_score(0.5);
        let b = Document::new("same").with_title("two").with_score(0.5);
        let fused = select_chunks(&[vec![a], vec![b]], 5, None);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].title.as_deref(), Some("one"));
    }

    #[test]
    fn test_truncates_to_top_k() {
        let list: Vec<Document> = (0..10).map(|i| doc(&format!("d{}", i), i as f64)).collect();
        let fused = select_chunks(&[list], 3, None);
        let contents: Vec<&str> = fused.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["d9", "d8", "d7"]);
    }

    #[test]
    fn test_json_variant() {
        let value = json!([[{"content": "a", "score": 1.0}], [{"content": "a"}]]);
        let fused = select_chunks_json(value, 5, None).unwrap();
        assert_eq!(fused.len(), 1);
        assert!(select_chunks_json(json!({"not": "a list"}), 5, None).is_err());
    }
}
