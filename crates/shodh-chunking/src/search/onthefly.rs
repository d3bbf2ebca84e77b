//! Re-chunking of retrieved hits that are larger than the prompt budget.

use serde_json::json;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{ChunkingError, Result};
use crate::processing::chunker::{ChunkOptions, TextChunker};
use crate::search::similarity::tfidf_sim_scores;
use crate::tokenizer::TokenEstimator;
use crate::types::Document;

pub const HIGHLIGHT_TAG: &str = "<HIGH>";
pub const HIGHLIGHT_TAG_END: &str = "</HIGH>";

/// Chunks with fewer tokens than this are noise left over from tag removal.
const MIN_HIGHLIGHT_CHUNK_TOKENS: usize = 2;

static TEXT_CHUNKER: LazyLock<TextChunker> = LazyLock::new(TextChunker::default);

/// A piece of a hit, kept with what ranking it needs.
struct Candidate {
    doc: Document,
    highlights: usize,
    tokens: usize,
    sim_score: f64,
}

impl Candidate {
    /// Highlight density scaled by the backend similarity.
    fn highlight_score(&self) -> f64 {
        if self.tokens == 0 {
            return 0.0;
        }
        self.highlights as f64 * self.sim_score / self.tokens as f64
    }
}

/// Running chunk id per source file, so pieces of one file cut from
/// different hits never share an id.
#[derive(Default)]
struct ChunkIds(HashMap<String, usize>);

impl ChunkIds {
    fn base(&self, filepath: Option<&str>) -> usize {
        filepath.and_then(|p| self.0.get(p)).copied().unwrap_or(0)
    }

    fn advance(&mut self, filepath: Option<&str>, count: usize) {
        if let Some(path) = filepath {
            *self.0.entry(path.to_string()).or_default() += count;
        }
    }
}

fn rechunk(content: &str, filepath: Option<&str>, max_chunk_size: usize) -> Result<Vec<Document>> {
    TEXT_CHUNKER.chunk_content(
        content,
        &ChunkOptions {
            file_name: filepath.map(str::to_string),
            num_tokens: max_chunk_size,
            ..Default::default()
        },
    )
}

fn sort_by_score_desc(scored: &mut [(Document, f64)]) {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

/// Split hits larger than `max_chunk_size` tokens and keep the `top_k`
/// pieces most similar to `query`.
///
/// Pieces inherit everything from their hit except content and chunk id.
/// When every hit already fits, `docs` comes back untouched so the
/// backend's ranking and scores survive.
pub fn chunk_onthefly(
    query: &str,
    docs: &[Document],
    sim_scores: &[f64],
    max_chunk_size: usize,
    top_k: usize,
) -> Result<Vec<Document>> {
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    // Scores only break ties here, so a missing list is not an error.
    let sim_scores: Vec<f64> = if sim_scores.len() == docs.len() {
        sim_scores.to_vec()
    } else {
        vec![1.0; docs.len()]
    };
    if query.is_empty() {
        return Err(ChunkingError::MissingQuery);
    }

    let estimator = TokenEstimator::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut ids = ChunkIds::default();
    let mut any_chunked = false;

    for (doc, &sim_score) in docs.iter().zip(&sim_scores) {
        let filepath = doc.filepath.as_deref();
        let base = ids.base(filepath);
        let tokens = estimator.estimate_tokens(&doc.content);

        if tokens <= max_chunk_size {
            candidates.push(Candidate {
                doc: Document {
                    chunk_id: Some(base.to_string()),
                    ..doc.clone()
                },
                highlights: 0,
                tokens,
                sim_score,
            });
            ids.advance(filepath, 1);
            continue;
        }

        any_chunked = true;
        let chunks = rechunk(&doc.content, filepath, max_chunk_size)?;
        for (cidx, chunk) in chunks.iter().enumerate() {
            candidates.push(Candidate {
                doc: Document {
                    content: chunk.content.clone(),
                    chunk_id: Some((base + cidx).to_string()),
                    ..doc.clone()
                },
                highlights: 0,
                tokens: estimator.estimate_tokens(&chunk.content),
                sim_score,
            });
        }
        ids.advance(filepath, chunks.len());
    }

    if !any_chunked {
        return Ok(docs.to_vec());
    }

    let contents: Vec<&str> = candidates.iter().map(|c| c.doc.content.as_str()).collect();
    let scores = tfidf_sim_scores(query, &contents, 0, 2);

    let mut scored: Vec<(Document, f64)> = candidates
        .into_iter()
        .zip(scores)
        .map(|(c, score)| (c.doc, score))
        .collect();
    sort_by_score_desc(&mut scored);
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(doc, score)| doc.with_score(score))
        .collect())
}

/// Like [`chunk_onthefly`] but driven by the backend's highlighted excerpts.
///
/// Oversized hits are replaced by their highlighted text, chunked again if
/// that is still too large. Pieces are ranked by highlight count times the
/// hit's similarity, divided by the piece's token count. When no hit needed
/// chunking, `docs` comes back untouched.
pub fn chunk_onthefly_with_highlights(
    docs: &[Document],
    sim_scores: &[f64],
    highlight_list: &[String],
    highlight_tag: &str,
    highlight_tag_end: &str,
    max_chunk_size: usize,
    top_k: usize,
) -> Result<Vec<Document>> {
    if docs.is_empty() {
        return Ok(Vec::new());
    }
    if highlight_list.len() != docs.len() {
        return Err(ChunkingError::InvalidInput(format!(
            "expected highlighted content for each of the {} results, got {}",
            docs.len(),
            highlight_list.len()
        )));
    }
    if highlight_tag.is_empty() || highlight_tag_end.is_empty() {
        return Err(ChunkingError::InvalidInput(
            "highlight start and end tags are required".to_string(),
        ));
    }
    if sim_scores.len() != docs.len() {
        return Err(ChunkingError::InvalidInput(format!(
            "expected a similarity score for each of the {} results, got {}",
            docs.len(),
            sim_scores.len()
        )));
    }

    let estimator = TokenEstimator::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    let mut ids = ChunkIds::default();
    let mut any_chunked = false;

    for ((doc, &sim_score), highlighted) in docs.iter().zip(sim_scores).zip(highlight_list) {
        let filepath = doc.filepath.as_deref();
        let base = ids.base(filepath);
        let tokens = estimator.estimate_tokens(&doc.content);
        let base_highlights = highlighted.matches(highlight_tag).count();
        let note = format!(
            "original document size={}. Scores={}. Org Highlight count={}.",
            tokens, sim_score, base_highlights
        );
        let mut num_chunks = 0;

        if tokens <= max_chunk_size || highlighted.is_empty() {
            candidates.push(Candidate {
                doc: Document {
                    chunk_id: Some(base.to_string()),
                    metadata: Some(json!({ "chunking": note })),
                    ..doc.clone()
                },
                highlights: base_highlights,
                tokens,
                sim_score,
            });
            num_chunks += 1;
        } else {
            any_chunked = true;
            let highlight_tokens = estimator.estimate_tokens(highlighted);

            if highlight_tokens < max_chunk_size {
                candidates.push(Candidate {
                    doc: Document {
                        content: highlighted.clone(),
                        chunk_id: Some(base.to_string()),
                        metadata: Some(json!({
                            "chunking": format!("{} Filtering to highlight size={}", note, highlight_tokens)
                        })),
                        ..doc.clone()
                    },
                    highlights: base_highlights,
                    tokens: highlight_tokens,
                    sim_score,
                });
                num_chunks += 1;
            } else {
                for (cidx, chunk) in rechunk(highlighted, filepath, max_chunk_size)?.iter().enumerate() {
                    let content = chunk
                        .content
                        .replace(highlight_tag, "")
                        .replace(highlight_tag_end, "");
                    let chunk_highlights = chunk.content.matches(highlight_tag).count();
                    let chunk_tokens = estimator.estimate_tokens(&content);
                    if chunk_tokens < MIN_HIGHLIGHT_CHUNK_TOKENS {
                        continue;
                    }
                    candidates.push(Candidate {
                        doc: Document {
                            content,
                            chunk_id: Some((base + cidx).to_string()),
                            metadata: Some(json!({
                                "chunking": format!(
                                    "{} Filtering to chunk no. {}/Highlights={} of size={}",
                                    note, cidx, chunk_highlights, chunk_tokens
                                )
                            })),
                            ..doc.clone()
                        },
                        highlights: chunk_highlights,
                        tokens: chunk_tokens,
                        sim_score,
                    });
                    num_chunks += 1;
                }
            }
        }
        ids.advance(filepath, num_chunks);
    }

    if !any_chunked {
        return Ok(docs.to_vec());
    }

    let mut scored: Vec<(Document, f64)> = candidates
        .into_iter()
        .map(|c| {
            let score = c.highlight_score();
            (c.doc, score)
        })
        .collect();
    sort_by_score_desc(&mut scored);
    scored.truncate(top_k);

    Ok(scored
        .into_iter()
        .map(|(doc, score)| doc.with_score(score))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::estimate_tokens;

    fn long_doc(filepath: &str) -> Document {
        let body = (0..80)
            .map(|i| format!("Virtual machines scale out in region {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        Document::new(body).with_filepath(filepath).with_title("Compute").with_score(0.8)
    }

    #[test]
    fn test_short_hits_returned_verbatim() {
        let docs = vec![Document::new("short").with_score(0.9)];
        let out = chunk_onthefly("what is short", &docs, &[0.9], 1000, 5).unwrap();
        assert_eq!(out, docs);
        assert_eq!(out[0].score, Some(0.9));
        assert_eq!(out[0].chunk_id, None);
    }

    #[test]
    fn test_empty_hits() {
        assert!(chunk_onthefly("q", &[], &[], 100, 5).unwrap().is_empty());
        assert!(chunk_onthefly_with_highlights(&[], &[], &[], "<HIGH>", "</HIGH>", 100, 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_missing_query_is_an_error() {
        let docs = vec![Document::new("text")];
        assert!(matches!(
            chunk_onthefly("", &docs, &[], 100, 5),
            Err(ChunkingError::MissingQuery)
        ));
    }

    #[test]
    fn test_oversized_hit_is_rechunked_and_ranked() {
        let docs = vec![long_doc("compute.md"), Document::new("tiny note").with_filepath("notes.md")];
        let out = chunk_onthefly("how do virtual machines scale", &docs, &[0.8, 0.3], 64, 3).unwrap();
        assert_eq!(out.len(), 3);
        for doc in &out {
            assert!(estimate_tokens(&doc.content) <= 64);
            assert!(doc.score.is_some());
        }
        let scores: Vec<f64> = out.iter().map(|d| d.score.unwrap_or(0.0)).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
        assert!(out
            .iter()
            .filter(|d| d.filepath.as_deref() == Some("compute.md"))
            .all(|d| d.title.as_deref() == Some("Compute")));
    }

    #[test]
    fn test_chunk_ids_continue_per_filepath() {
        let docs = vec![long_doc("same.md"), long_doc("same.md")];
        let out = chunk_onthefly("virtual machines region", &docs, &[0.5, 0.5], 64, 1000).unwrap();
        let mut ids: Vec<usize> = out
            .iter()
            .filter_map(|d| d.chunk_id.as_deref())
            .filter_map(|id| id.parse().ok())
            .collect();
        let total = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), total, "chunk ids repeat across hits of one file");
        assert_eq!(ids[0], 0);
    }

    #[test]
    fn test_highlight_argument_checks() {
        let docs = vec![Document::new("text")];
        let highlights = vec!["<HIGH>text</HIGH>".to_string()];
        assert!(matches!(
            chunk_onthefly_with_highlights(&docs, &[1.0], &[], "<HIGH>", "</HIGH>", 100, 5),
            Err(ChunkingError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_onthefly_with_highlights(&docs, &[1.0], &highlights, "", "</HIGH>", 100, 5),
            Err(ChunkingError::InvalidInput(_))
        ));
        assert!(matches!(
            chunk_onthefly_with_highlights(&docs, &[], &highlights, "<HIGH>", "</HIGH>", 100, 5),
            Err(ChunkingError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_highlights_unchanged_when_nothing_oversized() {
        let docs = vec![Document::new("small body").with_score(0.4)];
        let highlights = vec!["small <HIGH>body</HIGH>".to_string()];
        let out = chunk_onthefly_with_highlights(&docs, &[0.4], &highlights, HIGHLIGHT_TAG, HIGHLIGHT_TAG_END, 100, 5)
            .unwrap();
        assert_eq!(out, docs);
        assert!(out[0].metadata.is_none());
    }

    #[test]
    fn test_highlighted_excerpt_replaces_oversized_hit() {
        let big = long_doc("compute.md");
        let small = Document::new("scaling basics").with_filepath("basics.md");
        let highlights = vec![
            "<HIGH>Virtual</HIGH> machines scale out.<HIGH>Virtual</HIGH> machines again".to_string(),
            "scaling <HIGH>basics</HIGH>".to_string(),
        ];
        let out = chunk_onthefly_with_highlights(
            &[big, small],
            &[1.0, 1.0],
            &highlights,
            HIGHLIGHT_TAG,
            HIGHLIGHT_TAG_END,
            64,
            5,
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        let excerpt = out.iter().find(|d| d.filepath.as_deref() == Some("compute.md")).unwrap();
        assert_eq!(excerpt.content, highlights[0]);
        let note = excerpt.metadata.as_ref().and_then(|m| m["chunking"].as_str()).unwrap_or("");
        assert!(note.contains("Filtering to highlight size="));

        let expected = 2.0 / estimate_tokens(&highlights[0]) as f64;
        assert!((excerpt.score.unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_oversized_highlights_are_chunked_and_untagged() {
        let big = long_doc("compute.md");
        let highlighted = (0..60)
            .map(|i| format!("<HIGH>Virtual</HIGH> machines scale in zone {}.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let out = chunk_onthefly_with_highlights(
            &[big],
            &[0.5],
            &[highlighted],
            HIGHLIGHT_TAG,
            HIGHLIGHT_TAG_END,
            64,
            100,
        )
        .unwrap();
        assert!(out.len() > 1);
        for doc in &out {
            assert!(!doc.content.contains("<HIGH>"));
            assert!(!doc.content.contains("</HIGH>"));
        }
        assert!(out[0].score.unwrap_or(0.0) > 0.0);
    }
}
