//! Per-backend chunking of retrieved hits.
//!
//! Each chunker turns one query's hits into documents, re-chunks the ones
//! that exceed the token budget and, where the backend's own score cannot
//! be compared across queries, re-scores them lexically against the query.

use std::time::Instant;

use crate::error::{ChunkingError, Result};
use crate::search::normalize::{acs_hit_to_document, cosmos_hit_to_document};
use crate::search::onthefly::{chunk_onthefly, chunk_onthefly_with_highlights, HIGHLIGHT_TAG, HIGHLIGHT_TAG_END};
use crate::search::similarity::tfidf_sim_scores;
use crate::types::{AcsHit, CosmosHit, DataSourceType, Document, QueryType, SearchHit, SearchResult};

/// Added to lexical scores so that a downstream relevance filter at 0.3
/// keeps borderline chunks.
pub const LEXICAL_SCORE_FLOOR: f64 = 0.2;

/// The reranker scores on a 0-4 scale.
const RERANKER_SCALE: f64 = 4.0;

pub trait ChunkResults<H> {
    /// One list of documents per input query, in input order.
    fn chunk_results(&self, results: &[SearchResult<H>], max_tokens: usize, top_k: usize) -> Result<Vec<Vec<Document>>>;
}

/// Re-score `docs` against `query` on `"{title}\n{content}"`, lifted by
/// [`LEXICAL_SCORE_FLOOR`] and capped at 1.0.
fn rescore_lexically(query: &str, docs: Vec<Document>) -> Vec<Document> {
    let started = Instant::now();
    let texts: Vec<String> = docs
        .iter()
        .map(|d| format!("{}\n{}", d.title.as_deref().unwrap_or(""), d.content))
        .collect();
    let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let scores = tfidf_sim_scores(query, &text_refs, 0, 2);

    let docs: Vec<Document> = docs
        .into_iter()
        .zip(scores)
        .map(|(doc, score)| doc.with_score((score + LEXICAL_SCORE_FLOOR).min(1.0)))
        .collect();
    tracing::debug!(
        scores = ?docs.iter().map(|d| d.score_or_zero()).collect::<Vec<_>>(),
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "Similarity scores calculated"
    );
    docs
}

fn nonzero(score: Option<f64>) -> Option<f64> {
    score.filter(|s| *s != 0.0)
}

/// Keyword and semantic search over Azure AI Search.
#[derive(Debug, Clone)]
pub struct AcsTextChunker {
    query_type: QueryType,
    content_fields: Vec<String>,
    content_field_separator: String,
}

impl AcsTextChunker {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            content_fields: vec!["content".to_string()],
            content_field_separator: "\n".to_string(),
        }
    }

    /// Highlight fields read and the separator joining them.
    pub fn with_content_fields(mut self, fields: Vec<String>, separator: impl Into<String>) -> Self {
        self.content_fields = fields;
        self.content_field_separator = separator.into();
        self
    }

    pub fn content_fields(&self) -> &[String] {
        &self.content_fields
    }

    /// Reranker score scaled to `[0, 1]` when present, else the search score,
    /// else the hit's own score.
    fn similarity(hit: &AcsHit) -> f64 {
        match nonzero(hit.metadata.search_score) {
            Some(search_score) => nonzero(hit.metadata.search_reranker_score)
                .map(|r| r / RERANKER_SCALE)
                .unwrap_or(search_score),
            None => hit.score,
        }
    }

    /// Highlighted excerpts for the content fields, or `None` when the hit
    /// carries no highlights at all.
    fn highlighted_text(&self, hit: &AcsHit) -> Option<String> {
        let highlights = hit.metadata.search_highlights.as_ref().filter(|h| !h.is_empty())?;
        let joined = self
            .content_fields
            .iter()
            .filter_map(|field| highlights.get(field))
            .map(|excerpts| excerpts.join(".").trim().to_string())
            .collect::<Vec<_>>()
            .join(&self.content_field_separator);
        Some(joined.trim().to_string())
    }
}

impl ChunkResults<AcsHit> for AcsTextChunker {
    fn chunk_results(&self, results: &[SearchResult<AcsHit>], max_tokens: usize, top_k: usize) -> Result<Vec<Vec<Document>>> {
        let mut docs = Vec::with_capacity(results.len());

        for search_result in results {
            let query = search_result.query_str();
            let sim_scores: Vec<f64> = search_result.top_k.iter().map(Self::similarity).collect();
            let doc_list: Vec<Document> = search_result.top_k.iter().map(acs_hit_to_document).collect();
            let highlights: Option<Vec<String>> = search_result
                .top_k
                .iter()
                .map(|hit| self.highlighted_text(hit))
                .collect();

            let chunked = match highlights {
                Some(highlight_list) => chunk_onthefly_with_highlights(
                    &doc_list,
                    &sim_scores,
                    &highlight_list,
                    HIGHLIGHT_TAG,
                    HIGHLIGHT_TAG_END,
                    max_tokens,
                    top_k,
                )?,
                None => chunk_onthefly(query, &doc_list, &sim_scores, max_tokens, top_k)?,
            };

            // Semantic search already ranks by relevance; keyword scores do not.
            let chunked = if self.query_type == QueryType::Simple {
                rescore_lexically(query, chunked)
            } else {
                chunked
            };
            docs.push(chunked);
        }
        Ok(docs)
    }
}

/// Vector and hybrid search over Azure AI Search.
#[derive(Debug, Clone)]
pub struct AcsVectorChunker {
    query_type: QueryType,
}

impl AcsVectorChunker {
    pub fn new(query_type: QueryType) -> Self {
        Self { query_type }
    }

    fn similarity(hit: &AcsHit) -> f64 {
        match nonzero(hit.metadata.search_reranker_score) {
            Some(reranker) => reranker / RERANKER_SCALE,
            None => hit.metadata.search_score.unwrap_or(hit.score),
        }
    }
}

impl ChunkResults<AcsHit> for AcsVectorChunker {
    fn chunk_results(&self, results: &[SearchResult<AcsHit>], max_tokens: usize, top_k: usize) -> Result<Vec<Vec<Document>>> {
        let mut docs = Vec::with_capacity(results.len());

        for search_result in results {
            let query = search_result.query_str();
            let mut doc_list: Vec<Document> = search_result
                .top_k
                .iter()
                .map(|hit| acs_hit_to_document(hit).with_score(Self::similarity(hit)))
                .collect();

            tracing::debug!(docs = doc_list.len(), "Docs before fusion");
            doc_list.sort_by(|a, b| {
                b.score_or_zero()
                    .partial_cmp(&a.score_or_zero())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            doc_list.truncate(top_k);
            let sim_scores: Vec<f64> = doc_list.iter().map(Document::score_or_zero).collect();

            let chunked = chunk_onthefly(query, &doc_list, &sim_scores, max_tokens, top_k)?;

            // Without a semantic reranker the vector scores are not comparable.
            let chunked = match self.query_type {
                QueryType::Vector | QueryType::VectorSimpleHybrid => rescore_lexically(query, chunked),
                _ => chunked,
            };
            docs.push(chunked);
        }
        Ok(docs)
    }
}

/// Vector search over Cosmos, which returns no usable score.
#[derive(Debug, Clone, Default)]
pub struct CosmosChunker;

impl ChunkResults<CosmosHit> for CosmosChunker {
    fn chunk_results(&self, results: &[SearchResult<CosmosHit>], max_tokens: usize, top_k: usize) -> Result<Vec<Vec<Document>>> {
        let mut docs = Vec::with_capacity(results.len());

        for search_result in results {
            let query = search_result.query_str();
            let doc_list: Vec<Document> = search_result.top_k.iter().map(cosmos_hit_to_document).collect();
            let sim_scores: Vec<f64> = doc_list.iter().map(Document::score_or_zero).collect();

            let chunked = chunk_onthefly(query, &doc_list, &sim_scores, max_tokens, top_k)?;
            docs.push(rescore_lexically(query, chunked));
        }
        Ok(docs)
    }
}

/// The chunker picked for a data source and query type.
#[derive(Debug, Clone)]
pub enum SearchChunker {
    AcsText(AcsTextChunker),
    AcsVector(AcsVectorChunker),
    Cosmos(CosmosChunker),
}

impl SearchChunker {
    pub fn data_source(&self) -> DataSourceType {
        match self {
            Self::AcsText(_) | Self::AcsVector(_) => DataSourceType::Acs,
            Self::Cosmos(_) => DataSourceType::Cosmos,
        }
    }

    /// Chunk parsed hits. Every hit must come from this chunker's backend.
    pub fn chunk_results(&self, results: &[SearchResult<SearchHit>], max_tokens: usize, top_k: usize) -> Result<Vec<Vec<Document>>> {
        match self {
            Self::AcsText(chunker) => chunker.chunk_results(&acs_results(results)?, max_tokens, top_k),
            Self::AcsVector(chunker) => chunker.chunk_results(&acs_results(results)?, max_tokens, top_k),
            Self::Cosmos(chunker) => chunker.chunk_results(&cosmos_results(results)?, max_tokens, top_k),
        }
    }
}

fn mismatched_hit(hit: &SearchHit, expected: DataSourceType) -> ChunkingError {
    ChunkingError::InvalidInput(format!(
        "a {} hit was passed to the {} chunker",
        hit.kind(),
        expected
    ))
}

fn acs_results(results: &[SearchResult<SearchHit>]) -> Result<Vec<SearchResult<AcsHit>>> {
    results
        .iter()
        .map(|result| {
            let top_k = result
                .top_k
                .iter()
                .map(|hit| match hit {
                    SearchHit::Acs(acs) => Ok(acs.clone()),
                    other => Err(mismatched_hit(other, DataSourceType::Acs)),
                })
                .collect::<Result<_>>()?;
            Ok(SearchResult {
                top_k,
                query: result.query.clone(),
                latency: result.latency.clone(),
            })
        })
        .collect()
}

fn cosmos_results(results: &[SearchResult<SearchHit>]) -> Result<Vec<SearchResult<CosmosHit>>> {
    results
        .iter()
        .map(|result| {
            let top_k = result
                .top_k
                .iter()
                .map(|hit| match hit {
                    SearchHit::Cosmos(cosmos) => Ok(cosmos.clone()),
                    other => Err(mismatched_hit(other, DataSourceType::Cosmos)),
                })
                .collect::<Result<_>>()?;
            Ok(SearchResult {
                top_k,
                query: result.query.clone(),
                latency: result.latency.clone(),
            })
        })
        .collect()
}

pub struct ChunkerFactory;

impl ChunkerFactory {
    /// Select the chunker for a backend and retrieval mode. Cosmos only
    /// supports plain vector search; there is no fallback.
    pub fn create_chunker(data_source: DataSourceType, query_type: QueryType) -> Result<SearchChunker> {
        match (data_source, query_type) {
            (DataSourceType::Acs, qt) if qt.is_vector() => Ok(SearchChunker::AcsVector(AcsVectorChunker::new(qt))),
            (DataSourceType::Acs, qt) => Ok(SearchChunker::AcsText(AcsTextChunker::new(qt))),
            (DataSourceType::Cosmos, QueryType::Vector) => Ok(SearchChunker::Cosmos(CosmosChunker)),
            (DataSourceType::Cosmos, _) => Err(ChunkingError::InvalidChunkerConfig {
                data_source: data_source.to_string(),
                query_type: query_type.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AcsHitMetadata;
    use std::collections::BTreeMap;

    const ALL_QUERY_TYPES: [QueryType; 5] = [
        QueryType::Simple,
        QueryType::Semantic,
        QueryType::Vector,
        QueryType::VectorSimpleHybrid,
        QueryType::VectorSemanticHybrid,
    ];

    fn hit(text: &str, search_score: Option<f64>, reranker: Option<f64>) -> AcsHit {
        AcsHit {
            metadata: AcsHitMetadata {
                search_score,
                search_reranker_score: reranker,
                title: Some("Guide".to_string()),
                filepath: Some("guide.md".to_string()),
                ..Default::default()
            },
            score: 0.25,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_highlights_joined_across_content_fields() {
        let mut summarized = hit("body", Some(1.0), None);
        summarized.metadata.search_highlights = Some(BTreeMap::from([
            ("content".to_string(), vec!["nightly <em>backups</em>".to_string()]),
            ("summary".to_string(), vec!["<em>backup</em> ".to_string(), "policy".to_string()]),
        ]));

        let default = AcsTextChunker::new(QueryType::Semantic);
        assert_eq!(default.highlighted_text(&summarized).as_deref(), Some("nightly <em>backups</em>"));

        let both = default.with_content_fields(vec!["summary".to_string(), "content".to_string()], " | ");
        assert_eq!(
            both.highlighted_text(&summarized).as_deref(),
            Some("<em>backup</em> .policy | nightly <em>backups</em>")
        );
        assert_eq!(both.highlighted_text(&hit("body", Some(1.0), None)), None);
    }

    #[test]
    fn test_factory_covers_every_pair() {
        for qt in ALL_QUERY_TYPES {
            let acs = ChunkerFactory::create_chunker(DataSourceType::Acs, qt).unwrap();
            match qt {
                QueryType::Simple | QueryType::Semantic => assert!(matches!(acs, SearchChunker::AcsText(_))),
                _ => assert!(matches!(acs, SearchChunker::AcsVector(_))),
            }

            let cosmos = ChunkerFactory::create_chunker(DataSourceType::Cosmos, qt);
            if qt == QueryType::Vector {
                assert!(matches!(cosmos, Ok(SearchChunker::Cosmos(_))));
            } else {
                assert!(matches!(cosmos, Err(ChunkingError::InvalidChunkerConfig { .. })));
            }
        }
    }

    #[test]
    fn test_text_similarity_prefers_reranker() {
        assert_eq!(AcsTextChunker::similarity(&hit("x", Some(3.0), Some(2.0))), 0.5);
        assert_eq!(AcsTextChunker::similarity(&hit("x", Some(3.0), None)), 3.0);
        assert_eq!(AcsTextChunker::similarity(&hit("x", None, Some(2.0))), 0.25);
    }

    #[test]
    fn test_vector_similarity() {
        assert_eq!(AcsVectorChunker::similarity(&hit("x", Some(0.8), None)), 0.8);
        assert_eq!(AcsVectorChunker::similarity(&hit("x", Some(0.8), Some(3.0))), 0.75);
        assert_eq!(AcsVectorChunker::similarity(&hit("x", None, None)), 0.25);
    }

    #[test]
    fn test_semantic_keeps_backend_scores() {
        let chunker = AcsTextChunker::new(QueryType::Semantic);
        let results = vec![SearchResult::new("what is a guide", vec![hit("A short guide.", Some(3.0), Some(2.0))])];
        let out = chunker.chunk_results(&results, 1000, 5).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0].score, Some(0.25));
        assert_eq!(out[0][0].content, "A short guide.");
    }

    #[test]
    fn test_simple_rescores_with_floor() {
        let chunker = AcsTextChunker::new(QueryType::Simple);
        let results = vec![SearchResult::new(
            "how do I deploy the service",
            vec![
                hit("Deploy the service with the command line in a few steps.", Some(5.0), None),
                hit("The weather is pleasant in the spring and the summer.", Some(4.0), None),
            ],
        )];
        let out = chunker.chunk_results(&results, 1000, 5).unwrap();
        let scores: Vec<f64> = out[0].iter().map(|d| d.score.unwrap()).collect();
        assert!(scores.iter().all(|s| (LEXICAL_SCORE_FLOOR..=1.0).contains(s)), "{:?}", scores);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn test_text_chunker_uses_highlights_when_all_hits_have_them() {
        let long_text = "Backups run nightly and copies are kept offsite. ".repeat(60);
        let mut with_highlights = hit(&long_text, Some(2.0), None);
        with_highlights.metadata.search_highlights = Some(BTreeMap::from([(
            "content".to_string(),
            vec!["<HIGH>Backups</HIGH> run nightly".to_string(), "copies kept".to_string()],
        )]));
        let chunker = AcsTextChunker::new(QueryType::Semantic);
        let results = vec![SearchResult::new("when do backups run", vec![with_highlights])];
        let out = chunker.chunk_results(&results, 64, 5).unwrap();
        assert_eq!(out[0].len(), 1);
        assert_eq!(out[0][0].content, "<HIGH>Backups</HIGH> run nightly.copies kept");
    }

    #[test]
    fn test_vector_keeps_top_k_before_chunking() {
        let chunker = AcsVectorChunker::new(QueryType::VectorSemanticHybrid);
        let results = vec![SearchResult::new(
            "query",
            vec![
                hit("low", Some(0.1), None),
                hit("high", Some(0.9), None),
                hit("mid", Some(0.5), None),
            ],
        )];
        let out = chunker.chunk_results(&results, 1000, 2).unwrap();
        let contents: Vec<&str> = out[0].iter().map(|d| d.content.as_str()).collect();
        assert_eq!(contents, vec!["high", "mid"]);
        assert_eq!(out[0][0].score, Some(0.9));
    }

    #[test]
    fn test_cosmos_always_rescores() {
        let results = vec![SearchResult::new(
            "cosmos query",
            vec![CosmosHit {
                content: "no shared words".to_string(),
                ..Default::default()
            }],
        )];
        let out = CosmosChunker.chunk_results(&results, 1000, 5).unwrap();
        let score = out[0][0].score.unwrap();
        assert!((LEXICAL_SCORE_FLOOR..=1.0).contains(&score));
    }

    #[test]
    fn test_search_chunker_rejects_other_backend_hits() {
        let chunker = ChunkerFactory::create_chunker(DataSourceType::Cosmos, QueryType::Vector).unwrap();
        let results = vec![SearchResult::new("q", vec![SearchHit::Acs(hit("x", None, None))])];
        assert!(matches!(
            chunker.chunk_results(&results, 100, 5),
            Err(ChunkingError::InvalidInput(_))
        ));
        assert_eq!(chunker.data_source(), DataSourceType::Cosmos);
    }
}
