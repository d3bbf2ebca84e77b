//! JSON-in, JSON-out entry points for a retrieval flow.
//!
//! The transport shape is one object per query:
//! `[{"query": "...", "top_k": [hit, ...]}, ...]`.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{ChunkingError, Result};
use crate::search::chunkers::ChunkerFactory;
use crate::search::normalize::{parse_acs_hits, parse_cosmos_hit};
use crate::types::{DataSourceType, Document, QueryType, SearchHit, SearchResult};

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(default)]
    query: Option<String>,
    top_k: Vec<Value>,
}

/// Parse the transport JSON into typed hits for `data_source`.
pub fn parse_results(value: &Value, data_source: DataSourceType) -> Result<Vec<SearchResult<SearchHit>>> {
    let raw: Vec<RawResult> = Vec::deserialize(value)?;

    Ok(raw
        .into_iter()
        .map(|result| {
            let top_k = match data_source {
                DataSourceType::Acs => parse_acs_hits(&result.top_k)
                    .into_iter()
                    .map(SearchHit::Acs)
                    .collect(),
                DataSourceType::Cosmos => result
                    .top_k
                    .iter()
                    .map(|hit| SearchHit::Cosmos(parse_cosmos_hit(hit)))
                    .collect(),
            };
            let mut search_result = SearchResult::new(String::new(), top_k);
            search_result.query = result.query;
            search_result
        })
        .collect())
}

/// Pick the chunker, parse the hits and chunk them, one list per query.
pub fn chunk_documents(
    value: &Value,
    max_tokens: usize,
    top_k: usize,
    data_source: DataSourceType,
    query_type: QueryType,
) -> Result<Vec<Vec<Document>>> {
    let chunker = ChunkerFactory::create_chunker(data_source, query_type)?;
    let parsed = parse_results(value, data_source)?;
    let chunked = chunker.chunk_results(&parsed, max_tokens, top_k)?;

    tracing::debug!(
        queries = parsed.len(),
        documents = chunked.iter().map(Vec::len).sum::<usize>(),
        data_source = %data_source,
        query_type = %query_type,
        "Chunked retrieved documents"
    );
    Ok(chunked)
}

pub fn documents_to_json(documents: &[Vec<Document>]) -> Result<Value> {
    Ok(serde_json::to_value(documents)?)
}

const PASSTHROUGH_METADATA: [&str; 8] = [
    "contentVector",
    "meta_json_string",
    "@search.score",
    "@search.reranker_score",
    "@search.highlights",
    "@search.captions",
    "captions",
    "answers",
];

fn transform_raw_doc(raw: &Value) -> Result<Value> {
    let field = |name: &str| {
        raw.get(name)
            .cloned()
            .ok_or_else(|| ChunkingError::InvalidInput(format!("retrieved document has no '{}' field", name)))
    };
    let text = field("text")?;
    let score = field("score")?;

    let source = raw
        .get("additional_fields")
        .or_else(|| raw.get("metadata"))
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty());

    let mut metadata = Map::new();
    if let Some(source) = source {
        for key in ["id", "title", "url", "filepath"] {
            let value = source.get(key).cloned().unwrap_or_else(|| json!(""));
            metadata.insert(key.to_string(), value);
        }
        for key in PASSTHROUGH_METADATA {
            metadata.insert(key.to_string(), source.get(key).cloned().unwrap_or(Value::Null));
        }
    }

    Ok(json!({
        "text": text,
        "score": score,
        "metadata": metadata,
    }))
}

/// Reshape raw retrieval responses, one list per query, into the transport
/// shape read by [`parse_results`]. Extra responses or queries beyond the
/// shorter of the two are dropped.
pub fn transform_retrieval_response(responses: &[Vec<Value>], queries: &[String]) -> Result<Value> {
    let transformed = queries
        .iter()
        .zip(responses)
        .map(|(query, docs)| {
            let top_k = docs.iter().map(transform_raw_doc).collect::<Result<Vec<_>>>()?;
            Ok(json!({ "top_k": top_k, "query": query }))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Value::Array(transformed))
}
