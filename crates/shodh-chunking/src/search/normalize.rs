//! Normalization of raw backend hits into typed records.
//!
//! Callers may send slightly different shapes for the same hit (`uri` or
//! `link` instead of `url`, `filename` instead of `filepath`). A small guess
//! table folds those names onto the canonical ones before fields are read.

use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::types::{AcsHit, AcsHitMetadata, CosmosHit, Document};

/// Canonical field name and the raw names that map onto it.
const FIELD_GUESSES: [(&str, &[&str]); 4] = [
    ("title", &["title"]),
    ("url", &["url", "uri", "link", "document_link"]),
    ("filepath", &["filepath", "filename"]),
    ("metadata", &["metadata"]),
];

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[tT]itle: (.*)\n").expect("title regex is valid"));

fn canonical_name(key: &str) -> &str {
    FIELD_GUESSES
        .iter()
        .find(|(_, aliases)| aliases.contains(&key))
        .map(|(canonical, _)| *canonical)
        .unwrap_or(key)
}

/// Rename guessed field names in `obj` and, recursively, in nested objects.
pub fn normalize_fields(obj: &Map<String, Value>) -> Map<String, Value> {
    let mut normalized = Map::new();
    for (key, item) in obj {
        let item = match item {
            Value::Object(inner) => Value::Object(normalize_fields(inner)),
            other => other.clone(),
        };
        normalized.insert(canonical_name(key).to_string(), item);
    }
    normalized
}

/// First `title: ...` line of the text, if any.
pub fn extract_title_from_content(content: &str) -> Option<String> {
    TITLE_RE
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn string_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn highlights_field(obj: &Map<String, Value>) -> Option<BTreeMap<String, Vec<String>>> {
    let raw = obj.get("@search.highlights")?.as_object()?;
    let highlights = raw
        .iter()
        .filter_map(|(field, excerpts)| {
            let excerpts = excerpts
                .as_array()?
                .iter()
                .filter_map(|e| e.as_str().map(str::to_string))
                .collect();
            Some((field.clone(), excerpts))
        })
        .collect();
    Some(highlights)
}

/// Read one Azure AI Search hit. Missing fields default; a missing title is
/// recovered from a `title:` line in the text.
pub fn parse_acs_hit(value: &Value) -> AcsHit {
    let Some(raw) = value.as_object() else {
        tracing::warn!(hit = %value, "Search hit is not an object, treating it as empty");
        return AcsHit::default();
    };
    let hit = normalize_fields(raw);

    let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0);
    let text = hit
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut metadata = match hit.get("metadata").and_then(Value::as_object) {
        Some(meta) => AcsHitMetadata {
            search_score: meta.get("@search.score").and_then(Value::as_f64),
            search_reranker_score: meta.get("@search.reranker_score").and_then(Value::as_f64),
            search_highlights: highlights_field(meta),
            filepath: string_field(meta, "filepath"),
            url: string_field(meta, "url"),
            chunk_id: string_field(meta, "chunk_id"),
            title: string_field(meta, "title"),
        },
        None => AcsHitMetadata::default(),
    };

    if metadata.title.as_deref().map_or(true, str::is_empty) && !text.is_empty() {
        metadata.title = Some(extract_title_from_content(&text).unwrap_or_default());
    }

    AcsHit { metadata, score, text }
}

/// Parse a hit list. A hit without a chunk id takes its position in the list.
pub fn parse_acs_hits(values: &[Value]) -> Vec<AcsHit> {
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let mut hit = parse_acs_hit(value);
            hit.metadata.chunk_id.get_or_insert_with(|| i.to_string());
            hit
        })
        .collect()
}

pub fn acs_hit_to_document(hit: &AcsHit) -> Document {
    Document {
        content: hit.text.clone(),
        chunk_id: hit.metadata.chunk_id.clone(),
        score: Some(hit.score),
        title: hit.metadata.title.clone(),
        filepath: hit.metadata.filepath.clone(),
        url: hit.metadata.url.clone(),
        metadata: None,
    }
}

pub fn parse_cosmos_hit(value: &Value) -> CosmosHit {
    let empty = Map::new();
    let raw = value.as_object().unwrap_or_else(|| {
        tracing::warn!(hit = %value, "Search hit is not an object, treating it as empty");
        &empty
    });
    CosmosHit {
        id: string_field(raw, "id"),
        chunk_id: string_field(raw, "chunk_id"),
        title: string_field(raw, "title").unwrap_or_default(),
        content: string_field(raw, "content").unwrap_or_default(),
        filepath: string_field(raw, "filepath").unwrap_or_default(),
        url: string_field(raw, "url"),
        metadata: raw.get("metadata").filter(|m| !m.is_null()).cloned(),
    }
}

/// Cosmos returns no comparable score; every hit starts at 1.0.
pub fn cosmos_hit_to_document(hit: &CosmosHit) -> Document {
    Document {
        content: hit.content.clone(),
        chunk_id: None,
        score: Some(1.0),
        title: Some(hit.title.clone()),
        filepath: Some(hit.filepath.clone()),
        url: hit.url.clone(),
        metadata: hit.metadata.clone(),
    }
}
