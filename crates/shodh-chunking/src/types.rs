use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::error::ChunkingError;

/// Normalized unit of content flowing through parsing, chunking and fusion.
///
/// Two documents are equal when their content, title and filepath match;
/// score, chunk id, url and metadata are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub filepath: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Free-form provenance, e.g. `{"chunking": "..."}` or `{"chunk_id": "3"}`
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_filepath(mut self, filepath: impl Into<String>) -> Self {
        self.filepath = Some(filepath.into());
        self
    }

    /// Returns the same document carrying `score`.
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn score_or_zero(&self) -> f64 {
        self.score.unwrap_or(0.0)
    }

    /// Key used to recognise the same chunk across result lists.
    pub fn identity_key(&self) -> (Option<&str>, Option<&str>, &str) {
        (
            self.title.as_deref(),
            self.filepath.as_deref(),
            self.content.as_str(),
        )
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.content == other.content && self.title == other.title && self.filepath == other.filepath
    }
}

impl Eq for Document {}

/// Accepts `"3"`, `3` or `null` for identifiers that backends emit as either.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn default_latency() -> HashMap<String, f64> {
    HashMap::from([
        ("tpromptLatency".to_string(), -1.0),
        ("vectorSearchLatency".to_string(), -1.0),
    ])
}

/// One query's retrieval response from any backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult<T> {
    pub top_k: Vec<T>,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_latency")]
    pub latency: HashMap<String, f64>,
}

impl<T> SearchResult<T> {
    pub fn new(query: impl Into<String>, top_k: Vec<T>) -> Self {
        Self {
            top_k,
            query: Some(query.into()),
            latency: default_latency(),
        }
    }

    pub fn query_str(&self) -> &str {
        self.query.as_deref().unwrap_or("")
    }
}

/// Backend-specific fields attached to an Azure AI Search hit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcsHitMetadata {
    pub search_score: Option<f64>,
    pub search_reranker_score: Option<f64>,
    /// Highlighted excerpts keyed by content field name
    pub search_highlights: Option<BTreeMap<String, Vec<String>>>,
    pub filepath: Option<String>,
    pub url: Option<String>,
    pub chunk_id: Option<String>,
    pub title: Option<String>,
}

/// Keyword, semantic, vector or hybrid hit from Azure AI Search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcsHit {
    pub metadata: AcsHitMetadata,
    pub score: f64,
    pub text: String,
}

/// Vector search hit from Cosmos.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CosmosHit {
    pub id: Option<String>,
    pub chunk_id: Option<String>,
    pub title: String,
    pub content: String,
    pub filepath: String,
    pub url: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// A raw hit from either backend, as parsed from the transport JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchHit {
    Acs(AcsHit),
    Cosmos(CosmosHit),
}

impl SearchHit {
    pub fn kind(&self) -> DataSourceType {
        match self {
            Self::Acs(_) => DataSourceType::Acs,
            Self::Cosmos(_) => DataSourceType::Cosmos,
        }
    }
}

/// Formats with a parser/splitter pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Markdown,
    Text,
    Html,
    Python,
    Csv,
    /// PDF already rendered to text or layout HTML by an external extractor
    Pdf,
}

impl DocumentFormat {
    pub const EXTENSIONS: [&'static str; 8] = ["md", "txt", "html", "shtml", "htm", "py", "csv", "pdf"];

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "md" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            "html" | "shtml" | "htm" => Some(Self::Html),
            "py" => Some(Self::Python),
            "csv" => Some(Self::Csv),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Html => "html",
            Self::Python => "python",
            Self::Csv => "csv",
            Self::Pdf => "pdf",
        }
    }
}

/// Extension of the last path component, i.e. the text after its final dot.
pub fn file_extension(file_name: &str) -> &str {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    base.rsplit('.').next().unwrap_or(base)
}

/// Retrieval mode used for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Simple,
    Semantic,
    Vector,
    VectorSimpleHybrid,
    VectorSemanticHybrid,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Semantic => "semantic",
            Self::Vector => "vector",
            Self::VectorSimpleHybrid => "vector_simple_hybrid",
            Self::VectorSemanticHybrid => "vector_semantic_hybrid",
        }
    }

    /// Map a front-end display label ("Hybrid + semantic", ...) to a query type.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Keyword" => Some(Self::Simple),
            "Semantic" => Some(Self::Semantic),
            "Vector" => Some(Self::Vector),
            "Hybrid (vector + keyword)" => Some(Self::VectorSimpleHybrid),
            "Hybrid + semantic" => Some(Self::VectorSemanticHybrid),
            _ => None,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            Self::Vector | Self::VectorSimpleHybrid | Self::VectorSemanticHybrid
        )
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = ChunkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(Self::Simple),
            "semantic" => Ok(Self::Semantic),
            "vector" => Ok(Self::Vector),
            "vector_simple_hybrid" => Ok(Self::VectorSimpleHybrid),
            "vector_semantic_hybrid" => Ok(Self::VectorSemanticHybrid),
            other => Err(ChunkingError::UnknownVariant {
                kind: "query type",
                value: other.to_string(),
            }),
        }
    }
}

/// Retrieval backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceType {
    Acs,
    Cosmos,
}

impl DataSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acs => "acs",
            Self::Cosmos => "cosmos",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "Azure AI Search" => Some(Self::Acs),
            "Cosmos" => Some(Self::Cosmos),
            _ => None,
        }
    }
}

impl fmt::Display for DataSourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSourceType {
    type Err = ChunkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acs" => Ok(Self::Acs),
            "cosmos" => Ok(Self::Cosmos),
            other => Err(ChunkingError::UnknownVariant {
                kind: "data source type",
                value: other.to_string(),
            }),
        }
    }
}
