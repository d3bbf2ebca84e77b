use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{ChunkingError, Result};
use crate::processing::chunker::{ChunkOptions, ChunkerVersion, TextChunker};
use crate::search::chunkers::{ChunkerFactory, SearchChunker};
use crate::types::{DataSourceType, QueryType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunking: SplitConfig,
    pub retrieval: RetrievalConfig,
    pub prompt: PromptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    pub version: ChunkerVersion,
    pub num_tokens: usize,
    pub min_chunk_size: usize,
    pub token_overlap: usize,
    /// Extensions to process; empty means every supported one
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Token budget for each re-chunked search hit
    pub max_tokens: usize,
    pub top_k: usize,
    pub min_score: Option<f64>,
    pub data_source: DataSourceType,
    pub query_type: QueryType,
    /// Highlight fields joined into the text of a keyword or semantic hit
    pub content_fields: Vec<String>,
    pub content_field_separator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_conversation_tokens: usize,
    pub max_tokens: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            version: ChunkerVersion::V2,
            num_tokens: 256,
            min_chunk_size: 10,
            token_overlap: 0,
            extensions: Vec::new(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1050,
            top_k: 5,
            min_score: None,
            data_source: DataSourceType::Acs,
            query_type: QueryType::Simple,
            content_fields: vec!["content".to_string()],
            content_field_separator: "\n".to_string(),
        }
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_conversation_tokens: 2000,
            max_tokens: 4000,
        }
    }
}

impl ChunkingConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.num_tokens == 0 {
            return Err(ChunkingError::Config("chunking.num_tokens must be > 0".into()));
        }
        if self.chunking.token_overlap > self.chunking.num_tokens {
            return Err(ChunkingError::Config(
                "chunking.token_overlap must be <= num_tokens".into(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(ChunkingError::Config("retrieval.top_k must be > 0".into()));
        }
        if let Some(min_score) = self.retrieval.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                return Err(ChunkingError::Config(
                    "retrieval.min_score must be in [0.0, 1.0]".into(),
                ));
            }
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ChunkingError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ChunkingError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn text_chunker(&self) -> Result<TextChunker> {
        TextChunker::new(self.chunking.version, &self.chunking.extensions)
    }

    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            num_tokens: self.chunking.num_tokens,
            min_chunk_size: self.chunking.min_chunk_size,
            token_overlap: self.chunking.token_overlap,
            ..Default::default()
        }
    }

    pub fn search_chunker(&self) -> Result<SearchChunker> {
        let chunker = ChunkerFactory::create_chunker(self.retrieval.data_source, self.retrieval.query_type)?;
        Ok(match chunker {
            SearchChunker::AcsText(text) => SearchChunker::AcsText(text.with_content_fields(
                self.retrieval.content_fields.clone(),
                self.retrieval.content_field_separator.clone(),
            )),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChunkingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.num_tokens, 256);
        assert_eq!(config.retrieval.max_tokens, 1050);
        assert_eq!(config.prompt.max_conversation_tokens, 2000);
    }

    #[test]
    fn test_validate_rejects_broken_values() {
        let mut config = ChunkingConfig::default();
        config.chunking.token_overlap = 300;
        assert!(matches!(config.validate(), Err(ChunkingError::Config(_))));

        let mut config = ChunkingConfig::default();
        config.retrieval.min_score = Some(1.5);
        assert!(config.validate().is_err());

        let mut config = ChunkingConfig::default();
        config.retrieval.top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_missing_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"chunking": {{"num_tokens": 512}}, "retrieval": {{"data_source": "cosmos", "query_type": "vector"}}}}"#
        )
        .unwrap();

        let config = ChunkingConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chunking.num_tokens, 512);
        assert_eq!(config.chunking.version, ChunkerVersion::V2);
        assert_eq!(config.retrieval.data_source, DataSourceType::Cosmos);
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.search_chunker().is_ok());
    }

    #[test]
    fn test_content_fields_reach_text_chunker() {
        let config: ChunkingConfig = serde_json::from_str(
            r#"{"retrieval": {"query_type": "semantic", "content_fields": ["content", "summary"]}}"#,
        )
        .unwrap();
        match config.search_chunker().unwrap() {
            SearchChunker::AcsText(chunker) => assert_eq!(chunker.content_fields(), ["content", "summary"]),
            other => panic!("unexpected chunker {:?}", other),
        }
        assert_eq!(config.retrieval.content_field_separator, "\n");
    }

    #[test]
    fn test_invalid_pairing_surfaces_from_factory() {
        let mut config = ChunkingConfig::default();
        config.retrieval.data_source = DataSourceType::Cosmos;
        config.retrieval.query_type = QueryType::Semantic;
        assert!(matches!(
            config.search_chunker(),
            Err(ChunkingError::InvalidChunkerConfig { .. })
        ));
    }
}
