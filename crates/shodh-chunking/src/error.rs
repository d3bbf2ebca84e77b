//! Error types for chunking, re-ranking and prompt assembly.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChunkingError {
    /// File extension or format has no parser/splitter
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("chunker will not process any file, supported extensions are {0:?}")]
    NoSupportedExtensions(Vec<String>),

    /// No chunker exists for this data source / query type pair
    #[error("invalid chunker configuration: data source '{data_source}' does not support query type '{query_type}'")]
    InvalidChunkerConfig {
        data_source: String,
        query_type: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a query is required to re-rank chunks produced on the fly")]
    MissingQuery,

    #[error("python syntax error on line {line}: {message}")]
    PythonSyntax { line: usize, message: String },

    #[error("unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),
}

impl ChunkingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ChunkingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_format_display() {
        let err = ChunkingError::UnsupportedFormat("notes.xyz".to_string());
        assert_eq!(err.to_string(), "unsupported format: notes.xyz");
    }

    #[test]
    fn test_invalid_chunker_config_display() {
        let err = ChunkingError::InvalidChunkerConfig {
            data_source: "cosmos".to_string(),
            query_type: "semantic".to_string(),
        };
        assert!(err.to_string().starts_with("invalid chunker configuration"));
        assert!(err.to_string().contains("semantic"));
    }

    #[test]
    fn test_json_error_converts() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ChunkingError = parse.unwrap_err().into();
        assert!(matches!(err, ChunkingError::Json(_)));
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = ChunkingError::io(
            "/tmp/missing.md",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("/tmp/missing.md"));
    }
}
