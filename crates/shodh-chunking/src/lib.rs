//! Token-bounded document chunking for retrieval-augmented generation.
//!
//! Source documents are parsed and split into chunks that fit an embedding
//! or prompt budget. At query time, retrieved hits that are too large are
//! re-chunked and re-ranked, results from several queries are fused, and
//! prompt inputs are assembled within a token budget.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod processing;
pub mod rag;
pub mod search;
pub mod tokenizer;
pub mod types;

pub use config::ChunkingConfig;
pub use error::{ChunkingError, Result};
pub use processing::{ChunkOptions, ChunkerVersion, DirectoryOptions, TextChunker};
pub use search::{ChunkerFactory, SearchChunker};
pub use tokenizer::TokenEstimator;
pub use types::{
    AcsHit, CosmosHit, DataSourceType, Document, DocumentFormat, QueryType, SearchHit,
    SearchResult,
};
