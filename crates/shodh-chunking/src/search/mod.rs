pub mod chunkers;
pub mod fusion;
pub mod normalize;
pub mod onthefly;
pub mod similarity;

pub use chunkers::{
    AcsTextChunker, AcsVectorChunker, ChunkResults, ChunkerFactory, CosmosChunker, SearchChunker,
};
pub use fusion::{select_chunks, select_chunks_json, RRF_K};
pub use onthefly::{chunk_onthefly, chunk_onthefly_with_highlights};
pub use similarity::tfidf_sim_scores;
