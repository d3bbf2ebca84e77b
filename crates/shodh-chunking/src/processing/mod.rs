pub mod chunker;
pub mod csv_chunker;
pub mod parser;
pub mod pdf_chunker;
pub mod splitter;
pub mod text_utils;

pub use chunker::{ChunkOptions, ChunkerVersion, DirectoryOptions, TextChunker};
pub use csv_chunker::CsvChunker;
pub use parser::{parser_for, DocumentParser};
pub use pdf_chunker::PdfChunker;
pub use splitter::{
    MarkdownTextSplitter, PythonCodeTextSplitter, RecursiveCharacterTextSplitter, TextSplitter,
};
