use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use walkdir::WalkDir;

use crate::error::{ChunkingError, Result};
use crate::processing::csv_chunker::CsvChunker;
use crate::processing::parser::parser_for;
use crate::processing::pdf_chunker::PdfChunker;
use crate::processing::splitter::{
    merge_chunks_serially, MarkdownTextSplitter, PythonCodeTextSplitter,
    RecursiveCharacterTextSplitter, TextSplitter,
};
use crate::processing::text_utils::{base_name, convert_escaped_to_posix};
use crate::tokenizer::TokenEstimator;
use crate::types::{file_extension, Document, DocumentFormat};

/// Chunking strategy. V1 accumulates lines up to the budget; V2 is format
/// aware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkerVersion {
    V1,
    #[default]
    V2,
}

impl fmt::Display for ChunkerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => f.write_str("v1"),
            Self::V2 => f.write_str("v2"),
        }
    }
}

impl FromStr for ChunkerVersion {
    type Err = ChunkingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1" => Ok(Self::V1),
            "v2" => Ok(Self::V2),
            other => Err(ChunkingError::UnknownVariant {
                kind: "chunker version",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkOptions {
    /// Used for format detection and as the title of last resort
    pub file_name: Option<String>,
    /// Copied onto every chunk
    pub url: Option<String>,
    /// Turn any failure into an empty result
    pub ignore_errors: bool,
    pub num_tokens: usize,
    /// Chunks below this many tokens are dropped
    pub min_chunk_size: usize,
    pub token_overlap: usize,
    /// PDF content is layout HTML rather than plain text
    pub use_layout_html: bool,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            file_name: None,
            url: None,
            ignore_errors: true,
            num_tokens: 256,
            min_chunk_size: 0,
            token_overlap: 0,
            use_layout_html: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryOptions {
    pub ignore_errors: bool,
    pub num_tokens: usize,
    pub min_chunk_size: usize,
    pub token_overlap: usize,
    /// `url = url_prefix + relative path`, normalized to forward slashes
    pub url_prefix: Option<String>,
}

impl Default for DirectoryOptions {
    fn default() -> Self {
        Self {
            ignore_errors: true,
            num_tokens: 256,
            min_chunk_size: 10,
            token_overlap: 0,
            url_prefix: None,
        }
    }
}

/// Chunk text with the size of each chunk and the title it inherits.
struct RawChunk {
    text: String,
    size: usize,
    title: Option<String>,
}

pub struct TextChunker {
    version: ChunkerVersion,
    extensions: BTreeSet<String>,
    estimator: TokenEstimator,
}

impl Default for TextChunker {
    /// V2 over every supported extension.
    fn default() -> Self {
        Self {
            version: ChunkerVersion::V2,
            extensions: Self::supported_extensions().into_iter().collect(),
            estimator: TokenEstimator::new(),
        }
    }
}

impl TextChunker {
    /// `extensions` restricts which file types are processed; empty means all.
    pub fn new<S: AsRef<str>>(version: ChunkerVersion, extensions: &[S]) -> Result<Self> {
        let mut selected: BTreeSet<String> = if extensions.is_empty() {
            Self::supported_extensions().into_iter().collect()
        } else {
            let (known, unknown): (Vec<String>, Vec<String>) = extensions
                .iter()
                .map(|e| e.as_ref().to_string())
                .partition(|e| DocumentFormat::from_extension(e).is_some());
            if !unknown.is_empty() {
                tracing::warn!(extensions = ?unknown, "Not able to process the following types");
            }
            known.into_iter().map(|e| e.to_lowercase()).collect()
        };

        if version == ChunkerVersion::V1 && selected.remove("py") {
            tracing::warn!("Python files are not supported by the v1 chunker, use v2");
        }
        if selected.is_empty() {
            return Err(ChunkingError::NoSupportedExtensions(Self::supported_extensions()));
        }

        Ok(Self {
            version,
            extensions: selected,
            estimator: TokenEstimator::new(),
        })
    }

    pub fn supported_extensions() -> Vec<String> {
        DocumentFormat::EXTENSIONS.iter().map(|e| e.to_string()).collect()
    }

    pub fn version(&self) -> ChunkerVersion {
        self.version
    }

    fn file_format(&self, file_name: &str) -> Option<DocumentFormat> {
        let ext = file_extension(file_name).to_lowercase();
        if !self.extensions.contains(&ext) {
            return None;
        }
        DocumentFormat::from_extension(&ext)
    }

    /// Split `content` into documents. The format comes from the file name's
    /// extension; unknown or missing extensions chunk as text.
    pub fn chunk_content(&self, content: &str, options: &ChunkOptions) -> Result<Vec<Document>> {
        let format = options
            .file_name
            .as_deref()
            .and_then(|name| self.file_format(name))
            .unwrap_or(DocumentFormat::Text);

        let raw = match self.version {
            ChunkerVersion::V1 => self.chunk_v1(content, format, options),
            ChunkerVersion::V2 => self.chunk_v2(content, format, options),
        };

        let raw = match raw {
            Ok(raw) => raw,
            Err(e) if options.ignore_errors => {
                tracing::warn!(
                    file = options.file_name.as_deref().unwrap_or("<content>"),
                    "Ignoring chunking error: {}",
                    e
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(raw
            .into_iter()
            .filter(|chunk| chunk.size >= options.min_chunk_size)
            .map(|chunk| Document {
                content: chunk.text,
                title: chunk.title,
                url: options.url.clone(),
                ..Default::default()
            })
            .collect())
    }

    fn chunk_v2(&self, content: &str, format: DocumentFormat, options: &ChunkOptions) -> Result<Vec<RawChunk>> {
        let parser = parser_for(format, options.use_layout_html);
        let file_name = options.file_name.as_deref();
        let doc = parser.parse(content, file_name)?;
        let num_tokens = options.num_tokens;
        let overlap = options.token_overlap;

        let sized = |texts: Vec<String>, title: &Option<String>| -> Vec<RawChunk> {
            texts
                .into_iter()
                .map(|text| RawChunk {
                    size: self.estimator.estimate_tokens(&text),
                    text,
                    title: title.clone(),
                })
                .collect()
        };

        let chunks = match format {
            DocumentFormat::Markdown => {
                // Split the original markdown, then clean each merged chunk.
                let pieces = MarkdownTextSplitter::new(false).split_text(content, num_tokens, overlap);
                let mut chunks = Vec::new();
                for (merged, size) in merge_chunks_serially(&pieces, num_tokens) {
                    let chunk_doc = parser.parse(&merged, file_name)?;
                    chunks.push(RawChunk {
                        text: chunk_doc.content,
                        size,
                        title: doc.title.clone(),
                    });
                }
                chunks
            }
            DocumentFormat::Csv if file_name.is_some() => {
                let name = file_name.unwrap_or_default();
                CsvChunker::new()
                    .split_text(content, name, num_tokens)?
                    .into_iter()
                    .map(|chunk_doc| RawChunk {
                        size: self.estimator.estimate_tokens(&chunk_doc.content),
                        text: chunk_doc.content,
                        title: chunk_doc.title,
                    })
                    .collect()
            }
            DocumentFormat::Pdf if options.use_layout_html => {
                let pieces = PdfChunker::new(num_tokens, overlap).split_text(&doc.content);
                sized(pieces, &doc.title)
            }
            DocumentFormat::Python => {
                let pieces = PythonCodeTextSplitter::new(false).split_text(&doc.content, num_tokens, overlap);
                sized(pieces, &doc.title)
            }
            DocumentFormat::Text | DocumentFormat::Html | DocumentFormat::Csv | DocumentFormat::Pdf => {
                let pieces =
                    RecursiveCharacterTextSplitter::text(false).split_text(&doc.content, num_tokens, overlap);
                sized(pieces, &doc.title)
            }
        };

        Ok(chunks)
    }

    fn chunk_v1(&self, content: &str, format: DocumentFormat, options: &ChunkOptions) -> Result<Vec<RawChunk>> {
        let doc = parser_for(format, false).parse(content, options.file_name.as_deref())?;
        let mut chunks = Vec::new();
        let mut this_chunk = String::new();
        let mut this_size = 0usize;

        for line in doc.content.split('\n') {
            let line_size = self.estimator.estimate_tokens(line);
            if this_size + line_size > options.num_tokens && !this_chunk.is_empty() {
                chunks.push(RawChunk {
                    text: std::mem::take(&mut this_chunk),
                    size: this_size,
                    title: doc.title.clone(),
                });
                this_size = 0;
            }
            this_chunk.push('\n');
            this_chunk.push_str(line);
            this_size += line_size;
        }
        if !this_chunk.is_empty() {
            chunks.push(RawChunk {
                text: this_chunk,
                size: this_size,
                title: doc.title,
            });
        }
        Ok(chunks)
    }

    /// Read and chunk one file. The file name drives format detection.
    pub fn chunk_file(&self, path: &Path, options: &ChunkOptions) -> Result<Vec<Document>> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| base_name(&path.to_string_lossy()).to_string());

        if self.file_format(&file_name).is_none() {
            if options.ignore_errors {
                tracing::debug!(file = %file_name, "Skipping unsupported file");
                return Ok(Vec::new());
            }
            return Err(ChunkingError::UnsupportedFormat(file_name));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ChunkingError::io(path, e))?;
        let options = ChunkOptions {
            file_name: Some(file_name),
            ..options.clone()
        };
        self.chunk_content(&content, &options)
    }

    /// Chunk every file under `root`. Each chunk records its path relative to
    /// `root` and its index within the file.
    pub fn chunk_directory(&self, root: &Path, options: &DirectoryOptions) -> Result<Vec<Document>> {
        let files: Vec<_> = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();

        let per_file: Vec<Vec<Document>> = files
            .par_iter()
            .map(|path| {
                let rel_path = path.strip_prefix(root).unwrap_or(path);
                let rel_path = convert_escaped_to_posix(&rel_path.to_string_lossy());
                let url = options
                    .url_prefix
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .map(|prefix| convert_escaped_to_posix(&format!("{}{}", prefix, rel_path)));

                let file_options = ChunkOptions {
                    file_name: None,
                    url,
                    ignore_errors: options.ignore_errors,
                    num_tokens: options.num_tokens,
                    min_chunk_size: options.min_chunk_size,
                    token_overlap: options.token_overlap,
                    use_layout_html: false,
                };

                let chunks = match self.chunk_file(path, &file_options) {
                    Ok(chunks) => chunks,
                    Err(e) if options.ignore_errors => {
                        tracing::warn!(file = %path.display(), "Failed to chunk file: {}", e);
                        Vec::new()
                    }
                    Err(e) => return Err(e),
                };

                Ok(chunks
                    .into_iter()
                    .enumerate()
                    .map(|(idx, mut doc)| {
                        doc.filepath = Some(rel_path.clone());
                        doc.metadata = Some(serde_json::json!({ "chunk_id": idx.to_string() }));
                        doc
                    })
                    .collect())
            })
            .collect::<Result<_>>()?;

        let chunks: Vec<Document> = per_file.into_iter().flatten().collect();
        tracing::info!(
            files = files.len(),
            chunks = chunks.len(),
            "Chunked directory {}",
            root.display()
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::estimate_tokens;

    fn chunker() -> TextChunker {
        TextChunker::new::<&str>(ChunkerVersion::V2, &[]).unwrap()
    }

    fn options(file_name: &str, num_tokens: usize) -> ChunkOptions {
        ChunkOptions {
            file_name: Some(file_name.to_string()),
            ignore_errors: false,
            num_tokens,
            ..Default::default()
        }
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!("v1".parse::<ChunkerVersion>().unwrap(), ChunkerVersion::V1);
        assert_eq!(ChunkerVersion::default(), ChunkerVersion::V2);
        assert!("v3".parse::<ChunkerVersion>().is_err());
    }

    #[test]
    fn test_extension_selection() {
        let chunker = TextChunker::new(ChunkerVersion::V2, &["md", "xyz"]).unwrap();
        assert!(chunker.file_format("a.md").is_some());
        assert!(chunker.file_format("a.txt").is_none());

        assert!(matches!(
            TextChunker::new(ChunkerVersion::V1, &["py"]),
            Err(ChunkingError::NoSupportedExtensions(_))
        ));
        assert!(matches!(
            TextChunker::new(ChunkerVersion::V2, &["xyz"]),
            Err(ChunkingError::NoSupportedExtensions(_))
        ));
    }

    #[test]
    fn test_text_chunks_inherit_title_and_url() {
        let text = "title: Handbook\n".to_string()
            + &"Every sentence here is short. ".repeat(60);
        let opts = ChunkOptions {
            url: Some("https://example.com/handbook".to_string()),
            ..options("handbook.txt", 64)
        };
        let docs = chunker().chunk_content(&text, &opts).unwrap();
        assert!(docs.len() > 1);
        for doc in &docs {
            assert_eq!(doc.title.as_deref(), Some("Handbook"));
            assert_eq!(doc.url.as_deref(), Some("https://example.com/handbook"));
            assert!(estimate_tokens(&doc.content) <= 64);
        }
    }

    #[test]
    fn test_markdown_chunks_keep_document_title() {
        let md = "# Operations Guide\n\n".to_string()
            + &(0..20)
                .map(|i| format!("Section {} explains one procedure in plain words.", i))
                .collect::<Vec<_>>()
                .join("\n\n");
        let docs = chunker().chunk_content(&md, &options("guide.md", 48)).unwrap();
        assert!(docs.len() > 1);
        assert!(docs.iter().all(|d| d.title.as_deref() == Some("Operations Guide")));

        let joined = docs.iter().map(|d| d.content.as_str()).collect::<String>();
        let first = joined.find("Section 0 ").unwrap();
        let last = joined.find("Section 19 ").unwrap();
        assert!(first < last);
    }

    #[test]
    fn test_min_chunk_size_filters() {
        let opts = ChunkOptions {
            min_chunk_size: 1000,
            ..options("notes.txt", 256)
        };
        assert!(chunker().chunk_content("tiny", &opts).unwrap().is_empty());
    }

    #[test]
    fn test_csv_chunks_carry_summary_title() {
        let csv = "n,flag\n1,true\n2,false\n3,true\n";
        let docs = chunker().chunk_content(csv, &options("nums.csv", 512)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title.as_deref(), Some("#### Table chunk Summary"));
        assert!(docs[0].content.contains("- **flag**: True: 2, False: 1"));
    }

    #[test]
    fn test_python_errors_respect_ignore_errors() {
        let bad = "def broken(:\n";
        assert!(matches!(
            chunker().chunk_content(bad, &options("bad.py", 256)),
            Err(ChunkingError::PythonSyntax { .. })
        ));
        let lenient = ChunkOptions {
            ignore_errors: true,
            ..options("bad.py", 256)
        };
        assert!(chunker().chunk_content(bad, &lenient).unwrap().is_empty());
    }

    #[test]
    fn test_v1_accumulates_lines() {
        let chunker = TextChunker::new::<&str>(ChunkerVersion::V1, &[]).unwrap();
        let text = (0..30).map(|i| format!("line number {}", i)).collect::<Vec<_>>().join("\n");
        let docs = chunker.chunk_content(&text, &options("lines.txt", 20)).unwrap();
        assert!(docs.len() > 1);
        assert!(docs.iter().all(|d| d.content.starts_with('\n')));
        let rebuilt: String = docs.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(rebuilt.trim_start_matches('\n'), text);
    }

    #[test]
    fn test_unknown_extension_chunks_as_text() {
        let docs = chunker()
            .chunk_content("plain words only", &options("notes.unknown", 256))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "plain words only");
    }

    #[test]
    fn test_chunk_file_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.xyz");
        std::fs::write(&path, "content").unwrap();

        let strict = options("data.xyz", 256);
        assert!(matches!(
            chunker().chunk_file(&path, &strict),
            Err(ChunkingError::UnsupportedFormat(_))
        ));
        let lenient = ChunkOptions::default();
        assert!(chunker().chunk_file(&path, &lenient).unwrap().is_empty());
    }
}
