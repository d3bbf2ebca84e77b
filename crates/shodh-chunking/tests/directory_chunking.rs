//! Directory chunking against a real file tree.

use shodh_chunking::{ChunkerVersion, ChunkingError, DirectoryOptions, TextChunker};
use std::fs;
use tempfile::tempdir;

const GUIDE: &str = "# Deployment guide\n\n\
Deployments run through the release pipeline. Each stage waits for the health checks of the previous one.\n\n\
## Rollback\n\n\
A failed health check rolls the release back to the last version that passed every stage.\n";

#[test]
fn test_unsupported_files_are_skipped() -> anyhow::Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("guide.md"), GUIDE)?;
    fs::write(dir.path().join("blob.xyz"), "binary-ish payload that has no parser")?;

    let chunker = TextChunker::new::<&str>(ChunkerVersion::V2, &[])?;
    let chunks = chunker.chunk_directory(dir.path(), &DirectoryOptions::default())?;

    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.filepath.as_deref() == Some("guide.md")));
    assert!(chunks.iter().any(|c| c.content.contains("release pipeline")));
    assert_eq!(chunks[0].metadata.as_ref().unwrap()["chunk_id"], "0");
    Ok(())
}

#[test]
fn test_nested_paths_and_urls() -> anyhow::Result<()> {
    let dir = tempdir()?;
    fs::create_dir(dir.path().join("ops"))?;
    fs::write(dir.path().join("ops").join("guide.md"), GUIDE)?;

    let chunker = TextChunker::default();
    let options = DirectoryOptions {
        url_prefix: Some("https://docs.example.com/".to_string()),
        ..Default::default()
    };
    let chunks = chunker.chunk_directory(dir.path(), &options)?;

    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert_eq!(chunk.filepath.as_deref(), Some("ops/guide.md"));
        assert_eq!(chunk.url.as_deref(), Some("https://docs.example.com/ops/guide.md"));
    }
    Ok(())
}

#[test]
fn test_restricted_extensions() -> anyhow::Result<()> {
    let dir = tempdir()?;
    fs::write(dir.path().join("guide.md"), GUIDE)?;
    fs::write(dir.path().join("notes.txt"), "Plain notes about the release pipeline and its stages.")?;

    let chunker = TextChunker::new(ChunkerVersion::V2, &["txt"])?;
    let chunks = chunker.chunk_directory(dir.path(), &DirectoryOptions::default())?;
    assert!(chunks.iter().all(|c| c.filepath.as_deref() == Some("notes.txt")));

    assert!(matches!(
        TextChunker::new(ChunkerVersion::V2, &["xyz"]),
        Err(ChunkingError::NoSupportedExtensions(_))
    ));
    Ok(())
}
