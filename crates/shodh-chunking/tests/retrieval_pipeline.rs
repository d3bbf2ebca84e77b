//! Retrieval flow end to end: raw responses, chunking, fusion, prompt inputs.

use serde_json::{json, Value};
use shodh_chunking::pipeline::{chunk_documents, documents_to_json, transform_retrieval_response};
use shodh_chunking::rag::{extract_intents, format_generate_reply_inputs, ConversationTurn};
use shodh_chunking::search::select_chunks_json;
use shodh_chunking::{DataSourceType, QueryType};

fn long_text(topic: &str) -> String {
    (0..60)
        .map(|i| format!("The {} runbook covers step {} of the recovery procedure.", topic, i))
        .collect::<Vec<_>>()
        .join(" ")
}

fn raw_responses() -> Vec<Vec<Value>> {
    vec![
        vec![
            json!({"text": long_text("backup"), "score": 0.9,
                   "metadata": {"title": "Backups", "filepath": "ops/backup.md", "@search.score": 0.9}}),
            json!({"text": "Restores are tested monthly.", "score": 0.5,
                   "metadata": {"title": "Restores", "filepath": "ops/restore.md", "@search.score": 0.5}}),
        ],
        vec![
            json!({"text": "Restores are tested monthly.", "score": 0.8,
                   "metadata": {"title": "Restores", "filepath": "ops/restore.md", "@search.score": 0.8}}),
        ],
    ]
}

#[test]
fn test_intents_to_prompt() -> anyhow::Result<()> {
    let queries = extract_intents(r#"["how do backup recovery steps work", "how are restores tested"]"#);
    assert_eq!(queries.len(), 2);

    let transport = transform_retrieval_response(&raw_responses(), &queries)?;
    let chunked = chunk_documents(&transport, 128, 10, DataSourceType::Acs, QueryType::Vector)?;
    assert_eq!(chunked.len(), 2);
    assert!(chunked[0].len() > 2, "oversized hit was not re-chunked");
    for doc in chunked.iter().flatten() {
        let score = doc.score.unwrap_or(-1.0);
        assert!((0.0..=1.0).contains(&score), "score {} out of range", score);
    }

    let fused = select_chunks_json(documents_to_json(&chunked)?, 3, None)?;
    assert_eq!(fused.len(), 3);
    assert_eq!(fused[0].content, "Restores are tested monthly.");

    let history = vec![ConversationTurn::new("what is the backup policy", "Nightly backups.")];
    for max_tokens in [12, 40, 90, 200, 2000] {
        let inputs = format_generate_reply_inputs("how do backups recover", &history, &fused, 200, max_tokens);
        let documentation: Value = serde_json::from_str(&inputs.documentation)?;
        assert!(documentation.is_object());
    }
    Ok(())
}

#[test]
fn test_cosmos_rejects_keyword_search() {
    let transport = json!([{"query": "q", "top_k": []}]);
    assert!(chunk_documents(&transport, 128, 5, DataSourceType::Cosmos, QueryType::Simple).is_err());
}
