//! Prompt input assembly under a token budget.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::rag::json_repair::make_valid_json;
use crate::tokenizer::{clip_text, TokenEstimator};
use crate::types::Document;

/// Per-message clip for the reply-generation prompt.
pub const MAX_TURN_TOKENS: usize = 1000;

/// Per-message clip and message count for the intent rewriting prompt.
pub const REWRITE_MAX_TURN_TOKENS: usize = 500;
pub const REWRITE_MAX_TURNS: usize = 2;

/// Budgets at or below this leave no room for a useful section.
const MIN_SECTION_TOKENS: i64 = 10;

const EMPTY_DOCUMENTATION: &str = "{}";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInputs {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutputs {
    #[serde(default)]
    pub reply: String,
}

/// One exchange of chat history: `{"inputs": {"query"}, "outputs": {"reply"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    #[serde(default)]
    pub inputs: TurnInputs,
    #[serde(default)]
    pub outputs: TurnOutputs,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            inputs: TurnInputs { query: query.into() },
            outputs: TurnOutputs { reply: reply.into() },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyInputs {
    pub query: String,
    pub conversation: String,
    /// JSON text, always parseable
    pub documentation: String,
}

#[derive(Serialize)]
struct DocumentEntry<'a> {
    title: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Documentation<'a> {
    retrieved_documents: Vec<BTreeMap<String, DocumentEntry<'a>>>,
}

fn to_budget(tokens: usize) -> i64 {
    i64::try_from(tokens).unwrap_or(i64::MAX)
}

/// Render chat history newest first until `max_tokens` runs out.
///
/// Each turn contributes its reply, then its query, each clipped to
/// `max_turn_tokens`. A message that would exhaust the budget is left out
/// and ends the walk, as does exceeding `max_turns` messages when it is
/// non-zero. The result reads oldest to newest.
pub fn conversation_text(
    history: &[ConversationTurn],
    max_tokens: usize,
    max_turn_tokens: usize,
    max_turns: usize,
) -> String {
    let estimator = TokenEstimator::new();
    let mut budget = to_budget(max_tokens);
    let mut messages: Vec<String> = Vec::new();
    let mut turns = 0;

    'history: for turn in history.iter().rev() {
        for (role, content) in [("assistant", &turn.outputs.reply), ("user", &turn.inputs.query)] {
            let text = format!("{}:\n{}\n\n", role, clip_text(content, max_turn_tokens));
            budget -= to_budget(estimator.estimate_tokens(&text));
            turns += 1;
            if budget <= 0 || (max_turns > 0 && turns > max_turns) {
                break 'history;
            }
            messages.push(text);
        }
    }

    messages.reverse();
    messages.concat().trim().to_string()
}

/// Serialize `chunks` as numbered documents, clipped to `max_tokens` and
/// repaired so the clipped text still parses.
fn documentation_text(chunks: &[Document], max_tokens: usize) -> String {
    let documentation = Documentation {
        retrieved_documents: chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                BTreeMap::from([(
                    format!("[doc{}]", i + 1),
                    DocumentEntry {
                        title: chunk.title.as_deref().unwrap_or(""),
                        content: &chunk.content,
                    },
                )])
            })
            .collect(),
    };
    match serde_json::to_string(&documentation) {
        Ok(text) => make_valid_json(&clip_text(&text, max_tokens)),
        Err(e) => {
            tracing::warn!("Failed to serialize documentation: {}", e);
            EMPTY_DOCUMENTATION.to_string()
        }
    }
}

/// Inputs for the reply generation prompt.
///
/// The query is clipped to `max_tokens` first, then the conversation is
/// built within `max_conversation_tokens`; both are charged against
/// `max_tokens` and whatever remains goes to the documentation.
pub fn format_generate_reply_inputs(
    query: &str,
    history: &[ConversationTurn],
    chunks: &[Document],
    max_conversation_tokens: usize,
    max_tokens: usize,
) -> ReplyInputs {
    let estimator = TokenEstimator::new();
    let mut budget = to_budget(max_tokens);

    let query = if budget > MIN_SECTION_TOKENS {
        clip_text(query, max_tokens)
    } else {
        String::new()
    };
    budget -= to_budget(estimator.estimate_tokens(&query));

    let conversation = conversation_text(history, max_conversation_tokens, MAX_TURN_TOKENS, 0);
    budget -= to_budget(estimator.estimate_tokens(&conversation));

    let documentation = if budget > MIN_SECTION_TOKENS {
        documentation_text(chunks, budget as usize)
    } else {
        EMPTY_DOCUMENTATION.to_string()
    };

    tracing::debug!(
        chunks = chunks.len(),
        remaining_tokens = budget,
        "Formatted reply inputs"
    );
    ReplyInputs {
        query,
        conversation,
        documentation,
    }
}

/// Prompt text for rewriting the current question into search intents:
/// the last two history messages followed by the question.
pub fn format_rewrite_intent_inputs(query: &str, history: &[ConversationTurn], max_tokens: usize) -> String {
    let query = format!(
        "user:\nCurrent user question:\n{}\n\n",
        clip_text(query, REWRITE_MAX_TURN_TOKENS)
    );
    let remaining = max_tokens.saturating_sub(TokenEstimator::new().estimate_tokens(&query));
    let conversation = conversation_text(history, remaining, REWRITE_MAX_TURN_TOKENS, REWRITE_MAX_TURNS);
    format!("{}\n\n{}", conversation, query)
}
