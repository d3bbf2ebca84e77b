//! Prompt-side helpers: input formatting under a token budget, repair of
//! clipped JSON and parsing of search intents from model replies.

pub mod intents;
pub mod json_repair;
pub mod prompt;

pub use intents::{convert_string_to_list, extract_intents};
pub use json_repair::make_valid_json;
pub use prompt::{
    conversation_text, format_generate_reply_inputs, format_rewrite_intent_inputs,
    ConversationTurn, ReplyInputs,
};
