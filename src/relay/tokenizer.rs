//! Token counting
//!
//! Used to pre-count input tokens before relaying and to estimate output tokens for
//! streams that never report usage. A real tokenizer can be installed once at
//! startup; otherwise a character-based approximation is used.

use super::mode::Mode;
use crate::models::openai::ChatMessage;
use once_cell::sync::OnceCell;
use serde_json::Value;

/// Per-message framing overhead, in tokens
const TOKENS_PER_MESSAGE: u64 = 3;

/// Reply priming overhead, in tokens
const TOKENS_PER_REPLY: u64 = 3;

/// Model-aware token counter
pub trait Tokenizer: Send + Sync {
    fn count_text(&self, model: &str, text: &str) -> u64;

    fn count_messages(&self, model: &str, messages: &[ChatMessage]) -> u64 {
        let mut tokens = TOKENS_PER_REPLY;
        for message in messages {
            tokens += TOKENS_PER_MESSAGE;
            tokens += self.count_text(model, &message.role);
            if let Some(content) = &message.content {
                tokens += self.count_text(model, &content.extract_text());
            }
            if let Some(name) = &message.name {
                tokens += self.count_text(model, name);
            }
        }
        tokens
    }
}

/// Roughly four ASCII characters per token, one token per other character
#[derive(Debug, Default, Clone, Copy)]
pub struct ApproxTokenizer;

impl Tokenizer for ApproxTokenizer {
    fn count_text(&self, _model: &str, text: &str) -> u64 {
        let (ascii, other) = text.chars().fold((0u64, 0u64), |(ascii, other), c| {
            if c.is_ascii() {
                (ascii + 1, other)
            } else {
                (ascii, other + 1)
            }
        });
        ascii.div_ceil(4) + other
    }
}

static TOKENIZER: OnceCell<Box<dyn Tokenizer>> = OnceCell::new();
static FALLBACK: ApproxTokenizer = ApproxTokenizer;

/// Install the process-wide tokenizer. Returns false if one was already installed.
pub fn install(tokenizer: Box<dyn Tokenizer>) -> bool {
    TOKENIZER.set(tokenizer).is_ok()
}

/// The installed tokenizer, or the approximation
pub fn tokenizer() -> &'static dyn Tokenizer {
    match TOKENIZER.get() {
        Some(tokenizer) => tokenizer.as_ref(),
        None => &FALLBACK,
    }
}

fn count_value(model: &str, value: Option<&Value>) -> u64 {
    match value {
        Some(Value::String(text)) => tokenizer().count_text(model, text),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => tokenizer().count_text(model, text),
                Value::Object(map) => count_value(model, map.get("text")),
                _ => 0,
            })
            .sum(),
        _ => 0,
    }
}

/// Count the input tokens of an inbound JSON request body
pub fn count_request(mode: Mode, model: &str, body: &Value) -> u64 {
    match mode {
        Mode::ChatCompletions => body
            .get("messages")
            .cloned()
            .and_then(|messages| serde_json::from_value::<Vec<ChatMessage>>(messages).ok())
            .map(|messages| tokenizer().count_messages(model, &messages))
            .unwrap_or_default(),
        Mode::Completions | Mode::ImagesGenerations | Mode::VideoGenerationsJobs => {
            count_value(model, body.get("prompt"))
        }
        Mode::Embeddings | Mode::Moderations | Mode::AudioSpeech => {
            count_value(model, body.get("input"))
        }
        Mode::Rerank => {
            count_value(model, body.get("query")) + count_value(model, body.get("documents"))
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_approx_counts() {
        let t = ApproxTokenizer;
        assert_eq!(t.count_text("gpt-4", ""), 0);
        assert_eq!(t.count_text("gpt-4", "abcd"), 1);
        assert_eq!(t.count_text("gpt-4", "abcde"), 2);
        assert_eq!(t.count_text("gpt-4", "你好"), 2);
    }

    #[test]
    fn test_count_chat_request() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello there, how are you?"}]
        });
        let tokens = count_request(Mode::ChatCompletions, "gpt-4", &body);
        assert!(tokens > TOKENS_PER_MESSAGE + TOKENS_PER_REPLY);
    }

    #[test]
    fn test_count_embeddings_array() {
        let body = json!({"input": ["abcd", "efgh"]});
        assert_eq!(count_request(Mode::Embeddings, "m", &body), 2);
    }

    #[test]
    fn test_count_rerank() {
        let body = json!({"query": "abcd", "documents": ["abcd", {"text": "abcd"}]});
        assert_eq!(count_request(Mode::Rerank, "m", &body), 3);
    }

    #[test]
    fn test_unsupported_modes_count_zero() {
        assert_eq!(count_request(Mode::AudioTranscription, "m", &json!({})), 0);
    }
}
