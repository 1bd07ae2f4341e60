//! Default AI conversation engine: a local Ollama model.

mod ollama;

pub use ollama::{
    parse_reply, ChatMessage, ChatResponse, OllamaClient, OllamaConversationEngine, OllamaError,
    OllamaModel,
};
