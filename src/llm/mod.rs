//! Language-model side of a chat turn: the model contract, an Ollama client,
//! and the pipeline that grounds a prompt in retrieved context.
pub mod ollama;
pub mod pipeline;

use thiserror::Error;

pub use ollama::OllamaClient;
pub use pipeline::{ChatPipeline, ChatReply, ChatTurn, Role};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned an empty response")]
    EmptyResponse,
}

pub trait LanguageModel: Send + Sync {
    /// Complete `prompt` under an optional system prompt.
    fn complete(&self, prompt: &str, system: Option<&str>) -> Result<String, LlmError>;
}
