use crate::error::Result;
use crate::llm::models::{ChatMessage, ModelDetails, ModelSummary, PullProgress, RunningModel};
use async_trait::async_trait;
use futures::stream::Stream;
use std::pin::Pin;

/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Configuration for a chat completion
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

/// One decoded record of a streamed chat response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text delta to append to the reply
    Content(String),
    /// The daemon marked the reply finished
    Done,
}

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>>;
pub type PullStream<'a> = Pin<Box<dyn Stream<Item = Result<PullProgress>> + Send + 'a>>;

/// Abstract interface to an inference daemon
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Stream a chat completion. Finite and not restartable.
    fn complete_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        config: &'a CompletionConfig,
    ) -> ChunkStream<'a>;

    /// Get list of installed models
    async fn get_available_models(&self) -> Result<Vec<ModelSummary>>;

    /// Fetch model metadata
    async fn show_model(&self, name: &str) -> Result<ModelDetails>;

    /// Download a model, reporting progress as it goes
    fn pull_model<'a>(&'a self, name: &'a str) -> PullStream<'a>;

    /// Remove an installed model
    async fn delete_model(&self, name: &str) -> Result<()>;

    /// Models currently loaded in memory
    async fn running_models(&self) -> Result<Vec<RunningModel>>;

    /// Evict a model from memory
    async fn unload_model(&self, name: &str) -> Result<()>;

    /// Base URL of the daemon, for error messages
    fn host(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_config_default() {
        let config = CompletionConfig::default();
        assert_eq!(config.temperature, 0.7);
    }

    #[test]
    fn test_completion_config_clone() {
        let config1 = CompletionConfig { temperature: 1.3 };
        let config2 = config1.clone();
        assert_eq!(config1.temperature, config2.temperature);
    }

    #[test]
    fn test_stream_chunk_equality() {
        assert_eq!(StreamChunk::Content("a".to_string()), StreamChunk::Content("a".to_string()));
        assert_ne!(StreamChunk::Content("a".to_string()), StreamChunk::Done);
    }
}
