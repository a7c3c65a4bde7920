//! Terminal front end: startup flags and the interactive loop.

pub mod app;
pub mod commands;

pub use app::{resolve_model, App, Flow};

use crate::config::{Settings, DEFAULT_HOST, DEFAULT_TEMPERATURE};
use crate::error::Result;
use crate::session::ConversationMode;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the Ollama daemon
    #[arg(long, env = "OLLAMA_HOST", default_value = DEFAULT_HOST)]
    pub url: String,

    /// Model to chat with; defaults to the first installed vision model
    #[arg(long, env = "VISION_CHAT_MODEL")]
    pub model: Option<String>,

    /// Sampling temperature, 0.0 to 2.0
    #[arg(long, env = "VISION_CHAT_TEMPERATURE", default_value_t = DEFAULT_TEMPERATURE)]
    pub temperature: f32,

    /// Conversation mode to start in (single, dual, triple)
    #[arg(long, env = "VISION_CHAT_MODE", default_value = "single")]
    pub mode: ConversationMode,

    /// Seconds to wait for a chat response to start
    #[arg(long, env = "VISION_CHAT_TIMEOUT", default_value_t = 120)]
    pub chat_timeout: u64,

    /// Leave models loaded in memory on exit
    #[arg(long, env = "VISION_CHAT_KEEP_LOADED")]
    pub keep_loaded: bool,
}

impl Args {
    /// Validated settings for the session
    pub fn settings(&self) -> Result<Settings> {
        Settings {
            host: self.url.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            chat_timeout: Duration::from_secs(self.chat_timeout),
            keep_loaded: self.keep_loaded,
        }
        .validate()
    }
}
