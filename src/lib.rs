//! Chat with local vision-language models about one, two or three images.
//!
//! Images are rotated and, in multi-image modes, composited side by side into one
//! JPEG before being sent to an Ollama daemon, which streams the reply back.

pub mod cli;
pub mod config;
pub mod error;
pub mod imaging;
pub mod llm;
pub mod session;

pub use error::{Result, VisionChatError};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{Result, VisionChatError};
    pub use crate::imaging::{compose, rotate, CompositeImage, Rotation, UploadedImage};
    pub use crate::llm::gateways::OllamaGateway;
    pub use crate::llm::{CompletionConfig, LlmGateway, ModelDirectory, VisionFilter};
    pub use crate::session::{Conversation, ConversationMode, Workspace};
}
