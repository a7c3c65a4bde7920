pub mod accumulator;
pub mod gateway;
pub mod gateways;
pub mod model_directory;
pub mod models;
pub mod ndjson;

pub use accumulator::{accumulate, ResponseAccumulator};
pub use gateway::{CompletionConfig, LlmGateway, StreamChunk};
pub use model_directory::{ListingFailure, ModelDirectory, ModelListing, VisionFilter};
pub use models::{ChatMessage, MessageRole, ModelDescriptor, PullProgress, RunningModel};
