use serde::{Deserialize, Serialize};

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Message as sent to `/api/chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Base64-encoded images
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

impl ChatMessage {
    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            images: None,
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            images: None,
        }
    }

    /// Attach base64 image payloads
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = Some(images);
        self
    }
}

/// A model known to the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub name: String,
    pub size: u64,
    /// Best-effort guess; see `VisionFilter`
    pub vision: bool,
}

/// Entry from `/api/tags`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Entry from `/api/ps`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunningModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl RunningModel {
    pub fn size_gib(&self) -> f64 {
        self.size as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Subset of `/api/show` used for vision detection
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub modelfile: String,
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub projector_info: Option<serde_json::Value>,
}

/// One progress record from `/api/pull`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
}

impl PullProgress {
    /// Completed share in `[0, 1]`, when the record carries byte counts
    pub fn fraction(&self) -> Option<f64> {
        match (self.completed, self.total) {
            (Some(completed), Some(total)) if total > 0 => {
                Some((completed as f64 / total as f64).min(1.0))
            }
            _ => None,
        }
    }
}
