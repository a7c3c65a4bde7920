//! Error types and result aliases for vision-chat.
//!
//! This module defines the core error type [`VisionChatError`] and the [`Result`] type
//! alias used throughout the crate. Every failure is local to the action that triggered
//! it; nothing here is retried automatically.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionChatError {
    #[error("Could not connect to Ollama at {url}")]
    Connection { url: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Image error: {0}")]
    ImageError(String),

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("{0}")]
    MissingImage(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl VisionChatError {
    /// Classify a transport failure against the daemon at `url`.
    ///
    /// Connection refusals and timeouts get their own variants so callers can tell
    /// "daemon is down" apart from "daemon is slow".
    pub fn from_transport(err: reqwest::Error, url: &str) -> Self {
        if err.is_timeout() {
            VisionChatError::Timeout(err.to_string())
        } else if err.is_connect() {
            VisionChatError::Connection {
                url: url.to_string(),
            }
        } else {
            VisionChatError::HttpError(err)
        }
    }

    /// True for errors that mean the daemon could not be reached in time.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, VisionChatError::Connection { .. } | VisionChatError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, VisionChatError>;
