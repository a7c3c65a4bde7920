use crate::error::{Result, VisionChatError};
use crate::llm::gateway::{ChunkStream, CompletionConfig, LlmGateway, PullStream, StreamChunk};
use crate::llm::models::{ChatMessage, ModelDetails, ModelSummary, PullProgress, RunningModel};
use crate::llm::ndjson;
use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for connecting to Ollama server
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub host: String,
    /// Bound on establishing a chat response; the body itself may stream for longer
    pub chat_timeout: Duration,
    /// Bound on short management calls (tags, show, ps, unload)
    pub request_timeout: Duration,
    pub pull_timeout: Duration,
    pub delete_timeout: Duration,
    pub connect_timeout: Duration,
    pub headers: HashMap<String, String>,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            chat_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(5),
            pull_timeout: Duration::from_secs(600),
            delete_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            headers: HashMap::new(),
        }
    }
}

/// Gateway for Ollama local LLM service
///
/// Covers streamed chat plus the model management endpoints: listing, metadata, pull,
/// delete, and loading state.
pub struct OllamaGateway {
    client: Client,
    config: OllamaConfig,
}

impl OllamaGateway {
    /// Create a new Ollama gateway with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(OllamaConfig::default())
    }

    /// Create a new Ollama gateway with custom configuration
    pub fn with_config(config: OllamaConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                VisionChatError::ConfigError(format!("invalid header name '{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                VisionChatError::ConfigError(format!("invalid header value for '{}': {}", name, e))
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self { client, config })
    }

    /// Create gateway with custom host
    pub fn with_host(host: impl Into<String>) -> Result<Self> {
        Self::with_config(OllamaConfig {
            host: host.into(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host, path)
    }

    /// Send a request, waiting at most `bound` for the response head, and turn
    /// non-success statuses into errors carrying the body text
    async fn send(&self, request: RequestBuilder, bound: Duration, what: &str) -> Result<Response> {
        let response = match tokio::time::timeout(bound, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(VisionChatError::from_transport(e, &self.config.host)),
            Err(_) => {
                return Err(VisionChatError::Timeout(format!(
                    "{} did not respond within {}s",
                    what,
                    bound.as_secs()
                )))
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Ollama {} failed with {}: {}", what, status, body);
            return Err(VisionChatError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelSummary>,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<RunningModel>,
}

#[derive(Debug, Deserialize)]
struct ChatRecord {
    #[serde(default)]
    message: Option<ChatDelta>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRecord {
    #[serde(flatten)]
    progress: PullProgress,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl LlmGateway for OllamaGateway {
    fn complete_stream<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [ChatMessage],
        config: &'a CompletionConfig,
    ) -> ChunkStream<'a> {
        Box::pin(async_stream::stream! {
            info!("Starting Ollama streaming chat");
            debug!("Model: {}, Message count: {}", model, messages.len());

            let body = serde_json::json!({
                "model": model,
                "messages": messages,
                "stream": true,
                "options": {
                    "temperature": config.temperature
                }
            });

            let request = self.client.post(self.url("/api/chat")).json(&body);
            let response = match self.send(request, self.config.chat_timeout, "chat").await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut records = Box::pin(ndjson::records::<ChatRecord>(response, self.config.host.clone()));
            while let Some(record) = records.next().await {
                match record {
                    Ok(record) => {
                        if let Some(error) = record.error {
                            yield Err(VisionChatError::ApiError(error));
                            return;
                        }

                        if let Some(content) = record.message.and_then(|m| m.content) {
                            if !content.is_empty() {
                                yield Ok(StreamChunk::Content(content));
                            }
                        }

                        if record.done {
                            yield Ok(StreamChunk::Done);
                            return;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }

    async fn get_available_models(&self) -> Result<Vec<ModelSummary>> {
        debug!("Fetching available Ollama models");

        let bound = self.config.request_timeout;
        let request = self.client.get(self.url("/api/tags")).timeout(bound);
        let response = self.send(request, bound, "model listing").await?;

        let body: TagsResponse = response
            .json()
            .await
            .map_err(|e| VisionChatError::from_transport(e, &self.config.host))?;
        Ok(body.models)
    }

    async fn show_model(&self, name: &str) -> Result<ModelDetails> {
        debug!("Fetching metadata for {}", name);

        let bound = self.config.request_timeout;
        let request = self
            .client
            .post(self.url("/api/show"))
            .json(&serde_json::json!({ "name": name }))
            .timeout(bound);
        let response = self.send(request, bound, "model metadata").await?;

        response
            .json()
            .await
            .map_err(|e| VisionChatError::from_transport(e, &self.config.host))
    }

    fn pull_model<'a>(&'a self, name: &'a str) -> PullStream<'a> {
        Box::pin(async_stream::stream! {
            info!("Pulling Ollama model: {}", name);

            let request = self
                .client
                .post(self.url("/api/pull"))
                .json(&serde_json::json!({ "name": name, "stream": true }));
            let response = match self.send(request, self.config.pull_timeout, "pull").await {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut records = Box::pin(ndjson::records::<PullRecord>(response, self.config.host.clone()));
            while let Some(record) = records.next().await {
                match record {
                    Ok(PullRecord { error: Some(error), .. }) => {
                        yield Err(VisionChatError::ApiError(error));
                        return;
                    }
                    Ok(PullRecord { progress, .. }) => {
                        yield Ok(progress);
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }
        })
    }

    async fn delete_model(&self, name: &str) -> Result<()> {
        info!("Deleting Ollama model: {}", name);

        let bound = self.config.delete_timeout;
        let request = self
            .client
            .delete(self.url("/api/delete"))
            .json(&serde_json::json!({ "name": name }))
            .timeout(bound);
        self.send(request, bound, "delete").await?;

        Ok(())
    }

    async fn running_models(&self) -> Result<Vec<RunningModel>> {
        debug!("Fetching running Ollama models");

        let bound = self.config.request_timeout;
        let request = self.client.get(self.url("/api/ps")).timeout(bound);
        let response = self.send(request, bound, "running models").await?;

        let body: PsResponse = response
            .json()
            .await
            .map_err(|e| VisionChatError::from_transport(e, &self.config.host))?;
        Ok(body.models)
    }

    async fn unload_model(&self, name: &str) -> Result<()> {
        info!("Unloading Ollama model: {}", name);

        let bound = self.config.request_timeout;
        let request = self
            .client
            .post(self.url("/api/generate"))
            .json(&serde_json::json!({ "model": name, "keep_alive": 0 }))
            .timeout(bound);
        self.send(request, bound, "unload").await?;

        Ok(())
    }

    fn host(&self) -> &str {
        &self.config.host
    }
}
