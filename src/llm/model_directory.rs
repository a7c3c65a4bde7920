//! Model directory: which models the daemon has, and which of them take images.
//!
//! Vision detection is a best-effort heuristic. Two strategies exist and neither is
//! authoritative: a fast keyword test on the model name, and a slower inspection of
//! each model's metadata (one extra request per model). Listing never fails outright;
//! when the daemon cannot be reached the result is empty and says why.

use crate::error::{Result, VisionChatError};
use crate::llm::gateway::{LlmGateway, PullStream};
use crate::llm::models::{ModelDescriptor, ModelDetails, ModelSummary, RunningModel};
use futures::stream::StreamExt;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name fragments that suggest a vision-capable model
pub const VISION_KEYWORDS: [&str; 6] = ["vision", "vl", "llava", "qwen", "moondream", "minicpm"];

/// How long a successful listing is reused
pub const LISTING_TTL: Duration = Duration::from_secs(60);

static VISION_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(vision|clip|projector|mmproj)\b").expect("vision marker pattern is valid")
});

/// Strategy for deciding which models count as vision-capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VisionFilter {
    /// Match [`VISION_KEYWORDS`] against the name
    #[default]
    Keyword,
    /// Inspect `/api/show` metadata, falling back to the keyword test
    Metadata,
    /// No filtering; `vision` is still set from the keyword test
    All,
}

impl FromStr for VisionFilter {
    type Err = VisionChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "keyword" => Ok(VisionFilter::Keyword),
            "metadata" => Ok(VisionFilter::Metadata),
            "all" => Ok(VisionFilter::All),
            other => Err(VisionChatError::ConfigError(format!(
                "unknown model filter '{}', expected keyword, metadata or all",
                other
            ))),
        }
    }
}

/// Why a listing came back empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingFailure {
    Unreachable(String),
    Timeout,
    Status(u16),
    Other(String),
}

impl From<&VisionChatError> for ListingFailure {
    fn from(err: &VisionChatError) -> Self {
        match err {
            VisionChatError::Connection { url } => ListingFailure::Unreachable(url.clone()),
            VisionChatError::Timeout(_) => ListingFailure::Timeout,
            VisionChatError::Status { status, .. } => ListingFailure::Status(*status),
            other => ListingFailure::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ListingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListingFailure::Unreachable(url) => write!(f, "Ollama is not reachable at {}", url),
            ListingFailure::Timeout => write!(f, "Ollama did not answer in time"),
            ListingFailure::Status(status) => write!(f, "Ollama answered with HTTP {}", status),
            ListingFailure::Other(msg) => write!(f, "{}", msg),
        }
    }
}

/// Result of a listing: models, or an empty list plus the reason
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelListing {
    pub models: Vec<ModelDescriptor>,
    pub failure: Option<ListingFailure>,
}

impl ModelListing {
    fn degraded(failure: ListingFailure) -> Self {
        Self {
            models: Vec::new(),
            failure: Some(failure),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }

    pub fn names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }
}

/// Outcome of unloading every running model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnloadReport {
    pub unloaded: Vec<String>,
    pub failed: Vec<String>,
}

impl UnloadReport {
    pub fn count(&self) -> usize {
        self.unloaded.len()
    }
}

/// True when the name contains one of [`VISION_KEYWORDS`]
pub fn is_vision_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    VISION_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// True when model metadata carries a vision capability, a projector, or a marker
pub fn details_indicate_vision(details: &ModelDetails) -> bool {
    details.capabilities.iter().any(|c| c.eq_ignore_ascii_case("vision"))
        || details.projector_info.is_some()
        || [&details.modelfile, &details.template, &details.parameters]
            .iter()
            .any(|text| VISION_MARKERS.is_match(text))
}

struct CachedListing {
    fetched_at: Instant,
    models: Vec<ModelDescriptor>,
}

/// Caching front for the daemon's model management endpoints
pub struct ModelDirectory {
    gateway: Arc<dyn LlmGateway>,
    ttl: Duration,
    cache: Mutex<HashMap<VisionFilter, CachedListing>>,
}

impl ModelDirectory {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self::with_ttl(gateway, LISTING_TTL)
    }

    pub fn with_ttl(gateway: Arc<dyn LlmGateway>, ttl: Duration) -> Self {
        Self {
            gateway,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn LlmGateway> {
        &self.gateway
    }

    /// List models under `filter`, sorted by name.
    ///
    /// Failures degrade to an empty listing carrying the reason; they are not cached.
    pub async fn list_models(&self, filter: VisionFilter) -> ModelListing {
        if let Some(models) = self.cached(filter) {
            debug!("Using cached model listing for {:?}", filter);
            return ModelListing {
                models,
                failure: None,
            };
        }

        let summaries = match self.gateway.get_available_models().await {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!("Model listing failed: {}", e);
                return ModelListing::degraded(ListingFailure::from(&e));
            }
        };

        let mut models = Vec::with_capacity(summaries.len());
        for ModelSummary { name, size } in summaries {
            let vision = match filter {
                VisionFilter::Keyword | VisionFilter::All => is_vision_name(&name),
                VisionFilter::Metadata => self.inspect(&name).await,
            };
            if vision || filter == VisionFilter::All {
                models.push(ModelDescriptor { name, size, vision });
            }
        }
        models.sort_by(|a, b| a.name.cmp(&b.name));

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                filter,
                CachedListing {
                    fetched_at: Instant::now(),
                    models: models.clone(),
                },
            );
        }

        ModelListing {
            models,
            failure: None,
        }
    }

    async fn inspect(&self, name: &str) -> bool {
        match self.gateway.show_model(name).await {
            Ok(details) => details_indicate_vision(&details),
            Err(e) => {
                debug!("Metadata for {} unavailable ({}), using name", name, e);
                is_vision_name(name)
            }
        }
    }

    fn cached(&self, filter: VisionFilter) -> Option<Vec<ModelDescriptor>> {
        let cache = self.cache.lock().ok()?;
        cache
            .get(&filter)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.models.clone())
    }

    /// Drop cached listings so the next call goes to the daemon
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    /// Download a model; the cache is invalidated once the download completes
    pub fn pull<'a>(&'a self, name: &'a str) -> PullStream<'a> {
        Box::pin(async_stream::stream! {
            let mut progress = self.gateway.pull_model(name);
            while let Some(update) = progress.next().await {
                let failed = update.is_err();
                yield update;
                if failed {
                    return;
                }
            }
            self.invalidate();
        })
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        self.gateway.delete_model(name).await?;
        self.invalidate();
        Ok(())
    }

    pub async fn running(&self) -> Result<Vec<RunningModel>> {
        self.gateway.running_models().await
    }

    /// Unload every model the daemon has in memory.
    ///
    /// Reading the running list must succeed; individual unload failures are
    /// recorded in the report.
    pub async fn unload_all(&self) -> Result<UnloadReport> {
        let running = self.gateway.running_models().await?;
        let mut report = UnloadReport::default();

        for model in running {
            if model.name.is_empty() {
                continue;
            }
            match self.gateway.unload_model(&model.name).await {
                Ok(()) => {
                    info!("Unloaded model: {}", model.name);
                    report.unloaded.push(model.name);
                }
                Err(e) => {
                    warn!("Failed to unload {}: {}", model.name, e);
                    report.failed.push(model.name);
                }
            }
        }

        Ok(report)
    }
}
