//! The public similarity engine.

use std::sync::Arc;
use std::time::Duration;

use crate::core::backend::{BackendCandidate, BackendNegotiator, NegotiatorState};
use crate::core::embeddings::{Embedding, FeatureExtractor, StorageTracker};
use crate::core::loader::{ImageLoader, ImageSource, DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_IMAGE_BYTES};
use crate::core::model::{ModelCache, ModelLoader};
use crate::core::similarity::cosine_similarity;
use crate::error::Result;
use crate::state::Config;

/// Compares images by the cosine similarity of their embeddings.
///
/// One engine owns one backend negotiation and one cached model; share it
/// behind an `Arc` rather than building several.
#[derive(Debug)]
pub struct SimilarityEngine {
    extractor: FeatureExtractor,
}

impl SimilarityEngine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build the engine described by `config`: built-in backends in the
    /// configured order and the built-in model loader.
    pub fn from_config(config: &Config) -> Result<Self> {
        let negotiator = BackendNegotiator::from_preferences(&config.backends);

        #[cfg(feature = "torch")]
        let loader: Arc<dyn ModelLoader> = Arc::new(crate::core::mobilenet::MobileNetLoader::new(
            config.model_weights.clone(),
            config.model_cache_dir.clone(),
            config.fetch_timeout,
        )?);
        #[cfg(not(feature = "torch"))]
        let loader: Arc<dyn ModelLoader> = Arc::new(crate::core::model::UnavailableModelLoader);

        Self::builder()
            .negotiator(negotiator)
            .model_loader(loader)
            .fetch_timeout(config.fetch_timeout)
            .max_image_bytes(config.max_image_bytes)
            .build()
    }

    /// Similarity of two images in `[0, 1]`.
    ///
    /// Both embeddings are extracted concurrently. The first failure aborts
    /// the comparison; any embedding already produced is released before the
    /// error is returned.
    pub async fn compare_images(&self, a: &ImageSource, b: &ImageSource) -> Result<f32> {
        log::debug!("Comparing {} with {}", a.describe(), b.describe());

        let (left, right) = futures::try_join!(
            self.extractor.extract_features(a),
            self.extractor.extract_features(b)
        )?;

        let score = cosine_similarity(&left, &right);
        left.release();
        right.release();

        let score = score?;
        log::info!("Similarity {:.4}", score);
        Ok(score)
    }

    /// Embedding of a single image. The caller owns the result.
    pub async fn extract_features(&self, source: &ImageSource) -> Result<Embedding> {
        self.extractor.extract_features(source).await
    }

    /// Negotiation state of the compute backend.
    pub fn backend_state(&self) -> NegotiatorState {
        self.extractor.models().negotiator().state()
    }

    /// Whether the embedding model has been loaded.
    pub fn model_loaded(&self) -> bool {
        self.extractor.models().is_loaded()
    }

    /// Number of model loads started so far.
    pub fn model_load_attempts(&self) -> usize {
        self.extractor.models().load_attempts()
    }

    /// Embedding length, known after the first successful extraction.
    pub fn embedding_dimension(&self) -> Option<usize> {
        self.extractor.dimension()
    }

    /// Embeddings handed out and not yet released.
    pub fn live_embeddings(&self) -> usize {
        self.extractor.storage().live_embeddings()
    }
}

/// Builder for [`SimilarityEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    negotiator: Option<BackendNegotiator>,
    loader: Option<Arc<dyn ModelLoader>>,
    http: Option<reqwest::Client>,
    fetch_timeout: Option<Duration>,
    max_image_bytes: Option<usize>,
}

impl EngineBuilder {
    /// Use these backend candidates, tried in order.
    pub fn backends(mut self, candidates: Vec<BackendCandidate>) -> Self {
        self.negotiator = Some(BackendNegotiator::new(candidates));
        self
    }

    /// Use a prepared negotiator.
    pub fn negotiator(mut self, negotiator: BackendNegotiator) -> Self {
        self.negotiator = Some(negotiator);
        self
    }

    /// Load the model with `loader`.
    pub fn model_loader(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Fetch remote images with this client instead of building one.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Timeout for fetching remote images.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Largest encoded image accepted.
    pub fn max_image_bytes(mut self, bytes: usize) -> Self {
        self.max_image_bytes = Some(bytes);
        self
    }

    /// Assemble the engine. Nothing is initialized until first use.
    pub fn build(self) -> Result<SimilarityEngine> {
        let max_bytes = self.max_image_bytes.unwrap_or(DEFAULT_MAX_IMAGE_BYTES);
        let loader = match self.http {
            Some(client) => ImageLoader::new(client, max_bytes),
            None => ImageLoader::with_timeout(
                self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT),
                max_bytes,
            )?,
        };

        let negotiator = Arc::new(
            self.negotiator
                .unwrap_or_else(|| BackendNegotiator::from_preferences(crate::core::backend::DEFAULT_BACKENDS)),
        );
        let model_loader = self
            .loader
            .unwrap_or_else(|| Arc::new(crate::core::model::UnavailableModelLoader));

        let models = Arc::new(ModelCache::new(negotiator, model_loader));
        Ok(SimilarityEngine {
            extractor: FeatureExtractor::new(models, loader, StorageTracker::new()),
        })
    }
}
