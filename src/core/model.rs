//! Embedding model contract and the per-engine model cache.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::core::backend::{ActiveBackend, BackendNegotiator};
use crate::core::loader::DecodedImage;
use crate::error::{AppError, Result};

/// Architecture of the embedding model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    /// MobileNet v2.
    MobileNetV2,
}

/// The model every engine loads.
pub const MODEL_VARIANT: ModelVariant = ModelVariant::MobileNetV2;
/// Channel width multiplier (alpha) applied to every layer.
pub const WIDTH_MULTIPLIER: f64 = 1.0;

/// A loaded, immutable inference unit.
///
/// `infer` is called from the blocking pool and may be called from several
/// threads at once.
pub trait FeatureModel: Send + Sync {
    /// Human-readable model identifier.
    fn name(&self) -> &str;

    /// Run the model and return the flattened activation.
    fn infer(&self, image: &DecodedImage) -> anyhow::Result<Vec<f32>>;
}

/// Produces a [`FeatureModel`] for a negotiated backend.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Load the model onto `backend`.
    ///
    /// Fetch and parse failures should be reported as `ModelLoad`.
    async fn load(&self, backend: &ActiveBackend) -> Result<Arc<dyn FeatureModel>>;
}

/// Loader for builds that carry no model implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableModelLoader;

#[async_trait]
impl ModelLoader for UnavailableModelLoader {
    async fn load(&self, _backend: &ActiveBackend) -> Result<Arc<dyn FeatureModel>> {
        Err(AppError::ModelLoad(
            "no embedding model is compiled into this build (enable the `torch` feature)".to_string(),
        ))
    }
}

/// Lazily loads the embedding model once and hands out shared references.
pub struct ModelCache {
    negotiator: Arc<BackendNegotiator>,
    loader: Arc<dyn ModelLoader>,
    model: OnceCell<Arc<dyn FeatureModel>>,
    load_attempts: AtomicUsize,
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.is_loaded())
            .field("load_attempts", &self.load_attempts())
            .finish_non_exhaustive()
    }
}

impl ModelCache {
    /// Create an empty cache.
    pub fn new(negotiator: Arc<BackendNegotiator>, loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            negotiator,
            loader,
            model: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
        }
    }

    /// Return the cached model, negotiating a backend and loading the model
    /// on first use.
    ///
    /// A failed load leaves the cache empty; the next call tries again.
    pub async fn get_model(&self) -> Result<Arc<dyn FeatureModel>> {
        let backend = self.negotiator.ensure_ready().await?;

        let model = self
            .model
            .get_or_try_init(|| async {
                self.load_attempts.fetch_add(1, Ordering::AcqRel);
                log::info!(
                    "Loading {:?} (alpha {}) on {}",
                    MODEL_VARIANT,
                    WIDTH_MULTIPLIER,
                    backend.name
                );

                match self.loader.load(&backend).await {
                    Ok(model) => {
                        log::info!("Embedding model {} ready", model.name());
                        Ok(model)
                    }
                    Err(e) => {
                        log::error!("Failed to load embedding model: {}", e);
                        Err(e)
                    }
                }
            })
            .await?;

        Ok(Arc::clone(model))
    }

    /// Whether a model is cached.
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    /// How many times a load has been started.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::Acquire)
    }

    /// The negotiator this cache depends on.
    pub fn negotiator(&self) -> &Arc<BackendNegotiator> {
        &self.negotiator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::{BackendCandidate, Device};
    use std::sync::atomic::AtomicBool;

    struct Constant;

    impl FeatureModel for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn infer(&self, _image: &DecodedImage) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 2.0])
        }
    }

    struct FailOnce {
        failed: AtomicBool,
    }

    #[async_trait]
    impl ModelLoader for FailOnce {
        async fn load(&self, _backend: &ActiveBackend) -> Result<Arc<dyn FeatureModel>> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(AppError::ModelLoad("connection reset".to_string()));
            }
            Ok(Arc::new(Constant))
        }
    }

    fn negotiator() -> Arc<BackendNegotiator> {
        Arc::new(BackendNegotiator::new(vec![BackendCandidate::new("cpu", || Ok(Device::Cpu))]))
    }

    #[tokio::test]
    async fn failed_load_leaves_cache_empty() {
        let cache = ModelCache::new(negotiator(), Arc::new(FailOnce { failed: AtomicBool::new(false) }));

        assert!(matches!(cache.get_model().await, Err(AppError::ModelLoad(_))));
        assert!(!cache.is_loaded());

        let model = cache.get_model().await.unwrap();
        assert_eq!(model.name(), "constant");
        assert!(cache.is_loaded());
        assert_eq!(cache.load_attempts(), 2);

        cache.get_model().await.unwrap();
        assert_eq!(cache.load_attempts(), 2);
    }

    #[tokio::test]
    async fn backend_failure_stops_before_loading() {
        let negotiator = Arc::new(BackendNegotiator::new(vec![BackendCandidate::new("cpu", || {
            anyhow::bail!("no runtime")
        })]));
        let cache = ModelCache::new(negotiator, Arc::new(FailOnce { failed: AtomicBool::new(true) }));

        assert!(matches!(cache.get_model().await, Err(AppError::BackendUnavailable { .. })));
        assert_eq!(cache.load_attempts(), 0);
    }

    #[tokio::test]
    async fn unavailable_loader_reports_model_load() {
        let cache = ModelCache::new(negotiator(), Arc::new(UnavailableModelLoader));
        let err = cache.get_model().await.err().unwrap();
        assert!(matches!(err, AppError::ModelLoad(_)));
        assert!(err.is_retryable());
    }
}
