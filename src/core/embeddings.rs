use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use ndarray::ArrayView1;

use crate::core::loader::{ImageLoader, ImageSource};
use crate::core::model::ModelCache;
use crate::error::{AppError, Result};

/// Book-keeping for embedding storage handed out to callers.
///
/// Every live [`Embedding`] holds a lease; the counters go back down when
/// the embedding is released or dropped.
#[derive(Debug, Default)]
pub struct StorageTracker {
    live: AtomicUsize,
    bytes: AtomicUsize,
}

impl StorageTracker {
    /// Create a tracker with nothing outstanding.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lease(self: &Arc<Self>, len: usize) -> StorageLease {
        let bytes = len * std::mem::size_of::<f32>();
        self.live.fetch_add(1, Ordering::AcqRel);
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
        StorageLease {
            tracker: Arc::clone(self),
            bytes,
        }
    }

    /// Embeddings produced and not yet released.
    pub fn live_embeddings(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Bytes held by unreleased embeddings.
    pub fn live_bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct StorageLease {
    tracker: Arc<StorageTracker>,
    bytes: usize,
}

impl Drop for StorageLease {
    fn drop(&mut self) {
        self.tracker.live.fetch_sub(1, Ordering::AcqRel);
        self.tracker.bytes.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// A one-dimensional image embedding.
///
/// The caller owns it exclusively. Storage is returned exactly once, either
/// through [`Embedding::release`] or when the value is dropped.
pub struct Embedding {
    values: Vec<f32>,
    fingerprint: Option<String>,
    _lease: StorageLease,
}

impl Embedding {
    /// Number of components.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Always false for embeddings produced by the extractor.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The components as an ndarray view.
    pub fn values(&self) -> ArrayView1<'_, f32> {
        ArrayView1::from(self.values.as_slice())
    }

    /// The components as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// SHA3-256 of the encoded source image, when hashing is enabled.
    pub fn source_fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Copy the components out and release the storage.
    pub fn into_vec(self) -> Vec<f32> {
        let Embedding { values, .. } = self;
        values
    }

    /// Return the backing storage.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Embedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedding")
            .field("len", &self.len())
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Runs the cached model over decoded images.
#[derive(Debug)]
pub struct FeatureExtractor {
    models: Arc<ModelCache>,
    loader: ImageLoader,
    storage: Arc<StorageTracker>,
    dimension: OnceLock<usize>,
}

impl FeatureExtractor {
    /// Create an extractor over `models`, decoding with `loader`.
    pub fn new(models: Arc<ModelCache>, loader: ImageLoader, storage: Arc<StorageTracker>) -> Self {
        Self {
            models,
            loader,
            storage,
            dimension: OnceLock::new(),
        }
    }

    /// Compute the embedding of one image.
    ///
    /// Errors from the model cache and the image loader are returned as is.
    pub async fn extract_features(&self, source: &ImageSource) -> Result<Embedding> {
        let model = self.models.get_model().await?;
        let image = self.loader.load(source).await?;
        let fingerprint = image.fingerprint().map(String::from);

        let values = tokio::task::spawn_blocking(move || model.infer(&image))
            .await
            .map_err(|e| AppError::FeatureExtraction(format!("inference aborted: {}", e)))?
            .map_err(|e| AppError::FeatureExtraction(format!("{:#}", e)))?;

        if values.is_empty() {
            return Err(AppError::FeatureExtraction("model produced an empty embedding".to_string()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(AppError::FeatureExtraction(
                "model produced non-finite activations".to_string(),
            ));
        }

        let expected = *self.dimension.get_or_init(|| values.len());
        if values.len() != expected {
            return Err(AppError::FeatureExtraction(format!(
                "embedding length changed from {} to {}",
                expected,
                values.len()
            )));
        }

        log::debug!("Extracted {}-d embedding from {}", values.len(), source.describe());

        let lease = self.storage.lease(values.len());
        Ok(Embedding {
            values,
            fingerprint,
            _lease: lease,
        })
    }

    /// Embedding length, once the first extraction has succeeded.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension.get().copied()
    }

    /// Storage tracker shared by every embedding this extractor produces.
    pub fn storage(&self) -> &Arc<StorageTracker> {
        &self.storage
    }

    /// The model cache.
    pub fn models(&self) -> &Arc<ModelCache> {
        &self.models
    }
}

#[cfg(test)]
pub(crate) fn embedding_for_tests(values: Vec<f32>, storage: &Arc<StorageTracker>) -> Embedding {
    let lease = storage.lease(values.len());
    Embedding {
        values,
        fingerprint: None,
        _lease: lease,
    }
}
