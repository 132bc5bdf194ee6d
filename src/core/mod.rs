//! Core embedding and similarity engine

/// Compute backend negotiation.
pub mod backend;
/// Embedding vectors and the feature extractor.
pub mod embeddings;
/// The similarity engine entry point.
pub mod engine;
/// Source fingerprints.
#[cfg(feature = "hashing")]
pub mod hash;
/// Image sources and decoding.
pub mod loader;
/// MobileNet v2 on libtorch.
#[cfg(feature = "torch")]
pub mod mobilenet;
/// Embedding model contract and cache.
pub mod model;
/// Image to tensor preprocessing.
pub mod preprocess;
/// Cosine similarity.
pub mod similarity;
/// Model weight resolution.
pub mod weights;
