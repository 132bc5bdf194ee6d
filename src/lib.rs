#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

//! # ImageMatch
//!
//! Compare images, or find visually similar ones in a corpus, by turning
//! each image into an embedding with a pretrained MobileNet v2 and scoring
//! pairs with cosine similarity.
//!
//! ## Features
//!
//! - **Backend negotiation**: picks the first working compute backend from
//!   an ordered preference list, once per engine
//! - **Model caching**: loads the embedding model lazily and retries after a
//!   failed load
//! - **Flexible sources**: data URIs, raw bytes, `http(s)` URLs and files
//! - **Bounded scores**: similarity is always in `[0, 1]`
//! - **Corpus search client**: typed access to the remote search and
//!   grouping service
//! - **Web API**: HTTP server exposing comparison, extraction and search
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use imagematch::{Config, ImageSource, Result, SimilarityEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let engine = SimilarityEngine::from_config(&Config::from_env()?)?;
//!     let a: ImageSource = "photos/cat.jpg".parse()?;
//!     let b: ImageSource = "https://example.com/cat.png".parse()?;
//!     println!("similarity: {:.2}", engine.compare_images(&a, &b).await?);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "web")]
pub mod api;
pub mod client;
pub mod core;
/// Defines the application's error types and result aliases.
pub mod error;
pub mod models;
mod state;
mod utils;

#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

// Public API exports
pub use crate::{
    client::SearchClient,
    core::{
        backend::{ActiveBackend, BackendCandidate, BackendNegotiator, Device, NegotiatorState},
        embeddings::{Embedding, FeatureExtractor, StorageTracker},
        engine::{EngineBuilder, SimilarityEngine},
        loader::{DecodedImage, ImageLoader, ImageSource},
        model::{FeatureModel, ModelCache, ModelLoader},
        similarity::{cosine_similarity, cosine_similarity_slices},
    },
    error::{AppError, BackendAttempt, Result},
    models::search::{FileType, SearchResults, SimilarGroups, SimilarImage, Threshold},
    state::{AppState, Config},
    utils::to_percentage,
};

#[cfg(feature = "web")]
pub use crate::api::create_router;

#[cfg(feature = "torch")]
pub use crate::core::mobilenet::{MobileNetLoader, MobileNetModel};

/// Initialize logging with sensible defaults
///
/// Honors `RUST_LOG`; defaults to `info`. Calling it more than once is
/// harmless.
///
/// # Example
///
/// ```no_run
/// imagematch::init();
/// log::info!("ready");
/// ```
pub fn init() {
    let env = env_logger::Env::default()
        .default_filter_or("info")
        .default_write_style_or("auto");

    let initialized = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .format_module_path(false)
        .format_target(false)
        .try_init()
        .is_ok();

    if initialized {
        log::info!("Initializing ImageMatch {}", built_info::PKG_VERSION);
    }
}
