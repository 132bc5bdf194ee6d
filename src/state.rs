use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::client::SearchClient;
use crate::core::backend::DEFAULT_BACKENDS;
use crate::core::engine::SimilarityEngine;
use crate::core::loader::{DEFAULT_FETCH_TIMEOUT, DEFAULT_MAX_IMAGE_BYTES};
use crate::core::weights::WeightsLocation;
use crate::error::{AppError, Result};

const ENV_PREFIX: &str = "IMAGEMATCH_";

/// Torchvision MobileNet v2 weights converted to a libtorch VarStore.
pub const DEFAULT_MODEL_WEIGHTS: &str =
    "https://github.com/LaurentMazare/tch-rs/releases/download/mw/mobilenet-v2.ot";

/// Configuration for the application
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,
    /// Compute backends to try, in order
    pub backends: Vec<String>,
    /// Where the embedding model weights come from
    pub model_weights: WeightsLocation,
    /// Directory downloaded weights are cached in
    pub model_cache_dir: PathBuf,
    /// Timeout for remote image and weight fetches
    pub fetch_timeout: Duration,
    /// Largest encoded image accepted, in bytes
    pub max_image_bytes: usize,
    /// Root URL of the corpus search service
    pub search_service_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            backends: DEFAULT_BACKENDS.iter().map(|s| s.to_string()).collect(),
            model_weights: WeightsLocation::Url(
                reqwest::Url::parse(DEFAULT_MODEL_WEIGHTS).expect("default weights URL is valid"),
            ),
            model_cache_dir: std::env::temp_dir().join("imagematch").join("models"),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            search_service_url: String::from("http://127.0.0.1:7001"),
        }
    }
}

impl Config {
    /// Load configuration from the environment (and a `.env` file, if
    /// present), falling back to defaults for anything unset.
    ///
    /// Recognized variables: `IMAGEMATCH_BIND_ADDR`, `IMAGEMATCH_BACKENDS`
    /// (comma separated), `IMAGEMATCH_MODEL_WEIGHTS` (path or URL),
    /// `IMAGEMATCH_MODEL_CACHE_DIR`, `IMAGEMATCH_FETCH_TIMEOUT_SECS`,
    /// `IMAGEMATCH_MAX_IMAGE_BYTES`, `IMAGEMATCH_SEARCH_SERVICE_URL`.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = Self::default();

        if let Some(addr) = var("BIND_ADDR") {
            config.bind_addr = parse("BIND_ADDR", &addr)?;
        }
        if let Some(list) = var("BACKENDS") {
            let backends: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_ascii_lowercase)
                .collect();
            if backends.is_empty() {
                return Err(AppError::Config(format!("{}BACKENDS lists no backends", ENV_PREFIX)));
            }
            config.backends = backends;
        }
        if let Some(weights) = var("MODEL_WEIGHTS") {
            config.model_weights = weights.parse()?;
        }
        if let Some(dir) = var("MODEL_CACHE_DIR") {
            config.model_cache_dir = PathBuf::from(dir);
        }
        if let Some(secs) = var("FETCH_TIMEOUT_SECS") {
            let secs: u64 = parse("FETCH_TIMEOUT_SECS", &secs)?;
            if secs == 0 {
                return Err(AppError::Config(format!("{}FETCH_TIMEOUT_SECS must be positive", ENV_PREFIX)));
            }
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = var("MAX_IMAGE_BYTES") {
            config.max_image_bytes = parse("MAX_IMAGE_BYTES", &bytes)?;
        }
        if let Some(url) = var("SEARCH_SERVICE_URL") {
            config.search_service_url = url;
        }

        log::debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, name))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::Config(format!("invalid {}{} '{}': {}", ENV_PREFIX, name, value, e)))
}

/// Application state that can be shared across handlers
#[derive(Debug)]
pub struct AppState {
    /// Application configuration
    pub config: Config,
    /// Shared similarity engine
    pub engine: Arc<SimilarityEngine>,
    /// Client for the corpus search service
    pub search: SearchClient,
}

impl AppState {
    /// Create the application state described by `config`
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let engine = Arc::new(SimilarityEngine::from_config(&config)?);
        Self::with_engine(config, engine)
    }

    /// Create the application state around an existing engine
    pub fn with_engine(config: Config, engine: Arc<SimilarityEngine>) -> Result<Arc<Self>> {
        let search = SearchClient::new(&config.search_service_url, config.fetch_timeout)?;

        Ok(Arc::new(Self {
            config,
            engine,
            search,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "BIND_ADDR",
        "BACKENDS",
        "MODEL_WEIGHTS",
        "MODEL_CACHE_DIR",
        "FETCH_TIMEOUT_SECS",
        "MAX_IMAGE_BYTES",
        "SEARCH_SERVICE_URL",
    ];

    fn clear() {
        for name in VARS {
            std::env::remove_var(format!("{}{}", ENV_PREFIX, name));
        }
    }

    #[test]
    #[serial]
    fn defaults_when_unset() {
        clear();
        let config = Config::from_env().unwrap();
        assert_eq!(config.backends, vec!["cpu", "cuda"]);
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.search_service_url, "http://127.0.0.1:7001");
        assert!(matches!(config.model_weights, WeightsLocation::Url(_)));
    }

    #[test]
    #[serial]
    fn reads_overrides() {
        clear();
        std::env::set_var("IMAGEMATCH_BACKENDS", " CUDA , cpu,");
        std::env::set_var("IMAGEMATCH_MODEL_WEIGHTS", "/models/mobilenet_v2.ot");
        std::env::set_var("IMAGEMATCH_FETCH_TIMEOUT_SECS", "5");
        std::env::set_var("IMAGEMATCH_BIND_ADDR", "0.0.0.0:8080");

        let config = Config::from_env().unwrap();
        clear();

        assert_eq!(config.backends, vec!["cuda", "cpu"]);
        assert_eq!(
            config.model_weights,
            WeightsLocation::File(PathBuf::from("/models/mobilenet_v2.ot"))
        );
        assert_eq!(config.fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
    }

    #[test]
    #[serial]
    fn rejects_invalid_values() {
        clear();
        std::env::set_var("IMAGEMATCH_MAX_IMAGE_BYTES", "lots");
        let result = Config::from_env();
        clear();
        assert!(matches!(result, Err(AppError::Config(_))));

        std::env::set_var("IMAGEMATCH_FETCH_TIMEOUT_SECS", "0");
        let result = Config::from_env();
        clear();
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
