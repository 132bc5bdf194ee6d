//! Locating model weights on disk, downloading them when needed.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::Url;

use crate::error::{AppError, Result};

/// Where the model weights live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightsLocation {
    /// A weights file on disk.
    File(PathBuf),
    /// A weights file to download into the cache directory.
    Url(Url),
}

impl fmt::Display for WeightsLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightsLocation::File(path) => write!(f, "{}", path.display()),
            WeightsLocation::Url(url) => write!(f, "{}", url),
        }
    }
}

impl FromStr for WeightsLocation {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AppError::Config("model weights location is empty".to_string()));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Url::parse(s)
                .map(WeightsLocation::Url)
                .map_err(|e| AppError::Config(format!("invalid weights URL '{}': {}", s, e)));
        }
        Ok(WeightsLocation::File(PathBuf::from(s)))
    }
}

/// Resolve `location` to a local file, downloading into `cache_dir` if it
/// is a URL that has not been fetched before.
///
/// Downloads land in a temporary file first and are moved into place only
/// once complete, so an interrupted fetch never leaves a truncated file.
pub async fn resolve(
    location: &WeightsLocation,
    cache_dir: &Path,
    http: &reqwest::Client,
) -> Result<PathBuf> {
    match location {
        WeightsLocation::File(path) => {
            if tokio::fs::metadata(path).await.is_err() {
                return Err(AppError::ModelLoad(format!(
                    "weights file {} does not exist",
                    path.display()
                )));
            }
            Ok(path.clone())
        }
        WeightsLocation::Url(url) => {
            let target = cache_dir.join(cache_file_name(url));
            if tokio::fs::metadata(&target).await.is_ok() {
                log::debug!("Using cached weights {}", target.display());
                return Ok(target);
            }
            download(url, cache_dir, &target, http).await?;
            Ok(target)
        }
    }
}

fn cache_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(String::from)
        .unwrap_or_else(|| "model-weights.ot".to_string())
}

async fn download(url: &Url, cache_dir: &Path, target: &Path, http: &reqwest::Client) -> Result<()> {
    log::info!("Downloading model weights from {}", url);

    let response = http
        .get(url.clone())
        .send()
        .await
        .map_err(|e| AppError::ModelLoad(format!("failed to fetch weights: {}", e)))?;
    if !response.status().is_success() {
        return Err(AppError::ModelLoad(format!(
            "failed to fetch weights: HTTP {}",
            response.status()
        )));
    }
    let body = response
        .bytes()
        .await
        .map_err(|e| AppError::ModelLoad(format!("failed to read weights: {}", e)))?;

    let cache_dir = cache_dir.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        std::fs::create_dir_all(&cache_dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&cache_dir)?;
        file.write_all(&body)?;
        file.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::ModelLoad(format!("weights cache task aborted: {}", e)))?
    .map_err(|e| AppError::ModelLoad(format!("failed to cache weights: {}", e)))?;

    log::info!("Model weights cached");
    Ok(())
}
