//! Client for the remote corpus search and grouping service.

use std::time::Duration;

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use reqwest::Url;
use serde::de::DeserializeOwned;

use crate::error::{AppError, Result};
use crate::models::search::{SearchResults, ServiceResponse, SimilarGroups, Threshold};

const SEARCH_PATH: &str = "api/image-feature/search-similar";
const GROUPS_PATH: &str = "api/image-feature/similar-groups";

/// Talks to the search service's HTTP API.
#[derive(Debug, Clone)]
pub struct SearchClient {
    base_url: Url,
    http: reqwest::Client,
}

impl SearchClient {
    /// Client for the service rooted at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(base_url, http)
    }

    /// Client reusing an existing `reqwest::Client`.
    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| AppError::Config(format!("invalid search service URL '{}': {}", base_url, e)))?;
        Ok(Self { base_url, http })
    }

    /// Service root.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Find corpus images similar to an uploaded one.
    pub async fn search_similar(
        &self,
        image: Bytes,
        file_name: &str,
        threshold: Threshold,
    ) -> Result<SearchResults> {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let part = Part::bytes(image.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime.essence_str())
            .map_err(|e| AppError::InvalidInput(format!("bad content type: {}", e)))?;
        let form = Form::new().part("file", part);

        let url = self.endpoint(SEARCH_PATH, threshold)?;
        log::debug!("POST {}", url);

        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Service(format!("search request failed: {}", e)))?;

        Self::decode::<SearchResults>(response, "search failed").await
    }

    /// Fetch groups of mutually similar corpus images.
    pub async fn similar_groups(&self, threshold: Threshold) -> Result<SimilarGroups> {
        let url = self.endpoint(GROUPS_PATH, threshold)?;
        log::debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Service(format!("grouping request failed: {}", e)))?;

        Self::decode::<SimilarGroups>(response, "failed to fetch similar groups").await
    }

    fn endpoint(&self, path: &str, threshold: Threshold) -> Result<Url> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| AppError::Config(format!("invalid endpoint {}: {}", path, e)))?;
        url.query_pairs_mut()
            .append_pair("threshold", &threshold.to_string());
        Ok(url)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response, fallback: &str) -> Result<T> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Service(format!("failed to read response: {}", e)))?;

        // Error statuses usually still carry the JSON envelope with a message.
        match serde_json::from_slice::<ServiceResponse<T>>(&body) {
            Ok(envelope) => envelope.into_data(fallback),
            Err(_) if !status.is_success() => {
                Err(AppError::Service(format!("{}: HTTP {}", fallback, status)))
            }
            Err(e) => Err(AppError::Service(format!("malformed response: {}", e))),
        }
    }
}
